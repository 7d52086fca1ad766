//! The HTTP observer surface.
//!
//! One endpoint matters: `GET /calls` returns the call log as JSON in the
//! shape `{"calls":[{"time":…,"name":…,"number":…,"action":…,"filter":…,
//! "rule":…},…]}`. When long polling is enabled the response is held back
//! until the log changes. Any other method on `/calls` is a 400. The root
//! path serves a minimal embedded page that renders the log.
//!
//! Each connection is handled on its own task; the accept loop runs until
//! the shutdown signal flips.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::journal::CallJournal;

/// A placeholder for the full web bundle: just enough page to see the log.
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>ringfence</title></head>
<body>
<h1>ringfence call log</h1>
<table id="calls" border="1">
<tr><th>Time</th><th>Name</th><th>Number</th><th>Action</th><th>Filter</th><th>Rule</th></tr>
</table>
<script>
fetch("/calls").then(r => r.json()).then(log => {
  const table = document.getElementById("calls");
  for (const c of log.calls) {
    const row = table.insertRow();
    for (const field of [c.time, c.name, c.number, c.action, c.filter, c.rule]) {
      row.insertCell().textContent = field;
    }
  }
});
</script>
</body>
</html>
"#;

/// Errors from the HTTP server.
#[derive(Debug, Error)]
pub enum WebError {
    /// Binding or accepting on the listen address failed.
    #[error("web server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the observer endpoint.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Address to listen on, e.g. `0.0.0.0:7080`.
    pub listen: SocketAddr,
    /// Hold `/calls` responses until the log changes.
    pub long_poll: bool,
}

/// The call-log HTTP server.
pub struct WebServer {
    config: WebConfig,
    journal: Arc<CallJournal>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WebServer {
    /// Create a server over the given journal.
    pub fn new(config: WebConfig, journal: Arc<CallJournal>, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            config,
            journal,
            shutdown_rx,
        }
    }

    /// Accept and serve connections until shutdown.
    pub async fn run(self) -> Result<(), WebError> {
        let listener = TcpListener::bind(self.config.listen).await?;
        info!(listen = %self.config.listen, "web server listening");

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            self.spawn_connection(stream);
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("web server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream) {
        let journal = self.journal.clone();
        let long_poll = self.config.long_poll;

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let journal = journal.clone();
                async move { handle_request(req, journal, long_poll).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %e, "connection ended");
            }
        });
    }
}

/// Route a single request. The request body is never read, so any body
/// type will do.
pub async fn handle_request<B>(
    req: Request<B>,
    journal: Arc<CallJournal>,
    long_poll: bool,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/calls") => serve_calls(journal, long_poll).await,
        (_, "/calls") => plain_response(StatusCode::BAD_REQUEST, "/calls only accepts GET\n"),
        (&Method::GET, "/") => html_response(INDEX_HTML),
        _ => plain_response(StatusCode::NOT_FOUND, "not found\n"),
    };
    Ok(response)
}

async fn serve_calls(journal: Arc<CallJournal>, long_poll: bool) -> Response<Full<Bytes>> {
    if long_poll {
        journal.changed_after(Utc::now()).await;
    }

    match serde_json::to_vec(&journal.snapshot()) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            warn!(error = %e, "failed to serialize call log");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed\n")
        }
    }
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn html_response(body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{rfc3339_nanos, CallEntry};
    use http_body_util::BodyExt;

    fn journal_with_one_call() -> Arc<CallJournal> {
        let dir = tempfile::tempdir().unwrap();
        let journal = CallJournal::load(dir.path().join("calls.csv")).unwrap();
        journal
            .append(CallEntry {
                time: rfc3339_nanos::parse("2026-08-02T09:15:00Z").unwrap(),
                name: "ACME".to_string(),
                number: "5551212".to_string(),
                action: "block".to_string(),
                filter: "block.csv".to_string(),
                rule: "spam".to_string(),
            })
            .unwrap();
        Arc::new(journal)
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn request(method: Method, uri: &str) -> Request<String> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(String::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_calls_returns_json_log() {
        let journal = journal_with_one_call();

        let response = handle_request(request(Method::GET, "/calls"), journal, false)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[hyper::header::CONTENT_TYPE],
            "application/json"
        );

        let json = body_json(response).await;
        assert_eq!(json["calls"][0]["number"], "5551212");
        assert_eq!(json["calls"][0]["action"], "block");
        assert_eq!(json["calls"][0]["rule"], "spam");
    }

    #[tokio::test]
    async fn test_long_poll_waits_for_append() {
        let journal = journal_with_one_call();

        let pending = {
            let journal = journal.clone();
            tokio::spawn(async move { serve_calls(journal, true).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        journal
            .append(CallEntry {
                time: Utc::now(),
                name: String::new(),
                number: "5550000".to_string(),
                action: "allow".to_string(),
                filter: String::new(),
                rule: String::new(),
            })
            .unwrap();

        let response = tokio::time::timeout(std::time::Duration::from_secs(2), pending)
            .await
            .expect("long poll should resolve after append")
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["calls"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_get_on_calls_is_rejected() {
        let journal = journal_with_one_call();
        for method in [Method::POST, Method::PUT, Method::DELETE] {
            let response = handle_request(request(method, "/calls"), journal.clone(), false)
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_index_and_unknown_paths() {
        let journal = journal_with_one_call();

        let index = handle_request(request(Method::GET, "/"), journal.clone(), false)
            .await
            .unwrap();
        assert_eq!(index.status(), StatusCode::OK);
        assert!(INDEX_HTML.contains("/calls"));

        let missing = handle_request(request(Method::GET, "/nope"), journal, false)
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
