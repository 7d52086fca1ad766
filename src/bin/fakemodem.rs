//! fakemodem: a serial voice-modem simulator.
//!
//! Sits on the far end of a pty pair and behaves enough like a Hayes voice
//! modem to exercise the daemon without hardware: every command line is
//! echoed and answered from a tiny bit of state, and `POST
//! /call?name=..&number=..` on the control port scripts the
//! RING/NMBR/NAME traffic of an incoming call onto the wire.
//!
//! ```text
//! socat -d -d pty,raw,echo=0 pty,raw,echo=0   # get a pty pair
//! fakemodem -c /dev/pts/3,19200,n,8,1
//! ringfence -c /dev/pts/4,19200,n,8,1 -v
//! curl -X POST 'http://localhost:8087/call?name=ACME&number=5551212'
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use ringfence::config::ConnectString;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Serial voice-modem simulator.
#[derive(Parser, Debug)]
#[command(name = "fakemodem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port connect string (port,baud,handshake,data-bits,stop-bits).
    #[arg(short = 'c', long = "connect", default_value = "/dev/ptyp5,19200,n,8,1")]
    connect: String,

    /// Address for the call-injection endpoint.
    #[arg(long = "listen", value_name = "ADDR", default_value = "0.0.0.0:8087")]
    listen: SocketAddr,

    /// Increase log verbosity.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

/// The mutable bits of modem state the commands touch.
struct SimState {
    fclass: String,
    vcid: String,
}

type Wire = Arc<Mutex<WriteHalf<SerialStream>>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let conn = ConnectString::parse(&cli.connect).context("Failed to parse connect string")?;
    let port = tokio_serial::new(&conn.port, conn.baud)
        .open_native_async()
        .with_context(|| format!("Failed to open serial port {}", conn.port))?;
    info!(port = %conn.port, baud = conn.baud, "modem port open");

    let (reader, writer) = tokio::io::split(port);
    let wire: Wire = Arc::new(Mutex::new(writer));
    let state = Arc::new(Mutex::new(SimState {
        fclass: "1".to_string(),
        vcid: "0".to_string(),
    }));

    tokio::spawn(answer_commands(reader, wire.clone(), state));

    let listener = TcpListener::bind(cli.listen)
        .await
        .context("Failed to bind control endpoint")?;
    info!(listen = %cli.listen, "call-injection endpoint listening");

    loop {
        let (stream, _peer) = listener.accept().await.context("accept failed")?;
        let wire = wire.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| serve_call(req, wire.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(error = %e, "connection ended");
            }
        });
    }
}

fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;
    Ok(())
}

/// Echo and answer command lines forever.
async fn answer_commands(
    reader: ReadHalf<SerialStream>,
    wire: Wire,
    state: Arc<Mutex<SimState>>,
) {
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\r', &mut raw).await {
            Ok(0) => {
                warn!("serial peer closed");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "serial read failed");
                return;
            }
        }

        let cmd = String::from_utf8_lossy(&raw).trim().to_string();
        if cmd.is_empty() {
            continue;
        }
        debug!(%cmd, "-> command");

        let reply = {
            let mut state = state.lock().await;
            respond(&cmd, &mut state)
        };

        let mut wire = wire.lock().await;
        let framed = format!("{cmd}\r\n{reply}\r\n");
        if let Err(e) = wire.write_all(framed.as_bytes()).await {
            warn!(error = %e, "serial write failed");
            return;
        }
        debug!(%reply, "<- reply");
    }
}

/// The command table. Everything unrecognized gets a cheerful `OK`.
fn respond(cmd: &str, state: &mut SimState) -> String {
    if cmd == "ATI3" {
        "CX93001-EIS_V0.2002-V92".to_string()
    } else if cmd == "AT+FCLASS=?" {
        "1,2,1.0,8".to_string()
    } else if cmd == "AT+FCLASS?" {
        state.fclass.clone()
    } else if let Some(value) = cmd.strip_prefix("AT+FCLASS=") {
        state.fclass = value.to_string();
        "OK".to_string()
    } else if cmd == "AT+VCID=?" {
        "(0-2)".to_string()
    } else if cmd == "AT+VCID?" {
        state.vcid.clone()
    } else if let Some(value) = cmd.strip_prefix("AT+VCID=") {
        state.vcid = value.to_string();
        "OK".to_string()
    } else {
        "OK".to_string()
    }
}

/// `POST /call?name=..&number=..` scripts one incoming call.
async fn serve_call(
    req: Request<hyper::body::Incoming>,
    wire: Wire,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST || req.uri().path() != "/call" {
        let mut response = Response::new(Full::new(Bytes::from_static(
            b"/call only accepts POST\n",
        )));
        *response.status_mut() = StatusCode::BAD_REQUEST;
        return Ok(response);
    }

    let query = req.uri().query().unwrap_or_default();
    let name = query_param(query, "name").unwrap_or_default();
    let number = query_param(query, "number").unwrap_or_default();
    info!(%name, %number, "injecting call");

    let script = [
        "RING\r\n".to_string(),
        format!("NMBR = {number}\r\n"),
        format!("NAME = {name}\r\n"),
        "RING\r\n".to_string(),
        "RING\r\n".to_string(),
    ];
    for line in script {
        {
            let mut wire = wire.lock().await;
            if let Err(e) = wire.write_all(line.as_bytes()).await {
                warn!(error = %e, "serial write failed");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Ok(Response::new(Full::new(Bytes::from_static(b"ringing\n"))))
}

/// Pull one query parameter, percent-decoded.
fn query_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| percent_decode(v))
    })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                // Two hex digits follow, or the '%' stands for itself.
                let hex = [bytes[i + 1], bytes[i + 2]];
                let decoded = std::str::from_utf8(&hex)
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match decoded {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
