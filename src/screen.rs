//! The per-call screening pipeline.
//!
//! The screener owns the receive side of the modem's call channel. Calls
//! are handled one at a time: classify through the filter set, answer and
//! hang up when the verdict is block, journal the result. Sequential
//! handling keeps journal order equal to call order; the concurrency lives
//! inside the filter engine.
//!
//! Nothing on this path is allowed to answer the phone by accident: a
//! block command failure and a journal write failure are both reported and
//! swallowed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::call::{Call, CallEntry};
use crate::filter::{Action, FilterSet};
use crate::journal::CallJournal;
use crate::modem::Modem;

/// Classifies, blocks, and journals incoming calls.
pub struct Screener {
    modem: Modem,
    filters: Arc<FilterSet>,
    journal: Arc<CallJournal>,
}

impl Screener {
    /// Wire a screener to its collaborators.
    pub fn new(modem: Modem, filters: Arc<FilterSet>, journal: Arc<CallJournal>) -> Self {
        Self {
            modem,
            filters,
            journal,
        }
    }

    /// Handle calls until the modem worker is gone.
    pub async fn run(self, mut calls: mpsc::UnboundedReceiver<Call>) {
        while let Some(call) = calls.recv().await {
            self.screen(call).await;
        }
    }

    async fn screen(&self, call: Call) {
        info!(name = %call.name, number = %call.number, "incoming call");

        let verdict = self.filters.run(&call).await;
        if verdict.action == Action::Block {
            info!(filter = %verdict.filter, rule = %verdict.rule, "blocking call");
            if let Err(e) = self.modem.block_call().await {
                error!(error = %e, "failed to block call");
            }
        } else {
            info!(filter = %verdict.filter, rule = %verdict.rule, "allowing call");
        }

        let entry = CallEntry::new(&call, &verdict);
        if let Err(e) = self.journal.append(entry) {
            error!(error = %e, "failed to write call log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, LocalFilter};
    use chrono::Utc;
    use std::collections::HashMap;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn test_blocked_call_answers_hangs_up_and_journals() {
        let (near, far) = duplex(1024);
        let (modem, _modem_calls) = Modem::with_transport(near);

        // Echo + OK every command, recording what arrived.
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(far);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                let cmd = line.trim().to_string();
                if cmd.is_empty() {
                    continue;
                }
                let out = format!("{cmd}\r\nOK\r\n");
                if reader.get_mut().write_all(out.as_bytes()).await.is_err() {
                    break;
                }
                let _ = seen_tx.send(cmd);
            }
        });

        let mut block = LocalFilter::new("block list", Action::Block, Action::Allow);
        block.add("spam", "", "^5551212$", None).unwrap();
        let filters = Arc::new(FilterSet::new(vec![
            Arc::new(block) as Arc<dyn Filter>
        ]));

        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(CallJournal::load(dir.path().join("calls.csv")).unwrap());

        let screener = Screener::new(modem, filters, journal.clone());
        let mut call = Call::new(Utc::now());
        call.name = "Robocaller".to_string();
        call.number = "5551212".to_string();
        screener.screen(call).await;

        assert_eq!(seen_rx.recv().await.as_deref(), Some("ATA"));
        assert_eq!(seen_rx.recv().await.as_deref(), Some("ATH0"));

        let log = journal.snapshot();
        assert_eq!(log.calls.len(), 1);
        assert_eq!(log.calls[0].action, "block");
        assert_eq!(log.calls[0].rule, "spam");
    }

    #[tokio::test]
    async fn test_allowed_call_touches_no_wire() {
        let (near, _far) = duplex(1024);
        let (modem, _modem_calls) = Modem::with_transport(near);

        let filters = Arc::new(FilterSet::default());
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(CallJournal::load(dir.path().join("calls.csv")).unwrap());

        let screener = Screener::new(modem, filters, journal.clone());
        let mut call = Call::new(Utc::now());
        call.number = "5550000".to_string();
        screener.screen(call).await;

        let log = journal.snapshot();
        assert_eq!(log.calls.len(), 1);
        assert_eq!(log.calls[0].action, "allow");
        assert_eq!(log.calls[0].filter, "");
    }
}
