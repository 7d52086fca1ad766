//! The modem worker: one task that owns the serial line.
//!
//! Two input sources feed the worker and must be reconciled over a single
//! half-duplex wire:
//!
//! 1. **Command requests** from [`Modem`](super::Modem) handles, each a
//!    command string paired with a one-shot reply channel.
//! 2. **Unsolicited events** the modem emits on its own: `RING`, caller-ID
//!    lines (`NMBR`, `NAME`, `DATE`, `TIME`), and stray result codes.
//!
//! The scheduling rule is strict interleave: service at most one pending
//! command, then poll the wire once (bounded by the transport read
//! timeout), repeat. A command transaction reads exactly two lines - the
//! command echo and the reply - so event traffic can never be mistaken for
//! a reply outside a transaction window.
//!
//! Ringing calls are reconstructed with two slots. `assembling` holds the
//! call currently collecting caller-ID fields; it is sealed when the NAME
//! line lands or when 20 s pass without one. A sealed call moves to the
//! `sent` slot, which suppresses re-dispatch from the remaining RINGs of
//! the same call until the cooldown expires.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::call::Call;

use super::command::CallerIdMode;
use super::error::ModemError;
use super::transport::Transport;

/// How long an unfinished call keeps assembling before it is sealed with
/// whatever fields arrived, and how long a sealed call suppresses the
/// RINGs that follow it.
pub const ASSEMBLY_WINDOW: Duration = Duration::from_secs(20);

/// A command transaction submitted to the worker.
pub(super) struct Request {
    pub cmd: String,
    pub reply: oneshot::Sender<Result<String, ModemError>>,
}

/// An unsolicited line, classified.
#[derive(Debug, PartialEq, Eq)]
enum Event {
    Ring,
    Name(String),
    Number(String),
    Date,
    Time,
    Other,
}

impl Event {
    fn classify(line: &str) -> Self {
        if line == "RING" {
            return Event::Ring;
        }
        if let Some(rest) = line.strip_prefix("NAME =") {
            return Event::Name(rest.trim().to_string());
        }
        if let Some(rest) = line.strip_prefix("NMBR =") {
            return Event::Number(rest.trim().to_string());
        }
        if line.starts_with("DATE =") {
            return Event::Date;
        }
        if line.starts_with("TIME =") {
            return Event::Time;
        }
        Event::Other
    }
}

/// A call still collecting caller-ID fields.
struct Assembling {
    call: Call,
    since: Instant,
}

pub(super) struct Worker<T> {
    transport: Transport<T>,
    requests: mpsc::Receiver<Request>,
    calls: mpsc::UnboundedSender<Call>,
    caller_id_mode: Arc<RwLock<CallerIdMode>>,
    assembling: Option<Assembling>,
    sent_at: Option<Instant>,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Worker<T> {
    pub(super) fn new(
        transport: Transport<T>,
        requests: mpsc::Receiver<Request>,
        calls: mpsc::UnboundedSender<Call>,
        caller_id_mode: Arc<RwLock<CallerIdMode>>,
    ) -> Self {
        Self {
            transport,
            requests,
            calls,
            caller_id_mode,
            assembling: None,
            sent_at: None,
        }
    }

    /// Drive the wire until every [`Modem`](super::Modem) handle is gone.
    pub(super) async fn run(mut self) {
        // Discard whatever the modem buffered before we attached.
        while let Ok(Some(line)) = self.transport.read_response().await {
            trace!(%line, "discarding buffered line");
        }

        loop {
            match self.requests.try_recv() {
                Ok(req) => {
                    let result = self.transact(&req.cmd).await;
                    // The requester may have given up; that is not our problem.
                    let _ = req.reply.send(result);
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }

            match self.transport.read_response().await {
                Ok(Some(line)) => self.on_event(&line),
                Ok(None) => self.on_idle(),
                Err(e) => {
                    warn!(error = %e, "serial read failed");
                    // Back off one tick rather than spin on a dead port.
                    tokio::time::sleep(super::transport::READ_TIMEOUT).await;
                }
            }
        }

        debug!("modem worker stopped");
    }

    /// Run one command transaction: write, read echo, read reply.
    async fn transact(&mut self, cmd: &str) -> Result<String, ModemError> {
        trace!(%cmd, "sending command");
        self.transport.write_line(cmd).await?;

        let echo = self
            .transport
            .read_response()
            .await?
            .ok_or(ModemError::NoEcho)?;
        if echo != cmd {
            return Err(ModemError::EchoMismatch {
                sent: cmd.to_string(),
                got: echo,
            });
        }

        let reply = self
            .transport
            .read_response()
            .await?
            .ok_or(ModemError::NoReply)?;
        trace!(%cmd, %reply, "command reply");
        Ok(reply)
    }

    fn on_event(&mut self, line: &str) {
        match Event::classify(line) {
            Event::Ring => {
                if self.assembling.is_none() && self.sent_at.is_none() {
                    let call = Call::new(Utc::now());
                    if self.caller_id() == CallerIdMode::Off {
                        // No caller-ID coming; the first RING is all we get.
                        self.seal(call, Instant::now());
                    } else {
                        self.assembling = Some(Assembling {
                            call,
                            since: Instant::now(),
                        });
                    }
                }
            }
            Event::Number(number) => {
                let slot = self.assembling.get_or_insert_with(|| Assembling {
                    call: Call::new(Utc::now()),
                    since: Instant::now(),
                });
                slot.call.number = number;
            }
            Event::Name(name) => {
                let mut slot = self.assembling.take().unwrap_or_else(|| Assembling {
                    call: Call::new(Utc::now()),
                    since: Instant::now(),
                });
                slot.call.name = name;
                // NAME is the last caller-ID line; the call is complete.
                self.seal(slot.call, slot.since);
            }
            Event::Date | Event::Time => {}
            Event::Other => trace!(%line, "ignoring unsolicited line"),
        }
    }

    /// Handle a poll timeout: expire the assembly window and the cooldown.
    fn on_idle(&mut self) {
        if let Some(slot) = &self.assembling {
            if slot.since.elapsed() > ASSEMBLY_WINDOW {
                // Caller-ID never completed: answered elsewhere, caller hung
                // up early, or the carrier sent nothing.
                let slot = match self.assembling.take() {
                    Some(s) => s,
                    None => return,
                };
                self.dispatch(slot.call);
                self.sent_at = None;
            }
        } else if let Some(sent_at) = self.sent_at {
            if sent_at.elapsed() > ASSEMBLY_WINDOW {
                self.sent_at = None;
            }
        }
    }

    /// Seal a call: dispatch it and start the ring cooldown.
    fn seal(&mut self, call: Call, since: Instant) {
        self.dispatch(call);
        self.sent_at = Some(since);
    }

    fn dispatch(&mut self, call: Call) {
        debug!(name = %call.name, number = %call.number, "call assembled");
        if self.calls.send(call).is_err() {
            warn!("call receiver dropped; discarding call");
        }
    }

    fn caller_id(&self) -> CallerIdMode {
        match self.caller_id_mode.read() {
            Ok(mode) => *mode,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
