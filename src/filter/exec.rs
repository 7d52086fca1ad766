//! External-command filtering.
//!
//! An exec filter consults an operator-supplied program for every call.
//! The argument template is rendered against the call - `{name}`,
//! `{number}`, and `{time}` placeholders are substituted - and the child's
//! standard output is probed: a program that prints exactly `block` blocks
//! the call, anything else allows it.
//!
//! The child is raced against the engine's cancellation signal and a hard
//! 10-second budget, and is killed on both. Spawn failures, read failures,
//! and non-zero exits are filter errors, so a broken hook can never block
//! a call.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::call::Call;
use crate::call::rfc3339_nanos;

use super::{Action, Filter, FilterError, FilterResult};

/// Hard wall-time budget for the child process.
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(10);

/// How many stdout bytes are examined. `block` is five bytes; nothing past
/// that changes the verdict.
const PROBE_LEN: usize = 5;

/// A block-class filter that delegates to an external command.
pub struct ExecFilter {
    command: String,
    args_template: String,
}

impl ExecFilter {
    /// Build a filter running `command` with the given argument template.
    pub fn new(command: &str, args_template: &str) -> Self {
        Self {
            command: command.to_string(),
            args_template: args_template.to_string(),
        }
    }

    /// Render the argument template against a call. Arguments are split on
    /// whitespace before substitution, so a substituted value can carry
    /// spaces without being re-split.
    fn render_args(&self, call: &Call) -> Vec<String> {
        self.args_template
            .split_whitespace()
            .map(|arg| {
                arg.replace("{name}", &call.name)
                    .replace("{number}", &call.number)
                    .replace("{time}", &rfc3339_nanos::format(&call.time))
            })
            .collect()
    }

    /// Read up to [`PROBE_LEN`] bytes of stdout, then reap the child.
    async fn probe(child: &mut Child) -> Result<(Vec<u8>, std::process::ExitStatus), FilterError> {
        let mut stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                return Err(FilterError::ExecRead(std::io::Error::other(
                    "child stdout was not captured",
                )))
            }
        };

        let mut probe = [0u8; PROBE_LEN];
        let mut filled = 0;
        while filled < PROBE_LEN {
            let n = stdout
                .read(&mut probe[filled..])
                .await
                .map_err(FilterError::ExecRead)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        drop(stdout);

        let status = child.wait().await.map_err(FilterError::ExecRead)?;
        Ok((probe[..filled].to_vec(), status))
    }
}

#[async_trait]
impl Filter for ExecFilter {
    async fn check(&self, call: &Call, cancel: &CancellationToken) -> FilterResult {
        let args = self.render_args(call);
        debug!(command = %self.command, ?args, "running exec filter");

        let mut child = match Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(source) => {
                return FilterResult::error(FilterError::Spawn {
                    command: self.command.clone(),
                    source,
                })
            }
        };

        let outcome = tokio::select! {
            outcome = Self::probe(&mut child) => Some(outcome),
            _ = cancel.cancelled() => None,
            _ = tokio::time::sleep(EXEC_TIMEOUT) => Some(Err(FilterError::ExecTimeout)),
        };

        match outcome {
            Some(Ok((probe, status))) => {
                if !status.success() {
                    return FilterResult::error(FilterError::ExecFailed(status));
                }
                debug!(output = %String::from_utf8_lossy(&probe), "exec filter returned");
                if probe == b"block" {
                    FilterResult::matched(Action::Block, "command returned: block")
                } else {
                    FilterResult::no_match(Action::Allow)
                }
            }
            Some(Err(error)) => {
                if matches!(error, FilterError::ExecTimeout) {
                    warn!(command = %self.command, "exec filter timed out");
                }
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "exec child already gone");
                }
                FilterResult::error(error)
            }
            None => {
                // Race lost elsewhere; take the child down with us.
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "exec child already gone");
                }
                FilterResult::no_match(Action::Allow)
            }
        }
    }

    fn action(&self) -> Action {
        Action::Block
    }

    fn description(&self) -> String {
        format!("{} {}", self.command, self.args_template)
    }
}
