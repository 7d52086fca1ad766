//! Command-line interface definitions for the ringfence daemon.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Robocall screening daemon for Hayes-compatible voice modems.
///
/// ringfence answers-and-hangs-up on callers matched by the block filters
/// before the second ring, keeps a CSV call log, and serves the log over
/// HTTP on `/calls`.
#[derive(Parser, Debug)]
#[command(name = "ringfence")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Serial port connect string (port,baud,handshake,data-bits,stop-bits).
    #[arg(short = 'c', long = "connect", default_value = "/dev/ttyACM0,19200,n,8,1")]
    pub connect: String,

    /// Path to the pattern file of callers to block.
    #[arg(long = "block", value_name = "PATH")]
    pub block: Option<PathBuf>,

    /// Path to the pattern file of callers to always allow.
    #[arg(long = "allow", value_name = "PATH")]
    pub allow: Option<PathBuf>,

    /// Path to the call log file.
    #[arg(long = "call-log", value_name = "PATH", default_value = "call_log.csv")]
    pub call_log: PathBuf,

    /// Reputation service account identifier.
    ///
    /// The reputation filter is enabled only when both the account and the
    /// secret are given.
    #[arg(long = "rep-account", value_name = "ACCOUNT")]
    pub rep_account: Option<String>,

    /// Reputation service secret.
    #[arg(long = "rep-secret", value_name = "SECRET")]
    pub rep_secret: Option<String>,

    /// Minimum spam confidence at which the reputation filter blocks.
    #[arg(long = "rep-min-confidence", value_name = "SCORE", default_value_t = 40.0)]
    pub rep_min_confidence: f64,

    /// Command executed for every call; print `block` to block it.
    #[arg(long = "exec", value_name = "COMMAND")]
    pub exec: Option<String>,

    /// Arguments for the exec command. `{name}`, `{number}`, and `{time}`
    /// are substituted per call.
    #[arg(long = "exec-args", value_name = "ARGS", default_value = "-n {number}")]
    pub exec_args: String,

    /// Address for the call-log web server.
    #[arg(long = "listen", value_name = "ADDR", default_value = "0.0.0.0:7080")]
    pub listen: SocketAddr,

    /// Hold `/calls` responses until the log changes (long polling).
    #[arg(long = "long-poll")]
    pub long_poll: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
