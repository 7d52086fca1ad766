//! Call classification filters.
//!
//! A filter inspects one [`Call`] and produces one [`FilterResult`]. Every
//! filter belongs to an action class - allow or block - and the
//! [`engine`](crate::filter::engine) races all filters of a class
//! concurrently, cancelling the losers once a match wins.
//!
//! Three implementations ship with the daemon:
//!
//! - [`LocalFilter`]: pattern rules loaded from a CSV file
//! - [`ReputationFilter`]: an outbound HTTP lookup against a spam-scoring
//!   service
//! - [`ExecFilter`]: an external command consulted per call

pub mod engine;
pub mod exec;
pub mod local;
pub mod reputation;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::call::Call;

pub use engine::FilterSet;
pub use exec::ExecFilter;
pub use local::{LocalFilter, Predicate, Rule};
pub use reputation::ReputationFilter;

/// What happens to a call that matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Let the phone keep ringing.
    Allow,
    /// Answer and immediately hang up.
    Block,
}

impl Action {
    /// The canonical journal spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Block => "block",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Action::Allow),
            "block" => Ok(Action::Block),
            other => Err(format!("unrecognized action: {other}")),
        }
    }
}

/// Failure modes of filter evaluation.
///
/// A filter error never blocks a call; the engine records the error and
/// treats the filter as not matching.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The reputation lookup failed in transport or decoding.
    #[error("reputation lookup failed: {0}")]
    Lookup(#[from] reqwest::Error),

    /// The reputation service answered without any add-on results.
    #[error("no response from reputation service")]
    NoResponse,

    /// The exec command could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        /// The command that failed to spawn.
        command: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading the exec command's output failed.
    #[error("failed to read exec command output: {0}")]
    ExecRead(std::io::Error),

    /// The exec command exited with a failure status.
    #[error("exec command exited with {0}")]
    ExecFailed(std::process::ExitStatus),

    /// The exec command outlived its 10-second budget.
    #[error("exec command timed out")]
    ExecTimeout,
}

/// The outcome of evaluating one filter against one call.
#[derive(Debug)]
pub enum FilterResult {
    /// The filter matched; take its action.
    Match {
        /// The action class of the matching filter.
        action: Action,
        /// Description of the rule (or reason) that matched.
        rule: String,
    },
    /// The filter did not match.
    NoMatch {
        /// The filter's no-match action. The engine treats every no-match
        /// as allow; this is informational.
        action: Action,
    },
    /// Evaluation failed; treated as no-match/allow by the engine.
    Err {
        /// What went wrong.
        error: FilterError,
    },
}

impl FilterResult {
    /// A match with the given action and rule description.
    pub fn matched(action: Action, rule: impl Into<String>) -> Self {
        FilterResult::Match {
            action,
            rule: rule.into(),
        }
    }

    /// A no-match carrying the filter's no-match action.
    pub fn no_match(action: Action) -> Self {
        FilterResult::NoMatch { action }
    }

    /// An evaluation failure.
    pub fn error(error: FilterError) -> Self {
        FilterResult::Err { error }
    }
}

/// The final classification of a call after the engine has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// The action to take.
    pub action: Action,
    /// Whether any filter matched.
    pub matched: bool,
    /// Description of the deciding filter, or of the first filter that
    /// errored when nothing matched; empty otherwise.
    pub filter: String,
    /// Description of the matching rule, or the error text kept for the
    /// journal; empty otherwise.
    pub rule: String,
}

impl Verdict {
    /// The fail-open verdict: nothing matched, let it ring.
    ///
    /// When a filter errored during the run, its description and error text
    /// ride along so the journal captures them.
    pub fn no_match(error: Option<(String, String)>) -> Self {
        let (filter, rule) = error.unwrap_or_default();
        Self {
            action: Action::Allow,
            matched: false,
            filter,
            rule,
        }
    }
}

/// A call-classification filter.
///
/// Implementations must be cheap to share: the engine evaluates one filter
/// against many calls concurrently. Evaluation must honor the cancellation
/// token at every I/O boundary; a cancelled filter returns promptly with a
/// no-match.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Evaluate the filter against a call.
    async fn check(&self, call: &Call, cancel: &CancellationToken) -> FilterResult;

    /// The action class this filter belongs to.
    fn action(&self) -> Action;

    /// Human-readable description for the journal.
    fn description(&self) -> String;
}
