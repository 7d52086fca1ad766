//! The filter race engine.
//!
//! Filters are partitioned by action class. The allow class runs first: a
//! call that any allow filter claims can never be blocked. Only when no
//! allow filter matches does the block class run. Within a class every
//! filter starts concurrently; the first match wins, a shared cancellation
//! token tells the losers to stand down, and the engine joins every task
//! before returning so nothing outlives the race.
//!
//! A filter that fails is treated as not matching - a lookup outage must
//! never answer someone's phone - but the first failure is kept and lands
//! in the journal when no filter matches.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::call::Call;

use super::{Action, Filter, FilterResult, Verdict};

/// An ordered set of filters with the allow-before-block race semantics.
#[derive(Clone, Default)]
pub struct FilterSet {
    filters: Vec<Arc<dyn Filter>>,
}

/// What one class race produced.
#[derive(Default)]
struct ClassOutcome {
    winner: Option<Verdict>,
    error: Option<(String, String)>,
}

impl FilterSet {
    /// Build a set from the given filters. Order is kept for description
    /// purposes only; race order is unspecified.
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Number of filters in the set.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Classify a call.
    ///
    /// Returns the first matching allow verdict, else the first matching
    /// block verdict, else the fail-open no-match verdict.
    pub async fn run(&self, call: &Call) -> Verdict {
        let allow = self.run_class(Action::Allow, call).await;
        if let Some(verdict) = allow.winner {
            return verdict;
        }

        let block = self.run_class(Action::Block, call).await;
        if let Some(verdict) = block.winner {
            return verdict;
        }

        Verdict::no_match(allow.error.or(block.error))
    }

    /// Race every filter of one class against the call.
    async fn run_class(&self, class: Action, call: &Call) -> ClassOutcome {
        let members: Vec<Arc<dyn Filter>> = self
            .filters
            .iter()
            .filter(|f| f.action() == class)
            .cloned()
            .collect();
        if members.is_empty() {
            return ClassOutcome::default();
        }

        let cancel = CancellationToken::new();
        // Sized to the class so a loser's send never blocks after a winner
        // has been chosen and the receiver stopped being prompt.
        let (result_tx, mut result_rx) = mpsc::channel(members.len());

        let mut tasks = JoinSet::new();
        for filter in members {
            let call = call.clone();
            let cancel = cancel.clone();
            let result_tx = result_tx.clone();
            tasks.spawn(async move {
                let result = filter.check(&call, &cancel).await;
                let _ = result_tx.send((filter.description(), result)).await;
            });
        }
        drop(result_tx);

        let mut outcome = ClassOutcome::default();
        while let Some((description, result)) = result_rx.recv().await {
            match result {
                FilterResult::Match { action, rule } => {
                    if outcome.winner.is_none() {
                        debug!(filter = %description, %rule, %action, "filter matched");
                        cancel.cancel();
                        outcome.winner = Some(Verdict {
                            action,
                            matched: true,
                            filter: description,
                            rule,
                        });
                    }
                }
                FilterResult::NoMatch { .. } => {}
                FilterResult::Err { error } => {
                    warn!(filter = %description, %error, "filter failed");
                    if outcome.error.is_none() {
                        outcome.error = Some((description, error.to_string()));
                    }
                }
            }
        }

        // Every sender is gone once the loop ends, but join anyway so no
        // filter task can outlive the engine.
        while tasks.join_next().await.is_some() {}

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn call() -> Call {
        let mut c = Call::new(Utc::now());
        c.name = "Test Caller".to_string();
        c.number = "5551212".to_string();
        c
    }

    /// A scriptable filter that tracks how many evaluations are in flight.
    struct StubFilter {
        action: Action,
        result: fn(Action) -> FilterResult,
        delay: Duration,
        running: Arc<AtomicUsize>,
    }

    fn stub(action: Action, result: fn(Action) -> FilterResult) -> Arc<dyn Filter> {
        Arc::new(StubFilter {
            action,
            result,
            delay: Duration::ZERO,
            running: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A stub that stalls for `delay` unless cancelled, plus its in-flight
    /// counter for leak checks.
    fn slow_stub(
        action: Action,
        result: fn(Action) -> FilterResult,
        delay: Duration,
    ) -> (Arc<dyn Filter>, Arc<AtomicUsize>) {
        let running = Arc::new(AtomicUsize::new(0));
        let filter = Arc::new(StubFilter {
            action,
            result,
            delay,
            running: running.clone(),
        });
        (filter, running)
    }

    #[async_trait]
    impl Filter for StubFilter {
        async fn check(&self, _call: &Call, cancel: &CancellationToken) -> FilterResult {
            self.running.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = cancel.cancelled() => {
                        self.running.fetch_sub(1, Ordering::SeqCst);
                        return FilterResult::no_match(Action::Allow);
                    }
                }
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            (self.result)(self.action)
        }

        fn action(&self) -> Action {
            self.action
        }

        fn description(&self) -> String {
            format!("stub {}", self.action)
        }
    }

    fn matching(action: Action) -> FilterResult {
        FilterResult::matched(action, "stub rule")
    }

    fn missing(_action: Action) -> FilterResult {
        FilterResult::no_match(Action::Allow)
    }

    fn failing(_action: Action) -> FilterResult {
        FilterResult::error(FilterError::NoResponse)
    }

    #[tokio::test]
    async fn test_allow_match_beats_block_match() {
        let set = FilterSet::new(vec![
            stub(Action::Block, matching),
            stub(Action::Allow, matching),
        ]);

        let verdict = set.run(&call()).await;
        assert_eq!(verdict.action, Action::Allow);
        assert!(verdict.matched);
        assert_eq!(verdict.filter, "stub allow");
    }

    #[tokio::test]
    async fn test_block_match_when_allow_misses() {
        let set = FilterSet::new(vec![
            stub(Action::Allow, missing),
            stub(Action::Block, matching),
        ]);

        let verdict = set.run(&call()).await;
        assert_eq!(verdict.action, Action::Block);
        assert!(verdict.matched);
        assert_eq!(verdict.rule, "stub rule");
    }

    #[tokio::test]
    async fn test_no_match_is_allow() {
        let set = FilterSet::new(vec![
            stub(Action::Allow, missing),
            stub(Action::Block, missing),
        ]);

        let verdict = set.run(&call()).await;
        assert_eq!(verdict.action, Action::Allow);
        assert!(!verdict.matched);
        assert_eq!(verdict.filter, "");
        assert_eq!(verdict.rule, "");
    }

    #[tokio::test]
    async fn test_empty_set_allows() {
        let set = FilterSet::default();
        let verdict = set.run(&call()).await;
        assert_eq!(verdict.action, Action::Allow);
        assert!(!verdict.matched);
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[tokio::test]
    async fn test_error_is_no_match_but_journaled() {
        let set = FilterSet::new(vec![
            stub(Action::Block, failing),
            stub(Action::Block, missing),
        ]);

        let verdict = set.run(&call()).await;
        assert_eq!(verdict.action, Action::Allow);
        assert!(!verdict.matched);
        assert_eq!(verdict.filter, "stub block");
        assert_eq!(verdict.rule, "no response from reputation service");
    }

    #[tokio::test]
    async fn test_error_does_not_mask_match() {
        let set = FilterSet::new(vec![
            stub(Action::Block, failing),
            stub(Action::Block, matching),
        ]);

        let verdict = set.run(&call()).await;
        assert_eq!(verdict.action, Action::Block);
        assert!(verdict.matched);
    }

    #[tokio::test]
    async fn test_winner_cancels_losers_and_none_leak() {
        let (slow, running) = slow_stub(Action::Block, matching, Duration::from_secs(30));
        let set = FilterSet::new(vec![slow, stub(Action::Block, matching)]);

        let verdict = tokio::time::timeout(Duration::from_secs(5), set.run(&call()))
            .await
            .expect("race must not wait out the slow filter");
        assert_eq!(verdict.action, Action::Block);

        // The engine joined everything before returning.
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }
}
