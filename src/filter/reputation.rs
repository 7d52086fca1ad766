//! Remote reputation lookups.
//!
//! This filter asks a phone-reputation service about the caller's number
//! and blocks when any add-on result reports a spam confidence at or above
//! the configured threshold. The service speaks a nested JSON envelope;
//! only the add-on providers modeled here are understood and everything
//! else is ignored.
//!
//! Lookups are fail-open: transport errors, decode errors, and empty
//! results all come back as filter errors, which the engine treats as
//! no-match. The in-flight request is dropped (and thereby aborted) when
//! the race is cancelled.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::call::Call;

use super::{Action, Filter, FilterError, FilterResult};

/// Default lookup endpoint. The caller number is appended as a path
/// segment.
pub const DEFAULT_BASE_URL: &str = "https://lookups.example.com/v1/PhoneNumbers";

/// Spam confidence at or above which a call is blocked.
pub const DEFAULT_MIN_SPAM_CONFIDENCE: f64 = 40.0;

/// The add-on bundle requested from the lookup service.
const ADD_ON: &str = "phone_reputation";

/// A block-class filter backed by a remote reputation service.
pub struct ReputationFilter {
    client: reqwest::Client,
    base_url: String,
    account: String,
    secret: String,
    min_spam_confidence: f64,
}

impl ReputationFilter {
    /// Build a filter with the default endpoint and threshold.
    pub fn new(account: &str, secret: &str) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, account, secret)
    }

    /// Build a filter against a specific endpoint (used by tests and
    /// self-hosted deployments).
    pub fn with_base_url(base_url: &str, account: &str, secret: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            account: account.to_string(),
            secret: secret.to_string(),
            min_spam_confidence: DEFAULT_MIN_SPAM_CONFIDENCE,
        }
    }

    /// Override the blocking threshold.
    pub fn min_spam_confidence(mut self, threshold: f64) -> Self {
        self.min_spam_confidence = threshold;
        self
    }

    async fn lookup(&self, number: &str) -> Result<LookupResponse, FilterError> {
        let url = format!("{}/{}?AddOns={}", self.base_url, number, ADD_ON);
        debug!(%url, "reputation lookup");
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.account, Some(&self.secret))
            .send()
            .await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Filter for ReputationFilter {
    async fn check(&self, call: &Call, cancel: &CancellationToken) -> FilterResult {
        let response = tokio::select! {
            response = self.lookup(&call.number) => response,
            _ = cancel.cancelled() => return FilterResult::no_match(Action::Allow),
        };

        match response {
            Ok(response) => classify(&response, self.min_spam_confidence),
            Err(error) => FilterResult::error(error),
        }
    }

    fn action(&self) -> Action {
        Action::Block
    }

    fn description(&self) -> String {
        "phone reputation lookup".to_string()
    }
}

/// Reduce a decoded lookup response to a filter result.
fn classify(response: &LookupResponse, min_spam_confidence: f64) -> FilterResult {
    let results = response.add_on_results();
    if results.is_empty() {
        return FilterResult::error(FilterError::NoResponse);
    }

    for result in results {
        debug!(
            provider = result.name(),
            confidence = result.spam_confidence(),
            "add-on result"
        );
        if result.spam_confidence() >= min_spam_confidence {
            return FilterResult::matched(Action::Block, result.spam_description());
        }
    }

    FilterResult::no_match(Action::Allow)
}

/// One add-on's view of a phone number.
///
/// Every provider the envelope can carry exposes this capability set;
/// the filter never looks deeper than it.
trait AddOnResult {
    /// Provider name, for diagnostics.
    fn name(&self) -> &'static str;
    /// How confident the provider is that the number is spam.
    fn spam_confidence(&self) -> f64;
    /// Human description of the classification, journaled on block.
    fn spam_description(&self) -> String;
}

/// Outer response envelope from the lookup service.
#[derive(Debug, Deserialize)]
pub struct LookupResponse {
    #[serde(default)]
    add_ons: Option<AddOns>,
}

impl LookupResponse {
    fn add_on_results(&self) -> Vec<&dyn AddOnResult> {
        let mut results: Vec<&dyn AddOnResult> = Vec::new();
        if let Some(add_ons) = &self.add_ons {
            if let Some(rep) = &add_ons.results.phone_reputation {
                results.push(rep);
            }
        }
        results
    }
}

#[derive(Debug, Deserialize)]
struct AddOns {
    #[serde(default)]
    results: AddOnProviders,
}

/// The providers we know how to read. Unrecognized providers simply do not
/// deserialize into anything.
#[derive(Debug, Default, Deserialize)]
struct AddOnProviders {
    #[serde(default)]
    phone_reputation: Option<PhoneReputation>,
}

/// The phone-reputation add-on payload.
#[derive(Debug, Deserialize)]
struct PhoneReputation {
    #[serde(default)]
    result: Option<ReputationResult>,
}

#[derive(Debug, Deserialize)]
struct ReputationResult {
    #[serde(default)]
    reputation_details: ReputationDetails,
}

#[derive(Debug, Default, Deserialize)]
struct ReputationDetails {
    #[serde(default)]
    score: f64,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl AddOnResult for PhoneReputation {
    fn name(&self) -> &'static str {
        "phone_reputation"
    }

    fn spam_confidence(&self) -> f64 {
        self.result
            .as_ref()
            .map(|r| r.reputation_details.score)
            .unwrap_or_default()
    }

    fn spam_description(&self) -> String {
        let details = self.result.as_ref().map(|r| &r.reputation_details);
        let kind = details
            .and_then(|d| d.kind.as_deref())
            .unwrap_or("Unknown");
        let category = details
            .and_then(|d| d.category.as_deref())
            .unwrap_or("Unknown");
        format!("{kind}: {category}")
    }
}
