//! Pattern-based local filtering.
//!
//! A local filter owns an ordered list of rules loaded from a four-column
//! CSV file: `description,name-regex,number-regex,predicate-name`. Empty
//! pattern columns mean no constraint on that field; the predicate column
//! names one of a closed registry of built-in checks, or is empty.
//!
//! Patterns compile when the file loads; a bad pattern or an unknown
//! predicate aborts loading rather than silently passing calls through.

use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::call::Call;
use crate::config::ConfigError;

use super::{Action, Filter, FilterResult};

/// The closed registry of built-in rule predicates.
///
/// Robocallers frequently stuff the phone number into the caller-name
/// field (or vice versa); both checks strip non-alphanumeric characters
/// from the two fields before testing containment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// The caller's name contains their number.
    NameContainsNumber,
    /// The caller's number contains their name.
    NumberContainsName,
}

impl Predicate {
    /// Look up a predicate by its pattern-file name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "NameContainsNumber" => Some(Predicate::NameContainsNumber),
            "NumberContainsName" => Some(Predicate::NumberContainsName),
            _ => None,
        }
    }

    /// Evaluate the predicate against a call.
    pub fn matches(self, call: &Call) -> bool {
        let name = alphanumeric(&call.name);
        let number = alphanumeric(&call.number);
        match self {
            Predicate::NameContainsNumber => name.contains(&number),
            Predicate::NumberContainsName => number.contains(&name),
        }
    }
}

/// Strip everything but letters and digits.
fn alphanumeric(s: &str) -> String {
    s.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// One pattern rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Human-readable description, journaled on match.
    pub description: String,
    name: Option<Regex>,
    number: Option<Regex>,
    predicate: Option<Predicate>,
}

impl Rule {
    /// Build a rule, compiling the non-empty patterns.
    pub fn new(
        description: &str,
        name_pattern: &str,
        number_pattern: &str,
        predicate: Option<Predicate>,
    ) -> Result<Self, regex::Error> {
        let compile = |p: &str| -> Result<Option<Regex>, regex::Error> {
            if p.is_empty() {
                Ok(None)
            } else {
                Regex::new(p).map(Some)
            }
        };
        Ok(Self {
            description: description.to_string(),
            name: compile(name_pattern)?,
            number: compile(number_pattern)?,
            predicate,
        })
    }

    /// Whether the rule matches the call: name pattern, number pattern, or
    /// predicate, in that order.
    pub fn matches(&self, call: &Call) -> bool {
        if self
            .name
            .as_ref()
            .is_some_and(|re| re.is_match(&call.name))
        {
            return true;
        }
        if self
            .number
            .as_ref()
            .is_some_and(|re| re.is_match(&call.number))
        {
            return true;
        }
        self.predicate.is_some_and(|p| p.matches(call))
    }
}

/// A filter backed by an ordered list of local rules.
#[derive(Debug)]
pub struct LocalFilter {
    description: String,
    action: Action,
    no_match_action: Action,
    rules: Vec<Rule>,
}

impl LocalFilter {
    /// An empty filter with the given description and action classes.
    pub fn new(description: &str, action: Action, no_match_action: Action) -> Self {
        Self {
            description: description.to_string(),
            action,
            no_match_action,
            rules: Vec::new(),
        }
    }

    /// Append a rule, compiling its patterns.
    pub fn add(
        &mut self,
        description: &str,
        name_pattern: &str,
        number_pattern: &str,
        predicate: Option<Predicate>,
    ) -> Result<(), regex::Error> {
        self.rules
            .push(Rule::new(description, name_pattern, number_pattern, predicate)?);
        Ok(())
    }

    /// Load a filter from a four-column pattern file. The file path becomes
    /// the filter's description.
    pub fn load(
        path: impl AsRef<Path>,
        action: Action,
        no_match_action: Action,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let err_path = || path.to_path_buf();

        let file = std::fs::File::open(path).map_err(|source| ConfigError::Io {
            path: err_path(),
            source,
        })?;

        let mut filter = Self::new(&path.to_string_lossy(), action, no_match_action);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        for record in reader.records() {
            let record = record.map_err(|source| ConfigError::Csv {
                path: err_path(),
                source,
            })?;
            if record.len() != 4 {
                return Err(ConfigError::RuleFieldCount {
                    path: err_path(),
                    found: record.len(),
                });
            }

            let predicate = match &record[3] {
                "" => None,
                name => Some(Predicate::parse(name).ok_or_else(|| {
                    ConfigError::UnknownPredicate {
                        path: err_path(),
                        name: name.to_string(),
                    }
                })?),
            };

            filter
                .add(&record[0], &record[1], &record[2], predicate)
                .map_err(|source| ConfigError::Pattern {
                    path: err_path(),
                    pattern: format!("{},{}", &record[1], &record[2]),
                    source,
                })?;
        }

        Ok(filter)
    }

    /// Number of rules loaded.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the filter has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl Filter for LocalFilter {
    async fn check(&self, call: &Call, cancel: &CancellationToken) -> FilterResult {
        for rule in &self.rules {
            if cancel.is_cancelled() {
                return FilterResult::no_match(Action::Allow);
            }
            if rule.matches(call) {
                return FilterResult::matched(self.action, rule.description.clone());
            }
        }
        FilterResult::no_match(self.no_match_action)
    }

    fn action(&self) -> Action {
        self.action
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::io::Write;

    fn call(name: &str, number: &str) -> Call {
        let mut c = Call::new(Utc::now());
        c.name = name.to_string();
        c.number = number.to_string();
        c
    }

    #[test]
    fn test_predicates_after_stripping() {
        // Containment holds after stripping punctuation from either side.
        assert!(Predicate::NameContainsNumber.matches(&call("1112223333", "1112223333")));
        assert!(Predicate::NameContainsNumber.matches(&call("V1112223333", "111-222-3333")));
        assert!(Predicate::NameContainsNumber.matches(&call("1-111-222-3333", "1112223333")));
        assert!(!Predicate::NameContainsNumber.matches(&call("Jane Doe", "5556649888")));

        assert!(Predicate::NumberContainsName.matches(&call("111-222-3333", "1112223333")));
        assert!(Predicate::NumberContainsName.matches(&call("1112223333", "1-111-222-3333")));
        assert!(!Predicate::NumberContainsName.matches(&call("Jane Doe", "5556649888")));
    }

    #[test]
    fn test_predicate_registry_is_closed() {
        assert_eq!(
            Predicate::parse("NameContainsNumber"),
            Some(Predicate::NameContainsNumber)
        );
        assert_eq!(
            Predicate::parse("NumberContainsName"),
            Some(Predicate::NumberContainsName)
        );
        assert_eq!(Predicate::parse("NameEqualsNumber"), None);
    }

    #[test]
    fn test_rule_matches_name_or_number_or_predicate() {
        let by_name = Rule::new("spam", "^V[0-9]*$", "", None).unwrap();
        assert!(by_name.matches(&call("V1112223333", "111-222-3333")));
        assert!(!by_name.matches(&call("Vendor", "111-222-3333")));

        let by_number = Rule::new("scam", "", "^16495551212$", None).unwrap();
        assert!(by_number.matches(&call("Anyone", "16495551212")));
        assert!(!by_number.matches(&call("Anyone", "5556649888")));

        let by_predicate =
            Rule::new("nin", "", "", Some(Predicate::NameContainsNumber)).unwrap();
        assert!(by_predicate.matches(&call("1112223333", "1112223333")));

        // All columns empty: matches nothing.
        let inert = Rule::new("inert", "", "", None).unwrap();
        assert!(!inert.matches(&call("Anyone", "5551212")));
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let mut filter = LocalFilter::new("block list", Action::Block, Action::Allow);
        filter.add("first", "", "^555", None).unwrap();
        filter.add("second", "", "^5551212$", None).unwrap();

        let cancel = CancellationToken::new();
        match filter.check(&call("x", "5551212"), &cancel).await {
            FilterResult::Match { action, rule } => {
                assert_eq!(action, Action::Block);
                assert_eq!(rule, "first");
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_match_action_reported() {
        let filter = LocalFilter::new("empty", Action::Block, Action::Allow);
        let cancel = CancellationToken::new();
        match filter.check(&call("x", "y"), &cancel).await {
            FilterResult::NoMatch { action } => assert_eq!(action, Action::Allow),
            other => panic!("expected no match, got {other:?}"),
        }
    }

    #[test]
    fn test_load_pattern_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "international call scam,,^16495551212$,").unwrap();
        writeln!(file, "name contains number,,,NameContainsNumber").unwrap();
        file.flush().unwrap();

        let filter = LocalFilter::load(file.path(), Action::Block, Action::Allow).unwrap();
        assert_eq!(filter.len(), 2);
        assert_eq!(filter.description(), file.path().to_string_lossy());
    }

    #[test]
    fn test_load_rejects_wrong_column_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "only,three,columns").unwrap();
        file.flush().unwrap();

        let err = LocalFilter::load(file.path(), Action::Block, Action::Allow).unwrap_err();
        assert!(matches!(err, ConfigError::RuleFieldCount { found: 3, .. }));
    }

    #[test]
    fn test_load_rejects_bad_pattern() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "broken,[,,").unwrap();
        file.flush().unwrap();

        let err = LocalFilter::load(file.path(), Action::Block, Action::Allow).unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }

    #[test]
    fn test_load_rejects_unknown_predicate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bad,,,NameEqualsNumber").unwrap();
        file.flush().unwrap();

        let err = LocalFilter::load(file.path(), Action::Block, Action::Allow).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPredicate { .. }));
    }
}
