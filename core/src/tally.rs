use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error code under which URLs whose report never reached the sink are grouped.
pub const DELIVERY_FAILED: &str = "DELIVERY_FAILED";

/// Outcome of one URL in a batch, sent from a worker to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    /// Scanned and delivered; some rollups may still have failed to merge.
    Succeeded { merge_failures: usize },
    Failed { errors: Vec<(String, String)> },
    Skipped,
    /// Scanned, but the sink rejected the report.
    Undelivered { url: String },
}

/// Batch counters. Owned by a single aggregator; workers never touch it directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    #[serde(default)]
    pub undelivered: u64,
    /// Rollups of delivered reports that could not be merged into history.
    #[serde(default)]
    pub merge_failures: u64,
    /// Failing URLs grouped by error code.
    pub errors: BTreeMap<String, Vec<String>>,
}

impl Tally {
    pub fn record(&mut self, outcome: UrlOutcome) {
        self.total += 1;
        match outcome {
            UrlOutcome::Succeeded { merge_failures } => {
                self.success += 1;
                self.merge_failures += merge_failures as u64;
            }
            UrlOutcome::Skipped => self.skipped += 1,
            UrlOutcome::Failed { errors } => {
                self.failed += 1;
                for (code, url) in errors {
                    self.errors.entry(code).or_default().push(url);
                }
            }
            UrlOutcome::Undelivered { url } => {
                self.undelivered += 1;
                self.errors.entry(DELIVERY_FAILED.to_string()).or_default().push(url);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_errors_by_code() {
        let mut t = Tally::default();
        t.record(UrlOutcome::Succeeded { merge_failures: 0 });
        t.record(UrlOutcome::Skipped);
        t.record(UrlOutcome::Failed { errors: vec![("ERR_NAME_NOT_RESOLVED".into(), "https://a.test".into())] });
        t.record(UrlOutcome::Failed { errors: vec![("ERR_NAME_NOT_RESOLVED".into(), "https://b.test".into())] });
        assert_eq!((t.total, t.success, t.failed, t.skipped), (4, 1, 2, 1));
        assert_eq!(t.errors["ERR_NAME_NOT_RESOLVED"], vec!["https://a.test", "https://b.test"]);
    }

    #[test]
    fn delivery_problems_are_not_successes() {
        let mut t = Tally::default();
        t.record(UrlOutcome::Succeeded { merge_failures: 2 });
        t.record(UrlOutcome::Undelivered { url: "https://c.test".into() });
        assert_eq!((t.total, t.success, t.undelivered, t.merge_failures), (2, 1, 1, 2));
        assert_eq!(t.errors[DELIVERY_FAILED], vec!["https://c.test"]);
    }
}
