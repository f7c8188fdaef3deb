use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use crate::monitor::poll::PollOutcome;
use crate::scheduler::TaskOutcome;
use crate::sink::Severity;

/// Aggregated result of one monitor cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub jobs_processed: usize,
    /// Per-bucket counts: canonical state tokens plus `MISSED` (reaped
    /// tasks) and `unknown` (failed status queries).
    pub counts: BTreeMap<String, usize>,
    /// One line per record that could not be read this cycle.
    pub bad_records: Vec<String>,
}

impl CycleReport {
    /// Cycle severity is OK unless a record was unreadable.
    fn base_severity(bad_records: &[String]) -> Severity {
        if bad_records.is_empty() {
            Severity::Ok
        } else {
            Severity::Warning
        }
    }

    fn bad_records_block(bad_records: &[String]) -> String {
        if bad_records.is_empty() {
            return String::new();
        }
        format!(
            "\n---------------------\nBad job descriptions:\n{}",
            bad_records.join("\n---\n")
        )
    }

    /// Report for a cycle that found nothing to poll.
    pub fn no_active_jobs(bad_records: Vec<String>) -> CycleReport {
        let severity = Self::base_severity(&bad_records);
        let summary = format!(
            "no active jobs [{}]",
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
        );
        let detail = format!("{}{}", summary, Self::bad_records_block(&bad_records));
        CycleReport {
            severity,
            summary,
            detail,
            jobs_processed: 0,
            counts: BTreeMap::new(),
            bad_records,
        }
    }

    /// Merge task-local outcomes into the cycle report.
    pub fn from_outcomes(
        outcomes: Vec<(String, TaskOutcome<PollOutcome>)>,
        bad_records: Vec<String>,
    ) -> CycleReport {
        let jobs_processed = outcomes.len();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (_, outcome) in &outcomes {
            let bucket = match outcome {
                TaskOutcome::Completed(poll) => poll.bucket(),
                TaskOutcome::Reaped => PollOutcome::Missed.bucket(),
            };
            *counts.entry(bucket).or_insert(0) += 1;
        }
        let severity = Self::base_severity(&bad_records);
        let summary = format!("Jobs processed - {}", jobs_processed);
        let states = counts
            .iter()
            .map(|(bucket, n)| format!("{} : {}", bucket, n))
            .collect::<Vec<_>>()
            .join("\n");
        let detail = format!(
            "{}\n{}{}",
            summary,
            states,
            Self::bad_records_block(&bad_records)
        );
        CycleReport {
            severity,
            summary,
            detail,
            jobs_processed,
            counts,
            bad_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CanonicalState;

    #[test]
    fn empty_cycle_is_ok() {
        let report = CycleReport::no_active_jobs(Vec::new());
        assert_eq!(report.severity, Severity::Ok);
        assert_eq!(report.jobs_processed, 0);
        assert!(report.summary.starts_with("no active jobs"));
    }

    #[test]
    fn bad_records_turn_the_cycle_warning() {
        let report = CycleReport::no_active_jobs(vec!["wn9 - corrupt".to_string()]);
        assert_eq!(report.severity, Severity::Warning);
        assert!(report.detail.contains("Bad job descriptions"));
        assert!(report.detail.contains("wn9 - corrupt"));
    }

    #[test]
    fn outcomes_aggregate_into_buckets() {
        let outcomes = vec![
            (
                "wn1".to_string(),
                TaskOutcome::Completed(PollOutcome::Observed(CanonicalState::Running)),
            ),
            (
                "wn2".to_string(),
                TaskOutcome::Completed(PollOutcome::Observed(CanonicalState::Running)),
            ),
            (
                "wn3".to_string(),
                TaskOutcome::Completed(PollOutcome::Discarded(CanonicalState::Queued)),
            ),
            (
                "wn4".to_string(),
                TaskOutcome::Completed(PollOutcome::StatusFailed),
            ),
            ("wn5".to_string(), TaskOutcome::Reaped),
        ];
        let report = CycleReport::from_outcomes(outcomes, Vec::new());
        assert_eq!(report.severity, Severity::Ok);
        assert_eq!(report.jobs_processed, 5);
        assert_eq!(report.counts.get("RUNNING"), Some(&2));
        assert_eq!(report.counts.get("QUEUED"), Some(&1));
        assert_eq!(report.counts.get("unknown"), Some(&1));
        assert_eq!(report.counts.get("MISSED"), Some(&1));
        assert!(report.detail.contains("RUNNING : 2"));
    }

    #[test]
    fn status_failures_do_not_change_cycle_severity() {
        let outcomes = vec![(
            "wn1".to_string(),
            TaskOutcome::Completed(PollOutcome::StatusFailed),
        )];
        let report = CycleReport::from_outcomes(outcomes, Vec::new());
        assert_eq!(report.severity, Severity::Ok);
    }
}
