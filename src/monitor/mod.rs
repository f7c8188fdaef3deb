mod cycle;
mod poll;

pub use cycle::CycleReport;
pub use poll::PollOutcome;

use std::sync::Arc;

use chrono::Utc;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::escalation::{CounterStore, EscalationCounter};
use crate::provider::{JobProvider, JobSpec};
use crate::record::{JobRecord, RecordStore};
use crate::scheduler::PollScheduler;
use crate::sink::{CheckResult, ResultSink, Severity};

use poll::PollContext;

/// The job lifecycle monitor: submits probe jobs, babysits them through a
/// bounded-concurrency poll cycle, and reports observed transitions to the
/// injected sink.
pub struct Monitor {
    config: MonitorConfig,
    records: Arc<RecordStore>,
    counters: Arc<CounterStore>,
    escalation: EscalationCounter,
    provider: Arc<dyn JobProvider>,
    sink: Arc<dyn ResultSink>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        provider: Arc<dyn JobProvider>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self> {
        let records = Arc::new(RecordStore::open(&config.workdir)?);
        let counters = Arc::new(CounterStore::open(&config.workdir)?);
        let escalation = EscalationCounter::new(counters.clone(), config.escalation.clone());
        Ok(Self {
            config,
            records,
            counters,
            escalation,
            provider,
            sink,
        })
    }

    fn poll_context(&self) -> PollContext {
        PollContext {
            records: self.records.clone(),
            counters: self.counters.clone(),
            escalation: self.escalation.clone(),
            provider: self.provider.clone(),
            sink: self.sink.clone(),
            timeouts: self.config.timeouts.clone(),
            state_check: self.config.state_check_name.clone(),
            undetermined_ceiling: self.config.undetermined_ceiling,
        }
    }

    /// Submit a probe job for `target` unless one is already being
    /// tracked. A stale or terminal leftover record is cleaned up (cancel
    /// and purge are best-effort) before the new submission.
    pub async fn submit(&self, target: &str, service: &str, spec: &JobSpec) -> CheckResult {
        let now = Utc::now().timestamp();
        match self.records.load(target) {
            Err(e) => {
                // corrupt bookkeeping means no trustworthy active job;
                // drop it and submit fresh
                tracing::warn!(target_host = %target, error = %e, "Corrupt job record, resubmitting");
                if let Err(e) = self.records.delete(target) {
                    tracing::error!(target_host = %target, error = %e, "Failed to delete corrupt record");
                }
            }
            Ok(Some(record)) if record.state.is_terminal() => {
                tracing::info!(
                    target_host = %target,
                    state = %record.state,
                    "Previous job finished, cleaning up before resubmission"
                );
                if let Err(e) = self.provider.purge(&record.job_id).await {
                    tracing::warn!(job_id = %record.job_id, error = %e, "Purge request failed");
                }
                if let Err(e) = self.records.delete(target) {
                    tracing::error!(target_host = %target, error = %e, "Failed to delete record");
                }
            }
            Ok(Some(record))
                if record.residency(now).as_secs() >= self.config.timeouts.stale_after_secs =>
            {
                tracing::info!(
                    target_host = %target,
                    job_id = %record.job_id,
                    state = %record.state,
                    "Stale active job, discarding before resubmission"
                );
                if let Err(e) = self.provider.cancel(&record.job_id).await {
                    tracing::warn!(job_id = %record.job_id, error = %e, "Cancel request failed");
                }
                if let Err(e) = self.provider.purge(&record.job_id).await {
                    tracing::warn!(job_id = %record.job_id, error = %e, "Purge request failed");
                }
                if let Err(e) = self.records.delete(target) {
                    tracing::error!(target_host = %target, error = %e, "Failed to delete record");
                }
            }
            Ok(Some(record)) => {
                let since = chrono::DateTime::from_timestamp(record.last_transition_at, 0)
                    .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                    .unwrap_or_default();
                return CheckResult::new(
                    Severity::Ok,
                    format!("Active job - {} [{}]", record.state, since),
                    record.job_id,
                );
            }
            Ok(None) => {}
        }

        match self.provider.submit(target, spec).await {
            Ok(job_id) => {
                let record = JobRecord::submitted(target, service, &job_id, now);
                if let Err(e) = self.records.save(&record) {
                    tracing::error!(target_host = %target, error = %e, "Failed to save job record");
                    return CheckResult::new(
                        Severity::Unknown,
                        "job submitted but bookkeeping failed",
                        format!("{}\n{}", job_id, e),
                    );
                }
                tracing::info!(target_host = %target, job_id = %job_id, "Job submitted");
                CheckResult::new(Severity::Ok, "[Submitted]", job_id)
            }
            Err(e) => CheckResult::new(
                Severity::Unknown,
                "Problem with job submission",
                e.to_string(),
            ),
        }
    }

    /// Cancel the tracked job for `target` and drop its bookkeeping.
    pub async fn cancel(&self, target: &str) -> CheckResult {
        let record = match self.records.load(target) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return CheckResult::new(Severity::Unknown, "no active job found", String::new())
            }
            Err(e) => {
                if let Err(e) = self.records.delete(target) {
                    tracing::error!(target_host = %target, error = %e, "Failed to delete corrupt record");
                }
                return CheckResult::new(
                    Severity::Unknown,
                    "Problems loading active job description",
                    e.to_string(),
                );
            }
        };
        let mut detail = format!("Job cancellation request sent for {}", record.job_id);
        if let Err(e) = self.provider.cancel(&record.job_id).await {
            tracing::warn!(job_id = %record.job_id, error = %e, "Cancel request failed");
            detail.push_str(&format!("\nProblem cancelling job: {}", e));
        }
        if let Err(e) = self.provider.purge(&record.job_id).await {
            tracing::warn!(job_id = %record.job_id, error = %e, "Purge request failed");
            detail.push_str(&format!("\nProblem purging job: {}", e));
        }
        if let Err(e) = self.records.delete(target) {
            tracing::error!(target_host = %target, error = %e, "Failed to delete record");
        }
        if let Err(e) = self.counters.clear(target, poll::UNDETERMINED_GROUP) {
            tracing::warn!(target_host = %target, error = %e, "Failed to clear counter");
        }
        CheckResult::new(Severity::Ok, "job cancelled", detail)
    }

    /// Run one monitor cycle over `targets`, or over every persisted
    /// record when no explicit list is given.
    ///
    /// Unreadable records are skipped and surface as WARNING lines; the
    /// cycle itself always terminates with a status. Takes `&mut self`:
    /// one cycle at a time per monitor.
    pub async fn run_cycle(&mut self, targets: Option<&[String]>) -> CycleReport {
        let targets: Vec<String> = match targets {
            Some(explicit) if !explicit.is_empty() => explicit.to_vec(),
            _ => self.records.targets().unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to list targets");
                Vec::new()
            }),
        };

        let mut records = Vec::new();
        let mut bad_records = Vec::new();
        for target in &targets {
            match self.records.load(target) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target_host = %target, error = %e, "Skipping unreadable job record");
                    bad_records.push(format!("{} - {}", target, e));
                }
            }
        }

        if records.is_empty() {
            return CycleReport::no_active_jobs(bad_records);
        }

        tracing::info!(jobs = records.len(), "Polling active jobs");
        let mut scheduler = PollScheduler::new(self.config.scheduler.clone());
        for record in records {
            let ctx = self.poll_context();
            let target = record.target.clone();
            scheduler.spawn(target, poll::poll_job(ctx, record)).await;
        }
        let outcomes = scheduler.wait().await;
        CycleReport::from_outcomes(outcomes, bad_records)
    }
}
