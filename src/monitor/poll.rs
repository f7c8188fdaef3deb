use std::sync::Arc;

use chrono::Utc;

use crate::config::TimeoutPolicy;
use crate::escalation::{CounterStore, EscalationCounter};
use crate::provider::{JobProvider, ProviderError};
use crate::record::{JobRecord, RecordStore};
use crate::sink::{CheckResult, ResultSink, Severity};
use crate::state::{classify, decide, CanonicalState, Decision, RawStatus};

/// Counter group for consecutive unclassifiable polls.
pub(crate) const UNDETERMINED_GROUP: &str = "undetermined";

/// Everything one poll task needs. Cheap to clone; one clone per task.
#[derive(Clone)]
pub(crate) struct PollContext {
    pub records: Arc<RecordStore>,
    pub counters: Arc<CounterStore>,
    pub escalation: EscalationCounter,
    pub provider: Arc<dyn JobProvider>,
    pub sink: Arc<dyn ResultSink>,
    pub timeouts: TimeoutPolicy,
    pub state_check: String,
    pub undetermined_ceiling: u32,
}

/// Task-local result of polling one job, merged by the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Job observed in a state; finalized if the state is terminal.
    Observed(CanonicalState),
    /// Job discarded by policy (residency timeout, classification ceiling,
    /// or UNKNOWN on sight).
    Discarded(CanonicalState),
    /// The status query itself failed.
    StatusFailed,
    /// Poll task evicted by the scheduler.
    Missed,
}

impl PollOutcome {
    /// Aggregation bucket for the cycle report.
    pub fn bucket(&self) -> String {
        match self {
            PollOutcome::Observed(state) | PollOutcome::Discarded(state) => {
                state.as_token().to_string()
            }
            PollOutcome::StatusFailed => "unknown".to_string(),
            PollOutcome::Missed => "MISSED".to_string(),
        }
    }
}

/// Poll one tracked job: query status, classify, and either keep the record
/// alive, finalize, or discard. All remote cleanup is best-effort; local
/// bookkeeping converges regardless.
pub(crate) async fn poll_job(ctx: PollContext, record: JobRecord) -> PollOutcome {
    let now = Utc::now().timestamp();
    let raw_text = match ctx.provider.status(&record.job_id).await {
        Ok(text) => text,
        Err(ProviderError::NotFound(_)) => return vanished(&ctx, &record).await,
        Err(e) => return status_failed(&ctx, &record, now, e),
    };

    let state = classify(&RawStatus::parse(&raw_text));
    tracing::debug!(target_host = %record.target, job_id = %record.job_id, %state, "Classified job status");

    if state != CanonicalState::Undetermined {
        clear_counter(&ctx, &record.target, UNDETERMINED_GROUP);
    }

    if state.is_terminal() {
        return finalize(&ctx, &record, state, &raw_text).await;
    }

    match state {
        CanonicalState::Unknown => {
            // the provider itself reports no usable state; force cleanup now
            discard(
                &ctx,
                &record,
                state,
                Severity::Unknown,
                "job is in UNKNOWN state".to_string(),
                String::new(),
            )
            .await;
            PollOutcome::Discarded(state)
        }
        CanonicalState::Undetermined => undetermined(&ctx, &record, now, &raw_text).await,
        _ => non_terminal(&ctx, record, state, now, &raw_text).await,
    }
}

/// Still-alive job: apply the residency policy, then either discard or
/// record the transition.
async fn non_terminal(
    ctx: &PollContext,
    mut record: JobRecord,
    state: CanonicalState,
    now: i64,
    raw_text: &str,
) -> PollOutcome {
    let elapsed = record.residency(now);
    if decide(state, elapsed, &ctx.timeouts) == Decision::Discard {
        let limit = ctx
            .timeouts
            .max_residency(state)
            .unwrap_or_default()
            .as_secs();
        let severity = ctx.timeouts.discard_severity(state);
        let summary = format!(
            "[{}->Cancelled [timeout/dropped]] {} min timeout for [{}] exceeded",
            state,
            limit / 60,
            state
        );
        discard(ctx, &record, state, severity, summary, raw_text.to_string()).await;
        return PollOutcome::Discarded(state);
    }

    if state != record.state {
        record.state = state;
        record.last_transition_at = now;
        if let Err(e) = ctx.records.save(&record) {
            tracing::error!(target_host = %record.target, error = %e, "Failed to persist job transition");
        }
        publish_state(
            ctx,
            &record.target,
            CheckResult::new(
                Severity::Ok,
                format!("[{}] {}", state, record.job_id),
                raw_text.to_string(),
            ),
        );
    }
    PollOutcome::Observed(state)
}

/// Terminal state observed: fetch what there is to fetch, purge, report to
/// both the state check and the submit service, and drop the record.
async fn finalize(
    ctx: &PollContext,
    record: &JobRecord,
    state: CanonicalState,
    raw_text: &str,
) -> PollOutcome {
    let mut detail = raw_text.to_string();
    let (base_severity, summary) = match state {
        CanonicalState::DoneOk => {
            match ctx.provider.fetch_output(&record.job_id).await {
                Ok(output) => {
                    detail.push_str("\nJob output:\n");
                    detail.push_str(&output);
                }
                Err(e) => {
                    tracing::warn!(target_host = %record.target, error = %e, "Failed to fetch job output");
                    detail.push_str(&format!("\nFailed to fetch job output: {}", e));
                }
            }
            (
                Severity::Ok,
                format!("[DONE-OK] {}", record.job_id),
            )
        }
        CanonicalState::DoneFailed => {
            match ctx.provider.fetch_output(&record.job_id).await {
                Ok(output) => {
                    detail.push_str("\nJob output:\n");
                    detail.push_str(&output);
                }
                Err(e) => {
                    detail.push_str(&format!("\nFailed to fetch job output: {}", e));
                }
            }
            append_logging_info(ctx, record, &mut detail).await;
            (
                Severity::Critical,
                format!("[DONE-FAILED] job executed with errors {}", record.job_id),
            )
        }
        CanonicalState::Aborted => {
            append_logging_info(ctx, record, &mut detail).await;
            (
                Severity::Critical,
                format!("[ABORTED] job was aborted {}", record.job_id),
            )
        }
        CanonicalState::Cancelled => (
            Severity::Unknown,
            format!(
                "[CANCELLED] job was cancelled outside the monitor {}",
                record.job_id
            ),
        ),
        _ => unreachable!("finalize is only called for terminal states"),
    };

    // Cancelled/Aborted still get a cancel request first to force remote
    // cleanup; Done jobs only need the purge.
    let with_cancel = matches!(
        state,
        CanonicalState::Aborted | CanonicalState::Cancelled
    );
    remote_cleanup(ctx, &record.job_id, with_cancel, &mut detail).await;
    delete_record(ctx, &record.target);
    clear_counter(ctx, &record.target, UNDETERMINED_GROUP);

    let (severity, note) = ctx.escalation.apply(&record.target, state, base_severity);
    let summary = match note {
        Some(note) => format!("{} {}", note, summary),
        None => summary,
    };
    publish_both(ctx, record, CheckResult::new(severity, summary, detail));
    PollOutcome::Observed(state)
}

/// Unclassifiable status text: retry next cycle up to the global ceiling,
/// then discard as UNKNOWN.
async fn undetermined(
    ctx: &PollContext,
    record: &JobRecord,
    now: i64,
    raw_text: &str,
) -> PollOutcome {
    let count = match ctx
        .counters
        .observe(&record.target, UNDETERMINED_GROUP, Severity::Warning)
    {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(target_host = %record.target, error = %e, "Failed to count undetermined poll");
            1
        }
    };
    let timed_out = decide(
        CanonicalState::Undetermined,
        record.residency(now),
        &ctx.timeouts,
    ) == Decision::Discard;
    if count >= ctx.undetermined_ceiling || timed_out {
        let summary = if timed_out {
            format!(
                "[UNDETERMINED->Cancelled [timeout/dropped]] {} min timeout exceeded",
                ctx.timeouts.undetermined_secs / 60
            )
        } else {
            format!(
                "unable to determine job status after {} attempts, job discarded",
                count
            )
        };
        discard(
            ctx,
            record,
            CanonicalState::Undetermined,
            Severity::Unknown,
            summary,
            raw_text.to_string(),
        )
        .await;
        return PollOutcome::Discarded(CanonicalState::Undetermined);
    }

    if record.state != CanonicalState::Undetermined {
        let mut updated = record.clone();
        updated.state = CanonicalState::Undetermined;
        updated.last_transition_at = now;
        if let Err(e) = ctx.records.save(&updated) {
            tracing::error!(target_host = %record.target, error = %e, "Failed to persist job transition");
        }
        publish_state(
            ctx,
            &record.target,
            CheckResult::new(
                Severity::Warning,
                format!(
                    "unable to determine job status ({}/{}) {}",
                    count, ctx.undetermined_ceiling, record.job_id
                ),
                raw_text.to_string(),
            ),
        );
    }
    PollOutcome::Observed(CanonicalState::Undetermined)
}

/// The remote side no longer knows the job: nothing left to track.
async fn vanished(ctx: &PollContext, record: &JobRecord) -> PollOutcome {
    tracing::warn!(target_host = %record.target, job_id = %record.job_id, "No such job on the remote system");
    delete_record(ctx, &record.target);
    clear_counter(ctx, &record.target, UNDETERMINED_GROUP);
    publish_state(
        ctx,
        &record.target,
        CheckResult::new(
            Severity::Unknown,
            format!("no such job on the remote system {}", record.job_id),
            String::new(),
        ),
    );
    PollOutcome::StatusFailed
}

/// Status query failed: keep the record for the next cycle unless the job
/// is past the give-up ceiling.
fn status_failed(
    ctx: &PollContext,
    record: &JobRecord,
    now: i64,
    error: ProviderError,
) -> PollOutcome {
    tracing::warn!(target_host = %record.target, job_id = %record.job_id, error = %error, "Failed to get job status");
    let age = record.age(now);
    let ceiling = std::time::Duration::from_secs(ctx.timeouts.discard_after_secs);
    if age >= ceiling {
        delete_record(ctx, &record.target);
        clear_counter(ctx, &record.target, UNDETERMINED_GROUP);
        publish_state(
            ctx,
            &record.target,
            CheckResult::new(
                Severity::Warning,
                "unable to get job status. Job discarded".to_string(),
                error.to_string(),
            ),
        );
        ctx.sink.publish(
            &record.target,
            &record.service,
            &CheckResult::new(
                Severity::Unknown,
                "unable to get job status. Job discarded".to_string(),
                error.to_string(),
            ),
        );
    } else {
        let left = (ceiling - age).as_secs() / 60;
        publish_state(
            ctx,
            &record.target,
            CheckResult::new(
                Severity::Warning,
                format!(
                    "unable to get job status. Job will be discarded in {} min",
                    left
                ),
                error.to_string(),
            ),
        );
    }
    PollOutcome::StatusFailed
}

/// Forced cleanup: cancel, purge, delete the record, report. Every remote
/// step may fail without blocking the next one.
async fn discard(
    ctx: &PollContext,
    record: &JobRecord,
    state: CanonicalState,
    base_severity: Severity,
    summary: String,
    mut detail: String,
) {
    if let Ok(info) = ctx.provider.logging_info(&record.job_id).await {
        detail.push_str("\nJob logging info:\n");
        detail.push_str(&info);
    }
    remote_cleanup(ctx, &record.job_id, true, &mut detail).await;
    delete_record(ctx, &record.target);
    clear_counter(ctx, &record.target, UNDETERMINED_GROUP);

    let (severity, note) = ctx.escalation.apply(&record.target, state, base_severity);
    let summary = match note {
        Some(note) => format!("{} {}", note, summary),
        None => summary,
    };
    tracing::info!(
        target_host = %record.target,
        job_id = %record.job_id,
        %state,
        %severity,
        "Discarding job"
    );
    publish_both(ctx, record, CheckResult::new(severity, summary, detail));
}

/// Cancel (optionally) then purge. Failures are appended to the report
/// detail and logged; they never stop the sequence.
async fn remote_cleanup(ctx: &PollContext, job_id: &str, with_cancel: bool, detail: &mut String) {
    if with_cancel {
        if let Err(e) = ctx.provider.cancel(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Cancel request failed");
            detail.push_str(&format!("\nProblem cancelling job: {}", e));
        }
    }
    if let Err(e) = ctx.provider.purge(job_id).await {
        tracing::warn!(job_id = %job_id, error = %e, "Purge request failed");
        detail.push_str(&format!("\nProblem purging job: {}", e));
    }
}

async fn append_logging_info(ctx: &PollContext, record: &JobRecord, detail: &mut String) {
    match ctx.provider.logging_info(&record.job_id).await {
        Ok(info) => {
            detail.push_str("\nJob logging info:\n");
            detail.push_str(&info);
        }
        Err(e) => detail.push_str(&format!("\nFailed to get job logging info: {}", e)),
    }
}

fn delete_record(ctx: &PollContext, target: &str) {
    if let Err(e) = ctx.records.delete(target) {
        tracing::error!(target_host = %target, error = %e, "Failed to delete job record");
    }
}

fn clear_counter(ctx: &PollContext, target: &str, group: &str) {
    if let Err(e) = ctx.counters.clear(target, group) {
        tracing::warn!(target_host = %target, error = %e, "Failed to clear counter");
    }
}

fn publish_state(ctx: &PollContext, target: &str, result: CheckResult) {
    ctx.sink.publish(target, &ctx.state_check, &result);
}

fn publish_both(ctx: &PollContext, record: &JobRecord, result: CheckResult) {
    ctx.sink.publish(&record.target, &ctx.state_check, &result);
    ctx.sink.publish(&record.target, &record.service, &result);
}
