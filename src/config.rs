use std::path::PathBuf;
use std::time::Duration;

use crate::sink::Severity;
use crate::state::CanonicalState;

/// Per-state residency limits for tracked jobs.
///
/// A job observed in a non-terminal state for longer than the state's limit
/// is discarded: cancelled and purged remotely, deleted locally. Terminal
/// states have no limit; `UNKNOWN` has a zero limit and is discarded on
/// sight.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    /// Registered but not yet started.
    pub registered_secs: u64,
    /// Queued/idle in the remote batch system.
    pub queued_secs: u64,
    /// Scheduled or held.
    pub scheduled_secs: u64,
    /// Running (wrapper or payload).
    pub running_secs: u64,
    /// Unclassifiable status text.
    pub undetermined_secs: u64,
    /// A non-terminal job whose record has not transitioned for this long
    /// is discarded before a new submission replaces it.
    pub stale_after_secs: u64,
    /// Give-up ceiling when the status query itself keeps failing,
    /// measured from submission.
    pub discard_after_secs: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            registered_secs: 120,
            queued_secs: 2700,
            scheduled_secs: 3000,
            running_secs: 3300,
            undetermined_secs: 3600,
            stale_after_secs: 3600,
            discard_after_secs: 21600,
        }
    }
}

impl TimeoutPolicy {
    /// Maximum residency for a state, or None for terminal states.
    pub fn max_residency(&self, state: CanonicalState) -> Option<Duration> {
        let secs = match state {
            CanonicalState::Registered => self.registered_secs,
            CanonicalState::Queued => self.queued_secs,
            CanonicalState::Scheduled => self.scheduled_secs,
            CanonicalState::Running => self.running_secs,
            CanonicalState::Undetermined => self.undetermined_secs,
            CanonicalState::Unknown => 0,
            _ => return None,
        };
        Some(Duration::from_secs(secs))
    }

    /// Base severity reported when a state's residency limit forces a
    /// discard. Queued and Scheduled start at WARNING and rely on the
    /// escalation counter to reach CRITICAL on repetition.
    pub fn discard_severity(&self, state: CanonicalState) -> Severity {
        match state {
            CanonicalState::Registered => Severity::Critical,
            CanonicalState::Queued => Severity::Warning,
            CanonicalState::Scheduled => Severity::Warning,
            CanonicalState::Running => Severity::Critical,
            CanonicalState::Unknown | CanonicalState::Undetermined => Severity::Unknown,
            _ => Severity::Critical,
        }
    }
}

/// Poll scheduler limits.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently admitted poll tasks.
    pub max_concurrent: usize,
    /// Wall-clock deadline per task; past it the task is reaped.
    pub task_timeout: Duration,
    /// Reaper scan interval.
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            task_timeout: Duration::from_secs(300),
            tick: Duration::from_secs(1),
        }
    }
}

/// Severity escalation on consecutive adverse observations.
///
/// When a report event fires for a job last seen in one of `states`, a
/// persisted counter for (target, `group`) advances; reaching `threshold`
/// consecutive observations with an unchanged severity escalates the
/// reported severity one level. Any report event outside `states` resets
/// the counter.
#[derive(Debug, Clone)]
pub struct EscalationRule {
    pub states: Vec<CanonicalState>,
    pub group: String,
    pub threshold: u32,
}

impl Default for EscalationRule {
    fn default() -> Self {
        Self {
            states: vec![CanonicalState::Scheduled, CanonicalState::Running],
            group: "sched-run".to_string(),
            threshold: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Root of the per-target bookkeeping tree.
    pub workdir: PathBuf,
    /// Check name for state-transition reports.
    pub state_check_name: String,
    pub timeouts: TimeoutPolicy,
    pub scheduler: SchedulerConfig,
    pub escalation: EscalationRule,
    /// Consecutive unclassifiable polls before a job is discarded as
    /// UNKNOWN.
    pub undetermined_ceiling: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/var/lib/jobsentry"),
            state_check_name: "JobState".to_string(),
            timeouts: TimeoutPolicy::default(),
            scheduler: SchedulerConfig::default(),
            escalation: EscalationRule::default(),
            undetermined_ceiling: 3,
        }
    }
}

impl MonitorConfig {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Default::default()
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_policy_defaults() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.registered_secs, 120);
        assert_eq!(policy.running_secs, 3300);
        assert_eq!(policy.discard_after_secs, 21600);
    }

    #[test]
    fn terminal_states_have_no_residency_limit() {
        let policy = TimeoutPolicy::default();
        assert!(policy.max_residency(CanonicalState::DoneOk).is_none());
        assert!(policy.max_residency(CanonicalState::Aborted).is_none());
        assert_eq!(
            policy.max_residency(CanonicalState::Unknown),
            Some(Duration::ZERO)
        );
        assert_eq!(
            policy.max_residency(CanonicalState::Running),
            Some(Duration::from_secs(3300))
        );
    }

    #[test]
    fn discard_severities() {
        let policy = TimeoutPolicy::default();
        assert_eq!(
            policy.discard_severity(CanonicalState::Registered),
            Severity::Critical
        );
        assert_eq!(
            policy.discard_severity(CanonicalState::Queued),
            Severity::Warning
        );
        assert_eq!(
            policy.discard_severity(CanonicalState::Running),
            Severity::Critical
        );
        assert_eq!(
            policy.discard_severity(CanonicalState::Undetermined),
            Severity::Unknown
        );
    }

    #[test]
    fn scheduler_config_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.max_concurrent, 10);
        assert_eq!(cfg.task_timeout, Duration::from_secs(300));
        assert_eq!(cfg.tick, Duration::from_secs(1));
    }

    #[test]
    fn escalation_rule_default_covers_sched_run() {
        let rule = EscalationRule::default();
        assert!(rule.states.contains(&CanonicalState::Scheduled));
        assert!(rule.states.contains(&CanonicalState::Running));
        assert_eq!(rule.threshold, 2);
    }

    #[test]
    fn monitor_config_builder() {
        let cfg = MonitorConfig::new("/tmp/js").with_scheduler(SchedulerConfig {
            max_concurrent: 3,
            ..Default::default()
        });
        assert_eq!(cfg.workdir, PathBuf::from("/tmp/js"));
        assert_eq!(cfg.scheduler.max_concurrent, 3);
        assert_eq!(cfg.undetermined_ceiling, 3);
    }
}
