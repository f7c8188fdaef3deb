use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::EscalationRule;
use crate::error::Result;
use crate::sink::Severity;
use crate::state::CanonicalState;

/// Persisted consecutive-occurrence counters, one file per
/// (target, group) beside the job record: `<root>/<target>/counter_<group>`
/// holding `SEVERITY|count`.
///
/// Counter I/O is serialized by one lock; it is local and cheap and never
/// contends with the remote calls it decorates.
#[derive(Debug)]
pub struct CounterStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl CounterStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn counter_path(&self, target: &str, group: &str) -> PathBuf {
        self.root.join(target).join(format!("counter_{}", group))
    }

    /// Record one observation. The count advances while the severity
    /// matches the stored trigger severity; a different severity (or no
    /// prior counter) restarts the count at 1 with the new trigger.
    pub fn observe(&self, target: &str, group: &str, severity: Severity) -> Result<u32> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.counter_path(target, group);
        let count = match fs::read_to_string(&path) {
            Ok(text) => match parse_counter(&text) {
                Some((trigger, count)) if trigger == severity => count + 1,
                _ => 1,
            },
            Err(_) => 1,
        };
        fs::create_dir_all(path.parent().expect("counter path has a parent"))?;
        fs::write(&path, format!("{}|{}", severity, count))?;
        Ok(count)
    }

    /// Reset the counter for (target, group).
    pub fn clear(&self, target: &str, group: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.counter_path(target, group)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Current (trigger severity, count), if any. Test and diagnostic use.
    pub fn peek(&self, target: &str, group: &str) -> Option<(Severity, u32)> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::read_to_string(self.counter_path(target, group))
            .ok()
            .and_then(|text| parse_counter(&text))
    }
}

fn parse_counter(text: &str) -> Option<(Severity, u32)> {
    let (sev, count) = text.trim().split_once('|')?;
    Some((sev.parse().ok()?, count.parse().ok()?))
}

/// Applies an `EscalationRule` to report events, suppressing single-poll
/// flapping: the reported severity is upgraded only once `threshold`
/// consecutive same-severity observations of an in-group state have
/// accumulated for the target.
#[derive(Debug, Clone)]
pub struct EscalationCounter {
    store: Arc<CounterStore>,
    rule: EscalationRule,
}

impl EscalationCounter {
    pub fn new(store: Arc<CounterStore>, rule: EscalationRule) -> Self {
        Self { store, rule }
    }

    /// Fold the rule into a report for `state`. Returns the (possibly
    /// escalated) severity and a `[count/threshold]` annotation when the
    /// counter is live. States outside the rule's group reset the counter.
    ///
    /// Counter I/O failures degrade to the base severity; they never fail
    /// the report.
    pub fn apply(
        &self,
        target: &str,
        state: CanonicalState,
        severity: Severity,
    ) -> (Severity, Option<String>) {
        if !self.rule.states.contains(&state) {
            if let Err(e) = self.store.clear(target, &self.rule.group) {
                tracing::warn!(target_host = %target, error = %e, "Failed to reset escalation counter");
            }
            return (severity, None);
        }
        let count = match self.store.observe(target, &self.rule.group, severity) {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(target_host = %target, error = %e, "Failed to advance escalation counter");
                return (severity, None);
            }
        };
        if count >= self.rule.threshold {
            let escalated = severity.next_worse();
            if escalated != severity {
                tracing::info!(
                    target_host = %target,
                    group = %self.rule.group,
                    count,
                    from = %severity,
                    to = %escalated,
                    "Escalating severity after consecutive occurrences"
                );
            }
            let note = format!(
                "[{}{}/{}]",
                count,
                severity.to_string().chars().next().unwrap_or('?'),
                self.rule.threshold
            );
            (escalated, Some(note))
        } else {
            (severity, Some(format!("[{}/{}]", count, self.rule.threshold)))
        }
    }
}
