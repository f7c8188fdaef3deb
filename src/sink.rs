use serde::{Deserialize, Serialize};

/// Check severity, ordered by the usual monitoring exit-code convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Severity {
    /// Numeric exit code for the CLI (0/1/2/3).
    pub fn exit_code(&self) -> i32 {
        match self {
            Severity::Ok => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
            Severity::Unknown => 3,
        }
    }

    /// The next-worse actionable level. Critical saturates; Unknown stays
    /// Unknown (it is "no data", not "worse than critical").
    pub fn next_worse(&self) -> Severity {
        match self {
            Severity::Ok => Severity::Warning,
            Severity::Warning => Severity::Critical,
            Severity::Critical => Severity::Critical,
            Severity::Unknown => Severity::Unknown,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Ok => write!(f, "OK"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Severity::Ok),
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            "UNKNOWN" => Ok(Severity::Unknown),
            other => Err(format!("unrecognized severity: {}", other)),
        }
    }
}

/// Outcome of one check: severity plus a one-line summary and a
/// multi-line detail block.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
}

impl CheckResult {
    pub fn new(
        severity: Severity,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: detail.into(),
        }
    }
}

/// Destination for per-target check results.
///
/// The monitor calls `publish` at most once per observed state transition
/// per cycle. Delivery beyond this process (queueing, broker failover) is
/// the implementor's concern; implementations are expected to be cheap and
/// non-blocking since they are called from poll tasks.
pub trait ResultSink: Send + Sync {
    fn publish(&self, target: &str, check_name: &str, result: &CheckResult);
}

/// Sink that emits results through `tracing`. Useful as a default and for
/// running the monitor without a passive-check transport.
#[derive(Debug, Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn publish(&self, target: &str, check_name: &str, result: &CheckResult) {
        tracing::info!(
            target_host = %target,
            check = %check_name,
            severity = %result.severity,
            summary = %result.summary,
            "Check result"
        );
        tracing::debug!(target_host = %target, check = %check_name, detail = %result.detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_exit_codes() {
        assert_eq!(Severity::Ok.exit_code(), 0);
        assert_eq!(Severity::Warning.exit_code(), 1);
        assert_eq!(Severity::Critical.exit_code(), 2);
        assert_eq!(Severity::Unknown.exit_code(), 3);
    }

    #[test]
    fn severity_escalation_saturates() {
        assert_eq!(Severity::Ok.next_worse(), Severity::Warning);
        assert_eq!(Severity::Warning.next_worse(), Severity::Critical);
        assert_eq!(Severity::Critical.next_worse(), Severity::Critical);
        assert_eq!(Severity::Unknown.next_worse(), Severity::Unknown);
    }

    #[test]
    fn severity_round_trips_through_display() {
        for sev in [
            Severity::Ok,
            Severity::Warning,
            Severity::Critical,
            Severity::Unknown,
        ] {
            assert_eq!(sev.to_string().parse::<Severity>().unwrap(), sev);
        }
    }
}
