use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TimeoutPolicy;

/// Canonical lifecycle state of a tracked job, independent of the
/// provider-specific raw status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalState {
    Registered,
    Queued,
    Scheduled,
    Running,
    DoneOk,
    DoneFailed,
    Aborted,
    Cancelled,
    Unknown,
    Undetermined,
}

impl CanonicalState {
    /// Terminal states finalize on first observation; the rest keep the
    /// record alive.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalState::DoneOk
                | CanonicalState::DoneFailed
                | CanonicalState::Aborted
                | CanonicalState::Cancelled
        )
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            CanonicalState::Registered => "REGISTERED",
            CanonicalState::Queued => "QUEUED",
            CanonicalState::Scheduled => "SCHEDULED",
            CanonicalState::Running => "RUNNING",
            CanonicalState::DoneOk => "DONE-OK",
            CanonicalState::DoneFailed => "DONE-FAILED",
            CanonicalState::Aborted => "ABORTED",
            CanonicalState::Cancelled => "CANCELLED",
            CanonicalState::Unknown => "UNKNOWN",
            CanonicalState::Undetermined => "UNDETERMINED",
        }
    }

    /// Lenient token parse. Unrecognized tokens map to `Undetermined`, so
    /// a record written with a newer state vocabulary still loads.
    pub fn from_token(token: &str) -> CanonicalState {
        match token.trim().to_ascii_uppercase().as_str() {
            "REGISTERED" => CanonicalState::Registered,
            "QUEUED" => CanonicalState::Queued,
            "SCHEDULED" => CanonicalState::Scheduled,
            "RUNNING" => CanonicalState::Running,
            "DONE-OK" => CanonicalState::DoneOk,
            "DONE-FAILED" => CanonicalState::DoneFailed,
            "ABORTED" => CanonicalState::Aborted,
            "CANCELLED" => CanonicalState::Cancelled,
            "UNKNOWN" => CanonicalState::Unknown,
            _ => CanonicalState::Undetermined,
        }
    }
}

impl std::fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_token())
    }
}

/// Status fields extracted from the provider's raw status text.
///
/// The expected shape is the bracketed stanza format, e.g.:
///
/// ```text
/// ******  JobID=[https://ce.example.org:8443/CREAM123]
///         Status        = [DONE-OK]
///         ExitCode      = [0]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawStatus {
    pub state: Option<String>,
    pub exit_code: Option<i32>,
}

impl RawStatus {
    pub fn parse(text: &str) -> RawStatus {
        RawStatus {
            state: bracket_field(text, "Status"),
            exit_code: bracket_field(text, "ExitCode").and_then(|v| v.trim().parse().ok()),
        }
    }
}

/// Find `<key> = [value]` in `text` and return `value`. The first matching
/// line wins.
fn bracket_field(text: &str, key: &str) -> Option<String> {
    for line in text.lines() {
        let line = line.trim_start();
        let Some(rest) = line.strip_prefix(key) else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let rest = rest.trim();
        if let Some(open) = rest.find('[') {
            if let Some(close) = rest.rfind(']') {
                if close > open {
                    return Some(rest[open + 1..close].to_string());
                }
            }
        }
    }
    None
}

/// Map a raw status to its canonical state.
///
/// The `DONE` family is disambiguated through the embedded exit code when
/// present; a missing exit code takes the failure branch. Unparseable input
/// yields `Undetermined` rather than an error.
pub fn classify(raw: &RawStatus) -> CanonicalState {
    let Some(state) = raw.state.as_deref() else {
        return CanonicalState::Undetermined;
    };
    match state.trim().to_ascii_uppercase().as_str() {
        "REGISTERED" => CanonicalState::Registered,
        "PENDING" | "QUEUED" | "IDLE" => CanonicalState::Queued,
        "SCHEDULED" | "HELD" => CanonicalState::Scheduled,
        "RUNNING" | "REALLY-RUNNING" => CanonicalState::Running,
        "DONE-FAILED" => CanonicalState::DoneFailed,
        "DONE-OK" | "DONE" => match raw.exit_code {
            Some(0) => CanonicalState::DoneOk,
            _ => CanonicalState::DoneFailed,
        },
        "ABORTED" => CanonicalState::Aborted,
        "CANCELLED" => CanonicalState::Cancelled,
        "UNKNOWN" => CanonicalState::Unknown,
        _ => CanonicalState::Undetermined,
    }
}

/// What to do with a non-terminal job after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Discard,
}

/// Timeout decision for a non-terminal state. Terminal states never reach
/// here; the poller finalizes them before consulting the policy.
pub fn decide(state: CanonicalState, elapsed: Duration, policy: &TimeoutPolicy) -> Decision {
    match policy.max_residency(state) {
        Some(limit) if elapsed > limit => Decision::Discard,
        _ => Decision::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(state: &str, exit_code: Option<i32>) -> RawStatus {
        RawStatus {
            state: Some(state.to_string()),
            exit_code,
        }
    }

    #[test]
    fn terminal_partition() {
        for state in [
            CanonicalState::DoneOk,
            CanonicalState::DoneFailed,
            CanonicalState::Aborted,
            CanonicalState::Cancelled,
        ] {
            assert!(state.is_terminal());
        }
        for state in [
            CanonicalState::Registered,
            CanonicalState::Queued,
            CanonicalState::Scheduled,
            CanonicalState::Running,
            CanonicalState::Unknown,
            CanonicalState::Undetermined,
        ] {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn tokens_round_trip() {
        for state in [
            CanonicalState::Registered,
            CanonicalState::Queued,
            CanonicalState::Scheduled,
            CanonicalState::Running,
            CanonicalState::DoneOk,
            CanonicalState::DoneFailed,
            CanonicalState::Aborted,
            CanonicalState::Cancelled,
            CanonicalState::Unknown,
        ] {
            assert_eq!(CanonicalState::from_token(state.as_token()), state);
        }
        assert_eq!(
            CanonicalState::from_token("SOMETHING-NEW"),
            CanonicalState::Undetermined
        );
    }

    #[test]
    fn parses_status_stanza() {
        let text = "******  JobID=[https://ce1.example.org:8443/CREAM123]\n\
                    \tStatus        = [DONE-OK]\n\
                    \tExitCode      = [0]\n";
        let raw = RawStatus::parse(text);
        assert_eq!(raw.state.as_deref(), Some("DONE-OK"));
        assert_eq!(raw.exit_code, Some(0));
    }

    #[test]
    fn missing_status_stanza_is_undetermined() {
        let raw = RawStatus::parse("some noise the tool printed\n");
        assert_eq!(raw.state, None);
        assert_eq!(classify(&raw), CanonicalState::Undetermined);
    }

    #[test]
    fn classifies_non_terminal_states() {
        assert_eq!(classify(&raw("REGISTERED", None)), CanonicalState::Registered);
        assert_eq!(classify(&raw("PENDING", None)), CanonicalState::Queued);
        assert_eq!(classify(&raw("IDLE", None)), CanonicalState::Queued);
        assert_eq!(classify(&raw("HELD", None)), CanonicalState::Scheduled);
        assert_eq!(classify(&raw("RUNNING", None)), CanonicalState::Running);
        assert_eq!(
            classify(&raw("REALLY-RUNNING", None)),
            CanonicalState::Running
        );
        assert_eq!(classify(&raw("UNKNOWN", None)), CanonicalState::Unknown);
        assert_eq!(classify(&raw("WOBBLING", None)), CanonicalState::Undetermined);
    }

    #[test]
    fn done_disambiguates_through_exit_code() {
        assert_eq!(classify(&raw("DONE-OK", Some(0))), CanonicalState::DoneOk);
        assert_eq!(classify(&raw("DONE", Some(0))), CanonicalState::DoneOk);
        assert_eq!(classify(&raw("DONE-OK", Some(2))), CanonicalState::DoneFailed);
        assert_eq!(classify(&raw("DONE", Some(127))), CanonicalState::DoneFailed);
        assert_eq!(classify(&raw("DONE-FAILED", Some(0))), CanonicalState::DoneFailed);
        // fail-safe: no exit code means the failure branch
        assert_eq!(classify(&raw("DONE-OK", None)), CanonicalState::DoneFailed);
        assert_eq!(classify(&raw("DONE", None)), CanonicalState::DoneFailed);
    }

    #[test]
    fn decide_discards_past_residency_limit() {
        let policy = TimeoutPolicy::default();
        assert_eq!(
            decide(
                CanonicalState::Running,
                Duration::from_secs(4000),
                &policy
            ),
            Decision::Discard
        );
        assert_eq!(
            decide(CanonicalState::Running, Duration::from_secs(10), &policy),
            Decision::Continue
        );
        // exactly at the limit is still within residency
        assert_eq!(
            decide(
                CanonicalState::Running,
                Duration::from_secs(policy.running_secs),
                &policy
            ),
            Decision::Continue
        );
    }
}
