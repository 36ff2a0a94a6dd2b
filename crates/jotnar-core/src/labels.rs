//! Closed vocabulary of externally visible tracker labels (spec §4.8 / C8).
//!
//! Grounded in `common/constants.py::JiraLabels` from the original
//! implementation: every variant here serializes to the `jotnar_`-prefixed
//! string the tracker actually carries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateLabel {
    RebaseInProgress,
    BackportInProgress,
    NeedsAttention,
    NoActionNeeded,
    Rebased,
    Backported,
    RebaseErrored,
    BackportErrored,
    TriageErrored,
    RebaseFailed,
    BackportFailed,
    RetryNeeded,
}

impl StateLabel {
    pub const ALL: [StateLabel; 12] = [
        StateLabel::RebaseInProgress,
        StateLabel::BackportInProgress,
        StateLabel::NeedsAttention,
        StateLabel::NoActionNeeded,
        StateLabel::Rebased,
        StateLabel::Backported,
        StateLabel::RebaseErrored,
        StateLabel::BackportErrored,
        StateLabel::TriageErrored,
        StateLabel::RebaseFailed,
        StateLabel::BackportFailed,
        StateLabel::RetryNeeded,
    ];

    /// Wire string exactly as carried on tracker issues, e.g. `jotnar_rebased`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RebaseInProgress => "jotnar_rebase_in_progress",
            Self::BackportInProgress => "jotnar_backport_in_progress",
            Self::NeedsAttention => "jotnar_needs_attention",
            Self::NoActionNeeded => "jotnar_no_action_needed",
            Self::Rebased => "jotnar_rebased",
            Self::Backported => "jotnar_backported",
            Self::RebaseErrored => "jotnar_rebase_errored",
            Self::BackportErrored => "jotnar_backport_errored",
            Self::TriageErrored => "jotnar_triage_errored",
            Self::RebaseFailed => "jotnar_rebase_failed",
            Self::BackportFailed => "jotnar_backport_failed",
            Self::RetryNeeded => "jotnar_retry_needed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == s)
    }

    /// Any label carrying the `jotnar_` prefix, recognized or not, used by
    /// ingestion dedup (spec §4.5) which only cares whether *some* Jötnar
    /// label is present, not which one.
    pub fn is_jotnar_label(s: &str) -> bool {
        s.starts_with("jotnar_")
    }

    /// All label strings, for the blanket "remove every Jötnar label" call
    /// that precedes every terminal/in-progress transition (spec §4.6).
    pub fn all_strings() -> Vec<&'static str> {
        Self::ALL.iter().map(StateLabel::as_str).collect()
    }
}

impl std::fmt::Display for StateLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_are_jotnar_prefixed() {
        for label in StateLabel::ALL {
            assert!(label.as_str().starts_with("jotnar_"));
            assert!(StateLabel::is_jotnar_label(label.as_str()));
        }
    }

    #[test]
    fn round_trips_through_str() {
        for label in StateLabel::ALL {
            assert_eq!(StateLabel::from_str(label.as_str()), Some(label));
        }
        assert_eq!(StateLabel::from_str("not_a_label"), None);
    }
}
