//! Closed vocabulary of logical queue names (spec §4.4 / C4).
//!
//! Grounded in `common/constants.py::RedisQueues`: the c9s/c10s container
//! split for rebase/backport, the two legacy unsplit aliases that must
//! remain drainable, and the `input_queues()`/`data_queues()` partition
//! used by ingestion's existing-key scan (spec §4.5).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    TriageQueue,
    RebaseQueueC9s,
    RebaseQueueC10s,
    BackportQueueC9s,
    BackportQueueC10s,
    ClarificationNeededQueue,
    ErrorList,
    NoActionList,
    CompletedRebaseList,
    CompletedBackportList,
    /// Legacy unsplit rebase queue. No longer written to, but ingestion's
    /// dedup scan and the admin drain tooling must still read it.
    RebaseQueue,
    /// Legacy unsplit backport queue. Same caveat as `RebaseQueue`.
    BackportQueue,
}

impl QueueName {
    pub const ALL: [QueueName; 12] = [
        QueueName::TriageQueue,
        QueueName::RebaseQueueC9s,
        QueueName::RebaseQueueC10s,
        QueueName::BackportQueueC9s,
        QueueName::BackportQueueC10s,
        QueueName::ClarificationNeededQueue,
        QueueName::ErrorList,
        QueueName::NoActionList,
        QueueName::CompletedRebaseList,
        QueueName::CompletedBackportList,
        QueueName::RebaseQueue,
        QueueName::BackportQueue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriageQueue => "triage_queue",
            Self::RebaseQueueC9s => "rebase_queue_c9s",
            Self::RebaseQueueC10s => "rebase_queue_c10s",
            Self::BackportQueueC9s => "backport_queue_c9s",
            Self::BackportQueueC10s => "backport_queue_c10s",
            Self::ClarificationNeededQueue => "clarification_needed_queue",
            Self::ErrorList => "error_list",
            Self::NoActionList => "no_action_list",
            Self::CompletedRebaseList => "completed_rebase_list",
            Self::CompletedBackportList => "completed_backport_list",
            Self::RebaseQueue => "rebase_queue",
            Self::BackportQueue => "backport_queue",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.as_str() == s)
    }

    /// Queues that hold `Task` objects with opaque agent-defined metadata
    /// (spec §4.5 "existing-key scan"), as opposed to typed schema objects.
    pub fn input_queues() -> [QueueName; 8] {
        [
            Self::TriageQueue,
            Self::RebaseQueueC9s,
            Self::RebaseQueueC10s,
            Self::BackportQueueC9s,
            Self::BackportQueueC10s,
            Self::ClarificationNeededQueue,
            Self::RebaseQueue,
            Self::BackportQueue,
        ]
    }

    /// Queues that hold terminal-state schema objects rather than Tasks.
    pub fn data_queues() -> [QueueName; 4] {
        [
            Self::ErrorList,
            Self::NoActionList,
            Self::CompletedRebaseList,
            Self::CompletedBackportList,
        ]
    }

    /// Whether `branch` should route through the c9s container family.
    /// RHEL 8 and RHEL 9 both build on c9s tooling; everything else (RHEL
    /// 10+) uses c10s (`common/constants.py::_use_c9s_branch`).
    fn uses_c9s(branch: &str) -> bool {
        let lower = branch.to_ascii_lowercase();
        ["rhel-9", "c9s", "rhel-8", "c8s"]
            .iter()
            .any(|pat| lower.contains(pat))
    }

    pub fn rebase_queue_for_branch(target_branch: Option<&str>) -> QueueName {
        match target_branch {
            Some(branch) if Self::uses_c9s(branch) => QueueName::RebaseQueueC9s,
            _ => QueueName::RebaseQueueC10s,
        }
    }

    pub fn backport_queue_for_branch(target_branch: Option<&str>) -> QueueName {
        match target_branch {
            Some(branch) if Self::uses_c9s(branch) => QueueName::BackportQueueC9s,
            _ => QueueName::BackportQueueC10s,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for queue in QueueName::ALL {
            assert_eq!(QueueName::from_str(queue.as_str()), Some(queue));
        }
        assert_eq!(QueueName::from_str("not_a_queue"), None);
    }

    #[test]
    fn rhel_8_and_9_route_to_c9s_rhel_10_routes_to_c10s() {
        assert_eq!(
            QueueName::rebase_queue_for_branch(Some("rhel-9.4.0")),
            QueueName::RebaseQueueC9s
        );
        assert_eq!(
            QueueName::rebase_queue_for_branch(Some("rhel-8.10.0")),
            QueueName::RebaseQueueC9s
        );
        assert_eq!(
            QueueName::rebase_queue_for_branch(Some("rhel-10.2")),
            QueueName::RebaseQueueC10s
        );
        assert_eq!(QueueName::rebase_queue_for_branch(None), QueueName::RebaseQueueC10s);
    }

    #[test]
    fn backport_routing_mirrors_rebase_routing() {
        assert_eq!(
            QueueName::backport_queue_for_branch(Some("c9s")),
            QueueName::BackportQueueC9s
        );
        assert_eq!(
            QueueName::backport_queue_for_branch(Some("c10s")),
            QueueName::BackportQueueC10s
        );
    }

    #[test]
    fn input_and_data_queues_partition_all_but_legacy_overlap_is_intentional() {
        let input = QueueName::input_queues();
        let data = QueueName::data_queues();
        assert_eq!(input.len() + data.len(), QueueName::ALL.len());
        for q in input {
            assert!(!data.contains(&q));
        }
    }
}
