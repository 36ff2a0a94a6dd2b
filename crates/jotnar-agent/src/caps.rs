//! Bounds placed on one Agent Runner invocation (spec §4.2).

#[derive(Debug, Clone, Copy)]
pub struct AgentCaps {
    /// How many times a single tool call may be retried before it counts
    /// against the run's total retry budget.
    pub max_retries_per_step: u32,
    /// Total retries across the whole run, regardless of which tool.
    pub total_max_retries: u32,
    /// Upper bound on model round-trips (distinct from retries: a clean
    /// tool call followed by another model turn still counts as one
    /// iteration).
    pub max_iterations: u32,
}

impl Default for AgentCaps {
    fn default() -> Self {
        Self {
            max_retries_per_step: 3,
            total_max_retries: 10,
            max_iterations: 25,
        }
    }
}
