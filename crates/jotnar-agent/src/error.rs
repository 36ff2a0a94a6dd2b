use thiserror::Error;

/// Raised once the runner exhausts its caps (spec §4.2: "the runner raises
/// a single `AgentError`, it never returns partial output").
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model backend failed: {0}")]
    Backend(String),
    #[error("exhausted {max_iterations} iterations without a validated output")]
    IterationsExhausted { max_iterations: u32 },
    #[error("exhausted {total_max_retries} total retries across tool calls")]
    RetriesExhausted { total_max_retries: u32 },
    #[error("model output did not validate against the expected schema: {0}")]
    SchemaValidation(String),
}
