use thiserror::Error;

/// Closed error taxonomy carried on inter-stage payloads and used to decide
/// retry policy (spec §7). `Business` is never raised as an `Err`, it is
/// data, represented by the non-error resolutions of [`crate::schemas::TriageOutput`].
#[derive(Debug, Error)]
pub enum JotnarError {
    /// Tracker/forge/builder/queue I/O. Retried at Task level.
    #[error("transport error: {0}")]
    Transport(String),

    /// A tool returned a non-zero status or an invalid payload.
    #[error("tool error: {0}")]
    Tool(String),

    /// The agent runner exhausted its caps or produced non-conforming output.
    #[error("agent error: {0}")]
    Agent(String),

    /// The Kerberos broker could not produce a valid ticket.
    #[error("auth error: {0}")]
    Auth(String),

    /// Unknown step name, schema mismatch, or other invariant violation.
    /// Never silently swallowed.
    #[error("programming error: {0}")]
    Programming(String),
}

impl JotnarError {
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport(detail.into())
    }

    pub fn tool(detail: impl Into<String>) -> Self {
        Self::Tool(detail.into())
    }

    pub fn agent(detail: impl Into<String>) -> Self {
        Self::Agent(detail.into())
    }

    pub fn auth(detail: impl Into<String>) -> Self {
        Self::Auth(detail.into())
    }

    pub fn programming(detail: impl Into<String>) -> Self {
        Self::Programming(detail.into())
    }

    /// Whether this error class is worth a Task-level retry, as opposed to
    /// a fatal abort (only `Programming` aborts the process, per §7).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Programming(_))
    }
}

/// Abort the process if `err` wraps a non-retryable [`JotnarError`], rather
/// than let a pipeline worker silently retry or finalize it like a
/// transient fault (spec §7: "process aborts, no silent swallow"). Any
/// other error, including a `JotnarError` of a retryable class, is left
/// untouched for the caller's normal retry handling.
pub fn abort_on_programming_error(err: &anyhow::Error) {
    if let Some(e) = err.downcast_ref::<JotnarError>() {
        if !e.is_retryable() {
            tracing::error!(error = %e, "fatal error, aborting process");
            std::process::exit(1);
        }
    }
}
