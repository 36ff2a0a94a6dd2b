pub mod backend;
pub mod caps;
pub mod error;
pub mod message;
pub mod runner;
pub mod trajectory;

pub use backend::{CliModelBackend, ModelBackend};
pub use caps::AgentCaps;
pub use error::AgentError;
pub use runner::AgentRunner;
