pub mod builder;
pub mod forge;
pub mod kerberos;
pub mod lookaside;
pub mod registry;
pub mod tracker;

pub use kerberos::KerberosBroker;
pub use registry::{Tool, ToolError, ToolRegistry};
