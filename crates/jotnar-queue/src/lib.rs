pub mod names;
pub mod pool;
pub mod queue;
pub mod scheduled;

pub use names::QueueName;
pub use pool::build_pool;
pub use queue::WorkQueue;
pub use scheduled::ScheduledQueue;
