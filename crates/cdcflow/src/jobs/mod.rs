pub mod cell;
pub mod model;
pub mod registry;
pub mod store;
pub mod task;

pub use model::{JobId, JobRecord, JobStatus};
pub use registry::{ChangefeedRegistry, CreateChangefeed, RegistryConfig};
pub use store::{JobStore, MemoryJobStore, PgJobStore};
pub use task::{ChangefeedTask, TaskContext, TaskError, TaskFactory};
