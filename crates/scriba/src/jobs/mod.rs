pub mod manager;
pub mod progress;
pub mod types;

pub use manager::{JobManager, TaskBody, TaskResult};
pub use progress::{JobEvent, ProgressHandle};
pub use types::{Job, JobStatus, JobType};
