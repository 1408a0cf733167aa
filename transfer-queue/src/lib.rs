pub mod queue;

pub use queue::{ImportJob, JobQueue, JobStatus, NewJob};
