pub mod backend;
pub mod job;
pub mod scheduler;
pub mod slots;

pub use backend::{Backend, BackendKind, BatchQueueBackend, LocalBackend, RemoteShellBackend};
pub use job::{BackendBinding, CommandTemplate, Job, JobFailure, JobSpec};
pub use scheduler::Scheduler;
pub use slots::SlotPool;
