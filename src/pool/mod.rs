//! worker 进程池与进程间协议

pub mod protocol;
pub mod worker;
pub mod worker_pool;

pub use worker_pool::{JobHandle, JobOutcome, JobRequest, WaitStatus, WorkerCommand, WorkerHandle, WorkerPool};
