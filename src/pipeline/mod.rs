//! Task pipeline: worker pool, provider polling and the orchestrator

pub mod orchestrator;
pub mod poller;
pub mod worker_pool;

pub use orchestrator::{Orchestrator, PipelineDeps, SubmitOptions};
pub use poller::{poll_until, EmptyCompletion, PollCadence, PollOutcome};
pub use worker_pool::{PoolStats, WorkerPool};
