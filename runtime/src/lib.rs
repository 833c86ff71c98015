pub mod cancel;
pub mod orchestrator;

pub use cancel::{run_with_deadline, CancellationToken, DeadlineOutcome};
pub use orchestrator::{available_cores, scheduler, ResourceGroup, TaskScheduler};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Worker `{0}` exited without a result")]
    WorkerLost(String),
}

pub type Result<T> = std::result::Result<T, Error>;
