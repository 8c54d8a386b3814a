use thiserror::Error;

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for executor operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("pool is at maximum size and the submission queue is full")]
    CapacityExhausted,

    #[error("executor is shut down")]
    ShutDown,

    #[error("worker aborted before completing the task")]
    TaskAborted,
}
