use thiserror::Error;

/// Result type for tree operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tree operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid arguments: {0}")]
    BadArguments(String),

    #[error("short read while loading a tree file")]
    ShortRead,

    #[error("short write while saving a tree file")]
    ShortWrite,

    #[error("not a tree file: {0}")]
    BadFormat(String),

    #[error("unsupported tree file version {found} (expected {expected})")]
    VersionMismatch { found: i32, expected: i32 },

    #[error(transparent)]
    Executor(#[from] fspt_exec::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
