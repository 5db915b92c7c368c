use thiserror::Error;

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Failure taxonomy for the transfer core. Allocation failures are fatal to
/// the session; everything else stays local to one connection.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("peer identifier allocation failed: {0}")]
    Allocation(String),

    #[error("peer identifier has not been allocated yet")]
    IdentityUnset,

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("declared filesize {declared} does not match payload length {actual} for {filename}")]
    SizeMismatch {
        filename: String,
        declared: u64,
        actual: u64,
    },

    #[error("payload of {size} bytes exceeds the configured limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("event stream already taken or manager not started")]
    EventStreamUnavailable,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
