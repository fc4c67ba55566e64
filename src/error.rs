//! Errors
//!
//! Every failure that can be detected locally, before a rank blocks in a collective operation.
//!
//! A rank that never reaches a matching collective call hangs the whole group; that condition has no variant here
//! because no rank can observe it. Restarting the processes is the only remedy.
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatmulError {
    /// the group cannot run this problem size, e.g. fewer rows than ranks
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// operands missing on the coordinator or not an `n x n` matrix
    #[error("dimension mismatch: {0}")]
    Dimension(String),
    /// a collective call violated its contract or the backend failed
    #[error("transport error: {0}")]
    Transport(String),
    /// the distributed result deviates from the serial reference; raised by verification only
    #[error("numeric mismatch: max deviation {max_deviation:e} exceeds tolerance {tolerance:e}")]
    NumericMismatch { max_deviation: f64, tolerance: f64 },
    /// drawing the performance chart failed
    #[error("chart rendering failed: {0}")]
    Chart(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MatmulError>;
