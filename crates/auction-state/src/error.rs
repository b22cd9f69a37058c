//! Error types for cell state ingestion and the cell client capability.

use thiserror::Error;

/// Result type alias for state ingestion.
pub type StateResult<T> = Result<T, StateError>;

/// Result type alias for cell client calls.
pub type ClientResult<T> = Result<T, CellClientError>;

/// Configuration errors detected when a `CellState` is ingested.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("total {0} capacity is zero")]
    ZeroCapacity(&'static str),

    #[error("available {dimension} ({available}) exceeds total ({total})")]
    AvailableExceedsTotal {
        dimension: &'static str,
        available: u64,
        total: u64,
    },
}

/// Failures reported by a `CellClient`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellClientError {
    #[error("cell unreachable: {0}")]
    Unreachable(String),

    #[error("cell request timed out")]
    Timeout,

    #[error("cell returned an invalid response: {0}")]
    InvalidResponse(String),
}
