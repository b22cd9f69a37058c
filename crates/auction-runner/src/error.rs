//! Runner error types.

use thiserror::Error;

/// Errors surfaced by the batch and the runner loop.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("batch is closed, runner has shut down")]
    BatchClosed,

    #[error("failed to fetch cell clients: {0}")]
    FetchCellReps(#[from] anyhow::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
