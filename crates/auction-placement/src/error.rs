//! Eligibility errors raised while scoring a cell.

use thiserror::Error;

use auction_state::PlacementError;

/// Why a cell cannot take a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("no root filesystem provider matches the workload")]
    StackMismatch,

    #[error("insufficient resources")]
    InsufficientResources,
}

impl From<ScoreError> for PlacementError {
    fn from(err: ScoreError) -> Self {
        match err {
            ScoreError::StackMismatch => PlacementError::CellMismatch,
            ScoreError::InsufficientResources => PlacementError::InsufficientResources,
        }
    }
}

pub type ScoreResult<T> = Result<T, ScoreError>;
