//! Typed failures for the store, the submission lifecycle and promotion.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::submission::SubmissionStatus;

/// Errors raised by the row, staging and submission stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("submission {0} not found")]
    SubmissionNotFound(Uuid),

    #[error("staging row {0} not found")]
    StagingRowNotFound(Uuid),

    /// A target row index is already occupied.
    #[error("dataset '{dataset}' already has a row at index {index}")]
    RowConflict { dataset: String, index: i64 },

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store I/O failed for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path:?} is corrupt: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode store state: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("submission is already {0} and cannot change state")]
    Terminal(SubmissionStatus),

    #[error("cannot move submission from {from} to {to}")]
    Invalid {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
}

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("submission {0} has already been applied")]
    AlreadyApplied(Uuid),

    #[error("submission {id} is {status}, only approved submissions can be promoted")]
    NotApproved { id: Uuid, status: SubmissionStatus },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ReviewError {
    /// Staging edits are closed once a submission is approved or terminal.
    #[error("submission {id} is {status}; its staging rows can no longer be edited")]
    Locked { id: Uuid, status: SubmissionStatus },

    #[error("dataset '{0}' has no accepted schema")]
    MissingSchema(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("promotion failed: {0}")]
    Promotion(#[from] PromotionError),

    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}
