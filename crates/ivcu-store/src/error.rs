use thiserror::Error;

/// Errors surfaced by an [`crate::EventStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no aggregate found for ivcu_id {0}")]
    NotFound(uuid::Uuid),

    #[error("optimistic concurrency conflict on {aggregate_id}: expected version {expected}, store is at {actual}")]
    VersionConflict {
        aggregate_id: uuid::Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("invalid event: {0}")]
    Invalid(#[from] ivcu_types::ValidationError),

    #[error("cannot undo: {0}")]
    UndoRejected(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}
