use rocket_db_pools::sqlx;
use thiserror::Error;

/// Errors raised by the vector index.
///
/// `DimensionMismatch` is scoped to a single vector: the sync engine skips that
/// message and keeps going with its siblings.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector for namespace {namespace} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        namespace: String,
        expected: usize,
        actual: usize,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IndexError {
    pub fn dimension_mismatch(namespace: String, expected: usize, actual: usize) -> Self {
        IndexError::DimensionMismatch {
            namespace,
            expected,
            actual,
        }
    }

    /// True when the failure is confined to one item.
    pub fn is_item_scoped(&self) -> bool {
        matches!(self, IndexError::DimensionMismatch { .. })
    }
}
