use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("compare-and-swap failed: {entity} {id} expected status {expected}, found {actual}")]
    CasMismatch {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    #[error("transient storage error: {0}")]
    Transient(String),
}
