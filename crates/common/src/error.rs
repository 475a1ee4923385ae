use thiserror::Error;

#[derive(Debug, Error)]
pub enum TallyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TallyError {
    /// Transient failures worth redelivering the triggering event for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TallyError::Storage(_) | TallyError::Conflict(_))
    }
}

pub type TallyResult<T> = Result<T, TallyError>;
