use thiserror::Error;

/// Core ordering errors.
///
/// Variants map 1:1 onto the binding layer's response contract, so transport
/// status selection never re-derives domain semantics: Validation -> 400,
/// NotFound -> 404, Forbidden -> 403, Conflict -> 409, Storage/Serialization -> 500.
#[derive(Debug, Error)]
pub enum BistroError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BistroError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}
