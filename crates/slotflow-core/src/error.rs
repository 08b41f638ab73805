use thiserror::Error;

/// Top-level error type shared by the slotflow crates.
///
/// Conversational faults (an unresolved extraction, an ambiguous route, a
/// retryable save) are not errors at this level; they travel as turn
/// outcomes. This type covers configuration, storage and plumbing failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SlotflowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for SlotflowError {
    fn from(err: toml::de::Error) -> Self {
        SlotflowError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SlotflowError {
    fn from(err: toml::ser::Error) -> Self {
        SlotflowError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SlotflowError {
    fn from(err: serde_json::Error) -> Self {
        SlotflowError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for slotflow operations.
pub type Result<T> = std::result::Result<T, SlotflowError>;
