//! Error types shared by the TauFW crates.

use thiserror::Error;

/// TauFW error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid axis, shape or plan setup, detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An expression references a field or lookup the dataset does not provide.
    #[error("schema error: {0}")]
    Schema(String),

    /// Bin-count mismatch between histograms claimed to correspond.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Expression syntax error.
    #[error("expression error: {0}")]
    Expression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A data source was readable but its payload does not match its declaration.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl Error {
    /// `true` for failures of the underlying data source (unreadable or malformed payload).
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Deserialization(_) | Error::Json(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
