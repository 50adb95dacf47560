//! Custom error types for rustbookpages.
//!
//! Every fallible operation in the library returns `Result<T, BookpagesError>`.
//! Failures below the batch boundary are caught by the pipeline driver and
//! turn into a skipped batch, never an aborted run.

use thiserror::Error;

/// Main error type for rustbookpages operations.
#[derive(Debug, Error)]
pub enum BookpagesError {
    /// Network/HTTP transport error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Search endpoint answered with a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Status text and response body
        message: String,
    },

    /// Response envelope did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Model answer could not be turned into book records
    #[error("Recovery failed: {0}")]
    Recovery(#[from] RecoveryError),

    /// A recovered record has no usable title
    #[error("Recovered record {index} has no title")]
    MissingTitle {
        /// Position of the record within the model answer
        index: usize,
    },

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

/// Why a model answer yielded no records.
#[derive(Debug, Error, PartialEq)]
pub enum RecoveryError {
    /// Nothing shaped like `[ { ... } ]` in the text
    #[error("no JSON array found")]
    NoArray,

    /// The extracted array still failed to parse after repair
    #[error("JSON parse error: {error}; attempted to parse: {attempted}")]
    InvalidJson {
        /// Parser message
        error: String,
        /// Exact substring handed to the parser
        attempted: String,
    },
}

/// Result type alias using `BookpagesError`
pub type Result<T> = std::result::Result<T, BookpagesError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BookpagesError::Parse(msg.to_string()))
    }
}
