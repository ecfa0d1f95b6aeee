//! Error types for WDP

use thiserror::Error;

/// Result type alias for WDP operations
pub type Result<T> = std::result::Result<T, WdpError>;

/// Main error type for WDP
#[derive(Error, Debug)]
pub enum WdpError {
    #[error("Invalid batch handle '{value}': {reason}")]
    InvalidBatchHandle { value: String, reason: String },

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),
}
