//! Pipeline error taxonomy
//!
//! Per-subject fetch failures are recovered inside the extractor and never
//! appear here (see [`crate::source::FetchError`]). Everything in
//! [`PipelineError`] is fatal to the current run and carries the stage and,
//! when known, the batch it happened in, so the caller can report it and let
//! the scheduler retry.

use thiserror::Error;
use wdp_common::types::BatchHandle;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders an optional batch for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLabel(pub Option<BatchHandle>);

impl std::fmt::Display for BatchLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(batch) => write!(f, "{batch}"),
            None => f.write_str("<none>"),
        }
    }
}

/// Fatal pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Staging append/query, sink write, or sink verification failed
    #[error("Persist error in {stage} stage (batch {batch}): {message}")]
    Persist {
        stage: Stage,
        batch: BatchLabel,
        message: String,
    },

    /// A record is missing a field or holds a value that cannot be used
    #[error("Validation error in {stage} stage (batch {batch}): {message}")]
    Validation {
        stage: Stage,
        batch: BatchLabel,
        message: String,
    },

    /// Staging database cannot be reached or migrated. Not tied to a stage:
    /// connections are opened before any stage runs.
    #[error("Staging store unavailable: {0}")]
    Unavailable(String),

    /// Loader input is not a sequence of row objects
    #[error("Loader input is not tabular: {0}")]
    NotTabular(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn persist(stage: Stage, batch: Option<BatchHandle>, message: impl Into<String>) -> Self {
        Self::Persist {
            stage,
            batch: BatchLabel(batch),
            message: message.into(),
        }
    }

    pub fn validation(
        stage: Stage,
        batch: Option<BatchHandle>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            stage,
            batch: BatchLabel(batch),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stage the error was raised in, if it belongs to one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Persist { stage, .. } | PipelineError::Validation { stage, .. } => {
                Some(*stage)
            },
            PipelineError::NotTabular(_) => Some(Stage::Load),
            PipelineError::Unavailable(_) | PipelineError::Config(_) => None,
        }
    }

    /// Batch the error was raised for, if known
    pub fn batch(&self) -> Option<BatchHandle> {
        match self {
            PipelineError::Persist { batch, .. } | PipelineError::Validation { batch, .. } => {
                batch.0
            },
            _ => None,
        }
    }

    /// Attach a batch to an error raised before the batch was known.
    pub fn with_batch(self, handle: BatchHandle) -> Self {
        match self {
            PipelineError::Persist {
                stage,
                batch: BatchLabel(None),
                message,
            } => PipelineError::persist(stage, Some(handle), message),
            PipelineError::Validation {
                stage,
                batch: BatchLabel(None),
                message,
            } => PipelineError::validation(stage, Some(handle), message),
            other => other,
        }
    }
}

impl From<wdp_common::WdpError> for PipelineError {
    fn from(err: wdp_common::WdpError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_stage_and_batch() {
        let batch: BatchHandle = "2024-01-30T12:00:00Z".parse().unwrap();
        let err = PipelineError::persist(Stage::Extract, Some(batch), "connection reset");
        assert_eq!(
            err.to_string(),
            "Persist error in extract stage (batch 2024-01-30T12:00:00.000000Z): connection reset"
        );
        assert_eq!(err.stage(), Some(Stage::Extract));
        assert_eq!(err.batch(), Some(batch));
    }

    #[test]
    fn test_with_batch_fills_missing_batch_only() {
        let first: BatchHandle = "2024-01-30T12:00:00Z".parse().unwrap();
        let second: BatchHandle = "2024-01-30T13:00:00Z".parse().unwrap();

        let err = PipelineError::validation(Stage::Load, None, "bad row").with_batch(first);
        assert_eq!(err.batch(), Some(first));

        let err = err.with_batch(second);
        assert_eq!(err.batch(), Some(first));
    }

    #[test]
    fn test_unavailable_store_has_no_stage() {
        let first: BatchHandle = "2024-01-30T12:00:00Z".parse().unwrap();
        let err = PipelineError::Unavailable("connection refused".to_string()).with_batch(first);
        assert_eq!(err.stage(), None);
        assert_eq!(err.batch(), None);
        assert_eq!(err.to_string(), "Staging store unavailable: connection refused");
    }

    #[test]
    fn test_not_tabular_belongs_to_load_stage() {
        let err = PipelineError::NotTabular("expected an array".to_string());
        assert_eq!(err.stage(), Some(Stage::Load));
        assert_eq!(err.batch(), None);
    }
}
