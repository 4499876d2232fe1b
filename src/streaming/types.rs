// Common types for the streaming module

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during streaming operations
#[derive(Debug, Error)]
pub enum StreamError {
    /// The source never became ready (device not found, connection refused, ...)
    #[error("Acquisition failure: {0}")]
    AcquisitionFailure(String),

    /// The source was ready but stopped producing data
    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// A downstream consumer failed while receiving an envelope
    #[error("Delivery to '{consumer}' failed: {source}")]
    Delivery {
        consumer: String,
        #[source]
        source: Box<StreamError>,
    },

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("Network error: {0}")]
    Network(String),

    /// A pipeline task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    #[error("Stream already running")]
    AlreadyRunning,

    #[error("Cancelled")]
    Cancelled,
}

impl StreamError {
    /// Wrap an error raised by a consumer's `receive`
    pub fn delivery(consumer: impl Into<String>, source: StreamError) -> Self {
        StreamError::Delivery {
            consumer: consumer.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping any number of `Delivery` wrappers
    pub fn root_cause(&self) -> &StreamError {
        let mut current = self;
        while let StreamError::Delivery { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    /// Only an interrupted stream is worth retrying; everything else is a
    /// configuration or programming problem.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root_cause(), StreamError::StreamInterrupted(_))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(e: serde_json::Error) -> Self {
        StreamError::Parse(format!("JSON: {}", e))
    }
}

impl From<csv::Error> for StreamError {
    fn from(e: csv::Error) -> Self {
        StreamError::Parse(format!("CSV: {}", e))
    }
}

/// Current state of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", content = "data")]
pub enum StreamState {
    /// Pipeline is built but not running
    #[default]
    Idle,

    /// Sources are producing
    Running { started_at: i64 },

    /// All sources finished and resources were released
    Stopped,

    /// A source run failed; resources were released
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_delivery() {
        let inner = StreamError::Analysis("window too short".to_string());
        let err = StreamError::delivery("analysis", inner);
        let err = StreamError::delivery("source", err);

        assert!(matches!(err.root_cause(), StreamError::Analysis(_)));
        assert!(err.to_string().contains("'source'"));
    }

    #[test]
    fn test_only_interruptions_are_retryable() {
        let interrupted = StreamError::delivery(
            "sink",
            StreamError::StreamInterrupted("no data for 10s".to_string()),
        );
        assert!(interrupted.is_retryable());
        assert!(!StreamError::AcquisitionFailure("refused".to_string()).is_retryable());
    }
}
