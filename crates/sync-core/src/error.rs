//! Error taxonomy shared by every engine.
//!
//! Transient, infrastructure-level failures are retryable; data and schema
//! failures are surfaced immediately because retrying cannot change them.

use std::time::Duration;

/// Errors produced by sessions, engines and stores.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A source or destination handle could not be obtained in time.
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// A source column type has no destination mapping.
    #[error("Unsupported type '{type_name}' for column '{column}' in table '{table}'")]
    UnsupportedType {
        table: String,
        column: String,
        type_name: String,
    },

    /// A batch could not be committed after exhausting its retries.
    #[error("Batch {batch} of table '{table}' failed after {attempts} attempt(s): {message}")]
    BatchWriteFailed {
        table: String,
        batch: u64,
        attempts: u32,
        message: String,
    },

    /// A sync cycle was abandoned; the watermark did not move.
    #[error("Sync cycle for table '{table}' failed: {message}")]
    SyncCycleFailed { table: String, message: String },

    /// One restore section could not be applied; it was rolled back.
    #[error("Section '{section}' of archive {archive_id} failed to apply: {message}")]
    SectionApplyFailed {
        archive_id: String,
        section: String,
        message: String,
    },

    /// Source metadata is unusable (no primary key, unknown column, ...).
    #[error("Schema error: {0}")]
    Schema(String),

    /// Permanent data-level failure (constraint violation, type mismatch).
    #[error("Data error: {0}")]
    Data(String),

    /// Retryable infrastructure failure (dropped connection, deadlock, ...).
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Whether retrying the failed operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable(_) | Self::Transient(_) | Self::Timeout { .. }
        )
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(SyncError::ConnectionUnavailable("pool exhausted".into()).is_retryable());
        assert!(SyncError::transient("deadlock detected").is_retryable());
        assert!(SyncError::Timeout {
            operation: "read batch".into(),
            elapsed: Duration::from_secs(1)
        }
        .is_retryable());

        assert!(!SyncError::data("duplicate key").is_retryable());
        assert!(!SyncError::UnsupportedType {
            table: "t".into(),
            column: "c".into(),
            type_name: "geometry".into()
        }
        .is_retryable());
        assert!(!SyncError::BatchWriteFailed {
            table: "t".into(),
            batch: 2,
            attempts: 4,
            message: "boom".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_messages_name_the_failing_unit() {
        let err = SyncError::SectionApplyFailed {
            archive_id: "a1".into(),
            section: "post-data".into(),
            message: "constraint violated".into(),
        };
        assert_eq!(
            err.to_string(),
            "Section 'post-data' of archive a1 failed to apply: constraint violated"
        );
    }
}
