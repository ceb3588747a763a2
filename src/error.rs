//! Error types for factfold.
//!
//! All errors are strongly typed using thiserror. Per-record problems are
//! recovered locally and counted in the run summary; only whole-source and
//! whole-store failures surface as `Err` from an ingestion pass.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur during input or configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f32,
    },

    #[error("Raw key cannot be empty")]
    EmptyRawKey,

    #[error("Unknown entity kind: {value}")]
    UnknownKind {
        value: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Similarity threshold {value} is out of range (0.0, 1.0]")]
    ThresholdOutOfRange {
        value: f64,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Ingestion errors, mirroring the pipeline's failure taxonomy.
#[derive(Debug, Error)]
pub enum IngestError {
    /// One record failed to decode. Skipped and counted, never fatal.
    #[error("Malformed record in {source_name} at line {line}: {reason}")]
    MalformedRecord {
        source_name: String,
        line: usize,
        reason: String,
    },

    /// A declared source path does not exist.
    #[error("Missing {} source: {}", requirement_label(.required), .path.display())]
    MissingSource {
        path: PathBuf,
        required: bool,
    },

    /// Reading an existing source failed at the I/O level.
    #[error("Failed to read source {}: {message}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        message: String,
    },

    /// The persistence layer rejected a write. Fatal for the pass.
    #[error("Store write failed: {message}")]
    StoreWriteFailure {
        message: String,
    },
}

/// Errors writing exported tables.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write {}: {message}", .path.display())]
    Write {
        path: PathBuf,
        message: String,
    },

    #[error("Failed to encode {kind} export: {message}")]
    Encode {
        kind: String,
        message: String,
    },
}

fn requirement_label(required: &bool) -> &'static str {
    if *required {
        "required"
    } else {
        "optional"
    }
}

/// Top-level error type for factfold.
#[derive(Debug, Error)]
pub enum FactfoldError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FactfoldError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error must abort the ingestion pass.
    ///
    /// Malformed records and optional missing sources are recoverable; a
    /// required source that is missing, or any store failure, is not.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Validation(_) => true,
            Self::Ingest(e) => match e {
                IngestError::MalformedRecord { .. } => false,
                IngestError::MissingSource { required, .. } => *required,
                IngestError::SourceUnreadable { .. } => false,
                IngestError::StoreWriteFailure { .. } => true,
            },
            Self::Storage(_) | Self::Export(_) | Self::Internal { .. } => true,
        }
    }

    /// Returns true if this error was caused by a missing required source.
    #[must_use]
    pub const fn is_missing_required_source(&self) -> bool {
        matches!(
            self,
            Self::Ingest(IngestError::MissingSource { required: true, .. })
        )
    }
}

/// Result type alias for factfold operations.
pub type FactfoldResult<T> = Result<T, FactfoldError>;
