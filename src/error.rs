//! Unified error hierarchy for coachrs
//!
//! Record-level problems inside an export are never errors: the parser skips the
//! record and counts it. The types here cover what can actually stop a run:
//! unreadable input, a broken interchange file, the record store and bad
//! configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all coachrs operations
#[derive(Debug, Error)]
pub enum CoachError {
    /// Health export could not be read or tokenized
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Flat text interchange errors
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Record store errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Invalid targets or pipeline settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Input that is readable but cannot be used
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Health export reading errors
#[derive(Debug, Error)]
pub enum ImportError {
    /// File not found at specified path
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// The document itself is not well-formed XML
    #[error("Malformed XML at byte {position}: {reason}")]
    Xml { position: usize, reason: String },

    /// Neither a plain nor a gzip compressed export
    #[error("Unsupported export file: {path}")]
    UnsupportedFormat { path: PathBuf },

    /// Underlying read failure
    #[error("Read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Interchange format errors
#[derive(Debug, Error)]
pub enum ExportError {
    /// Header is missing a required column
    #[error("Missing column: {column}")]
    MissingColumn { column: String },

    /// A field could not be parsed
    #[error("Invalid value in row {row}, column {column}: {value:?}")]
    InvalidField {
        row: usize,
        column: String,
        value: String,
    },

    /// Dates are not strictly increasing
    #[error("Rows out of order at row {row}: {date}")]
    OutOfOrder { row: usize, date: String },

    /// CSV encoding/decoding failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Record store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Cached payload could not be decoded
    #[error("Corrupt cache entry for {client_id}: {reason}")]
    CorruptEntry { client_id: String, reason: String },
}

/// Result type alias for coachrs operations
pub type Result<T> = std::result::Result<T, CoachError>;

impl CoachError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            CoachError::Io(_) | CoachError::Import(ImportError::Io(_)) => true,
            CoachError::Database(DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _))) => {
                matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoachError::Import(ImportError::FileNotFound { .. })
            | CoachError::Import(ImportError::UnsupportedFormat { .. })
            | CoachError::Validation(_) => ErrorSeverity::Warning,
            // The cached dashboard can no longer be shown until it is rebuilt
            CoachError::Database(DatabaseError::CorruptEntry { .. }) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            CoachError::Import(ImportError::FileNotFound { path }) => {
                format!("Could not find health export: {}", path.display())
            }
            CoachError::Import(ImportError::Xml { .. }) => {
                "The health export is not valid XML. Ask the client to export again.".to_string()
            }
            CoachError::Import(ImportError::UnsupportedFormat { path }) => format!(
                "{} is not a health export. Expected export.xml or export.xml.gz",
                path.display()
            ),
            CoachError::Database(DatabaseError::CorruptEntry { client_id, .. }) => format!(
                "The cached dashboard for {} is unreadable. Run `coachrs process --force` to rebuild it",
                client_id
            ),
            CoachError::Validation(reason) => reason.clone(),
            CoachError::Configuration(reason) => {
                format!("Please check the client configuration: {}", reason)
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}
