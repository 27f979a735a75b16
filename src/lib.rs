// Library interface for coachrs modules
// This allows integration tests and benches to access the pipeline stages

pub mod aggregate;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod features;
pub mod import;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod recommendation;
pub mod scoring;
pub mod summary;

// Re-export commonly used types for convenience
pub use models::*;
pub use pipeline::{run, run_bytes, run_file, run_fingerprint, PipelineConfig, PipelineOutput};
pub use import::{ParseStats, RetentionWindow};
pub use database::{Annotation, DashboardStore, PublishOutcome, VitaminLog};
pub use summary::DashboardSummary;
pub use error::{CoachError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
