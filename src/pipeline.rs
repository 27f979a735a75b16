//! End-to-end transform from a health export to the daily table
//!
//! The stages run strictly in order over one data set:
//! parse → aggregate → features → scoring → recommendation.

use chrono::{Local, NaiveDate};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{BufRead, Cursor};
use std::path::Path;
use tracing::{info, info_span};

use crate::aggregate::aggregate;
use crate::error::{CoachError, Result};
use crate::features::{build_features, DEFAULT_WINDOW_SIZE};
use crate::import::{HealthExportParser, ImportManager, ParseStats, RetentionWindow};
use crate::models::{DailyTable, Targets};
use crate::recommendation;
use crate::scoring::score;

pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Run parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Days of history to keep, counting today
    pub retention_days: u32,
    /// Rolling window, period length and trend offset, in days
    pub window_size: usize,
    /// Reference date for the retention window
    pub today: NaiveDate,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            retention_days: DEFAULT_RETENTION_DAYS,
            window_size: DEFAULT_WINDOW_SIZE,
            today: Local::now().date_naive(),
        }
    }
}

impl PipelineConfig {
    pub fn with_today(today: NaiveDate) -> Self {
        PipelineConfig {
            today,
            ..PipelineConfig::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(CoachError::Configuration(
                "retention_days must be at least 1".to_string(),
            ));
        }
        if self.window_size == 0 {
            return Err(CoachError::Configuration(
                "window_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retention_window(&self) -> RetentionWindow {
        RetentionWindow::new(self.today, self.retention_days)
    }
}

/// Result of one run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Empty when the window held no usable data
    pub table: DailyTable,
    pub stats: ParseStats,
}

impl PipelineOutput {
    pub fn has_data(&self) -> bool {
        !self.table.is_empty()
    }
}

/// Identity of a run: the export's hash plus every input that shapes the table
///
/// Equal fingerprints produce equal tables, so a cached dashboard with the same
/// fingerprint need not be rebuilt.
pub fn run_fingerprint(export_hash: &str, targets: &Targets, config: &PipelineConfig) -> String {
    let mut hasher = Sha256::new();
    hasher.update(export_hash.as_bytes());

    let target_values = [
        targets.calories,
        targets.steps,
        targets.water,
        targets.sleep,
        targets.weight_change_pct_per_week,
    ];
    for value in target_values {
        hasher.update(b"|");
        hasher.update(value.normalize().to_string().as_bytes());
    }

    hasher.update(
        format!(
            "|{}|{}|{}",
            config.retention_days, config.window_size, config.today
        )
        .as_bytes(),
    );
    format!("{:x}", hasher.finalize())
}

/// Run every stage over an XML byte stream
pub fn run<R: BufRead>(
    input: R,
    targets: &Targets,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    config.validate()?;

    let span = info_span!(
        "pipeline",
        today = %config.today,
        retention_days = config.retention_days,
        window_size = config.window_size
    );
    let _guard = span.enter();

    let parsed = HealthExportParser::new(config.retention_window()).parse(input)?;
    let stats = parsed.stats;

    let rows = aggregate(&parsed.days);
    let rows = build_features(rows, config.window_size);
    let rows = score(rows, targets);
    let rows = recommendation::apply(rows, targets);
    let table = DailyTable::new(rows);

    match (table.first_date(), table.last_date()) {
        (Some(first), Some(last)) => info!(
            rows = table.len(),
            first = %first,
            last = %last,
            skipped = stats.skipped_total(),
            "pipeline finished"
        ),
        _ => info!(
            records = stats.records_seen,
            skipped = stats.skipped_total(),
            "no data in retention window"
        ),
    }

    Ok(PipelineOutput { table, stats })
}

/// Run over an in-memory document
pub fn run_bytes(
    input: &[u8],
    targets: &Targets,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    run(Cursor::new(input), targets, config)
}

/// Run over an export file, plain or gzip compressed
pub fn run_file(
    path: &Path,
    targets: &Targets,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    let reader = ImportManager::new().open(path)?;
    run(reader, targets, config)
}

/// Same as [`run_file`], advancing `progress` by bytes read from disk
pub fn run_file_with_progress(
    path: &Path,
    targets: &Targets,
    config: &PipelineConfig,
    progress: ProgressBar,
) -> Result<PipelineOutput> {
    let reader = ImportManager::new().open_with_progress(path, progress)?;
    run(reader, targets, config)
}
