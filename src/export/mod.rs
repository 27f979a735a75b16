use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ExportError;
use crate::models::DailyTable;

pub mod csv;

pub use self::csv::{from_csv_str, read_csv, to_csv_string, write_csv, COLUMNS};

/// Output file formats for the daily table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }

    /// Pick the format from a file extension, CSV when unknown
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_str)
            .unwrap_or(ExportFormat::Csv)
    }
}

/// Write the table in the format implied by the output path
pub fn export_table(table: &DailyTable, output_path: &Path) -> Result<ExportFormat, ExportError> {
    let format = ExportFormat::from_path(output_path);
    match format {
        ExportFormat::Csv => write_csv(table, output_path)?,
        ExportFormat::Json => {
            let file = std::fs::File::create(output_path)?;
            serde_json::to_writer_pretty(file, table.rows())
                .map_err(|e| ExportError::Io(e.into()))?;
        }
    }
    Ok(format)
}
