use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::ExportError;
use crate::models::{DailyRow, DailyTable, DailyValues, MetricKind, Recommendation};

/// Column order of the interchange file
pub const COLUMNS: [&str; 21] = [
    "date",
    "weight",
    "calories",
    "steps",
    "water",
    "sleep",
    "weight_avg",
    "calories_avg",
    "steps_avg",
    "water_avg",
    "sleep_avg",
    "day_in_cycle",
    "period",
    "period_label",
    "weight_pct_change",
    "cal_dev",
    "steps_dev",
    "water_dev",
    "sleep_dev",
    "composite_score",
    "recommendation",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

fn optional<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map_or(String::new(), |v| v.to_string())
}

fn row_fields(row: &DailyRow) -> Vec<String> {
    let mut fields = Vec::with_capacity(COLUMNS.len());
    fields.push(row.date.format(DATE_FORMAT).to_string());
    for kind in MetricKind::ALL {
        fields.push(optional(&row.values.get(kind)));
    }
    for kind in MetricKind::ALL {
        fields.push(optional(&row.averages.get(kind)));
    }
    fields.push(optional(&row.day_in_cycle));
    fields.push(optional(&row.period));
    fields.push(optional(&row.period_label));
    fields.push(optional(&row.weight_pct_change));
    fields.push(optional(&row.cal_dev));
    fields.push(optional(&row.steps_dev));
    fields.push(optional(&row.water_dev));
    fields.push(optional(&row.sleep_dev));
    fields.push(optional(&row.composite_score));
    fields.push(optional(&row.recommendation));
    fields
}

/// Write a table with a header row to any writer
pub fn write_table<W: Write>(table: &DailyTable, writer: W) -> Result<(), ExportError> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);

    writer.write_record(COLUMNS)?;
    for row in table {
        writer.write_record(row_fields(row))?;
    }
    writer.flush()?;

    Ok(())
}

pub fn to_csv_string(table: &DailyTable) -> Result<String, ExportError> {
    let mut buffer = Vec::new();
    write_table(table, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| ExportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Export the daily table to a CSV file
pub fn write_csv<P: AsRef<Path>>(table: &DailyTable, output_path: P) -> Result<(), ExportError> {
    let file = std::fs::File::create(output_path)?;
    write_table(table, file)
}

/// Field lookup for one data line
struct RowReader<'a> {
    record: &'a StringRecord,
    columns: &'a HashMap<&'static str, usize>,
    /// 1-based line number, header included
    line: usize,
}

impl<'a> RowReader<'a> {
    fn raw(&self, column: &'static str) -> &'a str {
        self.columns
            .get(column)
            .and_then(|index| self.record.get(*index))
            .unwrap_or("")
            .trim()
    }

    fn invalid(&self, column: &str, value: &str) -> ExportError {
        ExportError::InvalidField {
            row: self.line,
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    fn parse<T: FromStr>(&self, column: &'static str) -> Result<Option<T>, ExportError> {
        let raw = self.raw(column);
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<T>()
            .map(Some)
            .map_err(|_| self.invalid(column, raw))
    }

    fn decimal(&self, column: &'static str) -> Result<Option<Decimal>, ExportError> {
        let raw = self.raw(column);
        if raw.is_empty() {
            return Ok(None);
        }
        Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .map(Some)
            .map_err(|_| self.invalid(column, raw))
    }

    fn date(&self) -> Result<NaiveDate, ExportError> {
        let raw = self.raw("date");
        NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| self.invalid("date", raw))
    }

    fn values(&self, suffix: &str) -> Result<DailyValues, ExportError> {
        let mut values = DailyValues::default();
        for kind in MetricKind::ALL {
            let column = COLUMNS
                .iter()
                .copied()
                .find(|name| *name == format!("{}{}", kind.column(), suffix))
                .ok_or_else(|| ExportError::MissingColumn {
                    column: format!("{}{}", kind.column(), suffix),
                })?;
            values.set(kind, self.decimal(column)?);
        }
        Ok(values)
    }

    fn row(&self) -> Result<DailyRow, ExportError> {
        let mut row = DailyRow::new(self.date()?, self.values("")?);
        row.averages = self.values("_avg")?;
        row.day_in_cycle = self.parse("day_in_cycle")?;
        row.period = self.parse("period")?;
        row.period_label =
            Some(self.raw("period_label").to_string()).filter(|label| !label.is_empty());
        row.weight_pct_change = self.decimal("weight_pct_change")?;
        row.cal_dev = self.decimal("cal_dev")?;
        row.steps_dev = self.decimal("steps_dev")?;
        row.water_dev = self.decimal("water_dev")?;
        row.sleep_dev = self.decimal("sleep_dev")?;
        row.composite_score = self.decimal("composite_score")?;
        row.recommendation = self.parse::<Recommendation>("recommendation")?;
        Ok(row)
    }
}

/// Read a table written by [`write_table`]
///
/// Columns are matched by header name, so their order may differ. Every
/// column must be present and dates must be strictly increasing.
pub fn read_table<R: Read>(reader: R) -> Result<DailyTable, ExportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut columns: HashMap<&'static str, usize> = HashMap::new();
    for column in COLUMNS {
        let index = headers
            .iter()
            .position(|header| header.trim() == column)
            .ok_or_else(|| ExportError::MissingColumn {
                column: column.to_string(),
            })?;
        columns.insert(column, index);
    }

    let mut rows: Vec<DailyRow> = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let line = index + 2;
        let row = RowReader {
            record: &record,
            columns: &columns,
            line,
        }
        .row()?;

        if let Some(previous) = rows.last() {
            if row.date <= previous.date {
                return Err(ExportError::OutOfOrder {
                    row: line,
                    date: row.date.to_string(),
                });
            }
        }
        rows.push(row);
    }

    Ok(DailyTable::new(rows))
}

pub fn from_csv_str(content: &str) -> Result<DailyTable, ExportError> {
    read_table(content.as_bytes())
}

/// Import a daily table from a CSV file
pub fn read_csv<P: AsRef<Path>>(input_path: P) -> Result<DailyTable, ExportError> {
    let file = std::fs::File::open(input_path)?;
    read_table(file)
}
