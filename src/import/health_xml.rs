//! Streaming parser for health export XML
//!
//! Exports routinely reach hundreds of megabytes, so the document is never
//! materialised. `quick_xml` hands us one event at a time out of a single reusable
//! buffer; each `Record` element is lifted into a [`RawRecord`], folded into the
//! per-date accumulator and dropped before the next event is read.
//!
//! Only `Record` elements that are direct children of the root are considered.
//! Exports repeat dietary records inside `Correlation` elements and counting those
//! would double the day's calories.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use tracing::{debug, info};

use crate::error::ImportError;
use crate::models::{checked_mean, parse_decimal, DailyValues, MetricKind, RawRecord, SleepCategory};

const RECORD_TAG: &[u8] = b"Record";
const UNKNOWN_SOURCE: &str = "unknown";
const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Trailing span of days retained for analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionWindow {
    /// Last day of the window (inclusive)
    pub today: NaiveDate,
    /// Number of calendar days kept, including `today`
    pub retention_days: u32,
}

impl RetentionWindow {
    pub fn new(today: NaiveDate, retention_days: u32) -> Self {
        RetentionWindow {
            today,
            retention_days,
        }
    }

    /// First retained date
    pub fn cutoff(&self) -> NaiveDate {
        let span = u64::from(self.retention_days.saturating_sub(1));
        self.today
            .checked_sub_days(Days::new(span))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.cutoff() && date <= self.today
    }
}

/// Why a record contributed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkipReason {
    UnknownType,
    BadDate,
    OutsideWindow,
    BadValue,
    ExcludedSleepCategory,
    BadTimestamp,
    MalformedAttributes,
    Nested,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::UnknownType => "unknown type",
            SkipReason::BadDate => "no date",
            SkipReason::OutsideWindow => "outside window",
            SkipReason::BadValue => "bad value",
            SkipReason::ExcludedSleepCategory => "not asleep",
            SkipReason::BadTimestamp => "bad timestamp",
            SkipReason::MalformedAttributes => "malformed attributes",
            SkipReason::Nested => "nested record",
        };
        f.write_str(text)
    }
}

/// Counters collected during a scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseStats {
    pub records_seen: u64,
    pub accepted: BTreeMap<MetricKind, u64>,
    pub skipped: BTreeMap<SkipReason, u64>,
    pub bytes_read: u64,
}

impl ParseStats {
    pub fn accepted_total(&self) -> u64 {
        self.accepted.values().sum()
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    pub fn accepted_for(&self, kind: MetricKind) -> u64 {
        self.accepted.get(&kind).copied().unwrap_or(0)
    }

    fn accept(&mut self, kind: MetricKind) {
        *self.accepted.entry(kind).or_insert(0) += 1;
    }

    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

impl fmt::Display for ParseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, {} accepted, {} skipped",
            self.records_seen,
            self.accepted_total(),
            self.skipped_total()
        )
    }
}

/// Result of scanning one export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedExport {
    /// Raw daily values keyed by calendar date, ascending
    pub days: BTreeMap<NaiveDate, DailyValues>,
    pub stats: ParseStats,
}

/// Per-date state while scanning
#[derive(Debug, Default)]
struct DayState {
    values: DailyValues,
    /// Step totals per source name
    step_sources: BTreeMap<String, Decimal>,
}

/// Folds records into per-date values, applying each metric's rule
#[derive(Debug)]
pub struct DailyAccumulator {
    window: RetentionWindow,
    days: BTreeMap<NaiveDate, DayState>,
}

impl DailyAccumulator {
    pub fn new(window: RetentionWindow) -> Self {
        DailyAccumulator {
            window,
            days: BTreeMap::new(),
        }
    }

    /// Add one record; returns the reason if it contributed nothing
    pub fn add(&mut self, record: RawRecord) -> Result<(), SkipReason> {
        let date = record.date().ok_or(SkipReason::BadDate)?;
        if !self.window.contains(date) {
            return Err(SkipReason::OutsideWindow);
        }

        match record.kind {
            MetricKind::StepCount => {
                let value = record.value.ok_or(SkipReason::BadValue)?;
                let source = if record.source.is_empty() {
                    UNKNOWN_SOURCE.to_string()
                } else {
                    record.source
                };
                let total = self
                    .day(date)
                    .step_sources
                    .entry(source)
                    .or_insert(Decimal::ZERO);
                *total = total.checked_add(value).ok_or(SkipReason::BadValue)?;
            }
            MetricKind::BodyMass => {
                let value = record.value.ok_or(SkipReason::BadValue)?;
                // Document order, not time order: the last element seen wins
                self.day(date).values.weight = Some(value);
            }
            MetricKind::DietaryEnergyConsumed | MetricKind::DietaryWater => {
                let value = record.value.ok_or(SkipReason::BadValue)?;
                let values = &mut self.day(date).values;
                let total = values
                    .get(record.kind)
                    .unwrap_or(Decimal::ZERO)
                    .checked_add(value)
                    .ok_or(SkipReason::BadValue)?;
                values.set(record.kind, Some(total));
            }
            MetricKind::SleepAnalysis => {
                let asleep = record
                    .category_value
                    .as_deref()
                    .and_then(SleepCategory::from_value)
                    .map(|category| category.is_asleep())
                    .unwrap_or(false);
                if !asleep {
                    return Err(SkipReason::ExcludedSleepCategory);
                }

                let hours = sleep_hours(&record.start_date, record.end_date.as_deref())
                    .ok_or(SkipReason::BadTimestamp)?;
                let values = &mut self.day(date).values;
                let total = values
                    .sleep
                    .unwrap_or(Decimal::ZERO)
                    .checked_add(hours)
                    .ok_or(SkipReason::BadValue)?;
                values.sleep = Some(total);
            }
        }

        Ok(())
    }

    fn day(&mut self, date: NaiveDate) -> &mut DayState {
        self.days.entry(date).or_default()
    }

    /// Resolve step sources and drop dates that ended up with no value
    pub fn finish(self) -> BTreeMap<NaiveDate, DailyValues> {
        self.days
            .into_iter()
            .filter_map(|(date, state)| {
                let mut values = state.values;
                values.steps = average_non_zero(state.step_sources.values().copied());
                if values.is_empty() {
                    None
                } else {
                    Some((date, values))
                }
            })
            .collect()
    }
}

/// Mean of the non-zero source totals; phone and watch both count the same walk
fn average_non_zero(totals: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    checked_mean(totals.filter(|total| *total > Decimal::ZERO))
}

/// Hours between two export timestamps
fn sleep_hours(start: &str, end: Option<&str>) -> Option<Decimal> {
    let start = parse_timestamp(start)?;
    let end = parse_timestamp(end?)?;
    let millis = (end - start).num_milliseconds();
    Some(Decimal::from(millis) / Decimal::from(MILLIS_PER_HOUR))
}

/// Parse the timestamp formats seen in exports; offset-less values are taken as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();

    const ZONED: [&str; 3] = [
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S%z",
    ];
    for format in ZONED {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }

    const NAIVE: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    NAIVE.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(raw, format)
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

/// Streaming reader for health export documents
pub struct HealthExportParser {
    window: RetentionWindow,
}

impl HealthExportParser {
    pub fn new(window: RetentionWindow) -> Self {
        HealthExportParser { window }
    }

    /// Scan a whole document
    ///
    /// Only a document that cannot be tokenized is an error; every per-record
    /// problem is counted in [`ParseStats`] and the scan continues.
    pub fn parse<R: BufRead>(&self, input: R) -> Result<ParsedExport, ImportError> {
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);

        let mut accumulator = DailyAccumulator::new(self.window);
        let mut stats = ParseStats::default();
        let mut buf = Vec::new();
        let mut depth: usize = 0;

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| ImportError::Xml {
                    position: reader.buffer_position(),
                    reason: e.to_string(),
                })?;

            match event {
                Event::Start(element) => {
                    depth += 1;
                    if element.name().as_ref() == RECORD_TAG {
                        // A record with children: its own depth is the one just entered
                        self.handle_record(&element, depth - 1, &mut accumulator, &mut stats);
                    }
                }
                Event::Empty(element) => {
                    if element.name().as_ref() == RECORD_TAG {
                        self.handle_record(&element, depth, &mut accumulator, &mut stats);
                    }
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }

            // Release the element before reading the next one
            buf.clear();
        }

        stats.bytes_read = reader.buffer_position() as u64;
        let days = accumulator.finish();

        for (reason, count) in &stats.skipped {
            debug!(%reason, count, "skipped records");
        }
        info!(
            records = stats.records_seen,
            accepted = stats.accepted_total(),
            skipped = stats.skipped_total(),
            days = days.len(),
            cutoff = %self.window.cutoff(),
            "health export scanned"
        );

        Ok(ParsedExport { days, stats })
    }

    fn handle_record(
        &self,
        element: &BytesStart<'_>,
        parent_depth: usize,
        accumulator: &mut DailyAccumulator,
        stats: &mut ParseStats,
    ) {
        stats.records_seen += 1;

        if parent_depth != 1 {
            stats.skip(SkipReason::Nested);
            return;
        }

        let outcome = read_record(element).and_then(|record| {
            let kind = record.kind;
            accumulator.add(record).map(|()| kind)
        });

        match outcome {
            Ok(kind) => stats.accept(kind),
            Err(reason) => stats.skip(reason),
        }
    }
}

/// Lift a `Record` element's attributes into a [`RawRecord`]
fn read_record(element: &BytesStart<'_>) -> Result<RawRecord, SkipReason> {
    let mut record_type = None;
    let mut start_date = None;
    let mut end_date = None;
    let mut value = None;
    let mut source = None;

    for attribute in element.attributes() {
        let attribute = attribute.map_err(|_| SkipReason::MalformedAttributes)?;
        let text = attribute
            .unescape_value()
            .map_err(|_| SkipReason::MalformedAttributes)?
            .into_owned();

        match attribute.key.as_ref() {
            b"type" => record_type = Some(text),
            b"startDate" => start_date = Some(text),
            b"endDate" => end_date = Some(text),
            b"value" => value = Some(text),
            b"sourceName" => source = Some(text),
            _ => {}
        }
    }

    let kind = record_type
        .as_deref()
        .and_then(MetricKind::from_identifier)
        .ok_or(SkipReason::UnknownType)?;
    let start_date = start_date.ok_or(SkipReason::BadDate)?;

    let (value, category_value) = if kind.is_category() {
        (None, value)
    } else {
        (value.as_deref().and_then(parse_decimal), None)
    };

    Ok(RawRecord {
        kind,
        start_date,
        end_date,
        value,
        category_value,
        source: source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
    })
}

/// Parse a document with a fresh parser
pub fn parse<R: BufRead>(input: R, window: RetentionWindow) -> Result<ParsedExport, ImportError> {
    HealthExportParser::new(window).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
    }

    fn window() -> RetentionWindow {
        RetentionWindow::new(today(), 90)
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn export(records: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<HealthData locale=\"en_GB\">\n<ExportDate value=\"2024-06-30 09:00:00 +0100\"/>\n{}\n</HealthData>\n",
            records
        )
    }

    fn quantity(kind: &str, start: &str, value: &str, source: &str) -> String {
        format!(
            "<Record type=\"HKQuantityTypeIdentifier{}\" sourceName=\"{}\" startDate=\"{}\" endDate=\"{}\" value=\"{}\"/>",
            kind, source, start, start, value
        )
    }

    fn sleep(start: &str, end: &str, value: &str) -> String {
        format!(
            "<Record type=\"HKCategoryTypeIdentifierSleepAnalysis\" sourceName=\"Watch\" startDate=\"{}\" endDate=\"{}\" value=\"HKCategoryValueSleepAnalysis{}\"/>",
            start, end, value
        )
    }

    fn run(records: &str) -> ParsedExport {
        parse(export(records).as_bytes(), window()).unwrap()
    }

    #[test]
    fn test_retention_window() {
        let window = RetentionWindow::new(today(), 3);
        assert_eq!(window.cutoff(), date(28));
        assert!(window.contains(date(28)));
        assert!(window.contains(date(30)));
        assert!(!window.contains(date(27)));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    }

    #[test]
    fn test_steps_averaged_over_non_zero_sources() {
        let records = [
            quantity("StepCount", "2024-06-10 08:00:00 +0100", "600", "iPhone"),
            quantity("StepCount", "2024-06-10 12:00:00 +0100", "400", "iPhone"),
            quantity("StepCount", "2024-06-10 12:00:00 +0100", "0", "Watch"),
        ]
        .join("\n");

        let parsed = run(&records);
        assert_eq!(parsed.days[&date(10)].steps, Some(dec!(1000)));
    }

    #[test]
    fn test_steps_mean_of_two_sources() {
        let records = [
            quantity("StepCount", "2024-06-10 08:00:00 +0100", "9000", "iPhone"),
            quantity("StepCount", "2024-06-10 08:00:00 +0100", "11000", "Watch"),
        ]
        .join("\n");

        let parsed = run(&records);
        assert_eq!(parsed.days[&date(10)].steps, Some(dec!(10000)));
    }

    #[test]
    fn test_zero_only_steps_produce_no_day() {
        let records = quantity("StepCount", "2024-06-10 08:00:00 +0100", "0", "iPhone");
        let parsed = run(&records);
        assert!(parsed.days.is_empty());
        assert_eq!(parsed.stats.accepted_for(MetricKind::StepCount), 1);
    }

    #[test]
    fn test_weight_last_seen_wins() {
        let records = [
            quantity("BodyMass", "2024-06-10 21:00:00 +0100", "81.0", "Scale"),
            quantity("BodyMass", "2024-06-10 07:00:00 +0100", "80.2", "Scale"),
        ]
        .join("\n");

        let parsed = run(&records);
        assert_eq!(parsed.days[&date(10)].weight, Some(dec!(80.2)));
    }

    #[test]
    fn test_dietary_values_summed() {
        let records = [
            quantity("DietaryEnergyConsumed", "2024-06-10 08:00:00 +0100", "450", "MyFitnessPal"),
            quantity("DietaryEnergyConsumed", "2024-06-10 13:00:00 +0100", "700.5", "MyFitnessPal"),
            quantity("DietaryWater", "2024-06-10 09:00:00 +0100", "500", "WaterLog"),
            quantity("DietaryWater", "2024-06-10 15:00:00 +0100", "750", "WaterLog"),
        ]
        .join("\n");

        let day = &run(&records).days[&date(10)];
        assert_eq!(day.calories, Some(dec!(1150.5)));
        assert_eq!(day.water, Some(dec!(1250)));
        assert_eq!(day.weight, None);
        assert_eq!(day.sleep, None);
    }

    #[test]
    fn test_sleep_counts_asleep_stages_only() {
        let records = [
            sleep("2024-06-10 23:00:00 +0100", "2024-06-11 02:00:00 +0100", "AsleepCore"),
            sleep("2024-06-10 23:30:00 +0100", "2024-06-11 00:00:00 +0100", "AsleepREM"),
            sleep("2024-06-10 22:30:00 +0100", "2024-06-11 07:00:00 +0100", "InBed"),
            sleep("2024-06-10 02:00:00 +0100", "2024-06-10 02:15:00 +0100", "Awake"),
        ]
        .join("\n");

        let parsed = run(&records);
        assert_eq!(parsed.days[&date(10)].sleep, Some(dec!(3.5)));
        assert_eq!(parsed.stats.skipped_for(SkipReason::ExcludedSleepCategory), 2);
    }

    #[test]
    fn test_sleep_with_bad_timestamp_is_skipped() {
        let records = [
            sleep("2024-06-10 23:00:00 +0100", "not a time", "AsleepDeep"),
            sleep("2024-06-10 01:00:00 +0100", "2024-06-10 02:30:00 +0100", "AsleepDeep"),
        ]
        .join("\n");

        let parsed = run(&records);
        assert_eq!(parsed.days[&date(10)].sleep, Some(dec!(1.5)));
        assert_eq!(parsed.stats.skipped_for(SkipReason::BadTimestamp), 1);
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let records = [
            quantity("BodyMass", "2024-06-10 07:00:00 +0100", "heavy", "Scale"),
            quantity("HeartRate", "2024-06-10 07:00:00 +0100", "60", "Watch"),
            quantity("BodyMass", "", "80", "Scale"),
            quantity("BodyMass", "2023-01-01 07:00:00 +0100", "90", "Scale"),
            "<Record type=\"HKQuantityTypeIdentifierDietaryWater\" startDate=\"2024-06-10 07:00:00 +0100\"/>".to_string(),
        ]
        .join("\n");

        let parsed = run(&records);
        assert!(parsed.days.is_empty());
        assert_eq!(parsed.stats.records_seen, 5);
        assert_eq!(parsed.stats.skipped_for(SkipReason::BadValue), 2);
        assert_eq!(parsed.stats.skipped_for(SkipReason::UnknownType), 1);
        assert_eq!(parsed.stats.skipped_for(SkipReason::BadDate), 1);
        assert_eq!(parsed.stats.skipped_for(SkipReason::OutsideWindow), 1);
    }

    #[test]
    fn test_nested_records_are_ignored() {
        let records = format!(
            "{}\n<Correlation type=\"HKCorrelationTypeIdentifierFood\" startDate=\"2024-06-10 12:00:00 +0100\">\n{}\n</Correlation>",
            quantity("DietaryEnergyConsumed", "2024-06-10 12:00:00 +0100", "600", "Tracker"),
            quantity("DietaryEnergyConsumed", "2024-06-10 12:00:00 +0100", "600", "Tracker"),
        );

        let parsed = run(&records);
        assert_eq!(parsed.days[&date(10)].calories, Some(dec!(600)));
        assert_eq!(parsed.stats.skipped_for(SkipReason::Nested), 1);
    }

    #[test]
    fn test_record_with_metadata_children() {
        let records = "<Record type=\"HKQuantityTypeIdentifierBodyMass\" sourceName=\"Scale\" startDate=\"2024-06-12 07:00:00 +0100\" endDate=\"2024-06-12 07:00:00 +0100\" value=\"79.4\">\n<MetadataEntry key=\"HKWasUserEntered\" value=\"1\"/>\n</Record>";

        let parsed = run(records);
        assert_eq!(parsed.days[&date(12)].weight, Some(dec!(79.4)));
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let document = "<HealthData><Record type=\"x\"></Workout></HealthData>";
        assert!(matches!(
            parse(document.as_bytes(), window()),
            Err(ImportError::Xml { .. })
        ));
    }

    #[test]
    fn test_escaped_source_names() {
        let records = [
            quantity("StepCount", "2024-06-10 08:00:00 +0100", "3000", "Anna&apos;s iPhone"),
            quantity("StepCount", "2024-06-10 08:00:00 +0100", "5000", "Anna&apos;s Watch"),
        ]
        .join("\n");

        let parsed = run(&records);
        assert_eq!(parsed.days[&date(10)].steps, Some(dec!(4000)));
    }

    #[test]
    fn test_sum_leaving_decimal_range_skips_record() {
        let huge = "50000000000000000000000000000";
        let records = [
            quantity("DietaryWater", "2024-06-10 09:00:00 +0100", huge, "WaterLog"),
            quantity("DietaryWater", "2024-06-10 15:00:00 +0100", huge, "WaterLog"),
            quantity("StepCount", "2024-06-10 08:00:00 +0100", huge, "iPhone"),
            quantity("StepCount", "2024-06-10 18:00:00 +0100", huge, "iPhone"),
            quantity("DietaryEnergyConsumed", "2024-06-10 08:00:00 +0100", "1800", "Tracker"),
        ]
        .join("\n");

        let parsed = run(&records);
        let day = &parsed.days[&date(10)];
        assert_eq!(day.water, parse_decimal(huge));
        assert_eq!(day.steps, parse_decimal(huge));
        assert_eq!(day.calories, Some(dec!(1800)));
        assert_eq!(parsed.stats.skipped_for(SkipReason::BadValue), 2);
    }

    #[test]
    fn test_step_mean_leaving_decimal_range_drops_steps() {
        let huge = "50000000000000000000000000000";
        let records = [
            quantity("StepCount", "2024-06-10 08:00:00 +0100", huge, "iPhone"),
            quantity("StepCount", "2024-06-10 08:00:00 +0100", huge, "Watch"),
            quantity("BodyMass", "2024-06-10 07:00:00 +0100", "80", "Scale"),
        ]
        .join("\n");

        let day = &run(&records).days[&date(10)];
        assert_eq!(day.steps, None);
        assert_eq!(day.weight, Some(dec!(80)));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-06-10 23:00:00 +0100").is_some());
        assert!(parse_timestamp("2024-06-10T23:00:00+01:00").is_some());
        assert!(parse_timestamp("2024-06-10 23:00:00").is_some());
        assert!(parse_timestamp("10/06/2024").is_none());
    }
}
