use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoachError, Result};

/// Health metrics recognised in an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    StepCount,
    BodyMass,
    DietaryEnergyConsumed,
    DietaryWater,
    SleepAnalysis,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::BodyMass,
        MetricKind::DietaryEnergyConsumed,
        MetricKind::StepCount,
        MetricKind::DietaryWater,
        MetricKind::SleepAnalysis,
    ];

    /// Map an export `type` attribute to a metric kind
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        match identifier {
            "HKQuantityTypeIdentifierStepCount" => Some(MetricKind::StepCount),
            "HKQuantityTypeIdentifierBodyMass" => Some(MetricKind::BodyMass),
            "HKQuantityTypeIdentifierDietaryEnergyConsumed" => {
                Some(MetricKind::DietaryEnergyConsumed)
            }
            "HKQuantityTypeIdentifierDietaryWater" => Some(MetricKind::DietaryWater),
            "HKCategoryTypeIdentifierSleepAnalysis" => Some(MetricKind::SleepAnalysis),
            _ => None,
        }
    }

    /// Export identifier for this metric
    pub fn identifier(&self) -> &'static str {
        match self {
            MetricKind::StepCount => "HKQuantityTypeIdentifierStepCount",
            MetricKind::BodyMass => "HKQuantityTypeIdentifierBodyMass",
            MetricKind::DietaryEnergyConsumed => "HKQuantityTypeIdentifierDietaryEnergyConsumed",
            MetricKind::DietaryWater => "HKQuantityTypeIdentifierDietaryWater",
            MetricKind::SleepAnalysis => "HKCategoryTypeIdentifierSleepAnalysis",
        }
    }

    /// Column name of the daily value in the output table
    pub fn column(&self) -> &'static str {
        match self {
            MetricKind::StepCount => "steps",
            MetricKind::BodyMass => "weight",
            MetricKind::DietaryEnergyConsumed => "calories",
            MetricKind::DietaryWater => "water",
            MetricKind::SleepAnalysis => "sleep",
        }
    }

    /// Whether the record carries a category instead of a number
    pub fn is_category(&self) -> bool {
        matches!(self, MetricKind::SleepAnalysis)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Sleep analysis category values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SleepCategory {
    AsleepCore,
    AsleepRem,
    AsleepDeep,
    AsleepUnspecified,
    InBed,
    Awake,
}

impl SleepCategory {
    pub fn from_value(value: &str) -> Option<Self> {
        match value {
            "HKCategoryValueSleepAnalysisAsleepCore" => Some(SleepCategory::AsleepCore),
            "HKCategoryValueSleepAnalysisAsleepREM" => Some(SleepCategory::AsleepRem),
            "HKCategoryValueSleepAnalysisAsleepDeep" => Some(SleepCategory::AsleepDeep),
            "HKCategoryValueSleepAnalysisAsleep" => Some(SleepCategory::AsleepUnspecified),
            "HKCategoryValueSleepAnalysisInBed" => Some(SleepCategory::InBed),
            "HKCategoryValueSleepAnalysisAwake" => Some(SleepCategory::Awake),
            _ => None,
        }
    }

    /// Only these stages count towards daily sleep
    pub fn is_asleep(&self) -> bool {
        matches!(
            self,
            SleepCategory::AsleepCore
                | SleepCategory::AsleepRem
                | SleepCategory::AsleepDeep
                | SleepCategory::AsleepUnspecified
        )
    }
}

/// One `Record` element lifted out of the export
///
/// Lives only while its element is being handled by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub kind: MetricKind,
    pub start_date: String,
    pub end_date: Option<String>,
    /// Numeric value for quantity records
    pub value: Option<Decimal>,
    /// Categorical value for category records (sleep)
    pub category_value: Option<String>,
    pub source: String,
}

impl RawRecord {
    /// Calendar day taken from the first ten characters of `startDate`
    pub fn date(&self) -> Option<NaiveDate> {
        let prefix = self.start_date.get(..10)?;
        NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
    }
}

/// Parse a numeric attribute, accepting plain and scientific notation
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

/// Arithmetic mean; `None` for no values or when the sum leaves `Decimal`'s range
pub fn checked_mean(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    let mut count: u64 = 0;
    let sum = values.into_iter().try_fold(Decimal::ZERO, |sum, value| {
        count += 1;
        sum.checked_add(value)
    })?;
    if count == 0 {
        return None;
    }
    sum.checked_div(Decimal::from(count))
}

/// Raw daily values for a single calendar date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyValues {
    /// Body mass in kg (last weigh-in of the day)
    pub weight: Option<Decimal>,
    /// Dietary energy in kcal
    pub calories: Option<Decimal>,
    /// Step count, averaged over non-zero sources
    pub steps: Option<Decimal>,
    /// Water in ml
    pub water: Option<Decimal>,
    /// Sleep in hours
    pub sleep: Option<Decimal>,
}

impl DailyValues {
    pub fn get(&self, kind: MetricKind) -> Option<Decimal> {
        match kind {
            MetricKind::BodyMass => self.weight,
            MetricKind::DietaryEnergyConsumed => self.calories,
            MetricKind::StepCount => self.steps,
            MetricKind::DietaryWater => self.water,
            MetricKind::SleepAnalysis => self.sleep,
        }
    }

    pub fn set(&mut self, kind: MetricKind, value: Option<Decimal>) {
        match kind {
            MetricKind::BodyMass => self.weight = value,
            MetricKind::DietaryEnergyConsumed => self.calories = value,
            MetricKind::StepCount => self.steps = value,
            MetricKind::DietaryWater => self.water = value,
            MetricKind::SleepAnalysis => self.sleep = value,
        }
    }

    /// True if no metric received a value on this date
    pub fn is_empty(&self) -> bool {
        MetricKind::ALL.iter().all(|kind| self.get(*kind).is_none())
    }
}

/// One output row of the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRow {
    pub date: NaiveDate,

    pub values: DailyValues,
    /// Trailing rolling means of the daily values
    pub averages: DailyValues,

    /// Days since the first retained date
    pub day_in_cycle: Option<i64>,
    /// 1-based observation period index
    pub period: Option<u32>,
    pub period_label: Option<String>,

    /// Percent change of the weight average over one window
    pub weight_pct_change: Option<Decimal>,

    pub cal_dev: Option<Decimal>,
    pub steps_dev: Option<Decimal>,
    pub water_dev: Option<Decimal>,
    pub sleep_dev: Option<Decimal>,

    pub composite_score: Option<Decimal>,
    pub recommendation: Option<Recommendation>,
}

impl DailyRow {
    /// Row carrying only raw daily values
    pub fn new(date: NaiveDate, values: DailyValues) -> Self {
        DailyRow {
            date,
            values,
            averages: DailyValues::default(),
            day_in_cycle: None,
            period: None,
            period_label: None,
            weight_pct_change: None,
            cal_dev: None,
            steps_dev: None,
            water_dev: None,
            sleep_dev: None,
            composite_score: None,
            recommendation: None,
        }
    }
}

/// Ordered, immutable pipeline output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyTable {
    rows: Vec<DailyRow>,
}

impl DailyTable {
    pub fn new(rows: Vec<DailyRow>) -> Self {
        debug_assert!(Self::is_strictly_increasing(&rows));
        DailyTable { rows }
    }

    /// Dates must be strictly increasing (no duplicates)
    pub fn is_strictly_increasing(rows: &[DailyRow]) -> bool {
        rows.windows(2).all(|pair| pair[0].date < pair[1].date)
    }

    pub fn rows(&self) -> &[DailyRow] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DailyRow> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// An empty table means there was not enough data in the window
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|row| row.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|row| row.date)
    }

    pub fn into_rows(self) -> Vec<DailyRow> {
        self.rows
    }
}

impl<'a> IntoIterator for &'a DailyTable {
    type Item = &'a DailyRow;
    type IntoIter = std::slice::Iter<'a, DailyRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Per-client numeric targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targets {
    /// Daily calories in kcal
    pub calories: Decimal,
    /// Daily steps
    pub steps: Decimal,
    /// Daily water in ml
    pub water: Decimal,
    /// Nightly sleep in hours
    pub sleep: Decimal,
    /// Weekly weight change in percent (negative means loss)
    pub weight_change_pct_per_week: Decimal,
}

impl Default for Targets {
    fn default() -> Self {
        Targets {
            calories: Decimal::from(2500),
            steps: Decimal::from(8000),
            water: Decimal::from(2500),
            sleep: Decimal::new(75, 1),
            weight_change_pct_per_week: Decimal::new(-75, 2),
        }
    }
}

impl Targets {
    /// Behavioural targets are divisors in the deviation formula and must be positive
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("calories", self.calories),
            ("steps", self.steps),
            ("water", self.water),
            ("sleep", self.sleep),
        ];

        for (name, value) in checks {
            if value <= Decimal::ZERO {
                return Err(CoachError::Configuration(format!(
                    "target {} must be positive, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// Daily recommendation labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "Insufficient data")]
    InsufficientData,
    #[serde(rename = "aligned, hold steady")]
    HoldSteady,
    #[serde(rename = "loss too slow, reduce calories")]
    LossTooSlow,
    #[serde(rename = "loss too aggressive, increase calories")]
    LossTooAggressive,
    #[serde(rename = "sleep deficit, prioritise recovery")]
    SleepDeficit,
    #[serde(rename = "under-hydrated, increase water")]
    UnderHydrated,
    #[serde(rename = "monitor trend, small adjustments")]
    MonitorTrend,
}

impl Recommendation {
    pub const ALL: [Recommendation; 7] = [
        Recommendation::InsufficientData,
        Recommendation::HoldSteady,
        Recommendation::LossTooSlow,
        Recommendation::LossTooAggressive,
        Recommendation::SleepDeficit,
        Recommendation::UnderHydrated,
        Recommendation::MonitorTrend,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::InsufficientData => "Insufficient data",
            Recommendation::HoldSteady => "aligned, hold steady",
            Recommendation::LossTooSlow => "loss too slow, reduce calories",
            Recommendation::LossTooAggressive => "loss too aggressive, increase calories",
            Recommendation::SleepDeficit => "sleep deficit, prioritise recovery",
            Recommendation::UnderHydrated => "under-hydrated, increase water",
            Recommendation::MonitorTrend => "monitor trend, small adjustments",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Recommendation::InsufficientData)
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Recommendation::ALL
            .iter()
            .copied()
            .find(|rec| rec.label() == s)
            .ok_or_else(|| format!("Unknown recommendation: {}", s))
    }
}
