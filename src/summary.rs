//! Client dashboard view of a finished table

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::{checked_mean, DailyRow, DailyTable, Recommendation, Targets};
use crate::scoring::deviation;

/// Share of the water target that counts as a compliant day
pub const HYDRATION_COMPLIANCE_RATIO: Decimal = dec!(0.9);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrationSummary {
    pub latest_water: Decimal,
    /// Latest daily water against target, in percent
    pub latest_deviation: Option<Decimal>,
    pub latest_average: Option<Decimal>,
    pub target: Decimal,
    pub compliant_days: usize,
    pub days_with_water: usize,
}

/// Averages over one observation period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub avg_weight: Option<Decimal>,
    pub avg_calories: Option<Decimal>,
    pub avg_steps: Option<Decimal>,
    pub avg_sleep: Option<Decimal>,
    pub avg_score: Option<Decimal>,
    /// Last weight trend seen in the period
    pub weight_change: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: NaiveDate,
    pub period_label: Option<String>,
    pub weight_avg: Option<Decimal>,
    pub calories_avg: Option<Decimal>,
    pub steps_avg: Option<Decimal>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub days: usize,
    /// Last scored row, or the last row when nothing was scored
    pub latest: Option<DailyRow>,
    pub hydration: Option<HydrationSummary>,
    pub periods: Vec<PeriodSummary>,
    /// Actionable recommendations, newest first
    pub history: Vec<HistoryEntry>,
}

impl DashboardSummary {
    pub fn from_table(table: &DailyTable, targets: &Targets) -> Self {
        let rows = table.rows();

        let latest = rows
            .iter()
            .rev()
            .find(|row| row.composite_score.is_some())
            .or_else(|| rows.last())
            .cloned();

        DashboardSummary {
            first_date: table.first_date(),
            last_date: table.last_date(),
            days: table.len(),
            latest,
            hydration: hydration(rows, targets.water),
            periods: periods(rows),
            history: history(rows),
        }
    }

    pub fn latest_recommendation(&self) -> Option<Recommendation> {
        self.latest.as_ref().and_then(|row| row.recommendation)
    }

    /// Mean composite score per period, in period order
    pub fn period_scores(&self) -> Vec<(&str, Option<Decimal>)> {
        self.periods
            .iter()
            .map(|period| (period.label.as_str(), period.avg_score))
            .collect()
    }
}

fn mean(values: impl Iterator<Item = Option<Decimal>>) -> Option<Decimal> {
    checked_mean(values.flatten())
}

fn hydration(rows: &[DailyRow], target: Decimal) -> Option<HydrationSummary> {
    let latest_water = rows.iter().rev().find_map(|row| row.values.water)?;
    let threshold = target * HYDRATION_COMPLIANCE_RATIO;

    Some(HydrationSummary {
        latest_water,
        latest_deviation: deviation(Some(latest_water), target),
        latest_average: rows.iter().rev().find_map(|row| row.averages.water),
        target,
        compliant_days: rows
            .iter()
            .filter_map(|row| row.values.water)
            .filter(|water| *water >= threshold)
            .count(),
        days_with_water: rows.iter().filter(|row| row.values.water.is_some()).count(),
    })
}

fn periods(rows: &[DailyRow]) -> Vec<PeriodSummary> {
    let mut grouped: Vec<(u32, Vec<&DailyRow>)> = Vec::new();
    for row in rows {
        let Some(period) = row.period else {
            continue;
        };
        match grouped.last_mut() {
            Some((current, members)) if *current == period => members.push(row),
            _ => grouped.push((period, vec![row])),
        }
    }

    grouped
        .into_iter()
        .filter_map(|(period, members)| {
            let first = members.first()?;
            let last = members.last()?;
            Some(PeriodSummary {
                label: first
                    .period_label
                    .clone()
                    .unwrap_or_else(|| crate::features::period_label(period)),
                start: first.date,
                end: last.date,
                avg_weight: mean(members.iter().map(|row| row.averages.weight)),
                avg_calories: mean(members.iter().map(|row| row.averages.calories)),
                avg_steps: mean(members.iter().map(|row| row.averages.steps)),
                avg_sleep: mean(members.iter().map(|row| row.averages.sleep)),
                avg_score: mean(members.iter().map(|row| row.composite_score)),
                weight_change: members.iter().rev().find_map(|row| row.weight_pct_change),
            })
        })
        .collect()
}

fn history(rows: &[DailyRow]) -> Vec<HistoryEntry> {
    rows.iter()
        .rev()
        .filter_map(|row| {
            let recommendation = row.recommendation.filter(|rec| rec.is_actionable())?;
            Some(HistoryEntry {
                date: row.date,
                period_label: row.period_label.clone(),
                weight_avg: row.averages.weight,
                calories_avg: row.averages.calories,
                steps_avg: row.averages.steps,
                recommendation,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DailyValues;
    use chrono::Days;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 1).unwrap()
    }

    fn row(offset: u64, water: Option<Decimal>, score: Option<Decimal>) -> DailyRow {
        let mut row = DailyRow::new(
            start() + Days::new(offset),
            DailyValues {
                water,
                ..DailyValues::default()
            },
        );
        let period = (offset / 14) as u32 + 1;
        row.period = Some(period);
        row.period_label = Some(format!("Period {}", period));
        row.averages.water = water;
        row.composite_score = score;
        row.recommendation = Some(if score.is_some() {
            Recommendation::MonitorTrend
        } else {
            Recommendation::InsufficientData
        });
        row
    }

    #[test]
    fn test_latest_prefers_scored_row() {
        let table = DailyTable::new(vec![
            row(0, None, None),
            row(1, None, Some(dec!(2.5))),
            row(2, None, None),
        ]);
        let summary = DashboardSummary::from_table(&table, &Targets::default());

        assert_eq!(summary.days, 3);
        assert_eq!(summary.latest.unwrap().date, start() + Days::new(1));
        assert_eq!(summary.first_date, Some(start()));
        assert_eq!(summary.last_date, Some(start() + Days::new(2)));
    }

    #[test]
    fn test_latest_falls_back_to_last_row() {
        let table = DailyTable::new(vec![row(0, None, None), row(1, None, None)]);
        let summary = DashboardSummary::from_table(&table, &Targets::default());

        assert_eq!(summary.latest.as_ref().unwrap().date, start() + Days::new(1));
        assert_eq!(summary.latest_recommendation(), Some(Recommendation::InsufficientData));
        assert!(summary.history.is_empty());
    }

    #[test]
    fn test_hydration_compliance() {
        // Target 2500 → compliant from 2250 ml
        let table = DailyTable::new(vec![
            row(0, Some(dec!(2250)), None),
            row(1, Some(dec!(2249)), None),
            row(2, None, None),
            row(3, Some(dec!(3000)), None),
            row(4, Some(dec!(2000)), None),
        ]);
        let hydration = DashboardSummary::from_table(&table, &Targets::default())
            .hydration
            .unwrap();

        assert_eq!(hydration.compliant_days, 2);
        assert_eq!(hydration.days_with_water, 4);
        assert_eq!(hydration.latest_water, dec!(2000));
        assert_eq!(hydration.latest_deviation, Some(dec!(-20)));
    }

    #[test]
    fn test_no_water_data() {
        let table = DailyTable::new(vec![row(0, None, Some(dec!(1)))]);
        assert!(DashboardSummary::from_table(&table, &Targets::default())
            .hydration
            .is_none());
    }

    #[test]
    fn test_period_scores() {
        let table = DailyTable::new(vec![
            row(0, None, None),
            row(1, None, Some(dec!(2))),
            row(2, None, Some(dec!(4))),
            row(14, None, Some(dec!(1))),
            row(20, None, None),
        ]);
        let summary = DashboardSummary::from_table(&table, &Targets::default());

        assert_eq!(
            summary.period_scores(),
            vec![("Period 1", Some(dec!(3))), ("Period 2", Some(dec!(1)))]
        );
        assert_eq!(summary.periods[1].start, start() + Days::new(14));
        assert_eq!(summary.periods[1].end, start() + Days::new(20));
    }

    #[test]
    fn test_history_newest_first() {
        let table = DailyTable::new(vec![
            row(0, None, None),
            row(1, None, Some(dec!(2))),
            row(2, None, Some(dec!(4))),
        ]);
        let summary = DashboardSummary::from_table(&table, &Targets::default());

        let dates: Vec<NaiveDate> = summary.history.iter().map(|entry| entry.date).collect();
        assert_eq!(dates, vec![start() + Days::new(2), start() + Days::new(1)]);
    }

    #[test]
    fn test_empty_table() {
        let summary = DashboardSummary::from_table(&DailyTable::default(), &Targets::default());
        assert_eq!(summary.days, 0);
        assert!(summary.latest.is_none());
        assert!(summary.periods.is_empty());
    }
}
