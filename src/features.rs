use rust_decimal::Decimal;

use crate::models::{checked_mean, DailyRow, MetricKind};

/// Default length of the rolling window and of an observation period, in days
pub const DEFAULT_WINDOW_SIZE: usize = 14;

/// Add rolling averages, period labels and the weight trend
///
/// `window_size` drives three things at once: the trailing mean, the length of
/// an observation period and the row offset of `weight_pct_change`.
pub fn build_features(mut rows: Vec<DailyRow>, window_size: usize) -> Vec<DailyRow> {
    let window_size = window_size.max(1);

    for kind in MetricKind::ALL {
        let series: Vec<Option<Decimal>> = rows.iter().map(|row| row.values.get(kind)).collect();
        for (row, average) in rows.iter_mut().zip(rolling_mean(&series, window_size)) {
            row.averages.set(kind, average);
        }
    }

    label_periods(&mut rows, window_size);

    let weight_averages: Vec<Option<Decimal>> =
        rows.iter().map(|row| row.averages.weight).collect();
    for (row, change) in rows
        .iter_mut()
        .zip(pct_change(&weight_averages, window_size))
    {
        row.weight_pct_change = change;
    }

    rows
}

/// Trailing mean over `window` slots with a minimum of one observation
///
/// Missing values take up a slot but are left out of the denominator.
pub fn rolling_mean(series: &[Option<Decimal>], window: usize) -> Vec<Option<Decimal>> {
    let window = window.max(1);

    (0..series.len())
        .map(|end| {
            let start = (end + 1).saturating_sub(window);
            checked_mean(series[start..=end].iter().flatten().copied())
        })
        .collect()
}

/// Percent change against the value `periods` rows earlier
pub fn pct_change(series: &[Option<Decimal>], periods: usize) -> Vec<Option<Decimal>> {
    (0..series.len())
        .map(|index| {
            let previous = index.checked_sub(periods).and_then(|i| series[i])?;
            let current = series[index]?;
            if previous.is_zero() {
                return None;
            }
            current
                .checked_div(previous)?
                .checked_sub(Decimal::ONE)?
                .checked_mul(Decimal::ONE_HUNDRED)
        })
        .collect()
}

/// Fixed-size, non-overlapping periods anchored at the first date
fn label_periods(rows: &mut [DailyRow], window_size: usize) {
    let Some(first_date) = rows.first().map(|row| row.date) else {
        return;
    };

    for row in rows.iter_mut() {
        let day_in_cycle = (row.date - first_date).num_days();
        let period = (day_in_cycle as usize / window_size) as u32 + 1;
        row.day_in_cycle = Some(day_in_cycle);
        row.period = Some(period);
        row.period_label = Some(period_label(period));
    }
}

pub fn period_label(period: u32) -> String {
    format!("Period {}", period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DailyValues;
    use chrono::{Days, NaiveDate};
    use rust_decimal_macros::dec;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn row(offset: u64, weight: Option<Decimal>, steps: Option<Decimal>) -> DailyRow {
        DailyRow::new(
            start() + Days::new(offset),
            DailyValues {
                weight,
                steps,
                ..DailyValues::default()
            },
        )
    }

    #[test]
    fn test_rolling_mean_expanding_start() {
        let series: Vec<Option<Decimal>> = (1..=20).map(|v| Some(Decimal::from(v))).collect();
        let means = rolling_mean(&series, 14);

        assert_eq!(means[0], Some(dec!(1)));
        assert_eq!(means[1], Some(dec!(1.5)));
        // Day 20 (index 19): mean of 7..=20
        let expected: Decimal = (7..=20).map(Decimal::from).sum::<Decimal>() / Decimal::from(14);
        assert_eq!(means[19], Some(expected));
        assert_eq!(means[19], Some(dec!(13.5)));
    }

    #[test]
    fn test_rolling_mean_skips_missing() {
        let series = vec![Some(dec!(10)), None, Some(dec!(20)), None, None];
        let means = rolling_mean(&series, 3);

        assert_eq!(means[0], Some(dec!(10)));
        assert_eq!(means[1], Some(dec!(10)));
        assert_eq!(means[2], Some(dec!(15)));
        assert_eq!(means[3], Some(dec!(20)));
        assert_eq!(means[4], None);
    }

    #[test]
    fn test_pct_change_row_offset() {
        let series = vec![Some(dec!(100)), Some(dec!(90)), Some(dec!(99)), None];
        let changes = pct_change(&series, 1);

        assert_eq!(changes[0], None);
        assert_eq!(changes[1], Some(dec!(-10)));
        assert_eq!(changes[2], Some(dec!(10)));
        assert_eq!(changes[3], None);
    }

    #[test]
    fn test_pct_change_zero_base() {
        let changes = pct_change(&[Some(Decimal::ZERO), Some(dec!(5))], 1);
        assert_eq!(changes[1], None);
    }

    #[test]
    fn test_pct_change_out_of_range_is_none() {
        let tiny = dec!(0.0000000000000000000000000001);
        let changes = pct_change(&[Some(tiny), Some(dec!(80)), Some(dec!(80))], 1);
        assert_eq!(changes[1], None);
        assert_eq!(changes[2], Some(dec!(0)));
    }

    #[test]
    fn test_tiny_first_weight_does_not_break_trend() {
        let mut rows = vec![row(0, Some(dec!(0.0000000000000000000000000001)), None)];
        rows.extend((1..20).map(|i| row(i, Some(dec!(80)), None)));

        let rows = build_features(rows, 14);
        assert_eq!(rows.len(), 20);
        assert!(rows[19].weight_pct_change.is_some());
    }

    #[test]
    fn test_rolling_mean_out_of_range_is_none() {
        let means = rolling_mean(&[Some(Decimal::MAX), Some(Decimal::MAX)], 2);
        assert_eq!(means[0], Some(Decimal::MAX));
        assert_eq!(means[1], None);
    }

    #[test]
    fn test_period_labels_anchor_on_first_date() {
        // Gap between day 3 and day 15 still counts calendar days
        let rows = vec![
            row(0, Some(dec!(80)), None),
            row(3, Some(dec!(80)), None),
            row(13, Some(dec!(80)), None),
            row(14, Some(dec!(80)), None),
            row(29, Some(dec!(80)), None),
        ];

        let rows = build_features(rows, 14);
        let labels: Vec<&str> = rows
            .iter()
            .map(|row| row.period_label.as_deref().unwrap())
            .collect();
        assert_eq!(
            labels,
            vec!["Period 1", "Period 1", "Period 1", "Period 2", "Period 3"]
        );
        assert_eq!(rows[4].day_in_cycle, Some(29));
    }

    #[test]
    fn test_weight_pct_change_undefined_for_first_window() {
        let rows: Vec<DailyRow> = (0..20)
            .map(|i| row(i, Some(dec!(100) - Decimal::from(i)), Some(dec!(8000))))
            .collect();

        let rows = build_features(rows, 14);
        assert!(rows[..14].iter().all(|row| row.weight_pct_change.is_none()));
        assert!(rows[14..].iter().all(|row| row.weight_pct_change.is_some()));
        // Losing weight every day means a negative trend
        assert!(rows[19].weight_pct_change.unwrap() < Decimal::ZERO);
    }

    #[test]
    fn test_averages_per_metric() {
        let rows = vec![
            row(0, Some(dec!(80)), Some(dec!(6000))),
            row(1, Some(dec!(82)), None),
            row(2, Some(dec!(84)), Some(dec!(10000))),
        ];

        let rows = build_features(rows, 14);
        assert_eq!(rows[2].averages.weight, Some(dec!(82)));
        assert_eq!(rows[1].averages.steps, Some(dec!(6000)));
        assert_eq!(rows[2].averages.steps, Some(dec!(8000)));
        assert_eq!(rows[2].averages.water, None);
    }
}
