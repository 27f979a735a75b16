use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::models::{DailyRow, DailyValues};

/// Turn per-date values into date-ordered rows
///
/// Weight is carried forward to days without a weigh-in and leading days are
/// back-filled from the first weigh-in. Every other metric stays `None` when it
/// was not recorded. An empty map gives an empty vec, which callers treat as
/// insufficient data.
pub fn aggregate(days: &BTreeMap<NaiveDate, DailyValues>) -> Vec<DailyRow> {
    let mut rows: Vec<DailyRow> = days
        .iter()
        .map(|(date, values)| DailyRow::new(*date, values.clone()))
        .collect();

    fill_weight(&mut rows);
    rows
}

/// Forward fill, then back fill, the weight column
fn fill_weight(rows: &mut [DailyRow]) {
    let mut last_seen: Option<Decimal> = None;
    for row in rows.iter_mut() {
        match row.values.weight {
            Some(weight) => last_seen = Some(weight),
            None => row.values.weight = last_seen,
        }
    }

    let first_known = rows.iter().find_map(|row| row.values.weight);
    for row in rows.iter_mut() {
        if row.values.weight.is_some() {
            break;
        }
        row.values.weight = first_known;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn values(weight: Option<Decimal>, calories: Option<Decimal>) -> DailyValues {
        DailyValues {
            weight,
            calories,
            ..DailyValues::default()
        }
    }

    #[test]
    fn test_rows_sorted_by_date() {
        let mut days = BTreeMap::new();
        days.insert(date(3), values(None, Some(dec!(2000))));
        days.insert(date(1), values(None, Some(dec!(2100))));
        days.insert(date(2), values(None, Some(dec!(2200))));

        let rows = aggregate(&days);
        let dates: Vec<NaiveDate> = rows.iter().map(|row| row.date).collect();
        assert_eq!(dates, vec![date(1), date(2), date(3)]);
    }

    #[test]
    fn test_weight_forward_and_back_fill() {
        let mut days = BTreeMap::new();
        // Calories start before the first weigh-in
        days.insert(date(1), values(None, Some(dec!(2000))));
        days.insert(date(2), values(Some(dec!(82.0)), None));
        for day in 3..=10 {
            days.insert(date(day), values(None, Some(dec!(1900))));
        }
        days.insert(date(11), values(Some(dec!(81.0)), None));
        days.insert(date(12), values(None, Some(dec!(2050))));

        let rows = aggregate(&days);
        assert_eq!(rows[0].values.weight, Some(dec!(82.0)));
        for row in &rows[1..10] {
            assert_eq!(row.values.weight, Some(dec!(82.0)));
        }
        assert_eq!(rows[10].values.weight, Some(dec!(81.0)));
        assert_eq!(rows[11].values.weight, Some(dec!(81.0)));
    }

    #[test]
    fn test_other_metrics_not_filled() {
        let mut days = BTreeMap::new();
        days.insert(date(1), values(Some(dec!(80)), Some(dec!(2000))));
        days.insert(date(2), values(None, None));

        let rows = aggregate(&days);
        assert_eq!(rows[1].values.calories, None);
        assert_eq!(rows[1].values.steps, None);
        assert_eq!(rows[1].values.weight, Some(dec!(80)));
    }

    #[test]
    fn test_no_weight_anywhere() {
        let mut days = BTreeMap::new();
        days.insert(date(1), values(None, Some(dec!(2000))));
        days.insert(date(2), values(None, Some(dec!(2100))));

        let rows = aggregate(&days);
        assert!(rows.iter().all(|row| row.values.weight.is_none()));
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate(&BTreeMap::new()).is_empty());
    }
}
