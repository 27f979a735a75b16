use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{DailyRow, Targets};

/// Composite score weights; they sum to one
pub const WEIGHT_TREND_WEIGHT: Decimal = dec!(0.35);
pub const CALORIES_WEIGHT: Decimal = dec!(0.25);
pub const STEPS_WEIGHT: Decimal = dec!(0.15);
pub const WATER_WEIGHT: Decimal = dec!(0.15);
pub const SLEEP_WEIGHT: Decimal = dec!(0.10);

/// Signed percentage difference between an average and its target
///
/// `None` when there is no average or the target cannot be divided by.
pub fn deviation(average: Option<Decimal>, target: Decimal) -> Option<Decimal> {
    let average = average?;
    if target <= Decimal::ZERO {
        return None;
    }
    average
        .checked_sub(target)?
        .checked_div(target)?
        .checked_mul(Decimal::ONE_HUNDRED)
}

/// `weight * |term|`, or `None` when the product leaves `Decimal`'s range
fn weighted(weight: Decimal, term: Option<Decimal>) -> Option<Decimal> {
    weight.checked_mul(term?.abs())
}

/// Weighted sum of absolute deviations; lower is better
///
/// A missing term makes the whole score missing.
pub fn composite_score(row: &DailyRow, targets: &Targets) -> Option<Decimal> {
    let weight_gap = row
        .weight_pct_change?
        .checked_sub(targets.weight_change_pct_per_week)?;

    [
        weighted(WEIGHT_TREND_WEIGHT, Some(weight_gap))?,
        weighted(CALORIES_WEIGHT, row.cal_dev)?,
        weighted(STEPS_WEIGHT, row.steps_dev)?,
        weighted(WATER_WEIGHT, row.water_dev)?,
        weighted(SLEEP_WEIGHT, row.sleep_dev)?,
    ]
    .into_iter()
    .try_fold(Decimal::ZERO, Decimal::checked_add)
}

/// Add deviation columns and the composite score
pub fn score(rows: Vec<DailyRow>, targets: &Targets) -> Vec<DailyRow> {
    rows.into_iter()
        .map(|mut row| {
            row.cal_dev = deviation(row.averages.calories, targets.calories);
            row.steps_dev = deviation(row.averages.steps, targets.steps);
            row.water_dev = deviation(row.averages.water, targets.water);
            row.sleep_dev = deviation(row.averages.sleep, targets.sleep);
            row.composite_score = composite_score(&row, targets);
            row
        })
        .collect()
}
