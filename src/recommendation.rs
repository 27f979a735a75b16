use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{DailyRow, Recommendation, Targets};

/// Score below which behaviour counts as aligned, and the allowed distance of
/// the weight trend from its target
pub const TOLERANCE: Decimal = dec!(0.3);

/// Deviation (percent) below which sleep or water is flagged
pub const DEFICIT_THRESHOLD: Decimal = dec!(-20);

/// Pick the recommendation for one day
///
/// Rules are checked in order and the first match wins, so a slow weight trend
/// is reported before a sleep or hydration deficit.
pub fn recommend(row: &DailyRow, targets: &Targets) -> Recommendation {
    let (Some(score), Some(weight_change)) = (row.composite_score, row.weight_pct_change) else {
        return Recommendation::InsufficientData;
    };
    let target = targets.weight_change_pct_per_week;

    if score < TOLERANCE {
        Recommendation::HoldSteady
    } else if target
        .checked_add(TOLERANCE)
        .is_some_and(|upper| weight_change > upper)
    {
        Recommendation::LossTooSlow
    } else if target
        .checked_sub(TOLERANCE)
        .is_some_and(|lower| weight_change < lower)
    {
        Recommendation::LossTooAggressive
    } else if row.sleep_dev.unwrap_or(Decimal::ZERO) < DEFICIT_THRESHOLD {
        Recommendation::SleepDeficit
    } else if row.water_dev.unwrap_or(Decimal::ZERO) < DEFICIT_THRESHOLD {
        Recommendation::UnderHydrated
    } else {
        Recommendation::MonitorTrend
    }
}

/// Attach a recommendation to every row
pub fn apply(rows: Vec<DailyRow>, targets: &Targets) -> Vec<DailyRow> {
    rows.into_iter()
        .map(|mut row| {
            row.recommendation = Some(recommend(&row, targets));
            row
        })
        .collect()
}
