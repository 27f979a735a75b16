use chrono::{Days, NaiveDate};
use coachrs::export::{from_csv_str, to_csv_string};
use coachrs::{run_bytes, PipelineConfig, Recommendation, Targets};
use proptest::prelude::*;

/// Invariants that hold for any export, checked over random record sets

const KINDS: [&str; 4] = [
    "HKQuantityTypeIdentifierBodyMass",
    "HKQuantityTypeIdentifierDietaryEnergyConsumed",
    "HKQuantityTypeIdentifierStepCount",
    "HKQuantityTypeIdentifierDietaryWater",
];

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 10, 31).unwrap()
}

/// (days before today, kind, value, source)
fn records() -> impl Strategy<Value = Vec<(u64, usize, u32, usize)>> {
    prop::collection::vec((0u64..130, 0usize..KINDS.len(), 0u32..12_000, 0usize..3), 0..200)
}

fn export(records: &[(u64, usize, u32, usize)]) -> String {
    let mut xml = String::from("<HealthData>\n");
    for (offset, kind, value, source) in records {
        let date = today() - Days::new(*offset);
        xml.push_str(&format!(
            "<Record type=\"{}\" sourceName=\"Source {}\" startDate=\"{} 09:00:00 +0000\" value=\"{}\"/>\n",
            KINDS[*kind], source, date, value
        ));
    }
    xml.push_str("</HealthData>\n");
    xml
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn dates_are_strictly_increasing_within_window(records in records(), retention in 1u32..100) {
        let config = PipelineConfig {
            retention_days: retention,
            ..PipelineConfig::with_today(today())
        };
        let output = run_bytes(export(&records).as_bytes(), &Targets::default(), &config).unwrap();
        let cutoff = config.retention_window().cutoff();

        let rows = output.table.rows();
        prop_assert!(rows.windows(2).all(|pair| pair[0].date < pair[1].date));
        prop_assert!(rows.iter().all(|row| row.date >= cutoff && row.date <= today()));
    }

    #[test]
    fn runs_are_deterministic(records in records()) {
        let xml = export(&records);
        let config = PipelineConfig::with_today(today());

        let first = run_bytes(xml.as_bytes(), &Targets::default(), &config).unwrap();
        let second = run_bytes(xml.as_bytes(), &Targets::default(), &config).unwrap();
        prop_assert_eq!(
            to_csv_string(&first.table).unwrap(),
            to_csv_string(&second.table).unwrap()
        );
    }

    #[test]
    fn missing_score_means_insufficient_data(records in records()) {
        let output = run_bytes(
            export(&records).as_bytes(),
            &Targets::default(),
            &PipelineConfig::with_today(today()),
        )
        .unwrap();

        for row in output.table.iter() {
            prop_assert!(row.recommendation.is_some());
            if row.composite_score.is_none() || row.weight_pct_change.is_none() {
                prop_assert_eq!(row.recommendation, Some(Recommendation::InsufficientData));
            }
        }
    }

    #[test]
    fn csv_round_trip(records in records()) {
        let output = run_bytes(
            export(&records).as_bytes(),
            &Targets::default(),
            &PipelineConfig::with_today(today()),
        )
        .unwrap();

        let restored = from_csv_str(&to_csv_string(&output.table).unwrap()).unwrap();
        prop_assert_eq!(restored, output.table);
    }

    #[test]
    fn weight_is_filled_once_seen(records in records()) {
        let output = run_bytes(
            export(&records).as_bytes(),
            &Targets::default(),
            &PipelineConfig::with_today(today()),
        )
        .unwrap();

        let any_weight = output.table.iter().any(|row| row.values.weight.is_some());
        prop_assert!(output.table.iter().all(|row| row.values.weight.is_some() == any_weight));
    }
}
