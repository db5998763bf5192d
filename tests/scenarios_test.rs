//! The four harness round-trips, driven through the public scenario API.

mod common;

use openworkers_snapshot_harness::scenarios::{self, Label};
use openworkers_snapshot_harness::{HarnessConfig, SnapshotValue};

#[test]
fn test_basic_round_trip() {
    let _guard = common::sequential();

    let result = scenarios::basic_round_trip(&HarnessConfig::default()).unwrap();
    assert_eq!(result, scenarios::GREETING);
    assert!(openworkers_snapshot_harness::platform::is_initialized());
}

#[test]
fn test_data_round_trip() {
    let _guard = common::sequential();

    let outcome = scenarios::data_round_trip(&HarnessConfig::default()).unwrap();

    assert_eq!(outcome.context_datum, Some(SnapshotValue::Number(18.0)));
    assert_eq!(
        outcome.isolate_datum,
        Some(SnapshotValue::String("isolate-wide datum".to_string()))
    );
    assert_eq!(outcome.context_datum_again, None, "data is single use");
}

#[test]
fn test_external_reference_round_trip() {
    let _guard = common::sequential();

    let result = scenarios::external_reference_round_trip(&HarnessConfig::default()).unwrap();

    // The restore-side function ran, with the argument passed through untouched
    assert_eq!(result, "v2 handled: some arg");
}

#[test]
fn test_internal_field_round_trip() {
    let _guard = common::sequential();

    let outcome = scenarios::internal_field_round_trip(&HarnessConfig::default()).unwrap();

    assert_eq!(outcome.original, Label::sample());
    assert_eq!(outcome.restored, Some(Label::sample()));
}

#[test]
fn test_run_all_reports_every_scenario() {
    let _guard = common::sequential();

    let reports = scenarios::run_all(&HarnessConfig::default());

    let names: Vec<_> = reports.iter().map(|report| report.name).collect();
    assert_eq!(
        names,
        vec![
            "basic round-trip",
            "data round-trip",
            "external reference round-trip",
            "internal field round-trip",
        ]
    );

    for report in &reports {
        assert!(report.passed(), "{} failed: {:?}", report.name, report.result);
    }
}

#[test]
fn test_scenarios_with_function_code_cleared() {
    let _guard = common::sequential();

    let config = HarnessConfig {
        function_code: openworkers_snapshot_harness::FunctionCodeHandling::Clear,
        ..HarnessConfig::default()
    };

    // Cleared code is recompiled lazily after restore
    assert_eq!(
        scenarios::basic_round_trip(&config).unwrap(),
        scenarios::GREETING
    );
    assert_eq!(
        scenarios::external_reference_round_trip(&config).unwrap(),
        "v2 handled: some arg"
    );
}
