// Property-based tests for workflow bookkeeping and monitoring analysis

use chrono::NaiveDate;
use common::models::{RequestRow, STATUS_FAILED, STATUS_SUCCEEDED};
use common::workflow::{analyze_requests, WorkflowProgress};
use proptest::prelude::*;

fn request_row() -> impl Strategy<Value = RequestRow> {
    (
        1i32..10_000,
        1i32..20,
        prop_oneof![Just("SAT"), Just("PSAT"), Just("ACT"), Just("MAP")],
        prop_oneof![Just(STATUS_FAILED), Just(STATUS_SUCCEEDED), Just(1), Just(2)],
        0u32..365,
    )
        .prop_map(|(request_id, district_id, type_name, status, day)| {
            let time = NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .map(|t| t + chrono::Duration::days(i64::from(day)));
            RequestRow::new(
                request_id,
                district_id,
                1,
                Some(type_name.to_string()),
                None,
                Some(status),
                time,
            )
        })
}

/// Steps completed never exceed the declared total
#[test]
fn property_steps_are_bounded() {
    proptest!(|(total in 0u32..6, completions in 0usize..12, succeed in any::<bool>())| {
        let mut progress = WorkflowProgress::new(total);
        for _ in 0..completions {
            progress.complete_step();
        }
        let result = if succeed { progress.finish("done") } else { progress.fail("stopped") };
        prop_assert!(result.steps_completed <= result.total_steps);
        prop_assert_eq!(result.steps_completed, (completions as u32).min(total));
        prop_assert_eq!(result.success, succeed);
    });
}

/// Breakdowns add up to the status counts and the rate stays a percentage
#[test]
fn property_analysis_is_consistent() {
    proptest!(|(rows in prop::collection::vec(request_row(), 0..60))| {
        let report = analyze_requests(&rows);
        let analysis = &report.analysis;

        prop_assert_eq!(report.total_requests, rows.len());
        prop_assert!(analysis.by_status.success + analysis.by_status.failed <= rows.len());
        prop_assert_eq!(analysis.failed_requests.len(), analysis.by_status.failed);

        let type_failed: usize = analysis.by_type.values().map(|c| c.failed).sum();
        let district_success: usize = analysis.by_district.values().map(|c| c.success).sum();
        prop_assert_eq!(type_failed, analysis.by_status.failed);
        prop_assert_eq!(district_success, analysis.by_status.success);

        prop_assert!((0.0..=100.0).contains(&report.success_rate));
        prop_assert_eq!(
            report.summary.healthy_districts + report.summary.districts_with_issues,
            analysis.by_district.len()
        );
        prop_assert_eq!(
            report.summary.most_problematic_type.is_some(),
            analysis.by_status.failed > 0
        );
        if let Some(worst) = &report.summary.most_problematic_type {
            let worst_failed = analysis.by_type[worst].failed;
            prop_assert!(analysis.by_type.values().all(|c| c.failed <= worst_failed));
        }
    });
}
