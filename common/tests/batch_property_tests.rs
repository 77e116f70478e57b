// Property-based tests for the bounded batch executor

use common::batch::BatchExecutor;
use common::errors::{OperationError, RemoteFileError};
use common::models::ItemOutcome;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

/// One result per distinct id; failures are reported, never dropped
#[test]
fn property_one_result_per_distinct_id() {
    let rt = runtime();
    proptest!(|(
        ids in prop::collection::vec(0i32..50, 0..40),
        failing in prop::collection::btree_set(0i32..50, 0..10),
        max_concurrent in 0usize..8
    )| {
        let failing_ids = failing.clone();
        let report = rt.block_on(BatchExecutor::new(max_concurrent).run(&ids, move |id| {
            let fail = failing_ids.contains(&id);
            async move {
                if fail {
                    Err(OperationError::from(RemoteFileError::OperationFailed(format!("item {}", id))))
                } else {
                    Ok(ItemOutcome::succeeded(1, "ok"))
                }
            }
        }));

        let distinct: BTreeSet<i32> = ids.iter().copied().collect();
        prop_assert_eq!(report.total, distinct.len());
        prop_assert!(report.total <= ids.len());
        prop_assert_eq!(report.results.keys().copied().collect::<BTreeSet<_>>(), distinct.clone());

        let expected_failures = distinct.intersection(&failing).count();
        prop_assert_eq!(report.success_count, distinct.len() - expected_failures);
        for id in distinct.intersection(&failing) {
            let outcome = &report.results[id];
            prop_assert!(!outcome.success);
            prop_assert_eq!(outcome.files, 0);
        }
        prop_assert_eq!(report.total_files(), report.success_count);
    });
}
