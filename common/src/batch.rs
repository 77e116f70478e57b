// Bounded batch executor
// Runs one task per request id with at most `max_concurrent` in flight

use crate::errors::OperationError;
use crate::models::{BatchReport, ItemOutcome};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    max_concurrent: usize,
}

impl BatchExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run `operation` for every distinct id and collect one outcome per id
    ///
    /// Errors and panics inside an item become `success: false` entries; the
    /// batch itself never fails. Results are merged after all tasks finish.
    #[instrument(skip(self, ids, operation), fields(items = ids.len(), max_concurrent = self.max_concurrent))]
    pub async fn run<F, Fut>(&self, ids: &[i32], operation: F) -> BatchReport
    where
        F: Fn(i32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ItemOutcome, OperationError>> + Send + 'static,
    {
        let mut seen = HashSet::new();
        let unique: Vec<i32> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let operation = Arc::new(operation);

        let handles: Vec<_> = unique
            .into_iter()
            .map(|id| {
                let semaphore = Arc::clone(&semaphore);
                let operation = Arc::clone(&operation);
                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| OperationError::TaskFailed(e.to_string()))?;
                    operation(id).await
                });
                (id, handle)
            })
            .collect();

        let joined = join_all(
            handles
                .into_iter()
                .map(|(id, handle)| async move { (id, handle.await) }),
        )
        .await;

        let mut results = BTreeMap::new();
        for (id, joined) in joined {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(request_id = id, error = %e, "Batch item failed");
                    ItemOutcome::failed(e.to_string())
                }
                Err(e) => {
                    warn!(request_id = id, error = %e, "Batch task aborted");
                    ItemOutcome::failed(OperationError::from(e).to_string())
                }
            };
            results.insert(id, outcome);
        }

        let success_count = results.values().filter(|r| r.success).count();
        let total = results.len();
        info!(success_count, total, "Batch complete");

        BatchReport {
            results,
            success_count,
            total,
        }
    }
}
