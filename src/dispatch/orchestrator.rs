//! Concurrent fan-out of one page to its workers

use crate::dispatch::merge::{merge, parse_payload, FailureKind, MergedResult, WorkerOutcome};
use crate::pdf::PageUnit;
use crate::workers::{TaskExecutor, WorkerDescriptor};
use futures_util::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Dispatches pages to workers under a run-wide in-flight bound
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn TaskExecutor>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn TaskExecutor>, max_in_flight: usize, cancel: CancellationToken) -> Self {
        Self {
            executor,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run every worker applicable to `page` and merge the outcomes.
    ///
    /// Returns only after all tasks for the page have resolved. Each task
    /// has its own timeout; a failing, hanging or panicking worker becomes a
    /// failure marker without affecting its siblings.
    pub async fn dispatch(&self, page: &PageUnit, workers: &[Arc<WorkerDescriptor>]) -> MergedResult {
        let identity = page.identity();
        let applicable: Vec<Arc<WorkerDescriptor>> = workers
            .iter()
            .filter(|w| w.applies_to(page.role))
            .cloned()
            .collect();

        if applicable.is_empty() {
            tracing::debug!(unit = %identity, role = %page.role, "No applicable workers");
            return MergedResult::empty(identity);
        }

        let mut expected: BTreeSet<String> = BTreeSet::new();
        let mut tasks = JoinSet::new();
        for worker in applicable {
            expected.insert(worker.name.clone());
            let executor = self.executor.clone();
            let permits = self.permits.clone();
            let cancel = self.cancel.clone();
            let page = page.clone();
            tasks.spawn(async move {
                let name = worker.name.clone();
                AssertUnwindSafe(run_task(executor, permits, cancel, worker, page))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        WorkerOutcome::failed(name, FailureKind::WorkerFailure, "worker task panicked")
                    })
            });
        }

        let mut outcomes = Vec::with_capacity(expected.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    expected.remove(&outcome.worker);
                    outcomes.push(outcome);
                }
                Err(e) => tracing::error!(unit = %identity, error = %e, "Dispatch task aborted"),
            }
        }
        // Keep the key set complete even if a task never reported back
        for worker in expected {
            outcomes.push(WorkerOutcome::failed(
                worker,
                FailureKind::WorkerFailure,
                "worker task did not complete",
            ));
        }

        let merged = merge(&identity, outcomes);
        tracing::debug!(
            unit = %identity,
            workers = merged.worker_outputs.len(),
            failures = merged.failures(),
            "Page dispatched"
        );
        merged
    }
}

async fn run_task(
    executor: Arc<dyn TaskExecutor>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    worker: Arc<WorkerDescriptor>,
    page: PageUnit,
) -> WorkerOutcome {
    let unit = page.identity();

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(&worker),
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return cancelled(&worker),
        },
    };

    let started = Instant::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(&worker),
        result = tokio::time::timeout(worker.timeout, executor.execute(&worker, &page)) => result,
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let outcome = match result {
        Err(_) => WorkerOutcome::failed(
            worker.name.clone(),
            FailureKind::TimeoutFailure,
            format!("timed out after {:?}", worker.timeout),
        ),
        Ok(Err(e)) => WorkerOutcome::failed(worker.name.clone(), FailureKind::WorkerFailure, e.to_string()),
        Ok(Ok(raw)) => match parse_payload(&raw) {
            Ok(payload) => WorkerOutcome::payload(worker.name.clone(), payload),
            Err(failure) => WorkerOutcome::failed(worker.name.clone(), failure.kind, failure.message),
        },
    };

    match outcome.output.failure() {
        Some(failure) => tracing::warn!(
            unit = %unit,
            worker = %worker.name,
            kind = %failure.kind,
            elapsed_ms,
            "{}",
            failure.message
        ),
        None => tracing::debug!(unit = %unit, worker = %worker.name, elapsed_ms, "Worker succeeded"),
    }
    outcome
}

fn cancelled(worker: &WorkerDescriptor) -> WorkerOutcome {
    WorkerOutcome::failed(worker.name.clone(), FailureKind::Cancelled, "run cancelled")
}
