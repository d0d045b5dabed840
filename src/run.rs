//! The run bracket: discover, activate, dispatch, deactivate

use crate::config::{OutputGranularity, RunConfig};
use crate::dispatch::{Dispatcher, MergedResult};
use crate::error::{Error, Result};
use crate::lifecycle::{
    HttpResourceController, LifecycleManager, NoopResourceController, ResourceController,
};
use crate::output::{DocumentRecord, OutputWriter};
use crate::pdf::PageSegmenter;
use crate::source::{discover, Document, DocumentState};
use crate::workers::{load_workers, TaskExecutor, WorkerDescriptor, WorkerRuntime};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Counters reported at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workers_loaded: usize,
    pub worker_config_errors: usize,
    pub documents_discovered: usize,
    pub documents_processed: usize,
    pub documents_failed: usize,
    /// Documents never started because the run was cancelled
    pub documents_skipped: usize,
    pub rejected_files: usize,
    pub pages_dispatched: usize,
    pub worker_failures: usize,
    pub units_written: usize,
    pub write_failures: usize,
    pub deactivation_failures: usize,
    pub cancelled: bool,
}

impl RunSummary {
    fn start(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            workers_loaded: 0,
            worker_config_errors: 0,
            documents_discovered: 0,
            documents_processed: 0,
            documents_failed: 0,
            documents_skipped: 0,
            rejected_files: 0,
            pages_dispatched: 0,
            worker_failures: 0,
            units_written: 0,
            write_failures: 0,
            deactivation_failures: 0,
            cancelled: false,
        }
    }

    fn absorb(&mut self, stats: &DocumentStats) {
        match stats.outcome {
            DocumentOutcome::Processed => self.documents_processed += 1,
            DocumentOutcome::Failed => self.documents_failed += 1,
            DocumentOutcome::Skipped => self.documents_skipped += 1,
        }
        self.pages_dispatched += stats.pages_dispatched;
        self.worker_failures += stats.worker_failures;
        self.units_written += stats.units_written;
        self.write_failures += stats.write_failures;
    }

    /// Exit status for a run that reached its summary.
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            1
        } else {
            0
        }
    }

    pub fn log(&self) {
        tracing::info!(
            run_id = %self.run_id,
            documents_discovered = self.documents_discovered,
            documents_processed = self.documents_processed,
            documents_failed = self.documents_failed,
            documents_skipped = self.documents_skipped,
            rejected_files = self.rejected_files,
            pages_dispatched = self.pages_dispatched,
            worker_failures = self.worker_failures,
            units_written = self.units_written,
            write_failures = self.write_failures,
            deactivation_failures = self.deactivation_failures,
            cancelled = self.cancelled,
            elapsed_ms = (self.finished_at - self.started_at).num_milliseconds(),
            "Run complete"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentOutcome {
    Processed,
    Failed,
    Skipped,
}

#[derive(Debug)]
struct DocumentStats {
    outcome: DocumentOutcome,
    pages_dispatched: usize,
    worker_failures: usize,
    units_written: usize,
    write_failures: usize,
}

impl DocumentStats {
    fn new(outcome: DocumentOutcome) -> Self {
        Self {
            outcome,
            pages_dispatched: 0,
            worker_failures: 0,
            units_written: 0,
            write_failures: 0,
        }
    }
}

/// Everything a document needs on its way from segmentation to output
#[derive(Clone)]
struct DocumentContext {
    dispatcher: Dispatcher,
    segmenter: PageSegmenter,
    writer: OutputWriter,
    workers: Arc<[Arc<WorkerDescriptor>]>,
    granularity: OutputGranularity,
}

/// A configured orchestration run
pub struct Pipeline {
    config: RunConfig,
    executor: Arc<dyn TaskExecutor>,
    controller: Arc<dyn ResourceController>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Build a pipeline with the production executor and controller.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let executor: Arc<dyn TaskExecutor> = Arc::new(WorkerRuntime::new(&config)?);
        let controller: Arc<dyn ResourceController> = if config.lifecycle.enabled {
            Arc::new(HttpResourceController::new(&config.lifecycle)?)
        } else {
            Arc::new(NoopResourceController)
        };
        Ok(Self::with_components(config, executor, controller))
    }

    /// Build a pipeline around caller-supplied executor and controller.
    pub fn with_components(
        config: RunConfig,
        executor: Arc<dyn TaskExecutor>,
        controller: Arc<dyn ResourceController>,
    ) -> Self {
        Self {
            config,
            executor,
            controller,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the run.
    ///
    /// Fatal configuration and activation failures are returned as errors;
    /// every other failure is local to its unit and counted in the summary.
    /// Deactivation is attempted whenever activation was.
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let mut summary = RunSummary::start(Uuid::new_v4());
        tracing::info!(run_id = %summary.run_id, input = %self.config.input_dir.display(), "Starting run");

        let registry = load_workers(
            &self.config.workers_dir,
            &self.config.worker_pattern,
            self.config.default_worker_timeout,
        )?;
        if registry.is_empty() {
            return Err(Error::NoWorkers {
                path: self.config.workers_dir.display().to_string(),
            });
        }
        summary.workers_loaded = registry.len();
        summary.worker_config_errors = registry.config_errors();
        tracing::info!(
            run_id = %summary.run_id,
            workers = ?registry.names(),
            config_errors = summary.worker_config_errors,
            "Workers loaded"
        );

        let discovery = discover(&self.config.input_dir, self.config.recursive)?;
        summary.documents_discovered = discovery.documents.len();
        summary.rejected_files = discovery.rejected.len();

        let writer = OutputWriter::new(&self.config.output_dir)?;

        if discovery.documents.is_empty() {
            tracing::warn!(
                rejected = summary.rejected_files,
                "No valid documents found, nothing to dispatch"
            );
            summary.finished_at = Utc::now();
            summary.log();
            return Ok(summary);
        }

        let service_name = self.config.lifecycle.service_name.as_deref();
        let resources = LifecycleManager::resources_for(&registry, service_name);
        let lifecycle = LifecycleManager::new(self.controller.clone());

        if let Err(e) = lifecycle.activate_all(&resources).await {
            self.cancel.cancel();
            let report = lifecycle.deactivate_all().await;
            tracing::error!(
                run_id = %summary.run_id,
                kind = e.kind(),
                deactivation_failures = report.failed,
                "Run aborted before dispatch: {}",
                e
            );
            return Err(e);
        }

        let dispatched = self
            .dispatch_all(discovery.documents, registry.workers(), writer)
            .await;

        let report = lifecycle.deactivate_all().await;
        summary.deactivation_failures = report.failed;

        let stats = dispatched?;
        for document in &stats {
            summary.absorb(document);
        }
        summary.cancelled = self.cancel.is_cancelled();
        summary.finished_at = Utc::now();
        summary.log();
        Ok(summary)
    }

    /// Process all documents on a separate task so that a panic anywhere in
    /// dispatch still returns here for deactivation.
    async fn dispatch_all(
        &self,
        documents: Vec<Document>,
        workers: &[Arc<WorkerDescriptor>],
        writer: OutputWriter,
    ) -> Result<Vec<DocumentStats>> {
        let scratch = match &self.config.scratch_root {
            Some(root) => tempfile::Builder::new()
                .prefix("pdf-extract-")
                .tempdir_in(root)?,
            None => tempfile::Builder::new().prefix("pdf-extract-").tempdir()?,
        };

        let context = DocumentContext {
            dispatcher: Dispatcher::new(
                self.executor.clone(),
                self.config.max_in_flight,
                self.cancel.clone(),
            ),
            segmenter: PageSegmenter::new(scratch.path()),
            writer,
            workers: workers.iter().cloned().collect(),
            granularity: self.config.granularity,
        };
        let concurrency = self.config.max_in_flight;

        let joined = isolated(async move {
            futures_util::stream::iter(documents)
                .map(|document| process_document(document, context.clone()))
                .buffer_unordered(concurrency)
                .collect::<Vec<_>>()
                .await
        })
        .await;

        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "Failed to remove scratch directory");
        }
        joined
    }
}

/// Run `future` on its own task. A panic inside it comes back as
/// [`Error::TaskJoin`] instead of unwinding through the caller.
async fn isolated<F>(future: F) -> Result<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future).await.map_err(|e| {
        tracing::error!(error = %e, "Dispatch task failed");
        Error::TaskJoin {
            reason: e.to_string(),
        }
    })
}

async fn process_document(mut document: Document, context: DocumentContext) -> DocumentStats {
    if context.dispatcher.is_cancelled() {
        tracing::info!(document = %document.name, "Run cancelled, document not started");
        return DocumentStats::new(DocumentOutcome::Skipped);
    }

    let segmentation = match context.segmenter.segment(&document).await {
        Ok(segmentation) => segmentation,
        Err(e) => {
            tracing::warn!(document = %document.name, kind = e.kind(), "{}", e);
            document.fail();
            return DocumentStats::new(DocumentOutcome::Failed);
        }
    };
    document.page_count = Some(segmentation.page_count);
    document.advance(DocumentState::Segmented);

    let units = segmentation.into_units();
    document.advance(DocumentState::Dispatched);
    let results: Vec<MergedResult> = join_all(
        units
            .iter()
            .map(|unit| context.dispatcher.dispatch(unit, &context.workers)),
    )
    .await;
    document.advance(DocumentState::Merged);

    let mut stats = DocumentStats::new(DocumentOutcome::Processed);
    stats.pages_dispatched = units.len();
    stats.worker_failures = results.iter().map(MergedResult::failures).sum();

    match context.granularity {
        OutputGranularity::Page => {
            for result in &results {
                record_write(&mut stats, context.writer.write_page(result).await);
            }
        }
        OutputGranularity::Document => {
            let record = DocumentRecord {
                unit_identity: document.name.clone(),
                pages: results,
            };
            record_write(&mut stats, context.writer.write_document(&record).await);
        }
    }

    if stats.write_failures == 0 {
        document.advance(DocumentState::Written);
    } else {
        stats.outcome = DocumentOutcome::Failed;
        document.fail();
    }

    tracing::info!(
        document = %document.name,
        pages = stats.pages_dispatched,
        worker_failures = stats.worker_failures,
        state = %document.state(),
        "Document finished"
    );
    stats
}

fn record_write(stats: &mut DocumentStats, result: Result<std::path::PathBuf>) {
    match result {
        Ok(_) => stats.units_written += 1,
        Err(e) => {
            tracing::error!(kind = e.kind(), "{}", e);
            stats.write_failures += 1;
        }
    }
}
