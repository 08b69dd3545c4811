//! The worker loop: leases jobs, runs the OCR transform and records the
//! outcome.
//!
//! One loop processes jobs sequentially. Several loops, in one process or
//! many, can drain the same store; the lease is what keeps them apart. A
//! result is only recorded while the lease is still held, so a worker that
//! outlived its lease discards its result instead of overwriting another
//! worker's.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{IngestConfig, RetryPolicy};
use crate::error::Result;
use crate::processor::OcrTransform;
use crate::storage::filesystem::write_no_clobber;
use crate::storage::ProjectLayout;
use crate::store::document_repo::{self, Document};
use crate::store::job_repo::{self, Job, JobState};
use crate::store::project_repo::Project;
use crate::store::{Store, StoreError};

/// Outcome counts of one `work` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkSummary {
    pub processed: u64,
    pub succeeded: u64,
    /// Failed attempts with a retry scheduled.
    pub failed: u64,
    pub abandoned: u64,
    /// Results discarded because the lease had expired or moved on.
    pub lease_lost: u64,
}

impl WorkSummary {
    /// A degraded run completed, but not every job it touched succeeded.
    pub fn is_degraded(&self) -> bool {
        self.failed > 0 || self.abandoned > 0 || self.lease_lost > 0
    }
}

enum JobOutcome {
    Succeeded,
    Retrying,
    Abandoned,
    LeaseLost,
}

pub struct WorkerLoop<T: OcrTransform> {
    store: Store,
    ocr: T,
    worker_id: String,
    lease_duration: Duration,
    batch_size: usize,
    retry: RetryPolicy,
    shutdown: Arc<AtomicBool>,
}

impl<T: OcrTransform> WorkerLoop<T> {
    pub fn new(store: Store, ocr: T, config: &IngestConfig) -> Self {
        Self {
            store,
            ocr,
            worker_id: format!("{}-{}", std::process::id(), Uuid::new_v4().simple()),
            lease_duration: config.lease_duration(),
            batch_size: config.lease_batch_size.max(1),
            retry: config.retry_policy(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Flag checked between jobs; setting it stops the loop after the
    /// current job.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!(worker_id = %self.worker_id, "Worker shutting down");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Handles up to `limit` jobs of `project`, returning early when no job
    /// is eligible. Only store and filesystem failures abort the run.
    pub fn work(&self, project: &Project, limit: usize) -> Result<WorkSummary> {
        let span = info_span!("work", project_id = project.id, worker_id = %self.worker_id);
        let _guard = span.enter();

        let layout = ProjectLayout::new(&project.root_path);
        layout.create_dirs()?;

        let mut summary = WorkSummary::default();
        let mut handled = 0usize;

        'leasing: while handled < limit && !self.is_shutdown() {
            let want = self.batch_size.min(limit - handled);
            let jobs = job_repo::lease_next_job(
                &self.store,
                Some(project.id),
                &self.worker_id,
                self.lease_duration,
                want,
            )?;
            if jobs.is_empty() {
                debug!("No eligible jobs");
                break;
            }

            let mut jobs = jobs.into_iter();
            while let Some(job) = jobs.next() {
                if self.is_shutdown() {
                    for unstarted in jobs.by_ref() {
                        job_repo::release_job(&self.store, unstarted.id, &self.worker_id)?;
                    }
                    break 'leasing;
                }

                let outcome = self.run_job(&layout, &job)?;
                handled += 1;
                summary.processed += 1;
                match outcome {
                    JobOutcome::Succeeded => summary.succeeded += 1,
                    JobOutcome::Retrying => summary.failed += 1,
                    JobOutcome::Abandoned => summary.abandoned += 1,
                    JobOutcome::LeaseLost => summary.lease_lost += 1,
                }
            }
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            abandoned = summary.abandoned,
            lease_lost = summary.lease_lost,
            "Work finished"
        );
        Ok(summary)
    }

    fn run_job(&self, layout: &ProjectLayout, job: &Job) -> Result<JobOutcome> {
        let span = info_span!(
            "job",
            job_id = job.id,
            document_id = job.document_id,
            attempt = job.attempt_count + 1
        );
        let _guard = span.enter();

        let Some(document) = document_repo::get_document(&self.store, job.document_id)? else {
            return self.record_failure(job, "document row is missing");
        };

        match self.ocr.process(&document.canonical_path) {
            Ok(output) => {
                let json_path = layout.ocr_json_path(document.id);
                let envelope = ocr_envelope(&document, &output.structured);
                let rendered = serde_json::to_vec_pretty(&envelope).map_err(|e| {
                    crate::error::ProcessError::OcrFailed(format!(
                        "cannot serialize OCR output: {}",
                        e
                    ))
                })?;
                write_no_clobber(&json_path, &rendered)?;
                write_no_clobber(&layout.ocr_text_path(document.id), output.text.as_bytes())?;

                let output_ref = json_path.to_string_lossy();
                match job_repo::complete_job(&self.store, job.id, &self.worker_id, &output_ref) {
                    Ok(_) => {
                        debug!("Job done");
                        Ok(JobOutcome::Succeeded)
                    }
                    Err(StoreError::LeaseLost { .. }) => {
                        warn!("Lease lost before completion, result discarded");
                        Ok(JobOutcome::LeaseLost)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => {
                warn!(error = %e, "OCR failed");
                self.record_failure(job, &e.to_string())
            }
        }
    }

    fn record_failure(&self, job: &Job, error: &str) -> Result<JobOutcome> {
        match job_repo::fail_job(&self.store, job.id, &self.worker_id, error, &self.retry) {
            Ok(outcome) if outcome.state == JobState::Abandoned => {
                warn!(attempts = outcome.attempt_count, "Job abandoned");
                Ok(JobOutcome::Abandoned)
            }
            Ok(outcome) => {
                debug!(attempts = outcome.attempt_count, retry_at = ?outcome.retry_at, "Retry scheduled");
                Ok(JobOutcome::Retrying)
            }
            Err(StoreError::LeaseLost { .. }) => {
                warn!("Lease lost before the failure was recorded");
                Ok(JobOutcome::LeaseLost)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn ocr_envelope(document: &Document, structured: &serde_json::Value) -> serde_json::Value {
    json!({
        "document_id": document.id,
        "project_id": document.project_id,
        "content_fingerprint": document.content_fingerprint,
        "source_path": document.source_path,
        "ocr": structured,
    })
}
