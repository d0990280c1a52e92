//! Batched, concurrent, retrying upload of staged graph data.
//!
//! Every flushed file under `graph/` is parsed and split into batches of at
//! most [`UPLOAD_BATCH_SIZE`] objects; batches post concurrently up to
//! [`UPLOAD_CONCURRENCY`] in flight. A failed batch retries with a
//! multiplicative backoff, shrinking its raw data when the service rejects
//! the payload as too large.

use std::sync::Arc;
use std::time::Duration;

use graphbeam_storage::{codec, StorageLayout};
use graphbeam_types::{
    Entity, FlushedFile, IntegrationError, PartialDatasetMetadata, Relationship, RunEventSink,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::SyncApi;
use crate::events::EventQueue;
use crate::job::JobConfig;
use crate::shrink::shrink_raw_data;

/// Maximum graph objects per upload request.
pub const UPLOAD_BATCH_SIZE: usize = 250;
/// Maximum batch uploads in flight.
pub const UPLOAD_CONCURRENCY: usize = 6;

const RETRY_MAX_ATTEMPTS: u32 = 5;
const RETRY_INITIAL_DELAY_MS: f64 = 200.0;
const RETRY_DELAY_FACTOR: f64 = 1.05;

fn retry_delay(attempt: u32) -> Duration {
    let factor = RETRY_DELAY_FACTOR.powi(attempt.saturating_sub(1) as i32);
    Duration::from_millis((RETRY_INITIAL_DELAY_MS * factor) as u64)
}

/// Options for one synchronization.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub job: JobConfig,
    /// Checked between retry attempts; a cancelled token fails the batch.
    pub cancel: CancellationToken,
}

impl SyncOptions {
    #[must_use]
    pub fn new(job: JobConfig) -> Self {
        Self {
            job,
            cancel: CancellationToken::new(),
        }
    }
}

/// Aggregate outcome of a completed synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub job_id: String,
    pub entities_uploaded: usize,
    pub relationships_uploaded: usize,
    pub batches_sent: usize,
    pub batches_shrunk: usize,
    pub partial_datasets: PartialDatasetMetadata,
}

enum BatchPayload {
    Entities(Vec<Entity>),
    Relationships(Vec<Relationship>),
}

impl BatchPayload {
    fn len(&self) -> usize {
        match self {
            Self::Entities(batch) => batch.len(),
            Self::Relationships(batch) => batch.len(),
        }
    }

    async fn upload(&self, api: &dyn SyncApi, job_id: &str) -> Result<(), IntegrationError> {
        match self {
            Self::Entities(batch) => api.upload_entities(job_id, batch).await,
            Self::Relationships(batch) => api.upload_relationships(job_id, batch).await,
        }
    }

    fn shrink(&mut self) -> Result<crate::shrink::ShrinkReport, IntegrationError> {
        match self {
            Self::Entities(batch) => shrink_raw_data(batch),
            Self::Relationships(_) => Err(IntegrationError::upload_fatal(
                "CANNOT_SHRINK",
                "relationship batches carry no raw data to truncate",
            )),
        }
    }
}

struct BatchStats {
    entities: usize,
    relationships: usize,
    shrunk: bool,
}

/// Run the full synchronization lifecycle: initiate, upload, drain events,
/// finalize. On any failure the job is aborted with the error as reason.
///
/// # Errors
///
/// Returns the upload or finalize error after aborting the job; if the abort
/// itself fails, that error is returned instead.
pub async fn synchronize(
    api: Arc<dyn SyncApi>,
    layout: &StorageLayout,
    sink: Arc<dyn RunEventSink>,
    events: &EventQueue,
    options: SyncOptions,
) -> Result<SyncReport, IntegrationError> {
    let job = api.create_job(&options.job).await?;
    sink.sync_upload_start(&job.id);
    tracing::info!(job_id = %job.id, "Synchronization job initiated");

    match upload_and_finalize(&api, layout, sink.as_ref(), events, &job.id, &options).await {
        Ok(report) => {
            sink.sync_upload_end(&job.id);
            tracing::info!(
                job_id = %job.id,
                entities = report.entities_uploaded,
                relationships = report.relationships_uploaded,
                batches = report.batches_sent,
                "Synchronization complete"
            );
            Ok(report)
        }
        Err(err) => {
            tracing::error!(job_id = %job.id, error = %err, "Synchronization failed; aborting job");
            match api.abort_job(&job.id, &err.to_string()).await {
                Ok(_) => Err(err),
                Err(abort_err) => {
                    tracing::error!(job_id = %job.id, error = %abort_err, "Job abort failed");
                    Err(abort_err)
                }
            }
        }
    }
}

async fn upload_and_finalize(
    api: &Arc<dyn SyncApi>,
    layout: &StorageLayout,
    sink: &dyn RunEventSink,
    events: &EventQueue,
    job_id: &str,
    options: &SyncOptions,
) -> Result<SyncReport, IntegrationError> {
    let batches = collect_batches(layout)?;
    tracing::info!(job_id, batches = batches.len(), "Uploading staged graph data");

    let semaphore = Arc::new(Semaphore::new(UPLOAD_CONCURRENCY));
    let mut join_set: JoinSet<Result<BatchStats, IntegrationError>> = JoinSet::new();
    for payload in batches {
        let api = api.clone();
        let job_id = job_id.to_string();
        let cancel = options.cancel.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|e| {
                IntegrationError::upload_fatal(
                    "UPLOAD_POOL_CLOSED",
                    format!("upload semaphore closed: {e}"),
                )
            })?;
            upload_batch_with_retry(api.as_ref(), &job_id, payload, &cancel).await
        });
    }

    let mut report = SyncReport {
        job_id: job_id.to_string(),
        entities_uploaded: 0,
        relationships_uploaded: 0,
        batches_sent: 0,
        batches_shrunk: 0,
        partial_datasets: PartialDatasetMetadata::default(),
    };
    let mut first_error: Option<IntegrationError> = None;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(stats)) => {
                report.batches_sent += 1;
                report.entities_uploaded += stats.entities;
                report.relationships_uploaded += stats.relationships;
                if stats.shrunk {
                    report.batches_shrunk += 1;
                }
            }
            Ok(Err(err)) => {
                if first_error.is_none() {
                    first_error = Some(err);
                    join_set.abort_all();
                }
            }
            Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {}
            Err(join_err) => {
                return Err(IntegrationError::upload_fatal(
                    "UPLOAD_TASK_PANICKED",
                    format!("batch upload task panicked: {join_err}"),
                ));
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    events.drain(sink);

    report.partial_datasets = layout.read_summary()?.metadata.partial_datasets;
    api.finalize_job(job_id, &report.partial_datasets).await?;
    Ok(report)
}

fn collect_batches(layout: &StorageLayout) -> Result<Vec<BatchPayload>, IntegrationError> {
    let mut batches = Vec::new();
    for file in codec::graph_files(layout)? {
        let (_entry, parsed) = file?;
        match parsed {
            FlushedFile::Entities { entities } if !entities.is_empty() => {
                for chunk in entities.chunks(UPLOAD_BATCH_SIZE) {
                    batches.push(BatchPayload::Entities(chunk.to_vec()));
                }
            }
            FlushedFile::Relationships { relationships } if !relationships.is_empty() => {
                for chunk in relationships.chunks(UPLOAD_BATCH_SIZE) {
                    batches.push(BatchPayload::Relationships(chunk.to_vec()));
                }
            }
            _ => {}
        }
    }
    Ok(batches)
}

async fn upload_batch_with_retry(
    api: &dyn SyncApi,
    job_id: &str,
    mut payload: BatchPayload,
    cancel: &CancellationToken,
) -> Result<BatchStats, IntegrationError> {
    let mut shrunk = false;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(IntegrationError::upload_fatal(
                "UPLOAD_CANCELLED",
                "synchronization cancelled before the batch completed",
            ));
        }

        match payload.upload(api, job_id).await {
            Ok(()) => {
                let stats = match &payload {
                    BatchPayload::Entities(batch) => BatchStats {
                        entities: batch.len(),
                        relationships: 0,
                        shrunk,
                    },
                    BatchPayload::Relationships(batch) => BatchStats {
                        entities: 0,
                        relationships: batch.len(),
                        shrunk,
                    },
                };
                return Ok(stats);
            }
            Err(err) => {
                if err.code == "JOB_NOT_AWAITING_UPLOADS" {
                    return Err(IntegrationError::upload_fatal(
                        "INTEGRATION_UPLOAD_AFTER_JOB_ENDED",
                        format!(
                            "synchronization job {job_id} stopped accepting uploads: {}",
                            err.message
                        ),
                    ));
                }
                if attempt >= RETRY_MAX_ATTEMPTS {
                    return Err(err);
                }
                if err.status == Some(413) || err.code == "RequestEntityTooLargeException" {
                    let shrink = payload.shrink()?;
                    shrunk = true;
                    tracing::info!(
                        job_id,
                        initial_bytes = shrink.initial_bytes,
                        final_bytes = shrink.final_bytes,
                        truncated = shrink.truncated,
                        "Shrunk oversized batch raw data"
                    );
                } else if err.code == "CredentialsError" {
                    // Transient credential rotation; retry without noise.
                } else {
                    tracing::warn!(
                        job_id,
                        attempt,
                        batch_size = payload.len(),
                        error = %err,
                        "Batch upload failed; will retry"
                    );
                }
                tokio::time::sleep(retry_delay(attempt)).await;
            }
        }
    }
}
