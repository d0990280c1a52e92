//! Uploader behaviour against a scripted in-memory synchronization API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use graphbeam_storage::{codec, GraphObjectKind, StorageLayout};
use graphbeam_sync::{
    synchronize, EventQueue, JobConfig, SyncApi, SyncJob, SyncOptions, BATCH_SIZE_LIMIT_BYTES,
};
use graphbeam_types::{
    Entity, ExecutionSummary, FlushedFile, IntegrationError, Metric, PartialDatasetMetadata,
    RawDataEntry, Relationship, RunEventSink, StepId, StepResult, StepStatus, SyncEvent,
};

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
    upload_lifecycle: Mutex<Vec<String>>,
}

impl RunEventSink for RecordingSink {
    fn publish_metric(&self, _metric: &Metric) {}
    fn validation_failure(&self, _error: &IntegrationError) {}
    fn sync_upload_start(&self, job_id: &str) {
        self.upload_lifecycle
            .lock()
            .unwrap()
            .push(format!("start:{job_id}"));
    }
    fn sync_upload_end(&self, job_id: &str) {
        self.upload_lifecycle
            .lock()
            .unwrap()
            .push(format!("end:{job_id}"));
    }
    fn event(&self, event: &SyncEvent) {
        self.events.lock().unwrap().push(event.name.clone());
    }
}

/// Scripted API double: fails the first `fail_uploads` batch uploads with
/// `fail_with`, then accepts everything.
struct ScriptedApi {
    fail_uploads: AtomicUsize,
    fail_with: Option<IntegrationError>,
    entity_batches: Mutex<Vec<Vec<Entity>>>,
    relationship_batches: Mutex<Vec<Vec<Relationship>>>,
    upload_attempts: AtomicUsize,
    finalized_with: Mutex<Option<PartialDatasetMetadata>>,
    aborted_with: Mutex<Option<String>>,
}

impl ScriptedApi {
    fn accepting() -> Self {
        Self::failing_first(0, None)
    }

    fn failing_first(count: usize, error: Option<IntegrationError>) -> Self {
        Self {
            fail_uploads: AtomicUsize::new(count),
            fail_with: error,
            entity_batches: Mutex::new(Vec::new()),
            relationship_batches: Mutex::new(Vec::new()),
            upload_attempts: AtomicUsize::new(0),
            finalized_with: Mutex::new(None),
            aborted_with: Mutex::new(None),
        }
    }

    fn take_failure(&self) -> Option<IntegrationError> {
        let remaining = self.fail_uploads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_uploads.fetch_sub(1, Ordering::SeqCst);
            self.fail_with.clone()
        } else {
            None
        }
    }
}

#[async_trait]
impl SyncApi for ScriptedApi {
    async fn create_job(&self, _config: &JobConfig) -> Result<SyncJob, IntegrationError> {
        Ok(SyncJob {
            id: "job-1".into(),
            status: Some("AWAITING_UPLOADS".into()),
        })
    }

    async fn upload_entities(
        &self,
        _job_id: &str,
        entities: &[Entity],
    ) -> Result<(), IntegrationError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.entity_batches.lock().unwrap().push(entities.to_vec());
        Ok(())
    }

    async fn upload_relationships(
        &self,
        _job_id: &str,
        relationships: &[Relationship],
    ) -> Result<(), IntegrationError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.relationship_batches
            .lock()
            .unwrap()
            .push(relationships.to_vec());
        Ok(())
    }

    async fn finalize_job(
        &self,
        job_id: &str,
        partial_datasets: &PartialDatasetMetadata,
    ) -> Result<SyncJob, IntegrationError> {
        *self.finalized_with.lock().unwrap() = Some(partial_datasets.clone());
        Ok(SyncJob {
            id: job_id.into(),
            status: Some("FINALIZE_PENDING".into()),
        })
    }

    async fn abort_job(&self, job_id: &str, reason: &str) -> Result<SyncJob, IntegrationError> {
        *self.aborted_with.lock().unwrap() = Some(reason.to_string());
        Ok(SyncJob {
            id: job_id.into(),
            status: Some("ABORTED".into()),
        })
    }
}

struct Staging {
    _dir: tempfile::TempDir,
    layout: StorageLayout,
}

impl Staging {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("staging"));
        layout.reset().unwrap();
        Self { _dir: dir, layout }
    }

    fn stage_entities(&self, step: &str, entities: Vec<Entity>) {
        let dir = self
            .layout
            .step_dir(&StepId::new(step), GraphObjectKind::Entities);
        std::fs::create_dir_all(&dir).unwrap();
        let bytes = codec::encode(&FlushedFile::Entities { entities }).unwrap();
        std::fs::write(dir.join("000001.json"), bytes).unwrap();
    }

    fn stage_relationships(&self, step: &str, relationships: Vec<Relationship>) {
        let dir = self
            .layout
            .step_dir(&StepId::new(step), GraphObjectKind::Relationships);
        std::fs::create_dir_all(&dir).unwrap();
        let bytes = codec::encode(&FlushedFile::Relationships { relationships }).unwrap();
        std::fs::write(dir.join("000001.json"), bytes).unwrap();
    }

    fn write_summary(&self, partial_types: &[&str]) {
        let summary = ExecutionSummary::new(vec![StepResult {
            id: StepId::new("my-step"),
            name: "my-step".into(),
            declared_types: partial_types.iter().map(|s| s.to_string()).collect(),
            partial_types: vec![],
            encountered_types: vec![],
            depends_on: None,
            status: if partial_types.is_empty() {
                StepStatus::Success
            } else {
                StepStatus::Failure
            },
        }]);
        self.layout.write_summary(&summary).unwrap();
    }
}

fn entities(count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| Entity::new(format!("k{i}"), "acme_record", "Record"))
        .collect()
}

async fn run_sync(
    api: Arc<ScriptedApi>,
    staging: &Staging,
    sink: Arc<RecordingSink>,
    events: &EventQueue,
) -> Result<graphbeam_sync::SyncReport, IntegrationError> {
    synchronize(
        api,
        &staging.layout,
        sink,
        events,
        SyncOptions::new(JobConfig::IntegrationManaged {
            integration_instance_id: "instance-1".into(),
        }),
    )
    .await
}

#[tokio::test]
async fn batches_are_split_at_the_batch_size_limit() {
    let staging = Staging::new();
    staging.stage_entities("my-step", entities(600));
    staging.write_summary(&[]);

    let api = Arc::new(ScriptedApi::accepting());
    let sink = Arc::new(RecordingSink::default());
    let events = EventQueue::new();
    let report = run_sync(api.clone(), &staging, sink, &events).await.unwrap();

    assert_eq!(report.entities_uploaded, 600);
    assert_eq!(report.batches_sent, 3);

    let mut sizes: Vec<usize> = api
        .entity_batches
        .lock()
        .unwrap()
        .iter()
        .map(Vec::len)
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![100, 250, 250]);
}

#[tokio::test]
async fn oversize_batch_is_shrunk_and_retried() {
    let staging = Staging::new();
    let mut raw = serde_json::Map::new();
    raw.insert(
        "payload".into(),
        serde_json::Value::String("x".repeat(BATCH_SIZE_LIMIT_BYTES + 1024)),
    );
    let oversized = Entity::new("big", "acme_record", "Record").with_raw_data(RawDataEntry {
        name: Some("default".into()),
        raw_data: raw,
    });
    staging.stage_entities("my-step", vec![oversized]);
    staging.write_summary(&[]);

    let api = Arc::new(ScriptedApi::failing_first(
        1,
        Some(
            IntegrationError::upload_retriable("RequestEntityTooLargeException", "too large")
                .with_status(413),
        ),
    ));
    let sink = Arc::new(RecordingSink::default());
    let events = EventQueue::new();
    let report = run_sync(api.clone(), &staging, sink, &events).await.unwrap();

    assert_eq!(report.batches_shrunk, 1);
    assert_eq!(report.entities_uploaded, 1);

    let batches = api.entity_batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let uploaded = &batches[0][0];
    assert_eq!(
        uploaded.raw_data.as_ref().unwrap()[0].raw_data["payload"],
        "TRUNCATED"
    );
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let staging = Staging::new();
    staging.stage_entities("my-step", entities(3));
    staging.write_summary(&[]);

    let api = Arc::new(ScriptedApi::failing_first(
        2,
        Some(IntegrationError::upload_retriable("HTTP_503", "unavailable").with_status(503)),
    ));
    let sink = Arc::new(RecordingSink::default());
    let events = EventQueue::new();
    let report = run_sync(api.clone(), &staging, sink, &events).await.unwrap();

    assert_eq!(report.entities_uploaded, 3);
    assert_eq!(api.upload_attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn job_no_longer_accepting_uploads_is_fatal_and_aborts() {
    let staging = Staging::new();
    staging.stage_entities("my-step", entities(1));
    staging.write_summary(&[]);

    let api = Arc::new(ScriptedApi::failing_first(
        usize::MAX,
        Some(IntegrationError::sync_api("JOB_NOT_AWAITING_UPLOADS", "job ended").with_status(400)),
    ));
    let sink = Arc::new(RecordingSink::default());
    let events = EventQueue::new();
    let err = run_sync(api.clone(), &staging, sink, &events)
        .await
        .unwrap_err();

    assert_eq!(err.code, "INTEGRATION_UPLOAD_AFTER_JOB_ENDED");
    assert_eq!(api.upload_attempts.load(Ordering::SeqCst), 1);
    let aborted = api.aborted_with.lock().unwrap();
    assert!(aborted.as_ref().unwrap().contains("stopped accepting uploads"));
    assert!(api.finalized_with.lock().unwrap().is_none());
}

#[tokio::test]
async fn finalize_receives_partial_datasets_from_the_summary() {
    let staging = Staging::new();
    staging.stage_entities("my-step", entities(2));
    staging.stage_relationships(
        "my-step",
        vec![Relationship::direct("k0|k1", "acme_has", "HAS", "k0", "k1")],
    );
    staging.write_summary(&["acme_record"]);

    let api = Arc::new(ScriptedApi::accepting());
    let sink = Arc::new(RecordingSink::default());
    let events = EventQueue::new();
    let report = run_sync(api.clone(), &staging, sink.clone(), &events)
        .await
        .unwrap();

    assert_eq!(report.relationships_uploaded, 1);
    assert_eq!(
        report.partial_datasets.types,
        vec!["acme_record".to_string()]
    );
    assert_eq!(
        api.finalized_with.lock().unwrap().as_ref().unwrap().types,
        vec!["acme_record".to_string()]
    );
    assert_eq!(
        *sink.upload_lifecycle.lock().unwrap(),
        vec!["start:job-1", "end:job-1"]
    );
}

#[tokio::test]
async fn events_are_drained_before_finalize() {
    let staging = Staging::new();
    staging.stage_entities("my-step", entities(1));
    staging.write_summary(&[]);

    let api = Arc::new(ScriptedApi::accepting());
    let sink = Arc::new(RecordingSink::default());
    let events = EventQueue::new();
    events.publish(SyncEvent::new("step_end", "my-step completed"));
    events.publish(SyncEvent::new("run_end", "collection finished"));

    run_sync(api, &staging, sink.clone(), &events).await.unwrap();

    assert!(events.is_empty());
    assert_eq!(
        *sink.events.lock().unwrap(),
        vec!["step_end", "run_end"]
    );
}

#[tokio::test]
async fn empty_staging_uploads_nothing_but_still_finalizes() {
    let staging = Staging::new();
    staging.write_summary(&[]);

    let api = Arc::new(ScriptedApi::accepting());
    let sink = Arc::new(RecordingSink::default());
    let events = EventQueue::new();
    let report = run_sync(api.clone(), &staging, sink, &events).await.unwrap();

    assert_eq!(report.batches_sent, 0);
    assert_eq!(api.upload_attempts.load(Ordering::SeqCst), 0);
    assert!(api.finalized_with.lock().unwrap().is_some());
}
