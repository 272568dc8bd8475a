//! Job Store (C1): the authoritative in-memory job record map plus the
//! progress event bus.
//!
//! One mutable record per job with explicit state transitions, all
//! independent jobs held behind a single `RwLock`-guarded map rather
//! than a dedicated record per process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use transcribe_common::model::{Artifact, Instrument, JobError, JobId, JobOptions, JobStatus, Metadata, Source};

/// The top-level request entity: one row per submitted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub source: Source,
    pub options: JobOptions,
    pub status: JobStatus,
    pub progress: u8,
    pub current_stage: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<JobError>,
    pub artifacts: HashMap<String, Artifact>,
    pub metadata: Metadata,
}

impl JobRecord {
    fn new(job_id: JobId, source: Source, options: JobOptions) -> Self {
        Self {
            job_id,
            source,
            options,
            status: JobStatus::Queued,
            progress: 0,
            current_stage: "queued".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            artifacts: HashMap::new(),
            metadata: Metadata::default(),
        }
    }

    /// Whether `next` is a legal transition from the current status.
    /// The only legal path is `queued -> running -> {completed|failed}`.
    fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self.status, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

/// A partial update applied atomically to one job record. All fields
/// are optional; `None` leaves the corresponding record field
/// untouched.
#[derive(Debug, Default, Clone)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub current_stage: Option<String>,
    pub error: Option<JobError>,
    pub artifact: Option<(Instrument, Artifact)>,
    pub metadata: Option<Metadata>,
}

impl JobPatch {
    pub fn stage(progress: u8, stage: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            current_stage: Some(stage.into()),
            ..Default::default()
        }
    }

    pub fn running() -> Self {
        Self {
            status: Some(JobStatus::Running),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            ..Default::default()
        }
    }

    pub fn failed(error: JobError) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("illegal status transition for job {0}")]
    IllegalTransition(JobId),
}

/// Durable key->record map plus the per-job pub/sub channel, per C1's
/// contract. "Durable" here means authoritative for the process
/// lifetime; [`crate::db`] mirrors records to sqlite for observability
/// across restarts without that mirror being load-bearing for the
/// store's own guarantees.
#[derive(Clone)]
pub struct JobStore {
    records: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    events: Arc<transcribe_common::EventBus>,
}

impl JobStore {
    pub fn new(events: Arc<transcribe_common::EventBus>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Creates a new job record. Succeeds exactly once per id.
    pub async fn create(
        &self,
        job_id: JobId,
        source: Source,
        options: JobOptions,
    ) -> Result<JobRecord, JobStoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&job_id) {
            return Err(JobStoreError::AlreadyExists(job_id));
        }
        let record = JobRecord::new(job_id, source, options);
        records.insert(job_id, record.clone());
        Ok(record)
    }

    /// Atomically merges `patch` into the record for `job_id`. Illegal
    /// state transitions fail without side effects: no field is
    /// written, matching the "linearizable per job_id" guarantee.
    pub async fn update(&self, job_id: JobId, patch: JobPatch) -> Result<JobRecord, JobStoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        if let Some(status) = patch.status {
            if status != record.status && !record.can_transition_to(status) {
                return Err(JobStoreError::IllegalTransition(job_id));
            }
        }

        if let Some(status) = patch.status {
            if status == JobStatus::Running && record.started_at.is_none() {
                record.started_at = Some(Utc::now());
            }
            if matches!(status, JobStatus::Completed | JobStatus::Failed) {
                record.finished_at = Some(Utc::now());
            }
            record.status = status;
        }
        if let Some(progress) = patch.progress {
            record.progress = progress;
        }
        if let Some(stage) = patch.current_stage {
            record.current_stage = stage;
        }
        if let Some(error) = patch.error {
            record.error = Some(error);
        }
        if let Some((instrument, artifact)) = patch.artifact {
            record.artifacts.insert(instrument.as_tag().to_string(), artifact);
        }
        if let Some(metadata) = patch.metadata {
            record.metadata = metadata;
        }

        Ok(record.clone())
    }

    /// Fetches a snapshot of the record for `job_id`.
    pub async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.records.read().await.get(&job_id).cloned()
    }

    /// Fan-outs `event` to all current subscribers for `job_id`. Best
    /// effort and non-blocking: a lagging or absent subscriber never
    /// stalls the caller.
    pub fn publish(&self, job_id: JobId, event: transcribe_common::TranscribeEvent) {
        self.events.publish(job_id, event);
    }

    /// Subscribes to events published for `job_id` from this point
    /// forward.
    pub fn subscribe(&self, job_id: JobId) -> tokio::sync::broadcast::Receiver<transcribe_common::TranscribeEvent> {
        self.events.subscribe(job_id)
    }

    /// Releases the job's event channel once it has reached a terminal
    /// state and published its last event. The job record itself is
    /// untouched and stays queryable indefinitely; only the
    /// now-unneeded broadcast channel is reclaimed.
    pub fn retire_events(&self, job_id: JobId) {
        self.events.retire(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcribe_common::model::{ErrorKind, JobOptions};

    fn options() -> JobOptions {
        JobOptions {
            instruments: vec![Instrument::Piano],
            vocal_substitute_program: 0,
            enable_tta: false,
            enable_refiner: false,
        }
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = JobStore::new(Arc::new(transcribe_common::EventBus::new(16)));
        let job_id = JobId::new_v4();
        let source = Source::Upload { path: "a.wav".into() };
        store.create(job_id, source, options()).await.unwrap();

        let record = store.get(job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = JobStore::new(Arc::new(transcribe_common::EventBus::new(16)));
        let job_id = JobId::new_v4();
        let source = Source::Upload { path: "a.wav".into() };
        store.create(job_id, source.clone(), options()).await.unwrap();
        let err = store.create(job_id, source, options()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let store = JobStore::new(Arc::new(transcribe_common::EventBus::new(16)));
        let job_id = JobId::new_v4();
        store
            .create(job_id, Source::Upload { path: "a.wav".into() }, options())
            .await
            .unwrap();

        // completed -> running is illegal; queued -> completed is also illegal
        // (must pass through running).
        let err = store.update(job_id, JobPatch::completed()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::IllegalTransition(_)));

        store.update(job_id, JobPatch::running()).await.unwrap();
        let record = store.update(job_id, JobPatch::completed()).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.finished_at.is_some());

        let err = store.update(job_id, JobPatch::running()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn progress_is_monotonic_in_practice() {
        let store = JobStore::new(Arc::new(transcribe_common::EventBus::new(16)));
        let job_id = JobId::new_v4();
        store
            .create(job_id, Source::Upload { path: "a.wav".into() }, options())
            .await
            .unwrap();
        store.update(job_id, JobPatch::running()).await.unwrap();

        let mut last = 0u8;
        for p in [10, 25, 60, 95] {
            let record = store.update(job_id, JobPatch::stage(p, "x")).await.unwrap();
            assert!(record.progress >= last);
            last = record.progress;
        }
    }

    #[tokio::test]
    async fn failed_job_records_error_kind() {
        let store = JobStore::new(Arc::new(transcribe_common::EventBus::new(16)));
        let job_id = JobId::new_v4();
        store
            .create(job_id, Source::Upload { path: "a.wav".into() }, options())
            .await
            .unwrap();
        store.update(job_id, JobPatch::running()).await.unwrap();

        let error = JobError {
            kind: ErrorKind::ModelError,
            stage: "ensemble/drums".to_string(),
            message: "oom".to_string(),
        };
        let record = store.update(job_id, JobPatch::failed(error)).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.unwrap().kind, ErrorKind::ModelError);
    }
}
