//! Per-job progress event bus.
//!
//! Every job gets its own broadcast channel, created on first publish or
//! first subscribe. Events are fan-out only — the bus never persists
//! event history, so a subscriber that connects late can only rely on
//! `GET /jobs/{id}` to catch up, per the Job Store's stated guarantees.

use crate::model::{ErrorKind, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// A progress/terminal event, serialized verbatim onto the WS stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscribeEvent {
    Progress {
        progress: u8,
        stage: String,
        message: String,
    },
    Completed,
    Error {
        kind: ErrorKind,
        stage: String,
        message: String,
    },
}

/// Per-job progress buses, each a small broadcast channel.
///
/// Channels are created lazily and never explicitly torn down; the
/// sender is dropped (and the channel reclaimed) when the job's
/// `EventBus` clone and all subscribers are dropped, since nothing else
/// holds a strong reference once the orchestrator finishes with a job.
pub struct EventBus {
    capacity: usize,
    channels: Mutex<HashMap<JobId, broadcast::Sender<TranscribeEvent>>>,
}

impl EventBus {
    /// Creates a bus whose per-job channels each buffer up to `capacity`
    /// events before the oldest is dropped for a lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Publishes `event` to all current subscribers of `job_id`.
    ///
    /// Best-effort: if nobody is subscribed, the event is simply
    /// dropped. This is the non-blocking publish required of the
    /// orchestrator — a slow or absent subscriber never stalls the
    /// pipeline.
    pub fn publish(&self, job_id: JobId, event: TranscribeEvent) {
        let sender = self.sender_for(job_id);
        let _ = sender.send(event);
    }

    /// Subscribes to events published for `job_id` from this point
    /// forward. Events published before this call are not replayed.
    pub fn subscribe(&self, job_id: JobId) -> broadcast::Receiver<TranscribeEvent> {
        self.sender_for(job_id).subscribe()
    }

    fn sender_for(&self, job_id: JobId) -> broadcast::Sender<TranscribeEvent> {
        let mut channels = self.channels.lock().expect("event bus mutex poisoned");
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Drops the channel for a finished job, releasing the sender so
    /// any still-open receivers see the stream close. Safe to call even
    /// if no channel was ever created for this job.
    pub fn retire(&self, job_id: JobId) {
        let mut channels = self.channels.lock().expect("event bus mutex poisoned");
        channels.remove(&job_id);
    }
}
