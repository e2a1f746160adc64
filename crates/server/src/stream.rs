// crates/server/src/stream.rs
//! Per-job publish/subscribe fan-out for progress streaming.
//!
//! Every job gets its own bounded `broadcast` channel, created lazily on
//! first publish or subscribe. A lagging subscriber loses the oldest
//! buffered events rather than blocking the job's progress path; only the
//! terminal snapshot's delivery is guaranteed (the executor force-flushes
//! it and the SSE handler forwards it before closing).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use docharvest_core::{JobId, JobStatus, ProgressSnapshot};
use docharvest_db::JobRecord;

/// Per-subscriber buffer capacity before oldest events are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// Body shared by `task_update` and `progress_update` frames.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressFrame {
    pub task_id: JobId,
    pub status: JobStatus,
    pub progress_message: Option<String>,
    pub progress_data: Option<ProgressSnapshot>,
    pub start_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressFrame {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            task_id: record.id,
            status: record.status,
            progress_message: if record.progress_log.is_empty() {
                None
            } else {
                Some(record.progress_log.clone())
            },
            progress_data: record.progress.clone(),
            start_time: record.started_at,
            updated_at: Some(Utc::now()),
        }
    }
}

/// One message on the streaming channel. Serialized bodies match the SSE
/// wire contract exactly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ConnectionEstablished { task_id: JobId, message: String },
    Heartbeat { message: String },
    TaskUpdate(ProgressFrame),
    ProgressUpdate(ProgressFrame),
    Error { message: String },
}

impl StreamEvent {
    /// The terminal `task_update` is the close signal for SSE streams.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::TaskUpdate(frame) if frame.status.is_terminal())
    }
}

/// Fan-out hub: job id -> broadcast sender.
pub struct StreamHub {
    channels: Mutex<HashMap<JobId, broadcast::Sender<StreamEvent>>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, id: JobId) -> broadcast::Sender<StreamEvent> {
        let mut channels = self.channels.lock().expect("stream hub lock poisoned");
        channels
            .entry(id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish an event to all of a job's subscribers. Never blocks; a
    /// send with no subscribers is fine.
    pub fn publish(&self, id: JobId, event: StreamEvent) {
        let _ = self.sender(id).send(event);
    }

    /// Attach a new subscription for a job.
    pub fn subscribe(&self, id: JobId) -> broadcast::Receiver<StreamEvent> {
        self.sender(id).subscribe()
    }

    /// Drop a job's channel after terminal delivery. Existing receivers
    /// drain what is already buffered, then observe `Closed`.
    pub fn remove(&self, id: JobId) {
        self.channels
            .lock()
            .expect("stream hub lock poisoned")
            .remove(&id);
    }

    /// Number of live subscribers for a job.
    pub fn subscriber_count(&self, id: JobId) -> usize {
        self.channels
            .lock()
            .expect("stream hub lock poisoned")
            .get(&id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: JobId, status: JobStatus) -> ProgressFrame {
        ProgressFrame {
            task_id: id,
            status,
            progress_message: None,
            progress_data: None,
            start_time: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let hub = StreamHub::new();
        let mut a = hub.subscribe(1);
        let mut b = hub.subscribe(1);

        hub.publish(1, StreamEvent::TaskUpdate(frame(1, JobStatus::Running)));

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.unwrap();
            assert!(matches!(
                event,
                StreamEvent::TaskUpdate(ProgressFrame { task_id: 1, status: JobStatus::Running, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_channels_are_per_job() {
        let hub = StreamHub::new();
        let mut one = hub.subscribe(1);
        let _two = hub.subscribe(2);

        hub.publish(2, StreamEvent::Heartbeat { message: "hi".into() });
        assert!(one.try_recv().is_err());
        assert_eq!(hub.subscriber_count(1), 1);
        assert_eq!(hub.subscriber_count(2), 1);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let hub = StreamHub::new();
        let mut rx = hub.subscribe(1);
        for i in 0..(CHANNEL_CAPACITY + 10) {
            hub.publish(
                1,
                StreamEvent::Heartbeat { message: i.to_string() },
            );
        }
        // The first recv reports how far behind we fell; the channel then
        // resumes from the oldest retained event.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 10),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let hub = StreamHub::new();
        hub.publish(9, StreamEvent::Error { message: "x".into() });
        assert_eq!(hub.subscriber_count(9), 0);
    }

    #[test]
    fn test_wire_contract_shapes() {
        let event = StreamEvent::ConnectionEstablished {
            task_id: 3,
            message: "connection established".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "connection_established");
        assert_eq!(json["task_id"], 3);

        let event = StreamEvent::TaskUpdate(frame(3, JobStatus::Completed));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_update");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["progress_data"], serde_json::Value::Null);
        assert!(event.is_terminal());

        let event = StreamEvent::ProgressUpdate(frame(3, JobStatus::Running));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress_update");
        assert!(!event.is_terminal());

        let json =
            serde_json::to_value(StreamEvent::Heartbeat { message: "ok".into() }).unwrap();
        assert_eq!(json["type"], "heartbeat");
    }
}
