//! Offline notification hand-off.
//!
//! The router submits one [`OfflineNotification`] per recipient that has no
//! live session. Submissions go through a bounded queue drained by a single
//! worker; when the queue is full the notification is dropped and counted.

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{truncate_preview, PREVIEW_MAX_CHARS};
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Record handed to the notification-persistence service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineNotification {
    pub id: String,
    pub recipient_id: Uuid,
    pub event_type: String,
    pub conversation_id: Uuid,
    pub message_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub preview: Option<String>,
    pub timestamp: i64,
}

impl OfflineNotification {
    pub fn new(
        recipient_id: Uuid,
        event_type: &str,
        conversation_id: Uuid,
        message_id: Option<Uuid>,
        actor_id: Option<Uuid>,
        preview: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            recipient_id,
            event_type: event_type.to_string(),
            conversation_id,
            message_id,
            actor_id,
            preview: preview.map(|p| truncate_preview(p, PREVIEW_MAX_CHARS)),
            timestamp: Utc::now().timestamp(),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &OfflineNotification) -> AppResult<()>;
}

/// Publishes notifications to Kafka, keyed by recipient.
#[derive(Clone)]
pub struct KafkaNotificationSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaNotificationSink {
    pub fn new(brokers: &str, topic: &str) -> AppResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("retries", "3")
            .set("retry.backoff.ms", "100")
            .create()
            .map_err(|e| AppError::StartServer(format!("kafka producer: {e}")))?;

        tracing::info!(brokers = %brokers, topic = %topic, "kafka notification sink initialized");

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for KafkaNotificationSink {
    async fn deliver(&self, notification: &OfflineNotification) -> AppResult<()> {
        let payload = serde_json::to_string(notification)
            .map_err(|e| AppError::ServiceUnavailable(format!("encode notification: {e}")))?;
        let key = notification.recipient_id.to_string();
        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    recipient_id = %notification.recipient_id,
                    event_type = %notification.event_type,
                    partition,
                    offset,
                    "notification published"
                );
                Ok(())
            }
            Err((e, _)) => Err(AppError::ServiceUnavailable(format!("kafka publish: {e}"))),
        }
    }
}

/// Fallback sink when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn deliver(&self, notification: &OfflineNotification) -> AppResult<()> {
        tracing::info!(
            recipient_id = %notification.recipient_id,
            event_type = %notification.event_type,
            conversation_id = %notification.conversation_id,
            "offline notification"
        );
        Ok(())
    }
}

/// Bounded front of a notification sink.
#[derive(Clone)]
pub struct NotificationBridge {
    tx: mpsc::Sender<OfflineNotification>,
}

impl NotificationBridge {
    /// Start the drain worker. The handle ends once every bridge clone is dropped.
    pub fn spawn(sink: Arc<dyn NotificationSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<OfflineNotification>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = sink.deliver(&notification).await {
                    tracing::warn!(
                        error = %e,
                        recipient_id = %notification.recipient_id,
                        event_type = %notification.event_type,
                        "failed to deliver offline notification"
                    );
                }
            }
            tracing::debug!("notification bridge drained");
        });
        (Self { tx }, handle)
    }

    /// Never blocks; returns `false` when the notification was dropped.
    pub fn submit(&self, notification: OfflineNotification) -> bool {
        match self.tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                metrics::NOTIFICATIONS_DROPPED.inc();
                tracing::warn!(
                    recipient_id = %n.recipient_id,
                    event_type = %n.event_type,
                    "notification queue full, dropping"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                metrics::NOTIFICATIONS_DROPPED.inc();
                tracing::error!(recipient_id = %n.recipient_id, "notification bridge closed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::{Mutex, Notify};

    struct GatedSink {
        gate: Notify,
        seen: Mutex<Vec<OfflineNotification>>,
    }

    #[async_trait]
    impl NotificationSink for GatedSink {
        async fn deliver(&self, notification: &OfflineNotification) -> AppResult<()> {
            self.gate.notified().await;
            self.seen.lock().await.push(notification.clone());
            Ok(())
        }
    }

    fn sample(recipient: Uuid) -> OfflineNotification {
        OfflineNotification::new(
            recipient,
            "message_received",
            Uuid::new_v4(),
            Some(Uuid::new_v4()),
            None,
            Some(&"x".repeat(300)),
        )
    }

    #[test]
    fn test_preview_is_truncated() {
        let n = sample(Uuid::new_v4());
        assert_eq!(n.preview.unwrap().chars().count(), PREVIEW_MAX_CHARS);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let sink = Arc::new(GatedSink {
            gate: Notify::new(),
            seen: Mutex::new(Vec::new()),
        });
        let (bridge, _handle) = NotificationBridge::spawn(sink.clone(), 1);

        // The worker takes the first item and parks on the gate; the second
        // fills the queue; the third has nowhere to go.
        assert!(bridge.submit(sample(Uuid::new_v4())));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(bridge.submit(sample(Uuid::new_v4())));
        assert!(!bridge.submit(sample(Uuid::new_v4())));

        sink.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        sink.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.seen.lock().await.len(), 2);
    }

    #[test]
    fn test_serialization_shape() {
        let n = sample(Uuid::nil());
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event_type"], "message_received");
        assert_eq!(json["recipient_id"], Uuid::nil().to_string());
    }
}
