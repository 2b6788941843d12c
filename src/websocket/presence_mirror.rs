//! Publishes presence transitions to Redis so other instances can read them.
//!
//! Room routing stays in-process; only the online/offline bit is shared.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::events::PresenceStatus;

pub const PRESENCE_CHANNEL: &str = "chat:presence-updates";
pub const PRESENCE_TTL_SECS: u64 = 300;

pub fn presence_key(user_id: Uuid) -> String {
    format!("chat:presence:{user_id}")
}

#[async_trait]
pub trait PresenceMirror: Send + Sync {
    async fn set_status(&self, user_id: Uuid, status: PresenceStatus);

    /// Extend the online marker of a user that is still connected.
    async fn refresh(&self, user_id: Uuid);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPresenceMirror;

#[async_trait]
impl PresenceMirror for NoopPresenceMirror {
    async fn set_status(&self, _user_id: Uuid, _status: PresenceStatus) {}

    async fn refresh(&self, _user_id: Uuid) {}
}

#[derive(Clone)]
pub struct RedisPresenceMirror {
    manager: Arc<Mutex<ConnectionManager>>,
}

impl RedisPresenceMirror {
    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            manager: Arc::new(Mutex::new(manager)),
        })
    }

    async fn connection(&self) -> ConnectionManager {
        self.manager.lock().await.clone()
    }

    async fn write_status(&self, user_id: Uuid, status: PresenceStatus) -> RedisResult<()> {
        let mut conn = self.connection().await;
        let key = presence_key(user_id);
        let payload = serde_json::json!({ "user_id": user_id, "status": status }).to_string();

        let mut pipe = redis::pipe();
        pipe.atomic();
        match status {
            PresenceStatus::Online => {
                pipe.set_ex(&key, "online", PRESENCE_TTL_SECS).ignore();
            }
            PresenceStatus::Offline => {
                pipe.del(&key).ignore();
            }
        }
        pipe.publish(PRESENCE_CHANNEL, payload).ignore();
        pipe.query_async::<_, ()>(&mut conn).await
    }
}

#[async_trait]
impl PresenceMirror for RedisPresenceMirror {
    async fn set_status(&self, user_id: Uuid, status: PresenceStatus) {
        if let Err(e) = self.write_status(user_id, status).await {
            tracing::warn!(error = %e, user_id = %user_id, ?status, "failed to mirror presence");
        }
    }

    async fn refresh(&self, user_id: Uuid) {
        let mut conn = self.connection().await;
        let result: RedisResult<()> = redis::cmd("EXPIRE")
            .arg(presence_key(user_id))
            .arg(PRESENCE_TTL_SECS)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, user_id = %user_id, "failed to refresh presence ttl");
        }
    }
}
