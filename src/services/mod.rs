pub mod conversation_service;
pub mod identity;
pub mod message_service;
pub mod notification_producer;

pub use conversation_service::ConversationService;
pub use identity::{IdentityClient, StaticUserDirectory, TrustTokenDirectory, UserDirectory};
pub use message_service::MessageService;
pub use notification_producer::{
    KafkaNotificationSink, LogNotificationSink, NotificationBridge, NotificationSink,
    OfflineNotification,
};

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::store::ChatStore;
use crate::websocket::Router;
use std::future::Future;
use std::sync::Arc;

/// Collaborators shared by the conversation and message services.
#[derive(Clone)]
pub struct ServiceContext {
    pub store: Arc<dyn ChatStore>,
    pub users: Arc<dyn UserDirectory>,
    pub router: Arc<Router>,
    pub clock: Arc<dyn Clock>,
    pub max_write_retries: u32,
    pub edit_window: chrono::Duration,
}

/// Run a load-mutate-commit attempt until it stops losing version races.
pub(crate) async fn with_retries<T, F, Fut>(operation: &'static str, max_retries: u32, mut attempt: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Err(AppError::VersionConflict { entity, id }) if retries < max_retries => {
                retries += 1;
                metrics::WRITE_CONFLICTS.with_label_values(&[operation]).inc();
                tracing::debug!(operation, entity, id = %id, retries, "write conflict, retrying");
            }
            Err(e @ AppError::VersionConflict { .. }) => {
                tracing::warn!(operation, retries, "giving up after repeated write conflicts");
                return Err(e);
            }
            other => return other,
        }
    }
}
