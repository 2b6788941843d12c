use crate::{
    clock::Clock,
    config::Config,
    middleware::JwtKeys,
    services::{
        ConversationService, MessageService, NotificationBridge, NotificationSink, ServiceContext,
        UserDirectory,
    },
    store::ChatStore,
    websocket::{ConnectionRegistry, PresenceMirror, Router},
};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversations: ConversationService,
    pub messages: MessageService,
    pub router: Arc<Router>,
    pub jwt: Arc<JwtKeys>,
}

/// External collaborators the state is assembled from.
pub struct Collaborators {
    pub store: Arc<dyn ChatStore>,
    pub users: Arc<dyn UserDirectory>,
    pub sink: Arc<dyn NotificationSink>,
    pub mirror: Arc<dyn PresenceMirror>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Wire services, router and notification worker. The returned handle is
    /// the notification worker; it ends once every router clone is dropped.
    pub fn build(config: Config, parts: Collaborators) -> (Self, JoinHandle<()>) {
        let (bridge, worker) =
            NotificationBridge::spawn(parts.sink, config.notification_queue_capacity);
        let router = Arc::new(Router::new(
            Arc::new(ConnectionRegistry::new()),
            bridge,
            parts.mirror,
            config.typing_debounce(),
        ));

        let ctx = ServiceContext {
            store: parts.store,
            users: parts.users,
            router: router.clone(),
            clock: parts.clock,
            max_write_retries: config.max_write_retries,
            edit_window: chrono::Duration::minutes(config.edit_window_minutes),
        };
        let conversations = ConversationService::new(ctx.clone());
        let messages = MessageService::new(ctx, conversations.clone());

        let state = Self {
            jwt: Arc::new(JwtKeys::from_secret(&config.jwt_secret)),
            config: Arc::new(config),
            conversations,
            messages,
            router,
        };
        (state, worker)
    }
}
