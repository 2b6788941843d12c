//! Shared fixtures for integration tests.
//!
//! Builds the full service graph over `MemoryStore`, a `ManualClock` and a
//! recording notification sink, and opens router sessions backed by real
//! channels.

#![allow(dead_code)]

use async_trait::async_trait;
use chat_service::{
    clock::{Clock, ManualClock},
    config::Config,
    error::AppResult,
    models::{ConversationKind, ConversationSettings, Conversation, MessageContent, MessageType},
    services::{
        conversation_service::CreateConversation, message_service::SendMessage,
        NotificationSink, OfflineNotification, StaticUserDirectory,
    },
    state::{AppState, Collaborators},
    store::MemoryStore,
    websocket::{NoopPresenceMirror, SessionId},
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Records every notification handed to it.
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<OfflineNotification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &OfflineNotification) -> AppResult<()> {
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub users: Arc<StaticUserDirectory>,
    pub clock: ManualClock,
    pub sink: Arc<RecordingSink>,
}

/// One live router session.
pub struct Session {
    pub id: SessionId,
    pub user_id: Uuid,
    pub rx: mpsc::Receiver<String>,
}

impl Session {
    /// Every frame queued so far, parsed.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(raw) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&raw).expect("frame is JSON"));
        }
        frames
    }

    /// Frames of one event type.
    pub fn drain_type(&mut self, event_type: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|f| f["type"] == event_type)
            .collect()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::for_tests(JWT_SECRET))
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let users = Arc::new(StaticUserDirectory::default());
        let clock = ManualClock::new(Utc::now());
        let sink = Arc::new(RecordingSink::default());
        let (state, _worker) = AppState::build(
            config,
            Collaborators {
                store: store.clone(),
                users: users.clone(),
                sink: sink.clone(),
                mirror: Arc::new(NoopPresenceMirror),
                clock: Arc::new(clock.clone()),
            },
        );
        Self {
            state,
            store,
            users,
            clock,
            sink,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn user(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.users.insert(id).await;
        id
    }

    pub async fn users(&self, n: usize) -> Vec<Uuid> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.user().await);
        }
        out
    }

    /// Open a session subscribed to the user's active conversations, the
    /// same way the WebSocket route does.
    pub async fn connect(&self, user_id: Uuid) -> Session {
        let rooms = self.rooms_of(user_id).await;
        let session = self.connect_with_rooms(user_id, &rooms).await;
        let current = self.rooms_of(user_id).await;
        self.state.router.sync_rooms(session.id, &current).await;
        session
    }

    /// Open a session subscribed to exactly `rooms`.
    pub async fn connect_with_rooms(&self, user_id: Uuid, rooms: &[Uuid]) -> Session {
        let (tx, rx) = mpsc::channel(64);
        let id = self.state.router.connect(user_id, rooms, tx).await;
        Session { id, user_id, rx }
    }

    pub async fn rooms_of(&self, user_id: Uuid) -> Vec<Uuid> {
        self.state
            .conversations
            .active_conversation_ids(user_id)
            .await
            .expect("list rooms")
    }

    pub async fn group(&self, creator: Uuid, members: &[Uuid]) -> Conversation {
        self.group_with(creator, members, ConversationSettings::default())
            .await
    }

    pub async fn group_with(
        &self,
        creator: Uuid,
        members: &[Uuid],
        settings: ConversationSettings,
    ) -> Conversation {
        self.state
            .conversations
            .create_group_or_channel(
                creator,
                CreateConversation {
                    kind: ConversationKind::Group,
                    name: "team".into(),
                    description: None,
                    avatar_url: None,
                    participant_ids: members.to_vec(),
                    settings,
                },
            )
            .await
            .expect("create group")
    }

    pub async fn send_text(
        &self,
        sender: Uuid,
        conversation_id: Uuid,
        text: &str,
    ) -> AppResult<chat_service::models::Message> {
        self.send_reply(sender, conversation_id, text, None).await
    }

    pub async fn send_reply(
        &self,
        sender: Uuid,
        conversation_id: Uuid,
        text: &str,
        reply_to: Option<Uuid>,
    ) -> AppResult<chat_service::models::Message> {
        self.state
            .messages
            .send(
                sender,
                SendMessage {
                    conversation_id,
                    message_type: MessageType::Text,
                    content: MessageContent::Text { text: text.into() },
                    reply_to,
                },
            )
            .await
    }

    /// Let the notification worker drain.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
