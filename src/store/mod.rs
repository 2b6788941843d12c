//! Storage seam for conversation and message documents.
//!
//! Both document kinds carry a `version`. A [`WriteBatch`] is committed
//! all-or-nothing: if any stored version differs from the one the caller
//! loaded, nothing is written and [`AppError::VersionConflict`] is returned.
//!
//! Send bookkeeping (reply counters and the conversation summary) is not
//! version-checked. The store applies it in place under its own lock and
//! still bumps the version, so concurrent sends never conflict with each
//! other while whole-document writers see the change and retry.

pub mod memory;
pub mod postgres;

use crate::error::AppResult;
use crate::models::{Conversation, LastMessageSummary, Message};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Keyset position in a timeline ordered by `(created_at, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn of(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id,
        }
    }

    /// Everything strictly older than `at`, whatever its id.
    pub fn before_time(at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            id: Uuid::nil(),
        }
    }

    /// True when `message` sorts strictly before this position.
    pub fn admits(&self, message: &Message) -> bool {
        Self::of(message) < *self
    }
}

/// Page request over one conversation's messages, newest first.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub conversation_id: Uuid,
    pub viewer: Uuid,
    pub before: Option<Cursor>,
    /// Retention cutoff; older messages are filtered out.
    pub not_before: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Search over a set of conversations. Tombstones never match.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub viewer: Uuid,
    /// Conversation ids paired with their retention cutoff.
    pub scopes: Vec<(Uuid, Option<DateTime<Utc>>)>,
    pub needle: String,
    pub limit: usize,
}

/// Documents written together in one commit.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Must not exist yet.
    pub new_messages: Vec<Message>,
    /// Previously loaded messages, carrying the version they were read at.
    pub messages: Vec<Message>,
    /// Previously loaded conversations, carrying the version they were read at.
    pub conversations: Vec<Conversation>,
    /// Reply targets whose `reply_count` goes up by one. A missing target is
    /// `NotFound`, a tombstoned one `InvalidState`.
    pub reply_increments: Vec<Uuid>,
    /// Per-send conversation updates; see [`Conversation::record_message`].
    pub activity: Vec<ConversationActivity>,
}

/// New message recorded against its conversation's summary.
#[derive(Debug, Clone)]
pub struct ConversationActivity {
    pub conversation_id: Uuid,
    pub last_message: LastMessageSummary,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_message(mut self, message: Message) -> Self {
        self.new_messages.push(message);
        self
    }

    pub fn update_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn update_conversation(mut self, conversation: Conversation) -> Self {
        self.conversations.push(conversation);
        self
    }

    pub fn increment_reply_count(mut self, target_id: Uuid) -> Self {
        self.reply_increments.push(target_id);
        self
    }

    pub fn record_activity(mut self, message: &Message) -> Self {
        self.activity.push(ConversationActivity {
            conversation_id: message.conversation_id,
            last_message: LastMessageSummary::of(message),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.new_messages.is_empty()
            && self.messages.is_empty()
            && self.conversations.is_empty()
            && self.reply_increments.is_empty()
            && self.activity.is_empty()
    }

    /// Copy of the batch as it looks once stored: every version bumped by one.
    pub(crate) fn committed(mut self) -> Self {
        for m in self.new_messages.iter_mut().chain(self.messages.iter_mut()) {
            m.version += 1;
        }
        for c in self.conversations.iter_mut() {
            c.version += 1;
        }
        self
    }
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Insert a brand-new conversation. `Conflict` when the id is taken.
    async fn insert_conversation(&self, conversation: Conversation) -> AppResult<Conversation>;

    /// Conversations where `user_id` is an active participant, most recent activity first.
    async fn conversations_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>>;

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;

    async fn list_messages(&self, query: MessageQuery) -> AppResult<Vec<Message>>;

    /// Every message whose reply reference points at `message_id`.
    async fn replies_to(&self, message_id: Uuid) -> AppResult<Vec<Message>>;

    async fn search_messages(&self, query: SearchQuery) -> AppResult<Vec<Message>>;

    /// Apply the batch atomically, returning the stored documents. Conversations
    /// touched through `activity` come back in `conversations` as stored.
    async fn commit(&self, batch: WriteBatch) -> AppResult<WriteBatch>;
}
