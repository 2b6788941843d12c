//! Arena-of-records store. Messages are kept by id forever; reads filter.

use super::{ChatStore, Cursor, MessageQuery, SearchQuery, WriteBatch};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Arena {
    conversations: HashMap<Uuid, Conversation>,
    messages: HashMap<Uuid, Message>,
    /// Message ids per conversation in insertion order.
    timeline: HashMap<Uuid, Vec<Uuid>>,
    /// Reply ids keyed by the message they point at.
    replies: HashMap<Uuid, Vec<Uuid>>,
}

impl Arena {
    fn check_versions(&self, batch: &WriteBatch) -> AppResult<()> {
        for m in &batch.new_messages {
            if self.messages.contains_key(&m.id) {
                return Err(AppError::Conflict(format!("message {} already exists", m.id)));
            }
        }
        for m in &batch.messages {
            let stored = self
                .messages
                .get(&m.id)
                .ok_or_else(|| AppError::not_found(format!("message {}", m.id)))?;
            if stored.version != m.version {
                return Err(AppError::VersionConflict {
                    entity: "message",
                    id: m.id,
                });
            }
        }
        for c in &batch.conversations {
            let stored = self
                .conversations
                .get(&c.id)
                .ok_or_else(|| AppError::not_found(format!("conversation {}", c.id)))?;
            if stored.version != c.version {
                return Err(AppError::VersionConflict {
                    entity: "conversation",
                    id: c.id,
                });
            }
        }
        for target_id in &batch.reply_increments {
            let target = self
                .messages
                .get(target_id)
                .ok_or_else(|| AppError::not_found(format!("message {target_id}")))?;
            if target.is_tombstoned() {
                return Err(AppError::invalid_state("cannot reply to a deleted message"));
            }
        }
        for activity in &batch.activity {
            if !self.conversations.contains_key(&activity.conversation_id) {
                return Err(AppError::not_found(format!(
                    "conversation {}",
                    activity.conversation_id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    arena: RwLock<Arena>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.arena.read().await.conversations.get(&id).cloned())
    }

    async fn insert_conversation(&self, mut conversation: Conversation) -> AppResult<Conversation> {
        let mut arena = self.arena.write().await;
        if arena.conversations.contains_key(&conversation.id) {
            return Err(AppError::Conflict(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        conversation.version = 1;
        arena
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let arena = self.arena.read().await;
        let mut out: Vec<Conversation> = arena
            .conversations
            .values()
            .filter(|c| c.is_active && c.is_active_participant(user_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(out)
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.arena.read().await.messages.get(&id).cloned())
    }

    async fn list_messages(&self, query: MessageQuery) -> AppResult<Vec<Message>> {
        let arena = self.arena.read().await;
        let Some(ids) = arena.timeline.get(&query.conversation_id) else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Message> = ids
            .iter()
            .filter_map(|id| arena.messages.get(id))
            .filter(|m| query.before.map_or(true, |before| before.admits(m)))
            .filter(|m| m.is_visible_to(query.viewer, query.not_before))
            .cloned()
            .collect();
        out.sort_by_key(|m| std::cmp::Reverse(Cursor::of(m)));
        out.truncate(query.limit);
        Ok(out)
    }

    async fn replies_to(&self, message_id: Uuid) -> AppResult<Vec<Message>> {
        let arena = self.arena.read().await;
        Ok(arena
            .replies
            .get(&message_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| arena.messages.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn search_messages(&self, query: SearchQuery) -> AppResult<Vec<Message>> {
        let needle = query.needle.to_lowercase();
        let arena = self.arena.read().await;
        let mut out = Vec::new();
        for (conversation_id, not_before) in &query.scopes {
            let Some(ids) = arena.timeline.get(conversation_id) else {
                continue;
            };
            out.extend(
                ids.iter()
                    .filter_map(|id| arena.messages.get(id))
                    .filter(|m| !m.is_tombstoned() && m.is_visible_to(query.viewer, *not_before))
                    .filter(|m| {
                        m.content
                            .searchable_text()
                            .is_some_and(|text| text.to_lowercase().contains(&needle))
                    })
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(query.limit);
        Ok(out)
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<WriteBatch> {
        let mut arena = self.arena.write().await;
        arena.check_versions(&batch)?;

        let mut committed = batch.committed();
        for m in &committed.new_messages {
            arena.timeline.entry(m.conversation_id).or_default().push(m.id);
            if let Some(target) = m.reply_to {
                arena.replies.entry(target).or_default().push(m.id);
            }
            arena.messages.insert(m.id, m.clone());
        }
        for m in &committed.messages {
            arena.messages.insert(m.id, m.clone());
        }
        for c in &committed.conversations {
            arena.conversations.insert(c.id, c.clone());
        }
        for target_id in &committed.reply_increments {
            if let Some(target) = arena.messages.get_mut(target_id) {
                target.reply_count += 1;
                target.version += 1;
            }
        }
        for activity in &committed.activity {
            if let Some(c) = arena.conversations.get_mut(&activity.conversation_id) {
                c.record_message(activity.last_message.clone());
                c.version += 1;
                committed.conversations.push(c.clone());
            }
        }
        Ok(committed)
    }
}
