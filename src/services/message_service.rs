//! Message lifecycle: send, edit, delete, reactions, receipts and forwarding.
//!
//! Messages are never physically removed. Each mutation commits the message
//! together with whatever it touches (conversation summary, reply target,
//! replies) as one versioned batch.

use super::conversation_service::ConversationService;
use super::{with_retries, ServiceContext};
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    Conversation, DeliveryStatus, ForwardInfo, LastMessageSummary, Message,
    MessageContent, MessageType, Permission,
};
use crate::store::{Cursor, MessageQuery, SearchQuery, WriteBatch};
use crate::websocket::WebSocketEvent;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

pub const MAX_TEXT_CHARS: usize = 10_000;
pub const MAX_EMOJI_CHARS: usize = 16;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub message_type: MessageType,
    pub content: MessageContent,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

/// Check that the content variant carries what its declared type needs.
pub fn validate_payload(message_type: MessageType, content: &MessageContent) -> AppResult<()> {
    let bad = |why: &str| Err(AppError::BadRequest(why.to_string()));
    match (message_type, content) {
        (MessageType::Text, MessageContent::Text { text }) => {
            if text.trim().is_empty() {
                return bad("text must not be empty");
            }
            if text.chars().count() > MAX_TEXT_CHARS {
                return bad("text is too long");
            }
            Ok(())
        }
        (t, MessageContent::File { file, .. }) if t.is_media() => {
            if file.url.trim().is_empty() || file.file_name.trim().is_empty() {
                return bad("file metadata requires url and file_name");
            }
            let expected_prefix = match t {
                MessageType::Image => Some("image/"),
                MessageType::Video => Some("video/"),
                MessageType::Audio => Some("audio/"),
                _ => None,
            };
            if let Some(prefix) = expected_prefix {
                if !file.mime_type.starts_with(prefix) {
                    return bad(&format!("{} messages need a {prefix}* mime type", t.as_str()));
                }
            }
            Ok(())
        }
        (
            MessageType::Location,
            MessageContent::Location {
                latitude,
                longitude,
                ..
            },
        ) => {
            let valid = latitude.is_finite()
                && longitude.is_finite()
                && (-90.0..=90.0).contains(latitude)
                && (-180.0..=180.0).contains(longitude);
            if valid {
                Ok(())
            } else {
                bad("coordinates out of range")
            }
        }
        (MessageType::Contact, MessageContent::Contact { display_name, .. }) => {
            if display_name.trim().is_empty() {
                return bad("contact requires a display name");
            }
            Ok(())
        }
        (MessageType::System, _) => bad("system messages are generated by the service"),
        (_, MessageContent::Tombstone) => bad("tombstone content cannot be sent"),
        (t, _) => bad(&format!("content does not match message type {}", t.as_str())),
    }
}

#[derive(Clone)]
pub struct MessageService {
    ctx: ServiceContext,
    conversations: ConversationService,
}

impl MessageService {
    pub fn new(ctx: ServiceContext, conversations: ConversationService) -> Self {
        Self { ctx, conversations }
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    async fn load_message(&self, message_id: Uuid) -> AppResult<Message> {
        self.ctx
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("message {message_id}")))
    }

    /// The message's conversation, requiring `user_id` to be active in it.
    async fn conversation_for(&self, message: &Message, user_id: Uuid) -> AppResult<Conversation> {
        let conversation = self.conversations.load(message.conversation_id).await?;
        if !conversation.is_active_participant(user_id) {
            return Err(AppError::forbidden(format!(
                "user {user_id} is not an active participant of conversation {}",
                conversation.id
            )));
        }
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    pub async fn send(&self, sender: Uuid, request: SendMessage) -> AppResult<Message> {
        validate_payload(request.message_type, &request.content)?;
        let message = Message::new(
            request.conversation_id,
            sender,
            request.message_type,
            request.content,
            request.reply_to,
            self.now(),
        );
        self.create(message).await
    }

    /// Commit a new message with its summary update, then fan it out.
    async fn create(&self, message: Message) -> AppResult<Message> {
        let (message, conversation) = self.try_create(message).await?;

        metrics::MESSAGES_SENT
            .with_label_values(&[message.message_type.as_str()])
            .inc();
        tracing::info!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            sender_id = %message.sender_id,
            message_type = message.message_type.as_str(),
            "message sent"
        );

        self.ctx
            .router
            .publish(
                &conversation,
                WebSocketEvent::MessageReceived {
                    message: message.clone(),
                },
                Some(message.sender_id),
            )
            .await;
        Ok(message)
    }

    /// The summary and reply counter are applied in place by the store, so a
    /// valid send never fails on a concurrent writer.
    async fn try_create(&self, message: Message) -> AppResult<(Message, Conversation)> {
        let conversation = self.conversations.load(message.conversation_id).await?;
        let now = self.now();

        let sender = conversation.active_participant(message.sender_id).ok_or_else(|| {
            AppError::forbidden("only active participants can send messages")
        })?;
        if sender.is_muted_at(now) {
            return Err(AppError::forbidden("sender is muted in this conversation"));
        }
        let may_send = conversation
            .effective_permissions(message.sender_id)
            .is_some_and(|p| p.allows(Permission::SendMessages));
        if !may_send {
            return Err(AppError::forbidden("sending is restricted in this conversation"));
        }

        let mut batch = WriteBatch::new().record_activity(&message);
        if let Some(target_id) = message.reply_to {
            if target_id == message.id {
                return Err(AppError::invalid_state("a message cannot reply to itself"));
            }
            let target = self.load_message(target_id).await?;
            if target.conversation_id != message.conversation_id {
                return Err(AppError::invalid_state(
                    "reply target belongs to another conversation",
                ));
            }
            if target.is_tombstoned() {
                return Err(AppError::invalid_state("cannot reply to a deleted message"));
            }
            batch = batch.increment_reply_count(target_id);
        }

        let committed = self.ctx.store.commit(batch.insert_message(message)).await?;
        let message = committed.new_messages.into_iter().next().ok_or(AppError::Internal)?;
        let conversation = committed
            .conversations
            .into_iter()
            .next()
            .ok_or(AppError::Internal)?;
        Ok((message, conversation))
    }

    /// Copy a message into each target conversation the actor belongs to.
    /// Unreachable targets are skipped; no successful copy is an error.
    pub async fn forward(
        &self,
        actor: Uuid,
        message_id: Uuid,
        target_conversation_ids: Vec<Uuid>,
    ) -> AppResult<Vec<Message>> {
        if target_conversation_ids.is_empty() {
            return Err(AppError::BadRequest("no target conversations given".into()));
        }
        let source = self.load_message(message_id).await?;
        self.conversation_for(&source, actor).await?;
        if source.is_tombstoned() {
            return Err(AppError::invalid_state("deleted messages cannot be forwarded"));
        }

        let provenance = source.forwarded.clone().unwrap_or(ForwardInfo {
            original_sender_id: source.sender_id,
            original_message_id: source.id,
            original_conversation_id: source.conversation_id,
        });

        let mut seen = HashSet::new();
        let mut forwarded = Vec::new();
        for target in target_conversation_ids {
            if !seen.insert(target) {
                continue;
            }
            let mut copy = Message::new(
                target,
                actor,
                source.message_type,
                source.content.clone(),
                None,
                self.now(),
            );
            copy.forwarded = Some(provenance.clone());
            match self.create(copy).await {
                Ok(message) => forwarded.push(message),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        message_id = %message_id,
                        conversation_id = %target,
                        "skipping forward target"
                    );
                }
            }
        }

        if forwarded.is_empty() {
            return Err(AppError::forbidden(
                "message could not be forwarded to any target conversation",
            ));
        }
        Ok(forwarded)
    }

    // ------------------------------------------------------------------
    // Edit and delete
    // ------------------------------------------------------------------

    /// Sender-only, strictly inside the edit window counted from creation.
    pub async fn edit(&self, editor: Uuid, message_id: Uuid, text: String) -> AppResult<Message> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(AppError::BadRequest("text must not be empty".into()));
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(AppError::BadRequest("text is too long".into()));
        }

        let (message, conversation) = with_retries("edit", self.ctx.max_write_retries, move || {
            self.try_edit(editor, message_id, text.clone())
        })
        .await?;

        self.ctx
            .router
            .publish(
                &conversation,
                WebSocketEvent::MessageEdited {
                    message: message.clone(),
                },
                Some(editor),
            )
            .await;
        Ok(message)
    }

    async fn try_edit(
        &self,
        editor: Uuid,
        message_id: Uuid,
        text: String,
    ) -> AppResult<(Message, Conversation)> {
        let mut message = self.load_message(message_id).await?;
        if message.sender_id != editor {
            return Err(AppError::forbidden("only the sender can edit a message"));
        }
        let mut conversation = self.conversation_for(&message, editor).await?;
        if message.is_tombstoned() {
            return Err(AppError::invalid_state("deleted messages cannot be edited"));
        }

        let now = self.now();
        if now - message.created_at >= self.ctx.edit_window {
            return Err(AppError::EditWindowExpired {
                max_edit_minutes: self.ctx.edit_window.num_minutes(),
            });
        }

        match &mut message.content {
            MessageContent::Text { text: body } => *body = text,
            MessageContent::File { caption, .. } => *caption = Some(text),
            _ => {
                return Err(AppError::invalid_state(format!(
                    "{} messages cannot be edited",
                    message.message_type.as_str()
                )))
            }
        }
        message.edited = true;
        message.edited_at = Some(now);

        let mut batch = WriteBatch::new();
        let summary_stale = conversation
            .last_message
            .as_ref()
            .is_some_and(|s| s.message_id == message.id);
        if summary_stale {
            conversation.last_message = Some(LastMessageSummary::of(&message));
            batch = batch.update_conversation(conversation.clone());
        }

        let committed = self.ctx.store.commit(batch.update_message(message)).await?;
        let message = committed.messages.into_iter().next().ok_or(AppError::Internal)?;
        let conversation = committed.conversations.into_iter().next().unwrap_or(conversation);
        Ok((message, conversation))
    }

    /// Hide the message for `user_id` only. Repeating it is a no-op.
    pub async fn delete_for_me(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        with_retries("delete_for_me", self.ctx.max_write_retries, move || {
            self.try_delete_for_me(user_id, message_id)
        })
        .await
    }

    async fn try_delete_for_me(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        let mut message = self.load_message(message_id).await?;
        let conversation = self.conversations.load(message.conversation_id).await?;
        // Former participants may still tidy up their own history.
        if conversation.participant(user_id).is_none() {
            return Err(AppError::forbidden("not a participant of this conversation"));
        }
        if !message.hide_for(user_id) {
            return Ok(message);
        }
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::new().update_message(message))
            .await?;
        committed.messages.into_iter().next().ok_or(AppError::Internal)
    }

    /// Tombstone the message for everyone and cascade to its reply graph.
    pub async fn delete_for_everyone(&self, actor: Uuid, message_id: Uuid) -> AppResult<Message> {
        let (message, conversation) =
            with_retries("delete_for_everyone", self.ctx.max_write_retries, move || {
                self.try_delete_for_everyone(actor, message_id)
            })
            .await?;

        tracing::info!(message_id = %message_id, deleted_by = %actor, "message deleted for everyone");
        self.ctx
            .router
            .publish(
                &conversation,
                WebSocketEvent::MessageDeleted { message_id },
                Some(actor),
            )
            .await;
        Ok(message)
    }

    async fn try_delete_for_everyone(
        &self,
        actor: Uuid,
        message_id: Uuid,
    ) -> AppResult<(Message, Conversation)> {
        let mut message = self.load_message(message_id).await?;
        let mut conversation = self.conversation_for(&message, actor).await?;
        if message.is_tombstoned() {
            return Err(AppError::invalid_state("message is already deleted"));
        }

        let may_moderate = conversation
            .effective_permissions(actor)
            .is_some_and(|p| p.allows(Permission::DeleteMessages));
        if message.sender_id != actor && !may_moderate {
            return Err(AppError::forbidden(
                "only the sender, a moderator or an admin can delete for everyone",
            ));
        }

        let now = self.now();
        message.tombstone(actor, now);
        let mut batch = WriteBatch::new();

        for mut reply in self.ctx.store.replies_to(message_id).await? {
            if reply.is_reply_available {
                reply.is_reply_available = false;
                batch = batch.update_message(reply);
            }
        }

        if let Some(parent_id) = message.reply_to {
            if let Some(mut parent) = self.ctx.store.get_message(parent_id).await? {
                if parent.reply_count > 0 {
                    parent.reply_count -= 1;
                    batch = batch.update_message(parent);
                }
            }
        }

        let mut conversation_changed = false;
        if conversation.pinned_message_ids.contains(&message_id) {
            conversation.pinned_message_ids.retain(|id| *id != message_id);
            conversation_changed = true;
        }
        if conversation
            .last_message
            .as_ref()
            .is_some_and(|s| s.message_id == message_id)
        {
            conversation.last_message = Some(LastMessageSummary::of(&message));
            conversation_changed = true;
        }
        if conversation_changed {
            batch = batch.update_conversation(conversation.clone());
        }

        let committed = self.ctx.store.commit(batch.update_message(message)).await?;
        let message = committed
            .messages
            .into_iter()
            .find(|m| m.id == message_id)
            .ok_or(AppError::Internal)?;
        let conversation = committed.conversations.into_iter().next().unwrap_or(conversation);
        Ok((message, conversation))
    }

    // ------------------------------------------------------------------
    // Reactions
    // ------------------------------------------------------------------

    /// Set the user's single reaction, replacing any previous emoji.
    pub async fn react(&self, user_id: Uuid, message_id: Uuid, emoji: String) -> AppResult<Message> {
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() || emoji.chars().count() > MAX_EMOJI_CHARS {
            return Err(AppError::BadRequest("invalid emoji".into()));
        }

        let (message, conversation, changed) =
            with_retries("react", self.ctx.max_write_retries, move || {
                self.try_react(user_id, message_id, emoji.clone())
            })
            .await?;

        if changed {
            let emoji = message
                .reactions
                .iter()
                .find(|r| r.user_id == user_id)
                .map(|r| r.emoji.clone());
            self.ctx
                .router
                .publish(
                    &conversation,
                    WebSocketEvent::ReactionUpdated {
                        message_id,
                        user_id,
                        emoji,
                    },
                    Some(user_id),
                )
                .await;
        }
        Ok(message)
    }

    async fn try_react(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        emoji: String,
    ) -> AppResult<(Message, Conversation, bool)> {
        let mut message = self.load_message(message_id).await?;
        let conversation = self.conversation_for(&message, user_id).await?;
        if message.is_tombstoned() {
            return Err(AppError::invalid_state("cannot react to a deleted message"));
        }

        let unchanged = message
            .reactions
            .iter()
            .any(|r| r.user_id == user_id && r.emoji == emoji);
        if unchanged {
            return Ok((message, conversation, false));
        }

        message.set_reaction(user_id, &emoji, self.now());
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::new().update_message(message))
            .await?;
        let message = committed.messages.into_iter().next().ok_or(AppError::Internal)?;
        Ok((message, conversation, true))
    }

    pub async fn unreact(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        let (message, conversation) = with_retries("unreact", self.ctx.max_write_retries, move || {
            self.try_unreact(user_id, message_id)
        })
        .await?;

        self.ctx
            .router
            .publish(
                &conversation,
                WebSocketEvent::ReactionUpdated {
                    message_id,
                    user_id,
                    emoji: None,
                },
                Some(user_id),
            )
            .await;
        Ok(message)
    }

    async fn try_unreact(&self, user_id: Uuid, message_id: Uuid) -> AppResult<(Message, Conversation)> {
        let mut message = self.load_message(message_id).await?;
        let conversation = self.conversation_for(&message, user_id).await?;
        if message.remove_reaction(user_id).is_none() {
            return Err(AppError::not_found(format!(
                "reaction by {user_id} on message {message_id}"
            )));
        }
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::new().update_message(message))
            .await?;
        let message = committed.messages.into_iter().next().ok_or(AppError::Internal)?;
        Ok((message, conversation))
    }

    // ------------------------------------------------------------------
    // Receipts
    // ------------------------------------------------------------------

    /// Record a read receipt (idempotent) and advance the reader's pointer.
    pub async fn mark_read(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        let (message, conversation, newly_read) =
            with_retries("mark_read", self.ctx.max_write_retries, move || {
                self.try_mark_read(user_id, message_id)
            })
            .await?;

        if newly_read {
            let read_at = message
                .read_receipts
                .iter()
                .find(|r| r.user_id == user_id)
                .map(|r| r.read_at)
                .unwrap_or_else(|| self.now());
            self.ctx
                .router
                .publish(
                    &conversation,
                    WebSocketEvent::MessageRead {
                        message_id,
                        reader_id: user_id,
                        read_at,
                    },
                    Some(user_id),
                )
                .await;
        }
        Ok(message)
    }

    async fn try_mark_read(
        &self,
        user_id: Uuid,
        message_id: Uuid,
    ) -> AppResult<(Message, Conversation, bool)> {
        let mut message = self.load_message(message_id).await?;
        let mut conversation = self.conversation_for(&message, user_id).await?;
        if message.is_tombstoned() {
            return Ok((message, conversation, false));
        }

        let now = self.now();
        let newly_read = message.mark_read(user_id, now);

        let current_pointer = conversation
            .participant(user_id)
            .and_then(|p| p.last_read_message_id);
        let advance = match current_pointer {
            None => true,
            Some(id) if id == message.id => false,
            Some(id) => match self.ctx.store.get_message(id).await? {
                Some(pointed) => pointed.created_at < message.created_at,
                None => true,
            },
        };

        let mut batch = WriteBatch::new();
        if advance {
            if let Some(row) = conversation.participant_mut(user_id) {
                row.last_read_message_id = Some(message.id);
                row.last_read_at = Some(now);
            }
            batch = batch.update_conversation(conversation.clone());
        }
        if newly_read {
            batch = batch.update_message(message.clone());
        }
        if batch.is_empty() {
            return Ok((message, conversation, false));
        }

        let committed = self.ctx.store.commit(batch).await?;
        let message = committed.messages.into_iter().next().unwrap_or(message);
        let conversation = committed.conversations.into_iter().next().unwrap_or(conversation);
        Ok((message, conversation, newly_read))
    }

    /// Recipient acknowledged delivery on a live session.
    pub async fn mark_delivered(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        with_retries("mark_delivered", self.ctx.max_write_retries, move || {
            self.try_mark_delivered(user_id, message_id)
        })
        .await
    }

    async fn try_mark_delivered(&self, user_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        let mut message = self.load_message(message_id).await?;
        self.conversation_for(&message, user_id).await?;
        if message.sender_id == user_id || message.delivery_status != DeliveryStatus::Sent {
            return Ok(message);
        }
        message.delivery_status = DeliveryStatus::Delivered;
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::new().update_message(message))
            .await?;
        committed.messages.into_iter().next().ok_or(AppError::Internal)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Newest-first page of the viewer's visible history, strictly older
    /// than `before`.
    pub async fn history(
        &self,
        viewer: Uuid,
        conversation_id: Uuid,
        before: Option<Cursor>,
        limit: Option<usize>,
    ) -> AppResult<Vec<Message>> {
        let conversation = self
            .conversations
            .get_for_member(conversation_id, viewer)
            .await?;
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        self.ctx
            .store
            .list_messages(MessageQuery {
                conversation_id,
                viewer,
                before,
                not_before: conversation.retention_cutoff(self.now()),
                limit,
            })
            .await
    }

    /// Case-insensitive text search across the viewer's active conversations.
    pub async fn search(&self, viewer: Uuid, query: &str, limit: Option<usize>) -> AppResult<Vec<Message>> {
        let needle = query.trim();
        if needle.is_empty() {
            return Err(AppError::BadRequest("search query must not be empty".into()));
        }
        let now = self.now();
        let scopes = self
            .conversations
            .list_for_user(viewer)
            .await?
            .iter()
            .map(|c| (c.id, c.retention_cutoff(now)))
            .collect();
        self.ctx
            .store
            .search_messages(SearchQuery {
                viewer,
                scopes,
                needle: needle.to_string(),
                limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            })
            .await
    }
}
