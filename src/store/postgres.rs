//! PostgreSQL document store on deadpool-postgres.
//!
//! Conversations and messages are JSONB documents next to a `version`
//! column. A batch runs in one transaction; every document update is a
//! compare-and-set on the version it was loaded at. Send bookkeeping takes a
//! row lock instead, so concurrent sends queue rather than conflict.

use super::{ChatStore, ConversationActivity, MessageQuery, SearchQuery, WriteBatch};
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Pool};
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

pub const SCHEMA: &str = include_str!("../../migrations/0001_chat_schema.sql");

#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn conversation_from_row(row: &Row) -> AppResult<Conversation> {
        let doc: serde_json::Value = row.try_get("doc")?;
        Ok(serde_json::from_value(doc)?)
    }

    fn message_from_row(row: &Row) -> AppResult<Message> {
        let doc: serde_json::Value = row.try_get("doc")?;
        Ok(serde_json::from_value(doc)?)
    }

    fn messages_from_rows(rows: &[Row]) -> AppResult<Vec<Message>> {
        rows.iter().map(Self::message_from_row).collect()
    }

    /// Mirror the roster into the membership table. One statement; only rows
    /// whose active flag differs from the stored one are written.
    async fn sync_members<C: GenericClient + Sync>(client: &C, conversation: &Conversation) -> AppResult<()> {
        let user_ids: Vec<Uuid> = conversation.participants.iter().map(|p| p.user_id).collect();
        let active: Vec<bool> = conversation.participants.iter().map(|p| p.active).collect();
        client
            .execute(
                "INSERT INTO chat_conversation_members (conversation_id, user_id, active)
                 SELECT $1, r.user_id, r.active FROM unnest($2::uuid[], $3::bool[]) AS r(user_id, active)
                 ON CONFLICT (conversation_id, user_id) DO UPDATE SET active = EXCLUDED.active
                 WHERE chat_conversation_members.active IS DISTINCT FROM EXCLUDED.active",
                &[&conversation.id, &user_ids, &active],
            )
            .await?;
        Ok(())
    }

    /// Bump a reply target's counter under a row lock.
    async fn increment_reply_count<C: GenericClient + Sync>(client: &C, target_id: Uuid) -> AppResult<()> {
        let row = client
            .query_opt(
                "SELECT doc FROM chat_messages WHERE id = $1 FOR UPDATE",
                &[&target_id],
            )
            .await?
            .ok_or_else(|| AppError::not_found(format!("message {target_id}")))?;
        let mut target = Self::message_from_row(&row)?;
        if target.is_tombstoned() {
            return Err(AppError::invalid_state("cannot reply to a deleted message"));
        }
        target.reply_count += 1;
        target.version += 1;
        let doc = serde_json::to_value(&target)?;
        client
            .execute(
                "UPDATE chat_messages SET doc = $2, version = $3 WHERE id = $1",
                &[&target.id, &doc, &target.version],
            )
            .await?;
        Ok(())
    }

    /// Apply send bookkeeping under a row lock and return the stored document.
    async fn record_activity<C: GenericClient + Sync>(
        client: &C,
        activity: &ConversationActivity,
    ) -> AppResult<Conversation> {
        let id = activity.conversation_id;
        let row = client
            .query_opt(
                "SELECT doc FROM chat_conversations WHERE id = $1 FOR UPDATE",
                &[&id],
            )
            .await?
            .ok_or_else(|| AppError::not_found(format!("conversation {id}")))?;
        let mut conversation = Self::conversation_from_row(&row)?;
        conversation.record_message(activity.last_message.clone());
        conversation.version += 1;
        let doc = serde_json::to_value(&conversation)?;
        client
            .execute(
                "UPDATE chat_conversations SET doc = $2, version = $3, last_activity_at = $4
                 WHERE id = $1",
                &[&id, &doc, &conversation.version, &conversation.last_activity_at],
            )
            .await?;
        Ok(conversation)
    }
}

/// Escape LIKE wildcards so the needle matches literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl ChatStore for PgStore {
    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT doc FROM chat_conversations WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(Self::conversation_from_row).transpose()
    }

    async fn insert_conversation(&self, mut conversation: Conversation) -> AppResult<Conversation> {
        conversation.version = 1;
        let doc = serde_json::to_value(&conversation)?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let inserted = tx
            .execute(
                "INSERT INTO chat_conversations (id, kind, doc, version, is_active, last_activity_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &conversation.id,
                    &conversation.kind.as_str(),
                    &doc,
                    &conversation.version,
                    &conversation.is_active,
                    &conversation.last_activity_at,
                    &conversation.created_at,
                ],
            )
            .await?;
        if inserted == 0 {
            return Err(AppError::Conflict(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        Self::sync_members(&tx, &conversation).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT c.doc
                 FROM chat_conversations c
                 JOIN chat_conversation_members m ON m.conversation_id = c.id
                 WHERE m.user_id = $1 AND m.active AND c.is_active
                 ORDER BY c.last_activity_at DESC",
                &[&user_id],
            )
            .await?;
        rows.iter().map(Self::conversation_from_row).collect()
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT doc FROM chat_messages WHERE id = $1", &[&id])
            .await?;
        row.as_ref().map(Self::message_from_row).transpose()
    }

    async fn list_messages(&self, query: MessageQuery) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let limit = query.limit as i64;
        let before_at = query.before.map(|c| c.created_at);
        let before_id = query.before.map(|c| c.id);
        let rows = client
            .query(
                "SELECT doc FROM chat_messages
                 WHERE conversation_id = $1
                   AND ($2::timestamptz IS NULL OR (created_at, id) < ($2, $3::uuid))
                   AND ($4::timestamptz IS NULL OR created_at >= $4)
                   AND NOT (doc -> 'hidden_for' @> to_jsonb($5::text))
                 ORDER BY created_at DESC, id DESC
                 LIMIT $6",
                &[
                    &query.conversation_id,
                    &before_at,
                    &before_id,
                    &query.not_before,
                    &query.viewer.to_string(),
                    &limit,
                ],
            )
            .await?;
        Self::messages_from_rows(&rows)
    }

    async fn replies_to(&self, message_id: Uuid) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT doc FROM chat_messages WHERE reply_to = $1 ORDER BY created_at",
                &[&message_id],
            )
            .await?;
        Self::messages_from_rows(&rows)
    }

    async fn search_messages(&self, query: SearchQuery) -> AppResult<Vec<Message>> {
        if query.scopes.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = query.scopes.iter().map(|(id, _)| *id).collect();
        let cutoffs: Vec<Option<DateTime<Utc>>> = query.scopes.iter().map(|(_, c)| *c).collect();
        let limit = query.limit as i64;

        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT m.doc
                 FROM chat_messages m
                 JOIN unnest($1::uuid[], $2::timestamptz[]) AS s(cid, cutoff)
                   ON m.conversation_id = s.cid
                 WHERE m.search_text ILIKE $3
                   AND (s.cutoff IS NULL OR m.created_at >= s.cutoff)
                   AND NOT (m.doc -> 'hidden_for' @> to_jsonb($4::text))
                 ORDER BY m.created_at DESC
                 LIMIT $5",
                &[
                    &ids,
                    &cutoffs,
                    &like_pattern(&query.needle),
                    &query.viewer.to_string(),
                    &limit,
                ],
            )
            .await?;
        Self::messages_from_rows(&rows)
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<WriteBatch> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // Documents are written with the bumped version; the WHERE clause
        // checks the version the caller loaded.
        let mut committed = batch.committed();

        for m in &committed.new_messages {
            let doc = serde_json::to_value(m)?;
            let search_text = m.content.searchable_text().map(str::to_string);
            let inserted = tx
                .execute(
                    "INSERT INTO chat_messages (id, conversation_id, reply_to, search_text, doc, version, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (id) DO NOTHING",
                    &[
                        &m.id,
                        &m.conversation_id,
                        &m.reply_to,
                        &search_text,
                        &doc,
                        &m.version,
                        &m.created_at,
                    ],
                )
                .await?;
            if inserted == 0 {
                return Err(AppError::Conflict(format!("message {} already exists", m.id)));
            }
        }

        for m in &committed.messages {
            let doc = serde_json::to_value(m)?;
            let search_text = m.content.searchable_text().map(str::to_string);
            let expected = m.version - 1;
            let updated = tx
                .execute(
                    "UPDATE chat_messages SET doc = $2, search_text = $3, version = $4
                     WHERE id = $1 AND version = $5",
                    &[&m.id, &doc, &search_text, &m.version, &expected],
                )
                .await?;
            if updated == 0 {
                debug!(message_id = %m.id, expected, "message version check failed");
                return Err(AppError::VersionConflict {
                    entity: "message",
                    id: m.id,
                });
            }
        }

        for c in &committed.conversations {
            let doc = serde_json::to_value(c)?;
            let expected = c.version - 1;
            let updated = tx
                .execute(
                    "UPDATE chat_conversations
                     SET doc = $2, version = $3, is_active = $4, last_activity_at = $5
                     WHERE id = $1 AND version = $6",
                    &[&c.id, &doc, &c.version, &c.is_active, &c.last_activity_at, &expected],
                )
                .await?;
            if updated == 0 {
                debug!(conversation_id = %c.id, expected, "conversation version check failed");
                return Err(AppError::VersionConflict {
                    entity: "conversation",
                    id: c.id,
                });
            }
            Self::sync_members(&tx, c).await?;
        }

        for target_id in &committed.reply_increments {
            Self::increment_reply_count(&tx, *target_id).await?;
        }
        for activity in &committed.activity {
            let stored = Self::record_activity(&tx, activity).await?;
            committed.conversations.push(stored);
        }

        tx.commit().await?;
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }
}
