use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum characters kept in conversation summaries and notification bodies.
pub const PREVIEW_MAX_CHARS: usize = 100;

pub const TOMBSTONE_PREVIEW: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Location,
    Contact,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::System => "system",
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Audio | Self::File)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Message body. `Tombstone` replaces whatever was there once a message is
/// deleted for everyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    File {
        file: FileMeta,
        #[serde(default)]
        caption: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        label: Option<String>,
    },
    Contact {
        display_name: String,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        user_id: Option<Uuid>,
    },
    System {
        text: String,
    },
    Tombstone,
}

impl MessageContent {
    /// Plain text used for previews and search.
    pub fn searchable_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } | Self::System { text } => Some(text),
            Self::File { caption, .. } => caption.as_deref(),
            Self::Location { label, .. } => label.as_deref(),
            Self::Contact { display_name, .. } => Some(display_name),
            Self::Tombstone => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// Provenance of a forwarded copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardInfo {
    pub original_sender_id: Uuid,
    pub original_message_id: Uuid,
    pub original_conversation_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

/// Message record. Never physically removed; deletion only tombstones it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub content: MessageContent,
    pub reply_to: Option<Uuid>,
    /// Flips to false once the reply target is tombstoned.
    #[serde(default = "default_true")]
    pub is_reply_available: bool,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub read_receipts: Vec<ReadReceipt>,
    /// Users who deleted this message for themselves.
    #[serde(default)]
    pub hidden_for: Vec<Uuid>,
    #[serde(default)]
    pub deleted_for_everyone: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<Uuid>,
    #[serde(default)]
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub forwarded: Option<ForwardInfo>,
    #[serde(default)]
    pub delivery_status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub version: i64,
}

fn default_true() -> bool {
    true
}

impl Message {
    /// Fresh message; the sender is the first read receipt.
    pub fn new(
        conversation_id: Uuid,
        sender_id: Uuid,
        message_type: MessageType,
        content: MessageContent,
        reply_to: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            message_type,
            content,
            reply_to,
            is_reply_available: true,
            reply_count: 0,
            reactions: Vec::new(),
            read_receipts: vec![ReadReceipt {
                user_id: sender_id,
                read_at: now,
            }],
            hidden_for: Vec::new(),
            deleted_for_everyone: false,
            deleted_at: None,
            deleted_by: None,
            edited: false,
            edited_at: None,
            forwarded: None,
            delivery_status: DeliveryStatus::Sent,
            created_at: now,
            version: 0,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.deleted_for_everyone
    }

    pub fn is_hidden_for(&self, user_id: Uuid) -> bool {
        self.hidden_for.contains(&user_id)
    }

    /// Read-time filter: hidden-for-me rows and rows older than the
    /// retention cutoff are invisible. Tombstones stay visible as placeholders.
    pub fn is_visible_to(&self, viewer: Uuid, not_before: Option<DateTime<Utc>>) -> bool {
        !self.is_hidden_for(viewer) && not_before.map_or(true, |cutoff| self.created_at >= cutoff)
    }

    /// Returns `false` if the user had already hidden it.
    pub fn hide_for(&mut self, user_id: Uuid) -> bool {
        if self.is_hidden_for(user_id) {
            return false;
        }
        self.hidden_for.push(user_id);
        true
    }

    pub fn preview(&self) -> String {
        if self.is_tombstoned() {
            return TOMBSTONE_PREVIEW.to_string();
        }
        let text = match &self.content {
            MessageContent::File { file, caption } => {
                caption.clone().unwrap_or_else(|| file.file_name.clone())
            }
            MessageContent::Location { .. } => "Shared a location".to_string(),
            other => other.searchable_text().unwrap_or_default().to_string(),
        };
        truncate_preview(&text, PREVIEW_MAX_CHARS)
    }

    /// Redact the message in place. The id, reply linkage and reply count stay.
    pub fn tombstone(&mut self, deleted_by: Uuid, now: DateTime<Utc>) {
        self.content = MessageContent::Tombstone;
        self.deleted_for_everyone = true;
        self.deleted_at = Some(now);
        self.deleted_by = Some(deleted_by);
        self.reactions.clear();
        self.read_receipts.clear();
        self.forwarded = None;
    }

    /// Set the user's single reaction, returning the emoji it replaced.
    pub fn set_reaction(&mut self, user_id: Uuid, emoji: &str, now: DateTime<Utc>) -> Option<String> {
        let previous = self.remove_reaction(user_id).map(|r| r.emoji);
        self.reactions.push(Reaction {
            user_id,
            emoji: emoji.to_string(),
            reacted_at: now,
        });
        previous
    }

    pub fn remove_reaction(&mut self, user_id: Uuid) -> Option<Reaction> {
        let idx = self.reactions.iter().position(|r| r.user_id == user_id)?;
        Some(self.reactions.remove(idx))
    }

    /// Append a receipt unless the user already has one.
    pub fn mark_read(&mut self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        if self.read_receipts.iter().any(|r| r.user_id == user_id) {
            return false;
        }
        self.read_receipts.push(ReadReceipt {
            user_id,
            read_at: now,
        });
        if user_id != self.sender_id {
            self.delivery_status = DeliveryStatus::Read;
        }
        true
    }
}

/// Truncate a preview to `max_len` characters, adding an ellipsis if needed.
pub fn truncate_preview(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
