//! Server-pushed real-time events.
//!
//! Every frame is one flat JSON object:
//! ```json
//! {
//!     "type": "message_received",
//!     "timestamp": "2026-01-01T10:30:00Z",
//!     "actor_id": "uuid",
//!     "conversation_id": "uuid",
//!     "message": { ... }
//! }
//! ```

use crate::models::{Message, MemberRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebSocketEvent {
    MessageReceived {
        message: Message,
    },
    MessageRead {
        message_id: Uuid,
        reader_id: Uuid,
        read_at: DateTime<Utc>,
    },
    MessageEdited {
        message: Message,
    },
    MessageDeleted {
        message_id: Uuid,
    },
    ReactionUpdated {
        message_id: Uuid,
        user_id: Uuid,
        /// `None` when the reaction was removed.
        emoji: Option<String>,
    },
    MessagePinned {
        message_id: Uuid,
        pinned: bool,
    },
    TypingStart {
        user_id: Uuid,
    },
    TypingStop {
        user_id: Uuid,
    },
    ParticipantJoined {
        user_id: Uuid,
        role: MemberRole,
    },
    ParticipantLeft {
        user_id: Uuid,
    },
    ParticipantRemoved {
        user_id: Uuid,
        removed_by: Uuid,
    },
    ConversationUpdated {
        updated_fields: Vec<String>,
    },
    JoinRequestReceived {
        user_id: Uuid,
        message: Option<String>,
    },
    JoinRequestApproved {
        user_id: Uuid,
    },
    JoinRequestRejected {
        user_id: Uuid,
    },
    #[serde(rename = "user-status-update")]
    UserStatusUpdate {
        user_id: Uuid,
        status: PresenceStatus,
    },
}

impl WebSocketEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::MessageRead { .. } => "message_read",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ReactionUpdated { .. } => "reaction_updated",
            Self::MessagePinned { .. } => "message_pinned",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::ParticipantLeft { .. } => "participant_left",
            Self::ParticipantRemoved { .. } => "participant_removed",
            Self::ConversationUpdated { .. } => "conversation_updated",
            Self::JoinRequestReceived { .. } => "join_request_received",
            Self::JoinRequestApproved { .. } => "join_request_approved",
            Self::JoinRequestRejected { .. } => "join_request_rejected",
            Self::UserStatusUpdate { .. } => "user-status-update",
        }
    }

    /// Ephemeral events are live-only and never handed to the notification path.
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            Self::TypingStart { .. } | Self::TypingStop { .. } | Self::UserStatusUpdate { .. }
        )
    }

    pub fn message_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageReceived { message } | Self::MessageEdited { message } => Some(message.id),
            Self::MessageRead { message_id, .. }
            | Self::MessageDeleted { message_id }
            | Self::ReactionUpdated { message_id, .. }
            | Self::MessagePinned { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }

    /// Body text for offline notifications.
    pub fn preview(&self) -> Option<String> {
        match self {
            Self::MessageReceived { message } | Self::MessageEdited { message } => {
                Some(message.preview())
            }
            Self::JoinRequestReceived { message, .. } => message.clone(),
            _ => None,
        }
    }

    pub fn to_payload_value(
        &self,
        conversation_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert(
                "timestamp".into(),
                serde_json::Value::String(Utc::now().to_rfc3339()),
            );
            map.insert("conversation_id".into(), serde_json::to_value(conversation_id)?);
            map.insert("actor_id".into(), serde_json::to_value(actor_id)?);
        }
        Ok(payload)
    }

    pub fn to_frame(
        &self,
        conversation_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_payload_value(conversation_id, actor_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_flat_and_tagged() {
        let conv = Uuid::new_v4();
        let actor = Uuid::new_v4();
        let event = WebSocketEvent::MessageDeleted {
            message_id: Uuid::nil(),
        };
        let value = event.to_payload_value(conv, Some(actor)).unwrap();
        assert_eq!(value["type"], "message_deleted");
        assert_eq!(value["conversation_id"], conv.to_string());
        assert_eq!(value["actor_id"], actor.to_string());
        assert_eq!(value["message_id"], Uuid::nil().to_string());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_status_update_wire_name() {
        let event = WebSocketEvent::UserStatusUpdate {
            user_id: Uuid::nil(),
            status: PresenceStatus::Online,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type());
        assert_eq!(value["status"], "online");
        assert!(event.is_ephemeral());
    }

    #[test]
    fn test_event_type_matches_serde_tag() {
        let event = WebSocketEvent::JoinRequestReceived {
            user_id: Uuid::nil(),
            message: Some("let me in".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type());
        assert_eq!(event.preview().as_deref(), Some("let me in"));
    }
}
