use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames a client may send over its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInboundEvent {
    TypingStart { conversation_id: Uuid },
    TypingStop { conversation_id: Uuid },
    /// Client confirms it rendered a message; marks it delivered.
    Ack { message_id: Uuid },
    Ping,
}
