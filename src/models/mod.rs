pub mod conversation;
pub mod member;
pub mod message;
pub mod permissions;

pub use conversation::{
    AddPolicy, Conversation, ConversationKind, ConversationSettings, JoinRequest,
    LastMessageSummary, Participant,
};
pub use member::MemberRole;
pub use message::{
    truncate_preview, DeliveryStatus, FileMeta, ForwardInfo, Message, MessageContent, MessageType,
    Reaction, ReadReceipt, PREVIEW_MAX_CHARS, TOMBSTONE_PREVIEW,
};
pub use permissions::{resolve as resolve_permissions, Permission, PermissionSet};
