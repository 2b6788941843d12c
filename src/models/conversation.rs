//! Conversation document: roster, settings, join-request queue and summary.
//!
//! A conversation is stored and versioned as one document; the directory
//! service loads it, mutates it through the helpers here and commits it back
//! with an optimistic version check.

use super::member::MemberRole;
use super::message::{Message, MessageType};
use super::permissions::{self, PermissionSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deterministic direct-conversation ids.
const DIRECT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_4c57_a1e8_52d0_7f39_c6b1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
    Channel,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

/// Who may add new participants without going through the join-request queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AddPolicy {
    #[default]
    AdminsOnly,
    AllMembers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConversationSettings {
    #[serde(default)]
    pub who_may_add: AddPolicy,
    #[serde(default)]
    pub require_approval_to_join: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub admin_only_messaging: bool,
    /// Public conversations can be joined without an invitation.
    #[serde(default)]
    pub is_public: bool,
    /// Messages older than this are filtered out of reads.
    #[serde(default)]
    pub message_retention_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: MemberRole,
    pub active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    pub permissions: PermissionSet,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub muted_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_read_message_id: Option<Uuid>,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn new(user_id: Uuid, role: MemberRole, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            role,
            active: true,
            joined_at: now,
            left_at: None,
            permissions: PermissionSet::for_role(role),
            muted: false,
            muted_until: None,
            last_read_message_id: None,
            last_read_at: None,
        }
    }

    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.muted && self.muted_until.map_or(true, |until| until > now)
    }

    /// Bring a soft-left row back as a fresh membership.
    pub fn reactivate(&mut self, now: DateTime<Utc>) {
        self.active = true;
        self.joined_at = now;
        self.left_at = None;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.left_at = Some(now);
    }

    pub fn set_role(&mut self, role: MemberRole) {
        self.role = role;
        self.permissions = PermissionSet::for_role(role);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub user_id: Uuid,
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
    /// Set when the request was queued by a member's add attempt.
    #[serde(default)]
    pub invited_by: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessageSummary {
    pub message_id: Uuid,
    pub preview: String,
    pub message_type: MessageType,
    pub sender_id: Uuid,
    pub sent_at: DateTime<Utc>,
}

impl LastMessageSummary {
    pub fn of(message: &Message) -> Self {
        Self {
            message_id: message.id,
            preview: message.preview(),
            message_type: message.message_type,
            sender_id: message.sender_id,
            sent_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub created_by: Uuid,
    pub participants: Vec<Participant>,
    pub settings: ConversationSettings,
    #[serde(default)]
    pub join_requests: Vec<JoinRequest>,
    #[serde(default)]
    pub pinned_message_ids: Vec<Uuid>,
    pub last_message: Option<LastMessageSummary>,
    #[serde(default)]
    pub message_count: i64,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub archived: bool,
    /// Optimistic concurrency token, bumped by every committed write.
    #[serde(default)]
    pub version: i64,
}

impl Conversation {
    /// Deterministic id for the direct conversation between two users.
    /// Argument order does not matter.
    pub fn direct_id(a: Uuid, b: Uuid) -> Uuid {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Uuid::new_v5(&DIRECT_NAMESPACE, format!("{lo}:{hi}").as_bytes())
    }

    pub fn new_direct(a: Uuid, b: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::direct_id(a, b),
            kind: ConversationKind::Direct,
            name: None,
            description: None,
            avatar_url: None,
            created_by: a,
            participants: vec![
                Participant::new(a, MemberRole::Member, now),
                Participant::new(b, MemberRole::Member, now),
            ],
            settings: ConversationSettings::default(),
            join_requests: Vec::new(),
            pinned_message_ids: Vec::new(),
            last_message: None,
            message_count: 0,
            last_activity_at: now,
            created_at: now,
            is_active: true,
            archived: false,
            version: 0,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.kind == ConversationKind::Direct
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: Uuid) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn active_participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participant(user_id).filter(|p| p.active)
    }

    pub fn is_active_participant(&self, user_id: Uuid) -> bool {
        self.active_participant(user_id).is_some()
    }

    pub fn active_participant_ids(&self) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| p.active)
            .map(|p| p.user_id)
            .collect()
    }

    pub fn active_admin_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.active && p.role == MemberRole::Admin)
            .count()
    }

    /// True when `user_id` is the only active admin left.
    pub fn is_sole_active_admin(&self, user_id: Uuid) -> bool {
        self.active_participant(user_id)
            .is_some_and(|p| p.role == MemberRole::Admin)
            && self.active_admin_count() == 1
    }

    /// Effective permissions of an active participant.
    pub fn effective_permissions(&self, user_id: Uuid) -> Option<PermissionSet> {
        self.active_participant(user_id)
            .map(|p| permissions::resolve(p.role, &p.permissions, &self.settings))
    }

    pub fn pending_request(&self, user_id: Uuid) -> Option<&JoinRequest> {
        self.join_requests.iter().find(|r| r.user_id == user_id)
    }

    pub fn take_request(&mut self, user_id: Uuid) -> Option<JoinRequest> {
        let idx = self.join_requests.iter().position(|r| r.user_id == user_id)?;
        Some(self.join_requests.remove(idx))
    }

    /// Add a new participant row or reactivate a soft-left one.
    /// Returns `false` when the user already was an active participant.
    pub fn admit(&mut self, user_id: Uuid, role: MemberRole, now: DateTime<Utc>) -> bool {
        match self.participant_mut(user_id) {
            Some(existing) if existing.active => false,
            Some(existing) => {
                existing.reactivate(now);
                existing.set_role(role);
                true
            }
            None => {
                self.participants.push(Participant::new(user_id, role, now));
                true
            }
        }
    }

    /// Oldest creation time still visible under the retention setting.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.settings
            .message_retention_days
            .map(|days| now - chrono::Duration::days(i64::from(days)))
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    /// Send bookkeeping: count the message, keep the newest summary,
    /// advance activity and un-archive. Order-independent, so concurrent
    /// sends can be applied in whatever order they commit.
    pub fn record_message(&mut self, summary: LastMessageSummary) {
        self.message_count += 1;
        self.archived = false;
        if summary.sent_at > self.last_activity_at {
            self.last_activity_at = summary.sent_at;
        }
        let newest = self
            .last_message
            .as_ref()
            .map_or(true, |current| summary.sent_at >= current.sent_at);
        if newest {
            self.last_message = Some(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_id_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(Conversation::direct_id(a, b), Conversation::direct_id(b, a));
        assert_ne!(
            Conversation::direct_id(a, b),
            Conversation::direct_id(a, Uuid::new_v4())
        );
    }

    #[test]
    fn test_new_direct_has_two_active_members() {
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = Conversation::new_direct(a, b, now);
        assert_eq!(conv.participants.len(), 2);
        assert!(conv.is_active_participant(a));
        assert!(conv.is_active_participant(b));
        assert_eq!(conv.active_admin_count(), 0);
    }

    #[test]
    fn test_admit_reactivates_soft_left_row() {
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut conv = Conversation::new_direct(a, b, now);
        conv.participant_mut(b).unwrap().deactivate(now);
        assert!(!conv.is_active_participant(b));

        let later = now + chrono::Duration::minutes(5);
        assert!(conv.admit(b, MemberRole::Member, later));
        let row = conv.active_participant(b).unwrap();
        assert_eq!(row.joined_at, later);
        assert!(row.left_at.is_none());
        assert_eq!(conv.participants.len(), 2);

        assert!(!conv.admit(b, MemberRole::Member, later));
    }

    #[test]
    fn test_mute_expiry() {
        let now = Utc::now();
        let mut p = Participant::new(Uuid::new_v4(), MemberRole::Member, now);
        p.muted = true;
        assert!(p.is_muted_at(now));
        p.muted_until = Some(now + chrono::Duration::minutes(10));
        assert!(p.is_muted_at(now));
        assert!(!p.is_muted_at(now + chrono::Duration::minutes(10)));
    }

    #[test]
    fn test_record_message_keeps_newest_summary_in_any_order() {
        let now = Utc::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut conv = Conversation::new_direct(a, b, now);
        conv.archived = true;

        let sent = |sender: Uuid, secs: i64| {
            Message::new(
                conv.id,
                sender,
                MessageType::Text,
                crate::models::MessageContent::Text { text: "hi".into() },
                None,
                now + chrono::Duration::seconds(secs),
            )
        };
        let early = sent(a, 1);
        let late = sent(b, 2);

        // Commit order is not creation order.
        conv.record_message(LastMessageSummary::of(&late));
        conv.record_message(LastMessageSummary::of(&early));

        assert_eq!(conv.message_count, 2);
        assert!(!conv.archived);
        assert_eq!(conv.last_message.as_ref().unwrap().message_id, late.id);
        assert_eq!(conv.last_activity_at, late.created_at);
    }
}
