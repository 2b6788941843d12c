//! Capability resolution for conversation participants.
//!
//! Every mutating directory or message operation asks [`resolve`] for the
//! effective permission set instead of checking roles inline.

use super::conversation::{AddPolicy, ConversationSettings};
use super::member::MemberRole;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    SendMessages,
    AddMembers,
    RemoveMembers,
    DeleteMessages,
    PinMessages,
    EditInfo,
    MuteMembers,
}

/// Per-participant permission flags as stored on the membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub send_messages: bool,
    #[serde(default)]
    pub add_members: bool,
    #[serde(default)]
    pub remove_members: bool,
    #[serde(default)]
    pub delete_messages: bool,
    #[serde(default)]
    pub pin_messages: bool,
    #[serde(default)]
    pub edit_info: bool,
    #[serde(default)]
    pub mute_members: bool,
}

impl PermissionSet {
    pub fn all() -> Self {
        Self {
            send_messages: true,
            add_members: true,
            remove_members: true,
            delete_messages: true,
            pin_messages: true,
            edit_info: true,
            mute_members: true,
        }
    }

    /// Template assigned whenever a role is granted.
    pub fn for_role(role: MemberRole) -> Self {
        match role {
            MemberRole::Admin => Self::all(),
            MemberRole::Moderator => Self {
                send_messages: true,
                add_members: true,
                delete_messages: true,
                pin_messages: true,
                ..Self::default()
            },
            MemberRole::Member => Self {
                send_messages: true,
                ..Self::default()
            },
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::SendMessages => self.send_messages,
            Permission::AddMembers => self.add_members,
            Permission::RemoveMembers => self.remove_members,
            Permission::DeleteMessages => self.delete_messages,
            Permission::PinMessages => self.pin_messages,
            Permission::EditInfo => self.edit_info,
            Permission::MuteMembers => self.mute_members,
        }
    }
}

/// Effective permissions of a participant.
///
/// Admins hold everything regardless of row flags or settings. For everyone
/// else the explicit flags apply, `AddPolicy::AllMembers` grants adding, and
/// read-only / admin-only messaging revoke sending.
pub fn resolve(
    role: MemberRole,
    explicit: &PermissionSet,
    settings: &ConversationSettings,
) -> PermissionSet {
    if role.is_privileged() {
        return PermissionSet::all();
    }

    let mut effective = *explicit;
    if settings.who_may_add == AddPolicy::AllMembers {
        effective.add_members = true;
    }
    if settings.read_only || settings.admin_only_messaging {
        effective.send_messages = false;
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_ignores_flags_and_settings() {
        let settings = ConversationSettings {
            read_only: true,
            ..ConversationSettings::default()
        };
        let resolved = resolve(MemberRole::Admin, &PermissionSet::default(), &settings);
        assert_eq!(resolved, PermissionSet::all());
    }

    #[test]
    fn test_moderator_template() {
        let template = PermissionSet::for_role(MemberRole::Moderator);
        assert!(template.allows(Permission::SendMessages));
        assert!(template.allows(Permission::AddMembers));
        assert!(template.allows(Permission::DeleteMessages));
        assert!(template.allows(Permission::PinMessages));
        assert!(!template.allows(Permission::RemoveMembers));
        assert!(!template.allows(Permission::EditInfo));
    }

    #[test]
    fn test_member_template_is_send_only() {
        let template = PermissionSet::for_role(MemberRole::Member);
        assert_eq!(
            template,
            PermissionSet {
                send_messages: true,
                ..PermissionSet::default()
            }
        );
    }

    #[test]
    fn test_all_members_policy_grants_add() {
        let settings = ConversationSettings {
            who_may_add: AddPolicy::AllMembers,
            ..ConversationSettings::default()
        };
        let resolved = resolve(
            MemberRole::Member,
            &PermissionSet::for_role(MemberRole::Member),
            &settings,
        );
        assert!(resolved.add_members);
    }

    #[test]
    fn test_read_only_revokes_send_for_non_admins() {
        let settings = ConversationSettings {
            admin_only_messaging: true,
            ..ConversationSettings::default()
        };
        let resolved = resolve(
            MemberRole::Moderator,
            &PermissionSet::for_role(MemberRole::Moderator),
            &settings,
        );
        assert!(!resolved.send_messages);
        assert!(resolved.delete_messages);
    }
}
