//! Conversation directory behavior over the in-memory store.
//!
//! Run: cargo test --test directory_test

mod test_harness;

use chat_service::error::AppError;
use chat_service::models::{ConversationKind, ConversationSettings, MemberRole, PermissionSet};
use chat_service::services::conversation_service::{
    CreateConversation, MembershipOutcome, UpdateConversation,
};
use test_harness::Harness;

#[tokio::test]
async fn test_direct_conversation_is_symmetric_and_unique() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);

    let first = h.state.conversations.get_or_create_direct(a, b).await.unwrap();
    let reversed = h.state.conversations.get_or_create_direct(b, a).await.unwrap();
    let again = h.state.conversations.get_or_create_direct(a, b).await.unwrap();

    assert_eq!(first.id, reversed.id);
    assert_eq!(first.id, again.id);
    assert_eq!(first.kind, ConversationKind::Direct);
    assert_eq!(h.state.conversations.list_for_user(a).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_direct_creation_yields_one_conversation() {
    let h = Harness::new();
    let (a, b) = (h.user().await, h.user().await);

    let (left, right) = tokio::join!(
        h.state.conversations.get_or_create_direct(a, b),
        h.state.conversations.get_or_create_direct(b, a),
    );
    assert_eq!(left.unwrap().id, right.unwrap().id);
    assert_eq!(h.state.conversations.list_for_user(b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_direct_with_unknown_user_or_self_is_rejected() {
    let h = Harness::new();
    let a = h.user().await;

    let err = h
        .state
        .conversations
        .get_or_create_direct(a, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let err = h.state.conversations.get_or_create_direct(a, a).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn test_membership_mutations_on_direct_are_invalid() {
    let h = Harness::new();
    let (a, b, c) = (h.user().await, h.user().await, h.user().await);
    let direct = h.state.conversations.get_or_create_direct(a, b).await.unwrap();

    let err = h.state.conversations.leave(direct.id, a).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = h
        .state
        .conversations
        .add_member(direct.id, a, c)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn test_sole_admin_is_protected_until_second_admin_exists() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let group = h.group(admin, &[member]).await;

    let err = h.state.conversations.leave(group.id, admin).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = h
        .state
        .conversations
        .update_role(group.id, admin, admin, MemberRole::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let err = h
        .state
        .conversations
        .remove_member(group.id, member, admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = h
        .state
        .conversations
        .remove_member(group.id, admin, admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    h.state
        .conversations
        .update_role(group.id, admin, member, MemberRole::Admin)
        .await
        .unwrap();
    let after = h.state.conversations.leave(group.id, admin).await.unwrap();

    assert!(!after.is_active_participant(admin));
    assert!(after.participant(admin).is_some(), "left rows are kept");
    assert_eq!(after.active_admin_count(), 1);
}

#[tokio::test]
async fn test_join_request_lifecycle_on_approval_channel() {
    let h = Harness::new();
    let admin = h.user().await;
    let seed = h.user().await;
    let applicant = h.user().await;

    let channel = h
        .state
        .conversations
        .create_group_or_channel(
            admin,
            CreateConversation {
                kind: ConversationKind::Channel,
                name: "announcements".into(),
                description: None,
                avatar_url: None,
                participant_ids: vec![seed],
                settings: ConversationSettings {
                    require_approval_to_join: true,
                    ..ConversationSettings::default()
                },
            },
        )
        .await
        .unwrap();

    let (outcome, queued) = h
        .state
        .conversations
        .join(channel.id, applicant, Some("let me in".into()))
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::Requested);
    assert_eq!(queued.join_requests.len(), 1);
    assert!(!queued.is_active_participant(applicant));

    let err = h
        .state
        .conversations
        .join(channel.id, applicant, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = h
        .state
        .conversations
        .approve_request(channel.id, seed, applicant)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let approved = h
        .state
        .conversations
        .approve_request(channel.id, admin, applicant)
        .await
        .unwrap();
    assert!(approved.join_requests.is_empty());
    let row = approved.active_participant(applicant).unwrap();
    assert_eq!(row.role, MemberRole::Member);

    let err = h
        .state
        .conversations
        .approve_request(channel.id, admin, applicant)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_member_add_under_admins_only_policy_is_queued() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let invitee = h.user().await;
    let group = h.group(admin, &[member]).await;

    let (outcome, conversation) = h
        .state
        .conversations
        .add_member(group.id, member, invitee)
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::Requested);
    assert_eq!(conversation.pending_request(invitee).unwrap().invited_by, Some(member));

    let (outcome, conversation) = h
        .state
        .conversations
        .add_member(group.id, admin, invitee)
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::Added);
    assert!(conversation.is_active_participant(invitee));
    assert!(conversation.pending_request(invitee).is_none());

    let (outcome, _) = h
        .state
        .conversations
        .add_member(group.id, admin, invitee)
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::AlreadyMember);
}

#[tokio::test]
async fn test_private_group_cannot_be_joined_uninvited() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let outsider = h.user().await;
    let group = h.group(admin, &[member]).await;

    let err = h
        .state
        .conversations
        .join(group.id, outsider, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let public = h
        .group_with(
            admin,
            &[member],
            ConversationSettings {
                is_public: true,
                ..ConversationSettings::default()
            },
        )
        .await;
    let (outcome, conversation) = h
        .state
        .conversations
        .join(public.id, outsider, None)
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::Added);
    assert!(conversation.is_active_participant(outsider));
}

#[tokio::test]
async fn test_rejoin_reactivates_the_same_row() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let group = h
        .group_with(
            admin,
            &[member],
            ConversationSettings {
                is_public: true,
                ..ConversationSettings::default()
            },
        )
        .await;

    h.state.conversations.leave(group.id, member).await.unwrap();
    let (_, rejoined) = h.state.conversations.join(group.id, member, None).await.unwrap();

    let rows: Vec<_> = rejoined
        .participants
        .iter()
        .filter(|p| p.user_id == member)
        .collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].active);
    assert!(rows[0].left_at.is_none());
}

#[tokio::test]
async fn test_muted_member_cannot_send_until_expiry() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let group = h.group(admin, &[member]).await;

    let until = h.now() + chrono::Duration::minutes(10);
    h.state
        .conversations
        .mute_member(group.id, admin, member, true, Some(until))
        .await
        .unwrap();

    let err = h.send_text(member, group.id, "hello?").await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    h.clock.advance(chrono::Duration::minutes(11));
    h.send_text(member, group.id, "back").await.unwrap();
}

#[tokio::test]
async fn test_update_info_requires_edit_permission() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let group = h.group(admin, &[member]).await;

    let patch = UpdateConversation {
        name: Some("renamed".into()),
        ..Default::default()
    };
    let err = h
        .state
        .conversations
        .update_info(group.id, member, patch.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let updated = h
        .state
        .conversations
        .update_info(group.id, admin, patch)
        .await
        .unwrap();
    assert_eq!(updated.name.as_deref(), Some("renamed"));
}

#[tokio::test]
async fn test_explicit_remove_flag_lets_member_remove() {
    let h = Harness::new();
    let admin = h.user().await;
    let (moderator, target) = (h.user().await, h.user().await);
    let group = h.group(admin, &[moderator, target]).await;

    let err = h
        .state
        .conversations
        .remove_member(group.id, moderator, target)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let granted = h
        .state
        .conversations
        .update_permissions(
            group.id,
            admin,
            moderator,
            PermissionSet {
                send_messages: true,
                remove_members: true,
                ..PermissionSet::default()
            },
        )
        .await
        .unwrap();
    let row = granted.active_participant(moderator).unwrap();
    assert!(row.permissions.remove_members);
    assert_eq!(row.role, MemberRole::Member);

    let after = h
        .state
        .conversations
        .remove_member(group.id, moderator, target)
        .await
        .unwrap();
    assert!(!after.is_active_participant(target));

    let err = h
        .state
        .conversations
        .remove_member(group.id, moderator, admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
}

#[tokio::test]
async fn test_update_permissions_is_admin_only_and_skips_admins() {
    let h = Harness::new();
    let admin = h.user().await;
    let (member, other) = (h.user().await, h.user().await);
    let group = h.group(admin, &[member, other]).await;

    let err = h
        .state
        .conversations
        .update_permissions(group.id, member, other, PermissionSet::all())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    h.state
        .conversations
        .update_role(group.id, admin, other, MemberRole::Admin)
        .await
        .unwrap();
    let err = h
        .state
        .conversations
        .update_permissions(group.id, admin, other, PermissionSet::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let muted = h
        .state
        .conversations
        .update_permissions(group.id, admin, member, PermissionSet::default())
        .await
        .unwrap();
    assert!(!muted.active_participant(member).unwrap().permissions.send_messages);
    let err = h.send_text(member, group.id, "still here?").await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_reject_request_drops_it_without_admitting() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let applicant = h.user().await;
    let group = h
        .group_with(
            admin,
            &[member],
            ConversationSettings {
                require_approval_to_join: true,
                ..ConversationSettings::default()
            },
        )
        .await;

    h.state
        .conversations
        .join(group.id, applicant, Some("let me in".into()))
        .await
        .unwrap();

    let err = h
        .state
        .conversations
        .reject_request(group.id, member, applicant)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let rejected = h
        .state
        .conversations
        .reject_request(group.id, admin, applicant)
        .await
        .unwrap();
    assert!(rejected.pending_request(applicant).is_none());
    assert!(!rejected.is_active_participant(applicant));

    let err = h
        .state
        .conversations
        .reject_request(group.id, admin, applicant)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    let (outcome, _) = h
        .state
        .conversations
        .join(group.id, applicant, None)
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::Requested);
}

#[tokio::test]
async fn test_stale_request_is_cleared_then_reported_as_conflict() {
    let h = Harness::new();
    let admin = h.user().await;
    let member = h.user().await;
    let invitee = h.user().await;
    let group = h.group(admin, &[member]).await;

    let (outcome, _) = h
        .state
        .conversations
        .add_member(group.id, member, invitee)
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::Requested);

    h.state
        .conversations
        .update_info(
            group.id,
            admin,
            UpdateConversation {
                settings: Some(ConversationSettings {
                    is_public: true,
                    ..ConversationSettings::default()
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (outcome, joined) = h
        .state
        .conversations
        .join(group.id, invitee, None)
        .await
        .unwrap();
    assert_eq!(outcome, MembershipOutcome::Added);
    assert!(joined.pending_request(invitee).is_some());

    let err = h
        .state
        .conversations
        .approve_request(group.id, admin, invitee)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let conversation = h.state.conversations.get_for_member(group.id, admin).await.unwrap();
    assert!(conversation.pending_request(invitee).is_none());
    assert!(conversation.is_active_participant(invitee));

    let err = h
        .state
        .conversations
        .approve_request(group.id, admin, invitee)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
