//! Conversation directory: identity, roster, roles and membership transitions.
//!
//! Every mutation loads the conversation document, applies the transition
//! through the model helpers and commits it with a version check; lost races
//! are retried. Real-time events go out only after the commit succeeded.

use super::{with_retries, ServiceContext};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationKind, ConversationSettings, JoinRequest, MemberRole, Participant,
    Permission, PermissionSet,
};
use crate::store::WriteBatch;
use crate::websocket::WebSocketEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

const MAX_NAME_CHARS: usize = 128;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversation {
    pub kind: ConversationKind,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub settings: ConversationSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateConversation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub settings: Option<ConversationSettings>,
}

/// What an add or join attempt ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipOutcome {
    Added,
    AlreadyMember,
    Requested,
}

#[derive(Clone)]
pub struct ConversationService {
    ctx: ServiceContext,
}

fn require_active(conversation: &Conversation, user_id: Uuid) -> AppResult<&Participant> {
    conversation.active_participant(user_id).ok_or_else(|| {
        AppError::forbidden(format!(
            "user {user_id} is not an active participant of conversation {}",
            conversation.id
        ))
    })
}

fn require_permission(
    conversation: &Conversation,
    user_id: Uuid,
    permission: Permission,
) -> AppResult<()> {
    require_active(conversation, user_id)?;
    let allowed = conversation
        .effective_permissions(user_id)
        .is_some_and(|p| p.allows(permission));
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden(format!("missing permission {permission:?}")))
    }
}

fn reject_direct(conversation: &Conversation, operation: &str) -> AppResult<()> {
    if conversation.is_direct() {
        Err(AppError::invalid_state(format!(
            "{operation} is not allowed on direct conversations"
        )))
    } else {
        Ok(())
    }
}

fn require_admin(conversation: &Conversation, user_id: Uuid) -> AppResult<()> {
    let actor = require_active(conversation, user_id)?;
    if actor.role.is_privileged() {
        Ok(())
    } else {
        Err(AppError::forbidden("admin role required"))
    }
}

/// Admins and holders of the explicit add-members flag decide join requests.
fn can_decide_requests(participant: &Participant) -> bool {
    participant.active && (participant.role.is_privileged() || participant.permissions.add_members)
}

fn request_deciders(conversation: &Conversation) -> Vec<Uuid> {
    conversation
        .participants
        .iter()
        .filter(|p| can_decide_requests(p))
        .map(|p| p.user_id)
        .collect()
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::BadRequest(format!(
            "name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

impl ConversationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn now(&self) -> DateTime<Utc> {
        self.ctx.clock.now()
    }

    pub(crate) async fn load(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        self.ctx
            .store
            .get_conversation(conversation_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(|| AppError::not_found(format!("conversation {conversation_id}")))
    }

    async fn save(&self, conversation: Conversation) -> AppResult<Conversation> {
        let committed = self
            .ctx
            .store
            .commit(WriteBatch::new().update_conversation(conversation))
            .await?;
        committed
            .conversations
            .into_iter()
            .next()
            .ok_or(AppError::Internal)
    }

    /// Conversation as seen by one of its active participants.
    pub async fn get_for_member(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<Conversation> {
        let conversation = self.load(conversation_id).await?;
        require_active(&conversation, user_id)?;
        Ok(conversation)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> AppResult<Vec<Conversation>> {
        self.ctx.store.conversations_for_user(user_id).await
    }

    pub async fn active_conversation_ids(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(self
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect())
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Open the direct conversation between two users, creating it on first
    /// use and reactivating a side that had left.
    pub async fn get_or_create_direct(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Conversation> {
        if user_a == user_b {
            return Err(AppError::BadRequest(
                "cannot open a direct conversation with yourself".into(),
            ));
        }
        self.ctx.users.require_user(user_b).await?;

        let id = Conversation::direct_id(user_a, user_b);
        let conversation = match self.ctx.store.get_conversation(id).await? {
            Some(_) => {
                with_retries("reopen_direct", self.ctx.max_write_retries, move || {
                    self.try_reopen_direct(id, user_a, user_b)
                })
                .await?
            }
            None => {
                let fresh = Conversation::new_direct(user_a, user_b, self.now());
                match self.ctx.store.insert_conversation(fresh).await {
                    Ok(created) => {
                        tracing::info!(conversation_id = %created.id, "direct conversation created");
                        created
                    }
                    // Lost the creation race; the other writer's row is the answer.
                    Err(AppError::Conflict(_)) => {
                        with_retries("reopen_direct", self.ctx.max_write_retries, move || {
                            self.try_reopen_direct(id, user_a, user_b)
                        })
                        .await?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        for user in [user_a, user_b] {
            self.ctx.router.join_room(conversation.id, user).await;
        }
        Ok(conversation)
    }

    async fn try_reopen_direct(&self, id: Uuid, user_a: Uuid, user_b: Uuid) -> AppResult<Conversation> {
        let mut conversation = self
            .ctx
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("conversation {id}")))?;

        let now = self.now();
        let mut changed = !conversation.is_active;
        conversation.is_active = true;
        for user in [user_a, user_b] {
            match conversation.participant_mut(user) {
                Some(p) if !p.active => {
                    p.reactivate(now);
                    changed = true;
                }
                Some(_) => {}
                None => {
                    return Err(AppError::invalid_state(
                        "direct conversation roster is inconsistent",
                    ))
                }
            }
        }

        if !changed {
            return Ok(conversation);
        }
        tracing::info!(conversation_id = %id, "direct conversation reopened");
        self.save(conversation).await
    }

    pub async fn create_group_or_channel(
        &self,
        creator: Uuid,
        request: CreateConversation,
    ) -> AppResult<Conversation> {
        if request.kind == ConversationKind::Direct {
            return Err(AppError::BadRequest(
                "direct conversations are opened through the direct endpoint".into(),
            ));
        }
        let name = validate_name(&request.name)?;

        let mut seen = HashSet::from([creator]);
        let members: Vec<Uuid> = request
            .participant_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if members.is_empty() {
            return Err(AppError::BadRequest(
                "a group or channel needs at least two distinct members".into(),
            ));
        }
        for member in &members {
            self.ctx.users.require_user(*member).await?;
        }

        let now = self.now();
        let mut participants = vec![Participant::new(creator, MemberRole::Admin, now)];
        participants.extend(
            members
                .iter()
                .map(|id| Participant::new(*id, MemberRole::Member, now)),
        );

        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: request.kind,
            name: Some(name),
            description: request.description,
            avatar_url: request.avatar_url,
            created_by: creator,
            participants,
            settings: request.settings,
            join_requests: Vec::new(),
            pinned_message_ids: Vec::new(),
            last_message: None,
            message_count: 0,
            last_activity_at: now,
            created_at: now,
            is_active: true,
            archived: false,
            version: 0,
        };

        let created = self.ctx.store.insert_conversation(conversation).await?;
        tracing::info!(
            conversation_id = %created.id,
            kind = created.kind.as_str(),
            members = created.participants.len(),
            "conversation created"
        );

        for user in created.active_participant_ids() {
            self.ctx.router.join_room(created.id, user).await;
        }
        Ok(created)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Add `target`, or queue a join request when the actor may not add directly.
    pub async fn add_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
    ) -> AppResult<(MembershipOutcome, Conversation)> {
        self.ctx.users.require_user(target).await?;

        let (outcome, conversation, changed) =
            with_retries("add_member", self.ctx.max_write_retries, move || {
                self.try_add_member(conversation_id, actor, target)
            })
            .await?;

        match outcome {
            MembershipOutcome::Added => {
                self.announce_joined(&conversation, target, Some(actor)).await;
            }
            MembershipOutcome::Requested if changed => {
                self.announce_request(&conversation, target, None, actor).await;
            }
            MembershipOutcome::Requested | MembershipOutcome::AlreadyMember => {}
        }
        Ok((outcome, conversation))
    }

    /// The flag is false when nothing was written (already a member, or a
    /// request was already pending).
    async fn try_add_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
    ) -> AppResult<(MembershipOutcome, Conversation, bool)> {
        let mut conversation = self.load(conversation_id).await?;
        reject_direct(&conversation, "adding members")?;
        let actor_row = require_active(&conversation, actor)?;
        let actor_role = actor_row.role;

        if conversation.is_active_participant(target) {
            return Ok((MembershipOutcome::AlreadyMember, conversation, false));
        }

        let may_add = conversation
            .effective_permissions(actor)
            .is_some_and(|p| p.allows(Permission::AddMembers));
        let needs_approval = conversation.settings.require_approval_to_join && !actor_role.is_privileged();
        let now = self.now();

        if needs_approval || !may_add {
            if conversation.pending_request(target).is_some() {
                return Ok((MembershipOutcome::Requested, conversation, false));
            }
            conversation.join_requests.push(JoinRequest {
                user_id: target,
                message: None,
                requested_at: now,
                invited_by: Some(actor),
            });
            let saved = self.save(conversation).await?;
            return Ok((MembershipOutcome::Requested, saved, true));
        }

        conversation.take_request(target);
        conversation.admit(target, MemberRole::Member, now);
        conversation.touch(now);
        let saved = self.save(conversation).await?;
        tracing::info!(conversation_id = %conversation_id, user_id = %target, added_by = %actor, "member added");
        Ok((MembershipOutcome::Added, saved, true))
    }

    pub async fn join(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message: Option<String>,
    ) -> AppResult<(MembershipOutcome, Conversation)> {
        self.ctx.users.require_user(user_id).await?;

        let request_note = message.clone();
        let (outcome, conversation) = with_retries("join", self.ctx.max_write_retries, move || {
            self.try_join(conversation_id, user_id, message.clone())
        })
        .await?;

        match outcome {
            MembershipOutcome::Added => self.announce_joined(&conversation, user_id, Some(user_id)).await,
            MembershipOutcome::Requested => {
                self.announce_request(&conversation, user_id, request_note, user_id)
                    .await
            }
            MembershipOutcome::AlreadyMember => {}
        }
        Ok((outcome, conversation))
    }

    async fn try_join(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message: Option<String>,
    ) -> AppResult<(MembershipOutcome, Conversation)> {
        let mut conversation = self.load(conversation_id).await?;
        reject_direct(&conversation, "joining")?;

        if conversation.is_active_participant(user_id) {
            return Ok((MembershipOutcome::AlreadyMember, conversation));
        }

        let now = self.now();
        if conversation.settings.require_approval_to_join {
            if conversation.pending_request(user_id).is_some() {
                return Err(AppError::Conflict(
                    "a join request is already pending".into(),
                ));
            }
            conversation.join_requests.push(JoinRequest {
                user_id,
                message: message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
                requested_at: now,
                invited_by: None,
            });
            let saved = self.save(conversation).await?;
            tracing::info!(conversation_id = %conversation_id, user_id = %user_id, "join request queued");
            return Ok((MembershipOutcome::Requested, saved));
        }

        if !conversation.settings.is_public {
            return Err(AppError::forbidden(
                "conversation cannot be joined without an invitation",
            ));
        }

        conversation.admit(user_id, MemberRole::Member, now);
        conversation.touch(now);
        let saved = self.save(conversation).await?;
        tracing::info!(conversation_id = %conversation_id, user_id = %user_id, "user joined");
        Ok((MembershipOutcome::Added, saved))
    }

    pub async fn approve_request(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        self.ctx.users.require_user(user_id).await?;
        let conversation = with_retries("approve_request", self.ctx.max_write_retries, move || {
            self.try_decide(conversation_id, actor, user_id, true)
        })
        .await?;

        self.announce_joined(&conversation, user_id, Some(actor)).await;
        self.ctx
            .router
            .notify_users(
                conversation_id,
                &[user_id],
                WebSocketEvent::JoinRequestApproved { user_id },
                Some(actor),
            )
            .await;
        Ok(conversation)
    }

    pub async fn reject_request(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = with_retries("reject_request", self.ctx.max_write_retries, move || {
            self.try_decide(conversation_id, actor, user_id, false)
        })
        .await?;

        self.ctx
            .router
            .notify_users(
                conversation_id,
                &[user_id],
                WebSocketEvent::JoinRequestRejected { user_id },
                Some(actor),
            )
            .await;
        Ok(conversation)
    }

    async fn try_decide(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        user_id: Uuid,
        approve: bool,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        let decider = require_active(&conversation, actor)?;
        if !can_decide_requests(decider) {
            return Err(AppError::forbidden("not allowed to decide join requests"));
        }

        if conversation.take_request(user_id).is_none() {
            return Err(AppError::not_found(format!("join request from {user_id}")));
        }

        if conversation.is_active_participant(user_id) {
            // Stale request: drop it, then report the conflict.
            self.save(conversation).await?;
            return Err(AppError::Conflict(format!(
                "user {user_id} is already a member"
            )));
        }

        let now = self.now();
        if approve {
            conversation.admit(user_id, MemberRole::Member, now);
            conversation.touch(now);
        }
        let saved = self.save(conversation).await?;
        tracing::info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            decided_by = %actor,
            approved = approve,
            "join request decided"
        );
        Ok(saved)
    }

    pub async fn leave(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<Conversation> {
        let conversation = with_retries("leave", self.ctx.max_write_retries, move || {
            self.try_leave(conversation_id, user_id)
        })
        .await?;

        let mut recipients = conversation.active_participant_ids();
        recipients.push(user_id);
        self.ctx
            .router
            .publish_to(
                conversation_id,
                &recipients,
                WebSocketEvent::ParticipantLeft { user_id },
                Some(user_id),
            )
            .await;
        self.ctx.router.leave_room(conversation_id, user_id).await;
        Ok(conversation)
    }

    async fn try_leave(&self, conversation_id: Uuid, user_id: Uuid) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        if conversation.is_direct() {
            return Err(AppError::invalid_state(
                "direct conversations cannot be left; archive instead",
            ));
        }
        if !conversation.is_active_participant(user_id) {
            return Err(AppError::not_found(format!("participant {user_id}")));
        }
        if conversation.is_sole_active_admin(user_id) {
            return Err(AppError::invalid_state(
                "the only admin cannot leave; promote another admin first",
            ));
        }

        let now = self.now();
        if let Some(p) = conversation.participant_mut(user_id) {
            p.deactivate(now);
        }
        conversation.touch(now);
        let saved = self.save(conversation).await?;
        tracing::info!(conversation_id = %conversation_id, user_id = %user_id, "participant left");
        Ok(saved)
    }

    pub async fn remove_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = with_retries("remove_member", self.ctx.max_write_retries, move || {
            self.try_remove_member(conversation_id, actor, target)
        })
        .await?;

        let mut recipients = conversation.active_participant_ids();
        recipients.push(target);
        self.ctx
            .router
            .publish_to(
                conversation_id,
                &recipients,
                WebSocketEvent::ParticipantRemoved {
                    user_id: target,
                    removed_by: actor,
                },
                Some(actor),
            )
            .await;
        self.ctx.router.leave_room(conversation_id, target).await;
        Ok(conversation)
    }

    async fn try_remove_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        reject_direct(&conversation, "removing members")?;
        require_permission(&conversation, actor, Permission::RemoveMembers)?;

        let actor_role = require_active(&conversation, actor)?.role;
        let target_role = conversation
            .active_participant(target)
            .map(|p| p.role)
            .ok_or_else(|| AppError::not_found(format!("participant {target}")))?;
        if conversation.is_sole_active_admin(target) {
            return Err(AppError::invalid_state("the only admin cannot be removed"));
        }
        if actor == target {
            return Err(AppError::BadRequest("use leave to remove yourself".into()));
        }
        if target_role.is_privileged() && !actor_role.is_privileged() {
            return Err(AppError::forbidden("only admins can remove an admin"));
        }

        let now = self.now();
        if let Some(p) = conversation.participant_mut(target) {
            p.deactivate(now);
        }
        conversation.touch(now);
        let saved = self.save(conversation).await?;
        tracing::info!(conversation_id = %conversation_id, user_id = %target, removed_by = %actor, "participant removed");
        Ok(saved)
    }

    // ------------------------------------------------------------------
    // Roles and permissions
    // ------------------------------------------------------------------

    pub async fn update_role(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
        role: MemberRole,
    ) -> AppResult<Conversation> {
        let conversation = with_retries("update_role", self.ctx.max_write_retries, move || {
            self.try_update_role(conversation_id, actor, target, role)
        })
        .await?;
        self.announce_update(&conversation, actor, &["participants"]).await;
        Ok(conversation)
    }

    async fn try_update_role(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
        role: MemberRole,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        reject_direct(&conversation, "changing roles")?;
        require_admin(&conversation, actor)?;

        let current = conversation
            .active_participant(target)
            .map(|p| p.role)
            .ok_or_else(|| AppError::not_found(format!("participant {target}")))?;
        if current == role {
            return Ok(conversation);
        }
        if role != MemberRole::Admin && conversation.is_sole_active_admin(target) {
            return Err(AppError::invalid_state("the only admin cannot be demoted"));
        }

        if let Some(p) = conversation.participant_mut(target) {
            p.set_role(role);
        }
        let saved = self.save(conversation).await?;
        tracing::info!(conversation_id = %conversation_id, user_id = %target, role = %role, "role updated");
        Ok(saved)
    }

    /// Replace the explicit permission flags of a non-admin participant.
    pub async fn update_permissions(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
        permissions: PermissionSet,
    ) -> AppResult<Conversation> {
        let conversation = with_retries("update_permissions", self.ctx.max_write_retries, move || {
            self.try_update_permissions(conversation_id, actor, target, permissions)
        })
        .await?;
        self.announce_update(&conversation, actor, &["participants"]).await;
        Ok(conversation)
    }

    async fn try_update_permissions(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
        permissions: PermissionSet,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        reject_direct(&conversation, "changing permissions")?;
        require_admin(&conversation, actor)?;

        let row = conversation
            .participant_mut(target)
            .filter(|p| p.active)
            .ok_or_else(|| AppError::not_found(format!("participant {target}")))?;
        if row.role.is_privileged() {
            return Err(AppError::invalid_state("admins always hold every permission"));
        }
        row.permissions = permissions;
        self.save(conversation).await
    }

    /// Mute or unmute a participant. `until = None` with `muted` mutes indefinitely.
    pub async fn mute_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Conversation> {
        let conversation = with_retries("mute_member", self.ctx.max_write_retries, move || {
            self.try_mute_member(conversation_id, actor, target, muted, until)
        })
        .await?;
        self.announce_update(&conversation, actor, &["participants"]).await;
        Ok(conversation)
    }

    async fn try_mute_member(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        target: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        reject_direct(&conversation, "muting members")?;
        require_permission(&conversation, actor, Permission::MuteMembers)?;

        let now = self.now();
        if muted && until.is_some_and(|t| t <= now) {
            return Err(AppError::BadRequest("mute expiry must be in the future".into()));
        }

        let row = conversation
            .participant_mut(target)
            .filter(|p| p.active)
            .ok_or_else(|| AppError::not_found(format!("participant {target}")))?;
        if muted && row.role.is_privileged() {
            return Err(AppError::forbidden("admins cannot be muted"));
        }
        row.muted = muted;
        row.muted_until = if muted { until } else { None };
        self.save(conversation).await
    }

    // ------------------------------------------------------------------
    // Conversation info and flags
    // ------------------------------------------------------------------

    pub async fn update_info(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        update: UpdateConversation,
    ) -> AppResult<Conversation> {
        let mut fields = Vec::new();
        if update.name.is_some() {
            fields.push("name");
        }
        if update.description.is_some() {
            fields.push("description");
        }
        if update.avatar_url.is_some() {
            fields.push("avatar_url");
        }
        if update.settings.is_some() {
            fields.push("settings");
        }
        if fields.is_empty() {
            return Err(AppError::BadRequest("nothing to update".into()));
        }
        let name = update.name.as_deref().map(validate_name).transpose()?;

        let conversation = with_retries("update_info", self.ctx.max_write_retries, move || {
            self.try_update_info(conversation_id, actor, name.clone(), update.clone())
        })
        .await?;
        self.announce_update(&conversation, actor, &fields).await;
        Ok(conversation)
    }

    async fn try_update_info(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        name: Option<String>,
        update: UpdateConversation,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        reject_direct(&conversation, "updating conversation info")?;
        require_permission(&conversation, actor, Permission::EditInfo)?;

        if let Some(name) = name {
            conversation.name = Some(name);
        }
        if let Some(description) = update.description {
            conversation.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(avatar_url) = update.avatar_url {
            conversation.avatar_url = Some(avatar_url).filter(|a| !a.trim().is_empty());
        }
        if let Some(settings) = update.settings {
            conversation.settings = settings;
        }
        conversation.touch(self.now());
        self.save(conversation).await
    }

    /// Direct conversations: any participant. Groups and channels: edit-info holders.
    pub async fn set_archived(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        archived: bool,
    ) -> AppResult<Conversation> {
        let conversation = with_retries("set_archived", self.ctx.max_write_retries, move || {
            self.try_set_archived(conversation_id, actor, archived)
        })
        .await?;
        self.announce_update(&conversation, actor, &["archived"]).await;
        Ok(conversation)
    }

    async fn try_set_archived(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        archived: bool,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        if conversation.is_direct() {
            require_active(&conversation, actor)?;
        } else {
            require_permission(&conversation, actor, Permission::EditInfo)?;
        }
        if conversation.archived == archived {
            return Ok(conversation);
        }
        conversation.archived = archived;
        self.save(conversation).await
    }

    pub async fn pin_message(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        message_id: Uuid,
        pinned: bool,
    ) -> AppResult<Conversation> {
        let conversation = with_retries("pin_message", self.ctx.max_write_retries, move || {
            self.try_pin_message(conversation_id, actor, message_id, pinned)
        })
        .await?;
        self.ctx
            .router
            .publish(
                &conversation,
                WebSocketEvent::MessagePinned { message_id, pinned },
                Some(actor),
            )
            .await;
        Ok(conversation)
    }

    async fn try_pin_message(
        &self,
        conversation_id: Uuid,
        actor: Uuid,
        message_id: Uuid,
        pinned: bool,
    ) -> AppResult<Conversation> {
        let mut conversation = self.load(conversation_id).await?;
        if conversation.is_direct() {
            require_active(&conversation, actor)?;
        } else {
            require_permission(&conversation, actor, Permission::PinMessages)?;
        }

        let already = conversation.pinned_message_ids.contains(&message_id);
        if pinned {
            if already {
                return Ok(conversation);
            }
            let message = self
                .ctx
                .store
                .get_message(message_id)
                .await?
                .filter(|m| m.conversation_id == conversation_id)
                .ok_or_else(|| AppError::not_found(format!("message {message_id}")))?;
            if message.is_tombstoned() {
                return Err(AppError::invalid_state("deleted messages cannot be pinned"));
            }
            conversation.pinned_message_ids.push(message_id);
        } else {
            if !already {
                return Err(AppError::not_found(format!("message {message_id} is not pinned")));
            }
            conversation.pinned_message_ids.retain(|id| *id != message_id);
        }
        self.save(conversation).await
    }

    /// Move the caller's last-read pointer to the newest message.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Participant> {
        with_retries("mark_conversation_read", self.ctx.max_write_retries, move || {
            self.try_mark_conversation_read(conversation_id, user_id)
        })
        .await
    }

    async fn try_mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Participant> {
        let mut conversation = self.load(conversation_id).await?;
        require_active(&conversation, user_id)?;

        let latest = conversation.last_message.as_ref().map(|m| m.message_id);
        let now = self.now();
        let row = conversation
            .participant_mut(user_id)
            .ok_or_else(|| AppError::not_found(format!("participant {user_id}")))?;
        if latest.is_none() || row.last_read_message_id == latest {
            return Ok(row.clone());
        }
        row.last_read_message_id = latest;
        row.last_read_at = Some(now);

        let saved = self.save(conversation).await?;
        saved
            .participant(user_id)
            .cloned()
            .ok_or(AppError::Internal)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    async fn announce_joined(&self, conversation: &Conversation, user_id: Uuid, actor: Option<Uuid>) {
        self.ctx.router.join_room(conversation.id, user_id).await;
        let role = conversation
            .participant(user_id)
            .map(|p| p.role)
            .unwrap_or(MemberRole::Member);
        self.ctx
            .router
            .publish(
                conversation,
                WebSocketEvent::ParticipantJoined { user_id, role },
                actor,
            )
            .await;
    }

    async fn announce_request(
        &self,
        conversation: &Conversation,
        user_id: Uuid,
        message: Option<String>,
        actor: Uuid,
    ) {
        let deciders = request_deciders(conversation);
        self.ctx
            .router
            .notify_users(
                conversation.id,
                &deciders,
                WebSocketEvent::JoinRequestReceived { user_id, message },
                Some(actor),
            )
            .await;
    }

    async fn announce_update(&self, conversation: &Conversation, actor: Uuid, fields: &[&str]) {
        self.ctx
            .router
            .publish(
                conversation,
                WebSocketEvent::ConversationUpdated {
                    updated_fields: fields.iter().map(|f| f.to_string()).collect(),
                },
                Some(actor),
            )
            .await;
    }
}
