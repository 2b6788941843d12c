//! Presence-aware fan-out of conversation events.
//!
//! Events go to the conversation's room; each live session of an addressed
//! participant gets one copy. Participants that were not reached on any
//! session are handed to the notification bridge instead. Delivery problems
//! are logged and never surface to the caller.

use super::events::{PresenceStatus, WebSocketEvent};
use super::presence_mirror::PresenceMirror;
use super::{Audience, Delivery, PresenceService, SessionId};
use crate::metrics;
use crate::models::Conversation;
use crate::services::notification_producer::{NotificationBridge, OfflineNotification};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

pub struct Router {
    presence: Arc<dyn PresenceService>,
    bridge: NotificationBridge,
    mirror: Arc<dyn PresenceMirror>,
    typing_debounce: Duration,
    /// Last emitted typing_start per (conversation, user).
    typing: Mutex<HashMap<(Uuid, Uuid), Instant>>,
}

impl Router {
    pub fn new(
        presence: Arc<dyn PresenceService>,
        bridge: NotificationBridge,
        mirror: Arc<dyn PresenceMirror>,
        typing_debounce: Duration,
    ) -> Self {
        Self {
            presence,
            bridge,
            mirror,
            typing_debounce,
            typing: Mutex::new(HashMap::new()),
        }
    }

    pub fn presence(&self) -> &Arc<dyn PresenceService> {
        &self.presence
    }

    /// Register a session and subscribe it to `rooms`.
    pub async fn connect(
        &self,
        user_id: Uuid,
        rooms: &[Uuid],
        sender: mpsc::Sender<String>,
    ) -> SessionId {
        let registered = self.presence.register(user_id, sender).await;
        for room in rooms {
            self.presence
                .subscribe_session(registered.session_id, *room)
                .await;
        }

        if registered.came_online {
            self.mirror.set_status(user_id, PresenceStatus::Online).await;
            let event = WebSocketEvent::UserStatusUpdate {
                user_id,
                status: PresenceStatus::Online,
            };
            for room in rooms {
                self.fan_out(*room, &event, Some(user_id), Audience::Room, Some(registered.session_id))
                    .await;
            }
        }

        tracing::info!(
            user_id = %user_id,
            session_id = %registered.session_id,
            rooms = rooms.len(),
            "session connected"
        );
        registered.session_id
    }

    /// Re-subscribe a registered session to the user's current rooms. Covers
    /// membership changes that landed between the room lookup and `connect`.
    pub async fn sync_rooms(&self, session_id: SessionId, rooms: &[Uuid]) {
        self.presence.replace_session_rooms(session_id, rooms).await;
    }

    pub async fn disconnect(&self, session_id: SessionId) {
        let Some(gone) = self.presence.unregister(session_id).await else {
            return;
        };

        if gone.went_offline {
            self.mirror
                .set_status(gone.user_id, PresenceStatus::Offline)
                .await;
            self.typing
                .lock()
                .await
                .retain(|(_, user), _| *user != gone.user_id);
            let event = WebSocketEvent::UserStatusUpdate {
                user_id: gone.user_id,
                status: PresenceStatus::Offline,
            };
            for room in &gone.rooms {
                self.fan_out(*room, &event, Some(gone.user_id), Audience::Room, None)
                    .await;
            }
        }

        tracing::info!(
            user_id = %gone.user_id,
            session_id = %session_id,
            went_offline = gone.went_offline,
            "session disconnected"
        );
    }

    pub async fn heartbeat(&self, user_id: Uuid) {
        self.mirror.refresh(user_id).await;
    }

    /// Subscribe the user's live sessions after a membership gain.
    pub async fn join_room(&self, conversation_id: Uuid, user_id: Uuid) {
        self.presence.subscribe_user(user_id, conversation_id).await;
    }

    /// Unsubscribe the user's live sessions after a membership loss.
    pub async fn leave_room(&self, conversation_id: Uuid, user_id: Uuid) {
        self.presence.unsubscribe_user(user_id, conversation_id).await;
        self.typing
            .lock()
            .await
            .remove(&(conversation_id, user_id));
    }

    /// Deliver to every active participant of the conversation.
    pub async fn publish(
        &self,
        conversation: &Conversation,
        event: WebSocketEvent,
        actor: Option<Uuid>,
    ) -> Delivery {
        let recipients = conversation.active_participant_ids();
        self.publish_to(conversation.id, &recipients, event, actor)
            .await
    }

    /// Deliver through the room to the listed participants.
    pub async fn publish_to(
        &self,
        conversation_id: Uuid,
        recipients: &[Uuid],
        event: WebSocketEvent,
        actor: Option<Uuid>,
    ) -> Delivery {
        let delivery = self
            .fan_out(conversation_id, &event, actor, Audience::Users(recipients), None)
            .await;
        self.hand_off(conversation_id, recipients, &delivery, &event, actor);
        delivery
    }

    /// Deliver straight to users' sessions, whether or not they are in the room.
    pub async fn notify_users(
        &self,
        conversation_id: Uuid,
        users: &[Uuid],
        event: WebSocketEvent,
        actor: Option<Uuid>,
    ) -> Delivery {
        let delivery = match event.to_frame(conversation_id, actor) {
            Ok(frame) => self.presence.send_to_users(users, &frame).await,
            Err(e) => {
                tracing::error!(error = %e, event_type = event.event_type(), "failed to encode event");
                Delivery::default()
            }
        };
        self.hand_off(conversation_id, users, &delivery, &event, actor);
        delivery
    }

    /// Relay a typing signal from `session_id`. Returns whether it was emitted.
    pub async fn typing(
        &self,
        conversation: &Conversation,
        user_id: Uuid,
        session_id: SessionId,
        started: bool,
    ) -> bool {
        if !conversation.is_active_participant(user_id) {
            return false;
        }

        let key = (conversation.id, user_id);
        let event = {
            let mut typing = self.typing.lock().await;
            if started {
                let now = Instant::now();
                match typing.get(&key) {
                    Some(last) if now.duration_since(*last) < self.typing_debounce => return false,
                    _ => {
                        typing.insert(key, now);
                    }
                }
                WebSocketEvent::TypingStart { user_id }
            } else {
                typing.remove(&key);
                WebSocketEvent::TypingStop { user_id }
            }
        };

        let recipients = conversation.active_participant_ids();
        self.fan_out(
            conversation.id,
            &event,
            Some(user_id),
            Audience::Users(&recipients),
            Some(session_id),
        )
        .await;
        true
    }

    async fn fan_out(
        &self,
        conversation_id: Uuid,
        event: &WebSocketEvent,
        actor: Option<Uuid>,
        audience: Audience<'_>,
        skip: Option<SessionId>,
    ) -> Delivery {
        match event.to_frame(conversation_id, actor) {
            Ok(frame) => {
                let delivery = self
                    .presence
                    .broadcast(conversation_id, &frame, audience, skip)
                    .await;
                tracing::debug!(
                    conversation_id = %conversation_id,
                    event_type = event.event_type(),
                    delivered = delivery.delivered,
                    "event fanned out"
                );
                delivery
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    conversation_id = %conversation_id,
                    event_type = event.event_type(),
                    "failed to encode event"
                );
                Delivery::default()
            }
        }
    }

    fn hand_off(
        &self,
        conversation_id: Uuid,
        recipients: &[Uuid],
        delivery: &Delivery,
        event: &WebSocketEvent,
        actor: Option<Uuid>,
    ) {
        if event.is_ephemeral() {
            return;
        }
        let preview = event.preview();
        for recipient in recipients {
            if Some(*recipient) == actor || delivery.reached.contains(recipient) {
                continue;
            }
            metrics::OFFLINE_HANDOFFS
                .with_label_values(&[event.event_type()])
                .inc();
            self.bridge.submit(OfflineNotification::new(
                *recipient,
                event.event_type(),
                conversation_id,
                event.message_id(),
                actor,
                preview.as_deref(),
            ));
        }
    }
}
