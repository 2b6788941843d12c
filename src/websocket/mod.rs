//! Live session registry and room fan-out.
//!
//! A [`PresenceService`] tracks which sessions each user holds and which
//! conversation rooms each session is subscribed to. [`ConnectionRegistry`]
//! is the single-process implementation; a shared backend can replace it
//! without touching the router.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::metrics;

pub mod events;
pub mod message_types;
pub mod presence_mirror;
pub mod router;

pub use events::{PresenceStatus, WebSocketEvent};
pub use presence_mirror::{NoopPresenceMirror, PresenceMirror, RedisPresenceMirror};
pub use router::Router;

/// Unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of registering a session.
#[derive(Debug, Clone, Copy)]
pub struct Registered {
    pub session_id: SessionId,
    /// True when this is the user's first live session.
    pub came_online: bool,
}

/// Result of dropping a session.
#[derive(Debug, Clone)]
pub struct Unregistered {
    pub user_id: Uuid,
    pub rooms: Vec<Uuid>,
    /// True when the user has no live session left.
    pub went_offline: bool,
}

/// Which users a fan-out may reach.
#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    /// Every session subscribed to the room.
    Room,
    /// Only sessions of these users.
    Users(&'a [Uuid]),
}

impl Audience<'_> {
    fn admits(&self, user_id: Uuid) -> bool {
        match self {
            Audience::Room => true,
            Audience::Users(users) => users.contains(&user_id),
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Frames queued to sessions.
    pub delivered: usize,
    /// Users that received the frame on at least one session.
    pub reached: HashSet<Uuid>,
}

#[async_trait]
pub trait PresenceService: Send + Sync {
    async fn register(&self, user_id: Uuid, sender: mpsc::Sender<String>) -> Registered;

    async fn unregister(&self, session_id: SessionId) -> Option<Unregistered>;

    async fn is_online(&self, user_id: Uuid) -> bool;

    async fn subscribe_session(&self, session_id: SessionId, room: Uuid);

    /// Make `rooms` the session's exact subscription set.
    async fn replace_session_rooms(&self, session_id: SessionId, rooms: &[Uuid]);

    /// Subscribe every live session of `user_id` to `room`.
    async fn subscribe_user(&self, user_id: Uuid, room: Uuid);

    async fn unsubscribe_user(&self, user_id: Uuid, room: Uuid);

    /// Sessions currently subscribed to `room`.
    async fn room_size(&self, room: Uuid) -> usize;

    /// Queue `frame` to the room's sessions admitted by `audience`, skipping
    /// `skip`. One dispatch per room at a time, so every session sees a
    /// room's frames in emission order.
    async fn broadcast(
        &self,
        room: Uuid,
        frame: &str,
        audience: Audience<'_>,
        skip: Option<SessionId>,
    ) -> Delivery;

    /// Queue `frame` to every live session of the given users.
    async fn send_to_users(&self, users: &[Uuid], frame: &str) -> Delivery;
}

struct SessionEntry {
    user_id: Uuid,
    sender: mpsc::Sender<String>,
    rooms: HashSet<Uuid>,
    /// The receiving end is gone; the entry waits for `unregister`.
    closed: bool,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionEntry>,
    users: HashMap<Uuid, HashSet<SessionId>>,
    rooms: HashMap<Uuid, HashSet<SessionId>>,
}

impl RegistryState {
    fn has_live_session(&self, user_id: Uuid) -> bool {
        self.users.get(&user_id).is_some_and(|sessions| {
            sessions
                .iter()
                .any(|id| self.sessions.get(id).is_some_and(|e| !e.closed))
        })
    }

    /// Stop routing to a session whose receiver is gone. The entry keeps its
    /// rooms so the owner's disconnect still runs the offline transition.
    fn mark_closed(&mut self, session_id: SessionId) {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return;
        };
        entry.closed = true;
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&session_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        tracing::debug!(session_id = %session_id, user_id = %entry.user_id, "session closed, awaiting disconnect");
    }

    fn remove_session(&mut self, session_id: SessionId) -> Option<Unregistered> {
        let entry = self.sessions.remove(&session_id)?;

        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&session_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }

        // Offline once no entry is left, closed ones included, so a user is
        // announced offline exactly once.
        let went_offline = match self.users.get_mut(&entry.user_id) {
            Some(sessions) => {
                sessions.remove(&session_id);
                if sessions.is_empty() {
                    self.users.remove(&entry.user_id);
                    true
                } else {
                    false
                }
            }
            None => true,
        };

        Some(Unregistered {
            user_id: entry.user_id,
            rooms: entry.rooms.into_iter().collect(),
            went_offline,
        })
    }

    /// Queue one frame; closed sessions are reported for cleanup.
    fn offer(&self, session_id: SessionId, frame: &str) -> Result<Uuid, Option<SessionId>> {
        let Some(entry) = self.sessions.get(&session_id).filter(|e| !e.closed) else {
            return Err(None);
        };
        match entry.sender.try_send(frame.to_string()) {
            Ok(()) => {
                metrics::FRAMES_DELIVERED.inc();
                Ok(entry.user_id)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::FRAMES_DROPPED.inc();
                tracing::warn!(session_id = %session_id, user_id = %entry.user_id, "session queue full, dropping frame");
                Err(None)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metrics::FRAMES_DROPPED.inc();
                Err(Some(session_id))
            }
        }
    }

    fn fan_out(&mut self, targets: Vec<SessionId>, frame: &str) -> Delivery {
        let mut delivery = Delivery::default();
        let mut dead = Vec::new();
        for session_id in targets {
            match self.offer(session_id, frame) {
                Ok(user_id) => {
                    delivery.delivered += 1;
                    delivery.reached.insert(user_id);
                }
                Err(Some(closed)) => dead.push(closed),
                Err(None) => {}
            }
        }
        for session_id in dead {
            self.mark_closed(session_id);
        }
        delivery
    }
}

/// In-process presence and room registry.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceService for ConnectionRegistry {
    async fn register(&self, user_id: Uuid, sender: mpsc::Sender<String>) -> Registered {
        let session_id = SessionId::new();
        let mut guard = self.inner.write().await;
        let came_online = !guard.has_live_session(user_id);
        guard.sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                sender,
                rooms: HashSet::new(),
                closed: false,
            },
        );
        let sessions = guard.users.entry(user_id).or_default();
        if sessions.is_empty() {
            metrics::ONLINE_USERS.inc();
        }
        sessions.insert(session_id);

        tracing::debug!(session_id = %session_id, user_id = %user_id, came_online, "session registered");
        Registered {
            session_id,
            came_online,
        }
    }

    async fn unregister(&self, session_id: SessionId) -> Option<Unregistered> {
        let gone = self.inner.write().await.remove_session(session_id)?;
        if gone.went_offline {
            metrics::ONLINE_USERS.dec();
        }
        tracing::debug!(session_id = %session_id, user_id = %gone.user_id, went_offline = gone.went_offline, "session unregistered");
        Some(gone)
    }

    async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.read().await.has_live_session(user_id)
    }

    async fn subscribe_session(&self, session_id: SessionId, room: Uuid) {
        let mut guard = self.inner.write().await;
        let Some(entry) = guard.sessions.get_mut(&session_id).filter(|e| !e.closed) else {
            return;
        };
        entry.rooms.insert(room);
        guard.rooms.entry(room).or_default().insert(session_id);
    }

    async fn replace_session_rooms(&self, session_id: SessionId, rooms: &[Uuid]) {
        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        let Some(entry) = state.sessions.get_mut(&session_id).filter(|e| !e.closed) else {
            return;
        };
        let wanted: HashSet<Uuid> = rooms.iter().copied().collect();
        for stale in entry.rooms.difference(&wanted) {
            if let Some(members) = state.rooms.get_mut(stale) {
                members.remove(&session_id);
                if members.is_empty() {
                    state.rooms.remove(stale);
                }
            }
        }
        for room in &wanted {
            state.rooms.entry(*room).or_default().insert(session_id);
        }
        entry.rooms = wanted;
    }

    async fn subscribe_user(&self, user_id: Uuid, room: Uuid) {
        let mut guard = self.inner.write().await;
        let sessions: Vec<SessionId> = guard
            .users
            .get(&user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for session_id in sessions {
            match guard.sessions.get_mut(&session_id) {
                Some(entry) if !entry.closed => {
                    entry.rooms.insert(room);
                }
                _ => continue,
            }
            guard.rooms.entry(room).or_default().insert(session_id);
        }
    }

    async fn unsubscribe_user(&self, user_id: Uuid, room: Uuid) {
        let mut guard = self.inner.write().await;
        let sessions: Vec<SessionId> = guard
            .users
            .get(&user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for session_id in sessions {
            if let Some(entry) = guard.sessions.get_mut(&session_id) {
                entry.rooms.remove(&room);
            }
            if let Some(members) = guard.rooms.get_mut(&room) {
                members.remove(&session_id);
                if members.is_empty() {
                    guard.rooms.remove(&room);
                }
            }
        }
    }

    async fn room_size(&self, room: Uuid) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&room)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    async fn broadcast(
        &self,
        room: Uuid,
        frame: &str,
        audience: Audience<'_>,
        skip: Option<SessionId>,
    ) -> Delivery {
        // Write lock: fan-outs are serialized.
        let mut guard = self.inner.write().await;
        let state = &mut *guard;
        let targets: Vec<SessionId> = match state.rooms.get(&room) {
            Some(members) => members
                .iter()
                .copied()
                .filter(|s| Some(*s) != skip)
                .filter(|s| {
                    state
                        .sessions
                        .get(s)
                        .is_some_and(|entry| audience.admits(entry.user_id))
                })
                .collect(),
            None => Vec::new(),
        };
        state.fan_out(targets, frame)
    }

    async fn send_to_users(&self, users: &[Uuid], frame: &str) -> Delivery {
        let mut guard = self.inner.write().await;
        let targets: Vec<SessionId> = users
            .iter()
            .filter_map(|u| guard.users.get(u))
            .flat_map(|sessions| sessions.iter().copied())
            .collect();
        guard.fan_out(targets, frame)
    }
}
