//! Ephemeral typing indicators with automatic expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::events::{ServerEvent, Typing};
use crate::identity::Identity;
use crate::router::{Recipients, RoomRouter};

struct TypingState {
    username: String,
    deadline: Instant,
}

/// At most one state per (room, user). Announcements go to the room's other
/// users and never block the caller.
pub struct TypingCoordinator {
    router: Arc<RoomRouter>,
    ttl: Duration,
    states: Mutex<HashMap<(String, String), TypingState>>,
}

impl TypingCoordinator {
    pub fn new(router: Arc<RoomRouter>, ttl: Duration) -> Self {
        Self {
            router,
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Start or refresh. Only a new state is announced; a refresh just moves
    /// the deadline. Returns whether `user_typing` was published.
    pub async fn start(&self, room_id: &str, identity: &Identity) -> bool {
        let deadline = Instant::now() + self.ttl;
        let is_new = {
            let mut states = self.states.lock().await;
            match states.get_mut(&(room_id.to_string(), identity.id.clone())) {
                Some(state) => {
                    state.deadline = deadline;
                    false
                }
                None => {
                    states.insert(
                        (room_id.to_string(), identity.id.clone()),
                        TypingState {
                            username: identity.username.clone(),
                            deadline,
                        },
                    );
                    true
                }
            }
        };

        if is_new {
            self.announce(room_id, &identity.id, &identity.username, true)
                .await;
        } else {
            debug!(room_id, user_id = %identity.id, "typing refreshed");
        }
        is_new
    }

    /// Returns whether a state existed (and `user_stop_typing` was published).
    pub async fn stop(&self, room_id: &str, user_id: &str) -> bool {
        let removed = self
            .states
            .lock()
            .await
            .remove(&(room_id.to_string(), user_id.to_string()));

        match removed {
            Some(state) => {
                self.announce(room_id, user_id, &state.username, false).await;
                true
            }
            None => false,
        }
    }

    /// Stop every indicator of a user, e.g. once they are fully offline.
    pub async fn clear_user(&self, user_id: &str) -> usize {
        let cleared = self
            .take_where(|(_, user), _| user == user_id)
            .await;
        let count = cleared.len();
        for ((room_id, user_id), state) in cleared {
            self.announce(&room_id, &user_id, &state.username, false).await;
        }
        count
    }

    /// Remove and announce every state whose deadline is at or before `now`.
    pub async fn sweep_expired(&self, now: Instant) -> usize {
        let expired = self.take_where(|_, state| state.deadline <= now).await;
        let count = expired.len();
        for ((room_id, user_id), state) in expired {
            debug!(room_id = %room_id, user_id = %user_id, "typing expired");
            self.announce(&room_id, &user_id, &state.username, false).await;
        }
        count
    }

    pub async fn is_typing(&self, room_id: &str, user_id: &str) -> bool {
        self.states
            .lock()
            .await
            .contains_key(&(room_id.to_string(), user_id.to_string()))
    }

    pub async fn active(&self) -> usize {
        self.states.lock().await.len()
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval` until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let typing = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                typing.sweep_expired(Instant::now()).await;
            }
        })
    }

    async fn take_where<F>(&self, mut predicate: F) -> Vec<((String, String), TypingState)>
    where
        F: FnMut(&(String, String), &TypingState) -> bool,
    {
        let mut states = self.states.lock().await;
        let keys: Vec<_> = states
            .iter()
            .filter(|(key, state)| predicate(*key, *state))
            .map(|(key, _)| key.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| states.remove_entry(&key))
            .collect()
    }

    async fn announce(&self, room_id: &str, user_id: &str, username: &str, typing: bool) {
        let payload = Typing {
            user_id: user_id.to_string(),
            username: username.to_string(),
            room_id: room_id.to_string(),
        };
        let event = if typing {
            ServerEvent::UserTyping(payload)
        } else {
            ServerEvent::UserStopTyping(payload)
        };
        self.router
            .publish(room_id, event, Recipients::ExceptUser(user_id))
            .await;
    }
}
