//! In-memory [`ChatStore`] for tests and local experiments.
//!
//! Mirrors the SQLite store's semantics (active-room filtering, receipt upserts,
//! logical deletion) and can be told to fail reads or writes so callers can
//! exercise their degraded paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

use crate::entities::{
    CreateRoomRequest, CreateUserRequest, HistoryQuery, MemberRole, Message, MessageKind,
    NewMessage, PresenceUpdate, ReadReceipt, Room, RoomMember, User, DELETED_MESSAGE_CONTENT,
};
use crate::store::ChatStore;
use crate::types::{StoreError, StoreResult};

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    rooms: HashMap<String, Room>,
    members: HashMap<String, BTreeMap<String, RoomMember>>,
    messages: BTreeMap<i64, Message>,
    next_seq: i64,
}

impl State {
    fn active_room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id).filter(|room| room.is_active)
    }

    fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.values_mut().find(|message| message.id == message_id)
    }
}

/// A one-shot checkpoint that parks a store call until released.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    /// Resolves once a call has reached the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    membership_reads: AtomicUsize,
    presence_gate: RwLock<Option<(String, Arc<Gate>)>>,
    members_gate: RwLock<Option<Arc<Gate>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail with [`StoreError::Unavailable`] until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail with [`StoreError::Unavailable`] until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of membership reads (`room_members`, `rooms_for_user`) served so far.
    pub fn membership_reads(&self) -> usize {
        self.membership_reads.load(Ordering::SeqCst)
    }

    /// Park the next presence write for `user_id` until the gate is released.
    pub async fn gate_presence(&self, user_id: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.presence_gate.write().await = Some((user_id.to_string(), gate.clone()));
        gate
    }

    /// Park the next `room_members` read, after its snapshot is taken, until
    /// the gate is released.
    pub async fn gate_room_members(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.members_gate.write().await = Some(gate.clone());
        gate
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    pub async fn create_user(&self, request: &CreateUserRequest) -> StoreResult<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == request.username) {
            return Err(StoreError::Duplicate(format!("username {}", request.username)));
        }

        let user = User {
            id: cuid2::create_id(),
            username: request.username.clone(),
            email: request.email.clone(),
            avatar: request.avatar.clone(),
            is_online: false,
            last_seen: None,
            created_at: Utc::now(),
        };
        state.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub async fn create_room(&self, request: &CreateRoomRequest) -> StoreResult<Room> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&request.created_by) {
            return Err(StoreError::not_found(format!("user {}", request.created_by)));
        }

        let now = Utc::now();
        let room = Room {
            id: cuid2::create_id(),
            name: request.name.clone(),
            description: request.description.clone(),
            kind: request.kind,
            created_by: request.created_by.clone(),
            is_active: true,
            last_activity_at: None,
            created_at: now,
        };
        let creator = RoomMember {
            room_id: room.id.clone(),
            user_id: request.created_by.clone(),
            role: MemberRole::Admin,
            joined_at: now,
        };
        state.rooms.insert(room.id.clone(), room.clone());
        state
            .members
            .entry(room.id.clone())
            .or_default()
            .insert(creator.user_id.clone(), creator);
        Ok(room)
    }

    pub async fn add_member(
        &self,
        room_id: &str,
        user_id: &str,
        role: MemberRole,
    ) -> StoreResult<RoomMember> {
        let mut state = self.state.write().await;
        if !state.rooms.contains_key(room_id) {
            return Err(StoreError::not_found(format!("room {room_id}")));
        }
        if !state.users.contains_key(user_id) {
            return Err(StoreError::not_found(format!("user {user_id}")));
        }

        let members = state.members.entry(room_id.to_string()).or_default();
        if members.contains_key(user_id) {
            return Err(StoreError::Duplicate(format!("member {user_id} of {room_id}")));
        }

        let member = RoomMember {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            role,
            joined_at: Utc::now(),
        };
        members.insert(user_id.to_string(), member.clone());
        Ok(member)
    }

    pub async fn remove_member(&self, room_id: &str, user_id: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .members
            .get_mut(room_id)
            .and_then(|members| members.remove(user_id))
            .is_some())
    }

    pub async fn set_room_active(&self, room_id: &str, active: bool) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::not_found(format!("room {room_id}")))?;
        room.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        self.check_read()?;
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn find_room_by_membership(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> StoreResult<Option<Room>> {
        self.check_read()?;
        let state = self.state.read().await;
        let is_member = state
            .members
            .get(room_id)
            .is_some_and(|members| members.contains_key(user_id));
        Ok(state.active_room(room_id).filter(|_| is_member).cloned())
    }

    async fn rooms_for_user(&self, user_id: &str) -> StoreResult<Vec<Room>> {
        self.check_read()?;
        self.membership_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        let mut rooms: Vec<Room> = state
            .members
            .iter()
            .filter(|(_, members)| members.contains_key(user_id))
            .filter_map(|(room_id, _)| state.active_room(room_id).cloned())
            .collect();
        rooms.sort_by_key(|room| room.created_at);
        Ok(rooms)
    }

    async fn room_members(&self, room_id: &str) -> StoreResult<Vec<RoomMember>> {
        self.check_read()?;
        self.membership_reads.fetch_add(1, Ordering::SeqCst);
        let members = {
            let state = self.state.read().await;
            match state.active_room(room_id) {
                Some(_) => state
                    .members
                    .get(room_id)
                    .map(|members| members.values().cloned().collect())
                    .unwrap_or_default(),
                None => Vec::new(),
            }
        };

        let gate = self.members_gate.write().await.take();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        Ok(members)
    }

    async fn save_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.check_write()?;
        let mut state = self.state.write().await;
        let sender = state
            .users
            .get(&message.sender_id)
            .map(User::summary)
            .ok_or_else(|| StoreError::not_found(format!("user {}", message.sender_id)))?;

        let now = Utc::now();
        let room = state
            .rooms
            .get_mut(&message.room_id)
            .ok_or_else(|| StoreError::not_found(format!("room {}", message.room_id)))?;
        room.last_activity_at = Some(now);

        state.next_seq += 1;
        let saved = Message {
            id: cuid2::create_id(),
            seq: state.next_seq,
            room_id: message.room_id,
            sender,
            content: message.content,
            kind: message.kind,
            reply_to: message.reply_to,
            attachments: message.attachments,
            read_by: Vec::new(),
            deleted: false,
            created_at: now,
            updated_at: None,
        };
        state.messages.insert(saved.seq, saved.clone());
        Ok(saved)
    }

    async fn find_message(&self, message_id: &str) -> StoreResult<Option<Message>> {
        self.check_read()?;
        let state = self.state.read().await;
        Ok(state.messages.values().find(|m| m.id == message_id).cloned())
    }

    async fn list_messages(&self, room_id: &str, query: HistoryQuery) -> StoreResult<Vec<Message>> {
        self.check_read()?;
        let state = self.state.read().await;
        let upper = query.before_seq.unwrap_or(i64::MAX);
        let mut page: Vec<Message> = state
            .messages
            .range(..upper)
            .rev()
            .map(|(_, message)| message)
            .filter(|message| message.room_id == room_id)
            .take(query.limit as usize)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn update_user_presence(
        &self,
        user_id: &str,
        presence: PresenceUpdate,
    ) -> StoreResult<()> {
        self.check_write()?;
        let gate = {
            let mut slot = self.presence_gate.write().await;
            match slot.take() {
                Some((gated, gate)) if gated == user_id => Some(gate),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found(format!("user {user_id}")))?;
        user.is_online = presence.online;
        if !presence.online {
            user.last_seen = Some(presence.last_seen.unwrap_or_else(Utc::now));
        }
        Ok(())
    }

    async fn append_read_receipt(
        &self,
        message_id: &str,
        user_id: &str,
        read_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.check_write()?;
        let mut state = self.state.write().await;
        let message = state
            .message_mut(message_id)
            .ok_or_else(|| StoreError::not_found(format!("message {message_id}")))?;

        match message.read_by.iter_mut().find(|r| r.user_id == user_id) {
            Some(receipt) => receipt.read_at = read_at,
            None => message.read_by.push(ReadReceipt {
                user_id: user_id.to_string(),
                read_at,
            }),
        }
        Ok(())
    }

    async fn soft_delete_message(
        &self,
        message_id: &str,
        sender_id: &str,
    ) -> StoreResult<Option<Message>> {
        self.check_write()?;
        let mut state = self.state.write().await;
        let Some(message) = state
            .message_mut(message_id)
            .filter(|message| message.sender.id == sender_id)
        else {
            return Ok(None);
        };

        message.content = DELETED_MESSAGE_CONTENT.to_string();
        message.kind = MessageKind::System;
        message.attachments.clear();
        message.deleted = true;
        message.updated_at = Some(Utc::now());
        Ok(Some(message.clone()))
    }
}
