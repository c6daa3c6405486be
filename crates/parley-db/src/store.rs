//! Store contracts the real-time core consumes.
//!
//! The hub, rooms and client sessions never touch SQL directly; they talk to
//! these narrow traits. The PostgreSQL implementations live in
//! [`crate::repository`]; tests substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_common::error::ParleyResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Delivery state of a chat message.
///
/// Transitions are monotone: `acc` → `delv` → `read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Accepted for delivery, not yet durable.
    #[serde(rename = "acc")]
    Accepted,
    /// Written to the store and delivered.
    #[serde(rename = "delv")]
    Delivered,
    /// Read receipt recorded.
    #[serde(rename = "read")]
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "acc",
            Self::Delivered => "delv",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "acc" => Some(Self::Accepted),
            "delv" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// A room to be persisted. The id is chosen by the caller so the live actor
/// and the durable row always agree.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub id: Uuid,
    pub name: String,
    pub private: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RoomRecord {
    pub id: Uuid,
    pub name: String,
    pub private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chat message ready for durable storage.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub action: String,
    pub message: String,
    pub room_id: Uuid,
    pub sender: Uuid,
    pub status: MessageStatus,
    pub time: DateTime<Utc>,
}

/// A persisted chat message as clients see it in `delivered` and `get-msg`
/// notifications.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: Uuid,
    pub action: String,
    pub message: String,
    #[serde(rename = "room")]
    pub room_id: Uuid,
    pub sender: Uuid,
    #[sqlx(try_from = "String")]
    pub status: StatusText,
    pub time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wrapper keeping the wire representation (`acc`/`delv`/`read`) intact while
/// the column stays TEXT.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusText(pub MessageStatus);

impl TryFrom<String> for StatusText {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MessageStatus::parse(&value)
            .map(StatusText)
            .ok_or_else(|| format!("unknown message status {value:?}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub avatar: String,
}

/// State of a contact edge between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Accepted,
    Blocked,
}

impl ContactStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

/// A resolved contact: the target user plus the state of the edge from the
/// requesting owner.
#[derive(Debug, Clone)]
pub struct UserConnection {
    pub user: UserRecord,
    pub status: ContactStatus,
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persist a room. The store's unique-name index rejects duplicates.
    async fn add_room(&self, room: &NewRoom) -> ParleyResult<RoomRecord>;
    async fn find_room_by_name(&self, name: &str) -> ParleyResult<Option<RoomRecord>>;
}

#[async_trait]
pub trait MemberStore: Send + Sync {
    /// Record a membership. Idempotent: recording an existing membership is a
    /// no-op.
    async fn add_member(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<()>;
    async fn remove_member(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<()>;
    async fn member_exists(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<bool>;
    /// Rooms the user is a member of, 1-based pages. Page 0 and limit 0 are
    /// normalized to 1 and 10.
    async fn rooms_by_member(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> ParleyResult<Vec<RoomRecord>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Bulk-insert a batch. Returns the persisted records in input order.
    async fn add_messages(&self, messages: Vec<NewMessage>) -> ParleyResult<Vec<MessageRecord>>;
    /// Bulk status update; ids already at the target status are untouched.
    async fn update_status(&self, ids: &[Uuid], status: MessageStatus) -> ParleyResult<()>;
    /// Page through a room's history, newest first.
    async fn messages_by_room(
        &self,
        room_id: Uuid,
        page: u32,
        limit: u32,
    ) -> ParleyResult<Vec<MessageRecord>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> ParleyResult<Option<UserRecord>>;
}

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Resolve `to_username` together with the contact status from `owner`'s
    /// point of view. `None` when no such user or no contact edge exists.
    async fn find_user_connection(
        &self,
        owner: Uuid,
        to_username: &str,
    ) -> ParleyResult<Option<UserConnection>>;
}

/// The bundle of store handles the core is wired with.
#[derive(Clone)]
pub struct Stores {
    pub rooms: Arc<dyn RoomStore>,
    pub members: Arc<dyn MemberStore>,
    pub messages: Arc<dyn MessageStore>,
    pub users: Arc<dyn UserStore>,
    pub contacts: Arc<dyn ContactStore>,
}

/// Normalize 1-based paging the way the repositories expect it.
pub(crate) fn page_bounds(page: u32, limit: u32) -> (i64, i64) {
    let page = if page == 0 { 1 } else { page };
    let limit = if limit == 0 { 10 } else { limit };
    (i64::from(limit), i64::from(page - 1) * i64::from(limit))
}
