//! The chat-plane wire model.
//!
//! Every chat frame is a JSON-RPC request/notification whose `method` is the
//! message action and whose `params` is a [`ChatMessage`]. Server-originated
//! traffic reuses the same envelope as notifications.

use parley_common::rpc::RpcRequest;
use parley_db::store::{MessageRecord, MessageStatus, UserRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Chat actions. Client-originated ones double as JSON-RPC methods; the rest
/// only ever appear in server notifications.
pub mod action {
    pub const SEND_MESSAGE: &str = "send-message";
    pub const JOIN_ROOM: &str = "join-room";
    pub const LEAVE_ROOM: &str = "leave-room";
    pub const JOIN_ROOM_PRIVATE: &str = "join-room-private";
    pub const GET_MESSAGES: &str = "get-msg";
    pub const HAS_BEEN_READ: &str = "has-been-read";
    pub const ROOM_JOINED: &str = "room-joined";
    pub const USER_JOINED: &str = "user-join";
    pub const USER_LEFT: &str = "user-left";
    pub const INFO: &str = "info";
    pub const DELIVERED: &str = "delivered";
}

/// The room slice carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub private: bool,
}

/// A user-like value: the only capabilities anyone needs from a message
/// sender are its uid and username; display name and avatar ride along when
/// known.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub uid: Uuid,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub avatar: String,
}

impl Sender {
    pub fn from_user(user: &UserRecord) -> Self {
        Self {
            uid: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            avatar: user.avatar.clone(),
        }
    }
}

/// An in-flight chat event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<RoomInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    /// Client-supplied RFC 3339 timestamp; the batcher substitutes the
    /// current time when it doesn't parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl ChatMessage {
    /// Encode as a JSON-RPC notification keyed by this message's action.
    pub fn to_frame(&self) -> serde_json::Result<Vec<u8>> {
        RpcRequest::notify(&self.action, self)?.encode()
    }
}

/// Payload of `delivered` and `get-msg` notifications: a page or batch of
/// persisted records for one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBatch {
    pub target: RoomInfo,
    pub messages: Vec<MessageRecord>,
}

impl MessageBatch {
    pub fn to_frame(&self, method: &str) -> serde_json::Result<Vec<u8>> {
        RpcRequest::notify(method, self)?.encode()
    }
}

/// The canonical name of the private room between two users: usernames
/// sorted lexicographically, joined by `-`.
pub fn private_room_name(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}-{b}")
    } else {
        format!("{b}-{a}")
    }
}
