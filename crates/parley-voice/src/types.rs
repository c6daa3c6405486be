//! Signaling wire types — the payloads carried by the JSON-RPC methods
//! `join`, `offer`, `answer` and `trickle`.

use serde::{Deserialize, Serialize};

/// Trickle target: the publisher peer connection.
pub const TARGET_PUBLISHER: u8 = 0;
/// Trickle target: the subscriber peer connection.
pub const TARGET_SUBSCRIBER: u8 = 1;

/// An SDP session description as browsers serialize it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDescription {
    /// `offer`, `answer`, `pranswer` or `rollback`.
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".into(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".into(),
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate in `RTCIceCandidateInit` form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(rename = "usernameFragment", skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// ICE connection state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Per-join controls over what the peer may publish and receive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    /// If true the peer is not allowed to publish tracks to the session.
    #[serde(rename = "NoPublish", default)]
    pub no_publish: bool,
    /// If true the peer is not allowed to subscribe to other peers.
    #[serde(rename = "NoSubscribe", default)]
    pub no_subscribe: bool,
    /// If true tracks are not auto-subscribed; the client picks streams
    /// explicitly. Only meaningful with `no_subscribe = false`.
    #[serde(rename = "NoAutoSubscribe", default)]
    pub no_auto_subscribe: bool,
}

/// `join` — sent when initializing a peer connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Join {
    pub sid: String,
    pub uid: String,
    pub offer: SessionDescription,
    #[serde(default)]
    pub config: JoinConfig,
}

/// `offer` / `answer` — renegotiation of an established connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Negotiation {
    pub desc: SessionDescription,
}

/// `trickle` — an ICE candidate for one of the two peer connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trickle {
    pub target: u8,
    pub candidate: IceCandidate,
}
