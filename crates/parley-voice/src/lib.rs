//! # parley-voice
//!
//! WebRTC signaling for Parley group calls.
//!
//! Architecture: SFU (Selective Forwarding Unit)
//! - Each call shares its id with the chat room that hosts it
//! - The media engine receives one stream per publisher and forwards copies
//!   to subscribers; no mixing on the server
//!
//! This crate owns only the signaling plane: the JSON-RPC method table
//! ([`signal`]), the per-connection peer state machine ([`peer`]) and the
//! narrow interfaces the engine must provide ([`transport`]). The media
//! plane itself (peer connections, ICE, SDP generation, packet routing)
//! lives behind those interfaces in whatever engine the server is wired
//! with.

pub mod peer;
pub mod signal;
pub mod transport;
pub mod types;

pub use peer::{PeerError, SignalingPeer};
pub use signal::JsonSignal;
pub use transport::SessionProvider;
