//! The narrow interfaces the signaling plane requires of the media engine.
//!
//! The engine is an external collaborator: it owns peer connections, ICE and
//! SDP generation. The core only drives it through these traits, so any
//! engine (or a test double) can be wired in. Callback registration uses
//! boxed closures; implementations invoke them from their own tasks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{IceCandidate, IceState, SessionDescription};

/// Label of the data channel used for `dmessage` fan-out.
pub const DATA_CHANNEL_LABEL: &str = "sfu-api";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Engine(String),

    #[error("data channel {0:?} doesn't exist")]
    NoDataChannel(String),
}

pub type NegotiationNeededFn = Box<dyn Fn() + Send + Sync>;
pub type CandidateFn = Box<dyn Fn(IceCandidate) + Send + Sync>;
pub type IceStateFn = Box<dyn Fn(IceState) + Send + Sync>;

/// The sending half of a peer: answers the client's publish offers.
#[async_trait]
pub trait PublisherTransport: Send + Sync {
    /// Apply the remote offer and produce an answer. Only legal in stable
    /// signaling state.
    async fn answer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    /// Whether the underlying connection is in stable signaling state.
    fn stable(&self) -> bool;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    fn on_ice_candidate(&self, cb: CandidateFn);

    fn on_ice_state_change(&self, cb: IceStateFn);

    async fn close(&self) -> Result<(), TransportError>;
}

/// The receiving half of a peer: carries the tracks forwarded from other
/// publishers, renegotiated from the server side.
#[async_trait]
pub trait SubscriberTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError>;

    /// Kick off another negotiation round; the engine answers by invoking the
    /// negotiation-needed callback again.
    async fn negotiate(&self);

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    fn on_negotiation_needed(&self, cb: NegotiationNeededFn);

    fn on_ice_candidate(&self, cb: CandidateFn);

    /// Send on a server-side data channel.
    async fn send_data(&self, label: &str, data: &[u8]) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// A peer as seen by other members of an SFU session — just enough surface
/// for data-channel fan-out.
#[async_trait]
pub trait SessionPeer: Send + Sync {
    fn id(&self) -> String;

    async fn send_data(&self, label: &str, data: &[u8]) -> Result<(), TransportError>;
}

/// One SFU session (one call). Holds the set of joined peers.
pub trait SfuSession: Send + Sync {
    fn id(&self) -> String;

    fn peers(&self) -> Vec<Arc<dyn SessionPeer>>;

    fn add_peer(&self, peer: Arc<dyn SessionPeer>);

    fn remove_peer(&self, peer_id: &str);

    /// Wire the already-published tracks of the session into the peer's
    /// subscriber.
    fn subscribe(&self, peer_id: &str);
}

/// The engine's root handle: sessions plus transport construction.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Get or create the session `sid`.
    async fn get_session(&self, sid: &str) -> Arc<dyn SfuSession>;

    async fn new_publisher(
        &self,
        peer_id: &str,
        session: &Arc<dyn SfuSession>,
    ) -> Result<Arc<dyn PublisherTransport>, TransportError>;

    async fn new_subscriber(
        &self,
        peer_id: &str,
        session: &Arc<dyn SfuSession>,
    ) -> Result<Arc<dyn SubscriberTransport>, TransportError>;
}
