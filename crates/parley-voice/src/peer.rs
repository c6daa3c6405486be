//! Per-connection signaling peer: a publisher/subscriber transport pair plus
//! the negotiation state machine that keeps SDP exchanges serialized.
//!
//! The WebRTC state machine forbids overlapping offers. While a server
//! offer is awaiting its remote answer, further negotiation requests are
//! coalesced into a single pending bit and replayed once the answer lands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::transport::{
    PublisherTransport, SessionPeer, SessionProvider, SfuSession, SubscriberTransport,
    TransportError,
};
use crate::types::{
    IceCandidate, IceState, JoinConfig, SessionDescription, TARGET_PUBLISHER, TARGET_SUBSCRIBER,
};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// `join` called after a peer connection is already established.
    #[error("rtc transport already exists for this connection")]
    TransportExists,

    /// Cannot signal before `join`.
    #[error("no rtc transport exists for this peer")]
    NoTransportEstablished,

    /// Offer received while the publisher is not in stable state.
    #[error("offer ignored")]
    OfferIgnored,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type OfferFn = Box<dyn Fn(SessionDescription) + Send + Sync>;
pub type PeerCandidateFn = Box<dyn Fn(IceCandidate, u8) + Send + Sync>;
pub type PeerIceStateFn = Box<dyn Fn(IceState) + Send + Sync>;

#[derive(Default)]
struct NegotiationBits {
    remote_answer_pending: bool,
    negotiation_pending: bool,
}

/// A pair peer connection bound to one client session.
pub struct SignalingPeer {
    provider: Arc<dyn SessionProvider>,
    id: StdRwLock<String>,
    session: StdRwLock<Option<Arc<dyn SfuSession>>>,
    publisher: StdRwLock<Option<Arc<dyn PublisherTransport>>>,
    subscriber: StdRwLock<Option<Arc<dyn SubscriberTransport>>>,
    closed: AtomicBool,
    negotiation: Mutex<NegotiationBits>,
    on_offer: StdMutex<Option<OfferFn>>,
    on_ice_candidate: StdMutex<Option<PeerCandidateFn>>,
    on_ice_state: StdMutex<Option<PeerIceStateFn>>,
}

impl SignalingPeer {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            id: StdRwLock::new(String::new()),
            session: StdRwLock::new(None),
            publisher: StdRwLock::new(None),
            subscriber: StdRwLock::new(None),
            closed: AtomicBool::new(false),
            negotiation: Mutex::new(NegotiationBits::default()),
            on_offer: StdMutex::new(None),
            on_ice_candidate: StdMutex::new(None),
            on_ice_state: StdMutex::new(None),
        })
    }

    pub fn id(&self) -> String {
        self.id.read().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn session(&self) -> Option<Arc<dyn SfuSession>> {
        self.session.read().unwrap().clone()
    }

    fn publisher(&self) -> Option<Arc<dyn PublisherTransport>> {
        self.publisher.read().unwrap().clone()
    }

    fn subscriber(&self) -> Option<Arc<dyn SubscriberTransport>> {
        self.subscriber.read().unwrap().clone()
    }

    pub fn set_on_offer(&self, cb: OfferFn) {
        *self.on_offer.lock().unwrap() = Some(cb);
    }

    pub fn set_on_ice_candidate(&self, cb: PeerCandidateFn) {
        *self.on_ice_candidate.lock().unwrap() = Some(cb);
    }

    pub fn set_on_ice_state(&self, cb: PeerIceStateFn) {
        *self.on_ice_state.lock().unwrap() = Some(cb);
    }

    /// Initialize this peer for the session `sid`.
    pub async fn join(
        self: &Arc<Self>,
        sid: &str,
        uid: &str,
        config: JoinConfig,
    ) -> Result<(), PeerError> {
        if let Some(session) = self.session() {
            let duplicate = session
                .peers()
                .iter()
                .any(|p| p.id() == uid || uid.is_empty());
            if duplicate {
                tracing::debug!(peer = %uid, "peer already exists in session");
                return Err(PeerError::TransportExists);
            }
        }

        self.closed.store(false, Ordering::SeqCst);

        let uid = if uid.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            uid.to_owned()
        };
        *self.id.write().unwrap() = uid.clone();

        let session = self.provider.get_session(sid).await;
        *self.session.write().unwrap() = Some(session.clone());

        if !config.no_subscribe {
            let subscriber = self.provider.new_subscriber(&uid, &session).await?;

            let weak = Arc::downgrade(self);
            subscriber.on_negotiation_needed(Box::new(move || {
                if let Some(peer) = weak.upgrade() {
                    tokio::spawn(async move {
                        peer.negotiation_needed().await;
                    });
                }
            }));

            let weak = Arc::downgrade(self);
            subscriber.on_ice_candidate(Box::new(move |candidate| {
                if let Some(peer) = weak.upgrade() {
                    peer.emit_ice_candidate(candidate, TARGET_SUBSCRIBER);
                }
            }));

            *self.subscriber.write().unwrap() = Some(subscriber);
        }

        if !config.no_publish {
            let publisher = self.provider.new_publisher(&uid, &session).await?;

            let weak = Arc::downgrade(self);
            publisher.on_ice_candidate(Box::new(move |candidate| {
                if let Some(peer) = weak.upgrade() {
                    peer.emit_ice_candidate(candidate, TARGET_PUBLISHER);
                }
            }));

            let weak = Arc::downgrade(self);
            publisher.on_ice_state_change(Box::new(move |state| {
                if let Some(peer) = weak.upgrade() {
                    peer.emit_ice_state(state);
                }
            }));

            *self.publisher.write().unwrap() = Some(publisher);
        }

        session.add_peer(self.clone());
        tracing::debug!(peer = %uid, session = %sid, "peer joined sfu session");

        if !config.no_subscribe {
            session.subscribe(&uid);
        }
        Ok(())
    }

    /// Answer an offer from the remote publisher side.
    pub async fn answer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, PeerError> {
        let Some(publisher) = self.publisher() else {
            return Err(PeerError::NoTransportEstablished);
        };
        tracing::debug!(peer = %self.id(), "got offer");
        if !publisher.stable() {
            return Err(PeerError::OfferIgnored);
        }
        Ok(publisher.answer(offer).await?)
    }

    /// Apply the remote answer to our subscriber offer. Replays one queued
    /// negotiation if the answer unblocked it.
    pub async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), PeerError> {
        let Some(subscriber) = self.subscriber() else {
            return Err(PeerError::NoTransportEstablished);
        };

        let mut bits = self.negotiation.lock().await;
        tracing::debug!(peer = %self.id(), "got answer");
        subscriber.set_remote_description(desc).await?;
        bits.remote_answer_pending = false;

        if bits.negotiation_pending {
            bits.negotiation_pending = false;
            subscriber.negotiate().await;
        }
        Ok(())
    }

    /// Route an ICE candidate to the targeted transport.
    pub async fn trickle(&self, candidate: IceCandidate, target: u8) -> Result<(), PeerError> {
        let (Some(publisher), Some(subscriber)) = (self.publisher(), self.subscriber()) else {
            return Err(PeerError::NoTransportEstablished);
        };
        tracing::debug!(peer = %self.id(), target, "trickle");
        match target {
            TARGET_PUBLISHER => publisher.add_ice_candidate(candidate).await?,
            TARGET_SUBSCRIBER => subscriber.add_ice_candidate(candidate).await?,
            _ => {}
        }
        Ok(())
    }

    /// Send over a server-side data channel to this peer.
    pub async fn send_dc_message(&self, label: &str, msg: &[u8]) -> Result<(), PeerError> {
        let Some(subscriber) = self.subscriber() else {
            return Err(PeerError::NoTransportEstablished);
        };
        Ok(subscriber.send_data(label, msg).await?)
    }

    /// Shut the peer down. Idempotent; once closed, no callback fires again.
    pub async fn close(&self) -> Result<(), PeerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(session) = self.session() {
            session.remove_peer(&self.id());
        }
        if let Some(publisher) = self.publisher() {
            let _ = publisher.close().await;
        }
        if let Some(subscriber) = self.subscriber() {
            subscriber.close().await?;
        }
        Ok(())
    }

    async fn negotiation_needed(&self) {
        let offer = {
            let mut bits = self.negotiation.lock().await;
            if bits.remote_answer_pending {
                bits.negotiation_pending = true;
                return;
            }

            let Some(subscriber) = self.subscriber() else {
                return;
            };
            tracing::debug!(peer = %self.id(), "negotiation needed");
            let offer = match subscriber.create_offer().await {
                Ok(offer) => offer,
                Err(e) => {
                    tracing::error!(peer = %self.id(), error = %e, "create offer failed");
                    return;
                }
            };
            bits.remote_answer_pending = true;
            offer
        };

        if !self.is_closed() {
            if let Some(cb) = &*self.on_offer.lock().unwrap() {
                cb(offer);
            }
        }
    }

    fn emit_ice_candidate(&self, candidate: IceCandidate, target: u8) {
        if self.is_closed() {
            return;
        }
        if let Some(cb) = &*self.on_ice_candidate.lock().unwrap() {
            cb(candidate, target);
        }
    }

    fn emit_ice_state(&self, state: IceState) {
        if self.is_closed() {
            return;
        }
        if let Some(cb) = &*self.on_ice_state.lock().unwrap() {
            cb(state);
        }
    }
}

#[async_trait]
impl SessionPeer for SignalingPeer {
    fn id(&self) -> String {
        self.id.read().unwrap().clone()
    }

    async fn send_data(&self, label: &str, data: &[u8]) -> Result<(), TransportError> {
        match self.subscriber() {
            Some(subscriber) => subscriber.send_data(label, data).await,
            None => Err(TransportError::NoDataChannel(label.to_owned())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockProvider;
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn join_wires_session_and_answers() {
        let provider = MockProvider::new("s1");
        let peer = SignalingPeer::new(provider.clone());

        peer.join("s1", "alice", JoinConfig::default()).await.unwrap();
        assert_eq!(provider.session.peers().len(), 1);
        assert_eq!(
            *provider.session.subscribed.lock().unwrap(),
            vec!["alice".to_owned()]
        );

        let answer = peer
            .answer(SessionDescription::offer("pub-offer"))
            .await
            .unwrap();
        assert_eq!(answer.sdp, "answer-to:pub-offer");
    }

    #[tokio::test]
    async fn signaling_before_join_is_rejected() {
        let provider = MockProvider::new("s1");
        let peer = SignalingPeer::new(provider);

        assert!(matches!(
            peer.answer(SessionDescription::offer("x")).await,
            Err(PeerError::NoTransportEstablished)
        ));
        assert!(matches!(
            peer.trickle(IceCandidate::default(), TARGET_PUBLISHER).await,
            Err(PeerError::NoTransportEstablished)
        ));
    }

    #[tokio::test]
    async fn rejoining_with_same_uid_is_rejected() {
        let provider = MockProvider::new("s1");
        let peer = SignalingPeer::new(provider);

        peer.join("s1", "alice", JoinConfig::default()).await.unwrap();
        assert!(matches!(
            peer.join("s1", "alice", JoinConfig::default()).await,
            Err(PeerError::TransportExists)
        ));
    }

    #[tokio::test]
    async fn unstable_publisher_ignores_offer() {
        let provider = MockProvider::new("s1");
        let peer = SignalingPeer::new(provider.clone());
        peer.join("s1", "alice", JoinConfig::default()).await.unwrap();

        provider.publisher.stable.store(false, Ordering::SeqCst);
        assert!(matches!(
            peer.answer(SessionDescription::offer("x")).await,
            Err(PeerError::OfferIgnored)
        ));
    }

    #[tokio::test]
    async fn overlapping_negotiations_coalesce() {
        let provider = MockProvider::new("s1");
        let peer = SignalingPeer::new(provider.clone());
        peer.join("s1", "alice", JoinConfig::default()).await.unwrap();

        let offers_seen = Arc::new(AtomicUsize::new(0));
        let seen = offers_seen.clone();
        peer.set_on_offer(Box::new(move |_offer| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        // First request creates and emits an offer, leaving the remote
        // answer pending.
        peer.negotiation_needed().await;
        assert_eq!(offers_seen.load(Ordering::SeqCst), 1);

        // Requests in the pending window are queued, not emitted.
        peer.negotiation_needed().await;
        peer.negotiation_needed().await;
        assert_eq!(offers_seen.load(Ordering::SeqCst), 1);
        assert_eq!(provider.subscriber.offers_created.load(Ordering::SeqCst), 1);

        // The remote answer releases exactly one queued negotiation.
        peer.set_remote_description(SessionDescription::answer("a"))
            .await
            .unwrap();
        assert_eq!(provider.subscriber.negotiate_calls.load(Ordering::SeqCst), 1);

        // No queued bit left: another answer triggers nothing.
        peer.set_remote_description(SessionDescription::answer("b"))
            .await
            .unwrap();
        assert_eq!(provider.subscriber.negotiate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trickle_routes_to_the_right_transport() {
        let provider = MockProvider::new("s1");
        let peer = SignalingPeer::new(provider.clone());
        peer.join("s1", "alice", JoinConfig::default()).await.unwrap();

        peer.trickle(
            IceCandidate {
                candidate: "pub-cand".into(),
                ..Default::default()
            },
            TARGET_PUBLISHER,
        )
        .await
        .unwrap();
        peer.trickle(
            IceCandidate {
                candidate: "sub-cand".into(),
                ..Default::default()
            },
            TARGET_SUBSCRIBER,
        )
        .await
        .unwrap();

        assert_eq!(
            provider.publisher.candidates.lock().unwrap()[0].candidate,
            "pub-cand"
        );
        assert_eq!(
            provider.subscriber.candidates.lock().unwrap()[0].candidate,
            "sub-cand"
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_and_silences_callbacks() {
        let provider = MockProvider::new("s1");
        let peer = SignalingPeer::new(provider.clone());
        peer.join("s1", "alice", JoinConfig::default()).await.unwrap();

        let candidates_seen = Arc::new(AtomicUsize::new(0));
        let seen = candidates_seen.clone();
        peer.set_on_ice_candidate(Box::new(move |_c, _t| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        peer.close().await.unwrap();
        peer.close().await.unwrap();

        assert!(provider.session.peers().is_empty());
        assert!(provider.publisher.closed.load(Ordering::SeqCst));
        assert!(provider.subscriber.closed.load(Ordering::SeqCst));

        peer.emit_ice_candidate(IceCandidate::default(), TARGET_PUBLISHER);
        assert_eq!(candidates_seen.load(Ordering::SeqCst), 0);
    }
}
