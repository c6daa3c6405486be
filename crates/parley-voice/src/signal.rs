//! JSON-RPC ↔ SFU peer translation.
//!
//! One [`JsonSignal`] is attached to each authenticated client session. The
//! hub forwards every non-chat method here; replies and server-originated
//! `offer`/`trickle` notifications go back through the client's bounded
//! outbound queue, which is never blocked on (frames are dropped when the
//! queue is full or closed).

use std::sync::Arc;

use parley_common::rpc::{RpcRequest, RpcResponse};
use parley_db::store::MemberStore;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::peer::SignalingPeer;
use crate::transport::{DATA_CHANNEL_LABEL, SessionProvider};
use crate::types::{Join, Negotiation, Trickle};

/// Signaling methods answered by this adapter; everything else on the wire
/// belongs to the chat plane.
pub const METHOD_JOIN: &str = "join";
pub const METHOD_OFFER: &str = "offer";
pub const METHOD_ANSWER: &str = "answer";
pub const METHOD_TRICKLE: &str = "trickle";
pub const METHOD_DMESSAGE: &str = "dmessage";
pub const METHOD_LEAVE: &str = "leave-vicall";

/// The signaling half of one client session.
pub struct JsonSignal {
    peer: Arc<SignalingPeer>,
    uid: Uuid,
    username: String,
    members: Arc<dyn MemberStore>,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl JsonSignal {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        uid: Uuid,
        username: impl Into<String>,
        members: Arc<dyn MemberStore>,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            peer: SignalingPeer::new(provider),
            uid,
            username: username.into(),
            members,
            outbound,
        }
    }

    /// Tear down the peer (idempotent). Called from the session's disconnect
    /// path before the outbound queue closes.
    pub async fn close(&self) {
        if let Err(e) = self.peer.close().await {
            tracing::warn!(user = %self.username, error = %e, "error closing signaling peer");
        }
    }

    /// Handle one incoming signaling frame.
    pub async fn handle(&self, req: &RpcRequest) {
        tracing::debug!(method = %req.method, id = ?req.id, "signaling request");

        match req.method.as_str() {
            METHOD_JOIN => self.handle_join(req).await,
            METHOD_OFFER => {
                let negotiation: Negotiation = match req.params_as() {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(error = %e, "error parsing offer");
                        self.reply_error(&req.id, e);
                        return;
                    }
                };
                match self.peer.answer(negotiation.desc).await {
                    Ok(answer) => self.reply(&req.id, &answer),
                    Err(e) => self.reply_error(&req.id, e),
                }
            }
            METHOD_ANSWER => {
                let negotiation: Negotiation = match req.params_as() {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::error!(error = %e, "error parsing answer");
                        self.reply_error(&req.id, e);
                        return;
                    }
                };
                if let Err(e) = self.peer.set_remote_description(negotiation.desc).await {
                    self.reply_error(&req.id, e);
                }
            }
            METHOD_TRICKLE => {
                let trickle: Trickle = match req.params_as() {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::error!(error = %e, "error parsing candidate");
                        self.reply_error(&req.id, e);
                        return;
                    }
                };
                if let Err(e) = self.peer.trickle(trickle.candidate, trickle.target).await {
                    self.reply_error(&req.id, e);
                }
            }
            METHOD_DMESSAGE => self.handle_dmessage(req).await,
            METHOD_LEAVE => {
                if self.peer.is_closed() {
                    return;
                }
                if let Some(session) = self.peer.session() {
                    tracing::info!(peer = %self.peer.id(), session = %session.id(), "leaving call");
                }
                if let Err(e) = self.peer.close().await {
                    self.reply_error(&req.id, e);
                }
            }
            other => {
                tracing::debug!(method = %other, "unhandled signaling method");
            }
        }
    }

    async fn handle_join(&self, req: &RpcRequest) {
        let join: Join = match req.params_as() {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "error parsing join");
                self.reply_error(&req.id, e);
                return;
            }
        };

        // A call is hosted by the chat room with the same id; only members
        // of that room may attach media.
        let sid = match Uuid::parse_str(&join.sid) {
            Ok(sid) => sid,
            Err(_) => {
                self.reply_error(&req.id, format!("invalid session id {:?}", join.sid));
                return;
            }
        };
        if join.uid != self.username {
            self.reply_error(&req.id, "client rejected, uid mismatch");
            return;
        }
        match self.members.member_exists(sid, self.uid).await {
            Ok(true) => {}
            Ok(false) => {
                self.reply_error(&req.id, "client rejected, not a member of this room");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "membership lookup failed");
                self.reply_error(&req.id, "membership lookup failed");
                return;
            }
        }

        let outbound = self.outbound.clone();
        self.peer.set_on_offer(Box::new(move |offer| {
            push_notification(&outbound, METHOD_OFFER, &offer);
        }));

        let outbound = self.outbound.clone();
        self.peer.set_on_ice_candidate(Box::new(move |candidate, target| {
            push_notification(&outbound, METHOD_TRICKLE, &Trickle { target, candidate });
        }));

        let username = self.username.clone();
        self.peer.set_on_ice_state(Box::new(move |state| {
            tracing::debug!(user = %username, state = ?state, "ice connection state changed");
        }));

        if let Err(e) = self.peer.join(&join.sid, &join.uid, join.config).await {
            self.reply_error(&req.id, format!("at join {e}"));
            return;
        }

        match self.peer.answer(join.offer).await {
            Ok(answer) => self.reply(&req.id, &answer),
            Err(e) => self.reply_error(&req.id, format!("at answer {e}")),
        }
    }

    /// Broadcast arbitrary params over the SFU data channel to every other
    /// peer in the call.
    async fn handle_dmessage(&self, req: &RpcRequest) {
        let Some(session) = self.peer.session() else {
            self.reply_error(&req.id, crate::peer::PeerError::NoTransportEstablished);
            return;
        };

        let payload = match &req.params {
            Some(raw) => raw.get().as_bytes().to_vec(),
            None => return,
        };

        let me = self.peer.id();
        for other in session.peers() {
            if other.id() == me {
                continue;
            }
            if let Err(e) = other.send_data(DATA_CHANNEL_LABEL, &payload).await {
                tracing::warn!(peer = %other.id(), error = %e, "dmessage relay failed");
            }
        }
    }

    fn reply<R: Serialize>(&self, id: &Option<String>, result: &R) {
        let Some(id) = id else {
            return;
        };
        match RpcResponse::reply(id.clone(), result).and_then(|r| r.encode()) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => tracing::error!(error = %e, "error encoding reply"),
        }
    }

    /// Request-carrying methods get a 400-class RPC error; notifications are
    /// logged only.
    fn reply_error(&self, id: &Option<String>, err: impl ToString) {
        let err = err.to_string();
        let Some(id) = id else {
            tracing::warn!(error = %err, "signaling error on notification");
            return;
        };
        tracing::debug!(error = %err, "replying with error");
        match RpcResponse::reply_error(id.clone(), 400, err).encode() {
            Ok(frame) => self.send_frame(frame),
            Err(e) => tracing::error!(error = %e, "error encoding error reply"),
        }
    }

    fn send_frame(&self, frame: Vec<u8>) {
        if self.outbound.try_send(frame).is_err() {
            tracing::warn!(user = %self.username, "signaling frame dropped, queue closed or full");
        }
    }
}

fn push_notification<P: Serialize>(outbound: &mpsc::Sender<Vec<u8>>, method: &str, params: &P) {
    let frame = RpcRequest::notify(method, params).and_then(|req| req.encode());
    match frame {
        Ok(bytes) => {
            if outbound.try_send(bytes).is_err() {
                tracing::warn!(method, "notification dropped, queue closed or full");
            }
        }
        Err(e) => tracing::error!(method, error = %e, "error encoding notification"),
    }
}
