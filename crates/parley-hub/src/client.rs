//! One WebSocket client session: a reader task, a writer task, and the
//! dispatch between the chat plane and the signaling plane.
//!
//! The reader enforces the pong deadline and routes decoded frames; the
//! writer owns the socket's sending half, coalesces queued frames into
//! newline-separated batches and keeps the connection alive with pings.
//! Everything that wants to talk to the client goes through the bounded
//! outbound queue; a slow client loses frames, it never stalls a room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_common::auth::Claims;
use parley_common::rpc::{RpcRequest, RpcResponse, split_frames};
use parley_db::store::{ContactStatus, MessageStatus};
use parley_voice::JsonSignal;
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::time::{Instant, timeout, timeout_at};
use uuid::Uuid;

use crate::hub::Hub;
use crate::message::{
    ChatMessage, MessageBatch, Sender, action, private_room_name,
};
use crate::room::{Broadcast, Room};

/// Max wait time when writing a frame to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Max time till the next pong from the peer.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Ping interval; must be less than the pong wait.
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Maximum frame size accepted from a peer, enforced at the upgrade.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Capacity of the per-client outbound queue.
pub const SEND_QUEUE_SIZE: usize = 256;

/// A live client session.
pub struct Client {
    me: Weak<Client>,
    /// Session id; one user may hold several sessions.
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub name: String,
    pub avatar: String,
    hub: Arc<Hub>,
    send_tx: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
    shutdown: Notify,
    rooms: RwLock<HashMap<Uuid, Arc<Room>>>,
    signal: Option<JsonSignal>,
}

/// Run a freshly upgraded socket as a client session: spawn the writer and
/// reader, then register with the hub.
pub async fn serve(socket: WebSocket, hub: Arc<Hub>, claims: Claims) {
    let user_id = Uuid::parse_str(claims.uid()).unwrap_or_else(|_| {
        tracing::warn!(user = %claims.username(), "token carried a malformed uid");
        Uuid::nil()
    });

    let profile = match hub.stores.users.find_user_by_username(claims.username()).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::error!(user = %claims.username(), error = %e, "profile lookup failed");
            None
        }
    };

    let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_SIZE);

    let signal = hub.sfu().map(|provider| {
        JsonSignal::new(
            provider,
            user_id,
            claims.username(),
            hub.stores.members.clone(),
            send_tx.clone(),
        )
    });

    let client = Arc::new_cyclic(|me| Client {
        me: me.clone(),
        id: Uuid::new_v4(),
        user_id,
        username: claims.username().to_owned(),
        name: profile.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
        avatar: profile.as_ref().map(|p| p.avatar.clone()).unwrap_or_default(),
        hub: hub.clone(),
        send_tx,
        closed: AtomicBool::new(false),
        shutdown: Notify::new(),
        rooms: RwLock::new(HashMap::new()),
        signal,
    });

    let (ws_tx, ws_rx) = socket.split();
    tokio::spawn(client.clone().write_loop(ws_tx, send_rx));
    tokio::spawn(client.clone().read_loop(ws_rx));

    hub.register(client).await;
}

impl Client {
    fn arc(&self) -> Arc<Client> {
        self.me.upgrade().expect("client is alive while handling")
    }

    /// The user-like value stamped onto outgoing messages.
    pub fn sender(&self) -> Sender {
        Sender {
            uid: self.user_id,
            username: self.username.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }

    /// Non-blocking enqueue onto the outbound queue. Frames for a full or
    /// closed queue are dropped; the session is not torn down.
    pub fn send(&self, frame: Vec<u8>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.send_tx.try_send(frame) {
            if matches!(e, mpsc::error::TrySendError::Full(_)) {
                tracing::warn!(user = %self.username, "outbound queue full, dropping frame");
            }
        }
    }

    async fn is_in_room(&self, room_id: Uuid) -> bool {
        self.rooms.read().await.contains_key(&room_id)
    }

    /// Tear the session down. Runs at most once no matter how many paths race
    /// into it.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(user = %self.username, session = %self.id, "disconnecting");

        if let Some(signal) = &self.signal {
            signal.close().await;
        }
        self.hub.unregister(self.arc()).await;
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        for room in rooms {
            room.unregister(self.arc()).await;
        }
        self.shutdown.notify_one();
    }

    async fn read_loop(self: Arc<Self>, mut receiver: SplitStream<WebSocket>) {
        let mut deadline = Instant::now() + PONG_WAIT;

        loop {
            let msg = match timeout_at(deadline, receiver.next()).await {
                Err(_) => {
                    tracing::debug!(user = %self.username, "pong deadline expired");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    tracing::debug!(user = %self.username, error = %e, "websocket read error");
                    break;
                }
                Ok(Some(Ok(msg))) => msg,
            };

            match msg {
                Message::Text(text) => {
                    for frame in split_frames(&text) {
                        self.handle_frame(frame).await;
                    }
                }
                // peer heartbeats keep the connection alive
                Message::Pong(_) => {
                    deadline = Instant::now() + PONG_WAIT;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.disconnect().await;
    }

    async fn write_loop(
        self: Arc<Self>,
        mut sender: SplitSink<WebSocket, Message>,
        mut rx: mpsc::Receiver<Vec<u8>>,
    ) {
        let mut ping = tokio::time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    let Some(mut payload) = maybe else {
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    };
                    // attach whatever queued up behind this frame to the same
                    // websocket message
                    while let Ok(next) = rx.try_recv() {
                        payload.push(b'\n');
                        payload.extend_from_slice(&next);
                    }
                    let text = match String::from_utf8(payload) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(user = %self.username, error = %e, "non-utf8 outbound frame");
                            continue;
                        }
                    };
                    match timeout(WRITE_WAIT, sender.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = ping.tick() => {
                    match timeout(WRITE_WAIT, sender.send(Message::Ping(Bytes::new()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = self.shutdown.notified() => {
                    let _ = timeout(WRITE_WAIT, sender.send(Message::Close(None))).await;
                    break;
                }
            }
        }

        let _ = sender.close().await;
    }

    async fn handle_frame(&self, raw: &str) {
        let req: RpcRequest = match serde_json::from_str(raw) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(user = %self.username, error = %e, "error decoding frame");
                return;
            }
        };

        let mut msg: ChatMessage = match req.params_as() {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(user = %self.username, method = %req.method, error = %e, "bad params");
                self.reply_error(&req.id, format!("invalid params: {e}"));
                return;
            }
        };
        msg.action = req.method.clone();
        msg.sender = Some(self.sender());

        match req.method.as_str() {
            action::SEND_MESSAGE => self.handle_send_message(msg).await,
            action::JOIN_ROOM => {
                // the body is the room name
                let _ = self.join_room(&msg.message, None).await;
            }
            action::LEAVE_ROOM => self.handle_leave_room(msg).await,
            action::JOIN_ROOM_PRIVATE => self.handle_join_room_private(msg).await,
            action::GET_MESSAGES => self.handle_get_messages(&req, msg).await,
            action::HAS_BEEN_READ => self.handle_has_been_read(msg).await,
            _ => match &self.signal {
                Some(signal) => signal.handle(&req).await,
                None => self.reply_error(&req.id, "no rtc transport exists for this peer"),
            },
        }
    }

    async fn handle_send_message(&self, mut msg: ChatMessage) {
        let Some(target) = msg.target.clone() else {
            tracing::debug!(user = %self.username, "send-message without a target room");
            return;
        };
        let Some(room) = self.hub.find_room_by_id(target.id).await else {
            tracing::debug!(user = %self.username, room = %target.id, "target room not live");
            return;
        };

        tracing::debug!(user = %self.username, room = %room.name, "new message");
        msg.status = Some(MessageStatus::Accepted);
        msg.target = Some(room.info());
        room.broadcast(Broadcast::Chat(msg.clone()));
        room.queue_write(msg);
    }

    async fn handle_leave_room(&self, msg: ChatMessage) {
        // the body is the room id
        let Ok(room_id) = Uuid::parse_str(&msg.message) else {
            tracing::debug!(user = %self.username, body = %msg.message, "leave-room with a bad id");
            return;
        };
        let Some(room) = self.hub.find_room_by_id(room_id).await else {
            return;
        };

        if self.rooms.write().await.remove(&room.id).is_some() {
            tracing::debug!(user = %self.username, room = %room.name, "leaving room");
        }
        room.unregister(self.arc()).await;
    }

    async fn handle_join_room_private(&self, msg: ChatMessage) {
        // the body is the target username; the contact edge must be accepted
        let connection = match self
            .hub
            .stores
            .contacts
            .find_user_connection(self.user_id, &msg.message)
            .await
        {
            Ok(Some(connection)) => connection,
            Ok(None) => {
                tracing::debug!(user = %self.username, to = %msg.message, "target unavailable");
                return;
            }
            Err(e) => {
                tracing::error!(user = %self.username, error = %e, "contact lookup failed");
                return;
            }
        };
        if connection.status != ContactStatus::Accepted {
            tracing::debug!(user = %self.username, to = %msg.message, "contact not accepted");
            return;
        }

        let target = connection.user;
        let room_name = private_room_name(&self.username, &target.username);
        let Some(room) = self
            .join_room(&room_name, Some(Sender::from_user(&target)))
            .await
        else {
            return;
        };

        // every live session of the target user joins too
        for session in self.hub.find_clients_by_user(target.id).await {
            let _ = session.join_room(&room_name, Some(self.sender())).await;
        }

        // record both memberships even when the target is offline, so the
        // room greets them on their next connect
        for user in [self.user_id, target.id] {
            if let Err(e) = self.hub.stores.members.add_member(room.id, user).await {
                tracing::error!(room = %room.name, error = %e, "error recording membership");
            }
        }
    }

    async fn handle_get_messages(&self, req: &RpcRequest, msg: ChatMessage) {
        let Some(target) = msg.target else {
            self.reply_error(&req.id, "missing target room");
            return;
        };
        // materialize the room if it is not live, so history survives
        // process restarts
        let Some(room) = self.hub.find_room_by_name(&target.name).await else {
            self.reply_error(&req.id, "room unavailable");
            return;
        };

        let (page, limit) = parse_page_spec(&msg.message);
        match self
            .hub
            .stores
            .messages
            .messages_by_room(room.id, page, limit)
            .await
        {
            Ok(records) => {
                let batch = MessageBatch {
                    target: room.info(),
                    messages: records,
                };
                match batch.to_frame(action::GET_MESSAGES) {
                    Ok(frame) => self.send(frame),
                    Err(e) => tracing::error!(error = %e, "error encoding message page"),
                }
            }
            Err(e) => {
                tracing::error!(room = %room.name, error = %e, "message lookup failed");
                self.reply_error(&req.id, "message lookup failed");
            }
        }
    }

    async fn handle_has_been_read(&self, mut msg: ChatMessage) {
        let Some(target) = msg.target.clone() else {
            return;
        };
        let Some(room) = self.hub.find_room_by_id(target.id).await else {
            return;
        };

        msg.target = Some(room.info());
        room.broadcast(Broadcast::Chat(msg.clone()));
        room.queue_write(msg);
    }

    /// Join (creating if needed) the room `room_name`. `sender` is set on
    /// private joins and names the user on the other side.
    async fn join_room(&self, room_name: &str, sender: Option<Sender>) -> Option<Arc<Room>> {
        let room = match self.hub.find_room_by_name(room_name).await {
            Some(room) => room,
            None => match self.hub.create_room(room_name, sender.is_some()).await {
                Ok(room) => room,
                Err(e) => {
                    tracing::error!(room = %room_name, error = %e, "error creating room");
                    return None;
                }
            },
        };

        // don't allow joining private rooms through public room messages
        if sender.is_none() && room.private {
            return None;
        }

        if !self.is_in_room(room.id).await {
            self.rooms.write().await.insert(room.id, room.clone());
            room.register(self.arc()).await;
            self.notify_room_joined(&room, sender);
        }

        Some(room)
    }

    fn notify_room_joined(&self, room: &Arc<Room>, sender: Option<Sender>) {
        let msg = ChatMessage {
            action: action::ROOM_JOINED.into(),
            target: Some(room.info()),
            sender,
            ..Default::default()
        };
        match msg.to_frame() {
            Ok(frame) => self.send(frame),
            Err(e) => tracing::error!(error = %e, "error encoding room-joined"),
        }
    }

    fn reply_error(&self, id: &Option<String>, message: impl Into<String>) {
        let Some(id) = id else {
            return;
        };
        match RpcResponse::reply_error(id.clone(), 400, message.into()).encode() {
            Ok(frame) => self.send(frame),
            Err(e) => tracing::error!(error = %e, "error encoding error reply"),
        }
    }
}

/// Parse the `"page,limit"` body of a `get-msg` request. Anything malformed
/// falls back to the store's defaults.
fn parse_page_spec(body: &str) -> (u32, u32) {
    let mut parts = body.splitn(2, ',');
    let page = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    let limit = parts.next().and_then(|l| l.trim().parse().ok()).unwrap_or(0);
    (page, limit)
}
