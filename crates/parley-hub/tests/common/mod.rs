//! Shared harness for the end-to-end tests: in-memory stores, a fake media
//! engine, a served hub on an ephemeral port, and a thin WebSocket client.

// each test binary uses a different slice of this harness
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parley_common::auth::create_socket_token;
use parley_common::error::{ParleyError, ParleyResult};
use parley_db::store::{
    ContactStatus, ContactStore, MemberStore, MessageRecord, MessageStatus, MessageStore,
    NewMessage, NewRoom, RoomRecord, RoomStore, StatusText, Stores, UserConnection, UserRecord,
    UserStore,
};
use parley_hub::{Hub, HubState, build_router};
use parley_voice::SessionProvider;
use parley_voice::transport::{
    CandidateFn, IceStateFn, NegotiationNeededFn, PublisherTransport, SessionPeer, SfuSession,
    SubscriberTransport, TransportError,
};
use parley_voice::types::{IceCandidate, SessionDescription};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use uuid::Uuid;

pub const SECRET: &str = "integration-secret";

const RECV_DEADLINE: Duration = Duration::from_secs(3);

// === In-memory stores ===

#[derive(Default)]
pub struct MemStores {
    pub rooms: Mutex<Vec<RoomRecord>>,
    pub members: Mutex<HashSet<(Uuid, Uuid)>>,
    pub messages: Mutex<Vec<MessageRecord>>,
    pub users: Mutex<Vec<UserRecord>>,
    /// (owner uid, target username) → connection
    pub contacts: Mutex<HashMap<(Uuid, String), UserConnection>>,
}

impl MemStores {
    pub fn add_user(&self, username: &str) -> UserRecord {
        let user = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            name: String::new(),
            avatar: String::new(),
        };
        self.users.lock().unwrap().push(user.clone());
        user
    }

    /// Record a mutual accepted contact between two users.
    pub fn befriend(&self, a: &UserRecord, b: &UserRecord) {
        let mut contacts = self.contacts.lock().unwrap();
        contacts.insert(
            (a.id, b.username.clone()),
            UserConnection {
                user: b.clone(),
                status: ContactStatus::Accepted,
            },
        );
        contacts.insert(
            (b.id, a.username.clone()),
            UserConnection {
                user: a.clone(),
                status: ContactStatus::Accepted,
            },
        );
    }

    pub fn seed_room(&self, name: &str, private: bool) -> RoomRecord {
        let now = Utc::now();
        let record = RoomRecord {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            private,
            created_at: now,
            updated_at: now,
        };
        self.rooms.lock().unwrap().push(record.clone());
        record
    }

    pub fn message_status(&self, id: Uuid) -> Option<MessageStatus> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.status.0)
    }

    pub fn member_rows(&self, room_id: Uuid) -> usize {
        self.members
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == room_id)
            .count()
    }
}

fn bounds(page: u32, limit: u32) -> (usize, usize) {
    let page = if page == 0 { 1 } else { page } as usize;
    let limit = if limit == 0 { 10 } else { limit } as usize;
    ((page - 1) * limit, limit)
}

#[async_trait]
impl RoomStore for MemStores {
    async fn add_room(&self, room: &NewRoom) -> ParleyResult<RoomRecord> {
        let mut rooms = self.rooms.lock().unwrap();
        if rooms.iter().any(|r| r.name == room.name) {
            return Err(ParleyError::AlreadyExists {
                resource: format!("room {:?}", room.name),
            });
        }
        let now = Utc::now();
        let record = RoomRecord {
            id: room.id,
            name: room.name.clone(),
            private: room.private,
            created_at: now,
            updated_at: now,
        };
        rooms.push(record.clone());
        Ok(record)
    }

    async fn find_room_by_name(&self, name: &str) -> ParleyResult<Option<RoomRecord>> {
        Ok(self
            .rooms
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.name == name)
            .cloned())
    }
}

#[async_trait]
impl MemberStore for MemStores {
    async fn add_member(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<()> {
        self.members.lock().unwrap().insert((room_id, user_id));
        Ok(())
    }

    async fn remove_member(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<()> {
        self.members.lock().unwrap().remove(&(room_id, user_id));
        Ok(())
    }

    async fn member_exists(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<bool> {
        Ok(self.members.lock().unwrap().contains(&(room_id, user_id)))
    }

    async fn rooms_by_member(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> ParleyResult<Vec<RoomRecord>> {
        let members = self.members.lock().unwrap();
        let rooms = self.rooms.lock().unwrap();
        let mine: Vec<RoomRecord> = rooms
            .iter()
            .filter(|r| members.contains(&(r.id, user_id)))
            .cloned()
            .collect();
        let (offset, limit) = bounds(page, limit);
        Ok(mine.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl MessageStore for MemStores {
    async fn add_messages(&self, batch: Vec<NewMessage>) -> ParleyResult<Vec<MessageRecord>> {
        let now = Utc::now();
        let records: Vec<MessageRecord> = batch
            .into_iter()
            .map(|m| MessageRecord {
                id: Uuid::new_v4(),
                action: m.action,
                message: m.message,
                room_id: m.room_id,
                sender: m.sender,
                status: StatusText(m.status),
                time: m.time,
                updated_at: now,
            })
            .collect();
        self.messages.lock().unwrap().extend(records.clone());
        Ok(records)
    }

    async fn update_status(&self, ids: &[Uuid], status: MessageStatus) -> ParleyResult<()> {
        let mut messages = self.messages.lock().unwrap();
        for message in messages.iter_mut() {
            if ids.contains(&message.id) {
                message.status = StatusText(status);
                message.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn messages_by_room(
        &self,
        room_id: Uuid,
        page: u32,
        limit: u32,
    ) -> ParleyResult<Vec<MessageRecord>> {
        let mut mine: Vec<MessageRecord> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.time.cmp(&a.time));
        let (offset, limit) = bounds(page, limit);
        Ok(mine.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl UserStore for MemStores {
    async fn find_user_by_username(&self, username: &str) -> ParleyResult<Option<UserRecord>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }
}

#[async_trait]
impl ContactStore for MemStores {
    async fn find_user_connection(
        &self,
        owner: Uuid,
        to_username: &str,
    ) -> ParleyResult<Option<UserConnection>> {
        Ok(self
            .contacts
            .lock()
            .unwrap()
            .get(&(owner, to_username.to_owned()))
            .cloned())
    }
}

// === Fake media engine ===

#[derive(Default)]
pub struct FakeSession {
    pub sid: String,
    pub peers: Mutex<Vec<Arc<dyn SessionPeer>>>,
}

impl SfuSession for FakeSession {
    fn id(&self) -> String {
        self.sid.clone()
    }

    fn peers(&self) -> Vec<Arc<dyn SessionPeer>> {
        self.peers.lock().unwrap().clone()
    }

    fn add_peer(&self, peer: Arc<dyn SessionPeer>) {
        self.peers.lock().unwrap().push(peer);
    }

    fn remove_peer(&self, peer_id: &str) {
        self.peers.lock().unwrap().retain(|p| p.id() != peer_id);
    }

    fn subscribe(&self, _peer_id: &str) {}
}

#[derive(Default)]
pub struct FakePublisher {
    pub ice_cb: Mutex<Option<CandidateFn>>,
    pub state_cb: Mutex<Option<IceStateFn>>,
}

#[async_trait]
impl PublisherTransport for FakePublisher {
    async fn answer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer(format!("answer-to:{}", offer.sdp)))
    }

    fn stable(&self) -> bool {
        true
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), TransportError> {
        Ok(())
    }

    fn on_ice_candidate(&self, cb: CandidateFn) {
        *self.ice_cb.lock().unwrap() = Some(cb);
    }

    fn on_ice_state_change(&self, cb: IceStateFn) {
        *self.state_cb.lock().unwrap() = Some(cb);
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSubscriber {
    pub negotiation_cb: Mutex<Option<NegotiationNeededFn>>,
    pub ice_cb: Mutex<Option<CandidateFn>>,
}

#[async_trait]
impl SubscriberTransport for FakeSubscriber {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("server-offer"))
    }

    async fn set_remote_description(
        &self,
        _desc: SessionDescription,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn negotiate(&self) {}

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), TransportError> {
        Ok(())
    }

    fn on_negotiation_needed(&self, cb: NegotiationNeededFn) {
        *self.negotiation_cb.lock().unwrap() = Some(cb);
    }

    fn on_ice_candidate(&self, cb: CandidateFn) {
        *self.ice_cb.lock().unwrap() = Some(cb);
    }

    async fn send_data(&self, _label: &str, _data: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// The engine handle tests keep so they can fire callbacks by hand.
#[derive(Default)]
pub struct FakeEngine {
    pub sessions: Mutex<HashMap<String, Arc<FakeSession>>>,
    pub last_publisher: Mutex<Option<Arc<FakePublisher>>>,
    pub last_subscriber: Mutex<Option<Arc<FakeSubscriber>>>,
}

impl FakeEngine {
    pub fn fire_publisher_candidate(&self, candidate: &str) {
        let publisher = self.last_publisher.lock().unwrap().clone().unwrap();
        let cb = publisher.ice_cb.lock().unwrap();
        (cb.as_ref().unwrap())(IceCandidate {
            candidate: candidate.to_owned(),
            ..Default::default()
        });
    }

    pub fn fire_subscriber_candidate(&self, candidate: &str) {
        let subscriber = self.last_subscriber.lock().unwrap().clone().unwrap();
        let cb = subscriber.ice_cb.lock().unwrap();
        (cb.as_ref().unwrap())(IceCandidate {
            candidate: candidate.to_owned(),
            ..Default::default()
        });
    }
}

#[async_trait]
impl SessionProvider for FakeEngine {
    async fn get_session(&self, sid: &str) -> Arc<dyn SfuSession> {
        self.sessions
            .lock()
            .unwrap()
            .entry(sid.to_owned())
            .or_insert_with(|| {
                Arc::new(FakeSession {
                    sid: sid.to_owned(),
                    ..Default::default()
                })
            })
            .clone()
    }

    async fn new_publisher(
        &self,
        _peer_id: &str,
        _session: &Arc<dyn SfuSession>,
    ) -> Result<Arc<dyn PublisherTransport>, TransportError> {
        let publisher = Arc::new(FakePublisher::default());
        *self.last_publisher.lock().unwrap() = Some(publisher.clone());
        Ok(publisher)
    }

    async fn new_subscriber(
        &self,
        _peer_id: &str,
        _session: &Arc<dyn SfuSession>,
    ) -> Result<Arc<dyn SubscriberTransport>, TransportError> {
        let subscriber = Arc::new(FakeSubscriber::default());
        *self.last_subscriber.lock().unwrap() = Some(subscriber.clone());
        Ok(subscriber)
    }
}

// === The served app ===

pub struct TestApp {
    pub addr: SocketAddr,
    pub stores: Arc<MemStores>,
    pub hub: Arc<Hub>,
}

pub async fn spawn_app(sfu: Option<Arc<dyn SessionProvider>>) -> TestApp {
    let mem = Arc::new(MemStores::default());
    let stores = Stores {
        rooms: mem.clone(),
        members: mem.clone(),
        messages: mem.clone(),
        users: mem.clone(),
        contacts: mem.clone(),
    };
    let hub = Hub::new(stores, sfu);

    let router = build_router(HubState {
        hub: hub.clone(),
        jwt_secret: SECRET.into(),
        dev_mode: 0,
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        addr,
        stores: mem,
        hub,
    }
}

// === A thin websocket client ===

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Connect through the `?jwt=` query form with a socket-scoped token.
    pub async fn connect(app: &TestApp, uid: Uuid, username: &str) -> Self {
        let token = create_socket_token(&uid.to_string(), username, 60, SECRET).unwrap();
        let (stream, _) = connect_async(format!("ws://{}/ws?jwt={token}", app.addr))
            .await
            .expect("websocket handshake");
        Self { stream }
    }

    pub async fn send_rpc(&mut self, id: &str, method: &str, params: Value) {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        self.stream
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();
    }

    /// Next batch of JSON-RPC frames (one websocket message may coalesce
    /// several, separated by newlines).
    async fn next_frames(&mut self) -> Vec<Value> {
        loop {
            let msg = timeout(RECV_DEADLINE, self.stream.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .expect("websocket error");
            match msg {
                Message::Text(text) => {
                    return text
                        .split('\n')
                        .filter(|l| !l.trim().is_empty())
                        .map(|l| serde_json::from_str(l).expect("frame is not json"))
                        .collect();
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("unexpected websocket message: {other:?}"),
            }
        }
    }

    /// Skip frames until a notification with the given method arrives.
    pub async fn expect_notification(&mut self, method: &str) -> Value {
        let deadline = tokio::time::Instant::now() + RECV_DEADLINE;
        while tokio::time::Instant::now() < deadline {
            for frame in self.next_frames().await {
                if frame["method"] == method {
                    return frame;
                }
            }
        }
        panic!("no {method} notification arrived in time");
    }

    /// Skip frames until the response to `id` arrives.
    pub async fn expect_response(&mut self, id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + RECV_DEADLINE;
        while tokio::time::Instant::now() < deadline {
            for frame in self.next_frames().await {
                if frame.get("method").is_none() && frame["id"] == id {
                    return frame;
                }
            }
        }
        panic!("no response for id {id} arrived in time");
    }

    /// Throw away everything already queued for this client.
    pub async fn drain(&mut self) {
        while timeout(Duration::from_millis(150), self.stream.next())
            .await
            .is_ok_and(|m| m.is_some())
        {}
    }
}
