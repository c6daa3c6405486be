//! The process-wide registry of live sessions and rooms.
//!
//! One task consumes the register/unregister channels, so presence changes
//! for a client are totally ordered. The room registry is shared read-mostly
//! state: sessions look rooms up directly, room actors remove themselves on
//! disposal, and rooms that only exist in the store are materialized on
//! first touch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parley_common::error::ParleyResult;
use parley_db::store::{NewRoom, Stores};
use parley_voice::SessionProvider;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::client::Client;
use crate::message::{ChatMessage, Sender, action};
use crate::room::{Broadcast, Room, RoomRegistry};

const PRESENCE_QUEUE: usize = 64;
const MEMBER_PAGE_SIZE: u32 = 10;

pub struct Hub {
    pub stores: Stores,
    clients: RwLock<HashMap<Uuid, Arc<Client>>>,
    rooms: RoomRegistry,
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<Arc<Client>>,
    sfu: Option<Arc<dyn SessionProvider>>,
}

impl Hub {
    /// Create the hub and start its presence loop.
    pub fn new(stores: Stores, sfu: Option<Arc<dyn SessionProvider>>) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(PRESENCE_QUEUE);
        let (unregister_tx, unregister_rx) = mpsc::channel(PRESENCE_QUEUE);

        let hub = Arc::new(Self {
            stores,
            clients: RwLock::new(HashMap::new()),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            register_tx,
            unregister_tx,
            sfu,
        });

        tokio::spawn(hub.clone().run(register_rx, unregister_rx));
        hub
    }

    pub fn sfu(&self) -> Option<Arc<dyn SessionProvider>> {
        self.sfu.clone()
    }

    /// Enqueue a session for registration. Lossless: awaits queue space.
    pub async fn register(&self, client: Arc<Client>) {
        let _ = self.register_tx.send(client).await;
    }

    pub async fn unregister(&self, client: Arc<Client>) {
        let _ = self.unregister_tx.send(client).await;
    }

    async fn run(
        self: Arc<Self>,
        mut register_rx: mpsc::Receiver<Arc<Client>>,
        mut unregister_rx: mpsc::Receiver<Arc<Client>>,
    ) {
        loop {
            tokio::select! {
                Some(client) = register_rx.recv() => self.register_client(client).await,
                Some(client) = unregister_rx.recv() => self.unregister_client(client).await,
                else => break,
            }
        }
    }

    async fn register_client(&self, client: Arc<Client>) {
        tracing::debug!(user = %client.username, session = %client.id, "new connection");

        self.notify_member_rooms(&client, action::USER_JOINED).await;
        self.seed_online_users(&client).await;
        self.clients.write().await.insert(client.id, client);
    }

    async fn unregister_client(&self, client: Arc<Client>) {
        if self.clients.write().await.remove(&client.id).is_some() {
            self.notify_member_rooms(&client, action::USER_LEFT).await;
            tracing::debug!(user = %client.username, session = %client.id, "connection removed");
        }
    }

    /// Tell every live room the client is a member of that they came or
    /// went. Membership is paged out of the store until exhausted.
    async fn notify_member_rooms(&self, client: &Arc<Client>, presence: &str) {
        let mut page: u32 = 1;
        loop {
            let records = match self
                .stores
                .members
                .rooms_by_member(client.user_id, page, MEMBER_PAGE_SIZE)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(user = %client.username, error = %e, "membership page failed");
                    return;
                }
            };
            if records.is_empty() {
                return;
            }

            for record in &records {
                if let Some(room) = self.live_room_by_id(record.id).await {
                    room.broadcast(Broadcast::Chat(ChatMessage {
                        action: presence.into(),
                        sender: Some(client.sender()),
                        ..Default::default()
                    }));
                }
            }

            if records.len() < MEMBER_PAGE_SIZE as usize {
                return;
            }
            page += 1;
        }
    }

    /// Tell a fresh session who is already online, one `user-join` per
    /// distinct user.
    async fn seed_online_users(&self, client: &Arc<Client>) {
        let mut seen: HashSet<Uuid> = HashSet::new();
        for other in self.clients.read().await.values() {
            if !seen.insert(other.user_id) {
                continue;
            }
            let msg = ChatMessage {
                action: action::USER_JOINED.into(),
                sender: Some(other.sender()),
                ..Default::default()
            };
            match msg.to_frame() {
                Ok(frame) => client.send(frame),
                Err(e) => tracing::error!(error = %e, "error encoding user-join"),
            }
        }
    }

    /// Find a live room by name, falling back to the store. A room found
    /// only in the store is materialized with its durable id, which is how
    /// rooms survive process restarts.
    pub async fn find_room_by_name(&self, name: &str) -> Option<Arc<Room>> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                if !room.is_disposed() {
                    return Some(room.clone());
                }
            }
        }

        self.run_room_from_store(name).await
    }

    async fn run_room_from_store(&self, name: &str) -> Option<Arc<Room>> {
        let record = match self.stores.rooms.find_room_by_name(name).await {
            Ok(record) => record?,
            Err(e) => {
                tracing::error!(room = %name, error = %e, "room lookup failed");
                return None;
            }
        };

        let mut rooms = self.rooms.write().await;
        // re-check under the write lock; another session may have won
        if let Some(room) = rooms.get(name) {
            if !room.is_disposed() {
                return Some(room.clone());
            }
        }

        let room = Room::spawn(
            record.id,
            record.name.clone(),
            record.private,
            self.rooms.clone(),
            self.stores.messages.clone(),
        );
        rooms.insert(record.name, room.clone());
        tracing::debug!(room = %name, id = %room.id, "room loaded from store");
        Some(room)
    }

    pub async fn find_room_by_id(&self, id: Uuid) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .await
            .values()
            .find(|room| room.id == id && !room.is_disposed())
            .cloned()
    }

    async fn live_room_by_id(&self, id: Uuid) -> Option<Arc<Room>> {
        self.find_room_by_id(id).await
    }

    /// Persist a new room, then start its actor. The store is the source of
    /// truth: a duplicate name fails there and no actor starts.
    pub async fn create_room(&self, name: &str, private: bool) -> ParleyResult<Arc<Room>> {
        let record = self
            .stores
            .rooms
            .add_room(&NewRoom {
                id: Uuid::new_v4(),
                name: name.to_owned(),
                private,
            })
            .await?;

        let room = Room::spawn(
            record.id,
            record.name.clone(),
            record.private,
            self.rooms.clone(),
            self.stores.messages.clone(),
        );
        self.rooms.write().await.insert(record.name, room.clone());
        tracing::info!(room = %name, id = %room.id, "room created");
        Ok(room)
    }

    /// Every live session of one user.
    pub async fn find_clients_by_user(&self, user_id: Uuid) -> Vec<Arc<Client>> {
        self.clients
            .read()
            .await
            .values()
            .filter(|client| client.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn find_client_by_id(&self, session_id: Uuid) -> Option<Arc<Client>> {
        self.clients.read().await.get(&session_id).cloned()
    }

    /// The identity of an online user, if any of their sessions is live.
    pub async fn find_user_by_id(&self, user_id: Uuid) -> Option<Sender> {
        self.clients
            .read()
            .await
            .values()
            .find(|client| client.user_id == user_id)
            .map(|client| client.sender())
    }
}
