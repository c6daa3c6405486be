//! The per-room actor.
//!
//! One task serializes register/unregister/broadcast for a room; a second
//! task (the batcher) turns the stream of chat messages into one bulk insert
//! per second plus a `delivered` notification carrying the persisted records.
//! When the last client unregisters the room disposes itself: the batcher
//! drains, then the actor removes the room from the hub's registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_db::store::{MessageStatus, MessageStore, NewMessage};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::client::Client;
use crate::message::{ChatMessage, MessageBatch, RoomInfo, action};

/// Live rooms keyed by name. Shared between the hub and the room actors so a
/// disposing room can take itself out of rotation.
pub(crate) type RoomRegistry = Arc<RwLock<HashMap<String, Arc<Room>>>>;

const CONTROL_QUEUE: usize = 16;
const TRAFFIC_QUEUE: usize = 256;

/// How often the batcher flushes accumulated messages to the store.
pub const BATCH_INTERVAL: Duration = Duration::from_secs(1);

/// What the room fans out to its members.
pub enum Broadcast {
    Chat(ChatMessage),
    Delivered(MessageBatch),
}

/// A named broadcast domain. The struct is the handle; the state lives in
/// the actor task.
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub private: bool,
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<Arc<Client>>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    write_db_tx: mpsc::Sender<ChatMessage>,
    disposed: AtomicBool,
}

impl Room {
    /// Start the actor pair and return the shared handle.
    pub(crate) fn spawn(
        id: Uuid,
        name: String,
        private: bool,
        registry: RoomRegistry,
        messages: Arc<dyn MessageStore>,
    ) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_QUEUE);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_QUEUE);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(TRAFFIC_QUEUE);
        let (write_db_tx, write_db_rx) = mpsc::channel(TRAFFIC_QUEUE);

        let room = Arc::new(Self {
            id,
            name,
            private,
            register_tx,
            unregister_tx,
            broadcast_tx,
            write_db_tx,
            disposed: AtomicBool::new(false),
        });

        tokio::spawn(room.clone().run(
            register_rx,
            unregister_rx,
            broadcast_rx,
            write_db_rx,
            registry,
            messages,
        ));
        room
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.name.clone(),
            private: self.private,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Enqueue a membership registration. Lossless: awaits queue space.
    pub async fn register(&self, client: Arc<Client>) {
        let _ = self.register_tx.send(client).await;
    }

    pub async fn unregister(&self, client: Arc<Client>) {
        let _ = self.unregister_tx.send(client).await;
    }

    /// Fan a message out to every member. Non-blocking: a full queue drops
    /// the message rather than stalling the sender. Nothing is accepted
    /// after disposal.
    pub fn broadcast(&self, event: Broadcast) {
        if self.is_disposed() {
            return;
        }
        if self.broadcast_tx.try_send(event).is_err() {
            tracing::warn!(room = %self.name, "broadcast queue full, dropping message");
        }
    }

    /// Hand a message to the batcher for durable storage.
    pub fn queue_write(&self, msg: ChatMessage) {
        if self.is_disposed() {
            return;
        }
        if self.write_db_tx.try_send(msg).is_err() {
            tracing::warn!(room = %self.name, "write queue full, dropping message");
        }
    }

    async fn run(
        self: Arc<Self>,
        mut register_rx: mpsc::Receiver<Arc<Client>>,
        mut unregister_rx: mpsc::Receiver<Arc<Client>>,
        mut broadcast_rx: mpsc::Receiver<Broadcast>,
        write_db_rx: mpsc::Receiver<ChatMessage>,
        registry: RoomRegistry,
        messages: Arc<dyn MessageStore>,
    ) {
        let mut clients: HashMap<Uuid, Arc<Client>> = HashMap::new();

        let batcher = tokio::spawn(self.clone().write_to_db_loop(write_db_rx, messages));

        loop {
            tokio::select! {
                Some(client) = register_rx.recv() => {
                    self.register_client(&mut clients, client);
                }
                Some(client) = unregister_rx.recv() => {
                    if self.unregister_client(&mut clients, &client) && clients.is_empty() {
                        self.disposed.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                Some(event) = broadcast_rx.recv() => {
                    self.broadcast_to_clients(&clients, &event);
                }
                else => break,
            }
        }

        // Disposal: the batcher flushes its buffer before we let go of the
        // name.
        if let Err(e) = batcher.await {
            tracing::error!(room = %self.name, error = %e, "batcher task failed");
        }

        let mut rooms = registry.write().await;
        if rooms.get(&self.name).is_some_and(|r| Arc::ptr_eq(r, &self)) {
            rooms.remove(&self.name);
        }
        tracing::debug!(room = %self.name, "room disposed");
    }

    fn register_client(&self, clients: &mut HashMap<Uuid, Arc<Client>>, client: Arc<Client>) {
        tracing::debug!(user = %client.username, room = %self.name, "client joined room");

        if !self.private {
            let notice = ChatMessage {
                action: action::SEND_MESSAGE.into(),
                message: format!("{} joined room", client.username),
                target: Some(self.info()),
                ..Default::default()
            };
            self.broadcast_to_clients(clients, &Broadcast::Chat(notice));
        }
        clients.insert(client.id, client);
    }

    fn unregister_client(
        &self,
        clients: &mut HashMap<Uuid, Arc<Client>>,
        client: &Arc<Client>,
    ) -> bool {
        let removed = clients.remove(&client.id).is_some();
        if removed {
            tracing::debug!(user = %client.username, room = %self.name, "client left room");
        }
        removed
    }

    fn broadcast_to_clients(&self, clients: &HashMap<Uuid, Arc<Client>>, event: &Broadcast) {
        let frame = match event {
            Broadcast::Chat(msg) => msg.to_frame(),
            Broadcast::Delivered(batch) => batch.to_frame(action::DELIVERED),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(room = %self.name, error = %e, "error encoding broadcast");
                return;
            }
        };

        for client in clients.values() {
            client.send(frame.clone());
        }
    }

    /// The batcher. Accumulates messages and flushes once per tick; exits
    /// after observing disposal, draining everything still queued first.
    async fn write_to_db_loop(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ChatMessage>,
        messages: Arc<dyn MessageStore>,
    ) {
        let mut ticker = tokio::time::interval(BATCH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buffer: Vec<ChatMessage> = Vec::new();

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(msg) => buffer.push(msg),
                    None => {
                        self.flush(&messages, &mut buffer).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(&messages, &mut buffer).await;
                    if self.is_disposed() {
                        while let Ok(msg) = rx.try_recv() {
                            buffer.push(msg);
                        }
                        self.flush(&messages, &mut buffer).await;
                        return;
                    }
                }
            }
        }
    }

    async fn flush(&self, messages: &Arc<dyn MessageStore>, buffer: &mut Vec<ChatMessage>) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(buffer);
        let (read_ids, writes) = partition_batch(self.id, batch);

        if !read_ids.is_empty() {
            if let Err(e) = messages.update_status(&read_ids, MessageStatus::Read).await {
                tracing::error!(room = %self.name, error = %e, "read-receipt update failed");
            }
        }

        if !writes.is_empty() {
            match messages.add_messages(writes).await {
                Ok(records) => {
                    self.broadcast(Broadcast::Delivered(MessageBatch {
                        target: self.info(),
                        messages: records,
                    }));
                }
                Err(e) => {
                    // Not retried; clients resend if they never see the
                    // delivered notification.
                    tracing::error!(room = %self.name, error = %e, "message batch insert failed");
                }
            }
        }
    }
}

/// Split a batch into read receipts (store ids to mark `read`) and writes
/// (messages to insert as `delv`). Unparsable timestamps become "now".
pub(crate) fn partition_batch(
    room_id: Uuid,
    batch: Vec<ChatMessage>,
) -> (Vec<Uuid>, Vec<NewMessage>) {
    let mut read_ids = Vec::new();
    let mut writes = Vec::new();

    for msg in batch {
        if msg.action == action::HAS_BEEN_READ {
            match Uuid::parse_str(&msg.message) {
                Ok(id) => read_ids.push(id),
                Err(_) => {
                    tracing::warn!(body = %msg.message, "read receipt without a valid message id");
                }
            }
            continue;
        }

        let time = msg
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        writes.push(NewMessage {
            action: msg.action,
            message: msg.message,
            room_id,
            sender: msg.sender.map(|s| s.uid).unwrap_or_else(Uuid::nil),
            status: MessageStatus::Delivered,
            time,
        });
    }

    (read_ids, writes)
}
