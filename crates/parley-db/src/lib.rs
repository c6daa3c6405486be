//! # parley-db
//!
//! Database layer for Parley: the narrow store contracts the real-time core
//! consumes ([`store`]) and their PostgreSQL implementations
//! ([`repository`], adapted by [`PgStores`]).

pub mod repository;
pub mod store;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parley_common::config::AppConfig;
use parley_common::error::{ParleyError, ParleyResult};
use sqlx::PgPool;
use uuid::Uuid;

use store::{
    ContactStore, MemberStore, MessageRecord, MessageStatus, MessageStore, NewMessage, NewRoom,
    RoomRecord, RoomStore, Stores, UserConnection, UserRecord, UserStore, page_bounds,
};

/// Shared database state.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connect using the URL in `config.database.url`.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        tracing::info!("Connecting to PostgreSQL…");
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .connect(&config.database.url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations…");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }

    /// The store-trait bundle backed by this pool.
    pub fn stores(&self) -> Stores {
        let pg = Arc::new(PgStores {
            pool: self.pool.clone(),
        });
        Stores {
            rooms: pg.clone(),
            members: pg.clone(),
            messages: pg.clone(),
            users: pg.clone(),
            contacts: pg,
        }
    }
}

/// PostgreSQL-backed implementation of every store trait.
pub struct PgStores {
    pool: PgPool,
}

#[async_trait]
impl RoomStore for PgStores {
    async fn add_room(&self, room: &NewRoom) -> ParleyResult<RoomRecord> {
        repository::rooms::add_room(&self.pool, room)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    ParleyError::AlreadyExists {
                        resource: format!("room {:?}", room.name),
                    }
                }
                _ => ParleyError::Database(e),
            })
    }

    async fn find_room_by_name(&self, name: &str) -> ParleyResult<Option<RoomRecord>> {
        Ok(repository::rooms::find_room_by_name(&self.pool, name).await?)
    }
}

#[async_trait]
impl MemberStore for PgStores {
    async fn add_member(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<()> {
        Ok(repository::members::add_member(&self.pool, room_id, user_id).await?)
    }

    async fn remove_member(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<()> {
        Ok(repository::members::remove_member(&self.pool, room_id, user_id).await?)
    }

    async fn member_exists(&self, room_id: Uuid, user_id: Uuid) -> ParleyResult<bool> {
        Ok(repository::members::member_exists(&self.pool, room_id, user_id).await?)
    }

    async fn rooms_by_member(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> ParleyResult<Vec<RoomRecord>> {
        let (limit, offset) = page_bounds(page, limit);
        Ok(repository::members::rooms_by_member(&self.pool, user_id, limit, offset).await?)
    }
}

#[async_trait]
impl MessageStore for PgStores {
    async fn add_messages(&self, messages: Vec<NewMessage>) -> ParleyResult<Vec<MessageRecord>> {
        Ok(repository::messages::add_messages(&self.pool, messages).await?)
    }

    async fn update_status(&self, ids: &[Uuid], status: MessageStatus) -> ParleyResult<()> {
        Ok(repository::messages::update_status(&self.pool, ids, status).await?)
    }

    async fn messages_by_room(
        &self,
        room_id: Uuid,
        page: u32,
        limit: u32,
    ) -> ParleyResult<Vec<MessageRecord>> {
        let (limit, offset) = page_bounds(page, limit);
        Ok(repository::messages::messages_by_room(&self.pool, room_id, limit, offset).await?)
    }
}

#[async_trait]
impl UserStore for PgStores {
    async fn find_user_by_username(&self, username: &str) -> ParleyResult<Option<UserRecord>> {
        Ok(repository::users::find_user_by_username(&self.pool, username).await?)
    }
}

#[async_trait]
impl ContactStore for PgStores {
    async fn find_user_connection(
        &self,
        owner: Uuid,
        to_username: &str,
    ) -> ParleyResult<Option<UserConnection>> {
        Ok(repository::contacts::find_user_connection(&self.pool, owner, to_username).await?)
    }
}
