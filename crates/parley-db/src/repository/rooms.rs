//! Room repository.
//!
//! The `rooms.name` unique index is the arbiter of room existence: the hub
//! persists first and only then starts the live actor.

use sqlx::PgPool;

use crate::store::{NewRoom, RoomRecord};

/// Insert a room. A unique-name conflict surfaces as a database error the
/// caller maps to "already exists".
pub async fn add_room(pool: &PgPool, room: &NewRoom) -> Result<RoomRecord, sqlx::Error> {
    sqlx::query_as::<_, RoomRecord>(
        r#"
        INSERT INTO rooms (id, name, private, created_at, updated_at)
        VALUES ($1, $2, $3, NOW(), NOW())
        RETURNING *
        "#,
    )
    .bind(room.id)
    .bind(&room.name)
    .bind(room.private)
    .fetch_one(pool)
    .await
}

pub async fn find_room_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<RoomRecord>, sqlx::Error> {
    sqlx::query_as::<_, RoomRecord>("SELECT * FROM rooms WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
}
