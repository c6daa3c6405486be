//! Room membership repository.

use sqlx::PgPool;
use uuid::Uuid;

use crate::store::RoomRecord;

/// Record a membership. `ON CONFLICT DO NOTHING` makes repeated private-room
/// joins idempotent.
pub async fn add_member(pool: &PgPool, room_id: Uuid, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO members (room_id, user_id, joined_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (room_id, user_id) DO NOTHING
        "#,
    )
    .bind(room_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_member(pool: &PgPool, room_id: Uuid, user_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM members WHERE room_id = $1 AND user_id = $2")
        .bind(room_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn member_exists(
    pool: &PgPool,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let found: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM members WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Rooms the user belongs to, oldest membership first.
pub async fn rooms_by_member(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<RoomRecord>, sqlx::Error> {
    sqlx::query_as::<_, RoomRecord>(
        r#"
        SELECT r.* FROM rooms r
        INNER JOIN members m ON m.room_id = r.id
        WHERE m.user_id = $1
        ORDER BY m.joined_at
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
