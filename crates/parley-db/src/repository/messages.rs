//! Message repository.
//!
//! Writes arrive in 1-second batches from the room batchers, so the insert
//! path is bulk-only. Ids are assigned here before the insert, which keeps
//! the returned records in input order without relying on `RETURNING`
//! ordering.

use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{MessageRecord, MessageStatus, NewMessage, StatusText};

pub async fn add_messages(
    pool: &PgPool,
    messages: Vec<NewMessage>,
) -> Result<Vec<MessageRecord>, sqlx::Error> {
    if messages.is_empty() {
        return Ok(Vec::new());
    }

    let now = chrono::Utc::now();
    let records: Vec<MessageRecord> = messages
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

    let mut ids = Vec::with_capacity(records.len());
    let mut actions = Vec::with_capacity(records.len());
    let mut bodies = Vec::with_capacity(records.len());
    let mut room_ids = Vec::with_capacity(records.len());
    let mut senders = Vec::with_capacity(records.len());
    let mut statuses = Vec::with_capacity(records.len());
    let mut times = Vec::with_capacity(records.len());
    for r in &records {
        ids.push(r.id);
        actions.push(r.action.clone());
        bodies.push(r.message.clone());
        room_ids.push(r.room_id);
        senders.push(r.sender);
        statuses.push(r.status.0.as_str().to_owned());
        times.push(r.time);
    }

    sqlx::query(
        r#"
        INSERT INTO messages (id, action, message, room_id, sender, status, time, updated_at)
        SELECT *, NOW() FROM UNNEST(
            $1::uuid[], $2::text[], $3::text[], $4::uuid[], $5::uuid[], $6::text[], $7::timestamptz[]
        )
        "#,
    )
    .bind(&ids)
    .bind(&actions)
    .bind(&bodies)
    .bind(&room_ids)
    .bind(&senders)
    .bind(&statuses)
    .bind(&times)
    .execute(pool)
    .await?;

    Ok(records)
}

pub async fn update_status(
    pool: &PgPool,
    ids: &[Uuid],
    status: MessageStatus,
) -> Result<(), sqlx::Error> {
    if ids.is_empty() {
        return Ok(());
    }
    sqlx::query("UPDATE messages SET status = $2, updated_at = NOW() WHERE id = ANY($1)")
        .bind(ids)
        .bind(status.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Page through a room's history, newest first.
pub async fn messages_by_room(
    pool: &PgPool,
    room_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<MessageRecord>, sqlx::Error> {
    sqlx::query_as::<_, MessageRecord>(
        r#"
        SELECT * FROM messages
        WHERE room_id = $1
        ORDER BY time DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(room_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}
