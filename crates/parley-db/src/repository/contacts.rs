//! Contact repository — resolves a username into a user plus the contact
//! status from the requesting owner's side. Private-room joins require the
//! edge to be `accepted`.

use sqlx::PgPool;
use uuid::Uuid;

use crate::store::{ContactStatus, UserConnection, UserRecord};

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: Uuid,
    username: String,
    name: String,
    avatar: String,
    status: String,
}

pub async fn find_user_connection(
    pool: &PgPool,
    owner: Uuid,
    to_username: &str,
) -> Result<Option<UserConnection>, sqlx::Error> {
    let row = sqlx::query_as::<_, ConnectionRow>(
        r#"
        SELECT u.id, u.username, u.name, u.avatar, c.status
        FROM users u
        INNER JOIN contacts c ON c.contact_id = u.id AND c.owner_id = $1
        WHERE u.username = $2
        "#,
    )
    .bind(owner)
    .bind(to_username)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|r| {
        let status = ContactStatus::parse(&r.status)?;
        Some(UserConnection {
            user: UserRecord {
                id: r.id,
                username: r.username,
                name: r.name,
                avatar: r.avatar,
            },
            status,
        })
    }))
}
