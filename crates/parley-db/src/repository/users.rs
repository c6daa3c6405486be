//! User repository — the read-only slice the real-time core needs.

use sqlx::PgPool;

use crate::store::UserRecord;

pub async fn find_user_by_username(
    pool: &PgPool,
    username: &str,
) -> Result<Option<UserRecord>, sqlx::Error> {
    sqlx::query_as::<_, UserRecord>(
        "SELECT id, username, name, avatar FROM users WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}
