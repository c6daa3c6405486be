//! PostgreSQL repositories — free functions over a `PgPool`, one module per
//! aggregate. [`crate::PgStores`] adapts them to the store traits.

pub mod contacts;
pub mod members;
pub mod messages;
pub mod rooms;
pub mod users;
