//! # parley-hub
//!
//! The real-time core: one WebSocket endpoint multiplexing JSON-RPC between
//! authenticated clients, per-room broadcast actors with batched
//! persistence, and the dispatch into WebRTC signaling.
//!
//! Wire contract: text frames, one JSON-RPC object per frame; the server
//! may coalesce several into a single frame separated by `\n`.

pub mod client;
pub mod hub;
pub mod message;
pub mod room;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use axum::routing::get;
use axum_extra::extract::CookieJar;
use parley_common::auth::{Claims, Purpose, validate_token};
use parley_common::error::ParleyError;

pub use client::MAX_MESSAGE_SIZE;
pub use hub::Hub;

/// State behind the `/ws` route.
pub struct HubState {
    pub hub: Arc<Hub>,
    pub jwt_secret: String,
    /// Anything above 0 relaxes the origin check for LAN development.
    pub dev_mode: u8,
}

/// Build the WebSocket router.
pub fn build_router(state: HubState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

/// Upgrade handler: origin policy, then the auth gate, then the session.
/// A bad token refuses the upgrade; no handshake completes.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    jar: CookieJar,
) -> Result<Response, ParleyError> {
    check_origin(&headers, state.dev_mode)?;
    let claims = authenticate(&state.jwt_secret, &headers, &jar, &query)?;

    tracing::info!(user = %claims.username(), "websocket upgrade");
    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| client::serve(socket, state.hub.clone(), claims)))
}

/// Pull the bearer token from the `Authorization` header, the `jwt` cookie,
/// or the `?jwt=` query — in that order. The query form is only honored for
/// short-lived socket-purpose tokens.
fn authenticate(
    secret: &str,
    headers: &HeaderMap,
    jar: &CookieJar,
    query: &HashMap<String, String>,
) -> Result<Claims, ParleyError> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return validate_token(token, secret);
        }
    }

    if let Some(cookie) = jar.get("jwt") {
        return validate_token(cookie.value(), secret);
    }

    if let Some(token) = query.get("jwt") {
        let claims = validate_token(token, secret)?;
        if claims.cmd != Purpose::Socket {
            tracing::warn!(user = %claims.username(), "query token without socket purpose");
            return Err(ParleyError::Unauthorized);
        }
        return Ok(claims);
    }

    Err(ParleyError::Unauthorized)
}

/// Browsers send an `Origin`; non-browser clients usually don't and are let
/// through. Dev mode admits LAN and localhost origins, everything else is
/// strict same-origin.
fn check_origin(headers: &HeaderMap, dev_mode: u8) -> Result<(), ParleyError> {
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };

    if dev_mode > 0
        && (origin.starts_with("http://192.168.") || origin.starts_with("http://localhost"))
    {
        return Ok(());
    }

    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return Err(ParleyError::OriginNotAllowed);
    };
    let origin_host = origin.split("://").nth(1).unwrap_or("");
    if origin_host == host {
        Ok(())
    } else {
        Err(ParleyError::OriginNotAllowed)
    }
}
