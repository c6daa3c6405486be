//! Shared JWT authentication utilities.
//!
//! Claims and token validation live here so the hub, the signaling layer and
//! any HTTP front end can use them without circular dependencies. Tokens are
//! HMAC-SHA256 signed and carry a purpose tag narrowing what they may
//! authorize: only `socket`-purpose tokens are accepted through the `?jwt=`
//! query form of the WebSocket upgrade.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::ParleyError;

/// What a token is allowed to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    Login,
    #[serde(rename = "socket")]
    Socket,
    UpdateAvatar,
    ResetPassword,
}

/// JWT claims embedded in every Parley token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id (UUID string)
    pub id: String,
    /// Username
    pub usr: String,
    /// Purpose tag
    pub cmd: Purpose,
    /// Short code scoped to the purpose (e.g. a reset code); empty for logins
    pub code: String,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn uid(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.usr
    }
}

/// Create a signed token for the given identity and purpose.
pub fn create_token(
    uid: &str,
    username: &str,
    purpose: Purpose,
    code: &str,
    ttl_secs: i64,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        id: uid.to_owned(),
        usr: username.to_owned(),
        cmd: purpose,
        code: code.to_owned(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Create a short-lived token scoped to the WebSocket upgrade.
pub fn create_socket_token(
    uid: &str,
    username: &str,
    ttl_secs: i64,
    secret: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    create_token(uid, username, Purpose::Socket, "", ttl_secs, secret)
}

/// Validate and decode a token, checking signature and expiry.
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, ParleyError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => ParleyError::TokenExpired,
        _ => ParleyError::InvalidToken,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn roundtrip_preserves_identity() {
        let token = create_token("u-1", "alice", Purpose::Login, "", 60, SECRET).unwrap();
        let claims = validate_token(&token, SECRET).unwrap();
        assert_eq!(claims.uid(), "u-1");
        assert_eq!(claims.username(), "alice");
        assert_eq!(claims.cmd, Purpose::Login);
    }

    #[test]
    fn expired_token_is_rejected() {
        // jsonwebtoken's default validation allows 60s of leeway
        let token = create_token("u-1", "alice", Purpose::Login, "", -120, SECRET).unwrap();
        match validate_token(&token, SECRET) {
            Err(ParleyError::TokenExpired) => {}
            other => panic!("expected TokenExpired, got {other:?}"),
        }
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_token("u-1", "alice", Purpose::Login, "", 60, SECRET).unwrap();
        assert!(matches!(
            validate_token(&token, "other-secret"),
            Err(ParleyError::InvalidToken)
        ));
    }

    #[test]
    fn socket_purpose_serializes_lowercase() {
        let json = serde_json::to_string(&Purpose::Socket).unwrap();
        assert_eq!(json, "\"socket\"");
        let json = serde_json::to_string(&Purpose::Login).unwrap();
        assert_eq!(json, "\"Login\"");
    }
}
