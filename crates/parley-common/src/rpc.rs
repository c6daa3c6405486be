//! JSON-RPC 2.0 envelopes for the WebSocket wire.
//!
//! One JSON object per frame; the server may coalesce several into a single
//! WebSocket message separated by `\n`, so receivers must split with
//! [`split_frames`]. Absent optional fields are omitted, never `null`.
//! Server-originated notifications carry random UUID ids and are one-way.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";

/// A request or notification.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Marks a server-originated one-way frame. Never serialized.
    #[serde(skip)]
    pub notif: bool,
}

/// A response to a request id.
#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<InputFieldError>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InputFieldError {
    pub error: String,
    pub field: String,
}

impl RpcRequest {
    /// Build a request carrying `params`, expecting a response on `id`.
    pub fn request<P: Serialize>(
        id: impl Into<String>,
        method: impl Into<String>,
        params: &P,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params: Some(to_raw(params)?),
            id: Some(id.into()),
            notif: false,
        })
    }

    /// Build a server-originated notification. The id is a fresh UUID and no
    /// response is expected.
    pub fn notify<P: Serialize>(
        method: impl Into<String>,
        params: &P,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params: Some(to_raw(params)?),
            id: Some(Uuid::new_v4().to_string()),
            notif: true,
        })
    }

    /// Decode `params` into `T`. A missing `params` member is acceptable and
    /// yields `T::default()`.
    pub fn params_as<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        match &self.params {
            Some(raw) => serde_json::from_str(raw.get()),
            None => Ok(T::default()),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

impl RpcResponse {
    /// Successful response with a result.
    pub fn reply<R: Serialize>(
        id: impl Into<String>,
        result: &R,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: Some(to_raw(result)?),
            error: None,
            id: Some(id.into()),
        })
    }

    /// Error response on the triggering id. `code` is an HTTP-class status.
    pub fn reply_error(
        id: impl Into<String>,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                params: None,
            }),
            id: Some(id.into()),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn to_raw<T: Serialize>(value: &T) -> serde_json::Result<Box<RawValue>> {
    RawValue::from_string(serde_json::to_string(value)?)
}

/// Split a WebSocket text message into its coalesced JSON-RPC frames.
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n').filter(|line| !line.trim().is_empty())
}
