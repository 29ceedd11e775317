//! Application envelope carried inside non-control frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error code used for every authentication failure.
pub const AUTH_FAILURE_CODE: i32 = 666;

/// Error code returned when an authenticated request names an unknown method.
pub const METHOD_NOT_FOUND_CODE: i32 = 404;

/// Structured error attached to a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResError {
    pub code: i32,
    pub message: String,
}

/// A request, reply or pushed event.
///
/// Requests carry `method` (and usually `id` and `params`); replies echo the
/// request `id` and carry either `result` or `error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResError>,
}

impl Message {
    /// Build a request for `method`.
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.into()),
            params,
            ..Default::default()
        }
    }

    /// Successful reply to the request with `id`.
    pub fn reply(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            ..Default::default()
        }
    }

    /// Error reply to the request with `id`.
    pub fn error_reply(id: Option<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(ResError {
                code,
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    /// Parse an envelope from a frame payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Serialize to a frame payload.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Method name, if this is a request.
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Fetch a string parameter from an object-shaped `params`.
    pub fn string_param(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }
}
