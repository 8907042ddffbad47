//! Wire protocol between the page, the relay, and the privileged backend.
//!
//! Messages are ephemeral: they carry no identity beyond one hop. The
//! page-facing hop is loose-typed JSON so malformed traffic from untrusted
//! code is representable and droppable; the privileged hop carries parsed
//! [`BridgeMessage`]s.

mod port;
mod relay;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub use port::BridgePort;
pub use relay::Relay;

use crate::error::{BridgeError, WireError};

/// Origin of the embedding page, as observed by the relay.
///
/// Never taken from message content; the relay stamps it from its own
/// knowledge of the connection so page scripts cannot spoof it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageOrigin(String);

impl PageOrigin {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    /// Normalized `scheme://host[:port]` form of a page URL.
    pub fn from_url(url: &Url) -> Self {
        Self(url.origin().ascii_serialization())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One-hop message between contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeMessage {
    #[serde(rename = "REQUEST")]
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<PageOrigin>,
    },

    #[serde(rename = "RESPONSE")]
    Response {
        id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },

    /// Unsolicited push; carries no correlation id.
    #[serde(rename = "DISCONNECT")]
    Disconnect,
}

impl BridgeMessage {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
            origin: None,
        }
    }

    pub fn success(id: u64, result: Value) -> Self {
        Self::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, error: WireError) -> Self {
        Self::Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(*id),
            Self::Disconnect => None,
        }
    }

    /// Shape rules for relayed traffic: `type` + numeric `id` for
    /// REQUEST/RESPONSE (REQUEST also needs a method), `type` alone for
    /// DISCONNECT.
    pub fn validate_shape(value: &Value) -> Result<(), BridgeError> {
        let Some(object) = value.as_object() else {
            return Err(BridgeError::NotAnObject);
        };
        match object.get("type").and_then(Value::as_str) {
            Some("REQUEST") => {
                if !object.get("id").is_some_and(Value::is_u64) {
                    return Err(BridgeError::MissingId);
                }
                let has_method = object
                    .get("method")
                    .and_then(Value::as_str)
                    .is_some_and(|method| !method.is_empty());
                if !has_method {
                    return Err(BridgeError::MissingMethod);
                }
                Ok(())
            }
            Some("RESPONSE") => {
                if !object.get("id").is_some_and(Value::is_u64) {
                    return Err(BridgeError::MissingId);
                }
                Ok(())
            }
            Some("DISCONNECT") => Ok(()),
            _ => Err(BridgeError::UnknownType),
        }
    }

    /// Parse a message arriving from an untrusted hop.
    pub fn from_untrusted(value: &Value) -> Result<Self, BridgeError> {
        Self::validate_shape(value)?;
        serde_json::from_value(value.clone()).map_err(|err| BridgeError::Malformed {
            message: err.to_string(),
        })
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
