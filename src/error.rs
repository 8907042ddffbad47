//! Error types for the bridge runtime.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// EIP-1193 user rejected request.
pub const CODE_USER_REJECTED: i64 = 4001;
/// EIP-1193 unauthorized (no qualifying gesture, no permission).
pub const CODE_UNAUTHORIZED: i64 = 4100;
/// EIP-1193 provider disconnected from all chains.
pub const CODE_DISCONNECTED: i64 = 4900;
/// Requested chain has not been added to the wallet.
pub const CODE_CHAIN_NOT_ADDED: i64 = 4902;
/// A request of the same kind is already pending for the origin.
pub const CODE_ALREADY_PENDING: i64 = -32002;
/// Pending-request table is full.
pub const CODE_LIMIT_EXCEEDED: i64 = -32005;
/// Malformed or unsupported method parameters.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// Internal failure, including local timeouts.
pub const CODE_INTERNAL: i64 = -32603;

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Bridge message error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Advisory error: {0}")]
    Advisory(#[from] AdvisoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Error payload carried inside a RESPONSE message.
///
/// This is the only error shape the page ever sees; privileged-side
/// diagnostics are mapped into it before crossing the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

impl WireError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_rejected() -> Self {
        Self::new(CODE_USER_REJECTED, "User rejected the request.")
    }

    pub fn already_pending() -> Self {
        Self::new(
            CODE_ALREADY_PENDING,
            "A request of this kind is already pending for this origin.",
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL, message)
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

/// Failures surfaced to page callers as rejected requests.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("User rejected the request")]
    UserRejected,

    #[error("Request timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("A request of this kind is already pending")]
    AlreadyPending,

    #[error("Provider is disconnected")]
    Disconnected,

    #[error("Pending request limit ({max}) exceeded")]
    TooManyRequests { max: usize },

    #[error("Upstream failure ({code}): {message}")]
    Upstream { code: i64, message: String },
}

impl ProviderError {
    /// Numeric code in the EIP-1193/EIP-1474 namespace.
    pub fn code(&self) -> i64 {
        match self {
            Self::PermissionDenied { .. } => CODE_UNAUTHORIZED,
            Self::UserRejected => CODE_USER_REJECTED,
            Self::Timeout { .. } => CODE_INTERNAL,
            Self::AlreadyPending => CODE_ALREADY_PENDING,
            Self::Disconnected => CODE_DISCONNECTED,
            Self::TooManyRequests { .. } => CODE_LIMIT_EXCEEDED,
            Self::Upstream { code, .. } => *code,
        }
    }

    /// Reconstruct from a wire payload, collapsing unknown codes into
    /// `Upstream` so the original message always survives verbatim.
    pub fn from_wire(error: WireError) -> Self {
        match error.code {
            CODE_USER_REJECTED => Self::UserRejected,
            CODE_UNAUTHORIZED => Self::PermissionDenied {
                reason: error.message,
            },
            CODE_DISCONNECTED => Self::Disconnected,
            CODE_ALREADY_PENDING => Self::AlreadyPending,
            _ => Self::Upstream {
                code: error.code,
                message: error.message,
            },
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError::new(self.code(), self.to_string())
    }
}

/// Approval-surface and approval-ledger errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval request {request_id} not found")]
    NotFound { request_id: Uuid },

    #[error("Session is locked")]
    SessionLocked,

    #[error("Session unlock failed: invalid passphrase")]
    UnlockFailed,

    #[error("Surface cannot {action} in state {state}")]
    NotReady { action: &'static str, state: String },

    #[error("Signing failed: {0}")]
    Signing(WireError),
}

/// Shape-validation failures for relayed messages.
///
/// Never surfaced to the page; the relay logs the reason and drops.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Missing or unrecognized type tag")]
    UnknownType,

    #[error("Missing or non-numeric correlation id")]
    MissingId,

    #[error("Missing method name")]
    MissingMethod,

    #[error("Malformed message: {message}")]
    Malformed { message: String },
}

/// Durable-store errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend failure: {message}")]
    Backend { message: String },

    #[error("Malformed record at {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Advisory-collaborator errors. Always degraded, never blocking.
#[derive(Debug, thiserror::Error)]
pub enum AdvisoryError {
    #[error("Lookup timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed oracle response: {message}")]
    Malformed { message: String },
}

/// Configuration-related errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for the bridge.
pub type Result<T> = std::result::Result<T, Error>;
