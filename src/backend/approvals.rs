//! Pending-approval bookkeeping.
//!
//! An [`ApprovalRequest`] is parked here between the moment a sensitive
//! method arrives and the moment exactly one surface resolution consumes it.
//! Consumption removes the entry; a second resolution attempt observes
//! nothing and fails closed. That single-owner-consume step is the only
//! concurrency control guarding against double resolution.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::backend::method::{FeeOverrides, SignPayload, TransactionPayload, TypedDataVersion};
use crate::bridge::PageOrigin;
use crate::calldata;
use crate::error::{StoreError, WireError};
use crate::store::{DurableStore, approval_key};

/// Category of human decision a request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalKind {
    Connect,
    Transaction,
    Sign,
    SignTypedData,
    TokenApproval,
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Transaction => "transaction",
            Self::Sign => "sign",
            Self::SignTypedData => "signTypedData",
            Self::TokenApproval => "tokenApproval",
        };
        f.write_str(name)
    }
}

/// Kind-specific content of an approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApprovalPayload {
    Connect,
    Transaction { tx: TransactionPayload },
    /// `raw` marks `eth_sign`, which signs arbitrary bytes blind.
    Message { sign: SignPayload, raw: bool },
    TypedData {
        version: TypedDataVersion,
        address: String,
        data: Value,
    },
}

impl ApprovalPayload {
    /// Derive the approval kind, upgrading token-approve calldata.
    pub fn classify(&self) -> ApprovalKind {
        match self {
            Self::Connect => ApprovalKind::Connect,
            Self::Transaction { tx } => {
                let is_token_approve = tx
                    .data
                    .as_deref()
                    .is_some_and(calldata::is_erc20_approve);
                if is_token_approve {
                    ApprovalKind::TokenApproval
                } else {
                    ApprovalKind::Transaction
                }
            }
            Self::Message { .. } => ApprovalKind::Sign,
            Self::TypedData { .. } => ApprovalKind::SignTypedData,
        }
    }
}

/// A sensitive request awaiting a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: Uuid,
    pub origin: PageOrigin,
    pub kind: ApprovalKind,
    pub payload: ApprovalPayload,
    /// Decimal network id at creation time; scopes completion matching.
    pub network: String,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(origin: PageOrigin, payload: ApprovalPayload, network: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            origin,
            kind: payload.classify(),
            payload,
            network: network.into(),
            created_at: Utc::now(),
        }
    }
}

/// The decision a surface reports. Exactly one per request, ever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApprovalOutcome {
    Approve { fees: Option<FeeOverrides> },
    Reject { reason: RejectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UserDenied,
    SurfaceClosed,
}

/// Why the backend refused a resolution attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveDenied {
    #[error("approval request not found or already consumed")]
    NotFound,

    #[error("upstream failure: {0}")]
    Upstream(WireError),
}

/// Live approval requests, consumed exactly once.
///
/// The in-process map is authoritative; every mutation is mirrored into the
/// durable store under `approval/{requestId}` so other contexts can observe
/// liveness after a crash.
pub struct ApprovalLedger {
    entries: Mutex<HashMap<Uuid, ApprovalRequest>>,
    store: Arc<dyn DurableStore>,
}

impl ApprovalLedger {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Park a new request.
    pub async fn insert(&self, request: ApprovalRequest) -> Result<(), StoreError> {
        let key = approval_key(&request.request_id);
        let value = serde_json::to_value(&request).map_err(|err| StoreError::Corrupt {
            key: key.clone(),
            message: err.to_string(),
        })?;
        self.lock().insert(request.request_id, request);
        self.store.set(&key, value).await
    }

    /// Non-consuming read, used by a loading surface.
    pub fn peek(&self, request_id: &Uuid) -> Option<ApprovalRequest> {
        self.lock().get(request_id).cloned()
    }

    /// Consume a request. The first caller wins; every later caller sees
    /// `None` and must fail closed.
    pub async fn take(&self, request_id: &Uuid) -> Result<Option<ApprovalRequest>, StoreError> {
        let removed = self.lock().remove(request_id);
        if removed.is_some() {
            self.store.remove(&approval_key(request_id)).await?;
        }
        Ok(removed)
    }

    /// Put a consumed request back after a failed signing attempt so the
    /// surface can retry in place.
    pub async fn restore(&self, request: ApprovalRequest) -> Result<(), StoreError> {
        self.insert(request).await
    }

    /// Whether the origin already has a live request of this kind.
    pub fn contains_kind(&self, origin: &PageOrigin, kind: ApprovalKind) -> bool {
        self.lock()
            .values()
            .any(|request| request.origin == *origin && request.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ApprovalRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
