//! Durable key-value storage shared across contexts.
//!
//! The bridge never owns persistence; it consumes a [`DurableStore`]
//! implementation supplied by the embedder. Mutations are append/observe
//! only from the bridge's perspective, and subscribers receive
//! [`StoreEvent`]s in commit order.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

pub use memory::MemoryStore;

use crate::error::StoreError;

/// One committed mutation, as seen by subscribers.
///
/// `value` is `None` for removals.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub key: String,
    pub value: Option<Value>,
}

/// Persistent key-value storage with change subscription.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a key, returning the prior value if one existed.
    async fn remove(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Subscribe to committed mutations. Delivery is in commit order per
    /// store; ordering relative to other channels is unspecified.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Store key for a persisted approval request.
pub fn approval_key(request_id: &Uuid) -> String {
    format!("approval/{request_id}")
}

/// Store key for the per-network pending-transaction collection.
pub fn pending_tx_key(network: &str) -> String {
    format!("pending_tx/{network}")
}

/// Broadcast status of a pending transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// A transaction the signing backend has broadcast, awaiting confirmation.
///
/// Appended by the signing collaborator after broadcast; read-only to the
/// bridge, which observes appends through the store subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransactionRecord {
    pub hash: String,
    pub from: String,
    pub network: String,
    pub status: TxStatus,
}

/// Append a record to its per-network collection.
///
/// Provided for signing collaborators; the bridge itself never writes here.
pub async fn append_pending_tx(
    store: &dyn DurableStore,
    record: &PendingTransactionRecord,
) -> Result<(), StoreError> {
    let key = pending_tx_key(&record.network);
    let mut records = match store.get(&key).await? {
        Some(value) => parse_pending_txs(&key, &value)?,
        None => Vec::new(),
    };
    records.push(record.clone());
    let value = serde_json::to_value(&records).map_err(|err| StoreError::Corrupt {
        key: key.clone(),
        message: err.to_string(),
    })?;
    store.set(&key, value).await
}

/// Decode a per-network collection value into records.
pub fn parse_pending_txs(
    key: &str,
    value: &Value,
) -> Result<Vec<PendingTransactionRecord>, StoreError> {
    serde_json::from_value(value.clone()).map_err(|err| StoreError::Corrupt {
        key: key.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(hash: &str) -> PendingTransactionRecord {
        PendingTransactionRecord {
            hash: hash.to_string(),
            from: "0xabc".to_string(),
            network: "137".to_string(),
            status: TxStatus::Pending,
        }
    }

    #[tokio::test]
    async fn append_builds_a_per_network_collection() {
        let store = MemoryStore::new();
        append_pending_tx(&store, &record("0x01")).await.expect("append");
        append_pending_tx(&store, &record("0x02")).await.expect("append");

        let value = store
            .get(&pending_tx_key("137"))
            .await
            .expect("get")
            .expect("collection exists");
        let records = parse_pending_txs(&pending_tx_key("137"), &value).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].hash, "0x02");
    }

    #[test]
    fn status_serializes_lowercase() {
        let encoded = serde_json::to_value(record("0x01")).expect("valid json");
        assert_eq!(encoded["status"], "pending");
    }

    #[test]
    fn keys_are_stable() {
        let id = Uuid::nil();
        assert_eq!(
            approval_key(&id),
            "approval/00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(pending_tx_key("137"), "pending_tx/137");
    }
}
