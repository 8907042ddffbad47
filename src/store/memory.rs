//! In-memory reference store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::store::{DurableStore, StoreEvent};

const EVENT_CAPACITY: usize = 64;

/// Map-backed [`DurableStore`] used for embedding and tests.
///
/// The map lock is held across the event send so subscribers observe
/// mutations in commit order.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value.clone());
        let _ = self.events.send(StoreEvent {
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let prior = entries.remove(key);
        if prior.is_some() {
            let _ = self.events.send(StoreEvent {
                key: key.to_string(),
                value: None,
            });
        }
        Ok(prior)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Backend {
        message: "store lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("a", json!({"n": 1})).await.expect("set");
        assert_eq!(store.get("a").await.expect("get"), Some(json!({"n": 1})));
        assert_eq!(store.get("missing").await.expect("get"), None);
    }

    #[tokio::test]
    async fn subscribers_see_mutations_in_commit_order() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        store.set("a", json!(1)).await.expect("set");
        store.set("b", json!(2)).await.expect("set");
        store.remove("a").await.expect("remove");

        let first = events.recv().await.expect("event");
        assert_eq!(first.key, "a");
        assert_eq!(first.value, Some(json!(1)));

        let second = events.recv().await.expect("event");
        assert_eq!(second.key, "b");

        let third = events.recv().await.expect("event");
        assert_eq!(third.key, "a");
        assert_eq!(third.value, None);
    }

    #[tokio::test]
    async fn removing_a_missing_key_emits_nothing() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();

        assert_eq!(store.remove("ghost").await.expect("remove"), None);
        store.set("real", json!(true)).await.expect("set");

        // The only delivered event is the set that followed the no-op remove.
        let event = events.recv().await.expect("event");
        assert_eq!(event.key, "real");
    }
}
