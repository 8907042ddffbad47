//! In-process message ports connecting execution contexts.
//!
//! Contexts share no memory; a [`BridgePort`] pair is the only path between
//! them. Payloads are raw JSON values so the untrusted side can emit
//! anything it likes.

use serde_json::Value;
use tokio::sync::mpsc;

/// One end of a duplex message channel.
#[derive(Debug)]
pub struct BridgePort {
    tx: mpsc::Sender<Value>,
    rx: mpsc::Receiver<Value>,
}

impl BridgePort {
    /// Create a connected pair of ends.
    pub fn pair(capacity: usize) -> (BridgePort, BridgePort) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            BridgePort { tx: a_tx, rx: a_rx },
            BridgePort { tx: b_tx, rx: b_rx },
        )
    }

    /// Deliver one message. Returns `false` when the peer end is gone.
    pub async fn send(&self, value: Value) -> bool {
        self.tx.send(value).await.is_ok()
    }

    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Break into halves for tasks that pump each direction separately.
    pub fn split(self) -> (mpsc::Sender<Value>, mpsc::Receiver<Value>) {
        (self.tx, self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn pair_delivers_in_both_directions() {
        let (mut left, mut right) = BridgePort::pair(4);

        assert!(left.send(json!({"n": 1})).await);
        assert_eq!(right.recv().await, Some(json!({"n": 1})));

        assert!(right.send(json!({"n": 2})).await);
        assert_eq!(left.recv().await, Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn send_reports_a_dropped_peer() {
        let (left, right) = BridgePort::pair(1);
        drop(right);
        assert!(!left.send(json!(null)).await);
    }
}
