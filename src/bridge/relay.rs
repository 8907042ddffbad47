//! Stateless forwarder between the page and the privileged backend.
//!
//! The relay interprets no method semantics. It shape-checks inbound page
//! traffic, stamps the genuine page origin onto forwarded requests, and
//! passes privileged responses and disconnect pushes back verbatim.
//! Malformed traffic is dropped without any reply so untrusted code learns
//! nothing from probing.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bridge::port::BridgePort;
use crate::bridge::{BridgeMessage, PageOrigin};

/// Pass-through relay for one page connection.
#[derive(Debug)]
pub struct Relay {
    origin: PageOrigin,
}

impl Relay {
    pub fn new(origin: PageOrigin) -> Self {
        Self { origin }
    }

    /// Pump both directions until either side disconnects.
    pub fn spawn(
        self,
        page: BridgePort,
        to_backend: mpsc::Sender<BridgeMessage>,
        from_backend: mpsc::Receiver<BridgeMessage>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(page, to_backend, from_backend))
    }

    async fn run(
        self,
        page: BridgePort,
        to_backend: mpsc::Sender<BridgeMessage>,
        mut from_backend: mpsc::Receiver<BridgeMessage>,
    ) {
        let (page_tx, mut page_rx) = page.split();
        loop {
            tokio::select! {
                inbound = page_rx.recv() => {
                    let Some(value) = inbound else {
                        debug!(origin = %self.origin, "page port closed, relay stopping");
                        break;
                    };
                    let message = match BridgeMessage::from_untrusted(&value) {
                        Ok(message) => self.tag_origin(message),
                        Err(reason) => {
                            debug!(origin = %self.origin, %reason, "dropping malformed bridge message");
                            continue;
                        }
                    };
                    if to_backend.send(message).await.is_err() {
                        debug!(origin = %self.origin, "backend channel closed, relay stopping");
                        break;
                    }
                }
                outbound = from_backend.recv() => {
                    let Some(message) = outbound else {
                        debug!(origin = %self.origin, "backend output closed, relay stopping");
                        break;
                    };
                    if page_tx.send(message.to_value()).await.is_err() {
                        debug!(origin = %self.origin, "page port gone, relay stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Requests carry the relay's knowledge of the origin, never the page's.
    fn tag_origin(&self, message: BridgeMessage) -> BridgeMessage {
        match message {
            BridgeMessage::Request {
                id, method, params, ..
            } => BridgeMessage::Request {
                id,
                method,
                params,
                origin: Some(self.origin.clone()),
            },
            other => other,
        }
    }
}
