//! Provider-identity discovery.
//!
//! Several wallet providers can coexist in one page. Rather than letting a
//! late arrival overwrite the well-known accessor, every provider announces
//! an identity on a shared bus. Announcements repeat on a fixed schedule to
//! catch late-registering listeners and replay on explicit discovery
//! requests. The registry keeps the first installed provider in its slot and
//! records competitors as alternates.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Stable identity a provider announces about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Stable per-install id, not per-announcement.
    pub uuid: Uuid,
    pub name: String,
    /// Data URL, so listeners need no extra fetch to render it.
    pub icon: String,
    /// Reverse-DNS vendor identifier.
    pub rdns: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    Announce(ProviderIdentity),
    Request,
}

/// Broadcast bus carrying discovery traffic for one page.
#[derive(Debug, Clone)]
pub struct DiscoveryBus {
    tx: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.tx.subscribe()
    }

    pub fn announce(&self, identity: ProviderIdentity) {
        let _ = self.tx.send(DiscoveryEvent::Announce(identity));
    }

    /// Ask every live announcer to re-broadcast.
    pub fn request(&self) {
        let _ = self.tx.send(DiscoveryEvent::Request);
    }
}

impl Default for DiscoveryBus {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Background task re-announcing one identity on schedule and on demand.
pub struct Announcer;

impl Announcer {
    pub fn spawn(
        bus: DiscoveryBus,
        identity: ProviderIdentity,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut inbound = bus.subscribe();
            // First tick fires immediately, covering the on-load announce.
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => bus.announce(identity.clone()),
                    event = inbound.recv() => match event {
                        Ok(DiscoveryEvent::Request) => bus.announce(identity.clone()),
                        Ok(DiscoveryEvent::Announce(_)) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "announcer fell behind on discovery traffic");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }
}

/// First-install-wins provider registration.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    slots: Mutex<Slots>,
}

#[derive(Debug, Default)]
struct Slots {
    primary: Option<ProviderIdentity>,
    alternates: Vec<ProviderIdentity>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the identity holds the primary slot afterwards.
    /// A competing identity never displaces an installed one; it is recorded
    /// as an alternate instead.
    pub fn record(&self, identity: ProviderIdentity) -> bool {
        let mut slots = self.lock();
        match &slots.primary {
            None => {
                slots.primary = Some(identity);
                true
            }
            Some(primary) if primary.uuid == identity.uuid => true,
            Some(_) => {
                if !slots.alternates.iter().any(|alt| alt.uuid == identity.uuid) {
                    debug!(name = %identity.name, "competing provider recorded as alternate");
                    slots.alternates.push(identity);
                }
                false
            }
        }
    }

    pub fn primary(&self) -> Option<ProviderIdentity> {
        self.lock().primary.clone()
    }

    pub fn alternates(&self) -> Vec<ProviderIdentity> {
        self.lock().alternates.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
