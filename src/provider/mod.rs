//! Page-context client.
//!
//! The [`PageClient`] is the request API injected into the untrusted page.
//! It owns the pending-request table, allocates strictly increasing
//! correlation ids, enforces the user-gesture admission policy for
//! `eth_requestAccounts`, and emits lifecycle events exactly once per
//! observed state transition. Everything it sends crosses a [`BridgePort`]
//! to the relay; it never talks to the privileged backend directly.

pub mod discovery;
pub mod events;
pub mod gesture;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bridge::{BridgeMessage, BridgePort};
use crate::chain::ChainRef;
use crate::config::BridgeConfig;
use crate::error::{CODE_DISCONNECTED, ProviderError, WireError};
use crate::provider::events::ProviderEvent;
use crate::provider::gesture::{GestureMonitor, InputKind};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Default)]
struct ClientState {
    accounts: Vec<String>,
    chain: Option<ChainRef>,
    connected: bool,
}

type PendingReply = oneshot::Sender<Result<Value, WireError>>;

/// The injected provider client. One instance per page context.
pub struct PageClient {
    config: BridgeConfig,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingReply>>,
    to_relay: mpsc::Sender<Value>,
    events: broadcast::Sender<ProviderEvent>,
    state: Mutex<ClientState>,
    gestures: GestureMonitor,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl PageClient {
    /// Attach to the page end of a bridge port and start the response pump.
    pub fn connect(port: BridgePort, config: BridgeConfig) -> Arc<Self> {
        let (to_relay, from_relay) = port.split();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let client = Arc::new(Self {
            gestures: GestureMonitor::new(config.gesture_window),
            config,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            to_relay,
            events,
            state: Mutex::new(ClientState::default()),
            pump: Mutex::new(None),
        });
        let pump = tokio::spawn(Self::pump(Arc::downgrade(&client), from_relay));
        *client.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        info!("page client connected");
        client
    }

    /// Report a raw page input event for gesture admission.
    pub fn on_input(&self, kind: InputKind) {
        self.gestures.record(kind);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    pub fn accounts(&self) -> Vec<String> {
        self.lock_state().accounts.clone()
    }

    pub fn chain(&self) -> Option<ChainRef> {
        self.lock_state().chain
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().connected
    }

    /// Prime the cached chain id with a silent round trip.
    pub async fn sync_chain(&self) -> Result<(), ProviderError> {
        self.request("eth_chainId", Value::Array(vec![])).await?;
        Ok(())
    }

    /// Issue one request and await its response.
    ///
    /// Allocates a fresh correlation id, posts a REQUEST over the relay and
    /// waits up to the configured timeout for the matching RESPONSE. A
    /// timeout deletes the local entry; a reply arriving later is ignored.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        if method == "eth_requestAccounts" && !self.gestures.has_recent() {
            // Admission fails locally: the backend is never contacted.
            return Err(ProviderError::PermissionDenied {
                reason: "eth_requestAccounts requires a recent user gesture".to_string(),
            });
        }

        // Captured up front: on success the switched-to chain is applied to
        // local state before any caller observes the result.
        let chain_target = requested_chain(method, &params);

        let (reply, rx) = oneshot::channel();
        let id = {
            let mut pending = self.lock_pending();
            if pending.len() >= self.config.max_pending_requests {
                return Err(ProviderError::TooManyRequests {
                    max: self.config.max_pending_requests,
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            pending.insert(id, reply);
            id
        };

        let message = BridgeMessage::request(id, method, params).to_value();
        if self.to_relay.send(message).await.is_err() {
            self.lock_pending().remove(&id);
            return Err(ProviderError::Disconnected);
        }

        let outcome = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.lock_pending().remove(&id);
                return Err(ProviderError::Disconnected);
            }
            Err(_) => {
                self.lock_pending().remove(&id);
                debug!(id, method, "request timed out, entry deleted");
                return Err(ProviderError::Timeout {
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                });
            }
        };

        match outcome {
            Ok(value) => {
                self.absorb_success(method, chain_target, &value);
                Ok(value)
            }
            Err(wire) => Err(ProviderError::from_wire(wire)),
        }
    }

    async fn pump(client: Weak<PageClient>, mut from_relay: mpsc::Receiver<Value>) {
        while let Some(raw) = from_relay.recv().await {
            let Some(client) = client.upgrade() else { break };
            let message = match serde_json::from_value::<BridgeMessage>(raw) {
                Ok(message) => message,
                Err(err) => {
                    debug!(%err, "ignoring malformed message from relay");
                    continue;
                }
            };
            match message {
                BridgeMessage::Response { id, result, error } => {
                    client.deliver(id, result, error);
                }
                BridgeMessage::Disconnect => client.handle_disconnect(),
                BridgeMessage::Request { .. } => {
                    debug!("ignoring request addressed to the page");
                }
            }
        }
    }

    fn deliver(&self, id: u64, result: Option<Value>, error: Option<WireError>) {
        let Some(reply) = self.lock_pending().remove(&id) else {
            // Duplicate or post-timeout reply. Dropped without error.
            debug!(id, "stale correlation id ignored");
            return;
        };
        let outcome = match error {
            Some(wire) => Err(wire),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        let _ = reply.send(outcome);
    }

    /// Fold a successful response into cached state, emitting transition
    /// events. Events fire under the state lock so subscribers observe them
    /// in transition order.
    fn absorb_success(&self, method: &str, chain_target: Option<ChainRef>, value: &Value) {
        match method {
            "eth_requestAccounts" | "eth_accounts" => {
                if let Ok(accounts) = serde_json::from_value::<Vec<String>>(value.clone()) {
                    self.apply_accounts(accounts);
                }
            }
            "eth_chainId" | "net_version" => {
                if let Some(chain) = value.as_str().and_then(ChainRef::parse) {
                    self.apply_chain(chain);
                }
            }
            "wallet_switchEthereumChain" | "wallet_addEthereumChain" => {
                if let Some(chain) = chain_target {
                    self.apply_chain(chain);
                }
            }
            _ => {}
        }
    }

    fn apply_accounts(&self, accounts: Vec<String>) {
        let mut state = self.lock_state();
        let changed = state.accounts != accounts;
        if !state.connected && !accounts.is_empty() {
            state.connected = true;
            let chain_id = state
                .chain
                .map(|chain| chain.hex())
                .unwrap_or_else(|| "0x0".to_string());
            let _ = self.events.send(ProviderEvent::Connect { chain_id });
        }
        if changed {
            state.accounts = accounts.clone();
            let _ = self.events.send(ProviderEvent::AccountsChanged { accounts });
        }
    }

    fn apply_chain(&self, chain: ChainRef) {
        let mut state = self.lock_state();
        match state.chain {
            Some(current) if current == chain => {}
            Some(_) => {
                state.chain = Some(chain);
                let _ = self.events.send(ProviderEvent::ChainChanged {
                    chain_id: chain.hex(),
                });
                let _ = self.events.send(ProviderEvent::NetworkChanged {
                    network_id: chain.decimal(),
                });
            }
            // First observation primes the cache without an event.
            None => state.chain = Some(chain),
        }
    }

    fn handle_disconnect(&self) {
        let mut state = self.lock_state();
        let had_accounts = !state.accounts.is_empty();
        state.accounts.clear();
        if had_accounts {
            let _ = self.events.send(ProviderEvent::AccountsChanged { accounts: vec![] });
        }
        if state.connected {
            state.connected = false;
            info!("backend pushed disconnect");
            let _ = self.events.send(ProviderEvent::Disconnect {
                code: CODE_DISCONNECTED,
                message: "The provider is disconnected from all chains.".to_string(),
            });
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingReply>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PageClient {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take() {
            pump.abort();
        }
    }
}

/// Target chain of a switch/add round trip, read from the request params.
fn requested_chain(method: &str, params: &Value) -> Option<ChainRef> {
    match method {
        "wallet_switchEthereumChain" | "wallet_addEthereumChain" => params
            .get(0)?
            .get("chainId")?
            .as_str()
            .and_then(ChainRef::parse),
        _ => None,
    }
}
