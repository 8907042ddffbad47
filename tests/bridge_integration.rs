//! End-to-end tests over the full bridge wiring.
//!
//! Each test stands up a real PageClient, Relay and WalletBackend joined by
//! channels, with an in-memory durable store and scripted collaborators,
//! then drives page-side requests through the whole loop:
//! - gesture-gated connect, approval surface included
//! - silent reads that never open a surface
//! - origin tagging against a spoofing page
//! - chain switch round trip and its two event forms
//! - unsolicited disconnect push
//! - correlation-id monotonicity across mixed traffic

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;

use keyward::backend::approvals::ApprovalKind;
use keyward::backend::method::{AddChainPayload, SignPayload, TransactionPayload, TypedDataVersion};
use keyward::backend::{BackendHandle, NetworkDirectory, Signer, SurfaceOpener, WalletBackend};
use keyward::bridge::{BridgeMessage, BridgePort, PageOrigin, Relay};
use keyward::chain::ChainRef;
use keyward::config::BridgeConfig;
use keyward::error::{AdvisoryError, CODE_CHAIN_NOT_ADDED, ProviderError, WireError};
use keyward::provider::PageClient;
use keyward::provider::events::ProviderEvent;
use keyward::provider::gesture::InputKind;
use keyward::session::SessionGate;
use keyward::store::MemoryStore;
use keyward::surface::advisory::AdvisoryEngine;
use keyward::surface::oracles::{
    FeeOracle, FeeTiers, PriceOracle, RiskLevel, SecurityOracle, SignatureLookup,
};
use keyward::surface::{ApprovalSurface, Resolution, SurfaceState};
use rust_decimal::Decimal;
use secrecy::SecretString;

const TIMEOUT: Duration = Duration::from_secs(5);
const PASSPHRASE: &str = "correct horse battery";

struct StaticSigner;

#[async_trait]
impl Signer for StaticSigner {
    async fn accounts(&self, _origin: &PageOrigin) -> Result<Vec<String>, WireError> {
        Ok(vec![])
    }

    async fn approve_connection(&self, _origin: &PageOrigin) -> Result<Vec<String>, WireError> {
        Ok(vec!["0xa11ce".to_string()])
    }

    async fn sign_transaction(&self, _tx: &TransactionPayload) -> Result<String, WireError> {
        Ok("0xhash".to_string())
    }

    async fn sign_message(&self, _payload: &SignPayload) -> Result<String, WireError> {
        Ok("0xsig".to_string())
    }

    async fn sign_typed_data(
        &self,
        _version: TypedDataVersion,
        _address: &str,
        _data: &Value,
    ) -> Result<String, WireError> {
        Ok("0xsig".to_string())
    }
}

/// Chain registry over a fixed set of known networks.
struct StaticNetworks {
    current: Mutex<u64>,
}

impl StaticNetworks {
    fn new() -> Self {
        Self {
            current: Mutex::new(1),
        }
    }
}

#[async_trait]
impl NetworkDirectory for StaticNetworks {
    async fn current_chain(&self) -> ChainRef {
        ChainRef::new(*self.current.lock().expect("lock"))
    }

    async fn switch_chain(&self, chain: ChainRef) -> Result<(), WireError> {
        if ![1, 137].contains(&chain.id()) {
            return Err(WireError::new(
                CODE_CHAIN_NOT_ADDED,
                format!("Unrecognized chain {}", chain.hex()),
            ));
        }
        *self.current.lock().expect("lock") = chain.id();
        Ok(())
    }

    async fn add_chain(&self, spec: &AddChainPayload) -> Result<(), WireError> {
        if let Some(chain) = spec.chain() {
            *self.current.lock().expect("lock") = chain.id();
        }
        Ok(())
    }

    async fn rpc(&self, method: &str, _params: &Value) -> Result<Value, WireError> {
        Ok(json!({ "method": method }))
    }
}

struct ChannelOpener {
    tx: mpsc::UnboundedSender<Uuid>,
}

#[async_trait]
impl SurfaceOpener for ChannelOpener {
    async fn open(&self, request_id: Uuid) {
        let _ = self.tx.send(request_id);
    }
}

struct NoFees;

#[async_trait]
impl FeeOracle for NoFees {
    async fn fee_tiers(&self, _network: &str) -> Result<FeeTiers, AdvisoryError> {
        Err(AdvisoryError::Malformed {
            message: "offline".to_string(),
        })
    }
}

struct NoPrice;

#[async_trait]
impl PriceOracle for NoPrice {
    async fn native_price(&self, _network: &str) -> Result<Decimal, AdvisoryError> {
        Err(AdvisoryError::Malformed {
            message: "offline".to_string(),
        })
    }
}

struct NoLookup;

#[async_trait]
impl SignatureLookup for NoLookup {
    async fn lookup(&self, _selector: [u8; 4]) -> Result<Option<String>, AdvisoryError> {
        Ok(None)
    }
}

struct CalmSecurity;

#[async_trait]
impl SecurityOracle for CalmSecurity {
    async fn assess(&self, _origin: &str, _to: Option<&str>) -> Result<RiskLevel, AdvisoryError> {
        Ok(RiskLevel::Benign)
    }
}

struct Rig {
    client: Arc<PageClient>,
    handle: BackendHandle,
    opened: mpsc::UnboundedReceiver<Uuid>,
    store: Arc<MemoryStore>,
    session: Arc<SessionGate>,
    advisory: Arc<AdvisoryEngine>,
    config: BridgeConfig,
}

/// Join a PageClient, a Relay and a WalletBackend with live channels.
fn wire(origin: &str) -> Rig {
    let config = BridgeConfig::default();
    let (page_port, relay_port) = BridgePort::pair(16);
    let client = PageClient::connect(page_port, config.clone());

    let (to_backend_tx, to_backend_rx) = mpsc::channel(16);
    let (from_backend_tx, from_backend_rx) = mpsc::channel(16);
    Relay::new(PageOrigin::new(origin)).spawn(relay_port, to_backend_tx, from_backend_rx);

    let store = Arc::new(MemoryStore::new());
    let (open_tx, opened) = mpsc::unbounded_channel();
    let backend = WalletBackend::new(
        store.clone(),
        Arc::new(StaticSigner),
        Arc::new(StaticNetworks::new()),
        Arc::new(ChannelOpener { tx: open_tx }),
    );
    let handle = backend.spawn(to_backend_rx, from_backend_tx);

    let session = Arc::new(SessionGate::new(SecretString::from(PASSPHRASE)));
    session
        .unlock(PASSPHRASE, Duration::from_secs(3_600))
        .expect("unlock");
    let advisory = Arc::new(AdvisoryEngine::new(
        Arc::new(NoFees),
        Arc::new(NoPrice),
        Arc::new(NoLookup),
        Arc::new(CalmSecurity),
        Duration::from_millis(100),
    ));

    Rig {
        client,
        handle,
        opened,
        store,
        session,
        advisory,
        config,
    }
}

fn surface_for(rig: &Rig, request_id: Uuid) -> ApprovalSurface {
    ApprovalSurface::new(
        request_id,
        rig.handle.link(),
        rig.store.clone(),
        rig.session.clone(),
        rig.advisory.clone(),
        &rig.config,
    )
}

#[tokio::test]
async fn connect_flow_opens_one_surface_and_updates_the_page() {
    let mut rig = wire("https://dapp.example");
    let mut events = rig.client.subscribe();
    rig.client.on_input(InputKind::Click);

    let request = tokio::spawn({
        let client = rig.client.clone();
        async move { client.request("eth_requestAccounts", json!([])).await }
    });

    let request_id = timeout(TIMEOUT, rig.opened.recv())
        .await
        .expect("surface should open")
        .expect("opener channel");

    let mut surface = surface_for(&rig, request_id);
    surface.load().await;
    assert_eq!(surface.state(), &SurfaceState::Ready);
    let parked = surface.request().expect("request loaded");
    assert_eq!(parked.kind, ApprovalKind::Connect);
    assert_eq!(parked.origin.as_str(), "https://dapp.example");

    let state = surface.approve(None).await.expect("approve");
    assert_eq!(state, SurfaceState::Resolved(Resolution::Success));

    let accounts = timeout(TIMEOUT, request)
        .await
        .expect("page resolves")
        .expect("join")
        .expect("approved");
    assert_eq!(accounts, json!(["0xa11ce"]));
    assert_eq!(rig.client.accounts(), vec!["0xa11ce".to_string()]);

    match timeout(TIMEOUT, events.recv()).await.expect("event").expect("open") {
        ProviderEvent::Connect { .. } => {}
        other => panic!("Expected connect first, got {other:?}"),
    }
    match timeout(TIMEOUT, events.recv()).await.expect("event").expect("open") {
        ProviderEvent::AccountsChanged { accounts } => {
            assert_eq!(accounts, vec!["0xa11ce".to_string()]);
        }
        other => panic!("Expected accountsChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn request_accounts_without_gesture_never_reaches_the_backend() {
    let mut rig = wire("https://dapp.example");

    let result = rig.client.request("eth_requestAccounts", json!([])).await;
    match result {
        Err(ProviderError::PermissionDenied { .. }) => {}
        other => panic!("Expected PermissionDenied, got {other:?}"),
    }

    // A stale gesture is just as inadmissible.
    rig.client.on_input(InputKind::MouseMove);
    let result = rig.client.request("eth_requestAccounts", json!([])).await;
    assert!(matches!(result, Err(ProviderError::PermissionDenied { .. })));

    // Prove the backend stayed idle: a read issued afterwards is answered
    // while no surface was ever opened.
    let chain = rig
        .client
        .request("eth_chainId", json!([]))
        .await
        .expect("read");
    assert_eq!(chain, json!("0x1"));
    assert!(rig.opened.try_recv().is_err());
}

#[tokio::test]
async fn eth_accounts_is_always_silent() {
    let mut rig = wire("https://dapp.example");
    rig.client.on_input(InputKind::Click);

    let accounts = rig
        .client
        .request("eth_accounts", json!([]))
        .await
        .expect("silent read");
    assert_eq!(accounts, json!([]));
    assert!(rig.opened.try_recv().is_err());
}

#[tokio::test]
async fn relay_overwrites_a_spoofed_origin() {
    // Drive the page port by hand, as a hostile page would.
    let (page_port, relay_port) = BridgePort::pair(16);
    let (to_backend_tx, mut to_backend_rx) = mpsc::channel(16);
    let (_from_backend_tx, from_backend_rx) = mpsc::channel(16);
    Relay::new(PageOrigin::new("https://genuine.example")).spawn(
        relay_port,
        to_backend_tx,
        from_backend_rx,
    );
    let (tx, _rx) = page_port.split();

    // Malformed traffic first: no id, wrong type. Both vanish silently.
    tx.send(json!({"type": "REQUEST", "method": "eth_chainId"}))
        .await
        .expect("port open");
    tx.send(json!({"type": "GIFT", "id": 4})).await.expect("port open");

    // A shape-valid request with a forged origin field.
    tx.send(json!({
        "type": "REQUEST",
        "id": 7,
        "method": "eth_chainId",
        "params": [],
        "origin": "https://forged.example",
    }))
    .await
    .expect("port open");

    let forwarded = timeout(TIMEOUT, to_backend_rx.recv())
        .await
        .expect("forwarded")
        .expect("relay alive");
    match forwarded {
        BridgeMessage::Request { id, origin, .. } => {
            assert_eq!(id, 7, "malformed frames must not have been forwarded");
            assert_eq!(
                origin.expect("tagged").as_str(),
                "https://genuine.example"
            );
        }
        other => panic!("Expected Request, got {other:?}"),
    }
}

#[tokio::test]
async fn chain_switch_round_trip_emits_both_event_forms() {
    let rig = wire("https://dapp.example");
    rig.client.sync_chain().await.expect("prime");
    assert_eq!(rig.client.chain(), Some(ChainRef::new(1)));
    let mut events = rig.client.subscribe();

    rig.client
        .request("wallet_switchEthereumChain", json!([{"chainId": "0x89"}]))
        .await
        .expect("switch");

    assert_eq!(rig.client.chain(), Some(ChainRef::new(137)));
    assert_eq!(
        timeout(TIMEOUT, events.recv()).await.expect("event").expect("open"),
        ProviderEvent::ChainChanged {
            chain_id: "0x89".to_string()
        }
    );
    assert_eq!(
        timeout(TIMEOUT, events.recv()).await.expect("event").expect("open"),
        ProviderEvent::NetworkChanged {
            network_id: "137".to_string()
        }
    );

    // The backend followed: reads now answer from the switched chain.
    let chain = rig.client.request("eth_chainId", json!([])).await.expect("read");
    assert_eq!(chain, json!("0x89"));

    // An unknown chain is refused with the standard code.
    let result = rig
        .client
        .request("wallet_switchEthereumChain", json!([{"chainId": "0xfafa"}]))
        .await;
    match result {
        Err(ProviderError::Upstream { code, .. }) => assert_eq!(code, CODE_CHAIN_NOT_ADDED),
        other => panic!("Expected upstream 4902, got {other:?}"),
    }
    // Local chain state is untouched by the failed switch.
    assert_eq!(rig.client.chain(), Some(ChainRef::new(137)));
}

#[tokio::test]
async fn disconnect_push_reaches_page_listeners() {
    let mut rig = wire("https://dapp.example");
    rig.client.on_input(InputKind::Click);

    // Connect first so there is state to tear down.
    let request = tokio::spawn({
        let client = rig.client.clone();
        async move { client.request("eth_requestAccounts", json!([])).await }
    });
    let request_id = timeout(TIMEOUT, rig.opened.recv())
        .await
        .expect("surface")
        .expect("opener channel");
    let mut surface = surface_for(&rig, request_id);
    surface.load().await;
    surface.approve(None).await.expect("approve");
    request.await.expect("join").expect("approved");

    let mut events = rig.client.subscribe();
    assert!(rig.handle.push_disconnect().await);

    assert_eq!(
        timeout(TIMEOUT, events.recv()).await.expect("event").expect("open"),
        ProviderEvent::AccountsChanged { accounts: vec![] }
    );
    match timeout(TIMEOUT, events.recv()).await.expect("event").expect("open") {
        ProviderEvent::Disconnect { code, .. } => assert_eq!(code, 4900),
        other => panic!("Expected disconnect, got {other:?}"),
    }
    assert!(rig.client.accounts().is_empty());
}

#[tokio::test]
async fn concurrent_requests_resolve_to_their_own_replies() {
    let rig = wire("https://dapp.example");

    // Two passthrough calls in flight at once. Each reply carries the
    // method name back, so a correlation mix-up would hand at least one
    // future the wrong payload.
    let balance = tokio::spawn({
        let client = rig.client.clone();
        async move { client.request("eth_getBalance", json!(["0xa11ce", "latest"])).await }
    });
    let block = tokio::spawn({
        let client = rig.client.clone();
        async move { client.request("eth_blockNumber", json!([])).await }
    });

    let balance = timeout(TIMEOUT, balance)
        .await
        .expect("resolves")
        .expect("join")
        .expect("passthrough");
    let block = timeout(TIMEOUT, block)
        .await
        .expect("resolves")
        .expect("join")
        .expect("passthrough");
    assert_eq!(balance, json!({"method": "eth_getBalance"}));
    assert_eq!(block, json!({"method": "eth_blockNumber"}));
}
