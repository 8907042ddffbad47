//! Privileged backend: immediate reads, suspended approvals.
//!
//! The backend actor owns the approval ledger and the table of withheld
//! replies. Read-only methods are answered as soon as a collaborator
//! responds; sensitive methods park an [`ApprovalRequest`], open exactly one
//! approval surface, and hold the page's RESPONSE until that surface reports
//! an outcome. Keys and chain state live behind the [`Signer`] and
//! [`NetworkDirectory`] traits; this crate never touches either directly.

pub mod approvals;
pub mod method;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::approvals::{
    ApprovalLedger, ApprovalOutcome, ApprovalPayload, ApprovalRequest, RejectReason, ResolveDenied,
};
use crate::backend::method::{
    AddChainPayload, FeeOverrides, SignPayload, TransactionPayload, TypedDataVersion, WalletMethod,
};
use crate::bridge::{BridgeMessage, PageOrigin};
use crate::chain::ChainRef;
use crate::error::{CODE_USER_REJECTED, WireError};
use crate::store::DurableStore;

/// Key-holding collaborator. Key storage and signing internals live outside
/// this crate.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Accounts currently exposed to an origin; empty when not connected.
    async fn accounts(&self, origin: &PageOrigin) -> Result<Vec<String>, WireError>;

    /// Grant the connection after approval, returning the exposed accounts.
    async fn approve_connection(&self, origin: &PageOrigin) -> Result<Vec<String>, WireError>;

    /// Sign and broadcast, resolving to the transaction hash. The signing
    /// backend appends the pending-transaction record after broadcast.
    async fn sign_transaction(&self, tx: &TransactionPayload) -> Result<String, WireError>;

    async fn sign_message(&self, payload: &SignPayload) -> Result<String, WireError>;

    async fn sign_typed_data(
        &self,
        version: TypedDataVersion,
        address: &str,
        data: &Value,
    ) -> Result<String, WireError>;
}

/// Multi-chain registry collaborator.
#[async_trait]
pub trait NetworkDirectory: Send + Sync {
    async fn current_chain(&self) -> ChainRef;

    async fn switch_chain(&self, chain: ChainRef) -> Result<(), WireError>;

    async fn add_chain(&self, spec: &AddChainPayload) -> Result<(), WireError>;

    /// Forward an unmodeled read-only call to the chain RPC.
    async fn rpc(&self, method: &str, params: &Value) -> Result<Value, WireError>;
}

/// Opens exactly one approval surface per parked request.
#[async_trait]
pub trait SurfaceOpener: Send + Sync {
    async fn open(&self, request_id: Uuid);
}

enum SurfaceCommand {
    Load {
        request_id: Uuid,
        reply: oneshot::Sender<Option<ApprovalRequest>>,
    },
    Resolve {
        request_id: Uuid,
        outcome: ApprovalOutcome,
        reply: Option<oneshot::Sender<Result<Value, ResolveDenied>>>,
    },
}

/// Surface-side handle into the backend actor.
#[derive(Clone)]
pub struct SurfaceLink {
    tx: mpsc::UnboundedSender<SurfaceCommand>,
}

impl SurfaceLink {
    /// Non-consuming fetch of a parked request.
    pub async fn load(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SurfaceCommand::Load { request_id, reply })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Queue a resolution and hand back the pending reply without awaiting
    /// it, so callers can finish arranging their completion listeners first.
    pub fn resolve_deferred(
        &self,
        request_id: Uuid,
        outcome: ApprovalOutcome,
    ) -> oneshot::Receiver<Result<Value, ResolveDenied>> {
        let (reply, rx) = oneshot::channel();
        let command = SurfaceCommand::Resolve {
            request_id,
            outcome,
            reply: Some(reply),
        };
        if self.tx.send(command).is_err() {
            debug!(%request_id, "backend gone, resolution undeliverable");
        }
        rx
    }

    pub async fn resolve(
        &self,
        request_id: Uuid,
        outcome: ApprovalOutcome,
    ) -> Result<Value, ResolveDenied> {
        match self.resolve_deferred(request_id, outcome).await {
            Ok(result) => result,
            Err(_) => Err(ResolveDenied::Upstream(WireError::internal(
                "backend unavailable",
            ))),
        }
    }

    /// Fire-and-forget reject, safe to call from drop guards.
    pub fn reject_detached(&self, request_id: Uuid, reason: RejectReason) {
        let command = SurfaceCommand::Resolve {
            request_id,
            outcome: ApprovalOutcome::Reject { reason },
            reply: None,
        };
        let _ = self.tx.send(command);
    }
}

/// Running backend actor.
pub struct BackendHandle {
    link: SurfaceLink,
    push: mpsc::Sender<BridgeMessage>,
    join: JoinHandle<()>,
}

impl BackendHandle {
    pub fn link(&self) -> SurfaceLink {
        self.link.clone()
    }

    /// Push an unsolicited DISCONNECT to the page.
    pub async fn push_disconnect(&self) -> bool {
        self.push.send(BridgeMessage::Disconnect).await.is_ok()
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

type WaitingReplies = Arc<Mutex<HashMap<Uuid, u64>>>;

/// The privileged backend actor.
pub struct WalletBackend {
    ledger: Arc<ApprovalLedger>,
    signer: Arc<dyn Signer>,
    networks: Arc<dyn NetworkDirectory>,
    opener: Arc<dyn SurfaceOpener>,
}

impl WalletBackend {
    pub fn new(
        store: Arc<dyn DurableStore>,
        signer: Arc<dyn Signer>,
        networks: Arc<dyn NetworkDirectory>,
        opener: Arc<dyn SurfaceOpener>,
    ) -> Self {
        Self {
            ledger: Arc::new(ApprovalLedger::new(store)),
            signer,
            networks,
            opener,
        }
    }

    /// Start the actor over its relay channels.
    pub fn spawn(
        self,
        from_relay: mpsc::Receiver<BridgeMessage>,
        to_relay: mpsc::Sender<BridgeMessage>,
    ) -> BackendHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let link = SurfaceLink { tx: command_tx };
        let push = to_relay.clone();
        let join = tokio::spawn(self.run(from_relay, to_relay, command_rx));
        BackendHandle { link, push, join }
    }

    async fn run(
        self,
        mut from_relay: mpsc::Receiver<BridgeMessage>,
        to_relay: mpsc::Sender<BridgeMessage>,
        mut commands: mpsc::UnboundedReceiver<SurfaceCommand>,
    ) {
        let waiting: WaitingReplies = Arc::default();
        info!("wallet backend started");
        loop {
            tokio::select! {
                message = from_relay.recv() => {
                    let Some(message) = message else {
                        debug!("relay channel closed, backend stopping");
                        break;
                    };
                    self.handle_bridge_message(message, &to_relay, &waiting).await;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("all surface links dropped, backend stopping");
                        break;
                    };
                    self.handle_command(command, &to_relay, &waiting).await;
                }
            }
        }
        info!("wallet backend stopped");
    }

    async fn handle_bridge_message(
        &self,
        message: BridgeMessage,
        to_relay: &mpsc::Sender<BridgeMessage>,
        waiting: &WaitingReplies,
    ) {
        match message {
            BridgeMessage::Request {
                id,
                method,
                params,
                origin,
            } => {
                let Some(origin) = origin else {
                    debug!(%method, "dropping request without a relay-tagged origin");
                    return;
                };
                match WalletMethod::parse(&method, &params) {
                    Ok(parsed) if parsed.is_sensitive() => {
                        self.park_for_approval(id, origin, parsed, to_relay, waiting)
                            .await;
                    }
                    Ok(parsed) => self.answer_immediately(id, origin, parsed, to_relay),
                    Err(wire) => {
                        let _ = to_relay.send(BridgeMessage::failure(id, wire)).await;
                    }
                }
            }
            BridgeMessage::Response { id, .. } => {
                debug!(id, "ignoring response arriving from the page side");
            }
            BridgeMessage::Disconnect => {
                debug!("page-side disconnect relayed, nothing to release");
            }
        }
    }

    /// Read-only and registry methods run on their own task so a slow
    /// collaborator never stalls the actor.
    fn answer_immediately(
        &self,
        id: u64,
        origin: PageOrigin,
        parsed: WalletMethod,
        to_relay: &mpsc::Sender<BridgeMessage>,
    ) {
        let signer = self.signer.clone();
        let networks = self.networks.clone();
        let out = to_relay.clone();
        tokio::spawn(async move {
            let result = match parsed {
                WalletMethod::Accounts => signer
                    .accounts(&origin)
                    .await
                    .map(|accounts| json!(accounts)),
                WalletMethod::ChainId => Ok(json!(networks.current_chain().await.hex())),
                WalletMethod::NetVersion => Ok(json!(networks.current_chain().await.decimal())),
                WalletMethod::SwitchChain { chain } => {
                    networks.switch_chain(chain).await.map(|()| Value::Null)
                }
                WalletMethod::AddChain(spec) => {
                    networks.add_chain(&spec).await.map(|()| Value::Null)
                }
                WalletMethod::Passthrough { method, params } => {
                    networks.rpc(&method, &params).await
                }
                sensitive => {
                    // Guarded by the is_sensitive() split in the caller.
                    error!(method = sensitive.name(), "sensitive method reached the immediate path");
                    Err(WireError::internal("misrouted method"))
                }
            };
            let response = match result {
                Ok(value) => BridgeMessage::success(id, value),
                Err(wire) => BridgeMessage::failure(id, wire),
            };
            let _ = out.send(response).await;
        });
    }

    async fn park_for_approval(
        &self,
        id: u64,
        origin: PageOrigin,
        parsed: WalletMethod,
        to_relay: &mpsc::Sender<BridgeMessage>,
        waiting: &WaitingReplies,
    ) {
        let Some(payload) = approval_payload(parsed) else {
            let _ = to_relay
                .send(BridgeMessage::failure(
                    id,
                    WireError::internal("misrouted method"),
                ))
                .await;
            return;
        };
        let kind = payload.classify();

        if self.ledger.contains_kind(&origin, kind) {
            warn!(%origin, %kind, "duplicate sensitive intent rejected");
            let _ = to_relay
                .send(BridgeMessage::failure(id, WireError::already_pending()))
                .await;
            return;
        }

        let network = self.networks.current_chain().await.decimal();
        let request = ApprovalRequest::new(origin, payload, network);
        let request_id = request.request_id;

        if let Err(err) = self.ledger.insert(request).await {
            error!(%request_id, %err, "failed to park approval request");
            let _ = to_relay
                .send(BridgeMessage::failure(
                    id,
                    WireError::internal("approval persistence failed"),
                ))
                .await;
            return;
        }

        lock_waiting(waiting).insert(request_id, id);
        info!(%request_id, %kind, "approval request parked, opening surface");
        self.opener.open(request_id).await;
    }

    async fn handle_command(
        &self,
        command: SurfaceCommand,
        to_relay: &mpsc::Sender<BridgeMessage>,
        waiting: &WaitingReplies,
    ) {
        match command {
            SurfaceCommand::Load { request_id, reply } => {
                let _ = reply.send(self.ledger.peek(&request_id));
            }
            SurfaceCommand::Resolve {
                request_id,
                outcome,
                reply,
            } => {
                self.resolve(request_id, outcome, reply, to_relay, waiting)
                    .await;
            }
        }
    }

    async fn resolve(
        &self,
        request_id: Uuid,
        outcome: ApprovalOutcome,
        reply: Option<oneshot::Sender<Result<Value, ResolveDenied>>>,
        to_relay: &mpsc::Sender<BridgeMessage>,
        waiting: &WaitingReplies,
    ) {
        // The single-consume step: whoever takes the entry owns resolution.
        let request = match self.ledger.take(&request_id).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!(%request_id, "resolution attempt for unknown or consumed request");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(ResolveDenied::NotFound));
                }
                return;
            }
            Err(err) => {
                error!(%request_id, %err, "approval ledger failure during resolution");
                if let Some(reply) = reply {
                    let _ = reply.send(Err(ResolveDenied::Upstream(WireError::internal(
                        "approval ledger failure",
                    ))));
                }
                return;
            }
        };
        let bridge_id = lock_waiting(waiting).remove(&request_id);

        match outcome {
            ApprovalOutcome::Reject { reason } => {
                info!(%request_id, ?reason, "approval rejected");
                if let Some(id) = bridge_id {
                    let message = match reason {
                        RejectReason::UserDenied => "User rejected the request.",
                        RejectReason::SurfaceClosed => {
                            "The approval surface was closed without a decision."
                        }
                    };
                    let wire = WireError::new(CODE_USER_REJECTED, message);
                    let _ = to_relay.send(BridgeMessage::failure(id, wire)).await;
                }
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(Value::Null));
                }
            }
            ApprovalOutcome::Approve { fees } => {
                let signer = self.signer.clone();
                let ledger = self.ledger.clone();
                let waiting = waiting.clone();
                let out = to_relay.clone();
                tokio::spawn(async move {
                    match sign_request(signer.as_ref(), &request, fees.as_ref()).await {
                        Ok(value) => {
                            info!(%request_id, "approval signed");
                            if let Some(id) = bridge_id {
                                let _ = out.send(BridgeMessage::success(id, value.clone())).await;
                            }
                            if let Some(reply) = reply {
                                let _ = reply.send(Ok(value));
                            }
                        }
                        Err(wire) => {
                            warn!(%request_id, %wire, "signing failed, approval restored for retry");
                            if let Some(id) = bridge_id {
                                lock_waiting(&waiting).insert(request_id, id);
                            }
                            if let Err(err) = ledger.restore(request).await {
                                error!(%request_id, %err, "failed to restore approval request");
                            }
                            if let Some(reply) = reply {
                                let _ = reply.send(Err(ResolveDenied::Upstream(wire)));
                            }
                        }
                    }
                });
            }
        }
    }
}

fn approval_payload(parsed: WalletMethod) -> Option<ApprovalPayload> {
    match parsed {
        WalletMethod::RequestAccounts => Some(ApprovalPayload::Connect),
        WalletMethod::SendTransaction(tx) => Some(ApprovalPayload::Transaction { tx }),
        WalletMethod::PersonalSign(sign) => Some(ApprovalPayload::Message { sign, raw: false }),
        WalletMethod::EthSign(sign) => Some(ApprovalPayload::Message { sign, raw: true }),
        WalletMethod::SignTypedData {
            version,
            address,
            data,
        } => Some(ApprovalPayload::TypedData {
            version,
            address,
            data,
        }),
        _ => None,
    }
}

async fn sign_request(
    signer: &dyn Signer,
    request: &ApprovalRequest,
    fees: Option<&FeeOverrides>,
) -> Result<Value, WireError> {
    match &request.payload {
        ApprovalPayload::Connect => signer
            .approve_connection(&request.origin)
            .await
            .map(|accounts| json!(accounts)),
        ApprovalPayload::Transaction { tx } => {
            let final_tx = match fees {
                Some(overrides) => tx.with_fee_overrides(overrides),
                None => tx.clone(),
            };
            signer.sign_transaction(&final_tx).await.map(Value::String)
        }
        ApprovalPayload::Message { sign, .. } => {
            signer.sign_message(sign).await.map(Value::String)
        }
        ApprovalPayload::TypedData {
            version,
            address,
            data,
        } => signer
            .sign_typed_data(*version, address, data)
            .await
            .map(Value::String),
    }
}

fn lock_waiting(waiting: &WaitingReplies) -> std::sync::MutexGuard<'_, HashMap<Uuid, u64>> {
    waiting.lock().unwrap_or_else(PoisonError::into_inner)
}
