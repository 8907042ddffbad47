//! Approval surface protocol handling.
//!
//! One [`ApprovalSurface`] exists per pending approval. It loads the parked
//! request, computes advisory display data, and reports exactly one outcome
//! back to the backend. After confirming an approval it hands completion to
//! the reconciler, which races the direct reply against the durable
//! pending-transaction feed and a deadline. A surface abandoned without a
//! decision reports an implicit reject on the way out.

pub mod advisory;
pub mod oracles;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::SurfaceLink;
use crate::backend::approvals::{
    ApprovalOutcome, ApprovalPayload, ApprovalRequest, RejectReason, ResolveDenied,
};
use crate::backend::method::FeeOverrides;
use crate::config::BridgeConfig;
use crate::error::{ApprovalError, WireError};
use crate::reconcile::{Completion, MutationFilter, reconcile};
use crate::session::SessionGate;
use crate::store::DurableStore;
use crate::surface::advisory::{AdvisoryEngine, AdvisoryReport};

/// Terminal form of a resolved surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Success,
    /// No completion signal arrived within the deadline.
    TimedOut,
}

/// Lifecycle of one approval surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceState {
    Loading,
    Ready,
    /// The request was missing or consumed elsewhere; fail closed with only
    /// a reject affordance.
    RejectOnly,
    /// Both affordances disabled while the outcome is in flight.
    Signing,
    Resolved(Resolution),
    Rejected,
}

impl SurfaceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Rejected)
    }
}

/// Owner-driven flow for one pending approval.
///
/// The embedding UI drives it from a single task; methods take `&mut self`
/// and the state machine never resolves twice.
pub struct ApprovalSurface {
    request_id: Uuid,
    link: SurfaceLink,
    store: Arc<dyn DurableStore>,
    session: Arc<SessionGate>,
    advisory: Arc<AdvisoryEngine>,
    completion_timeout: Duration,
    state: SurfaceState,
    request: Option<ApprovalRequest>,
    report: Option<AdvisoryReport>,
    result: Option<Value>,
    last_error: Option<WireError>,
}

impl ApprovalSurface {
    pub fn new(
        request_id: Uuid,
        link: SurfaceLink,
        store: Arc<dyn DurableStore>,
        session: Arc<SessionGate>,
        advisory: Arc<AdvisoryEngine>,
        config: &BridgeConfig,
    ) -> Self {
        Self {
            request_id,
            link,
            store,
            session,
            advisory,
            completion_timeout: config.completion_timeout,
            state: SurfaceState::Loading,
            request: None,
            report: None,
            result: None,
            last_error: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn state(&self) -> &SurfaceState {
        &self.state
    }

    pub fn request(&self) -> Option<&ApprovalRequest> {
        self.request.as_ref()
    }

    pub fn report(&self) -> Option<&AdvisoryReport> {
        self.report.as_ref()
    }

    /// Value the approval resolved to, once `Resolved(Success)`.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&WireError> {
        self.last_error.as_ref()
    }

    /// Fetch the parked request and compute its advisory report.
    ///
    /// A missing or already-consumed request fails closed: the surface
    /// becomes [`SurfaceState::RejectOnly`] instead of rendering stale data.
    pub async fn load(&mut self) -> &SurfaceState {
        if self.state != SurfaceState::Loading {
            return &self.state;
        }
        match self.link.load(self.request_id).await {
            Some(request) => {
                self.report = Some(self.advisory.report(&request).await);
                self.request = Some(request);
                self.state = SurfaceState::Ready;
            }
            None => {
                warn!(request_id = %self.request_id, "request missing or consumed, failing closed");
                self.state = SurfaceState::RejectOnly;
            }
        }
        &self.state
    }

    /// Confirm the approval and reconcile its completion signals.
    ///
    /// `fees` may adjust user-tunable fee parameters only; the payload's
    /// binding fields travel untouched from the parked request.
    pub async fn approve(
        &mut self,
        fees: Option<FeeOverrides>,
    ) -> Result<SurfaceState, ApprovalError> {
        if self.state != SurfaceState::Ready {
            return Err(self.not_ready("approve"));
        }
        if !self.session.is_unlocked() {
            return Err(ApprovalError::SessionLocked);
        }
        let Some(request) = self.request.as_ref() else {
            return Err(self.not_ready("approve"));
        };
        let filter = mutation_filter(request);

        self.state = SurfaceState::Signing;
        self.last_error = None;

        // Subscribe before confirming, so a mutation committed before the
        // direct reply is still observed.
        let events = self.store.subscribe();
        let direct = self
            .link
            .resolve_deferred(self.request_id, ApprovalOutcome::Approve { fees });
        let completion = reconcile(direct, events, filter, self.completion_timeout).await;

        match completion {
            Completion::Direct(Ok(value)) => {
                info!(request_id = %self.request_id, "approval completed via direct reply");
                self.result = Some(value);
                self.finish(SurfaceState::Resolved(Resolution::Success));
                Ok(self.state.clone())
            }
            Completion::StoreConfirmed(record) => {
                info!(
                    request_id = %self.request_id,
                    hash = %record.hash,
                    "approval completed via pending-transaction record"
                );
                self.result = Some(Value::String(record.hash));
                self.finish(SurfaceState::Resolved(Resolution::Success));
                Ok(self.state.clone())
            }
            Completion::Direct(Err(ResolveDenied::NotFound)) => {
                warn!(request_id = %self.request_id, "request resolved elsewhere, failing closed");
                self.request = None;
                self.state = SurfaceState::RejectOnly;
                Err(ApprovalError::NotFound {
                    request_id: self.request_id,
                })
            }
            Completion::Direct(Err(ResolveDenied::Upstream(wire))) => {
                // Recoverable in place: the request stays parked and both
                // affordances come back.
                warn!(request_id = %self.request_id, %wire, "signing failed, surface stays open");
                self.last_error = Some(wire.clone());
                self.state = SurfaceState::Ready;
                Err(ApprovalError::Signing(wire))
            }
            Completion::TimedOut => {
                warn!(request_id = %self.request_id, "no completion signal within deadline");
                self.finish(SurfaceState::Resolved(Resolution::TimedOut));
                Ok(self.state.clone())
            }
        }
    }

    /// Explicit reject. Closes the surface immediately.
    pub async fn reject(&mut self) -> Result<SurfaceState, ApprovalError> {
        match self.state {
            SurfaceState::Ready | SurfaceState::RejectOnly => {}
            _ => return Err(self.not_ready("reject")),
        }
        let outcome = ApprovalOutcome::Reject {
            reason: RejectReason::UserDenied,
        };
        match self.link.resolve(self.request_id, outcome).await {
            Ok(_) | Err(ResolveDenied::NotFound) => {}
            Err(ResolveDenied::Upstream(wire)) => {
                warn!(request_id = %self.request_id, %wire, "reject not acknowledged");
            }
        }
        self.finish(SurfaceState::Rejected);
        Ok(self.state.clone())
    }

    /// Unconditional exit path. Closing without a decision reports an
    /// implicit reject; after a terminal state it is a no-op.
    pub async fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        debug!(request_id = %self.request_id, "surface closed without a decision");
        let outcome = ApprovalOutcome::Reject {
            reason: RejectReason::SurfaceClosed,
        };
        let _ = self.link.resolve(self.request_id, outcome).await;
        self.finish(SurfaceState::Rejected);
    }

    fn finish(&mut self, state: SurfaceState) {
        // Resolution clears the surface's placeholder copy of the request.
        self.request = None;
        self.state = state;
    }

    fn not_ready(&self, action: &'static str) -> ApprovalError {
        ApprovalError::NotReady {
            action,
            state: format!("{:?}", self.state),
        }
    }
}

impl Drop for ApprovalSurface {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            debug!(request_id = %self.request_id, "surface dropped without a decision, rejecting");
            self.link
                .reject_detached(self.request_id, RejectReason::SurfaceClosed);
        }
    }
}

/// Durable-mutation filter for payloads that produce a broadcast record.
fn mutation_filter(request: &ApprovalRequest) -> Option<MutationFilter> {
    match &request.payload {
        ApprovalPayload::Transaction { tx } => Some(MutationFilter {
            from: tx.from.clone(),
            network: request.network.clone(),
        }),
        _ => None,
    }
}
