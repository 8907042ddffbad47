//! Exactly-once completion reconciliation.
//!
//! Once an approval is confirmed, completion can arrive on three
//! independent, unordered channels: the direct reply to the confirmation,
//! a durable pending-transaction append pushed by the signing backend, and
//! a local deadline. [`reconcile`] races all three behind a single-flip
//! guard so exactly one resolution happens and every later signal is a
//! no-op.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::debug;

use crate::backend::approvals::ResolveDenied;
use crate::error::WireError;
use crate::store::{
    PendingTransactionRecord, StoreEvent, TxStatus, parse_pending_txs, pending_tx_key,
};

/// Selects the one durable mutation that can complete a given approval.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationFilter {
    /// Acting address, compared case-insensitively.
    pub from: String,
    /// Decimal network id the approval was created under.
    pub network: String,
}

impl MutationFilter {
    pub fn matches(&self, record: &PendingTransactionRecord) -> bool {
        record.status == TxStatus::Pending
            && record.network == self.network
            && record.from.eq_ignore_ascii_case(&self.from)
    }
}

/// Terminal result of one reconciliation.
#[derive(Debug)]
pub enum Completion {
    /// The direct reply landed first.
    Direct(Result<Value, ResolveDenied>),
    /// The durable store showed the broadcast transaction first.
    StoreConfirmed(PendingTransactionRecord),
    /// Neither signal arrived inside the deadline.
    TimedOut,
}

/// Single-flip resolution guard.
///
/// The first signal offered claims the resolution; every later offer
/// returns `None` regardless of what it carries.
#[derive(Debug, Default)]
pub struct Reconciler {
    handled: bool,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn offer_direct(&mut self, reply: Result<Value, ResolveDenied>) -> Option<Completion> {
        self.claim().then(|| Completion::Direct(reply))
    }

    pub fn offer_mutation(&mut self, record: PendingTransactionRecord) -> Option<Completion> {
        self.claim().then(|| Completion::StoreConfirmed(record))
    }

    pub fn offer_timeout(&mut self) -> Option<Completion> {
        self.claim().then_some(Completion::TimedOut)
    }

    fn claim(&mut self) -> bool {
        if self.handled {
            return false;
        }
        self.handled = true;
        true
    }
}

/// Drive one reconciliation to its single resolution.
///
/// `events` must have been subscribed before the confirmation that started
/// the upstream work; that closes the race where the mutation commits
/// before any subscription exists. `filter` is `None` for approvals that
/// produce no durable record (connections, message signatures), leaving
/// only the direct reply and the deadline in play.
pub async fn reconcile(
    direct: oneshot::Receiver<Result<Value, ResolveDenied>>,
    mut events: broadcast::Receiver<StoreEvent>,
    filter: Option<MutationFilter>,
    deadline: Duration,
) -> Completion {
    let mut guard = Reconciler::new();
    let timer = tokio::time::sleep(deadline);
    tokio::pin!(timer);
    let mut direct = direct;
    let watched_key = filter.as_ref().map(|filter| pending_tx_key(&filter.network));
    let mut store_open = filter.is_some();

    loop {
        tokio::select! {
            reply = &mut direct => {
                let reply = reply.unwrap_or_else(|_| {
                    Err(ResolveDenied::Upstream(WireError::internal(
                        "backend unavailable",
                    )))
                });
                if let Some(done) = guard.offer_direct(reply) {
                    return done;
                }
            }
            _ = &mut timer => {
                if let Some(done) = guard.offer_timeout() {
                    return done;
                }
            }
            event = events.recv(), if store_open => {
                match event {
                    Ok(event) => {
                        if let Some(done) = consider_mutation(
                            &mut guard,
                            filter.as_ref(),
                            watched_key.as_deref(),
                            &event,
                        ) {
                            return done;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "store subscription lagged during reconciliation");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("store subscription closed, completion rests on the direct reply");
                        store_open = false;
                    }
                }
            }
        }
    }
}

fn consider_mutation(
    guard: &mut Reconciler,
    filter: Option<&MutationFilter>,
    watched_key: Option<&str>,
    event: &StoreEvent,
) -> Option<Completion> {
    let filter = filter?;
    if Some(event.key.as_str()) != watched_key {
        return None;
    }
    let value = event.value.as_ref()?;
    let records = match parse_pending_txs(&event.key, value) {
        Ok(records) => records,
        Err(err) => {
            debug!(key = %event.key, %err, "ignoring undecodable pending-tx mutation");
            return None;
        }
    };
    records
        .into_iter()
        .find(|record| filter.matches(record))
        .and_then(|record| guard.offer_mutation(record))
}
