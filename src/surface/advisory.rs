//! Advisory report assembly.
//!
//! The report decorates an approval surface with fee tiers, fiat valuation,
//! decoded calldata and a risk classification. All four lookups run
//! concurrently with independent deadlines, and any failure degrades the
//! report instead of blocking the decision. The report type carries no
//! binding transaction fields, so nothing computed here can leak back into
//! `to`, `value` or `data`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::approvals::{ApprovalPayload, ApprovalRequest};
use crate::backend::method::TransactionPayload;
use crate::bridge::PageOrigin;
use crate::calldata::{DecodedCall, SelectorTable, parse_selector};
use crate::surface::oracles::{
    FeeOracle, FeeTiers, PriceOracle, RiskLevel, SecurityOracle, SignatureLookup,
};

const WEI_PER_NATIVE: Decimal = dec!(1_000_000_000_000_000_000);

/// Shown when calldata is present but no source can name the function.
pub const UNKNOWN_FUNCTION: &str = "unknown function";

/// Display-only data for one approval. Absent fields render as unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryReport {
    pub fee_tiers: Option<FeeTiers>,
    /// Fiat valuation of the transferred native value.
    pub fiat_value: Option<Decimal>,
    /// Human-readable name of the called function, when decodable.
    pub decoded_call: Option<String>,
    pub risk: RiskLevel,
}

impl AdvisoryReport {
    fn sparse(risk: RiskLevel) -> Self {
        Self {
            fee_tiers: None,
            fiat_value: None,
            decoded_call: None,
            risk,
        }
    }
}

/// Gathers advisory data from the external collaborators.
pub struct AdvisoryEngine {
    fees: Arc<dyn FeeOracle>,
    prices: Arc<dyn PriceOracle>,
    signatures: Arc<dyn SignatureLookup>,
    security: Arc<dyn SecurityOracle>,
    selectors: SelectorTable,
    timeout: Duration,
}

impl AdvisoryEngine {
    pub fn new(
        fees: Arc<dyn FeeOracle>,
        prices: Arc<dyn PriceOracle>,
        signatures: Arc<dyn SignatureLookup>,
        security: Arc<dyn SecurityOracle>,
        timeout: Duration,
    ) -> Self {
        Self {
            fees,
            prices,
            signatures,
            security,
            selectors: SelectorTable::builtin(),
            timeout,
        }
    }

    /// Assemble the report for one request.
    pub async fn report(&self, request: &ApprovalRequest) -> AdvisoryReport {
        match &request.payload {
            ApprovalPayload::Transaction { tx } => {
                self.transaction_report(&request.origin, &request.network, tx)
                    .await
            }
            _ => AdvisoryReport::sparse(self.assess(&request.origin, None).await),
        }
    }

    async fn transaction_report(
        &self,
        origin: &PageOrigin,
        network: &str,
        tx: &TransactionPayload,
    ) -> AdvisoryReport {
        let (fee_tiers, price, decoded_call, risk) = tokio::join!(
            self.fetch_fees(network),
            self.fetch_price(network),
            self.decode_call(tx.data.as_deref()),
            self.assess(origin, tx.to.as_deref()),
        );
        let fiat_value = match (tx.value.as_deref().and_then(parse_wei), price) {
            (Some(wei), Some(price)) => Some(wei / WEI_PER_NATIVE * price),
            _ => None,
        };
        AdvisoryReport {
            fee_tiers,
            fiat_value,
            decoded_call,
            risk,
        }
    }

    async fn fetch_fees(&self, network: &str) -> Option<FeeTiers> {
        match tokio::time::timeout(self.timeout, self.fees.fee_tiers(network)).await {
            Ok(Ok(tiers)) => Some(tiers),
            Ok(Err(err)) => {
                warn!(%err, "fee oracle failed");
                None
            }
            Err(_) => {
                warn!("fee oracle timed out");
                None
            }
        }
    }

    async fn fetch_price(&self, network: &str) -> Option<Decimal> {
        match tokio::time::timeout(self.timeout, self.prices.native_price(network)).await {
            Ok(Ok(price)) => Some(price),
            Ok(Err(err)) => {
                warn!(%err, "price oracle failed");
                None
            }
            Err(_) => {
                warn!("price oracle timed out");
                None
            }
        }
    }

    /// Local table first; unknown selectors get a single short-deadline
    /// directory lookup. Any failure falls open to [`UNKNOWN_FUNCTION`]
    /// rather than blocking approval.
    async fn decode_call(&self, data: Option<&str>) -> Option<String> {
        let data = data?;
        if data.trim_start_matches("0x").is_empty() {
            // Plain value transfer, nothing to decode.
            return None;
        }
        let Some(selector) = parse_selector(data) else {
            return Some(UNKNOWN_FUNCTION.to_string());
        };
        if let Some(signature) = self.selectors.lookup(selector) {
            return Some(DecodedCall::from_signature(signature).function);
        }
        match tokio::time::timeout(self.timeout, self.signatures.lookup(selector)).await {
            Ok(Ok(Some(signature))) => Some(DecodedCall::from_signature(signature).function),
            Ok(Ok(None)) => Some(UNKNOWN_FUNCTION.to_string()),
            Ok(Err(err)) => {
                warn!(%err, "signature lookup failed");
                Some(UNKNOWN_FUNCTION.to_string())
            }
            Err(_) => {
                warn!("signature lookup timed out");
                Some(UNKNOWN_FUNCTION.to_string())
            }
        }
    }

    async fn assess(&self, origin: &PageOrigin, to: Option<&str>) -> RiskLevel {
        match tokio::time::timeout(self.timeout, self.security.assess(origin.as_str(), to)).await {
            Ok(Ok(level)) => level,
            Ok(Err(err)) => {
                warn!(%err, "security oracle failed");
                RiskLevel::Unknown
            }
            Err(_) => {
                warn!("security oracle timed out");
                RiskLevel::Unknown
            }
        }
    }
}

/// Hex-quantity wei value to a Decimal, `0xde0b6b3a7640000` style.
fn parse_wei(value: &str) -> Option<Decimal> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return None;
    }
    let wei = u128::from_str_radix(digits, 16).ok()?;
    Decimal::from_str(&wei.to_string()).ok()
}
