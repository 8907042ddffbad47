//! External advisory collaborators.
//!
//! Fee, price, signature and risk lookups are independent HTTP services.
//! Each one is strictly advisory: its output decorates the approval surface
//! and may preset user-adjustable fee fields, never binding transaction
//! fields.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AdvisoryError;

/// Public signature directory queried for selectors missing from the local
/// table.
pub const DEFAULT_SIGNATURE_ENDPOINT: &str = "https://www.4byte.directory/api/v1/signatures/";

/// One EIP-1559 fee suggestion, in gwei.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    pub max_fee_per_gas: Decimal,
    pub max_priority_fee_per_gas: Decimal,
}

/// The three advisory fee tiers shown to the approver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTiers {
    pub slow: FeeQuote,
    pub normal: FeeQuote,
    pub fast: FeeQuote,
}

/// Risk classification of a pending interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Benign,
    Warn,
    Malicious,
    /// The oracle was unreachable or returned nothing usable.
    Unknown,
}

#[async_trait]
pub trait FeeOracle: Send + Sync {
    async fn fee_tiers(&self, network: &str) -> Result<FeeTiers, AdvisoryError>;
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fiat price of the network's native asset.
    async fn native_price(&self, network: &str) -> Result<Decimal, AdvisoryError>;
}

#[async_trait]
pub trait SignatureLookup: Send + Sync {
    /// Best-effort text signature for a selector, e.g.
    /// `transfer(address,uint256)`.
    async fn lookup(&self, selector: [u8; 4]) -> Result<Option<String>, AdvisoryError>;
}

#[async_trait]
pub trait SecurityOracle: Send + Sync {
    async fn assess(&self, origin: &str, to: Option<&str>) -> Result<RiskLevel, AdvisoryError>;
}

fn advisory_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Fee-tier estimates from a gas-station style endpoint.
pub struct HttpFeeOracle {
    client: Client,
    base_url: String,
}

impl HttpFeeOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: advisory_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl FeeOracle for HttpFeeOracle {
    async fn fee_tiers(&self, network: &str) -> Result<FeeTiers, AdvisoryError> {
        let tiers = self
            .client
            .get(format!("{}/fees", self.base_url))
            .query(&[("network", network)])
            .send()
            .await?
            .error_for_status()?
            .json::<FeeTiers>()
            .await?;
        Ok(tiers)
    }
}

#[derive(Debug, Deserialize)]
struct PriceBody {
    price: Decimal,
}

/// Native-asset fiat price from a price-feed endpoint.
pub struct HttpPriceOracle {
    client: Client,
    base_url: String,
}

impl HttpPriceOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: advisory_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn native_price(&self, network: &str) -> Result<Decimal, AdvisoryError> {
        let body = self
            .client
            .get(format!("{}/price", self.base_url))
            .query(&[("network", network)])
            .send()
            .await?
            .error_for_status()?
            .json::<PriceBody>()
            .await?;
        Ok(body.price)
    }
}

#[derive(Debug, Deserialize)]
struct SignatureHit {
    id: u64,
    text_signature: String,
}

#[derive(Debug, Deserialize)]
struct SignatureBody {
    results: Vec<SignatureHit>,
}

/// Signature directory client in the 4byte.directory wire format.
pub struct FourByteLookup {
    client: Client,
    endpoint: String,
}

impl FourByteLookup {
    pub fn new(timeout: Duration) -> Self {
        Self::with_endpoint(DEFAULT_SIGNATURE_ENDPOINT, timeout)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: advisory_client(timeout),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SignatureLookup for FourByteLookup {
    async fn lookup(&self, selector: [u8; 4]) -> Result<Option<String>, AdvisoryError> {
        let body = self
            .client
            .get(&self.endpoint)
            .query(&[("hex_signature", hex_selector(selector))])
            .send()
            .await?
            .error_for_status()?
            .json::<SignatureBody>()
            .await?;
        Ok(best_signature(body.results))
    }
}

#[derive(Debug, Serialize)]
struct AssessBody<'a> {
    origin: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RiskBody {
    risk: RiskLevel,
}

/// Risk classification from a security-scanning endpoint.
pub struct HttpSecurityOracle {
    client: Client,
    base_url: String,
}

impl HttpSecurityOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: advisory_client(timeout),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SecurityOracle for HttpSecurityOracle {
    async fn assess(&self, origin: &str, to: Option<&str>) -> Result<RiskLevel, AdvisoryError> {
        let body = self
            .client
            .post(format!("{}/assess", self.base_url))
            .json(&AssessBody { origin, to })
            .send()
            .await?
            .error_for_status()?
            .json::<RiskBody>()
            .await?;
        Ok(body.risk)
    }
}

fn hex_selector(selector: [u8; 4]) -> String {
    format!("0x{}", selector.map(|byte| format!("{byte:02x}")).concat())
}

/// The directory returns every registered collision; the earliest entry
/// (lowest id) is the conventional canonical one.
fn best_signature(results: Vec<SignatureHit>) -> Option<String> {
    results
        .into_iter()
        .min_by_key(|hit| hit.id)
        .map(|hit| hit.text_signature)
}
