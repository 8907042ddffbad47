//! Keyward: a cross-context wallet approval bridge.
//!
//! Untrusted page code requests signing and connection operations from a
//! privileged process holding key material, while a human approves or
//! rejects sensitive actions out of band. This crate supplies the request
//! protocol between those contexts and its guarantees:
//!
//! - [`provider::PageClient`]: the page-injected request API, with
//!   correlation-id bookkeeping, the user-gesture admission policy and
//!   transition-exact lifecycle events.
//! - [`bridge::Relay`]: a shape-validating forwarder that tags requests
//!   with the genuine page origin and silently drops malformed traffic.
//! - [`backend::WalletBackend`]: the privileged actor answering read-only
//!   methods immediately and parking sensitive ones behind an approval.
//! - [`surface::ApprovalSurface`]: one UI flow per pending approval,
//!   advisory data included, reporting exactly one terminal outcome.
//! - [`reconcile`]: exactly-once completion that races the direct reply
//!   against durable pending-transaction appends and a local deadline.
//!
//! Key storage, transaction signing, chain RPC and oracle internals stay
//! outside the crate, behind the [`backend::Signer`],
//! [`backend::NetworkDirectory`] and [`surface::oracles`] traits.

pub mod backend;
pub mod bridge;
pub mod calldata;
pub mod chain;
pub mod config;
pub mod error;
pub mod provider;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod surface;

pub use crate::chain::ChainRef;
pub use crate::config::BridgeConfig;
pub use crate::error::{Error, Result, WireError};
