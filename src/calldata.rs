//! Calldata selector derivation and local decoding.
//!
//! Covers the common token-call shapes with a built-in table; anything not
//! found here goes through the best-effort external signature lookup on the
//! approval surface.

use sha3::{Digest, Keccak256};
use std::collections::HashMap;

/// `approve(address,uint256)`.
pub const ERC20_APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

const BUILTIN_SIGNATURES: &[&str] = &[
    "transfer(address,uint256)",
    "approve(address,uint256)",
    "transferFrom(address,address,uint256)",
    "safeTransferFrom(address,address,uint256)",
    "setApprovalForAll(address,bool)",
    "deposit()",
    "withdraw(uint256)",
];

/// First four keccak-256 bytes of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Extract the selector from a 0x-prefixed calldata string.
///
/// Calldata is page-controlled; decoding works on raw bytes so anything
/// that is not ASCII hex in the selector region is `None`, never a slicing
/// error.
pub fn parse_selector(data: &str) -> Option<[u8; 4]> {
    let trimmed = data.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let digits = hex.as_bytes().get(..8)?;
    let mut out = [0u8; 4];
    for (i, byte) in out.iter_mut().enumerate() {
        let hi = char::from(digits[i * 2]).to_digit(16)?;
        let lo = char::from(digits[i * 2 + 1]).to_digit(16)?;
        *byte = (hi * 16 + lo) as u8;
    }
    Some(out)
}

/// A function call identified from calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCall {
    /// Canonical signature, e.g. `transfer(address,uint256)`.
    pub signature: String,
    /// Bare function name, e.g. `transfer`.
    pub function: String,
}

impl DecodedCall {
    pub fn from_signature(signature: impl Into<String>) -> Self {
        let signature = signature.into();
        let function = signature
            .split('(')
            .next()
            .unwrap_or(signature.as_str())
            .to_string();
        Self {
            signature,
            function,
        }
    }
}

/// Selector-to-signature table owned by whoever decodes.
#[derive(Debug)]
pub struct SelectorTable {
    entries: HashMap<[u8; 4], &'static str>,
}

impl SelectorTable {
    /// Table over the built-in token-call signatures.
    pub fn builtin() -> Self {
        let entries = BUILTIN_SIGNATURES
            .iter()
            .map(|signature| (selector(signature), *signature))
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, selector: [u8; 4]) -> Option<&'static str> {
        self.entries.get(&selector).copied()
    }

    /// Decode calldata against the local table only.
    pub fn decode(&self, data: &str) -> Option<DecodedCall> {
        let selector = parse_selector(data)?;
        self.lookup(selector).map(DecodedCall::from_signature)
    }
}

/// Whether calldata invokes ERC-20 `approve`.
pub fn is_erc20_approve(data: &str) -> bool {
    parse_selector(data) == Some(ERC20_APPROVE_SELECTOR)
}
