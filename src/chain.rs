//! Chain identity helpers.
//!
//! The provider surface speaks two spellings of the same chain id:
//! `chainChanged` carries the 0x-prefixed hex form, the legacy
//! `networkChanged` carries the decimal string form. [`ChainRef`] owns the
//! conversion so call sites never format ids by hand.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reference to an EVM chain by numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainRef(u64);

impl ChainRef {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }

    /// 0x-prefixed lowercase hex form without leading zeros, e.g. `0x89`.
    pub fn hex(&self) -> String {
        format!("0x{:x}", self.0)
    }

    /// Decimal string form, e.g. `137`.
    pub fn decimal(&self) -> String {
        self.0.to_string()
    }

    /// Parse either spelling. Empty, negative, or non-numeric input is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            if hex.is_empty() {
                return None;
            }
            return u64::from_str_radix(hex, 16).ok().map(Self);
        }
        value.parse::<u64>().ok().map(Self)
    }
}

impl fmt::Display for ChainRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}
