//! Supported wallet methods.
//!
//! The provider namespace is modeled as a closed union so dispatch is
//! exhaustive; read-only calls the bridge does not interpret flow through
//! [`WalletMethod::Passthrough`] untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::ChainRef;
use crate::error::WireError;

/// Typed-data signing flavors, oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypedDataVersion {
    V1,
    V3,
    V4,
}

/// Transaction fields as submitted by the page.
///
/// `from`/`to`/`value`/`data` are binding: nothing downstream of parsing may
/// rewrite them. The gas/fee fields are the user-adjustable remainder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(rename = "maxFeePerGas", skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(
        rename = "maxPriorityFeePerGas",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_priority_fee_per_gas: Option<String>,
}

/// The only knobs a surface may adjust on a pending transaction.
///
/// Deliberately cannot express `to`, `value`, or `data`, so advisory layers
/// and user edits can never change what is being signed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
}

impl TransactionPayload {
    /// Apply surface-chosen fee parameters, keeping binding fields intact.
    pub fn with_fee_overrides(&self, overrides: &FeeOverrides) -> Self {
        Self {
            gas: overrides.gas.clone().or_else(|| self.gas.clone()),
            max_fee_per_gas: overrides
                .max_fee_per_gas
                .clone()
                .or_else(|| self.max_fee_per_gas.clone()),
            max_priority_fee_per_gas: overrides
                .max_priority_fee_per_gas
                .clone()
                .or_else(|| self.max_priority_fee_per_gas.clone()),
            ..self.clone()
        }
    }
}

/// Message-signing parameters, normalized across the sign method family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignPayload {
    pub address: String,
    pub message: String,
}

/// `wallet_addEthereumChain` parameters (EIP-3085 subset the bridge reads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainPayload {
    pub chain_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rpc_urls: Vec<String>,
}

impl AddChainPayload {
    pub fn chain(&self) -> Option<ChainRef> {
        ChainRef::parse(&self.chain_id)
    }
}

/// Closed union over the provider method namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletMethod {
    RequestAccounts,
    Accounts,
    ChainId,
    NetVersion,
    SendTransaction(TransactionPayload),
    PersonalSign(SignPayload),
    EthSign(SignPayload),
    SignTypedData {
        version: TypedDataVersion,
        address: String,
        data: Value,
    },
    SwitchChain {
        chain: ChainRef,
    },
    AddChain(AddChainPayload),
    Passthrough {
        method: String,
        params: Value,
    },
}

impl WalletMethod {
    /// Parse a relayed method name and parameter list.
    ///
    /// Parameter order follows the historical provider API: `personal_sign`
    /// takes `[message, address]`, `eth_sign` takes `[address, message]`,
    /// typed-data v1 takes `[data, address]` while v3/v4 take
    /// `[address, data]`.
    pub fn parse(method: &str, params: &Value) -> Result<Self, WireError> {
        match method {
            "eth_requestAccounts" => Ok(Self::RequestAccounts),
            "eth_accounts" => Ok(Self::Accounts),
            "eth_chainId" => Ok(Self::ChainId),
            "net_version" => Ok(Self::NetVersion),
            "eth_sendTransaction" => {
                let tx = object_param(params, method)?;
                Ok(Self::SendTransaction(tx))
            }
            "personal_sign" => Ok(Self::PersonalSign(SignPayload {
                message: string_param(params, 0, "message")?,
                address: string_param(params, 1, "address")?,
            })),
            "eth_sign" => Ok(Self::EthSign(SignPayload {
                address: string_param(params, 0, "address")?,
                message: string_param(params, 1, "message")?,
            })),
            "eth_signTypedData" => Ok(Self::SignTypedData {
                version: TypedDataVersion::V1,
                data: indexed_param(params, 0, "typed data")?.clone(),
                address: string_param(params, 1, "address")?,
            }),
            "eth_signTypedData_v3" => Ok(Self::SignTypedData {
                version: TypedDataVersion::V3,
                address: string_param(params, 0, "address")?,
                data: indexed_param(params, 1, "typed data")?.clone(),
            }),
            "eth_signTypedData_v4" => Ok(Self::SignTypedData {
                version: TypedDataVersion::V4,
                address: string_param(params, 0, "address")?,
                data: indexed_param(params, 1, "typed data")?.clone(),
            }),
            "wallet_switchEthereumChain" => {
                let spec: SwitchChainParam = object_param(params, method)?;
                let chain = ChainRef::parse(&spec.chain_id).ok_or_else(|| {
                    WireError::invalid_params(format!(
                        "unparseable chainId '{}'",
                        spec.chain_id
                    ))
                })?;
                Ok(Self::SwitchChain { chain })
            }
            "wallet_addEthereumChain" => {
                let spec: AddChainPayload = object_param(params, method)?;
                if spec.chain().is_none() {
                    return Err(WireError::invalid_params(format!(
                        "unparseable chainId '{}'",
                        spec.chain_id
                    )));
                }
                Ok(Self::AddChain(spec))
            }
            other => Ok(Self::Passthrough {
                method: other.to_string(),
                params: params.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::RequestAccounts => "eth_requestAccounts",
            Self::Accounts => "eth_accounts",
            Self::ChainId => "eth_chainId",
            Self::NetVersion => "net_version",
            Self::SendTransaction(_) => "eth_sendTransaction",
            Self::PersonalSign(_) => "personal_sign",
            Self::EthSign(_) => "eth_sign",
            Self::SignTypedData {
                version: TypedDataVersion::V1,
                ..
            } => "eth_signTypedData",
            Self::SignTypedData {
                version: TypedDataVersion::V3,
                ..
            } => "eth_signTypedData_v3",
            Self::SignTypedData {
                version: TypedDataVersion::V4,
                ..
            } => "eth_signTypedData_v4",
            Self::SwitchChain { .. } => "wallet_switchEthereumChain",
            Self::AddChain(_) => "wallet_addEthereumChain",
            Self::Passthrough { method, .. } => method,
        }
    }

    /// Whether resolving this method suspends on a human approval.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Self::RequestAccounts
                | Self::SendTransaction(_)
                | Self::PersonalSign(_)
                | Self::EthSign(_)
                | Self::SignTypedData { .. }
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchChainParam {
    chain_id: String,
}

fn indexed_param<'a>(params: &'a Value, index: usize, what: &str) -> Result<&'a Value, WireError> {
    params
        .as_array()
        .and_then(|list| list.get(index))
        .ok_or_else(|| WireError::invalid_params(format!("missing {what} at position {index}")))
}

fn string_param(params: &Value, index: usize, what: &str) -> Result<String, WireError> {
    indexed_param(params, index, what)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| WireError::invalid_params(format!("{what} must be a string")))
}

fn object_param<T: serde::de::DeserializeOwned>(
    params: &Value,
    method: &str,
) -> Result<T, WireError> {
    let first = indexed_param(params, 0, "parameter object")?;
    serde_json::from_value(first.clone())
        .map_err(|err| WireError::invalid_params(format!("{method}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CODE_INVALID_PARAMS;
    use serde_json::json;

    #[test]
    fn parses_read_only_methods() {
        assert_eq!(
            WalletMethod::parse("eth_chainId", &json!([])).expect("parses"),
            WalletMethod::ChainId
        );
        assert_eq!(
            WalletMethod::parse("net_version", &json!([])).expect("parses"),
            WalletMethod::NetVersion
        );
    }

    #[test]
    fn sign_method_family_uses_historical_param_order() {
        let personal =
            WalletMethod::parse("personal_sign", &json!(["0xdeadbeef", "0xa11ce"])).expect("parses");
        match personal {
            WalletMethod::PersonalSign(payload) => {
                assert_eq!(payload.message, "0xdeadbeef");
                assert_eq!(payload.address, "0xa11ce");
            }
            other => panic!("Expected PersonalSign, got {other:?}"),
        }

        let raw = WalletMethod::parse("eth_sign", &json!(["0xa11ce", "0xdeadbeef"])).expect("parses");
        match raw {
            WalletMethod::EthSign(payload) => {
                assert_eq!(payload.address, "0xa11ce");
                assert_eq!(payload.message, "0xdeadbeef");
            }
            other => panic!("Expected EthSign, got {other:?}"),
        }
    }

    #[test]
    fn typed_data_versions_swap_param_order() {
        let v1 = WalletMethod::parse("eth_signTypedData", &json!([[{"type": "string"}], "0xa11ce"]))
            .expect("parses");
        match v1 {
            WalletMethod::SignTypedData {
                version, address, ..
            } => {
                assert_eq!(version, TypedDataVersion::V1);
                assert_eq!(address, "0xa11ce");
            }
            other => panic!("Expected SignTypedData, got {other:?}"),
        }

        let v4 = WalletMethod::parse("eth_signTypedData_v4", &json!(["0xa11ce", "{}"]))
            .expect("parses");
        assert_eq!(v4.name(), "eth_signTypedData_v4");
    }

    #[test]
    fn switch_chain_rejects_unparseable_ids() {
        let err = WalletMethod::parse("wallet_switchEthereumChain", &json!([{"chainId": "polygon"}]))
            .expect_err("must fail");
        assert_eq!(err.code, CODE_INVALID_PARAMS);

        let ok = WalletMethod::parse("wallet_switchEthereumChain", &json!([{"chainId": "0x89"}]))
            .expect("parses");
        assert_eq!(
            ok,
            WalletMethod::SwitchChain {
                chain: ChainRef::new(137)
            }
        );
    }

    #[test]
    fn unmodeled_methods_pass_through_verbatim() {
        let params = json!([{"blockNumber": "latest"}]);
        let method = WalletMethod::parse("eth_getBalance", &params).expect("parses");
        match method {
            WalletMethod::Passthrough {
                method,
                params: kept,
            } => {
                assert_eq!(method, "eth_getBalance");
                assert_eq!(kept, params);
            }
            other => panic!("Expected Passthrough, got {other:?}"),
        }
    }

    #[test]
    fn sensitivity_gates_the_signing_family_only() {
        let tx: TransactionPayload =
            serde_json::from_value(json!({"from": "0xa11ce"})).expect("parses");
        assert!(WalletMethod::SendTransaction(tx).is_sensitive());
        assert!(WalletMethod::RequestAccounts.is_sensitive());
        assert!(!WalletMethod::Accounts.is_sensitive());
        assert!(!WalletMethod::ChainId.is_sensitive());
        assert!(
            !WalletMethod::Passthrough {
                method: "eth_getBalance".to_string(),
                params: json!([]),
            }
            .is_sensitive()
        );
    }

    #[test]
    fn fee_overrides_cannot_touch_binding_fields() {
        let tx: TransactionPayload = serde_json::from_value(json!({
            "from": "0xa11ce",
            "to": "0xb0b",
            "value": "0xde0b6b3a7640000",
            "data": "0x095ea7b3",
            "maxFeePerGas": "0x77359400"
        }))
        .expect("parses");

        let adjusted = tx.with_fee_overrides(&FeeOverrides {
            gas: Some("0x5208".to_string()),
            max_fee_per_gas: Some("0x9502f900".to_string()),
            max_priority_fee_per_gas: None,
        });

        assert_eq!(adjusted.from, tx.from);
        assert_eq!(adjusted.to, tx.to);
        assert_eq!(adjusted.value, tx.value);
        assert_eq!(adjusted.data, tx.data);
        assert_eq!(adjusted.gas.as_deref(), Some("0x5208"));
        assert_eq!(adjusted.max_fee_per_gas.as_deref(), Some("0x9502f900"));
    }
}
