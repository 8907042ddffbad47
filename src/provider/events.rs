//! Lifecycle events the page client emits toward page listeners.

use serde::{Deserialize, Serialize};

/// One observed state transition. Emission is suppressed when the new state
/// equals the cached state, so each variant fires at most once per change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ProviderEvent {
    /// The client can service requests. Carries the hex-quantity chain id.
    Connect { chain_id: String },
    /// The client lost its backend. Carries a standard provider error code.
    Disconnect { code: i64, message: String },
    AccountsChanged { accounts: Vec<String> },
    /// Hex-quantity form, `0x89`.
    ChainChanged { chain_id: String },
    /// Legacy decimal-string form of the same transition, `137`.
    NetworkChanged { network_id: String },
}

impl ProviderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::AccountsChanged { .. } => "accountsChanged",
            Self::ChainChanged { .. } => "chainChanged",
            Self::NetworkChanged { .. } => "networkChanged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn events_serialize_with_provider_names() {
        let event = ProviderEvent::ChainChanged {
            chain_id: "0x89".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).expect("serialize"),
            json!({"event": "chainChanged", "chainId": "0x89"})
        );

        let event = ProviderEvent::NetworkChanged {
            network_id: "137".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).expect("serialize"),
            json!({"event": "networkChanged", "networkId": "137"})
        );
    }

    #[test]
    fn disconnect_round_trips() {
        let event = ProviderEvent::Disconnect {
            code: 4900,
            message: "gone".to_string(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["event"], "disconnect");
        let back: ProviderEvent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, event);
    }
}
