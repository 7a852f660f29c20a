use alloy::primitives::Address;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Response from the facilitator's `/verify` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
}

/// Response from the facilitator's `/settle` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
    /// Transaction hash, if settlement succeeded. `None` on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub network: String,
}

impl SettleResponse {
    /// A failed settlement carrying only a reason.
    pub fn rejected(network: &str, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error_reason: Some(reason.into()),
            payer: None,
            transaction: None,
            network: network.to_string(),
        }
    }

    /// Value for the `X-PAYMENT-RESPONSE` header returned alongside a paid resource.
    pub fn to_header(&self) -> String {
        let body = serde_json::json!({
            "success": self.success,
            "transaction": self.transaction,
            "network": self.network,
            "payer": self.payer.map(|a| format!("{a:#x}")),
        });
        base64::engine::general_purpose::STANDARD.encode(body.to_string())
    }
}
