use alloy::primitives::{Address, FixedBytes};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::PaylinkError;

/// Transfer authorization signed by the payer (EIP-3009 `transferWithAuthorization`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferAuthorization {
    pub from: Address,
    pub to: Address,
    /// Token units as a decimal integer string.
    pub value: String,
    /// Unix seconds.
    pub valid_after: u64,
    /// Unix seconds.
    pub valid_before: u64,
    pub nonce: FixedBytes<32>,
}

/// Signed authorization plus the signature over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayload {
    pub signature: String,
    pub authorization: TransferAuthorization,
}

/// Wire-format payment proof (sent in the `X-PAYMENT` header, base64-encoded JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ExactPayload,
}

impl PaymentPayload {
    /// Decode a header value (base64 JSON).
    pub fn from_header(value: &str) -> Result<Self, PaylinkError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(value.trim())
            .map_err(|e| PaylinkError::InvalidPayment(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PaylinkError::InvalidPayment(format!("invalid JSON payload: {e}")))
    }

    /// Encode for the `X-PAYMENT` header.
    pub fn to_header(&self) -> Result<String, PaylinkError> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn payer(&self) -> Address {
        self.payload.authorization.from
    }
}

/// A single entry in the `accepts` array of a 402 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Human-readable price, e.g. `$0.50`.
    pub price: String,
    /// Token units as a decimal integer string.
    pub max_amount_required: String,
    pub asset: Address,
    pub pay_to: Address,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub max_timeout_seconds: u64,
}

/// The 402 challenge body returned by a gated endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredBody {
    pub x402_version: u32,
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
}
