//! HTTP client for a remote settlement facilitator.
//!
//! Calls `POST {url}/verify` and, when the payment is valid, `POST {url}/settle`.
//! Every failure mode (transport, timeout, non-2xx, unparsable body, missing
//! transaction hash) comes back as "not settled".

use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{sign, FACILITATOR_DOMAIN};
use crate::payment::{PaymentPayload, PaymentRequirements};
use crate::response::{SettleResponse, VerifyResponse};
use crate::scheme::Facilitator;
use crate::{PaylinkError, X402_VERSION};

/// Header carrying the optional HMAC over the request body.
pub const FACILITATOR_AUTH_HEADER: &str = "X-Facilitator-Auth";

/// Remote facilitator reached over HTTP.
#[derive(Clone)]
pub struct HttpFacilitator {
    client: reqwest::Client,
    base_url: String,
    hmac_secret: Option<Vec<u8>>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpFacilitator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFacilitator")
            .field("base_url", &self.base_url)
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpFacilitator {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        hmac_secret: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            hmac_secret,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<T, PaylinkError> {
        let url = format!("{}/{}", self.base_url, path);
        let body = serde_json::json!({
            "x402Version": X402_VERSION,
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });
        let body_bytes = serde_json::to_vec(&body)?;

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout);

        if let Some(ref secret) = self.hmac_secret {
            let sig = sign(secret, FACILITATOR_DOMAIN, &body_bytes);
            request = request.header(FACILITATOR_AUTH_HEADER, sig);
        }

        let resp = request.body(body_bytes).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PaylinkError::Facilitator(
                "facilitator authentication failed".to_string(),
            ));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!(%status, body = %text, path, "facilitator returned non-success response");
            return Err(PaylinkError::Facilitator(format!(
                "{path} returned {status}"
            )));
        }

        resp.json::<T>()
            .await
            .map_err(|e| PaylinkError::Facilitator(format!("{path} response parse failed: {e}")))
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn verify_and_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, PaylinkError> {
        let verified: VerifyResponse = self.post("verify", payload, requirements).await?;
        if !verified.is_valid {
            return Ok(SettleResponse {
                payer: verified.payer,
                ..SettleResponse::rejected(
                    &requirements.network,
                    verified
                        .invalid_reason
                        .unwrap_or_else(|| "payment invalid".to_string()),
                )
            });
        }

        let settled: SettleResponse = self.post("settle", payload, requirements).await?;
        if settled.success && settled.transaction.is_none() {
            return Err(PaylinkError::Facilitator(
                "settlement reported success without a transaction hash".to_string(),
            ));
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalised() {
        let f = HttpFacilitator::new(
            reqwest::Client::new(),
            "https://x402.org/facilitator/",
            Some(b"secret".to_vec()),
            Duration::from_secs(5),
        );
        assert_eq!(f.base_url(), "https://x402.org/facilitator");
        assert!(format!("{f:?}").contains("[REDACTED]"));
    }
}
