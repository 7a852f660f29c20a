use serde::Serialize;

use paylink::auth::{self, WEBHOOK_DOMAIN};

use crate::ledger::Settlement;

pub const SETTLEMENT_COMPLETED: &str = "settlement.completed";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementWebhook {
    pub event: String,
    pub payer: String,
    pub payee: String,
    pub amount: String,
    pub transaction: String,
    pub network: String,
    /// Short id of the paid-for resource, if any
    pub resource: Option<String>,
    /// Slug of the paid-to profile, if any
    pub profile: Option<String>,
    pub timestamp: i64,
}

impl SettlementWebhook {
    pub fn completed(
        settlement: &Settlement,
        resource: Option<String>,
        profile: Option<String>,
    ) -> Self {
        Self {
            event: SETTLEMENT_COMPLETED.to_string(),
            payer: settlement.payer.clone(),
            payee: settlement.payee.clone(),
            amount: settlement.amount.clone(),
            transaction: settlement.transaction_hash.clone(),
            network: settlement.network.clone(),
            resource,
            profile,
            timestamp: settlement.created_at,
        }
    }
}

/// Serialized body plus its signature when a secret is given.
pub fn signed_body(
    webhook: &SettlementWebhook,
    secret: Option<&[u8]>,
) -> Result<(Vec<u8>, Option<String>), serde_json::Error> {
    let body = serde_json::to_vec(webhook)?;
    let signature = secret.map(|s| auth::sign(s, WEBHOOK_DOMAIN, &body));
    Ok((body, signature))
}

/// Fire-and-forget POST to each webhook URL. Delivery failures are logged
/// and never reach the request that triggered them.
pub fn fire_webhooks(
    client: &reqwest::Client,
    urls: &[String],
    webhook: SettlementWebhook,
    secret: Option<&[u8]>,
) {
    if urls.is_empty() {
        return;
    }
    let (body, signature) = match signed_body(&webhook, secret) {
        Ok(signed) => signed,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize webhook payload");
            return;
        }
    };

    for url in urls {
        let client = client.clone();
        let url = url.clone();
        let body = body.clone();
        let signature = signature.clone();

        tokio::spawn(async move {
            let mut req = client
                .post(&url)
                .header("content-type", "application/json")
                .timeout(std::time::Duration::from_secs(5));
            if let Some(ref sig) = signature {
                req = req.header(SIGNATURE_HEADER, sig.as_str());
            }

            match req.body(body).send().await {
                Ok(resp) => {
                    tracing::debug!(url = %url, status = %resp.status(), "webhook delivered")
                }
                Err(e) => tracing::warn!(url = %url, error = %e, "webhook delivery failed"),
            }
        });
    }
}
