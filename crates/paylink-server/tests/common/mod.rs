#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix_web::web;
use alloy::primitives::{Address, FixedBytes};
use async_trait::async_trait;
use paylink::{
    ExactPayload, Facilitator, PaylinkError, PaymentPayload, PaymentRequirements, SettleResponse,
    TransferAuthorization,
};

use paylink_server::db::{now_ms, NewResource, Resource, ResourcePayload};
use paylink_server::{AppState, Database, ServerConfig};

pub const RECEIVER: Address = Address::repeat_byte(0x11);
pub const PAYER: Address = Address::repeat_byte(0x22);
pub const OWNER: &str = "0x3333333333333333333333333333333333333333";
pub const OTHER: &str = "0x4444444444444444444444444444444444444444";

/// Settles every proof it sees with a fresh transaction hash, or with
/// `fixed_transaction` when set.
#[derive(Default)]
pub struct FakeFacilitator {
    pub calls: AtomicUsize,
    pub reject: bool,
    pub fixed_transaction: Option<&'static str>,
}

#[async_trait]
impl Facilitator for FakeFacilitator {
    async fn verify_and_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, PaylinkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent requests interleave.
        tokio::task::yield_now().await;
        if self.reject {
            return Ok(SettleResponse::rejected(&requirements.network, "invalid_signature"));
        }
        Ok(SettleResponse {
            success: true,
            error_reason: None,
            payer: Some(payload.payer()),
            transaction: Some(
                self.fixed_transaction
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("0x{:064x}", n + 1)),
            ),
            network: requirements.network.clone(),
        })
    }
}

pub fn config() -> ServerConfig {
    let receiver = format!("{RECEIVER:#x}");
    ServerConfig::from_lookup(|key| match key {
        "RECEIVING_ADDRESS" => Some(receiver.clone()),
        "GRANT_SIGNING_SECRET" => Some("integration-test-grant-secret-0123456789".to_string()),
        "FACILITATOR_TIMEOUT_SECS" => Some("2".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn state_with(facilitator: Arc<FakeFacilitator>) -> web::Data<AppState> {
    let db = Database::new(":memory:").unwrap();
    web::Data::new(AppState::with_facilitator(
        config(),
        db,
        facilitator,
        reqwest::Client::new(),
    ))
}

pub fn state() -> (web::Data<AppState>, Arc<FakeFacilitator>) {
    let fake = Arc::new(FakeFacilitator::default());
    (state_with(fake.clone()), fake)
}

/// An `X-PAYMENT` header value offering `units` to the receiver.
pub fn proof(units: &str) -> String {
    let now = chrono::Utc::now().timestamp() as u64;
    PaymentPayload {
        x402_version: 1,
        scheme: "exact".to_string(),
        network: "base-sepolia".to_string(),
        payload: ExactPayload {
            signature: "0xsig".to_string(),
            authorization: TransferAuthorization {
                from: PAYER,
                to: RECEIVER,
                value: units.to_string(),
                valid_after: now - 60,
                valid_before: now + 600,
                nonce: FixedBytes::repeat_byte(9),
            },
        },
    }
    .to_header()
    .unwrap()
}

pub fn file_payload() -> ResourcePayload {
    ResourcePayload::File {
        file_url: "https://files.example.com/report.pdf".to_string(),
        file_name: "report.pdf".to_string(),
        file_size: Some(2048),
        mime_type: Some("application/pdf".to_string()),
    }
}

/// Insert a resource owned by [`OWNER`] straight into the store.
pub fn seed_resource(
    state: &AppState,
    short_id: &str,
    payload: ResourcePayload,
    expires_at: Option<i64>,
    max_downloads: Option<i64>,
) -> Resource {
    let account = state.db.get_or_create_account(OWNER).unwrap();
    state
        .db
        .insert_resource(
            account.id,
            short_id,
            &NewResource {
                title: "Quarterly report".to_string(),
                description: None,
                payload,
                price: "$0.50".to_string(),
                preview_content: Some("Revenue grew.".to_string()),
                expires_at,
                max_downloads,
            },
        )
        .unwrap()
}

pub fn an_hour_ago() -> i64 {
    now_ms() - 3_600_000
}
