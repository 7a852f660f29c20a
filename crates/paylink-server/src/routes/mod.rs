pub mod accounts;
pub mod health;
pub mod paywall;
pub mod payment;
pub mod profiles;
pub mod resources;
pub mod settlements;

use actix_web::{web, HttpRequest};

use crate::error::ServerError;
use crate::gate::VerifiedPayment;
use crate::ledger::{NewSettlement, Settlement, SettlementMemo};
use crate::state::AppState;
use crate::validation::parse_wallet;
use crate::webhook::{fire_webhooks, SettlementWebhook};

/// Header naming the wallet an owner-only request acts for.
pub const WALLET_HEADER: &str = "X-Wallet-Address";

const JSON_LIMIT: usize = 256 * 1024;

/// Wallet from [`WALLET_HEADER`], normalized.
pub fn caller_wallet(req: &HttpRequest) -> Result<String, ServerError> {
    let value = req
        .headers()
        .get(WALLET_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::validation(format!("{WALLET_HEADER} header is required")))?;
    parse_wallet(value)
}

/// RFC 3339 with milliseconds, UTC.
pub fn iso8601(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Where the money of a settled request went, beyond the receiving address.
pub(crate) struct SettlementLinks {
    pub payee_account_id: Option<i64>,
    pub resource: Option<(i64, String)>,
    pub profile: Option<(i64, String)>,
}

pub(crate) fn new_settlement(
    payment: &VerifiedPayment,
    links: &SettlementLinks,
    memo: SettlementMemo,
) -> NewSettlement {
    NewSettlement {
        payer: payment.payer.clone(),
        payee: payment.payee.clone(),
        payee_account_id: links.payee_account_id,
        amount: payment.amount.clone(),
        network: payment.network.clone(),
        transaction_hash: payment.transaction.clone(),
        resource_id: links.resource.as_ref().map(|(id, _)| *id),
        profile_id: links.profile.as_ref().map(|(id, _)| *id),
        memo,
    }
}

/// Tell webhook receivers about a completed settlement. Signed only when a
/// signing secret was configured.
pub(crate) fn notify_settlement(state: &AppState, settlement: &Settlement, links: SettlementLinks) {
    fire_webhooks(
        &state.http_client,
        &state.config.webhook_urls,
        SettlementWebhook::completed(
            settlement,
            links.resource.map(|(_, short_id)| short_id),
            links.profile.map(|(_, slug)| slug),
        ),
        state.config.webhook_secret.as_deref(),
    );
}

/// Append a completed settlement to the ledger and notify webhooks.
pub(crate) fn record_settlement(
    state: &AppState,
    payment: &VerifiedPayment,
    links: SettlementLinks,
    memo: SettlementMemo,
) -> Result<Settlement, ServerError> {
    let settlement = state.ledger.record(&new_settlement(payment, &links, memo))?;
    notify_settlement(state, &settlement, links);
    Ok(settlement)
}

/// Body and query extractors that fail with `{"error": ...}` 400s.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT)
        .error_handler(|err, _req| ServerError::validation(format!("Invalid request body: {err}")).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| ServerError::validation(format!("Invalid query string: {err}")).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| ServerError::validation(format!("Invalid path: {err}")).into())
}

/// Mount every route and extractor config.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config());
    health::configure(cfg);
    paywall::configure(cfg);
    payment::configure(cfg);
    accounts::configure(cfg);
    profiles::configure(cfg);
    resources::configure(cfg);
    settlements::configure(cfg);
}
