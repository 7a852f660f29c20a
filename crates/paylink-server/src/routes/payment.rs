use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ServerError;
use crate::gate::ProtectedRoute;
use crate::ledger::SettlementMemo;
use crate::requests::ProfilePaymentRequest;
use crate::routes::{record_settlement, SettlementLinks};
use crate::state::AppState;

/// POST /payment/send - pay into a profile.
///
/// The gate charges the fixed profile-payment price; the amount the payer
/// typed is carried in the settlement memo.
pub async fn send_payment(
    req: HttpRequest,
    body: web::Json<ProfilePaymentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner().validate(state.token_decimals())?;

    let profile = state
        .db
        .get_profile_by_slug(&request.slug)?
        .ok_or_else(|| ServerError::not_found("Profile not found"))?;

    let payment = match state.gate.admit(&req, ProtectedRoute::ProfilePayment).await {
        Ok(payment) => payment,
        Err(challenge) => return Ok(challenge),
    };

    let settlement = record_settlement(
        &state,
        &payment,
        SettlementLinks {
            payee_account_id: Some(profile.account_id),
            resource: None,
            profile: Some((profile.id, profile.slug.clone())),
        },
        SettlementMemo::ProfilePayment {
            slug: profile.slug.clone(),
            requested_amount: request.amount.clone(),
        },
    )?;

    tracing::info!(
        profile = %profile.slug,
        payer = %payment.payer,
        requested = %request.amount,
        "profile payment settled"
    );

    Ok(HttpResponse::Ok()
        .insert_header(payment.response_header())
        .json(serde_json::json!({
            "success": true,
            "transactionId": settlement.transaction_hash,
            "profile": profile.slug,
            "amount": request.amount,
        })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payment/send", web::post().to(send_payment));
}
