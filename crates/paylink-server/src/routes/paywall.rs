//! Paid delivery of resources.
//!
//! Order of work per request: validate input (400), pre-check the resource
//! policy without side effects (404, so nobody pays for an unknown id), run
//! the payment gate (402), open a pending settlement (409 on a replayed
//! transaction), admit atomically, close the settlement, mint the grant.

use actix_web::{web, HttpRequest, HttpResponse};

use crate::db::{now_ms, Resource, ResourcePayload};
use crate::error::ServerError;
use crate::gate::{ProtectedRoute, VerifiedPayment};
use crate::ledger::SettlementMemo;
use crate::policy::Scope;
use crate::requests::{ContentRequest, DownloadRequest, RedeemGrantRequest};
use crate::routes::{iso8601, new_settlement, notify_settlement, SettlementLinks};
use crate::state::AppState;

/// Reserve the settlement before touching counters, so a replayed
/// transaction is rejected without spending quota. A denial here means the
/// caller paid and still lost the race; the reservation is closed as failed.
fn admit_paid(
    state: &AppState,
    checked: &Resource,
    scope: Scope,
    payment: &VerifiedPayment,
    memo: SettlementMemo,
) -> Result<Resource, ServerError> {
    let links = settlement_links(checked);
    let pending = state
        .ledger
        .reserve(&new_settlement(payment, &links, memo))?;

    match state.policy.admit(&checked.short_id, scope, now_ms()) {
        Ok(resource) => {
            let settlement = state.ledger.complete(&pending)?;
            notify_settlement(state, &settlement, links);
            Ok(resource)
        }
        Err(ServerError::Denied(denial)) => {
            tracing::warn!(
                short_id = %checked.short_id,
                payer = %payment.payer,
                transaction = %payment.transaction,
                reason = denial.as_str(),
                "settled payment denied by resource policy"
            );
            state.ledger.fail(&pending, denial.as_str())?;
            Err(ServerError::Denied(denial))
        }
        Err(e) => {
            state.ledger.fail(&pending, "admission_error")?;
            Err(e)
        }
    }
}

fn settlement_links(resource: &Resource) -> SettlementLinks {
    SettlementLinks {
        payee_account_id: Some(resource.account_id),
        resource: Some((resource.id, resource.short_id.clone())),
        profile: None,
    }
}

async fn serve_content(
    req: HttpRequest,
    state: web::Data<AppState>,
    request: ContentRequest,
) -> Result<HttpResponse, ServerError> {
    let short_id = request.validate()?;
    let checked = state.policy.check(&short_id, Scope::Read, now_ms())?;

    let payment = match state.gate.admit(&req, ProtectedRoute::Content).await {
        Ok(payment) => payment,
        Err(challenge) => return Ok(challenge),
    };

    let memo = SettlementMemo::ContentAccess {
        short_id: checked.short_id.clone(),
    };
    let resource = admit_paid(&state, &checked, Scope::Read, &payment, memo)?;
    let grant = state
        .grants
        .issue_read(&resource, &payment.payer, &payment.transaction, now_ms())?;

    // Files are delivered only through download grants.
    let data = match &resource.payload {
        ResourcePayload::Document { document_content } => Some(document_content.clone()),
        ResourcePayload::Link { link } => Some(link.clone()),
        ResourcePayload::File { .. } => resource.preview_content.clone(),
    };
    let creator = state
        .db
        .get_account(resource.account_id)?
        .map(|a| a.wallet_address);

    Ok(HttpResponse::Ok()
        .insert_header(payment.response_header())
        .json(serde_json::json!({
            "content": {
                "id": resource.short_id,
                "title": resource.title,
                "type": resource.kind(),
                "data": data,
                "creator": creator,
            },
            "accessToken": grant.token,
            "expiresAt": iso8601(grant.claims.expires_at),
        })))
}

/// GET /paywall/content?contentId=
pub async fn get_content(
    req: HttpRequest,
    query: web::Query<ContentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    serve_content(req, state, query.into_inner()).await
}

/// POST /paywall/content {contentId}
pub async fn post_content(
    req: HttpRequest,
    body: web::Json<ContentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    serve_content(req, state, body.into_inner()).await
}

/// GET /paywall/download?fileId=
pub async fn download(
    req: HttpRequest,
    query: web::Query<DownloadRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let short_id = query.into_inner().validate()?;
    let checked = state.policy.check(&short_id, Scope::Download, now_ms())?;
    let file_name = match &checked.payload {
        ResourcePayload::File { file_name, .. } => file_name.clone(),
        _ => return Err(ServerError::not_found("File not found")),
    };

    let payment = match state.gate.admit(&req, ProtectedRoute::Download).await {
        Ok(payment) => payment,
        Err(challenge) => return Ok(challenge),
    };

    let memo = SettlementMemo::FileDownload {
        short_id: checked.short_id.clone(),
        file_name,
    };
    let resource = admit_paid(&state, &checked, Scope::Download, &payment, memo)?;
    let grant = state
        .grants
        .issue_download(&resource, &payment.payer, &payment.transaction, now_ms())?;

    Ok(HttpResponse::Ok()
        .insert_header(payment.response_header())
        .json(serde_json::json!({
            "downloadUrl": grant.download_url,
            "fileName": grant.file_name,
            "fileSize": grant.file_size,
            "mimeType": grant.mime_type,
            "expiresAt": iso8601(grant.claims.expires_at),
        })))
}

/// POST /paywall/grants/redeem {token} - consume a grant once
pub async fn redeem_grant(
    body: web::Json<RedeemGrantRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let token = body.into_inner().validate()?;
    let claims = state.grants.redeem(&token, now_ms())?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "grantId": claims.grant_id,
        "resource": claims.resource,
        "scope": claims.scope,
        "payer": claims.payer,
        "settlement": claims.settlement,
        "expiresAt": iso8601(claims.expires_at),
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/paywall/content")
            .route(web::get().to(get_content))
            .route(web::post().to(post_content)),
    )
    .route("/paywall/download", web::get().to(download))
    .route("/paywall/grants/redeem", web::post().to(redeem_grant));
}
