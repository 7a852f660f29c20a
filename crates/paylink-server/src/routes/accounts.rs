use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ServerError;
use crate::requests::{CreateAccountRequest, LimitQuery, UpdateAccountRequest};
use crate::routes::caller_wallet;
use crate::state::AppState;
use crate::validation::{parse_wallet, validate_handle};

const DEFAULT_LIST_LIMIT: u32 = 50;

/// POST /accounts - idempotent on the wallet.
pub async fn create_account(
    body: web::Json<CreateAccountRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = body
        .into_inner()
        .wallet_address
        .ok_or_else(|| ServerError::validation("Wallet address is required"))?;
    let wallet = parse_wallet(&wallet)?;
    let account = state.db.get_or_create_account(&wallet)?;
    Ok(HttpResponse::Ok().json(account))
}

pub async fn get_account(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = parse_wallet(&path.into_inner())?;
    let account = state
        .db
        .get_account_by_wallet(&wallet)?
        .ok_or_else(|| ServerError::not_found("Account not found"))?;
    let profile = state.db.get_profile_for_account(account.id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "account": account,
        "profile": profile,
    })))
}

pub async fn get_account_by_handle(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let handle = validate_handle(&path.into_inner())?;
    let account = state
        .db
        .get_account_by_handle(&handle)?
        .ok_or_else(|| ServerError::not_found("Account not found"))?;
    let profile = state.db.get_profile_for_account(account.id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "account": account,
        "profile": profile,
    })))
}

/// PATCH /accounts/{wallet} - only the wallet itself may edit.
pub async fn update_account(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateAccountRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = parse_wallet(&path.into_inner())?;
    if caller_wallet(&req)? != wallet {
        return Err(ServerError::NotOwner);
    }
    let patch = body.into_inner().validate()?;
    let account = state.db.update_account(&wallet, &patch)?;
    tracing::info!(wallet = %wallet, "account updated");
    Ok(HttpResponse::Ok().json(account))
}

/// GET /accounts/{wallet}/resources - public views, newest first
pub async fn list_resources(
    path: web::Path<String>,
    query: web::Query<LimitQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = parse_wallet(&path.into_inner())?;
    let account = state
        .db
        .get_account_by_wallet(&wallet)?
        .ok_or_else(|| ServerError::not_found("Account not found"))?;
    let resources: Vec<_> = state
        .db
        .list_resources_for_account(account.id, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))?
        .iter()
        .map(|r| r.public_view())
        .collect();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "resources": resources })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    // The handle route goes first so "handle" is never taken for a wallet.
    cfg.route("/accounts", web::post().to(create_account))
        .route("/accounts/handle/{handle}", web::get().to(get_account_by_handle))
        .service(
            web::resource("/accounts/{wallet}")
                .route(web::get().to(get_account))
                .route(web::patch().to(update_account)),
        )
        .route("/accounts/{wallet}/resources", web::get().to(list_resources));
}
