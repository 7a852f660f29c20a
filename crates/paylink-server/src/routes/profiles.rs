use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ServerError;
use crate::requests::SaveProfileRequest;
use crate::routes::{caller_wallet, WALLET_HEADER};
use crate::state::AppState;
use crate::validation::validate_slug;

/// PUT /profiles - create or replace the caller's payment profile
pub async fn save_profile(
    req: HttpRequest,
    body: web::Json<SaveProfileRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = caller_wallet(&req)?;
    let settings = body.into_inner().validate(state.token_decimals())?;
    let account = state.db.get_or_create_account(&wallet)?;
    let profile = state.db.save_profile(account.id, &settings)?;
    tracing::info!(wallet = %wallet, slug = %profile.slug, "profile saved");
    Ok(HttpResponse::Ok().json(profile))
}

/// GET /profiles/{slug} - active profiles only, with the owner's account
pub async fn get_profile(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let slug = validate_slug(&path.into_inner())?;
    let profile = state
        .db
        .get_profile_by_slug(&slug)?
        .ok_or_else(|| ServerError::not_found("Profile not found"))?;
    let account = state.db.get_account(profile.account_id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "profile": profile,
        "account": account,
    })))
}

/// GET /profiles/{slug}/availability
///
/// With an `X-Wallet-Address` header, the caller's own slug counts as
/// available.
pub async fn slug_availability(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let slug = validate_slug(&path.into_inner())?;
    let account_id = if req.headers().contains_key(WALLET_HEADER) {
        let wallet = caller_wallet(&req)?;
        state.db.get_account_by_wallet(&wallet)?.map(|a| a.id)
    } else {
        None
    };
    let available = state.db.slug_available(&slug, account_id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "slug": slug,
        "available": available,
    })))
}

/// POST /profiles/{slug}/toggle - owner flips the profile on or off
pub async fn toggle_profile(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let slug = validate_slug(&path.into_inner())?;
    let wallet = caller_wallet(&req)?;

    let Some(account) = state.db.get_account_by_wallet(&wallet)? else {
        return Err(match state.db.find_profile(&slug)? {
            Some(_) => ServerError::NotOwner,
            None => ServerError::not_found("Profile not found"),
        });
    };
    let profile = state.db.toggle_profile(&slug, account.id)?;
    tracing::info!(slug = %profile.slug, active = profile.active, "profile toggled");
    Ok(HttpResponse::Ok().json(profile))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/profiles", web::put().to(save_profile))
        .route("/profiles/{slug}", web::get().to(get_profile))
        .route("/profiles/{slug}/availability", web::get().to(slug_availability))
        .route("/profiles/{slug}/toggle", web::post().to(toggle_profile));
}
