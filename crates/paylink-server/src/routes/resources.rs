use actix_web::{web, HttpRequest, HttpResponse};

use crate::db::{now_ms, Account};
use crate::error::ServerError;
use crate::requests::{CreateResourceRequest, UpdateResourceRequest};
use crate::routes::caller_wallet;
use crate::short_id;
use crate::state::AppState;

fn valid_short_id(raw: String) -> Result<String, ServerError> {
    if short_id::is_valid(&raw) {
        Ok(raw)
    } else {
        Err(ServerError::not_found("Content not found"))
    }
}

/// Account of the caller when acting on `short_id`. A caller without an
/// account can own nothing.
fn owner_account(
    state: &AppState,
    req: &HttpRequest,
    short_id: &str,
) -> Result<Account, ServerError> {
    let wallet = caller_wallet(req)?;
    match state.db.get_account_by_wallet(&wallet)? {
        Some(account) => Ok(account),
        None => Err(match state.db.get_resource(short_id)? {
            Some(_) => ServerError::NotOwner,
            None => ServerError::not_found("Content not found"),
        }),
    }
}

/// POST /resources - 201 with the owner's full view
pub async fn create_resource(
    req: HttpRequest,
    body: web::Json<CreateResourceRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let wallet = caller_wallet(&req)?;
    let new = body.into_inner().validate(state.token_decimals(), now_ms())?;
    let account = state.db.get_or_create_account(&wallet)?;

    let short_id = short_id::allocate(&state.db)?;
    let resource = state.db.insert_resource(account.id, &short_id, &new)?;

    tracing::info!(
        wallet = %wallet,
        short_id = %resource.short_id,
        kind = resource.kind().as_str(),
        price = %resource.price,
        "resource created"
    );
    Ok(HttpResponse::Created().json(resource))
}

/// GET /resources/{shortId} - metadata and preview, never the payload
pub async fn get_resource(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let short_id = valid_short_id(path.into_inner())?;
    let resource = state
        .db
        .get_resource(&short_id)?
        .filter(|r| r.active)
        .ok_or_else(|| ServerError::not_found("Content not found"))?;
    Ok(HttpResponse::Ok().json(resource.public_view()))
}

pub async fn update_resource(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<UpdateResourceRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let short_id = valid_short_id(path.into_inner())?;
    let patch = body.into_inner().validate(state.token_decimals())?;
    let account = owner_account(&state, &req, &short_id)?;
    let resource = state.db.update_resource(&short_id, account.id, &patch)?;
    tracing::info!(short_id = %short_id, "resource updated");
    Ok(HttpResponse::Ok().json(resource))
}

pub async fn delete_resource(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let short_id = valid_short_id(path.into_inner())?;
    let account = owner_account(&state, &req, &short_id)?;
    state.db.delete_resource(&short_id, account.id)?;
    tracing::info!(short_id = %short_id, "resource deleted");
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/resources", web::post().to(create_resource))
        .service(
            web::resource("/resources/{short_id}")
                .route(web::get().to(get_resource))
                .route(web::patch().to(update_resource))
                .route(web::delete().to(delete_resource)),
        );
}
