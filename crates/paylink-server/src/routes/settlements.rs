//! Read-only views over the settlement ledger.

use actix_web::{web, HttpResponse};

use crate::error::ServerError;
use crate::ledger::SettlementFilter;
use crate::requests::{EventQuery, SettlementQuery};
use crate::state::AppState;
use crate::validation::{parse_wallet, validate_slug};

const DEFAULT_LIST_LIMIT: u32 = 50;

fn account_id(state: &AppState, wallet: &str) -> Result<i64, ServerError> {
    let wallet = parse_wallet(wallet)?;
    state
        .db
        .get_account_by_wallet(&wallet)?
        .map(|a| a.id)
        .ok_or_else(|| ServerError::not_found("Account not found"))
}

fn resource_id(state: &AppState, short_id: &str) -> Result<i64, ServerError> {
    state
        .db
        .get_resource(short_id)?
        .map(|r| r.id)
        .ok_or_else(|| ServerError::not_found("Content not found"))
}

/// Inactive profiles keep their history.
fn profile_id(state: &AppState, slug: &str) -> Result<i64, ServerError> {
    let slug = validate_slug(slug)?;
    state
        .db
        .find_profile(&slug)?
        .map(|p| p.id)
        .ok_or_else(|| ServerError::not_found("Profile not found"))
}

/// At most one of the filters may be given.
fn settlement_filter(state: &AppState, query: &SettlementQuery) -> Result<SettlementFilter, ServerError> {
    let given = [
        query.payer.is_some(),
        query.payee.is_some(),
        query.account.is_some(),
        query.resource.is_some(),
        query.profile.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if given > 1 {
        return Err(ServerError::validation(
            "Use at most one of payer, payee, account, resource, profile",
        ));
    }

    if let Some(payer) = &query.payer {
        return Ok(SettlementFilter::Payer(parse_wallet(payer)?));
    }
    if let Some(payee) = &query.payee {
        return Ok(SettlementFilter::Payee(parse_wallet(payee)?));
    }
    if let Some(wallet) = &query.account {
        return Ok(SettlementFilter::Account(account_id(state, wallet)?));
    }
    if let Some(short_id) = &query.resource {
        return Ok(SettlementFilter::Resource(resource_id(state, short_id)?));
    }
    if let Some(slug) = &query.profile {
        return Ok(SettlementFilter::Profile(profile_id(state, slug)?));
    }
    Ok(SettlementFilter::All)
}

/// GET /settlements
pub async fn list_settlements(
    query: web::Query<SettlementQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let filter = settlement_filter(&state, &query)?;
    let settlements = state
        .ledger
        .list(&filter, query.limit.unwrap_or(DEFAULT_LIST_LIMIT))?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "settlements": settlements })))
}

pub async fn resource_stats(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let id = resource_id(&state, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(state.ledger.stats(&SettlementFilter::Resource(id))?))
}

pub async fn profile_stats(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let id = profile_id(&state, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(state.ledger.stats(&SettlementFilter::Profile(id))?))
}

pub async fn account_stats(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let id = account_id(&state, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(state.ledger.stats(&SettlementFilter::Account(id))?))
}

/// GET /events?type=&limit=
pub async fn list_events(
    query: web::Query<EventQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServerError> {
    let events = state.ledger.list_events(
        query.event_type.as_deref(),
        query.limit.unwrap_or(DEFAULT_LIST_LIMIT),
    )?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "events": events })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/settlements", web::get().to(list_settlements))
        .route("/stats/resources/{short_id}", web::get().to(resource_stats))
        .route("/stats/profiles/{slug}", web::get().to(profile_stats))
        .route("/stats/accounts/{wallet}", web::get().to(account_stats))
        .route("/events", web::get().to(list_events));
}
