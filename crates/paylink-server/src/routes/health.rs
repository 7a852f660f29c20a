use actix_web::{web, HttpRequest, HttpResponse};
use prometheus::Encoder;

use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let database_ok = state
        .db
        .with_connection(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
        .is_ok();

    let body = serde_json::json!({
        "status": if database_ok { "ok" } else { "degraded" },
        "service": "paylink-server",
        "version": env!("CARGO_PKG_VERSION"),
        "network": state.config.chain.network,
    });

    if database_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// GET /metrics - Prometheus text format, behind a bearer token when one is configured
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(ref expected) = state.config.metrics_token {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| paylink::auth::constant_time_eq(token.as_bytes(), expected.as_bytes()));

        if !authorized {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "Valid Bearer token required for /metrics"
            }));
        }
    }

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": "Failed to encode metrics"
        }));
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
