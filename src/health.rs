//! Liveness and metrics endpoints.

use crate::modem::ToolAvailability;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub tools: ToolAvailability,
}

/// `GET /health`
///
/// The service itself is always `ok`; each flag says whether the corresponding
/// ggwave executable is present and executable at this moment.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        ok: true,
        tools: state.toolkit().availability(),
    })
}

/// `GET /metrics`
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut routes: Vec<_> = metrics
        .route_metrics
        .iter()
        .map(|(route, metric)| {
            json!({
                "route": route,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "max_duration_ms": metric.max_duration_ms
            })
        })
        .collect();
    routes.sort_by(|a, b| a["route"].as_str().cmp(&b["route"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": uptime_seconds
        },
        "overall": {
            "total_requests": metrics.request_count,
            "client_errors": metrics.client_error_count,
            "server_errors": metrics.server_error_count,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "sessions": {
            "active": metrics.active_sessions,
            "total": metrics.total_sessions
        },
        "routes": routes,
        "tools": {
            "availability": state.toolkit().availability(),
            "converter": state.toolkit().converter().display().to_string(),
            "timeout_secs": config.process.timeout_secs,
            "max_upload_bytes": config.process.max_upload_bytes
        }
    }))
}
