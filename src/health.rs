use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": "stt-bridge",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "model": {
            "name": state.transcriber.model_name(),
            // The model loads before the listener binds, so a live
            // process is by definition ready to transcribe.
            "ready": true
        },
        "sessions": {
            "active": metrics.active_sessions,
            "max": config.limits.max_concurrent_sessions,
            "opened_total": metrics.sessions_opened
        }
    }))
}

pub async fn service_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics_snapshot();
    let uptime_seconds = state.uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "sessions": {
            "active": metrics.active_sessions,
            "opened_total": metrics.sessions_opened
        },
        "transcription": {
            "requests": metrics.transcription_requests,
            "decode_failures": metrics.decode_failures,
            "failure_rate": metrics.failure_rate(),
            "average_request_time_ms": metrics.average_request_time_ms(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.transcription_requests as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "http": {
            "requests": metrics.http_requests,
            "errors": metrics.http_errors
        }
    }))
}
