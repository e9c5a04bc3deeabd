//! # Error Handling
//!
//! Two error families live here, matching the two failure domains of the
//! service:
//!
//! - [`DecodeError`] is the tagged outcome of a single transcription request.
//!   It never escapes the per-message boundary: the WebSocket layer maps every
//!   variant to an empty-string reply and keeps the session open.
//! - [`AppError`] covers the plain HTTP surface (upgrade refusals, health
//!   endpoints) and renders as a JSON error response.
//!
//! Startup failures (bind, model load, bad config) are not modeled here; they
//! propagate out of `main` as `anyhow::Error` and end the process.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Why a single transcription request produced no text.
///
/// Every variant is recoverable by construction: the session that submitted
/// the failing payload receives `""` and continues, and no other session
/// observes the failure.
#[derive(Debug)]
pub enum DecodeError {
    /// The request carried no audio at all, or a container with no samples.
    EmptyAudio,

    /// The payload is not a WAV clip this service can read.
    InvalidFormat(String),

    /// The clip decodes fine but exceeds the configured duration ceiling.
    AudioTooLong { seconds: f64, limit: f64 },

    /// The acoustic model failed while decoding the clip.
    Inference(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::EmptyAudio => write!(f, "audio payload is empty"),
            DecodeError::InvalidFormat(msg) => write!(f, "unsupported audio payload: {}", msg),
            DecodeError::AudioTooLong { seconds, limit } => write!(
                f,
                "audio clip is {:.2}s long, limit is {:.2}s",
                seconds, limit
            ),
            DecodeError::Inference(msg) => write!(f, "inference failed: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors surfaced over the plain HTTP endpoints.
#[derive(Debug)]
pub enum AppError {
    /// Server-side failure with no more specific category.
    Internal(String),

    /// The concurrent-session cap has been reached.
    AtCapacity(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "internal error: {}", msg),
            AppError::AtCapacity(msg) => write!(f, "at capacity: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::AtCapacity(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "at_capacity",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        assert_eq!(DecodeError::EmptyAudio.to_string(), "audio payload is empty");

        let err = DecodeError::InvalidFormat("no RIFF header".to_string());
        assert!(err.to_string().contains("no RIFF header"));

        let err = DecodeError::AudioTooLong {
            seconds: 45.5,
            limit: 30.0,
        };
        assert!(err.to_string().contains("45.50s"));
        assert!(err.to_string().contains("30.00s"));
    }

    #[test]
    fn test_app_error_status_codes() {
        let err = AppError::AtCapacity("64 sessions".to_string());
        assert_eq!(err.error_response().status().as_u16(), 503);

        let err = AppError::Internal("boom".to_string());
        assert_eq!(err.error_response().status().as_u16(), 500);
    }
}
