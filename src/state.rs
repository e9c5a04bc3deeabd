//! # Application State Management
//!
//! Shared state handed to every request handler and every WebSocket actor.
//! The transcriber is constructed once in `main`, injected here, and shared
//! read-only across all sessions; everything mutable sits behind `RwLock`.

use crate::config::AppConfig;
use crate::transcription::Transcriber;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all connections and HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, readable at any time.
    pub config: Arc<RwLock<AppConfig>>,

    /// Service-wide counters, updated by the middleware and the sessions.
    pub metrics: Arc<RwLock<ServiceMetrics>>,

    /// The shared transcription capability. Safe for concurrent use from any
    /// number of sessions; see [`Transcriber`] for the exact contract.
    pub transcriber: Arc<Transcriber>,

    /// When the process started, for uptime reporting.
    pub start_time: Instant,
}

/// Counters exposed over `/metrics`.
#[derive(Debug, Default, Clone)]
pub struct ServiceMetrics {
    /// Sessions accepted since startup.
    pub sessions_opened: u64,

    /// Sessions currently connected.
    pub active_sessions: usize,

    /// Transcription requests processed, successes and failures both.
    pub transcription_requests: u64,

    /// Requests that produced a decode failure (and an empty-string reply).
    pub decode_failures: u64,

    /// Cumulative wall-clock time spent answering requests, in milliseconds.
    pub total_request_time_ms: u64,

    /// Plain HTTP requests served (health, metrics, upgrades).
    pub http_requests: u64,

    /// Plain HTTP requests that returned 4xx/5xx.
    pub http_errors: u64,
}

impl AppState {
    pub fn new(config: AppConfig, transcriber: Arc<Transcriber>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(ServiceMetrics::default())),
            transcriber,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately; `AppConfig` is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Reserve a session slot. Returns `false` when the configured cap is
    /// already reached, in which case nothing is counted.
    pub fn try_open_session(&self) -> bool {
        let cap = self.get_config().limits.max_concurrent_sessions;
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions >= cap {
            return false;
        }
        metrics.active_sessions += 1;
        metrics.sessions_opened += 1;
        true
    }

    /// Release a session slot when a connection ends, however it ends.
    pub fn close_session(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Account for one fully resolved transcription request.
    pub fn record_request(&self, duration_ms: u64, failed: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.transcription_requests += 1;
        metrics.total_request_time_ms += duration_ms;
        if failed {
            metrics.decode_failures += 1;
        }
    }

    /// Account for one plain HTTP request.
    pub fn record_http_request(&self, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.http_requests += 1;
        if is_error {
            metrics.http_errors += 1;
        }
    }

    /// Get a consistent snapshot of the counters.
    pub fn metrics_snapshot(&self) -> ServiceMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl ServiceMetrics {
    /// Mean time to resolve a transcription request, in milliseconds.
    pub fn average_request_time_ms(&self) -> f64 {
        if self.transcription_requests > 0 {
            self.total_request_time_ms as f64 / self.transcription_requests as f64
        } else {
            0.0
        }
    }

    /// Share of requests that ended in a decode failure (0.0 to 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.transcription_requests > 0 {
            self.decode_failures as f64 / self.transcription_requests as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accounting() {
        let mut metrics = ServiceMetrics::default();
        assert_eq!(metrics.average_request_time_ms(), 0.0);
        assert_eq!(metrics.failure_rate(), 0.0);

        metrics.transcription_requests = 4;
        metrics.decode_failures = 1;
        metrics.total_request_time_ms = 200;
        assert_eq!(metrics.average_request_time_ms(), 50.0);
        assert_eq!(metrics.failure_rate(), 0.25);
    }
}
