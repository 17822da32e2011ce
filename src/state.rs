//! # Application State Management
//!
//! State shared by every request handler and WebSocket session.
//!
//! ## What lives here:
//! - **config**: the immutable startup configuration, behind an `Arc` so
//!   cloning the state per worker is cheap
//! - **toolkit**: resolved tool paths and limits, built once from the config
//! - **metrics**: counters updated by the metrics middleware and the sessions
//!
//! ## Arc<RwLock<T>> Pattern
//! Only the metrics are mutable after startup, so only they sit behind a lock.
//! Configuration never changes once the server is running, so it needs none.
//!
//! Per-unit-of-work state (workspaces, process handles, latches) never goes in
//! here: it stays private to the request or session that owns it.

use crate::config::AppConfig;
use crate::modem::Toolkit;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub toolkit: Arc<Toolkit>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests and WebSocket sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    /// Responses with a 4xx status
    pub client_error_count: u64,
    /// Responses with a 5xx status or a failed service call
    pub server_error_count: u64,
    /// WebSocket sessions with a live `ggwave-cli` process
    pub active_sessions: u32,
    /// Sessions opened since startup
    pub total_sessions: u64,
    /// Keyed by "METHOD /route/pattern"
    pub route_metrics: HashMap<String, RouteMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct RouteMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let toolkit = Toolkit::from_config(&config);
        Self {
            config: Arc::new(config),
            toolkit: Arc::new(toolkit),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    pub fn toolkit(&self) -> &Toolkit {
        &self.toolkit
    }

    // A panic while holding the lock only ever leaves counters half-updated,
    // so poisoning is ignored.
    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one finished request.
    ///
    /// `status` is `None` when the service call itself failed before a
    /// response existed; that counts as a server error.
    pub fn record_request(&self, route: &str, duration_ms: u64, status: Option<u16>) {
        let mut metrics = self.write_metrics();
        metrics.request_count += 1;

        let is_error = match status {
            Some(code) if (400..500).contains(&code) => {
                metrics.client_error_count += 1;
                true
            }
            Some(code) if code < 500 => false,
            _ => {
                metrics.server_error_count += 1;
                true
            }
        };

        let route_metric = metrics.route_metrics.entry(route.to_string()).or_default();
        route_metric.request_count += 1;
        route_metric.total_duration_ms += duration_ms;
        route_metric.max_duration_ms = route_metric.max_duration_ms.max(duration_ms);
        if is_error {
            route_metric.error_count += 1;
        }
    }

    pub fn session_opened(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
    }

    pub fn session_closed(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl RouteMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_splits_error_classes() {
        let state = AppState::new(AppConfig::default());
        state.record_request("POST /decode", 10, Some(200));
        state.record_request("POST /decode", 30, Some(400));
        state.record_request("POST /decode", 20, Some(500));
        state.record_request("POST /encode", 5, None);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 4);
        assert_eq!(metrics.client_error_count, 1);
        assert_eq!(metrics.server_error_count, 2);

        let decode = &metrics.route_metrics["POST /decode"];
        assert_eq!(decode.request_count, 3);
        assert_eq!(decode.error_count, 2);
        assert_eq!(decode.max_duration_ms, 30);
        assert_eq!(decode.average_duration_ms(), 20.0);
        assert!((decode.error_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_session_counter_never_underflows() {
        let state = AppState::new(AppConfig::default());
        state.session_opened();
        state.session_closed();
        state.session_closed();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.total_sessions, 1);
    }
}
