use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prometheus metrics for bridge health, served over HTTP.
///
/// All metrics use the "opcbridge" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Completed poll cycles.
    pub cycles: Counter,
    /// Points that passed change detection.
    pub points_emitted: Counter,
    /// Points acknowledged by the sink.
    pub points_written: Counter,
    /// Failed sink flushes.
    pub write_failures: Counter,
    /// Failed batch reads.
    pub read_failures: Counter,
    /// Successful source reconnects.
    pub reconnects: Counter,
    /// Points awaiting delivery.
    pub points_pending: Gauge,
    /// Tags in the resolved poll set.
    pub tags_polled: Gauge,
    /// Whether the source session is up (1=yes, 0=no).
    pub source_connected: Gauge,
    /// Wall-clock time of one poll cycle (read through flush).
    pub cycle_duration: Histogram,
}

impl HealthMetrics {
    /// Creates the metrics instance with everything registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let cycles = Counter::with_opts(
            Opts::new("cycles_total", "Completed poll cycles.").namespace("opcbridge"),
        )?;
        let points_emitted = Counter::with_opts(
            Opts::new(
                "points_emitted_total",
                "Points that passed change detection.",
            )
            .namespace("opcbridge"),
        )?;
        let points_written = Counter::with_opts(
            Opts::new("points_written_total", "Points acknowledged by the sink.")
                .namespace("opcbridge"),
        )?;
        let write_failures = Counter::with_opts(
            Opts::new("write_failures_total", "Failed sink flushes.").namespace("opcbridge"),
        )?;
        let read_failures = Counter::with_opts(
            Opts::new("read_failures_total", "Failed batch reads.").namespace("opcbridge"),
        )?;
        let reconnects = Counter::with_opts(
            Opts::new("reconnects_total", "Successful source reconnects.").namespace("opcbridge"),
        )?;
        let points_pending = Gauge::with_opts(
            Opts::new("points_pending", "Points awaiting delivery.").namespace("opcbridge"),
        )?;
        let tags_polled = Gauge::with_opts(
            Opts::new("tags_polled", "Tags in the resolved poll set.").namespace("opcbridge"),
        )?;
        let source_connected = Gauge::with_opts(
            Opts::new(
                "source_connected",
                "Whether the source session is up (1=yes, 0=no).",
            )
            .namespace("opcbridge"),
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "cycle_duration_seconds",
                "Wall-clock time of one poll cycle.",
            )
            .namespace("opcbridge")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(points_emitted.clone()))?;
        registry.register(Box::new(points_written.clone()))?;
        registry.register(Box::new(write_failures.clone()))?;
        registry.register(Box::new(read_failures.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(points_pending.clone()))?;
        registry.register(Box::new(tags_polled.clone()))?;
        registry.register(Box::new(source_connected.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            cycles,
            points_emitted,
            points_written,
            write_failures,
            read_failures,
            reconnects,
            points_pending,
            tags_polled,
            source_connected,
            cycle_duration,
        })
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("listening on {}", self.addr))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let health = HealthMetrics::new("127.0.0.1:0").expect("metrics");
        health.cycles.inc();
        health.points_pending.set(42.0);

        let families = health.registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "opcbridge_cycles_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "opcbridge_points_pending"));
    }

    #[tokio::test]
    async fn test_server_starts_and_stops_on_ephemeral_port() {
        let health = HealthMetrics::new("127.0.0.1:0").expect("metrics");
        health.start().await.expect("start");
        health.stop();
    }
}
