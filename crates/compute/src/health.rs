//! Detector counters and the `/health` + `/metrics` HTTP endpoints.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use plantwatch_core::AlertKind;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::stream::ConnectionState;

// ── Constants ────────────────────────────────────────────────────────

/// Five minutes of throughput at one-second granularity.
const RING_BUFFER_CAPACITY: usize = 300;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

// ── Ring buffer ──────────────────────────────────────────────────────

/// Fixed-size FIFO that evicts its oldest entry when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buf.iter()
    }
}

// ── Snapshots ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ThroughputPoint {
    pub elapsed_secs: f64,
    pub processed_total: u64,
    pub messages_per_sec: f64,
}

/// Body of `GET /metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub state: ConnectionState,
    pub received: u64,
    pub processed: u64,
    pub dropped: u64,
    pub failed: u64,
    pub alerts: BTreeMap<String, u64>,
    pub persistence_failures: u64,
    pub reconnects: u64,
    pub messages_per_sec: f64,
    pub time_series: Vec<ThroughputPoint>,
    pub uptime_secs: f64,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok`, `degraded` or `unavailable`.
    pub status: &'static str,
    pub state: ConnectionState,
    /// Detectors running without their model.
    pub degraded: Vec<String>,
    pub uptime_secs: f64,
}

// ── DetectorMetrics ──────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    degraded: Vec<String>,
    received: u64,
    processed: u64,
    dropped: u64,
    failed: u64,
    alerts: BTreeMap<AlertKind, u64>,
    persistence_failures: u64,
    reconnects: u64,
    window_processed: u64,
    messages_per_sec: f64,
    ring: RingBuffer<ThroughputPoint>,
}

/// Shared counters for the stream loop. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct DetectorMetrics {
    inner: Arc<Mutex<Inner>>,
    start: Instant,
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                degraded: Vec::new(),
                received: 0,
                processed: 0,
                dropped: 0,
                failed: 0,
                alerts: BTreeMap::new(),
                persistence_failures: 0,
                reconnects: 0,
                window_processed: 0,
                messages_per_sec: 0.0,
                ring: RingBuffer::new(RING_BUFFER_CAPACITY),
            })),
            start: Instant::now(),
        }
    }

    pub async fn set_state(&self, state: ConnectionState) {
        self.inner.lock().await.state = state;
    }

    pub async fn set_degraded(&self, detectors: Vec<String>) {
        self.inner.lock().await.degraded = detectors;
    }

    pub async fn record_received(&self) {
        self.inner.lock().await.received += 1;
    }

    /// A message made it through the detectors. Alert kinds are counted
    /// individually.
    pub async fn record_processed(&self, alerts: &[AlertKind], persistence_failures: usize) {
        let mut inner = self.inner.lock().await;
        inner.processed += 1;
        inner.window_processed += 1;
        inner.persistence_failures += persistence_failures as u64;
        for kind in alerts {
            *inner.alerts.entry(*kind).or_default() += 1;
        }
    }

    pub async fn record_dropped(&self) {
        self.inner.lock().await.dropped += 1;
    }

    pub async fn record_failed(&self, persistence_failure: bool) {
        let mut inner = self.inner.lock().await;
        inner.failed += 1;
        if persistence_failure {
            inner.persistence_failures += 1;
        }
    }

    pub async fn record_reconnect(&self) {
        self.inner.lock().await.reconnects += 1;
    }

    /// Close the current one-second window and push a throughput point.
    pub async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        let point = ThroughputPoint {
            elapsed_secs: self.start.elapsed().as_secs_f64(),
            processed_total: inner.processed,
            messages_per_sec: inner.window_processed as f64,
        };
        inner.messages_per_sec = point.messages_per_sec;
        inner.window_processed = 0;
        inner.ring.push(point);
    }

    pub async fn snapshot(&self) -> MetricsResponse {
        let inner = self.inner.lock().await;
        MetricsResponse {
            state: inner.state,
            received: inner.received,
            processed: inner.processed,
            dropped: inner.dropped,
            failed: inner.failed,
            alerts: inner
                .alerts
                .iter()
                .map(|(kind, n)| (kind.as_str().to_string(), *n))
                .collect(),
            persistence_failures: inner.persistence_failures,
            reconnects: inner.reconnects,
            messages_per_sec: inner.messages_per_sec,
            time_series: inner.ring.iter().cloned().collect(),
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let inner = self.inner.lock().await;
        let status = match (inner.state, inner.degraded.is_empty()) {
            (ConnectionState::Listening, true) => "ok",
            (ConnectionState::Listening, false) => "degraded",
            _ => "unavailable",
        };
        HealthResponse {
            status,
            state: inner.state,
            degraded: inner.degraded.clone(),
            uptime_secs: self.start.elapsed().as_secs_f64(),
        }
    }
}

// ── HTTP server ──────────────────────────────────────────────────────

pub fn router(metrics: DetectorMetrics) -> axum::Router {
    axum::Router::new()
        .route("/health", axum::routing::get(health_handler))
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(metrics)
}

/// Serve `/health` and `/metrics` until `shutdown` flips to true.
pub fn spawn_health_server(
    port: u16,
    metrics: DetectorMetrics,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(port, error = %e, "failed to bind health HTTP server");
                return;
            }
        };

        tracing::info!(port, "health HTTP server listening");

        axum::serve(listener, router(metrics))
            .with_graceful_shutdown(async move {
                let mut rx = shutdown;
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .ok();

        tracing::info!("health HTTP server stopped");
    })
}

/// Roll the throughput window once a second.
pub fn spawn_tick_task(
    metrics: DetectorMetrics,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// 503 unless the stream is listening.
async fn health_handler(State(metrics): State<DetectorMetrics>) -> (StatusCode, Json<HealthResponse>) {
    let health = metrics.health().await;
    let code = if health.state == ConnectionState::Listening {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

async fn metrics_handler(State(metrics): State<DetectorMetrics>) -> Json<MetricsResponse> {
    Json(metrics.snapshot().await)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for i in 1..=4 {
            ring.push(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.iter().cloned().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn counts_alerts_by_kind() {
        let metrics = DetectorMetrics::new();
        metrics.record_received().await;
        metrics.record_received().await;
        metrics
            .record_processed(&[AlertKind::SpcViolation, AlertKind::GlobalOutlier], 0)
            .await;
        metrics.record_processed(&[AlertKind::SpcViolation], 1).await;
        metrics.record_dropped().await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.received, 2);
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.persistence_failures, 1);
        assert_eq!(snap.alerts["SPC_VIOLATION"], 2);
        assert_eq!(snap.alerts["GLOBAL_OUTLIER"], 1);
        assert!(!snap.alerts.contains_key("LOCAL_OUTLIER"));
    }

    #[tokio::test]
    async fn tick_rolls_the_throughput_window() {
        let metrics = DetectorMetrics::new();
        metrics.record_processed(&[], 0).await;
        metrics.record_processed(&[], 0).await;
        metrics.tick().await;
        metrics.tick().await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.time_series.len(), 2);
        assert_eq!(snap.time_series[0].messages_per_sec, 2.0);
        assert_eq!(snap.time_series[1].messages_per_sec, 0.0);
        assert_eq!(snap.time_series[1].processed_total, 2);
    }

    #[tokio::test]
    async fn health_reflects_state_and_degradation() {
        let metrics = DetectorMetrics::new();
        assert_eq!(metrics.health().await.status, "unavailable");

        metrics.set_state(ConnectionState::Listening).await;
        assert_eq!(metrics.health().await.status, "ok");

        metrics.set_degraded(vec!["global".into()]).await;
        let health = metrics.health().await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.degraded, vec!["global".to_string()]);
    }

    #[tokio::test]
    async fn health_handler_is_503_until_listening() {
        let metrics = DetectorMetrics::new();
        let (code, _) = health_handler(State(metrics.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        metrics.set_state(ConnectionState::Listening).await;
        let (code, Json(body)) = health_handler(State(metrics)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }
}
