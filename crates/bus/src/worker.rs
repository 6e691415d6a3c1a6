//! Worker trait and lifecycle management.
//!
//! Provides the [`Worker`] trait for long-running processes,
//! [`WorkerBuilder`] for fluent configuration, and [`WorkerRunner`] for
//! driving a worker with health pings and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::BusError;
use crate::message::Message;
use crate::messages::events::{WorkerHealth, WorkerStatus};
use crate::messages::topics::WORKER_HEALTH;
use crate::traits::EventPublisher;

// ── Worker trait ─────────────────────────────────────────────────────

/// A long-running process managed by [`WorkerRunner`].
#[async_trait]
pub trait Worker: Send + Sync {
    /// Called once when the worker starts.
    async fn start(&self) -> Result<(), BusError>;

    /// Called once during graceful shutdown. Drain in-flight work.
    async fn stop(&self) -> Result<(), BusError>;

    /// Name used in health pings and logging.
    fn name(&self) -> &str;

    /// Status reported by the next health ping.
    fn status(&self) -> (WorkerStatus, Option<String>) {
        (WorkerStatus::Healthy, None)
    }
}

// ── WorkerBuilder ────────────────────────────────────────────────────

/// Fluent builder for a [`WorkerRunnerConfig`].
pub struct WorkerBuilder {
    name: String,
    health_interval: Duration,
    shutdown_timeout: Duration,
}

impl WorkerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            health_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Set the interval between health pings (default: 30s).
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set the maximum time to wait for in-flight work during shutdown (default: 5s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> WorkerRunnerConfig {
        WorkerRunnerConfig {
            name: self.name,
            health_interval: self.health_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

// ── WorkerRunnerConfig ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WorkerRunnerConfig {
    pub name: String,
    pub health_interval: Duration,
    pub shutdown_timeout: Duration,
}

// ── WorkerRunner ─────────────────────────────────────────────────────

/// Runs a [`Worker`] until SIGINT/SIGTERM or a programmatic notify.
///
/// When a publisher is given, a health ping goes out at start, every
/// `health_interval`, and a final `Unhealthy` one on the way down.
pub struct WorkerRunner;

impl WorkerRunner {
    pub async fn run(
        worker: Arc<dyn Worker>,
        publisher: Option<Arc<dyn EventPublisher>>,
        config: WorkerRunnerConfig,
        shutdown_notify: Option<Arc<Notify>>,
    ) -> Result<(), BusError> {
        let worker_name = config.name.clone();
        info!(worker = %worker_name, "starting worker");

        worker.start().await?;
        info!(worker = %worker_name, "worker started");

        let health_handle = publisher.clone().map(|publisher| {
            let worker = worker.clone();
            let name = worker_name.clone();
            let interval = config.health_interval;
            tokio::spawn(async move {
                Self::health_loop(&*publisher, &*worker, &name, interval).await;
            })
        });

        Self::wait_for_shutdown(shutdown_notify).await;
        info!(worker = %worker_name, "shutdown signal received");

        if let Some(handle) = health_handle {
            handle.abort();
        }

        info!(worker = %worker_name, timeout = ?config.shutdown_timeout, "stopping worker");
        match tokio::time::timeout(config.shutdown_timeout, worker.stop()).await {
            Ok(Ok(())) => {
                info!(worker = %worker_name, "worker stopped gracefully");
            }
            Ok(Err(e)) => {
                warn!(worker = %worker_name, error = %e, "worker stop returned error");
            }
            Err(_) => {
                warn!(worker = %worker_name, "worker stop timed out, forcing shutdown");
            }
        }

        if let Some(publisher) = &publisher {
            Self::publish_health(&**publisher, &worker_name, WorkerStatus::Unhealthy, None).await;
        }

        info!(worker = %worker_name, "worker shutdown complete");
        Ok(())
    }

    /// Publish the worker's status now and then once per interval.
    async fn health_loop(
        publisher: &dyn EventPublisher,
        worker: &dyn Worker,
        worker_name: &str,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let (status, detail) = worker.status();
            Self::publish_health(publisher, worker_name, status, detail).await;
        }
    }

    async fn publish_health(
        publisher: &dyn EventPublisher,
        worker_name: &str,
        status: WorkerStatus,
        detail: Option<String>,
    ) {
        let health = WorkerHealth {
            worker_id: worker_name.to_string(),
            status,
            detail,
        };

        match Message::new(WORKER_HEALTH, &health) {
            Ok(msg) => {
                if let Err(e) = publisher.publish(msg).await {
                    warn!(worker = %worker_name, error = %e, "failed to publish health ping");
                }
            }
            Err(e) => {
                warn!(worker = %worker_name, error = %e, "failed to serialize health ping");
            }
        }
    }

    /// Wait for either an OS shutdown signal or a programmatic notification.
    async fn wait_for_shutdown(external: Option<Arc<Notify>>) {
        match external {
            Some(notify) => {
                tokio::select! {
                    _ = Self::os_signal() => {}
                    _ = notify.notified() => {}
                }
            }
            None => {
                Self::os_signal().await;
            }
        }
    }

    /// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
    async fn os_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigint, mut sigterm) =
                match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                    (Ok(i), Ok(t)) => (i, t),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "failed to register signal handlers, falling back to ctrl_c");
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl_c");
                std::future::pending::<()>().await;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
