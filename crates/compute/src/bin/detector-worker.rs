//! detector-worker: hybrid anomaly detector on the sensor stream.
//!
//! Subscribes to `plantwatch.sensor.reading` and, for every reading, runs
//! the global, local and SPC detectors, stores an audit record and (when
//! anything alerted) an alert record with upstream root-cause context.
//!
//! Publishes, when `EVENTS_ENDPOINT` is set:
//! - `plantwatch.anomaly.detected` for every alert record
//! - `plantwatch.worker.health` heartbeats
//!
//! Serves `GET /health` and `GET /metrics` on `HEALTH_PORT`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use plantwatch_bus::events::WorkerStatus;
use plantwatch_bus::{
    BusError, EventPublisher, Transport, Worker, WorkerBuilder, WorkerRunner, ZmqPublisher,
};
use plantwatch_compute::health::{spawn_health_server, spawn_tick_task};
use plantwatch_compute::{
    ConnectionState, DetectorMetrics, GlobalOutlierScorer, HybridDetector, MessageProcessor,
    StreamLoop, ZmqConnector,
};
use plantwatch_core::config::load_dotenv;
use plantwatch_core::{Config, ModelConfig};
use plantwatch_graph::DependencyGraph;
use plantwatch_storage::{DocumentStore, JsonlStore, RecordWriter};

const WORKER_NAME: &str = "detector-worker";

// ── CLI ─────────────────────────────────────────────────────────────

/// Real-time hybrid anomaly detector. Flags override the environment.
#[derive(Parser, Debug)]
#[command(name = "detector-worker", version, about)]
struct Cli {
    /// Exported isolation forest artifact.
    #[arg(long)]
    model: Option<PathBuf>,

    /// SPC baselines (`model_config.json`).
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// Plant topology JSON.
    #[arg(long)]
    topology: Option<PathBuf>,

    /// Sensor stream endpoint, e.g. `tcp://127.0.0.1:5560`.
    #[arg(long)]
    endpoint: Option<String>,

    /// Port for `/health` and `/metrics`.
    #[arg(long)]
    health_port: Option<u16>,

    /// Run the detectors in parallel for each reading.
    #[arg(long)]
    parallel: bool,

    /// Health ping interval in seconds.
    #[arg(long, env = "DETECTOR_HEALTH_INTERVAL", default_value_t = 30)]
    health_interval: u64,

    /// Shutdown timeout in seconds.
    #[arg(long, env = "DETECTOR_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    shutdown_timeout: u64,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.model {
            config.detector.model_path = path.clone();
        }
        if let Some(path) = &self.model_config {
            config.detector.model_config_path = path.clone();
        }
        if let Some(path) = &self.topology {
            config.detector.topology_path = path.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.stream.endpoint = endpoint.clone();
        }
        if let Some(port) = self.health_port {
            config.service.health_port = port;
        }
        if self.parallel {
            config.detector.parallel_detectors = true;
        }
    }
}

// ── DetectorWorker ──────────────────────────────────────────────────

/// Owns the stream loop task and reports its state in health pings.
struct DetectorWorker {
    stream: Mutex<Option<StreamLoop>>,
    task: Mutex<Option<JoinHandle<MessageProcessor>>>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    degraded: Vec<&'static str>,
}

impl DetectorWorker {
    fn new(stream: StreamLoop, shutdown: watch::Sender<bool>, degraded: Vec<&'static str>) -> Self {
        let state = stream.state();
        Self {
            stream: Mutex::new(Some(stream)),
            task: Mutex::new(None),
            shutdown,
            state,
            degraded,
        }
    }
}

#[async_trait]
impl Worker for DetectorWorker {
    async fn start(&self) -> Result<(), BusError> {
        let Some(stream) = self.stream.lock().await.take() else {
            return Err(BusError::Transport("detector worker already started".into()));
        };
        let shutdown = self.shutdown.subscribe();
        *self.task.lock().await = Some(tokio::spawn(stream.run(shutdown)));
        info!("detector worker started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), BusError> {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.lock().await.take() {
            match task.await {
                Ok(_) => info!("stream loop drained"),
                Err(e) => error!(error = %e, "stream loop task failed"),
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        WORKER_NAME
    }

    fn status(&self) -> (WorkerStatus, Option<String>) {
        let state = *self.state.borrow();
        if state != ConnectionState::Listening {
            return (WorkerStatus::Degraded, Some(format!("stream {state:?}")));
        }
        if !self.degraded.is_empty() {
            return (
                WorkerStatus::Degraded,
                Some(format!("running without: {}", self.degraded.join(", "))),
            );
        }
        (WorkerStatus::Healthy, None)
    }
}

// ── main ────────────────────────────────────────────────────────────

async fn connect_events(endpoint: Option<&str>) -> Option<Arc<dyn EventPublisher>> {
    let endpoint = endpoint?;
    let transport = match Transport::parse(endpoint) {
        Ok(t) => t,
        Err(e) => {
            warn!(endpoint, error = %e, "invalid events endpoint, events disabled");
            return None;
        }
    };
    match ZmqPublisher::connect(&transport).await {
        Ok(publisher) => Some(Arc::new(publisher)),
        Err(e) => {
            warn!(endpoint, error = %e, "events publisher unavailable, events disabled");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply(&mut config);
    config.log_summary();

    // Detectors: a missing model or config degrades, it never blocks startup.
    let scorer = GlobalOutlierScorer::load_or_disabled(&config.detector.model_path);
    let model_config = ModelConfig::load_or_default(&config.detector.model_config_path);
    let graph = Arc::new(DependencyGraph::load_or_empty(&config.detector.topology_path));

    let detector = HybridDetector::from_config(scorer, &model_config)
        .parallel(config.detector.parallel_detectors);
    detector.log_summary();
    let degraded = detector.degraded();

    let alerts: Arc<dyn DocumentStore> = Arc::new(JsonlStore::new(
        &config.storage.data_dir,
        config.storage.alert_collection.clone(),
    ));
    let audit: Arc<dyn DocumentStore> = Arc::new(JsonlStore::new(
        &config.storage.data_dir,
        config.storage.audit_collection.clone(),
    ));
    let writer = RecordWriter::new(
        alerts,
        audit,
        config.storage.write_timeout(),
        config.storage.write_policy,
    );

    let events = connect_events(config.service.events_endpoint.as_deref()).await;

    let mut processor =
        MessageProcessor::new(detector, graph, writer, config.detector.model_version.clone());
    if let Some(publisher) = &events {
        processor = processor.with_events(publisher.clone());
    }

    let metrics = DetectorMetrics::new();
    metrics
        .set_degraded(degraded.iter().map(|d| d.to_string()).collect())
        .await;

    let connector = Arc::new(ZmqConnector::from_config(&config.stream)?);
    let stream = StreamLoop::new(connector, processor, metrics.clone(), &config.stream);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = spawn_health_server(config.service.health_port, metrics.clone(), shutdown_rx.clone());
    let ticker = spawn_tick_task(metrics, shutdown_rx);

    let worker = Arc::new(DetectorWorker::new(stream, shutdown_tx, degraded));

    let runner_config = WorkerBuilder::new(WORKER_NAME)
        .health_interval(Duration::from_secs(cli.health_interval))
        .shutdown_timeout(Duration::from_secs(cli.shutdown_timeout))
        .build();

    info!("detector-worker starting");

    // Blocks until SIGINT/SIGTERM.
    WorkerRunner::run(worker.clone(), events, runner_config, None).await?;

    // A stop that timed out leaves the flag unset.
    worker.shutdown.send_replace(true);
    let _ = tokio::join!(server, ticker);

    info!("detector-worker exited cleanly");
    Ok(())
}
