//! Stream ingestion: connect, listen, process one message at a time.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Listening
//!      ▲                        │                  │
//!      └──── retry delay ◀──────┴── fail ◀─────────┘ connection error
//! ```
//!
//! Messages for one machine must arrive in order. The window and SPC
//! counters are process-wide and are corrupted by reordering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use plantwatch_bus::events::AnomalyDetected;
use plantwatch_bus::{topics, BusError, EventPublisher, EventSubscriber, Message, Transport, ZmqSubscriber};
use plantwatch_core::config::StreamConfig;
use plantwatch_core::{AlertKind, AlertRecord, RawReading, Severity};
use plantwatch_graph::DependencyGraph;
use plantwatch_storage::{PersistOutcome, RecordWriter};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::HybridDetector;
use crate::error::{ConnectError, ProcessError};
use crate::features::{extract, latency_ms};
use crate::fusion::{audit_record, fuse};
use crate::health::DetectorMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Listening,
}

// ── Connector ────────────────────────────────────────────────────────

/// Opens a subscription to the sensor stream.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventSubscriber>, BusError>;

    /// Where this connector points, for logs.
    fn describe(&self) -> String;
}

/// SUB socket on a ZeroMQ endpoint, filtered to one topic prefix.
pub struct ZmqConnector {
    transport: Transport,
    topic: String,
}

impl ZmqConnector {
    pub fn new(transport: Transport, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Result<Self, BusError> {
        Ok(Self::new(Transport::parse(&config.endpoint)?, config.topic.clone()))
    }
}

#[async_trait]
impl StreamConnector for ZmqConnector {
    async fn connect(&self) -> Result<Box<dyn EventSubscriber>, BusError> {
        let subscriber = ZmqSubscriber::connect_to(&self.transport, &self.topic).await?;
        Ok(Box::new(subscriber))
    }

    fn describe(&self) -> String {
        format!("{} [{}]", self.transport, self.topic)
    }
}

// ── MessageProcessor ─────────────────────────────────────────────────

/// What one successfully handled message produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub machine_id: String,
    pub alerts: Vec<AlertKind>,
    pub persist: PersistOutcome,
}

/// Extraction, detection, fusion and persistence for a single message.
pub struct MessageProcessor {
    detector: HybridDetector,
    graph: Arc<DependencyGraph>,
    writer: RecordWriter,
    events: Option<Arc<dyn EventPublisher>>,
    model_version: String,
}

impl MessageProcessor {
    pub fn new(
        detector: HybridDetector,
        graph: Arc<DependencyGraph>,
        writer: RecordWriter,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            graph,
            writer,
            events: None,
            model_version: model_version.into(),
        }
    }

    /// Announce every alert record on [`topics::ANOMALY_DETECTED`].
    pub fn with_events(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(publisher);
        self
    }

    pub fn detector(&self) -> &HybridDetector {
        &self.detector
    }

    pub fn writer(&self) -> &RecordWriter {
        &self.writer
    }

    pub async fn process(&mut self, message: &Message) -> Result<Processed, ProcessError> {
        let raw: RawReading = message.decode().map_err(BusError::Deserialization)?;
        let reading = extract(&raw)?;

        let analysis = self.detector.analyze(&reading.features);
        let latency = latency_ms(&reading.timestamp, Utc::now());

        let alerts: Vec<AlertKind> = analysis.alerts.iter().map(|a| a.kind).collect();
        let record = fuse(&reading, analysis.alerts.clone(), &self.graph);
        let audit = audit_record(&reading, &analysis, &self.model_version, latency);

        let persist = self.writer.persist(record.as_ref(), &audit).await?;

        if let Some(record) = &record {
            info!(
                machine_id = %record.machine_id,
                alerts = ?alerts,
                upstream = record.alerts.first().map_or(0, |a| a.rca_context.len()),
                "anomaly detected"
            );
            self.announce(record, message.correlation_id).await;
        }

        debug!(
            machine_id = %reading.machine_id,
            prediction = ?audit.prediction,
            lof = audit.anomaly_score,
            latency_ms = latency,
            "reading processed"
        );

        Ok(Processed {
            machine_id: reading.machine_id,
            alerts,
            persist,
        })
    }

    async fn announce(&self, record: &AlertRecord, correlation_id: Uuid) {
        let Some(publisher) = &self.events else {
            return;
        };

        let event = AnomalyDetected {
            machine_id: record.machine_id.clone(),
            reading_timestamp: record.timestamp.clone(),
            alert_types: record.alerts.iter().map(|a| a.kind.as_str().to_string()).collect(),
            severity: record
                .alerts
                .iter()
                .map(|a| a.severity)
                .max()
                .unwrap_or(Severity::Info)
                .as_str()
                .to_string(),
            upstream_count: record.alerts.first().map_or(0, |a| a.rca_context.len()),
            detected_at: Utc::now(),
        };

        match Message::with_correlation(topics::ANOMALY_DETECTED, &event, correlation_id) {
            Ok(msg) => {
                if let Err(e) = publisher.publish(msg).await {
                    warn!(error = %e, "failed to publish anomaly event");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize anomaly event"),
        }
    }
}

// ── StreamLoop ───────────────────────────────────────────────────────

/// Drives a [`MessageProcessor`] from a reconnecting subscription.
pub struct StreamLoop {
    connector: Arc<dyn StreamConnector>,
    processor: MessageProcessor,
    metrics: DetectorMetrics,
    retry_delay: Duration,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
    state: watch::Sender<ConnectionState>,
}

impl StreamLoop {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        processor: MessageProcessor,
        metrics: DetectorMetrics,
        config: &StreamConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            processor,
            metrics,
            retry_delay: config.retry_delay(),
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
            state,
        }
    }

    /// Override the fixed delay between connect attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Follow connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` becomes true. The message being processed when
    /// the signal arrives is finished first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MessageProcessor {
        let mut attempts: u64 = 0;
        info!(source = %self.connector.describe(), "stream loop starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting).await;
            attempts += 1;
            if attempts > 1 {
                self.metrics.record_reconnect().await;
            }

            let subscriber = match self.connect().await {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    warn!(error = %e, attempt = attempts, retry_in = ?self.retry_delay, "stream connect failed");
                    self.set_state(ConnectionState::Disconnected).await;
                    if Self::sleep_or_shutdown(self.retry_delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(ConnectionState::Listening).await;
            info!(source = %self.connector.describe(), "listening for sensor readings");

            let stop = self.listen(subscriber.as_ref(), &mut shutdown).await;
            drop(subscriber);
            self.set_state(ConnectionState::Disconnected).await;

            if stop || Self::sleep_or_shutdown(self.retry_delay, &mut shutdown).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected).await;
        info!("stream loop stopped");
        self.processor
    }

    /// Subscribe and verify the stores, within the connect timeout.
    async fn connect(&self) -> Result<Box<dyn EventSubscriber>, ConnectError> {
        let attempt = async {
            let subscriber = self.connector.connect().await?;
            self.processor.writer().ping().await?;
            Ok::<_, ConnectError>(subscriber)
        };
        tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout))?
    }

    /// Receive until the connection breaks (`false`) or shutdown (`true`).
    async fn listen(
        &mut self,
        subscriber: &dyn EventSubscriber,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let idle_timeout = self.idle_timeout;
        loop {
            if *shutdown.borrow() {
                return true;
            }

            let next = async {
                match idle_timeout {
                    Some(limit) => match tokio::time::timeout(limit, subscriber.recv()).await {
                        Ok(received) => received,
                        Err(_) => Err(BusError::Timeout(limit)),
                    },
                    None => subscriber.recv().await,
                }
            };

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return true;
                    }
                }
                received = next => match received {
                    Ok(message) => self.handle(message).await,
                    Err(e) if e.is_connection_error() => {
                        warn!(error = %e, "stream connection lost");
                        return false;
                    }
                    Err(e) => {
                        self.metrics.record_received().await;
                        self.metrics.record_dropped().await;
                        warn!(error = %e, "dropping unreadable frame");
                    }
                },
            }
        }
    }

    async fn handle(&mut self, message: Message) {
        self.metrics.record_received().await;
        match self.processor.process(&message).await {
            Ok(processed) => {
                self.metrics
                    .record_processed(&processed.alerts, processed.persist.failures())
                    .await;
            }
            Err(e) if e.is_malformed() => {
                self.metrics.record_dropped().await;
                warn!(
                    topic = %message.topic,
                    correlation_id = %message.correlation_id,
                    error = %e,
                    "dropping malformed message"
                );
            }
            Err(e) => {
                self.metrics
                    .record_failed(matches!(e, ProcessError::Storage(_)))
                    .await;
                warn!(correlation_id = %message.correlation_id, error = %e, "message failed");
            }
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() != state {
            debug!(?state, "stream state");
        }
        self.state.send_replace(state);
        self.metrics.set_state(state).await;
    }

    /// Sleep for `delay`; `true` if shutdown was requested meanwhile.
    async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return *shutdown.borrow(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return true;
                    }
                }
            }
        }
    }
}
