//! Stream loop state machine against a scripted connector.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plantwatch_bus::{topics, BusError, EventSubscriber, Message};
use plantwatch_compute::{
    ConnectionState, DetectorMetrics, GlobalOutlierScorer, HybridDetector, MessageProcessor,
    StreamConnector, StreamLoop,
};
use plantwatch_core::config::StreamConfig;
use plantwatch_core::{ModelConfig, WritePolicy};
use plantwatch_graph::DependencyGraph;
use plantwatch_storage::{MemoryStore, RecordWriter};
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};

// ── Scripted bus ────────────────────────────────────────────────────

/// Yields whatever the test pushes into its channel; closing the channel
/// looks like a dropped connection.
struct ChannelSubscriber {
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
}

#[async_trait]
impl EventSubscriber for ChannelSubscriber {
    async fn subscribe(&self, _topic_prefix: &str) -> Result<(), BusError> {
        Ok(())
    }

    async fn recv(&self) -> Result<Message, BusError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| BusError::Transport("stream closed".into()))
    }
}

/// Refuses the first `refuse` attempts, then hands out queued streams.
struct ScriptedConnector {
    refuse: usize,
    attempts: AtomicUsize,
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<Message>>>,
}

impl ScriptedConnector {
    fn new(refuse: usize, streams: Vec<mpsc::UnboundedReceiver<Message>>) -> Self {
        Self {
            refuse,
            attempts: AtomicUsize::new(0),
            streams: Mutex::new(streams.into()),
        }
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn EventSubscriber>, BusError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.refuse {
            return Err(BusError::Transport("connection refused".into()));
        }
        match self.streams.lock().await.pop_front() {
            Some(rx) => Ok(Box::new(ChannelSubscriber { rx: Mutex::new(rx) })),
            None => Err(BusError::Transport("no stream available".into())),
        }
    }

    fn describe(&self) -> String {
        "scripted".into()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

struct Fixture {
    stream: StreamLoop,
    audit: MemoryStore,
    metrics: DetectorMetrics,
}

fn stream_config() -> StreamConfig {
    StreamConfig {
        endpoint: "tcp://127.0.0.1:0".into(),
        topic: topics::SENSOR_READING.into(),
        retry_delay_secs: 5,
        connect_timeout_secs: 1,
        idle_timeout_secs: 0,
    }
}

fn fixture(connector: Arc<dyn StreamConnector>, audit: MemoryStore) -> Fixture {
    let writer = RecordWriter::new(
        Arc::new(MemoryStore::new("anomaly_events")),
        Arc::new(audit.clone()),
        Duration::from_secs(1),
        WritePolicy::Swallow,
    );
    let detector = HybridDetector::from_config(GlobalOutlierScorer::disabled(), &ModelConfig::default());
    let processor = MessageProcessor::new(detector, Arc::new(DependencyGraph::empty()), writer, "test");
    let metrics = DetectorMetrics::new();
    let stream = StreamLoop::new(connector, processor, metrics.clone(), &stream_config())
        .with_retry_delay(Duration::from_millis(20));
    Fixture {
        stream,
        audit,
        metrics,
    }
}

fn reading(torque: serde_json::Value) -> Message {
    let payload = json!({
        "machine_id": "M-01",
        "temperature": 1580.0,
        "torque": torque
    });
    Message::new(topics::SENSOR_READING, &payload).unwrap()
}

async fn wait_for_audit(store: &MemoryStore, n: usize) {
    for _ in 0..300 {
        if store.len().await >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} audit records, got {}", store.len().await);
}

async fn wait_for_state(state: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(3), state.wait_for(|s| *s == want))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn retries_until_connected_then_processes() {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = Arc::new(ScriptedConnector::new(2, vec![rx]));
    let f = fixture(connector.clone(), MemoryStore::new("model_audit_log"));
    let mut state = f.stream.state();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(f.stream.run(shutdown_rx));

    wait_for_state(&mut state, ConnectionState::Listening).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);

    tx.send(reading(json!(100.0))).unwrap();
    tx.send(reading(json!(100.2))).unwrap();
    wait_for_audit(&f.audit, 2).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    let snap = f.metrics.snapshot().await;
    assert_eq!(snap.processed, 2);
    assert_eq!(snap.reconnects, 2);
}

#[tokio::test]
async fn malformed_message_does_not_stop_the_loop() {
    let (tx, rx) = mpsc::unbounded_channel();
    let f = fixture(Arc::new(ScriptedConnector::new(0, vec![rx])), MemoryStore::new("model_audit_log"));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(f.stream.run(shutdown_rx));

    tx.send(reading(json!("NaN_garbage"))).unwrap();
    tx.send(reading(json!(100.0))).unwrap();
    wait_for_audit(&f.audit, 1).await;

    let snap = f.metrics.snapshot().await;
    assert_eq!(snap.received, 2);
    assert_eq!(snap.dropped, 1);
    assert_eq!(snap.processed, 1);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn lost_connection_reconnects() {
    let (tx1, rx1) = mpsc::unbounded_channel();
    let (tx2, rx2) = mpsc::unbounded_channel();
    let connector = Arc::new(ScriptedConnector::new(0, vec![rx1, rx2]));
    let f = fixture(connector.clone(), MemoryStore::new("model_audit_log"));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(f.stream.run(shutdown_rx));

    tx1.send(reading(json!(100.0))).unwrap();
    wait_for_audit(&f.audit, 1).await;
    drop(tx1);

    tx2.send(reading(json!(100.1))).unwrap();
    wait_for_audit(&f.audit, 2).await;
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(f.metrics.snapshot().await.reconnects, 1);
}

#[tokio::test]
async fn unreachable_store_blocks_listening() {
    let (_tx, rx) = mpsc::unbounded_channel();
    let audit = MemoryStore::new("model_audit_log");
    audit.set_failing(true);
    let connector = Arc::new(ScriptedConnector::new(0, vec![rx]));
    let f = fixture(connector.clone(), audit.clone());
    let mut state = f.stream.state();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(f.stream.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_ne!(*state.borrow(), ConnectionState::Listening);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    wait_for_state(&mut state, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn shutdown_interrupts_retry_wait() {
    let connector = Arc::new(ScriptedConnector::new(usize::MAX, Vec::new()));
    let f = fixture(connector, MemoryStore::new("model_audit_log"));
    let stream = f.stream.with_retry_delay(Duration::from_secs(60));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(stream.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop without waiting out the retry delay")
        .unwrap();
}

#[tokio::test]
async fn shutdown_lets_the_in_flight_message_finish() {
    let (tx, rx) = mpsc::unbounded_channel();
    let audit = MemoryStore::new("model_audit_log").with_delay(Duration::from_millis(300));
    let f = fixture(Arc::new(ScriptedConnector::new(0, vec![rx])), audit);
    let mut state = f.stream.state();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(f.stream.run(shutdown_rx));

    wait_for_state(&mut state, ConnectionState::Listening).await;
    tx.send(reading(json!(100.0))).unwrap();

    // The audit write is now sleeping inside the store.
    for _ in 0..100 {
        if f.metrics.snapshot().await.received == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(f.metrics.snapshot().await.received, 1);
    assert_eq!(f.audit.len().await, 0);

    shutdown_tx.send(true).unwrap();
    let processor = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop should stop once the message is done")
        .unwrap();

    assert_eq!(f.audit.len().await, 1);
    assert_eq!(processor.detector().local().len(), 1);
    assert_eq!(f.metrics.snapshot().await.processed, 1);
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);
}
