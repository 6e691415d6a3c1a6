//! Worker health pings over a real ZeroMQ PUB/SUB pair.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::timeout;

use plantwatch_bus::events::{WorkerHealth, WorkerStatus};
use plantwatch_bus::topics;
use plantwatch_bus::{
    BusError, EventPublisher, EventSubscriber, Transport, Worker, WorkerBuilder, WorkerRunner,
    ZmqPublisher, ZmqSubscriber,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(200);

struct NoopWorker;

#[async_trait]
impl Worker for NoopWorker {
    async fn start(&self) -> Result<(), BusError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), BusError> {
        Ok(())
    }
    fn name(&self) -> &str {
        "noop"
    }
}

#[tokio::test]
async fn worker_health_pings_visible_to_subscriber() {
    let transport = Transport::tcp("127.0.0.1", 16400);
    let publisher: Arc<dyn EventPublisher> = Arc::new(ZmqPublisher::bind(&transport).await.unwrap());

    let health_sub = ZmqSubscriber::connect(&transport).await.unwrap();
    health_sub.subscribe(topics::WORKER_HEALTH).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let shutdown = Arc::new(Notify::new());
    let config = WorkerBuilder::new("detector-worker")
        .health_interval(Duration::from_millis(100))
        .shutdown_timeout(Duration::from_secs(1))
        .build();

    let s = shutdown.clone();
    let worker_handle = tokio::spawn(async move {
        WorkerRunner::run(Arc::new(NoopWorker), Some(publisher), config, Some(s)).await
    });

    let msg = timeout(TIMEOUT, health_sub.recv())
        .await
        .expect("timed out waiting for health ping")
        .unwrap();

    assert_eq!(msg.topic, topics::WORKER_HEALTH);
    let health: WorkerHealth = msg.decode().unwrap();
    assert_eq!(health.worker_id, "detector-worker");
    assert_eq!(health.status, WorkerStatus::Healthy);

    shutdown.notify_waiters();
    let _ = timeout(TIMEOUT, worker_handle).await;
}
