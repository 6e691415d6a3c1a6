use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use zeromq::prelude::*;
use zeromq::{PubSocket, SubSocket, ZmqMessage};

use crate::error::BusError;
use crate::message::Message;
use crate::traits::{EventPublisher, EventSubscriber};
use crate::transport::Transport;

// ── Framing ──────────────────────────────────────────────────────────

/// `[topic, envelope]`. The topic frame is what SUB prefix filters see.
fn to_frames(message: &Message) -> Result<ZmqMessage, BusError> {
    let mut frames = ZmqMessage::from(message.topic.as_str());
    frames.push_back(message.to_bytes()?.into());
    Ok(frames)
}

/// Envelope from a received multipart message. A lone frame is taken as
/// a bare envelope from a producer that skips the topic frame.
fn from_frames(frames: &ZmqMessage) -> Result<Message, BusError> {
    let parts: Vec<_> = frames.iter().collect();
    let envelope: &[u8] = match parts.as_slice() {
        [_, envelope, ..] => envelope.as_ref(),
        [only] => only.as_ref(),
        [] => return Err(BusError::Malformed("empty ZMQ message".into())),
    };
    Ok(Message::from_bytes(envelope)?)
}

// ── Publisher ────────────────────────────────────────────────────────

/// PUB socket for anomaly events and worker health.
pub struct ZmqPublisher {
    socket: Mutex<PubSocket>,
}

impl ZmqPublisher {
    /// Connect to an endpoint where a subscriber or forwarder is bound.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = PubSocket::new();
        socket.connect(&transport.endpoint()).await?;
        info!("PUB socket connected");
        Ok(Self::wrap(socket))
    }

    /// Bind and let subscribers connect, as sensor gateways do.
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn bind(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = PubSocket::new();
        socket.bind(&transport.endpoint()).await?;
        info!("PUB socket bound");
        Ok(Self::wrap(socket))
    }

    fn wrap(socket: PubSocket) -> Self {
        Self {
            socket: Mutex::new(socket),
        }
    }
}

#[async_trait]
impl EventPublisher for ZmqPublisher {
    async fn publish(&self, message: Message) -> Result<(), BusError> {
        let frames = to_frames(&message)?;
        self.socket.lock().await.send(frames).await?;
        debug!(topic = %message.topic, correlation_id = %message.correlation_id, "published");
        Ok(())
    }
}

// ── Subscriber ───────────────────────────────────────────────────────

/// SUB socket on the sensor stream.
pub struct ZmqSubscriber {
    socket: Mutex<SubSocket>,
}

impl ZmqSubscriber {
    #[instrument(skip_all, fields(endpoint = %transport))]
    pub async fn connect(transport: &Transport) -> Result<Self, BusError> {
        let mut socket = SubSocket::new();
        socket.connect(&transport.endpoint()).await?;
        info!("SUB socket connected");
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }

    /// Connect and filter to one topic prefix in a single step.
    pub async fn connect_to(transport: &Transport, topic_prefix: &str) -> Result<Self, BusError> {
        let subscriber = Self::connect(transport).await?;
        subscriber.subscribe(topic_prefix).await?;
        Ok(subscriber)
    }
}

#[async_trait]
impl EventSubscriber for ZmqSubscriber {
    /// An empty prefix subscribes to all topics.
    async fn subscribe(&self, topic_prefix: &str) -> Result<(), BusError> {
        self.socket.lock().await.subscribe(topic_prefix).await?;
        info!(topic_prefix, "subscribed");
        Ok(())
    }

    async fn recv(&self) -> Result<Message, BusError> {
        let frames = self.socket.lock().await.recv().await?;
        let message = from_frames(&frames)?;
        debug!(topic = %message.topic, "received");
        Ok(message)
    }
}
