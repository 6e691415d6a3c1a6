use thiserror::Error;

/// Errors that can occur in the messaging layer.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl BusError {
    /// Whether the socket behind this error should be considered lost.
    ///
    /// Decode failures concern one message only; everything else means the
    /// connection has to be rebuilt.
    pub fn is_connection_error(&self) -> bool {
        !matches!(
            self,
            Self::Serialization(_) | Self::Deserialization(_) | Self::Malformed(_)
        )
    }
}
