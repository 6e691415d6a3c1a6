use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Transport layer for ZeroMQ connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket at the given path.
    Ipc(PathBuf),

    /// TCP transport for distributed deployment.
    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Parse a ZeroMQ endpoint string such as `tcp://10.0.0.5:5560`.
    pub fn parse(endpoint: &str) -> Result<Self, BusError> {
        if let Some(path) = endpoint.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(BusError::Endpoint(endpoint.to_string()));
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }
        let rest = endpoint
            .strip_prefix("tcp://")
            .ok_or_else(|| BusError::Endpoint(endpoint.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| BusError::Endpoint(endpoint.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| BusError::Endpoint(endpoint.to_string()))?;
        if host.is_empty() {
            return Err(BusError::Endpoint(endpoint.to_string()));
        }
        Ok(Self::tcp(host, port))
    }

    /// Generate the ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(path) => format!("ipc://{}", path.display()),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tcp() {
        let t = Transport::parse("tcp://127.0.0.1:5560").unwrap();
        assert_eq!(t, Transport::tcp("127.0.0.1", 5560));
        assert_eq!(t.to_string(), "tcp://127.0.0.1:5560");
    }

    #[test]
    fn parse_ipc_roundtrips_endpoint() {
        let t = Transport::parse("ipc:///tmp/plantwatch/sensors.sock").unwrap();
        assert_eq!(t, Transport::Ipc(PathBuf::from("/tmp/plantwatch/sensors.sock")));
        assert_eq!(t.endpoint(), "ipc:///tmp/plantwatch/sensors.sock");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Transport::parse("redis://localhost:6379").is_err());
        assert!(Transport::parse("tcp://localhost").is_err());
        assert!(Transport::parse("tcp://localhost:notaport").is_err());
        assert!(Transport::parse("tcp://:5560").is_err());
        assert!(Transport::parse("ipc://").is_err());
    }
}
