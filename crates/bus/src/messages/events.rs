//! Event payloads published by the detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Summary of one alert record, published after it has been stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetected {
    pub machine_id: String,
    /// Reading timestamp as sent by the producer.
    pub reading_timestamp: String,
    /// Alert type names, e.g. `SPC_VIOLATION`.
    pub alert_types: Vec<String>,
    /// Highest severity among the alerts.
    pub severity: String,
    /// Number of upstream nodes attached as root-cause context.
    pub upstream_count: usize,
    pub detected_at: DateTime<Utc>,
}

/// Worker health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Periodic heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub status: WorkerStatus,
    /// Free-form reason for a non-healthy status.
    #[serde(default)]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_event_survives_msgpack() {
        let event = AnomalyDetected {
            machine_id: "R6".into(),
            reading_timestamp: "2024-05-01T10:00:00".into(),
            alert_types: vec!["SPC_VIOLATION".into()],
            severity: "critical".into(),
            upstream_count: 2,
            detected_at: Utc::now(),
        };
        let bytes = rmp_serde::to_vec_named(&event).unwrap();
        let back: AnomalyDetected = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn health_detail_defaults_to_none() {
        #[derive(Serialize)]
        struct Legacy {
            worker_id: String,
            status: WorkerStatus,
        }
        let bytes = rmp_serde::to_vec_named(&Legacy {
            worker_id: "detector".into(),
            status: WorkerStatus::Healthy,
        })
        .unwrap();
        let health: WorkerHealth = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(health.detail, None);
    }
}
