//! Turns detector output into the alert and audit documents.

use plantwatch_core::{Alert, AlertRecord, AuditRecord, SensorReading};
use plantwatch_graph::DependencyGraph;

use crate::engine::Analysis;

/// Attach upstream context to every alert. `None` when nothing alerted.
pub fn fuse(reading: &SensorReading, alerts: Vec<Alert>, graph: &DependencyGraph) -> Option<AlertRecord> {
    if alerts.is_empty() {
        return None;
    }

    let upstream = graph.get_upstream_dependencies(&reading.machine_id);
    let alerts = alerts
        .into_iter()
        .map(|alert| alert.with_upstream(upstream.clone()))
        .collect();

    Some(AlertRecord {
        timestamp: reading.timestamp.clone(),
        machine_id: reading.machine_id.clone(),
        alerts,
        raw_features: reading.features,
    })
}

/// Audit entry for one processed reading, written whether or not it alerted.
pub fn audit_record(
    reading: &SensorReading,
    analysis: &Analysis,
    model_version: &str,
    latency_ms: f64,
) -> AuditRecord {
    AuditRecord {
        timestamp: reading.timestamp.clone(),
        machine_id: reading.machine_id.clone(),
        model_version: model_version.to_string(),
        prediction: analysis.global.map(|g| g.verdict.label()),
        anomaly_score: analysis.lof_factor.unwrap_or(0.0),
        latency_ms,
        features: reading.features,
        alert_count: analysis.alerts.len(),
    }
}
