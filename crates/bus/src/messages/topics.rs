//! Topic constants for PUB/SUB routing.
//!
//! Topics follow the pattern `plantwatch.<domain>.<event>`.

/// One reading from one machine.
pub const SENSOR_READING: &str = "plantwatch.sensor.reading";

/// Fired for every reading that raised at least one alert.
pub const ANOMALY_DETECTED: &str = "plantwatch.anomaly.detected";

/// Periodic worker health heartbeat.
pub const WORKER_HEALTH: &str = "plantwatch.worker.health";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_share_the_plantwatch_namespace() {
        for topic in [SENSOR_READING, ANOMALY_DETECTED, WORKER_HEALTH] {
            assert!(topic.starts_with("plantwatch."), "{topic}");
        }
        // SUB filters are prefix matches; no topic may shadow another.
        assert!(!ANOMALY_DETECTED.starts_with(SENSOR_READING));
        assert!(!SENSOR_READING.starts_with(WORKER_HEALTH));
    }
}
