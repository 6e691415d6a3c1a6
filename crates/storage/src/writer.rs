//! Writes alert and audit records with a bounded timeout per write.

use std::sync::Arc;
use std::time::Duration;

use plantwatch_core::{AlertRecord, AuditRecord, WritePolicy};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::store::DocumentStore;

/// Result of one write attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    /// Nothing to write (no alerts for this message).
    Skipped,
    Failed(String),
    TimedOut,
}

impl WriteStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::TimedOut)
    }
}

/// Status of both writes for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub alert: WriteStatus,
    pub audit: WriteStatus,
}

impl PersistOutcome {
    pub fn failures(&self) -> usize {
        [&self.alert, &self.audit].iter().filter(|s| s.is_failure()).count()
    }
}

/// Routes records to the alert and audit collections.
#[derive(Clone)]
pub struct RecordWriter {
    alerts: Arc<dyn DocumentStore>,
    audit: Arc<dyn DocumentStore>,
    timeout: Duration,
    policy: WritePolicy,
}

impl RecordWriter {
    pub fn new(
        alerts: Arc<dyn DocumentStore>,
        audit: Arc<dyn DocumentStore>,
        timeout: Duration,
        policy: WritePolicy,
    ) -> Self {
        Self {
            alerts,
            audit,
            timeout,
            policy,
        }
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Verify both collections accept writes.
    pub async fn ping(&self) -> Result<(), StorageError> {
        for store in [&self.alerts, &self.audit] {
            match tokio::time::timeout(self.timeout, store.ping()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StorageError::Timeout {
                        collection: store.collection().to_string(),
                        timeout: self.timeout,
                    })
                }
            }
        }
        Ok(())
    }

    /// Write the alert record (if any) and the audit record.
    ///
    /// Failures are logged here. Under [`WritePolicy::Propagate`] the first
    /// failure is also returned, after both writes have been attempted.
    pub async fn persist(
        &self,
        alert: Option<&AlertRecord>,
        audit: &AuditRecord,
    ) -> Result<PersistOutcome, StorageError> {
        let alert_status = match alert {
            Some(record) => self.write(&*self.alerts, record).await,
            None => WriteStatus::Skipped,
        };
        let audit_status = self.write(&*self.audit, audit).await;

        let outcome = PersistOutcome {
            alert: alert_status,
            audit: audit_status,
        };

        if self.policy == WritePolicy::Propagate {
            let failed = [
                (&outcome.alert, self.alerts.collection()),
                (&outcome.audit, self.audit.collection()),
            ]
            .into_iter()
            .find(|(status, _)| status.is_failure());
            if let Some((status, collection)) = failed {
                return Err(match status {
                    WriteStatus::TimedOut => StorageError::Timeout {
                        collection: collection.to_string(),
                        timeout: self.timeout,
                    },
                    other => StorageError::Unavailable(format!("{collection}: {other:?}")),
                });
            }
        }

        Ok(outcome)
    }

    async fn write<T: Serialize>(&self, store: &dyn DocumentStore, record: &T) -> WriteStatus {
        let doc = match serde_json::to_value(record) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(collection = %store.collection(), error = %e, "record not serializable");
                return WriteStatus::Failed(e.to_string());
            }
        };

        match tokio::time::timeout(self.timeout, store.insert(&doc)).await {
            Ok(Ok(())) => {
                debug!(collection = %store.collection(), "record written");
                WriteStatus::Written
            }
            Ok(Err(e)) => {
                warn!(collection = %store.collection(), error = %e, "record write failed");
                WriteStatus::Failed(e.to_string())
            }
            Err(_) => {
                warn!(collection = %store.collection(), timeout = ?self.timeout, "record write timed out");
                WriteStatus::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use plantwatch_core::{Alert, AlertKind, FeatureVector, Severity};

    fn audit() -> AuditRecord {
        AuditRecord {
            timestamp: "2024-05-01T10:00:00".into(),
            machine_id: "R6".into(),
            model_version: "test".into(),
            prediction: Some(1),
            anomaly_score: 0.0,
            latency_ms: 1.0,
            features: FeatureVector::defaults(),
            alert_count: 1,
        }
    }

    fn alert_record() -> AlertRecord {
        AlertRecord {
            timestamp: "2024-05-01T10:00:00".into(),
            machine_id: "R6".into(),
            alerts: vec![Alert::scored(AlertKind::GlobalOutlier, Severity::Warning, "x", -0.1)],
            raw_features: FeatureVector::defaults(),
        }
    }

    fn writer(alerts: &MemoryStore, audit: &MemoryStore, policy: WritePolicy) -> RecordWriter {
        RecordWriter::new(
            Arc::new(alerts.clone()),
            Arc::new(audit.clone()),
            Duration::from_millis(100),
            policy,
        )
    }

    #[tokio::test]
    async fn audit_written_even_without_alerts() {
        let (alerts, audits) = (MemoryStore::new("alerts"), MemoryStore::new("audit"));
        let outcome = writer(&alerts, &audits, WritePolicy::Swallow)
            .persist(None, &audit())
            .await
            .unwrap();

        assert_eq!(outcome.alert, WriteStatus::Skipped);
        assert_eq!(outcome.audit, WriteStatus::Written);
        assert_eq!(alerts.len().await, 0);
        assert_eq!(audits.documents().await[0]["machine_id"], "R6");
    }

    #[tokio::test]
    async fn swallow_policy_reports_but_does_not_fail() {
        let (alerts, audits) = (MemoryStore::new("alerts"), MemoryStore::new("audit"));
        alerts.set_failing(true);

        let outcome = writer(&alerts, &audits, WritePolicy::Swallow)
            .persist(Some(&alert_record()), &audit())
            .await
            .unwrap();

        assert!(matches!(outcome.alert, WriteStatus::Failed(_)));
        assert_eq!(outcome.audit, WriteStatus::Written);
        assert_eq!(outcome.failures(), 1);
    }

    #[tokio::test]
    async fn propagate_policy_returns_error_after_both_writes() {
        let (alerts, audits) = (MemoryStore::new("alerts"), MemoryStore::new("audit"));
        alerts.set_failing(true);

        let err = writer(&alerts, &audits, WritePolicy::Propagate)
            .persist(Some(&alert_record()), &audit())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("alerts"));
        assert_eq!(audits.len().await, 1, "audit write still attempted");
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let alerts = MemoryStore::new("alerts");
        let audits = MemoryStore::new("audit").with_delay(Duration::from_millis(500));

        let outcome = writer(&alerts, &audits, WritePolicy::Swallow)
            .persist(Some(&alert_record()), &audit())
            .await
            .unwrap();
        assert_eq!(outcome.alert, WriteStatus::Written);
        assert_eq!(outcome.audit, WriteStatus::TimedOut);

        let err = writer(&alerts, &audits, WritePolicy::Propagate)
            .persist(None, &audit())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Timeout { .. }));
    }

    #[tokio::test]
    async fn ping_checks_both_collections() {
        let (alerts, audits) = (MemoryStore::new("alerts"), MemoryStore::new("audit"));
        let w = writer(&alerts, &audits, WritePolicy::Swallow);
        assert!(w.ping().await.is_ok());

        audits.set_failing(true);
        assert!(w.ping().await.is_err());
    }
}
