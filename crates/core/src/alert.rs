//! Alert and record types written to the alert and audit stores.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::feature::FeatureVector;

// ── Classification enums ──────────────────────────────────────

/// Which detector raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    GlobalOutlier,
    LocalOutlier,
    SpcViolation,
}

impl AlertKind {
    pub const ALL: [AlertKind; 3] = [Self::GlobalOutlier, Self::LocalOutlier, Self::SpcViolation];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GlobalOutlier => "GLOBAL_OUTLIER",
            Self::LocalOutlier => "LOCAL_OUTLIER",
            Self::SpcViolation => "SPC_VIOLATION",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Plant node criticality class, A being the most critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criticality {
    A,
    B,
    C,
}

/// Ancestor of the alerting machine in the plant topology.
///
/// Metadata fields are empty when the topology references a node in an
/// edge without declaring it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamNode {
    pub logical_id: String,
    pub label: Option<String>,
    pub physical_id: Option<String>,
    pub criticality: Option<Criticality>,
}

// ── Alert ─────────────────────────────────────────────────────

/// One detector finding. Built once, enriched by value, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(default)]
    pub rca_context: Vec<UpstreamNode>,
}

impl Alert {
    /// Alert carrying a detector score.
    pub fn scored(kind: AlertKind, severity: Severity, message: impl Into<String>, score: f64) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            feature: None,
            score: Some(score),
            value: None,
            limit: None,
            rca_context: Vec::new(),
        }
    }

    /// Alert carrying an observed value and the limit it crossed.
    pub fn limit_breach(
        kind: AlertKind,
        severity: Severity,
        message: impl Into<String>,
        feature: impl Into<String>,
        value: f64,
        limit: f64,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            feature: Some(feature.into()),
            score: None,
            value: Some(value),
            limit: Some(limit),
            rca_context: Vec::new(),
        }
    }

    /// Return a copy of this alert annotated with upstream context.
    pub fn with_upstream(self, rca_context: Vec<UpstreamNode>) -> Self {
        Self {
            rca_context,
            ..self
        }
    }
}

// ── Stored records ────────────────────────────────────────────

/// Document written to the alert store when a message raised alerts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub timestamp: String,
    pub machine_id: String,
    pub alerts: Vec<Alert>,
    pub raw_features: FeatureVector,
}

/// Document written to the audit store for every processed message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub machine_id: String,
    pub model_version: String,
    /// Global model label: 1 inlier, -1 outlier, null when the model is unavailable.
    pub prediction: Option<i8>,
    /// Local outlier factor of the newest point when the fit flagged it, else 0.0.
    pub anomaly_score: f64,
    pub latency_ms: f64,
    pub features: FeatureVector,
    pub alert_count: usize,
}
