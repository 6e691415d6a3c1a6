//! Global multivariate outlier check against a pre-trained model.

use std::path::Path;
use std::sync::Arc;

use plantwatch_core::{Alert, AlertKind, FeatureVector, Severity};
use serde::Serialize;
use tracing::{info, warn};

use crate::algorithms::isolation_forest::IsolationForest;

/// A frozen multivariate model that separates inliers from outliers.
///
/// `decision` follows the isolation forest convention: negative means
/// outlier, larger is more normal.
pub trait OutlierModel: Send + Sync {
    fn decision(&self, vector: &FeatureVector) -> f64;

    fn name(&self) -> &str;
}

impl OutlierModel for IsolationForest {
    fn decision(&self, vector: &FeatureVector) -> f64 {
        self.decision_function(vector)
    }

    fn name(&self) -> &str {
        self.version.as_deref().unwrap_or("isolation-forest")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Inlier,
    Outlier,
}

impl Verdict {
    /// Conventional label: 1 for inliers, -1 for outliers.
    pub fn label(self) -> i8 {
        match self {
            Self::Inlier => 1,
            Self::Outlier => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GlobalScore {
    pub verdict: Verdict,
    pub score: f64,
}

/// Wraps an optional model. Without one it classifies nothing.
#[derive(Clone, Default)]
pub struct GlobalOutlierScorer {
    model: Option<Arc<dyn OutlierModel>>,
}

impl GlobalOutlierScorer {
    pub fn new(model: Arc<dyn OutlierModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Scorer with no model; every call returns `None`.
    pub fn disabled() -> Self {
        Self { model: None }
    }

    /// Load an exported forest, or disable the scorer if that fails.
    pub fn load_or_disabled(path: &Path) -> Self {
        match IsolationForest::from_file(path) {
            Ok(forest) => {
                info!(
                    path = %path.display(),
                    model = forest.name(),
                    trees = forest.trees.len(),
                    "loaded global outlier model"
                );
                Self::new(Arc::new(forest))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "global outlier model unavailable, detector disabled");
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    pub fn classify(&self, vector: &FeatureVector) -> Option<GlobalScore> {
        let model = self.model.as_ref()?;
        let score = model.decision(vector);
        let verdict = if score < 0.0 {
            Verdict::Outlier
        } else {
            Verdict::Inlier
        };
        Some(GlobalScore { verdict, score })
    }

    /// The alert for a classification, if it was an outlier.
    pub fn alert(score: &GlobalScore) -> Option<Alert> {
        (score.verdict == Verdict::Outlier).then(|| {
            Alert::scored(
                AlertKind::GlobalOutlier,
                Severity::Warning,
                "Global multivariate anomaly detected (Isolation Forest)",
                score.score,
            )
        })
    }
}
