//! Sliding-window local outlier tracking.

use std::collections::VecDeque;

use plantwatch_core::{Alert, AlertKind, FeatureVector, Severity};

use crate::algorithms::lof::local_outlier_factor;

/// Window and LOF settings. The defaults are the production values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LofParams {
    /// Vectors kept in the window.
    pub window: usize,
    /// Window fill required before the first evaluation.
    pub min_points: usize,
    pub neighbors: usize,
    pub contamination: f64,
    /// A flagged point must also exceed this factor to alert.
    pub factor_threshold: f64,
}

impl Default for LofParams {
    fn default() -> Self {
        Self {
            window: 50,
            min_points: 25,
            neighbors: 20,
            contamination: 0.1,
            factor_threshold: 1.5,
        }
    }
}

/// What one observation produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalOutcome {
    /// LOF of the newest vector; `None` while the window is filling.
    pub factor: Option<f64>,
    /// Newest vector fell below the contamination threshold.
    pub flagged: bool,
    pub alert: Option<Alert>,
}

/// Bounded FIFO of recent vectors, refit on every observation.
#[derive(Debug, Clone)]
pub struct LocalOutlierTracker {
    params: LofParams,
    window: VecDeque<FeatureVector>,
}

impl Default for LocalOutlierTracker {
    fn default() -> Self {
        Self::new(LofParams::default())
    }
}

impl LocalOutlierTracker {
    pub fn new(params: LofParams) -> Self {
        Self {
            params,
            window: VecDeque::with_capacity(params.window + 1),
        }
    }

    pub fn params(&self) -> &LofParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Window contents, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &FeatureVector> {
        self.window.iter()
    }

    /// Append `vector` and judge it against the window it joined.
    pub fn observe(&mut self, vector: FeatureVector) -> LocalOutcome {
        self.window.push_back(vector);
        while self.window.len() > self.params.window {
            self.window.pop_front();
        }

        if self.window.len() < self.params.min_points {
            return LocalOutcome::default();
        }

        let points = self.window.make_contiguous();
        let fit = local_outlier_factor(points, self.params.neighbors, self.params.contamination);
        let (Some(&factor), Some(&flagged)) = (fit.factors.last(), fit.outliers.last()) else {
            return LocalOutcome::default();
        };

        let alert = (flagged && factor > self.params.factor_threshold).then(|| {
            Alert::scored(
                AlertKind::LocalOutlier,
                Severity::Info,
                format!("Local deviation detected (Factor: {factor:.2})"),
                factor,
            )
        });

        LocalOutcome {
            factor: Some(factor),
            flagged,
            alert,
        }
    }
}
