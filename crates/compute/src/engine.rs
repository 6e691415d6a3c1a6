use plantwatch_core::{Alert, FeatureVector, ModelConfig};
use serde::Serialize;
use tracing::info;

use crate::detectors::{
    GlobalOutlierScorer, GlobalScore, LocalOutlierTracker, LofParams, SpcMonitor, SpcSignal,
};

/// Everything the three detectors said about one vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    /// `None` when the global model is unavailable.
    pub global: Option<GlobalScore>,
    /// LOF of the vector when the fit flagged it; `None` otherwise.
    pub lof_factor: Option<f64>,
    /// Global, then local, then SPC alerts.
    pub alerts: Vec<Alert>,
}

/// The global, local and SPC detectors run together on every vector.
///
/// The global scorer is immutable after load. The window and the SPC run
/// counters are owned here and mutated only through [`HybridDetector::analyze`].
pub struct HybridDetector {
    global: GlobalOutlierScorer,
    local: LocalOutlierTracker,
    spc: SpcMonitor,
    parallel: bool,
}

impl HybridDetector {
    pub fn new(global: GlobalOutlierScorer, local: LocalOutlierTracker, spc: SpcMonitor) -> Self {
        Self {
            global,
            local,
            spc,
            parallel: false,
        }
    }

    /// Production detector set with baselines from `model_config`.
    pub fn from_config(global: GlobalOutlierScorer, model_config: &ModelConfig) -> Self {
        Self::new(
            global,
            LocalOutlierTracker::new(LofParams::default()),
            SpcMonitor::new(&model_config.spc),
        )
    }

    /// Fan the detectors out on the rayon pool for each vector.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn global(&self) -> &GlobalOutlierScorer {
        &self.global
    }

    pub fn local(&self) -> &LocalOutlierTracker {
        &self.local
    }

    pub fn spc(&self) -> &SpcMonitor {
        &self.spc
    }

    /// Names of detectors running without their model.
    pub fn degraded(&self) -> Vec<&'static str> {
        if self.global.is_enabled() {
            Vec::new()
        } else {
            vec!["global"]
        }
    }

    pub fn analyze(&mut self, vector: &FeatureVector) -> Analysis {
        let Self {
            global,
            local,
            spc,
            parallel,
        } = self;

        let (global_score, (local_outcome, spc_alerts)) = if *parallel {
            rayon::join(
                || global.classify(vector),
                || rayon::join(|| local.observe(*vector), || spc.observe_vector(vector)),
            )
        } else {
            let g = global.classify(vector);
            let l = local.observe(*vector);
            let s = spc.observe_vector(vector);
            (g, (l, s))
        };

        let mut alerts = Vec::with_capacity(2 + spc_alerts.len());
        alerts.extend(global_score.as_ref().and_then(GlobalOutlierScorer::alert));
        alerts.extend(local_outcome.alert);
        alerts.extend(spc_alerts);

        Analysis {
            global: global_score,
            lof_factor: local_outcome.factor.filter(|_| local_outcome.flagged),
            alerts,
        }
    }

    pub fn log_summary(&self) {
        let limits = |s: SpcSignal| self.spc.limits(s).map(|l| (l.lcl, l.ucl));
        info!(
            global_enabled = self.global.is_enabled(),
            lof_window = self.local.params().window,
            lof_neighbors = self.local.params().neighbors,
            torque_limits = ?limits(SpcSignal::Torque),
            temperature_limits = ?limits(SpcSignal::Temperature),
            parallel = self.parallel,
            "hybrid detector ready"
        );
    }
}
