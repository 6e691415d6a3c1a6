//! Statistical process control with run-length hysteresis.
//!
//! A single point outside `mean ± 3σ` is noise. A run of three in a row is
//! a process shift and raises a critical alert on every further violation
//! until an in-limit point resets the run.

use plantwatch_core::config::{Baseline, SpcBaselines};
use plantwatch_core::{Alert, AlertKind, Feature, FeatureVector, Severity};
use serde::Serialize;

const SIGMA: f64 = 3.0;

/// Baselines with a smaller deviation are widened to this.
pub const MIN_STD: f64 = 0.01;

/// Consecutive violations needed before alerting.
pub const RUN_LENGTH: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SpcSignal {
    Torque,
    Temperature,
}

impl SpcSignal {
    pub const ALL: [SpcSignal; 2] = [Self::Torque, Self::Temperature];

    pub const fn feature(self) -> Feature {
        match self {
            Self::Torque => Feature::Torque,
            Self::Temperature => Feature::Temperature,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Torque => "Torque",
            Self::Temperature => "Temperature",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlLimits {
    pub mean: f64,
    pub ucl: f64,
    pub lcl: f64,
}

impl ControlLimits {
    pub fn from_baseline(baseline: Baseline) -> Self {
        let sigma = baseline.std.max(MIN_STD);
        Self {
            mean: baseline.mean,
            ucl: baseline.mean + SIGMA * sigma,
            lcl: baseline.mean - SIGMA * sigma,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lcl && value <= self.ucl
    }
}

#[derive(Debug, Clone)]
struct Chart {
    signal: SpcSignal,
    limits: ControlLimits,
    run: u32,
}

/// One control chart per monitored signal.
#[derive(Debug, Clone)]
pub struct SpcMonitor {
    charts: Vec<Chart>,
}

impl SpcMonitor {
    /// Torque and temperature charts from the model config baselines.
    pub fn new(baselines: &SpcBaselines) -> Self {
        Self::with_baselines([
            (SpcSignal::Torque, baselines.torque()),
            (SpcSignal::Temperature, baselines.temperature()),
        ])
    }

    pub fn with_baselines(baselines: impl IntoIterator<Item = (SpcSignal, Baseline)>) -> Self {
        let charts = baselines
            .into_iter()
            .map(|(signal, baseline)| Chart {
                signal,
                limits: ControlLimits::from_baseline(baseline),
                run: 0,
            })
            .collect();
        Self { charts }
    }

    pub fn limits(&self, signal: SpcSignal) -> Option<ControlLimits> {
        self.chart(signal).map(|c| c.limits)
    }

    /// Current run of consecutive violations, 0 for unmonitored signals.
    pub fn counter(&self, signal: SpcSignal) -> u32 {
        self.chart(signal).map_or(0, |c| c.run)
    }

    fn chart(&self, signal: SpcSignal) -> Option<&Chart> {
        self.charts.iter().find(|c| c.signal == signal)
    }

    /// Feed one value for `signal`. Unmonitored signals are ignored.
    pub fn observe(&mut self, signal: SpcSignal, value: f64) -> Option<Alert> {
        let chart = self.charts.iter_mut().find(|c| c.signal == signal)?;

        if chart.limits.contains(value) {
            chart.run = 0;
            return None;
        }

        chart.run = chart.run.saturating_add(1);
        if chart.run < RUN_LENGTH {
            return None;
        }

        let (relation, bound, limit) = if value > chart.limits.ucl {
            (">", "UCL", chart.limits.ucl)
        } else {
            ("<", "LCL", chart.limits.lcl)
        };
        Some(Alert::limit_breach(
            AlertKind::SpcViolation,
            Severity::Critical,
            format!(
                "{} control limit exceeded ({value:.1} {relation} {bound} {limit:.1}) x{}",
                signal.label(),
                chart.run
            ),
            signal.feature().name(),
            value,
            limit,
        ))
    }

    /// Feed every monitored signal from one vector, in chart order.
    pub fn observe_vector(&mut self, vector: &FeatureVector) -> Vec<Alert> {
        let signals: Vec<SpcSignal> = self.charts.iter().map(|c| c.signal).collect();
        signals
            .into_iter()
            .filter_map(|signal| self.observe(signal, vector.get(signal.feature())))
            .collect()
    }
}
