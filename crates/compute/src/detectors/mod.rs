//! The three detectors fused by the hybrid engine.

pub mod global;
pub mod local;
pub mod spc;

pub use global::{GlobalOutlierScorer, GlobalScore, OutlierModel, Verdict};
pub use local::{LocalOutcome, LocalOutlierTracker, LofParams};
pub use spc::{ControlLimits, SpcMonitor, SpcSignal};
