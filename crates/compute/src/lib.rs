pub mod algorithms;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod features;
pub mod fusion;
pub mod health;
pub mod stream;

pub use detectors::{GlobalOutlierScorer, LocalOutlierTracker, OutlierModel, SpcMonitor};
pub use engine::{Analysis, HybridDetector};
pub use error::{ConnectError, FeatureError, ModelError, ProcessError};
pub use health::DetectorMetrics;
pub use stream::{ConnectionState, MessageProcessor, StreamConnector, StreamLoop, ZmqConnector};
