pub mod alert;
pub mod config;
pub mod error;
pub mod feature;
pub mod reading;

pub use alert::*;
pub use config::{Config, ModelConfig, WritePolicy};
pub use error::*;
pub use feature::{Feature, FeatureVector, FEATURE_LAYOUT};
pub use reading::{FieldValue, RawReading, SensorReading};
