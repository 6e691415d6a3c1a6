//! Sensor readings as published on the stream and after extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feature::FeatureVector;

/// One sensor field as sent by the producer.
///
/// Floats are kept as decoded, so NaN and infinities survive until
/// extraction rejects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Other(Value),
}

/// Payload of one stream message before validation.
///
/// Every sensor field is optional and loosely typed; producers have
/// historically sent numbers, numeric strings and nulls. Unknown fields
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub vibration_rms: Option<FieldValue>,
    #[serde(default, alias = "temperature_air")]
    pub temperature: Option<FieldValue>,
    #[serde(default)]
    pub torque: Option<FieldValue>,
    #[serde(default)]
    pub pressure: Option<FieldValue>,
    #[serde(default)]
    pub rotational_speed: Option<FieldValue>,
    #[serde(default)]
    pub tool_wear: Option<FieldValue>,
}

/// Reading after feature extraction: identity plus a validated vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub timestamp: String,
    pub machine_id: String,
    pub features: FeatureVector,
}
