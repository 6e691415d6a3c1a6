//! Named feature layout shared by the detectors and the offline models.
//!
//! Every model artifact is trained against a fixed column order. That order
//! lives here as a table of [`Feature`] variants; code indexes vectors by
//! name and artifacts are checked against [`FEATURE_LAYOUT`] when loaded.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::PlantwatchError;

/// Bump when the layout changes so stale artifacts are rejected.
pub const FEATURE_LAYOUT_VERSION: u32 = 1;

/// Number of features in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    VibrationRms,
    Temperature,
    Torque,
    Pressure,
    RotationalSpeed,
    ToolWear,
}

/// Column order expected by every trained model.
pub const FEATURE_LAYOUT: [Feature; FEATURE_COUNT] = [
    Feature::VibrationRms,
    Feature::Temperature,
    Feature::Torque,
    Feature::Pressure,
    Feature::RotationalSpeed,
    Feature::ToolWear,
];

impl Feature {
    /// Position of this feature inside a [`FeatureVector`].
    pub const fn index(self) -> usize {
        match self {
            Self::VibrationRms => 0,
            Self::Temperature => 1,
            Self::Torque => 2,
            Self::Pressure => 3,
            Self::RotationalSpeed => 4,
            Self::ToolWear => 5,
        }
    }

    /// Field name used on the wire and in stored records.
    pub const fn name(self) -> &'static str {
        match self {
            Self::VibrationRms => "vibration_rms",
            Self::Temperature => "temperature",
            Self::Torque => "torque",
            Self::Pressure => "pressure",
            Self::RotationalSpeed => "rotational_speed",
            Self::ToolWear => "tool_wear",
        }
    }

    /// Value substituted when a reading omits the field.
    pub const fn default_value(self) -> f64 {
        match self {
            Self::VibrationRms => 0.0,
            Self::Temperature => 300.0,
            Self::Torque => 0.0,
            Self::Pressure => 1000.0,
            Self::RotationalSpeed => 2000.0,
            Self::ToolWear => 0.0,
        }
    }

    /// Resolve a column name, accepting the legacy `temperature_air` spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "temperature_air" => Some(Self::Temperature),
            other => FEATURE_LAYOUT.iter().copied().find(|f| f.name() == other),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check that a model's declared column names match [`FEATURE_LAYOUT`] exactly.
pub fn check_layout<S: AsRef<str>>(names: &[S]) -> Result<(), PlantwatchError> {
    if names.len() != FEATURE_COUNT {
        return Err(PlantwatchError::LayoutMismatch(format!(
            "expected {FEATURE_COUNT} features, artifact declares {}",
            names.len()
        )));
    }
    for (position, (declared, expected)) in names.iter().zip(FEATURE_LAYOUT).enumerate() {
        match Feature::from_name(declared.as_ref()) {
            Some(f) if f == expected => {}
            _ => {
                return Err(PlantwatchError::LayoutMismatch(format!(
                    "column {position} is '{}', expected '{expected}'",
                    declared.as_ref()
                )))
            }
        }
    }
    Ok(())
}

/// Fixed-width feature vector in [`FEATURE_LAYOUT`] order.
///
/// Serializes as a map keyed by feature name so stored records stay
/// readable without knowing the layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    /// Vector holding every feature's default.
    pub fn defaults() -> Self {
        let mut values = [0.0; FEATURE_COUNT];
        for f in FEATURE_LAYOUT {
            values[f.index()] = f.default_value();
        }
        Self(values)
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.index()]
    }

    pub fn set(&mut self, feature: Feature, value: f64) {
        self.0[feature.index()] = value;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Iterate `(feature, value)` pairs in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        FEATURE_LAYOUT.iter().map(move |f| (*f, self.get(*f)))
    }

    /// Euclidean distance to another vector.
    pub fn distance(&self, other: &FeatureVector) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for (feature, value) in self.iter() {
            map.serialize_entry(feature.name(), &value)?;
        }
        map.end()
    }
}
