//! Feature extraction: raw stream payload to validated [`SensorReading`].

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use plantwatch_core::{Feature, FeatureVector, FieldValue, RawReading, SensorReading, FEATURE_LAYOUT};

use crate::error::FeatureError;

/// Machine id recorded when a reading does not name its source.
pub const UNKNOWN_MACHINE: &str = "unknown";

/// Extract with the current time as the fallback timestamp.
pub fn extract(raw: &RawReading) -> Result<SensorReading, FeatureError> {
    extract_at(raw, Utc::now())
}

/// Validate a raw reading into a feature vector.
///
/// Absent and null fields take their documented default. Numbers and
/// numeric strings are accepted; anything else, or a non-finite result,
/// rejects the whole reading. Deterministic for a fixed `received_at`.
pub fn extract_at(raw: &RawReading, received_at: DateTime<Utc>) -> Result<SensorReading, FeatureError> {
    let mut features = FeatureVector::defaults();
    for feature in FEATURE_LAYOUT {
        features.set(feature, coerce(feature, field(raw, feature))?);
    }

    let machine_id = raw
        .machine_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| UNKNOWN_MACHINE.to_string());
    let timestamp = raw
        .timestamp
        .clone()
        .unwrap_or_else(|| received_at.to_rfc3339_opts(SecondsFormat::Micros, true));

    Ok(SensorReading {
        timestamp,
        machine_id,
        features,
    })
}

fn field(raw: &RawReading, feature: Feature) -> Option<&FieldValue> {
    match feature {
        Feature::VibrationRms => raw.vibration_rms.as_ref(),
        Feature::Temperature => raw.temperature.as_ref(),
        Feature::Torque => raw.torque.as_ref(),
        Feature::Pressure => raw.pressure.as_ref(),
        Feature::RotationalSpeed => raw.rotational_speed.as_ref(),
        Feature::ToolWear => raw.tool_wear.as_ref(),
    }
}

fn coerce(feature: Feature, value: Option<&FieldValue>) -> Result<f64, FeatureError> {
    let number = match value {
        None | Some(FieldValue::Other(serde_json::Value::Null)) => return Ok(feature.default_value()),
        Some(FieldValue::Number(n)) => *n,
        Some(FieldValue::Text(s)) => s.trim().parse::<f64>().map_err(|_| FeatureError::NotNumeric {
            field: feature.name(),
            raw: format!("{s:?}"),
        })?,
        Some(FieldValue::Other(other)) => {
            return Err(FeatureError::NotNumeric {
                field: feature.name(),
                raw: other.to_string(),
            })
        }
    };

    if !number.is_finite() {
        return Err(FeatureError::NotFinite {
            field: feature.name(),
        });
    }
    Ok(number)
}

/// Milliseconds between the reading's own timestamp and `now`.
///
/// Accepts RFC 3339 and naive ISO timestamps (read as UTC). Unparseable
/// timestamps and clock skew into the future give 0.
pub fn latency_ms(timestamp: &str, now: DateTime<Utc>) -> f64 {
    let parsed = DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(timestamp, fmt).ok())
                .map(|naive| naive.and_utc())
        });

    match parsed {
        Some(sent) => {
            let micros = (now - sent).num_microseconds().unwrap_or(i64::MAX);
            (micros.max(0) as f64) / 1000.0
        }
        None => 0.0,
    }
}
