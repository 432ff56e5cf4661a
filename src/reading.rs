//! Conditioned sensor readings.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The physical channel a reading was taken from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Platen temperature in °C.
    Temperature,
    /// Pneumatic line pressure in kPa.
    Pressure,
    /// Ram distance in mm.
    Distance,
    /// Relative humidity in %.
    Humidity,
    /// Infrared presence sensor watching for the bread.
    IrBread,
    /// Infrared safety sensor watching for the operator's hand.
    IrHand,
    /// Any other channel name reported by the device.
    #[serde(untagged)]
    Other(String),
}

impl SensorKind {
    /// Canonical lower-case name used on the wire and in file names.
    pub fn as_str(&self) -> &str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Pressure => "pressure",
            SensorKind::Distance => "distance",
            SensorKind::Humidity => "humidity",
            SensorKind::IrBread => "ir_bread",
            SensorKind::IrHand => "ir_hand",
            SensorKind::Other(name) => name,
        }
    }

    /// Resolve a device-native channel label (Portuguese or English) to a sensor kind.
    pub fn from_alias(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "temperatura" | "temperature" => SensorKind::Temperature,
            "pressao" | "pressão" | "pressure" => SensorKind::Pressure,
            "distancia" | "distância" | "distance" => SensorKind::Distance,
            "umidade" | "umidade_relativa" | "humidity" => SensorKind::Humidity,
            "ir_pao" | "ir_bread" => SensorKind::IrBread,
            "ir_mao" | "ir_hand" => SensorKind::IrHand,
            other => SensorKind::Other(other.to_string()),
        }
    }

    /// Continuous channels run through the filter chain.
    pub fn is_continuous(&self) -> bool {
        matches!(
            self,
            SensorKind::Temperature
                | SensorKind::Pressure
                | SensorKind::Distance
                | SensorKind::Humidity
        )
    }

    /// Binary proximity flags, thresholded instead of filtered.
    pub fn is_digital(&self) -> bool {
        matches!(self, SensorKind::IrBread | SensorKind::IrHand)
    }

    /// Engineering unit reported with this channel, if any.
    pub fn default_unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("C"),
            SensorKind::Pressure => Some("kPa"),
            SensorKind::Distance => Some("mm"),
            SensorKind::Humidity => Some("%"),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conditioned value from one device channel.
///
/// Immutable once constructed; `value` may be NaN when the chain could not
/// produce a valid number and no hold-last substitution applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Device the reading came from.
    pub device_id: String,
    /// Channel within the device.
    pub sensor: SensorKind,
    /// Conditioned value. NaN is serialized as `null`.
    #[serde(deserialize_with = "nan_from_null")]
    pub value: f64,
    /// Engineering unit, when known.
    #[serde(default)]
    pub unit: Option<String>,
    /// Acquisition time, or the replay emission time.
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Build a reading stamped with the current time and the sensor's default unit.
    pub fn now(device_id: impl Into<String>, sensor: SensorKind, value: f64) -> Self {
        let unit = sensor.default_unit().map(str::to_string);
        Self {
            device_id: device_id.into(),
            sensor,
            value,
            unit,
            timestamp: Utc::now(),
        }
    }
}

/// NaN is written as JSON `null`; read it back the same way.
fn nan_from_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_kinds() {
        assert_eq!(SensorKind::from_alias("TEMPERATURA"), SensorKind::Temperature);
        assert_eq!(SensorKind::from_alias(" Pressão "), SensorKind::Pressure);
        assert_eq!(SensorKind::from_alias("distância"), SensorKind::Distance);
        assert_eq!(SensorKind::from_alias("umidade_relativa"), SensorKind::Humidity);
        assert_eq!(
            SensorKind::from_alias("vibration"),
            SensorKind::Other("vibration".into())
        );
    }

    #[test]
    fn serializes_snake_case() {
        let reading = Reading::now("arduino-01", SensorKind::IrBread, 1.0);
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["sensor"], "ir_bread");
        assert_eq!(json["unit"], serde_json::Value::Null);

        let other = serde_json::to_value(SensorKind::Other("rpm".into())).unwrap();
        assert_eq!(other, "rpm");
    }

    #[test]
    fn nan_value_serializes_as_null() {
        let reading = Reading::now("arduino-01", SensorKind::Pressure, f64::NAN);
        let json = serde_json::to_value(&reading).unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["unit"], "kPa");

        let back: Reading = serde_json::from_value(json).unwrap();
        assert!(back.value.is_nan());
    }
}
