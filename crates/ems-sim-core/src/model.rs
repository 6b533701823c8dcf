//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Sensor records, readings, and registry envelopes."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::RegistryError;

/// Energy source advertised by the registry. Unknown values are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnergySource {
    Solar,
    Grid,
    Other(String),
}

impl EnergySource {
    pub fn is_solar(&self) -> bool {
        matches!(self, EnergySource::Solar)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnergySource::Solar => "Solar",
            EnergySource::Grid => "Grid",
            EnergySource::Other(raw) => raw,
        }
    }
}

impl Default for EnergySource {
    fn default() -> Self {
        EnergySource::Other(String::new())
    }
}

impl From<String> for EnergySource {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Solar" => EnergySource::Solar,
            "Grid" => EnergySource::Grid,
            _ => EnergySource::Other(raw),
        }
    }
}

impl From<EnergySource> for String {
    fn from(source: EnergySource) -> Self {
        match source {
            EnergySource::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for EnergySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational status of a sensor. Only `Active` sensors receive readings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorStatus {
    Active,
    Maintenance,
    Offline,
    Other(String),
}

impl SensorStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SensorStatus::Active)
    }

    pub fn as_str(&self) -> &str {
        match self {
            SensorStatus::Active => "Active",
            SensorStatus::Maintenance => "Maintenance",
            SensorStatus::Offline => "Offline",
            SensorStatus::Other(raw) => raw,
        }
    }
}

impl Default for SensorStatus {
    fn default() -> Self {
        SensorStatus::Other(String::new())
    }
}

impl From<String> for SensorStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Active" => SensorStatus::Active,
            "Maintenance" => SensorStatus::Maintenance,
            "Offline" => SensorStatus::Offline,
            _ => SensorStatus::Other(raw),
        }
    }
}

impl From<SensorStatus> for String {
    fn from(status: SensorStatus) -> Self {
        match status {
            SensorStatus::Other(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor record as published by the registry. Read-only to the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub sensor_id: String,
    #[serde(default)]
    pub district_name: String,
    #[serde(default)]
    pub energy_source: EnergySource,
    #[serde(default)]
    pub status: SensorStatus,
}

impl Sensor {
    pub fn new(
        sensor_id: impl Into<String>,
        district_name: impl Into<String>,
        energy_source: EnergySource,
        status: SensorStatus,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            district_name: district_name.into(),
            energy_source,
            status,
        }
    }
}

/// One synthesized data point, serialized as the ingestion payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    sensor_id: String,
    kwh_usage: f64,
    voltage: i32,
}

impl Reading {
    /// Build a reading; `kwh_usage` is rounded to two decimal places.
    pub fn new(sensor_id: impl Into<String>, kwh_usage: f64, voltage: i32) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            kwh_usage: round_to_hundredths(kwh_usage),
            voltage,
        }
    }

    /// Build a reading from a kWh value that has already been quantized.
    pub(crate) fn from_parts(sensor_id: impl Into<String>, kwh_usage: f64, voltage: i32) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            kwh_usage,
            voltage,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn kwh_usage(&self) -> f64 {
        self.kwh_usage
    }

    pub fn voltage(&self) -> i32 {
        self.voltage
    }
}

pub(crate) fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Response wrapper returned by `GET /sensors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Sensor>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RegistryEnvelope {
    pub fn into_sensors(self) -> Result<Vec<Sensor>, RegistryError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(RegistryError::Unsuccessful(self.message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensor_deserializes_with_unknown_fields() {
        let sensor: Sensor = serde_json::from_value(json!({
            "sensorId": "3f1c",
            "districtName": "Menteng",
            "energySource": "Solar",
            "status": "Active",
            "latitude": -6.19,
            "longitude": 106.83
        }))
        .unwrap();
        assert_eq!(sensor.sensor_id, "3f1c");
        assert_eq!(sensor.district_name, "Menteng");
        assert!(sensor.energy_source.is_solar());
        assert!(sensor.status.is_active());
    }

    #[test]
    fn unknown_source_and_status_are_preserved() {
        let sensor: Sensor = serde_json::from_value(json!({
            "sensorId": "s9",
            "energySource": "Wind",
            "status": "Decommissioned"
        }))
        .unwrap();
        assert_eq!(sensor.energy_source, EnergySource::Other("Wind".into()));
        assert_eq!(sensor.status, SensorStatus::Other("Decommissioned".into()));
        assert_eq!(sensor.district_name, "");
        let back = serde_json::to_value(&sensor).unwrap();
        assert_eq!(back["energySource"], "Wind");
        assert_eq!(back["status"], "Decommissioned");
    }

    #[test]
    fn missing_status_is_not_active() {
        let sensor: Sensor = serde_json::from_value(json!({ "sensorId": "s1" })).unwrap();
        assert!(!sensor.status.is_active());
        assert!(!sensor.energy_source.is_solar());
    }

    #[test]
    fn reading_serializes_as_ingest_payload() {
        let reading = Reading::new("s1", 3.14159, 228);
        let value = serde_json::to_value(&reading).unwrap();
        assert_eq!(
            value,
            json!({ "sensorId": "s1", "kwhUsage": 3.14, "voltage": 228 })
        );
    }

    #[test]
    fn reading_rounds_half_up() {
        assert_eq!(Reading::new("s1", 2.675_1, 220).kwh_usage(), 2.68);
        assert_eq!(Reading::new("s1", 0.004, 220).kwh_usage(), 0.0);
    }

    #[test]
    fn unsuccessful_envelope_carries_message() {
        let envelope: RegistryEnvelope =
            serde_json::from_value(json!({ "success": false, "message": "db offline" })).unwrap();
        match envelope.into_sensors() {
            Err(RegistryError::Unsuccessful(Some(message))) => assert_eq!(message, "db offline"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn successful_envelope_without_data_is_empty() {
        let envelope: RegistryEnvelope = serde_json::from_value(json!({ "success": true })).unwrap();
        assert!(envelope.into_sensors().unwrap().is_empty());
    }
}
