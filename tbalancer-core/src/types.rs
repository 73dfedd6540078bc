//! Core types and data structures for the T-Balancer sensor model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for hardware and sensors
///
/// Identifiers are lowercase `/`-separated path strings such as `/big-ng/0`
/// or `/big-ng/0/temperature/3`, composed from a hardware type tag (plus a
/// port index where relevant) and extended one segment at a time. External
/// publishers key on them, so they must remain stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Build an identifier from root segments
    pub fn new(segments: &[&str]) -> Self {
        let mut path = String::new();
        for segment in segments {
            path.push('/');
            path.push_str(segment);
        }
        Self(path)
    }

    /// Extend this identifier with one more segment
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.0, segment))
    }

    /// The identifier as a path string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sensor classes reported by the supported devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Temperature in degrees Celsius
    Temperature,
    /// Fan speed in revolutions per minute
    Fan,
    /// Coolant flow in liters per hour
    Flow,
    /// Channel output level as a percentage
    Control,
    /// Utilization as a percentage
    Load,
    /// Raw counter or size values
    Data,
}

impl SensorKind {
    /// Identifier segment for this sensor class
    pub fn tag(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Fan => "fan",
            SensorKind::Flow => "flow",
            SensorKind::Control => "control",
            SensorKind::Load => "load",
            SensorKind::Data => "data",
        }
    }
}

/// Closed set of hardware device classes
///
/// Decode logic dispatches on these tags; adding a device family means
/// adding a variant here rather than subclassing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareKind {
    /// T-Balancer bigNG fan/temperature controller
    TBalancer,
    /// miniNG sub-unit chained behind a bigNG
    MiniNg,
    /// Mainboard-attached sensors
    Mainboard,
    /// Memory statistics
    Ram,
}

impl HardwareKind {
    /// Identifier segment for this device class
    pub fn tag(&self) -> &'static str {
        match self {
            HardwareKind::TBalancer => "big-ng",
            HardwareKind::MiniNg => "mini-ng",
            HardwareKind::Mainboard => "mainboard",
            HardwareKind::Ram => "ram",
        }
    }
}

/// Read-only view of one sensor at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Stable sensor identifier
    pub id: Identifier,
    /// Display name
    pub name: String,
    /// Sensor class
    pub kind: SensorKind,
    /// Index unique within kind and owning hardware
    pub index: usize,
    /// Current value, absent until the first valid reading
    pub value: Option<f32>,
    /// Smallest value observed so far
    pub min: Option<f32>,
    /// Largest value observed so far
    pub max: Option<f32>,
}

/// Read-only view of a hardware node and its subtree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    /// Stable hardware identifier
    pub id: Identifier,
    /// Display name
    pub name: String,
    /// Device class
    pub kind: HardwareKind,
    /// Snapshots of the currently active sensors, in activation order
    pub sensors: Vec<SensorSnapshot>,
    /// Owned sub-hardware, in insertion order
    pub sub_hardware: Vec<HardwareSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_composition() {
        let id = Identifier::new(&["big-ng", "0"]);
        assert_eq!(id.as_str(), "/big-ng/0");

        let sensor_id = id.child("temperature").child("3");
        assert_eq!(sensor_id.as_str(), "/big-ng/0/temperature/3");
        assert_eq!(format!("{}", sensor_id), "/big-ng/0/temperature/3");
    }

    #[test]
    fn test_identifier_serialization() {
        let id = Identifier::new(&["big-ng", "1"]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""/big-ng/1""#);

        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_sensor_kind_serialization() {
        let json = serde_json::to_string(&SensorKind::Temperature).unwrap();
        assert_eq!(json, r#""temperature""#);

        let json = serde_json::to_string(&SensorKind::Flow).unwrap();
        assert_eq!(json, r#""flow""#);
    }

    #[test]
    fn test_hardware_kind_tags() {
        assert_eq!(HardwareKind::TBalancer.tag(), "big-ng");
        assert_eq!(HardwareKind::MiniNg.tag(), "mini-ng");

        let json = serde_json::to_string(&HardwareKind::TBalancer).unwrap();
        assert_eq!(json, r#""t-balancer""#);
    }

    #[test]
    fn test_sensor_snapshot_serialization() {
        let snapshot = SensorSnapshot {
            id: Identifier::new(&["big-ng", "0"]).child("fan").child("1"),
            name: "Fan Channel 2".to_string(),
            kind: SensorKind::Fan,
            index: 1,
            value: Some(1380.0),
            min: Some(1200.0),
            max: Some(1500.0),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: SensorSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, snapshot.id);
        assert_eq!(back.value, Some(1380.0));
    }
}
