//! Hardware/sensor object model and the activation lifecycle
//!
//! A [`Hardware`] node owns its sensors and sub-hardware exclusively.
//! Sensors are stored in slots addressed by copyable [`SensorKey`]s, so the
//! decoder can pre-size its channel tables and mutate values without holding
//! references into the tree.
//!
//! Deactivation is two-phase: the first `deactivate` parks an active sensor
//! in a pending-removal set so consumers observe one more stale-but-present
//! cycle (a single dropped reading is common link noise, not true removal);
//! the second finalizes the removal and fires the notification.

use crate::types::{HardwareKind, HardwareSnapshot, Identifier, SensorKind, SensorSnapshot};
use tracing::debug;

/// Key addressing a sensor slot inside its owning [`Hardware`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SensorKey(usize);

/// User-adjustable calibration constant attached to a sensor
///
/// Each parameter carries a device-specific default (a per-channel
/// temperature offset, a flow meter's pulses-per-liter constant, a fan's
/// maximum speed) which the user may override.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    description: String,
    default_value: f32,
    value: f32,
}

impl Parameter {
    /// Create a parameter with its device-specific default
    pub fn new(name: &str, description: &str, default_value: f32) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            default_value,
            value: default_value,
        }
    }

    /// Parameter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current value
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Device-specific default value
    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Override the current value
    pub fn set_value(&mut self, value: f32) {
        self.value = value;
    }

    /// Restore the device-specific default
    pub fn reset(&mut self) {
        self.value = self.default_value;
    }
}

/// A single measured channel
#[derive(Debug)]
pub struct Sensor {
    id: Identifier,
    name: String,
    index: usize,
    kind: SensorKind,
    value: Option<f32>,
    min: Option<f32>,
    max: Option<f32>,
    parameters: Vec<Parameter>,
}

impl Sensor {
    fn new(
        id: Identifier,
        name: &str,
        index: usize,
        kind: SensorKind,
        parameters: Vec<Parameter>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            index,
            kind,
            value: None,
            min: None,
            max: None,
            parameters,
        }
    }

    /// Stable sensor identifier
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index unique within kind and owning hardware
    pub fn index(&self) -> usize {
        self.index
    }

    /// Sensor class
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Current value, absent until the first valid reading
    pub fn value(&self) -> Option<f32> {
        self.value
    }

    /// Smallest value observed since the last explicit reset
    pub fn min(&self) -> Option<f32> {
        self.min
    }

    /// Largest value observed since the last explicit reset
    pub fn max(&self) -> Option<f32> {
        self.max
    }

    /// Store a new reading, widening min/max monotonically
    pub fn set_value(&mut self, value: f32) {
        self.value = Some(value);
        self.min = Some(match self.min {
            Some(min) => min.min(value),
            None => value,
        });
        self.max = Some(match self.max {
            Some(max) => max.max(value),
            None => value,
        });
    }

    /// Forget the observed min/max; the next reading re-establishes them
    pub fn reset_min_max(&mut self) {
        self.min = None;
        self.max = None;
    }

    /// Calibration parameters, in creation order
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Mutable access to the calibration parameters
    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    /// Look up a parameter by name
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    /// Current value of a named parameter
    pub fn parameter_value(&self, name: &str) -> Option<f32> {
        self.parameter(name).map(Parameter::value)
    }

    /// Attach a parameter created after construction (lazy calibration)
    pub fn push_parameter(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    /// Read-only view of the current state
    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            index: self.index,
            value: self.value,
            min: self.min,
            max: self.max,
        }
    }
}

/// Lifecycle notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorEventKind {
    /// Sensor transitioned inactive -> active
    Added,
    /// Sensor removal was finalized
    Removed,
}

/// Lifecycle notification delivered to observers
///
/// Events carry an owned snapshot rather than a live reference, so a
/// callback cannot re-enter or mutate the sensor tree and must not retain
/// device state beyond the call.
#[derive(Debug, Clone)]
pub struct SensorEvent {
    /// What happened
    pub kind: SensorEventKind,
    /// State of the sensor at notification time
    pub sensor: SensorSnapshot,
}

/// Synchronous observer callback; a slow observer blocks the poll cycle
pub type SensorObserver = Box<dyn FnMut(&SensorEvent) + Send>;

/// A hardware node owning sensors and sub-hardware
pub struct Hardware {
    id: Identifier,
    name: String,
    kind: HardwareKind,
    sensors: Vec<Sensor>,
    active: Vec<SensorKey>,
    deactivating: Vec<SensorKey>,
    sub_hardware: Vec<Hardware>,
    observers: Vec<SensorObserver>,
}

impl Hardware {
    /// Create a hardware node
    ///
    /// The identifier is composed from the kind's type tag plus the port
    /// index where one applies (`/big-ng/0`).
    pub fn new(name: &str, kind: HardwareKind, port_index: Option<usize>) -> Self {
        let id = match port_index {
            Some(index) => Identifier::new(&[kind.tag(), &index.to_string()]),
            None => Identifier::new(&[kind.tag()]),
        };
        Self {
            id,
            name: name.to_string(),
            kind,
            sensors: Vec::new(),
            active: Vec::new(),
            deactivating: Vec::new(),
            sub_hardware: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Stable hardware identifier
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device class
    pub fn kind(&self) -> HardwareKind {
        self.kind
    }

    /// Create a sensor slot on this hardware
    ///
    /// Sensors start inactive and are not exposed to consumers until the
    /// first `activate`. The returned key stays valid for the lifetime of
    /// the hardware.
    pub fn add_sensor(
        &mut self,
        name: &str,
        index: usize,
        kind: SensorKind,
        parameters: Vec<Parameter>,
    ) -> SensorKey {
        let id = self.id.child(kind.tag()).child(&index.to_string());
        let key = SensorKey(self.sensors.len());
        self.sensors
            .push(Sensor::new(id, name, index, kind, parameters));
        key
    }

    /// Number of sensor slots (active or not)
    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// Borrow a sensor slot
    pub fn sensor(&self, key: SensorKey) -> &Sensor {
        &self.sensors[key.0]
    }

    /// Mutably borrow a sensor slot
    pub fn sensor_mut(&mut self, key: SensorKey) -> &mut Sensor {
        &mut self.sensors[key.0]
    }

    /// Attach an owned sub-hardware node
    pub fn add_sub_hardware(&mut self, hardware: Hardware) {
        self.sub_hardware.push(hardware);
    }

    /// Owned sub-hardware, in insertion order
    pub fn sub_hardware(&self) -> &[Hardware] {
        &self.sub_hardware
    }

    /// Mutable access to owned sub-hardware
    pub fn sub_hardware_mut(&mut self) -> &mut [Hardware] {
        &mut self.sub_hardware
    }

    /// Register a synchronous lifecycle observer
    pub fn subscribe(&mut self, observer: SensorObserver) {
        self.observers.push(observer);
    }

    /// Whether the sensor is currently exposed to consumers
    ///
    /// A sensor pending removal is still exposed until the removal is
    /// finalized.
    pub fn is_active(&self, key: SensorKey) -> bool {
        self.active.contains(&key)
    }

    /// Whether the sensor is parked in the pending-removal set
    pub fn is_pending_removal(&self, key: SensorKey) -> bool {
        self.deactivating.contains(&key)
    }

    /// Move a sensor to the active set
    ///
    /// Fires `Added` exactly once per inactive -> active transition.
    /// Re-activating an already active sensor is a no-op; activating a
    /// sensor pending removal cancels the removal without a notification.
    pub fn activate(&mut self, key: SensorKey) {
        if let Some(pos) = self.deactivating.iter().position(|k| *k == key) {
            self.deactivating.remove(pos);
        } else if !self.active.contains(&key) {
            self.active.push(key);
            self.notify(SensorEventKind::Added, key);
        }
    }

    /// Two-phase deactivation
    ///
    /// The first call on an active sensor parks it for pending removal; the
    /// second finalizes the removal and fires `Removed` exactly once.
    /// Deactivating an inactive sensor is a no-op.
    pub fn deactivate(&mut self, key: SensorKey) {
        if let Some(pos) = self.deactivating.iter().position(|k| *k == key) {
            self.deactivating.remove(pos);
            if let Some(active_pos) = self.active.iter().position(|k| *k == key) {
                self.active.remove(active_pos);
            }
            self.notify(SensorEventKind::Removed, key);
        } else if self.active.contains(&key) {
            self.deactivating.push(key);
        }
    }

    /// Currently exposed sensors, in activation order
    pub fn active_sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.active.iter().map(|key| &self.sensors[key.0])
    }

    /// Read-only view of this node and its subtree
    pub fn snapshot(&self) -> HardwareSnapshot {
        HardwareSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            sensors: self.active_sensors().map(Sensor::snapshot).collect(),
            sub_hardware: self.sub_hardware.iter().map(Hardware::snapshot).collect(),
        }
    }

    fn notify(&mut self, kind: SensorEventKind, key: SensorKey) {
        let event = SensorEvent {
            kind,
            sensor: self.sensors[key.0].snapshot(),
        };
        debug!(sensor = %event.sensor.id, kind = ?kind, "sensor lifecycle event");
        for observer in &mut self.observers {
            observer(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn test_hardware() -> Hardware {
        Hardware::new("T-Balancer bigNG", HardwareKind::TBalancer, Some(0))
    }

    fn offset_parameter() -> Vec<Parameter> {
        vec![Parameter::new(
            "Offset",
            "Temperature offset in degrees Celsius.",
            0.0,
        )]
    }

    /// Records lifecycle events for assertions
    fn recording_observer(log: Arc<Mutex<Vec<(SensorEventKind, String)>>>) -> SensorObserver {
        Box::new(move |event: &SensorEvent| {
            log.lock()
                .unwrap()
                .push((event.kind, event.sensor.id.as_str().to_string()));
        })
    }

    #[test]
    fn test_identifiers_compose_from_kind_and_port() {
        let mut hw = test_hardware();
        assert_eq!(hw.id().as_str(), "/big-ng/0");

        let key = hw.add_sensor("Digital Sensor 3", 2, SensorKind::Temperature, Vec::new());
        assert_eq!(hw.sensor(key).id().as_str(), "/big-ng/0/temperature/2");
    }

    #[test]
    fn test_activate_fires_added_once() {
        let mut hw = test_hardware();
        let log = Arc::new(Mutex::new(Vec::new()));
        hw.subscribe(recording_observer(Arc::clone(&log)));

        let key = hw.add_sensor("Fan Channel 1", 0, SensorKind::Fan, Vec::new());
        assert!(!hw.is_active(key));

        hw.activate(key);
        hw.activate(key);

        assert!(hw.is_active(key));
        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, SensorEventKind::Added);
        assert_eq!(events[0].1, "/big-ng/0/fan/0");
    }

    #[test]
    fn test_two_phase_deactivation() {
        let mut hw = test_hardware();
        let log = Arc::new(Mutex::new(Vec::new()));
        hw.subscribe(recording_observer(Arc::clone(&log)));

        let key = hw.add_sensor("Digital Sensor 1", 0, SensorKind::Temperature, Vec::new());
        hw.activate(key);

        // First deactivate parks the sensor; it is still exposed
        hw.deactivate(key);
        assert!(hw.is_active(key));
        assert!(hw.is_pending_removal(key));
        assert_eq!(log.lock().unwrap().len(), 1); // only the Added event

        // Second deactivate finalizes the removal
        hw.deactivate(key);
        assert!(!hw.is_active(key));
        assert!(!hw.is_pending_removal(key));

        let events = log.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0, SensorEventKind::Removed);
    }

    #[test]
    fn test_reactivation_cancels_pending_removal_silently() {
        let mut hw = test_hardware();
        let log = Arc::new(Mutex::new(Vec::new()));
        hw.subscribe(recording_observer(Arc::clone(&log)));

        let key = hw.add_sensor("Digital Sensor 1", 0, SensorKind::Temperature, Vec::new());
        hw.activate(key);
        hw.deactivate(key);
        hw.activate(key);

        assert!(hw.is_active(key));
        assert!(!hw.is_pending_removal(key));
        // Added once; no event for park or cancel
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_deactivate_inactive_sensor_is_noop() {
        let mut hw = test_hardware();
        let log = Arc::new(Mutex::new(Vec::new()));
        hw.subscribe(recording_observer(Arc::clone(&log)));

        let key = hw.add_sensor("Digital Sensor 1", 0, SensorKind::Temperature, Vec::new());
        hw.deactivate(key);

        assert!(!hw.is_active(key));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_min_max_widen_monotonically() {
        let mut hw = test_hardware();
        let key = hw.add_sensor("Digital Sensor 1", 0, SensorKind::Temperature, Vec::new());

        assert_eq!(hw.sensor(key).min(), None);
        assert_eq!(hw.sensor(key).max(), None);

        hw.sensor_mut(key).set_value(30.0);
        assert_eq!(hw.sensor(key).min(), Some(30.0));
        assert_eq!(hw.sensor(key).max(), Some(30.0));

        hw.sensor_mut(key).set_value(25.0);
        assert_eq!(hw.sensor(key).min(), Some(25.0));
        assert_eq!(hw.sensor(key).max(), Some(30.0));

        hw.sensor_mut(key).set_value(42.5);
        assert_eq!(hw.sensor(key).min(), Some(25.0));
        assert_eq!(hw.sensor(key).max(), Some(42.5));
    }

    #[test]
    fn test_reset_min_max_requires_explicit_action() {
        let mut hw = test_hardware();
        let key = hw.add_sensor("Digital Sensor 1", 0, SensorKind::Temperature, Vec::new());

        hw.sensor_mut(key).set_value(30.0);
        hw.sensor_mut(key).reset_min_max();
        assert_eq!(hw.sensor(key).min(), None);
        assert_eq!(hw.sensor(key).max(), None);
        // Value survives the reset
        assert_eq!(hw.sensor(key).value(), Some(30.0));

        hw.sensor_mut(key).set_value(20.0);
        assert_eq!(hw.sensor(key).min(), Some(20.0));
        assert_eq!(hw.sensor(key).max(), Some(20.0));
    }

    #[test]
    fn test_parameter_defaults_and_overrides() {
        let mut hw = test_hardware();
        let key = hw.add_sensor(
            "Flowmeter 1",
            0,
            SensorKind::Flow,
            vec![Parameter::new(
                "PulsesPerLiter",
                "Flow meter impulse rate in pulses per liter.",
                509.0,
            )],
        );

        assert_eq!(hw.sensor(key).parameter_value("PulsesPerLiter"), Some(509.0));
        assert_eq!(hw.sensor(key).parameter_value("Missing"), None);

        let sensor = hw.sensor_mut(key);
        sensor.parameters_mut()[0].set_value(169.0);
        assert_eq!(sensor.parameter_value("PulsesPerLiter"), Some(169.0));

        sensor.parameters_mut()[0].reset();
        assert_eq!(sensor.parameter_value("PulsesPerLiter"), Some(509.0));
        assert_eq!(sensor.parameters()[0].default_value(), 509.0);
    }

    #[test]
    fn test_lazy_parameter_attachment() {
        let mut hw = test_hardware();
        let key = hw.add_sensor("Fan Channel 1", 0, SensorKind::Fan, Vec::new());

        assert!(hw.sensor(key).parameter("MaxRPM").is_none());
        hw.sensor_mut(key).push_parameter(Parameter::new(
            "MaxRPM",
            "Maximum fan speed in revolutions per minute.",
            2300.0,
        ));
        assert_eq!(hw.sensor(key).parameter_value("MaxRPM"), Some(2300.0));
    }

    #[test]
    fn test_active_sensors_iteration_order() {
        let mut hw = test_hardware();
        let a = hw.add_sensor("Digital Sensor 1", 0, SensorKind::Temperature, offset_parameter());
        let b = hw.add_sensor("Digital Sensor 2", 1, SensorKind::Temperature, offset_parameter());
        let c = hw.add_sensor("Digital Sensor 3", 2, SensorKind::Temperature, offset_parameter());

        hw.activate(b);
        hw.activate(a);
        hw.activate(c);

        let names: Vec<&str> = hw.active_sensors().map(Sensor::name).collect();
        assert_eq!(
            names,
            vec!["Digital Sensor 2", "Digital Sensor 1", "Digital Sensor 3"]
        );
    }

    #[test]
    fn test_snapshot_contains_active_subtree() {
        let mut hw = test_hardware();
        let active = hw.add_sensor("Digital Sensor 1", 0, SensorKind::Temperature, Vec::new());
        let _inactive = hw.add_sensor("Digital Sensor 2", 1, SensorKind::Temperature, Vec::new());
        hw.sensor_mut(active).set_value(21.5);
        hw.activate(active);

        let mut sub = Hardware::new("miniNG #1", HardwareKind::MiniNg, None);
        let sub_key = sub.add_sensor("Sensor 1", 0, SensorKind::Temperature, Vec::new());
        sub.activate(sub_key);
        hw.add_sub_hardware(sub);

        let snapshot = hw.snapshot();
        assert_eq!(snapshot.id.as_str(), "/big-ng/0");
        assert_eq!(snapshot.sensors.len(), 1);
        assert_eq!(snapshot.sensors[0].value, Some(21.5));
        assert_eq!(snapshot.sub_hardware.len(), 1);
        assert_eq!(snapshot.sub_hardware[0].id.as_str(), "/mini-ng");
        assert_eq!(snapshot.sub_hardware[0].sensors.len(), 1);
    }
}
