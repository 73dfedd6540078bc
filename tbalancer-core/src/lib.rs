//! T-Balancer Core Library
//!
//! Shared types, the hardware/sensor object model, and the ring buffer used
//! by the telemetry acquisition engine. This crate performs no I/O; the
//! serial transport and protocol decoding live in `tbalancer-hardware`.

pub mod config;
pub mod error;
pub mod ring;
pub mod sensor;
pub mod types;

// Re-export commonly used types
pub use config::DeviceConfig;
pub use error::{Result, TBalancerError};
pub use ring::RingBuffer;
pub use sensor::{Hardware, Parameter, Sensor, SensorEvent, SensorEventKind, SensorKey};
pub use types::{HardwareKind, HardwareSnapshot, Identifier, SensorKind, SensorSnapshot};
