//! Device configuration types

use serde::{Deserialize, Serialize};

/// Connection settings for one controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port the controller is attached to (e.g. "/dev/ttyUSB0")
    pub port_name: String,
    /// Stable port slot used in the hardware identifier
    pub port_index: usize,
    /// Protocol version negotiated with the firmware during discovery
    pub protocol_version: u8,
    /// Serial communication timeout in milliseconds
    pub timeout_ms: u64,
    /// Enable raw TX/RX logging
    pub debug_uart: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttyUSB0".to_string(),
            port_index: 0,
            protocol_version: 0x2A,
            timeout_ms: 1000,
            debug_uart: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeviceConfig::default();
        assert_eq!(config.port_index, 0);
        assert_eq!(config.protocol_version, 0x2A);
        assert_eq!(config.timeout_ms, 1000);
        assert!(!config.debug_uart);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = DeviceConfig {
            port_name: "/dev/ttyUSB3".to_string(),
            port_index: 3,
            protocol_version: 0x2A,
            timeout_ms: 500,
            debug_uart: true,
        };

        let json = serde_json::to_string(&config).unwrap();
        let back: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port_name, "/dev/ttyUSB3");
        assert_eq!(back.port_index, 3);
        assert!(back.debug_uart);
    }
}
