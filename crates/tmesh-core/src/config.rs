//! Node configuration
//!
//! Loaded from TOML; every field has a default matching the deployed
//! firmware, so an empty file (or no file) yields a working node with id 1.
//!
//! ```toml
//! device_id = 5
//!
//! [radio]
//! group = 181
//! tx_power = 7
//!
//! [protocol]
//! allowed_types = "thcvnabde"
//! reject_own_origin = true
//! relay_jitter_ms = 100
//!
//! [schedule]
//! tx_interval_ms = 600000
//! flood_window_ratio = 0.9
//! ```

use crate::error::{ConfigError, Result};
use crate::mesh::cipher::CipherKey;
use crate::mesh::frame::NodeId;
use crate::mesh::relay::RelayConfig;
use crate::mesh::validate::AllowedTypes;
use crate::sensor::SensorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Radio settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Radio group; nodes only hear their own group
    pub group: u8,
    /// Transmit power level, 0..=7
    pub tx_power: u8,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            group: 181,
            tx_power: 7,
        }
    }
}

/// Wire protocol settings shared by a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Shared cipher key
    pub key: CipherKey,
    /// Accepted message types
    pub allowed_types: AllowedTypes,
    /// Drop frames originated by this node
    pub reject_own_origin: bool,
    /// Upper bound of the random pre-relay delay, ms
    pub relay_jitter_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            key: CipherKey::default(),
            allowed_types: AllowedTypes::default(),
            reject_own_origin: true,
            relay_jitter_ms: 100,
        }
    }
}

/// Periodic task timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Own-reading transmit period, ms
    pub tx_interval_ms: u64,
    /// Flood window as a fraction of the transmit period
    pub flood_window_ratio: f64,
    /// Sensor measure period, ms
    pub measure_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tx_interval_ms: 10 * 60 * 1000,
            flood_window_ratio: 0.9,
            measure_interval_ms: 8000,
        }
    }
}

/// Complete configuration of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Device id, 1..=99
    pub device_id: u8,
    /// Radio settings
    pub radio: RadioConfig,
    /// Protocol settings
    pub protocol: ProtocolConfig,
    /// Task timing
    pub schedule: ScheduleConfig,
    /// Sensor driver settings
    pub sensor: SensorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: 1,
            radio: RadioConfig::default(),
            protocol: ProtocolConfig::default(),
            schedule: ScheduleConfig::default(),
            sensor: SensorConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Default configuration for `device_id`
    pub fn for_device(device_id: u8) -> Self {
        Self {
            device_id,
            ..Default::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check ranges the types alone cannot express
    pub fn validate(&self) -> Result<()> {
        self.node_id()?;
        let ratio = self.schedule.flood_window_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::Schedule(format!(
                "flood_window_ratio {} outside (0, 1]",
                ratio
            )));
        }
        if self.schedule.tx_interval_ms == 0 {
            return Err(ConfigError::Schedule("tx_interval_ms must be > 0".to_string()));
        }
        if self.schedule.measure_interval_ms == 0 {
            return Err(ConfigError::Schedule(
                "measure_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Device id as a node id
    pub fn node_id(&self) -> Result<NodeId> {
        NodeId::new(self.device_id).ok_or(ConfigError::InvalidDeviceId(self.device_id))
    }

    /// Flood window, `trunc(ratio * tx_interval)`
    pub fn flood_window(&self) -> Duration {
        let ms = (self.schedule.tx_interval_ms as f64 * self.schedule.flood_window_ratio).trunc();
        Duration::from_millis(ms as u64)
    }

    /// Half of the transmit period, at least 1 ms
    pub fn half_interval(&self) -> Duration {
        Duration::from_millis((self.schedule.tx_interval_ms / 2).max(1))
    }

    /// Relay policy derived from this configuration
    pub fn relay_config(&self) -> Result<RelayConfig> {
        Ok(RelayConfig {
            node_id: self.node_id()?,
            reject_own_origin: self.protocol.reject_own_origin,
            jitter_ms: self.protocol.relay_jitter_ms,
            flood_window: self.flood_window(),
            allowed_types: self.protocol.allowed_types.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.radio.group, 181);
        assert_eq!(config.radio.tx_power, 7);
        assert_eq!(config.protocol.key.as_bytes(), &[0u8; 19]);
        assert_eq!(config.flood_window(), Duration::from_millis(540_000));
        assert_eq!(config.half_interval(), Duration::from_millis(300_000));
    }

    #[test]
    fn test_partial_toml() {
        let config = NodeConfig::from_toml_str(
            r#"
            device_id = 42

            [protocol]
            allowed_types = "thcvnab"
            reject_own_origin = false

            [schedule]
            tx_interval_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id, 42);
        assert!(!config.protocol.reject_own_origin);
        assert_eq!(config.flood_window(), Duration::from_millis(900));
        assert_eq!(config.schedule.measure_interval_ms, 8000);

        let relay = config.relay_config().unwrap();
        assert_eq!(relay.node_id.get(), 42);
        assert_eq!(relay.jitter_ms, 100);
    }

    #[test]
    fn test_key_from_toml() {
        let mut key = vec![7u8; 19];
        key[0] = 1;
        let text = format!("[protocol]\nkey = {:?}\n", key);
        let config = NodeConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.protocol.key.as_bytes()[0], 1);

        let short = "[protocol]\nkey = [1, 2, 3]\n";
        assert!(NodeConfig::from_toml_str(short).is_err());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            NodeConfig::for_device(0).validate(),
            Err(ConfigError::InvalidDeviceId(0))
        ));
        assert!(NodeConfig::for_device(100).validate().is_err());
        assert!(NodeConfig::for_device(99).validate().is_ok());

        let mut config = NodeConfig::default();
        config.schedule.flood_window_ratio = 0.0;
        assert!(config.validate().is_err());
        config.schedule.flood_window_ratio = 1.5;
        assert!(config.validate().is_err());
        config.schedule.flood_window_ratio = 1.0;
        config.schedule.tx_interval_ms = 0;
        assert!(config.validate().is_err());

        assert!(NodeConfig::from_toml_str("[protocol]\nallowed_types = \"\"\n").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = NodeConfig::for_device(9);
        config.protocol.relay_jitter_ms = 0;
        let text = config.to_toml_string().unwrap();
        assert_eq!(NodeConfig::from_toml_str(&text).unwrap(), config);
    }
}
