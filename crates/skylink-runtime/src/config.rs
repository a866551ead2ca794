//! Control-plane configuration, read from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working simulated setup.
//!
//! ```toml
//! connection = "unified://websocket=ws://10.0.0.2:8765;mavlink=udpin:0.0.0.0:14550;primary=mavlink"
//! simulated = false
//!
//! [limits]
//! max_altitude_m = 80.0
//! max_speed_ms = 18.0
//!
//! [timing]
//! health_interval_ms = 2000
//!
//! [mavlink]
//! target_system = 1
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use skylink_middleware::{ConnectionSpec, DefaultAdapterFactory, ManagerConfig};
use skylink_safety::SafetyThresholds;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "skylink.toml";
pub const DEFAULT_CONNECTION: &str =
    "unified://websocket=sim://ws;mavlink=sim://mav;primary=mavlink;distribution=PRIMARY_ONLY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Capability limits of the airframe.  Feeds [`SafetyThresholds`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneLimits {
    pub max_altitude_m: f64,
    pub max_speed_ms: f64,
    pub max_vertical_speed_ms: f64,
    /// Critical battery level.
    pub min_battery_percent: f64,
    pub low_battery_percent: f64,
    pub min_voltage_v: f64,
}

impl Default for DroneLimits {
    fn default() -> Self {
        let stock = SafetyThresholds::default();
        Self {
            max_altitude_m: stock.max_altitude_m,
            max_speed_ms: stock.max_speed_ms,
            max_vertical_speed_ms: stock.max_vertical_speed_ms,
            min_battery_percent: stock.critical_battery_percent,
            low_battery_percent: stock.low_battery_percent,
            min_voltage_v: stock.min_voltage_v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub health_interval_ms: u64,
    pub failover_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
    pub supervisor_interval_ms: u64,
    pub telemetry_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        let manager = ManagerConfig::default();
        let safety = SafetyThresholds::default();
        Self {
            health_interval_ms: millis(manager.health_interval),
            failover_interval_ms: millis(manager.failover_interval),
            reconnect_interval_ms: millis(manager.reconnect_interval),
            max_reconnect_attempts: manager.max_reconnect_attempts,
            supervisor_interval_ms: millis(safety.supervisor_interval),
            telemetry_timeout_ms: millis(safety.telemetry_timeout),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MavlinkConfig {
    pub target_system: u8,
    pub target_component: u8,
}

impl Default for MavlinkConfig {
    fn default() -> Self {
        let stock = DefaultAdapterFactory::default();
        Self {
            target_system: stock.mavlink_target_system,
            target_component: stock.mavlink_target_component,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Connection specification handed to the communication manager.
    pub connection: String,
    /// Wire simulated links to a simulated drone instead of real transports.
    pub simulated: bool,
    pub limits: DroneLimits,
    pub timing: TimingConfig,
    pub mavlink: MavlinkConfig,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
            simulated: true,
            limits: DroneLimits::default(),
            timing: TimingConfig::default(),
            mavlink: MavlinkConfig::default(),
        }
    }
}

impl ControlPlaneConfig {
    /// Load `path`, apply `SKYLINK_*` overrides and validate.  A missing file
    /// yields the defaults (overrides still apply).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        fs::write(path, raw).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides.  Unparseable values are ignored.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `SKYLINK_CONNECTION` | `connection` |
    /// | `SKYLINK_SIMULATED` | `simulated` |
    /// | `SKYLINK_MAX_ALTITUDE_M` | `limits.max_altitude_m` |
    /// | `SKYLINK_MAX_SPEED_MS` | `limits.max_speed_ms` |
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SKYLINK_CONNECTION") {
            self.connection = v;
        }
        if let Ok(v) = std::env::var("SKYLINK_SIMULATED")
            && let Ok(simulated) = v.parse::<bool>()
        {
            self.simulated = simulated;
        }
        if let Ok(v) = std::env::var("SKYLINK_MAX_ALTITUDE_M")
            && let Ok(altitude) = v.parse::<f64>()
        {
            self.limits.max_altitude_m = altitude;
        }
        if let Ok(v) = std::env::var("SKYLINK_MAX_SPEED_MS")
            && let Ok(speed) = v.parse::<f64>()
        {
            self.limits.max_speed_ms = speed;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ConnectionSpec::parse(&self.connection).map_err(|e| ConfigError::Invalid {
            field: "connection",
            reason: e.to_string(),
        })?;
        let positive = [
            ("limits.max_altitude_m", self.limits.max_altitude_m),
            ("limits.max_speed_ms", self.limits.max_speed_ms),
            ("limits.max_vertical_speed_ms", self.limits.max_vertical_speed_ms),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} must be a positive number"),
                });
            }
        }
        if self.limits.min_battery_percent > self.limits.low_battery_percent {
            return Err(ConfigError::Invalid {
                field: "limits.min_battery_percent",
                reason: "must not exceed limits.low_battery_percent".to_string(),
            });
        }
        let intervals = [
            ("timing.health_interval_ms", self.timing.health_interval_ms),
            ("timing.failover_interval_ms", self.timing.failover_interval_ms),
            ("timing.reconnect_interval_ms", self.timing.reconnect_interval_ms),
            ("timing.supervisor_interval_ms", self.timing.supervisor_interval_ms),
            ("timing.telemetry_timeout_ms", self.timing.telemetry_timeout_ms),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "interval must be non-zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            health_interval: Duration::from_millis(self.timing.health_interval_ms),
            failover_interval: Duration::from_millis(self.timing.failover_interval_ms),
            reconnect_interval: Duration::from_millis(self.timing.reconnect_interval_ms),
            max_reconnect_attempts: self.timing.max_reconnect_attempts,
        }
    }

    pub fn safety_thresholds(&self) -> SafetyThresholds {
        SafetyThresholds {
            max_altitude_m: self.limits.max_altitude_m,
            max_speed_ms: self.limits.max_speed_ms,
            max_vertical_speed_ms: self.limits.max_vertical_speed_ms,
            critical_battery_percent: self.limits.min_battery_percent,
            low_battery_percent: self.limits.low_battery_percent,
            min_voltage_v: self.limits.min_voltage_v,
            max_reconnect_attempts: self.timing.max_reconnect_attempts,
            supervisor_interval: Duration::from_millis(self.timing.supervisor_interval_ms),
            telemetry_timeout: Duration::from_millis(self.timing.telemetry_timeout_ms),
            ..SafetyThresholds::default()
        }
    }

    pub fn adapter_factory(&self) -> DefaultAdapterFactory {
        DefaultAdapterFactory {
            mavlink_target_system: self.mavlink.target_system,
            mavlink_target_component: self.mavlink.target_component,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_thresholds() {
        let config = ControlPlaneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.safety_thresholds(), SafetyThresholds::default());
        assert_eq!(config.manager_config(), ManagerConfig::default());
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let mut config = ControlPlaneConfig::default();
        config.limits.max_altitude_m = 60.0;
        config.timing.health_interval_ms = 500;
        config.save(&path).expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        let loaded: ControlPlaneConfig = toml::from_str(&raw).expect("parse");
        assert_eq!(loaded, config);
        assert_eq!(loaded.safety_thresholds().max_altitude_m, 60.0);
        assert_eq!(
            loaded.manager_config().health_interval,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: ControlPlaneConfig = toml::from_str(
            r#"
            simulated = false
            [limits]
            max_speed_ms = 12.5
            "#,
        )
        .expect("parse");
        assert!(!config.simulated);
        assert_eq!(config.limits.max_speed_ms, 12.5);
        assert_eq!(config.limits.max_altitude_m, 120.0);
        assert_eq!(config.connection, DEFAULT_CONNECTION);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let config = ControlPlaneConfig::load(&dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.mavlink, MavlinkConfig::default());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "simulated = \"maybe\"").expect("write");
        assert!(matches!(
            ControlPlaneConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_connection_is_rejected() {
        let config = ControlPlaneConfig {
            connection: "unified://bogus=1".to_string(),
            ..ControlPlaneConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "connection", .. })
        ));
    }

    #[test]
    fn inverted_battery_levels_are_rejected() {
        let mut config = ControlPlaneConfig::default();
        config.limits.min_battery_percent = 30.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("SKYLINK_MAX_ALTITUDE_M", "95.5");
            std::env::set_var("SKYLINK_MAX_SPEED_MS", "fast");
            std::env::set_var("SKYLINK_SIMULATED", "false");
        }
        let mut config = ControlPlaneConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.limits.max_altitude_m, 95.5);
        assert_eq!(config.limits.max_speed_ms, 30.0);
        assert!(!config.simulated);
        unsafe {
            std::env::remove_var("SKYLINK_MAX_ALTITUDE_M");
            std::env::remove_var("SKYLINK_MAX_SPEED_MS");
            std::env::remove_var("SKYLINK_SIMULATED");
        }
    }
}
