//! Safety limits.
//!
//! [`SafetyThresholds::default`] is the stock limit set; per-airframe limits
//! (ceiling, top speed, battery reserve) are injected by the runtime from its
//! configuration.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyThresholds {
    /// At or below: `CRITICAL_BATTERY`.
    pub critical_battery_percent: f64,
    /// At or below (and above critical): `LOW_BATTERY`.
    pub low_battery_percent: f64,
    /// Strictly below: `LOW_VOLTAGE`.
    pub min_voltage_v: f64,
    pub min_gps_fix_type: u8,
    pub min_satellites: u8,
    pub max_horizontal_dilution: f64,
    /// Strictly above: `ALTITUDE_LIMIT`.
    pub max_altitude_m: f64,
    /// Armed below this altitude outside a landing mode: `UNSAFE_MODE`.
    pub unsafe_altitude_m: f64,
    pub max_speed_ms: f64,
    pub max_vertical_speed_ms: f64,
    /// Reconnect attempts after which a disconnected link counts as lost.
    pub max_reconnect_attempts: u32,
    /// Silence on a disconnected link before `COMMUNICATION_DEGRADED`.
    pub degraded_after: Duration,
    pub telemetry_timeout: Duration,
    /// Message age the periodic supervisor reports as stale.
    pub stale_message_after: Duration,
    pub supervisor_interval: Duration,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            critical_battery_percent: 15.0,
            low_battery_percent: 25.0,
            min_voltage_v: 20.0,
            min_gps_fix_type: 2,
            min_satellites: 6,
            max_horizontal_dilution: 3.0,
            max_altitude_m: 120.0,
            unsafe_altitude_m: 1.0,
            max_speed_ms: 30.0,
            max_vertical_speed_ms: 10.0,
            max_reconnect_attempts: 5,
            degraded_after: Duration::from_secs(10),
            telemetry_timeout: Duration::from_secs(10),
            stale_message_after: Duration::from_secs(30),
            supervisor_interval: Duration::from_secs(5),
        }
    }
}
