//! Drone telemetry snapshot and link health records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Maximum number of error strings a [`ConnectionHealth`] retains.
pub const MAX_RECENT_ERRORS: usize = 10;

/// Local-frame and geodetic position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above the take-off point.
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    /// Vertical speed, positive up (m/s).
    pub vz: f64,
    /// Ground speed magnitude (m/s).
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatteryState {
    pub voltage_v: f64,
    pub current_a: f64,
    pub percentage: f64,
    pub temperature_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsState {
    /// 0 = no GPS, 1 = no fix, 2 = 2D, 3 = 3D, …
    pub fix_type: u8,
    pub satellite_count: u8,
    pub horizontal_dilution: f64,
}

/// One telemetry reading.  Each reading replaces the previous "latest"
/// snapshot; the control plane keeps no history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub position: Position,
    pub velocity: Velocity,
    pub battery: BatteryState,
    pub gps: GpsState,
    pub altitude: f64,
    /// Degrees, 0–360.
    pub heading: f64,
    pub flight_mode: String,
    pub armed: bool,
    pub timestamp: DateTime<Utc>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            position: Position::default(),
            velocity: Velocity::default(),
            battery: BatteryState::default(),
            gps: GpsState::default(),
            altitude: 0.0,
            heading: 0.0,
            flight_mode: "DISARMED".to_string(),
            armed: false,
            timestamp: Utc::now(),
        }
    }
}

/// Link state of one adapter, or of the aggregate link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Degraded,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Degraded => "DEGRADED",
            ConnectionStatus::Disconnected => "DISCONNECTED",
        })
    }
}

/// Health record of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub status: ConnectionStatus,
    pub last_message_received_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    /// Oldest first, capped at [`MAX_RECENT_ERRORS`].
    pub recent_errors: VecDeque<String>,
}

impl ConnectionHealth {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            last_message_received_at: None,
            reconnect_attempts: 0,
            recent_errors: VecDeque::new(),
        }
    }

    pub fn disconnected() -> Self {
        Self::new(ConnectionStatus::Disconnected)
    }

    /// Append an error, evicting the oldest once the cap is reached.
    pub fn record_error(&mut self, error: impl Into<String>) {
        if self.recent_errors.len() == MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error.into());
    }

    pub fn is_connected(&self) -> bool {
        self.status != ConnectionStatus::Disconnected
    }

    /// Time since the last received message, `None` if nothing was ever
    /// received.
    pub fn message_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_message_received_at.map(|t| now - t)
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_errors_are_bounded_and_ordered() {
        let mut health = ConnectionHealth::disconnected();
        for i in 0..(MAX_RECENT_ERRORS + 3) {
            health.record_error(format!("e{i}"));
        }
        assert_eq!(health.recent_errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(health.recent_errors.front().map(String::as_str), Some("e3"));
        assert_eq!(
            health.recent_errors.back().map(String::as_str),
            Some(format!("e{}", MAX_RECENT_ERRORS + 2).as_str())
        );
    }

    #[test]
    fn message_age_is_none_without_traffic() {
        let mut health = ConnectionHealth::new(ConnectionStatus::Connected);
        assert!(health.message_age(Utc::now()).is_none());

        let now = Utc::now();
        health.last_message_received_at = Some(now - Duration::seconds(12));
        assert_eq!(health.message_age(now), Some(Duration::seconds(12)));
    }

    #[test]
    fn degraded_still_counts_as_connected() {
        assert!(ConnectionHealth::new(ConnectionStatus::Degraded).is_connected());
        assert!(!ConnectionHealth::disconnected().is_connected());
    }
}
