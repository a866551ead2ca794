//! `skylink-types` – shared vocabulary of the drone control plane.
//!
//! # Modules
//!
//! - [`command`] – immutable [`Command`] values with [`CommandType`] and
//!   [`CommandPriority`].
//! - [`telemetry`] – the [`Telemetry`] snapshot and per-link
//!   [`ConnectionHealth`].
//! - [`safety`] – [`SafetyAlert`], [`SafetyEvent`], [`SafetyStatus`] and the
//!   [`EmergencyLander`] capability.
//!
//! The crate root holds the types that tie those together: the protocol tag,
//! the flight-controller status snapshot, and the global [`LinkError`].

pub mod command;
pub mod safety;
pub mod telemetry;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use command::{Command, CommandPriority, CommandType, ParamValue};
pub use safety::{
    AlertLevel, EmergencyLander, EventCategory, SafetyAlert, SafetyEvent, SafetyStatus,
};
pub use telemetry::{
    BatteryState, ConnectionHealth, ConnectionStatus, GpsState, MAX_RECENT_ERRORS, Position,
    Telemetry, Velocity,
};

/// Identity tag of a transport protocol.
///
/// The ordering is the order in which failover scans for a replacement
/// primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Streaming JSON over a WebSocket.
    WebSocket,
    /// MAVLink-style binary telemetry protocol.
    Mavlink,
}

impl ProtocolType {
    /// Hardware-style binary protocol, preferred for emergency and mode
    /// commands under protocol-specific routing.
    pub fn is_binary(&self) -> bool {
        matches!(self, ProtocolType::Mavlink)
    }

    /// Parse the key used in connection specifications.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Some(ProtocolType::WebSocket),
            "mavlink" => Some(ProtocolType::Mavlink),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolType::WebSocket => "websocket",
            ProtocolType::Mavlink => "mavlink",
        })
    }
}

/// Fixed phases of the scripted mission, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStep {
    PreflightCheck,
    Takeoff,
    Climb,
    Navigate,
    Hover,
    Return,
    Land,
}

impl MissionStep {
    pub const SEQUENCE: [MissionStep; 7] = [
        MissionStep::PreflightCheck,
        MissionStep::Takeoff,
        MissionStep::Climb,
        MissionStep::Navigate,
        MissionStep::Hover,
        MissionStep::Return,
        MissionStep::Land,
    ];
}

impl fmt::Display for MissionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissionStep::PreflightCheck => "PREFLIGHT_CHECK",
            MissionStep::Takeoff => "TAKEOFF",
            MissionStep::Climb => "CLIMB",
            MissionStep::Navigate => "NAVIGATE",
            MissionStep::Hover => "HOVER",
            MissionStep::Return => "RETURN",
            MissionStep::Land => "LAND",
        })
    }
}

/// Point-in-time view of a flight controller, derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightControllerStatus {
    pub initialized: bool,
    pub connected: bool,
    pub armed: bool,
    pub flight_mode: String,
    pub altitude: f64,
    pub in_mission: bool,
    pub current_mission_step: Option<MissionStep>,
}

/// Global error type of the control plane.
///
/// Routing failures and guard rejections are deliberately *not* errors; they
/// surface as booleans, health records, or warnings.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Invalid connection specification: {0}")]
    InvalidSpec(String),

    #[error("Protocol {0} is not connected")]
    ProtocolUnavailable(ProtocolType),

    #[error("Connection error on {protocol}: {details}")]
    Connection {
        protocol: ProtocolType,
        details: String,
    },

    #[error("No protocol could be connected")]
    NoProtocolConnected,

    #[error("Communication manager is already connected")]
    AlreadyConnected,

    #[error("Channel closed: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_keys_parse() {
        assert_eq!(ProtocolType::from_key("MAVLink"), Some(ProtocolType::Mavlink));
        assert_eq!(ProtocolType::from_key("websocket"), Some(ProtocolType::WebSocket));
        assert_eq!(ProtocolType::from_key("bluetooth"), None);
    }

    #[test]
    fn failover_order_prefers_websocket_first() {
        assert!(ProtocolType::WebSocket < ProtocolType::Mavlink);
    }

    #[test]
    fn mission_sequence_is_fixed() {
        assert_eq!(MissionStep::SEQUENCE.first(), Some(&MissionStep::PreflightCheck));
        assert_eq!(MissionStep::SEQUENCE.last(), Some(&MissionStep::Land));
        assert_eq!(MissionStep::SEQUENCE.len(), 7);
    }

    #[test]
    fn link_error_display() {
        let err = LinkError::ProtocolUnavailable(ProtocolType::Mavlink);
        assert!(err.to_string().contains("mavlink"));

        let err = LinkError::Connection {
            protocol: ProtocolType::WebSocket,
            details: "refused".to_string(),
        };
        assert!(err.to_string().contains("refused"));
    }
}
