//! Safety alerts, events, and severity status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything the safety supervisor can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyEvent {
    CommunicationLost,
    CommunicationDegraded,
    CommunicationRestored,
    TelemetryTimeout,
    CriticalBattery,
    LowBattery,
    LowVoltage,
    GpsPoor,
    AltitudeLimit,
    UnsafeMode,
    ExcessiveSpeed,
    RapidDescent,
}

/// Coarse grouping used to map a critical event onto a [`SafetyStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    Communication,
    Battery,
    Flight,
    Other,
}

impl SafetyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyEvent::CommunicationLost => "COMMUNICATION_LOST",
            SafetyEvent::CommunicationDegraded => "COMMUNICATION_DEGRADED",
            SafetyEvent::CommunicationRestored => "COMMUNICATION_RESTORED",
            SafetyEvent::TelemetryTimeout => "TELEMETRY_TIMEOUT",
            SafetyEvent::CriticalBattery => "CRITICAL_BATTERY",
            SafetyEvent::LowBattery => "LOW_BATTERY",
            SafetyEvent::LowVoltage => "LOW_VOLTAGE",
            SafetyEvent::GpsPoor => "GPS_POOR",
            SafetyEvent::AltitudeLimit => "ALTITUDE_LIMIT",
            SafetyEvent::UnsafeMode => "UNSAFE_MODE",
            SafetyEvent::ExcessiveSpeed => "EXCESSIVE_SPEED",
            SafetyEvent::RapidDescent => "RAPID_DESCENT",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            SafetyEvent::CommunicationLost
            | SafetyEvent::CommunicationDegraded
            | SafetyEvent::CommunicationRestored
            | SafetyEvent::TelemetryTimeout => EventCategory::Communication,
            SafetyEvent::CriticalBattery | SafetyEvent::LowBattery | SafetyEvent::LowVoltage => {
                EventCategory::Battery
            }
            SafetyEvent::AltitudeLimit
            | SafetyEvent::ExcessiveSpeed
            | SafetyEvent::RapidDescent => EventCategory::Flight,
            SafetyEvent::GpsPoor | SafetyEvent::UnsafeMode => EventCategory::Other,
        }
    }

    /// Events whose critical occurrence forces an emergency landing.
    pub fn triggers_emergency_landing(&self) -> bool {
        matches!(
            self,
            SafetyEvent::CommunicationLost
                | SafetyEvent::TelemetryTimeout
                | SafetyEvent::CriticalBattery
                | SafetyEvent::AltitudeLimit
                | SafetyEvent::ExcessiveSpeed
        )
    }
}

impl fmt::Display for SafetyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        })
    }
}

/// Append-only notification published by the safety supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAlert {
    pub event: SafetyEvent,
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SafetyAlert {
    pub fn new(event: SafetyEvent, level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            event,
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Worst currently known severity of a supervised link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SafetyStatus {
    #[default]
    Normal,
    Warning,
    CriticalCommunication,
    CriticalBattery,
    CriticalFlight,
    CriticalOther,
}

impl SafetyStatus {
    pub fn is_critical(&self) -> bool {
        !matches!(self, SafetyStatus::Normal | SafetyStatus::Warning)
    }

    /// Critical status corresponding to an event category.
    pub fn critical_for(category: EventCategory) -> Self {
        match category {
            EventCategory::Communication => SafetyStatus::CriticalCommunication,
            EventCategory::Battery => SafetyStatus::CriticalBattery,
            EventCategory::Flight => SafetyStatus::CriticalFlight,
            EventCategory::Other => SafetyStatus::CriticalOther,
        }
    }
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SafetyStatus::Normal => "NORMAL",
            SafetyStatus::Warning => "WARNING",
            SafetyStatus::CriticalCommunication => "CRITICAL_COMMUNICATION",
            SafetyStatus::CriticalBattery => "CRITICAL_BATTERY",
            SafetyStatus::CriticalFlight => "CRITICAL_FLIGHT",
            SafetyStatus::CriticalOther => "CRITICAL_OTHER",
        })
    }
}

/// Capability handed to the safety supervisor so it can force a landing
/// without touching flight-controller internals.
///
/// Implementations must return promptly; the landing itself runs on a task
/// owned by the implementor.
pub trait EmergencyLander: Send + Sync {
    fn request_emergency_landing(&self, reason: String);
}
