//! Pilot / mission commands routed from the ground side to the drone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// The action a [`Command`] asks the drone to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Arm,
    Disarm,
    Takeoff,
    Land,
    EmergencyLand,
    Hover,
    SetMode,
    StartMission,
    AbortMission,
    Goto,
    /// Anything the control plane does not recognise.  Flight controllers log
    /// and ignore it.
    Unknown,
}

impl CommandType {
    /// Wire / log name, e.g. `"EMERGENCY_LAND"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Arm => "ARM",
            CommandType::Disarm => "DISARM",
            CommandType::Takeoff => "TAKEOFF",
            CommandType::Land => "LAND",
            CommandType::EmergencyLand => "EMERGENCY_LAND",
            CommandType::Hover => "HOVER",
            CommandType::SetMode => "SET_MODE",
            CommandType::StartMission => "START_MISSION",
            CommandType::AbortMission => "ABORT_MISSION",
            CommandType::Goto => "GOTO",
            CommandType::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire name case-insensitively.  Unrecognised names map to
    /// [`CommandType::Unknown`] rather than failing.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "ARM" => CommandType::Arm,
            "DISARM" => CommandType::Disarm,
            "TAKEOFF" => CommandType::Takeoff,
            "LAND" => CommandType::Land,
            "EMERGENCY_LAND" => CommandType::EmergencyLand,
            "HOVER" => CommandType::Hover,
            "SET_MODE" => CommandType::SetMode,
            "START_MISSION" => CommandType::StartMission,
            "ABORT_MISSION" => CommandType::AbortMission,
            "GOTO" => CommandType::Goto,
            _ => CommandType::Unknown,
        }
    }

    /// Commands that change the autopilot's flight mode.
    pub fn is_mode_change(&self) -> bool {
        matches!(self, CommandType::SetMode)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority.  `Emergency` commands jump every queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPriority {
    #[default]
    Normal,
    Emergency,
}

/// A single parameter value carried by a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric view; text values are parsed leniently.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(s) => s.trim().parse().ok(),
            ParamValue::Bool(_) => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Number(n) => n.to_string(),
            ParamValue::Text(s) => s.clone(),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// An immutable command.  Build it with [`Command::new`] and the `with_*`
/// builders; once handed to the communication manager it is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    id: String,
    #[serde(rename = "type")]
    command_type: CommandType,
    #[serde(default)]
    parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    priority: CommandPriority,
    issued_at: DateTime<Utc>,
}

impl Command {
    /// New normal-priority command with a fresh UUID id.
    pub fn new(command_type: CommandType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command_type,
            parameters: BTreeMap::new(),
            priority: CommandPriority::Normal,
            issued_at: Utc::now(),
        }
    }

    /// Shorthand for an emergency-priority command.
    pub fn emergency(command_type: CommandType) -> Self {
        Self::new(command_type).with_priority(CommandPriority::Emergency)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: CommandPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn priority(&self) -> CommandPriority {
        self.priority
    }

    pub fn is_emergency(&self) -> bool {
        self.priority == CommandPriority::Emergency
    }

    pub fn parameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.parameters
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(ParamValue::as_f64)
    }

    pub fn param_text(&self, key: &str) -> Option<String> {
        self.parameters.get(key).map(ParamValue::as_text)
    }
}
