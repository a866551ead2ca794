//! [`TelemetryInspector`] – threshold rule engine for telemetry readings.
//!
//! Every registered [`TelemetryRule`] is evaluated against every reading.
//! Unlike a command interlock, inspection does not stop at the first
//! violation: each rule reports independently and nothing is latched between
//! readings.
//!
//! Built-in rules, all parameterised from [`SafetyThresholds`]:
//! - [`BatteryRule`] – `CRITICAL_BATTERY` / `LOW_BATTERY`.
//! - [`VoltageRule`] – `LOW_VOLTAGE`.
//! - [`GpsQualityRule`] – `GPS_POOR`.
//! - [`AltitudeCeilingRule`] – `ALTITUDE_LIMIT`.
//! - [`GroundedArmedRule`] – `UNSAFE_MODE`.
//! - [`SpeedCapRule`] – `EXCESSIVE_SPEED`.
//! - [`VerticalSpeedRule`] – `RAPID_DESCENT`.

use skylink_types::{AlertLevel, SafetyAlert, SafetyEvent, Telemetry};

use crate::thresholds::SafetyThresholds;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single limit a telemetry reading must respect.
pub trait TelemetryRule: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// `Some(alert)` when the reading violates the limit.
    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert>;
}

// ────────────────────────────────────────────────────────────────────────────
// TelemetryInspector
// ────────────────────────────────────────────────────────────────────────────

/// Evaluates a reading against every registered [`TelemetryRule`].
///
/// # Example
///
/// ```
/// use skylink_safety::rules::TelemetryInspector;
/// use skylink_safety::SafetyThresholds;
/// use skylink_types::{SafetyEvent, Telemetry};
///
/// let inspector = TelemetryInspector::from_thresholds(&SafetyThresholds::default());
/// let mut reading = Telemetry::default();
/// reading.battery.percentage = 12.0;
/// reading.battery.voltage_v = 22.0;
/// reading.gps.fix_type = 3;
/// reading.gps.satellite_count = 10;
///
/// let alerts = inspector.inspect(&reading);
/// assert_eq!(alerts.len(), 1);
/// assert_eq!(alerts[0].event, SafetyEvent::CriticalBattery);
/// ```
#[derive(Default)]
pub struct TelemetryInspector {
    rules: Vec<Box<dyn TelemetryRule>>,
}

impl TelemetryInspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspector loaded with every built-in rule.
    pub fn from_thresholds(limits: &SafetyThresholds) -> Self {
        let mut inspector = Self::new();
        inspector.add_rule(Box::new(BatteryRule {
            critical_percent: limits.critical_battery_percent,
            low_percent: limits.low_battery_percent,
        }));
        inspector.add_rule(Box::new(VoltageRule {
            min_voltage_v: limits.min_voltage_v,
        }));
        inspector.add_rule(Box::new(GpsQualityRule {
            min_fix_type: limits.min_gps_fix_type,
            min_satellites: limits.min_satellites,
            max_horizontal_dilution: limits.max_horizontal_dilution,
        }));
        inspector.add_rule(Box::new(AltitudeCeilingRule {
            max_altitude_m: limits.max_altitude_m,
        }));
        inspector.add_rule(Box::new(GroundedArmedRule {
            min_altitude_m: limits.unsafe_altitude_m,
        }));
        inspector.add_rule(Box::new(SpeedCapRule {
            max_speed_ms: limits.max_speed_ms,
        }));
        inspector.add_rule(Box::new(VerticalSpeedRule {
            max_vertical_speed_ms: limits.max_vertical_speed_ms,
        }));
        inspector
    }

    /// Register a rule.  Rules report in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn TelemetryRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Every violation in `telemetry`, one alert per violated rule.
    pub fn inspect(&self, telemetry: &Telemetry) -> Vec<SafetyAlert> {
        self.rules
            .iter()
            .filter_map(|rule| rule.check(telemetry))
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

pub struct BatteryRule {
    pub critical_percent: f64,
    pub low_percent: f64,
}

impl TelemetryRule for BatteryRule {
    fn name(&self) -> &str {
        "battery"
    }

    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert> {
        let percentage = telemetry.battery.percentage;
        if percentage <= self.critical_percent {
            Some(SafetyAlert::new(
                SafetyEvent::CriticalBattery,
                AlertLevel::Critical,
                format!("battery at {percentage:.1}% (critical at {}%)", self.critical_percent),
            ))
        } else if percentage <= self.low_percent {
            Some(SafetyAlert::new(
                SafetyEvent::LowBattery,
                AlertLevel::Warning,
                format!("battery at {percentage:.1}% (low at {}%)", self.low_percent),
            ))
        } else {
            None
        }
    }
}

pub struct VoltageRule {
    pub min_voltage_v: f64,
}

impl TelemetryRule for VoltageRule {
    fn name(&self) -> &str {
        "voltage"
    }

    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert> {
        let voltage = telemetry.battery.voltage_v;
        (voltage < self.min_voltage_v).then(|| {
            SafetyAlert::new(
                SafetyEvent::LowVoltage,
                AlertLevel::Warning,
                format!("battery voltage {voltage:.2} V below {} V", self.min_voltage_v),
            )
        })
    }
}

pub struct GpsQualityRule {
    pub min_fix_type: u8,
    pub min_satellites: u8,
    pub max_horizontal_dilution: f64,
}

impl TelemetryRule for GpsQualityRule {
    fn name(&self) -> &str {
        "gps_quality"
    }

    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert> {
        let gps = &telemetry.gps;
        let poor = gps.fix_type < self.min_fix_type
            || gps.satellite_count < self.min_satellites
            || gps.horizontal_dilution > self.max_horizontal_dilution;
        poor.then(|| {
            SafetyAlert::new(
                SafetyEvent::GpsPoor,
                AlertLevel::Warning,
                format!(
                    "gps fix {} with {} satellites, hdop {:.1}",
                    gps.fix_type, gps.satellite_count, gps.horizontal_dilution
                ),
            )
        })
    }
}

pub struct AltitudeCeilingRule {
    pub max_altitude_m: f64,
}

impl TelemetryRule for AltitudeCeilingRule {
    fn name(&self) -> &str {
        "altitude_ceiling"
    }

    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert> {
        let altitude = telemetry.altitude;
        (altitude > self.max_altitude_m).then(|| {
            SafetyAlert::new(
                SafetyEvent::AltitudeLimit,
                AlertLevel::Critical,
                format!("altitude {altitude:.1} m above ceiling {} m", self.max_altitude_m),
            )
        })
    }
}

/// Armed and sitting near the ground in a mode that is not a landing.
pub struct GroundedArmedRule {
    pub min_altitude_m: f64,
}

impl TelemetryRule for GroundedArmedRule {
    fn name(&self) -> &str {
        "grounded_armed"
    }

    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert> {
        let unsafe_mode = telemetry.armed
            && telemetry.altitude < self.min_altitude_m
            && !telemetry.flight_mode.contains("LAND");
        unsafe_mode.then(|| {
            SafetyAlert::new(
                SafetyEvent::UnsafeMode,
                AlertLevel::Warning,
                format!(
                    "armed at {:.1} m in mode {}",
                    telemetry.altitude, telemetry.flight_mode
                ),
            )
        })
    }
}

pub struct SpeedCapRule {
    pub max_speed_ms: f64,
}

impl TelemetryRule for SpeedCapRule {
    fn name(&self) -> &str {
        "speed_cap"
    }

    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert> {
        let speed = telemetry.velocity.speed;
        (speed > self.max_speed_ms).then(|| {
            SafetyAlert::new(
                SafetyEvent::ExcessiveSpeed,
                AlertLevel::Critical,
                format!("ground speed {speed:.1} m/s exceeds {} m/s", self.max_speed_ms),
            )
        })
    }
}

pub struct VerticalSpeedRule {
    pub max_vertical_speed_ms: f64,
}

impl TelemetryRule for VerticalSpeedRule {
    fn name(&self) -> &str {
        "vertical_speed"
    }

    fn check(&self, telemetry: &Telemetry) -> Option<SafetyAlert> {
        let vz = telemetry.velocity.vz;
        (vz.abs() > self.max_vertical_speed_ms).then(|| {
            SafetyAlert::new(
                SafetyEvent::RapidDescent,
                AlertLevel::Warning,
                format!(
                    "vertical speed {vz:.1} m/s exceeds {} m/s",
                    self.max_vertical_speed_ms
                ),
            )
        })
    }
}
