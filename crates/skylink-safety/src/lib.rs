//! `skylink-safety` – the safety supervisor.
//!
//! Watches telemetry and link health, keeps a severity status, and forces an
//! emergency landing when a critical limit is crossed.
//!
//! # Modules
//!
//! - [`thresholds`] – [`SafetyThresholds`]: every limit the supervisor
//!   enforces, injectable per airframe.
//! - [`rules`] – [`TelemetryInspector`][rules::TelemetryInspector]: a rule
//!   engine evaluating each telemetry reading against independent limits.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: heartbeat deadlines
//!   used to detect a silent telemetry feed.
//! - [`status`] – the one-way status escalation and its single recovery path.
//! - [`supervisor`] – [`SafetyModule`]: the three concurrent monitors, alert
//!   history and the emergency-landing callback.

pub mod rules;
pub mod status;
pub mod supervisor;
pub mod thresholds;
pub mod watchdog;

pub use rules::{TelemetryInspector, TelemetryRule};
pub use supervisor::{SafetyModule, SafetySummary};
pub use thresholds::SafetyThresholds;
pub use watchdog::{FeedHealth, Watchdog};
