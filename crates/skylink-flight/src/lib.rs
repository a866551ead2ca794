//! `skylink-flight` – the drone-side command interpreter.
//!
//! # Modules
//!
//! - [`simulated`] – [`SimulatedFlightController`]: ramp simulation, command
//!   pump, periodic telemetry.
//! - [`mission`] – the scripted mission sequencer driven by `START_MISSION`.
//! - [`hardware`] – [`HardwareFlightController`]: the same contract, forwarded
//!   to an autopilot over a protocol adapter.
//!
//! Both controllers implement [`FlightController`] and
//! [`EmergencyLander`][skylink_types::EmergencyLander], so either can sit
//! behind the safety supervisor.

pub mod hardware;
pub mod mission;
pub mod simulated;

use async_trait::async_trait;
use skylink_types::{Command, FlightControllerStatus, Telemetry};

pub use hardware::HardwareFlightController;
pub use simulated::SimulatedFlightController;

/// Interprets commands and reports drone state.
///
/// `handle_command` never fails: guard rejections and unknown command types
/// are logged as warnings and leave state untouched.
#[async_trait]
pub trait FlightController: Send + Sync {
    async fn handle_command(&self, command: Command);

    fn telemetry(&self) -> Telemetry;

    fn status(&self) -> FlightControllerStatus;
}
