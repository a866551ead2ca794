//! Scripted mission sequencer.
//!
//! `START_MISSION` launches one sequencer task per mission.  Every mission
//! gets a fresh epoch number; the sequencer only acts while the drone is
//! still `in_mission` *and* the epoch it was started with is the current
//! one, checked before each step.  A second `START_MISSION` while a mission
//! is running is rejected.
//!
//! | Step | Behaviour |
//! |---|---|
//! | `PREFLIGHT_CHECK` | wait 2 s |
//! | `TAKEOFF` | ramp to 15 m, only when below 5 m |
//! | `CLIMB` | ramp to 25 m |
//! | `NAVIGATE` | hold `AUTO` for 5 s |
//! | `HOVER` | hold `HOVER` for 3 s |
//! | `RETURN` | hold `RTL` for 4 s |
//! | `LAND` | normal landing ramp |
//!
//! Steps are separated by a 1 s pause.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use skylink_types::MissionStep;
use tracing::{debug, info, warn};

use crate::simulated::{Inner, MISSION_MIN_ALTITUDE_M, RAMP_STEP_DELAY, RAMP_STEPS};

pub const STEP_PAUSE: Duration = Duration::from_secs(1);
pub const PREFLIGHT_DURATION: Duration = Duration::from_secs(2);
pub const NAVIGATE_DURATION: Duration = Duration::from_secs(5);
pub const HOVER_DURATION: Duration = Duration::from_secs(3);
pub const RETURN_DURATION: Duration = Duration::from_secs(4);
pub const MISSION_TAKEOFF_ALTITUDE_M: f64 = 15.0;
pub const MISSION_CLIMB_ALTITUDE_M: f64 = 25.0;

/// Granularity at which holds notice an abort.
const HOLD_SLICE: Duration = Duration::from_millis(100);

impl Inner {
    /// Validate and launch a mission.  Guard failures are warnings.
    pub(crate) fn start_mission(self: &Arc<Self>) {
        let epoch = {
            let mut state = self.state();
            if state.in_mission {
                warn!("START_MISSION rejected: a mission is already running");
                return;
            }
            if !(state.armed && state.altitude > MISSION_MIN_ALTITUDE_M) {
                warn!(
                    armed = state.armed,
                    altitude = state.altitude,
                    "START_MISSION rejected: must be armed and above {MISSION_MIN_ALTITUDE_M} m"
                );
                return;
            }
            state.in_mission = true;
            state.mission_step = Some(0);
            state.mission_epoch += 1;
            state.flight_mode = "AUTO".to_string();
            state.mission_epoch
        };
        info!(epoch, "mission started");

        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_mission(epoch).await });
        let mut slot = self
            .mission_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Stop the sequencer task, if any.  Mission state is left to the caller.
    pub(crate) fn cancel_mission_task(&self) {
        if let Some(task) = self
            .mission_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    fn mission_active(&self, epoch: u64) -> bool {
        let state = self.state();
        state.in_mission && state.mission_epoch == epoch
    }

    /// Wait for `duration` in mode `mode`.  Returns `false` once the mission
    /// is no longer active.
    async fn hold(&self, epoch: u64, mode: &str, duration: Duration) -> bool {
        if !mode.is_empty() {
            self.set_mode(mode);
        }
        let mut remaining = duration;
        while !remaining.is_zero() {
            let slice = remaining.min(HOLD_SLICE);
            tokio::time::sleep(slice).await;
            remaining -= slice;
            if !self.mission_active(epoch) {
                return false;
            }
        }
        true
    }

    async fn mission_ramp(&self, epoch: u64, mode: &str, target: f64) -> bool {
        let Some(generation) = self.claim_ramp() else {
            return false;
        };
        self.set_mode(mode);
        self.ramp(target, RAMP_STEPS, RAMP_STEP_DELAY, generation).await
            && self.mission_active(epoch)
    }

    async fn run_step(&self, epoch: u64, step: MissionStep) -> bool {
        match step {
            MissionStep::PreflightCheck => self.hold(epoch, "", PREFLIGHT_DURATION).await,
            MissionStep::Takeoff => {
                if self.state().altitude < MISSION_MIN_ALTITUDE_M {
                    self.mission_ramp(epoch, "TAKEOFF", MISSION_TAKEOFF_ALTITUDE_M)
                        .await
                } else {
                    true
                }
            }
            MissionStep::Climb => {
                self.mission_ramp(epoch, "CLIMB", MISSION_CLIMB_ALTITUDE_M)
                    .await
            }
            MissionStep::Navigate => self.hold(epoch, "AUTO", NAVIGATE_DURATION).await,
            MissionStep::Hover => self.hold(epoch, "HOVER", HOVER_DURATION).await,
            MissionStep::Return => self.hold(epoch, "RTL", RETURN_DURATION).await,
            MissionStep::Land => self.mission_active(epoch) && self.land().await,
        }
    }

    async fn run_mission(self: Arc<Self>, epoch: u64) {
        for (index, step) in MissionStep::SEQUENCE.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(STEP_PAUSE).await;
            }
            {
                let mut state = self.state();
                if !(state.in_mission && state.mission_epoch == epoch) {
                    debug!(epoch, %step, "mission no longer active");
                    return;
                }
                state.mission_step = Some(index);
            }
            info!(epoch, %step, "mission step");
            if !self.run_step(epoch, step).await {
                info!(epoch, %step, "mission ended early");
                self.end_mission(epoch);
                return;
            }
        }
        self.end_mission(epoch);
        info!(epoch, "mission complete");
    }

    /// Clear mission state left by the sequencer of `epoch`.  A step cut short
    /// by another command's ramp ends the mission here; a newer mission is
    /// left alone.
    fn end_mission(&self, epoch: u64) {
        let mut state = self.state();
        if state.mission_epoch == epoch {
            state.in_mission = false;
            state.mission_step = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use skylink_types::{Command, CommandType};

    use super::*;
    use crate::{FlightController, SimulatedFlightController};

    async fn hovering_at(altitude: f64) -> SimulatedFlightController {
        let fc = SimulatedFlightController::new();
        fc.handle_command(Command::new(CommandType::Arm)).await;
        fc.handle_command(Command::new(CommandType::Takeoff).with_param("altitude", altitude))
            .await;
        fc
    }

    #[tokio::test(start_paused = true)]
    async fn start_rejected_when_low_or_disarmed() {
        let fc = SimulatedFlightController::new();
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        assert!(!fc.status().in_mission);

        let fc = hovering_at(MISSION_MIN_ALTITUDE_M).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        let status = fc.status();
        assert!(!status.in_mission);
        assert_eq!(status.flight_mode, "HOVER");
    }

    #[tokio::test(start_paused = true)]
    async fn full_mission_runs_every_step_and_lands() {
        let fc = hovering_at(10.0).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        let status = fc.status();
        assert!(status.in_mission);
        assert_eq!(status.flight_mode, "AUTO");
        assert_eq!(status.current_mission_step, Some(MissionStep::PreflightCheck));

        // preflight 2s + pause 1s + takeoff skipped + pause 1s
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(fc.status().current_mission_step, Some(MissionStep::Climb));
        assert_eq!(fc.status().flight_mode, "CLIMB");

        // climb ends at 8s, navigate holds until 14s
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        let status = fc.status();
        assert_eq!(status.current_mission_step, Some(MissionStep::Navigate));
        assert_eq!(status.altitude, MISSION_CLIMB_ALTITUDE_M);
        assert_eq!(status.flight_mode, "AUTO");

        // hover 15-18s, return 19-23s, land 24-28s
        tokio::time::sleep(Duration::from_millis(11_000)).await;
        assert_eq!(fc.status().flight_mode, "RTL");

        tokio::time::sleep(Duration::from_secs(10)).await;
        let status = fc.status();
        assert!(!status.in_mission);
        assert_eq!(status.current_mission_step, None);
        assert_eq!(status.altitude, 0.0);
        assert!(!status.armed);
        assert_eq!(status.flight_mode, "DISARMED");
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let fc = hovering_at(10.0).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        let epoch = fc.inner.state().mission_epoch;

        tokio::time::sleep(Duration::from_secs(1)).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        assert_eq!(fc.inner.state().mission_epoch, epoch);
        assert_eq!(
            fc.status().current_mission_step,
            Some(MissionStep::PreflightCheck)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abort_is_observed_within_a_step() {
        let fc = hovering_at(10.0).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        // mid-CLIMB
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        let climbing_at = fc.status().altitude;
        assert!(climbing_at > 10.0 && climbing_at < MISSION_CLIMB_ALTITUDE_M);

        fc.handle_command(Command::new(CommandType::AbortMission)).await;
        let status = fc.status();
        assert!(!status.in_mission);
        assert_eq!(status.flight_mode, "HOVER");

        tokio::time::sleep(Duration::from_secs(30)).await;
        let status = fc.status();
        assert_eq!(status.flight_mode, "HOVER");
        assert!(status.armed);
        assert!((status.altitude - climbing_at).abs() < 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn goto_during_climb_ends_the_mission() {
        let fc = hovering_at(10.0).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        // mid-CLIMB
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(fc.status().current_mission_step, Some(MissionStep::Climb));

        fc.handle_command(
            Command::new(CommandType::Goto)
                .with_param("latitude", 47.40)
                .with_param("longitude", 8.55),
        )
        .await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = fc.status();
        assert!(!status.in_mission);
        assert_eq!(status.current_mission_step, None);
        assert!(status.armed);
        assert!(
            fc.inner
                .mission_task
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|task| task.is_finished())
        );

        fc.handle_command(Command::new(CommandType::StartMission)).await;
        assert!(fc.status().in_mission);
        assert_eq!(fc.inner.state().mission_epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn takeoff_during_climb_ends_the_mission() {
        let fc = hovering_at(10.0).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        fc.handle_command(Command::new(CommandType::Takeoff).with_param("altitude", 12.0))
            .await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let status = fc.status();
        assert!(!status.in_mission);
        assert_eq!(status.current_mission_step, None);
        assert_eq!(status.altitude, 12.0);
        assert_eq!(status.flight_mode, "HOVER");
    }

    #[tokio::test(start_paused = true)]
    async fn mission_can_restart_after_abort() {
        let fc = hovering_at(10.0).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        fc.handle_command(Command::new(CommandType::AbortMission)).await;

        fc.handle_command(Command::new(CommandType::StartMission)).await;
        assert!(fc.status().in_mission);
        assert_eq!(fc.inner.state().mission_epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_landing_ends_the_mission() {
        use skylink_types::EmergencyLander;

        let fc = hovering_at(10.0).await;
        fc.handle_command(Command::new(CommandType::StartMission)).await;
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        fc.request_emergency_landing("test".into());
        tokio::time::sleep(Duration::from_secs(30)).await;

        let status = fc.status();
        assert!(!status.in_mission);
        assert_eq!(status.altitude, 0.0);
        assert!(!status.armed);
    }
}
