//! [`ControlPlane`] – owns and wires the three parts of a running system.
//!
//! ```text
//!  commands ─▶ UnifiedCommunicationManager ─▶ adapters ─▶ flight controller
//!                        ▲                                      │
//!                        └────────────── telemetry ◀────────────┘
//!                                   │
//!                                   ▼
//!                             SafetyModule ─── emergency landing ──▶ flight controller
//! ```
//!
//! In simulated mode every link is an in-process [`SimulatedAdapter`] and
//! the drone is a [`SimulatedFlightController`] attached to the drone side of
//! those links.  Otherwise real transports are built from the configuration
//! and a [`HardwareFlightController`] drives the autopilot through the
//! manager, so its commands follow primary failover.
//!
//! [`SimulatedAdapter`]: skylink_middleware::SimulatedAdapter

use std::sync::{Arc, Weak};

use futures_util::stream::BoxStream;
use serde::Serialize;
use skylink_flight::{FlightController, HardwareFlightController, SimulatedFlightController};
use skylink_middleware::{
    AdapterFactory, DeliveryReceipt, HealthSource, ManagerStatus, SimulatedAdapterFactory,
    UnifiedCommunicationManager,
};
use skylink_safety::{SafetyModule, SafetySummary};
use skylink_types::{
    Command, EmergencyLander, FlightControllerStatus, LinkError, SafetyAlert, Telemetry,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, ControlPlaneConfig};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("connected, but no primary link is available for the flight controller")]
    NoPrimaryLink,
}

enum Drone {
    Simulated(Arc<SimulatedFlightController>),
    Hardware(Arc<HardwareFlightController>),
}

impl Drone {
    fn controller(&self) -> &dyn FlightController {
        match self {
            Drone::Simulated(fc) => fc.as_ref(),
            Drone::Hardware(fc) => fc.as_ref(),
        }
    }

    fn lander(&self) -> Weak<dyn EmergencyLander> {
        match self {
            Drone::Simulated(fc) => Arc::downgrade(fc) as Weak<dyn EmergencyLander>,
            Drone::Hardware(fc) => Arc::downgrade(fc) as Weak<dyn EmergencyLander>,
        }
    }

    fn stop(&self) {
        match self {
            Drone::Simulated(fc) => fc.stop(),
            Drone::Hardware(fc) => fc.stop(),
        }
    }
}

/// Everything an operator console wants in one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ControlPlaneStatus {
    pub link: ManagerStatus,
    pub flight: FlightControllerStatus,
    pub safety: SafetySummary,
    pub latest_telemetry: Option<Telemetry>,
}

pub struct ControlPlane {
    config: ControlPlaneConfig,
    manager: Arc<UnifiedCommunicationManager>,
    drone: Drone,
    safety: SafetyModule,
}

impl ControlPlane {
    /// Connect the links, start the drone side and begin safety monitoring.
    ///
    /// # Errors
    ///
    /// * [`RuntimeError::Config`] – the configuration does not validate.
    /// * [`RuntimeError::Link`] – the connection specification is rejected
    ///   or no protocol could be connected.
    /// * [`RuntimeError::NoPrimaryLink`] – hardware mode connected but no
    ///   primary protocol was elected.
    pub async fn start(config: ControlPlaneConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let manager_config = config.manager_config();

        let (manager, drone) = if config.simulated {
            let factory = Arc::new(SimulatedAdapterFactory::new());
            let manager = Arc::new(UnifiedCommunicationManager::new(
                Arc::clone(&factory) as Arc<dyn AdapterFactory>,
                manager_config,
            ));
            manager.connect(&config.connection).await?;
            let fc = Arc::new(SimulatedFlightController::new());
            fc.start(factory.take_endpoints());
            (manager, Drone::Simulated(fc))
        } else {
            let manager = Arc::new(UnifiedCommunicationManager::new(
                Arc::new(config.adapter_factory()),
                manager_config,
            ));
            manager.connect(&config.connection).await?;
            if manager.primary_protocol().is_none() {
                manager.disconnect().await;
                return Err(RuntimeError::NoPrimaryLink);
            }
            let fc = Arc::new(HardwareFlightController::new(Arc::clone(&manager)));
            fc.start();
            (manager, Drone::Hardware(fc))
        };

        let safety = SafetyModule::new(config.safety_thresholds(), drone.lander());
        safety.start(
            manager.telemetry_stream(),
            manager.health_stream(),
            Arc::clone(&manager) as Arc<dyn HealthSource>,
        );

        info!(
            simulated = config.simulated,
            primary = ?manager.primary_protocol(),
            "control plane running"
        );
        Ok(Self {
            config,
            manager,
            drone,
            safety,
        })
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<UnifiedCommunicationManager> {
        &self.manager
    }

    pub fn flight(&self) -> &dyn FlightController {
        self.drone.controller()
    }

    /// The simulated drone, when running in simulated mode.
    pub fn simulated_drone(&self) -> Option<&Arc<SimulatedFlightController>> {
        match &self.drone {
            Drone::Simulated(fc) => Some(fc),
            Drone::Hardware(_) => None,
        }
    }

    pub fn safety(&self) -> &SafetyModule {
        &self.safety
    }

    /// Route a command and wait for the delivery outcome.
    pub async fn send_command(&self, command: Command) -> bool {
        let command_id = command.id().to_string();
        let delivered = self.manager.send_command(command).await;
        if !delivered {
            warn!(command_id = %command_id, "command not delivered");
        }
        delivered
    }

    pub fn submit_command(&self, command: Command) -> DeliveryReceipt {
        self.manager.submit_command(command)
    }

    pub fn telemetry_stream(&self) -> BoxStream<'static, Telemetry> {
        self.manager.telemetry_stream()
    }

    pub fn alert_stream(&self) -> BoxStream<'static, SafetyAlert> {
        self.safety.alert_stream()
    }

    pub fn status(&self) -> ControlPlaneStatus {
        ControlPlaneStatus {
            link: self.manager.status(),
            flight: self.flight().status(),
            safety: self.safety.summary(),
            latest_telemetry: self.manager.latest_telemetry(),
        }
    }

    /// Stop monitoring, stop the drone side and disconnect every link.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.safety.stop();
        self.drone.stop();
        self.manager.disconnect().await;
        info!("control plane stopped");
    }
}
