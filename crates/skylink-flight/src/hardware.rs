//! Hardware-backed flight controller.
//!
//! Holds no drone state of its own: commands go to the autopilot through the
//! [`UnifiedCommunicationManager`], so routing and failover apply to them
//! exactly as to operator commands, and state is read back from the latest
//! telemetry the autopilot reported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use skylink_middleware::UnifiedCommunicationManager;
use skylink_types::{
    Command, CommandType, EmergencyLander, FlightControllerStatus, Telemetry,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::FlightController;

pub struct HardwareFlightController {
    link: Arc<UnifiedCommunicationManager>,
    latest: Arc<RwLock<Option<Telemetry>>>,
    started: AtomicBool,
    telemetry_task: Mutex<Option<JoinHandle<()>>>,
    /// At most one emergency landing in flight.
    emergency_task: Mutex<Option<JoinHandle<()>>>,
}

impl HardwareFlightController {
    pub fn new(link: Arc<UnifiedCommunicationManager>) -> Self {
        Self {
            link,
            latest: Arc::new(RwLock::new(None)),
            started: AtomicBool::new(false),
            telemetry_task: Mutex::new(None),
            emergency_task: Mutex::new(None),
        }
    }

    /// Start caching the autopilot's telemetry.  The manager must already be
    /// connected.
    pub fn start(&self) {
        let mut stream = self.link.telemetry_stream();
        let latest = Arc::clone(&self.latest);
        let task = tokio::spawn(async move {
            while let Some(reading) = stream.next().await {
                *latest.write().unwrap_or_else(PoisonError::into_inner) = Some(reading);
            }
            debug!("autopilot telemetry stream ended");
        });
        if let Some(previous) = self
            .telemetry_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }
        self.started.store(true, Ordering::SeqCst);
        info!(primary = ?self.link.primary_protocol(), "hardware flight controller started");
    }

    pub fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        for slot in [&self.telemetry_task, &self.emergency_task] {
            if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }

    pub fn is_emergency_landing(&self) -> bool {
        self.emergency_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

#[async_trait]
impl FlightController for HardwareFlightController {
    async fn handle_command(&self, command: Command) {
        if command.command_type() == CommandType::Unknown {
            warn!(command_id = %command.id(), "unknown command not forwarded");
            return;
        }
        let command_id = command.id().to_string();
        let command_type = command.command_type();
        if !self.link.send_command(command).await {
            warn!(command_id = %command_id, command = %command_type, "autopilot did not accept command");
        }
    }

    fn telemetry(&self) -> Telemetry {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    fn status(&self) -> FlightControllerStatus {
        let telemetry = self.telemetry();
        FlightControllerStatus {
            initialized: self.started.load(Ordering::SeqCst),
            connected: self.link.is_connected(),
            armed: telemetry.armed,
            in_mission: telemetry.flight_mode == "AUTO",
            flight_mode: telemetry.flight_mode,
            altitude: telemetry.altitude,
            current_mission_step: None,
        }
    }
}

impl EmergencyLander for HardwareFlightController {
    fn request_emergency_landing(&self, reason: String) {
        let mut slot = self
            .emergency_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(reason = %reason, "emergency landing already being delivered");
            return;
        }
        warn!(reason = %reason, "forwarding emergency landing to autopilot");
        let receipt = self
            .link
            .submit_command(Command::emergency(CommandType::EmergencyLand));
        let command_id = receipt.command_id().to_string();
        *slot = Some(tokio::spawn(async move {
            if !receipt.outcome().await {
                error!(command_id = %command_id, reason = %reason, "emergency landing could not be delivered");
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use skylink_middleware::{AdapterFactory, ManagerConfig, SimulatedAdapterFactory};
    use skylink_types::ProtocolType;

    use super::*;

    const DUAL: &str = "unified://websocket=sim://ws;mavlink=sim://mav;primary=mavlink";

    async fn connected(spec: &str) -> (Arc<UnifiedCommunicationManager>, Arc<SimulatedAdapterFactory>) {
        let factory = Arc::new(SimulatedAdapterFactory::new());
        let manager = Arc::new(UnifiedCommunicationManager::new(
            Arc::clone(&factory) as Arc<dyn AdapterFactory>,
            ManagerConfig::default(),
        ));
        manager.connect(spec).await.unwrap();
        (manager, factory)
    }

    fn emergency_count(factory: &SimulatedAdapterFactory, protocol: ProtocolType) -> usize {
        factory
            .adapter(protocol)
            .delivered_commands()
            .iter()
            .filter(|c| c.command_type() == CommandType::EmergencyLand && c.is_emergency())
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_forwarded_unknown_is_not() {
        let (manager, factory) = connected("unified://mavlink=sim://mav").await;
        let fc = HardwareFlightController::new(Arc::clone(&manager));

        fc.handle_command(Command::new(CommandType::Arm)).await;
        fc.handle_command(Command::new(CommandType::Unknown)).await;

        let delivered = factory.adapter(ProtocolType::Mavlink).delivered_commands();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].command_type(), CommandType::Arm);
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_follows_autopilot_telemetry() {
        let (manager, factory) = connected("unified://mavlink=sim://mav").await;
        let fc = HardwareFlightController::new(Arc::clone(&manager));
        assert!(!fc.status().initialized);
        fc.start();
        tokio::task::yield_now().await;

        let endpoints = factory.take_endpoints();
        endpoints[0]
            .uplink()
            .send(Telemetry {
                armed: true,
                altitude: 18.5,
                flight_mode: "AUTO".to_string(),
                ..Telemetry::default()
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = fc.status();
        assert!(status.initialized);
        assert!(status.connected);
        assert!(status.armed);
        assert!(status.in_mission);
        assert_eq!(status.altitude, 18.5);
        fc.stop();
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_landing_goes_out_as_emergency_priority() {
        let (manager, factory) = connected("unified://websocket=sim://ws").await;
        let fc = HardwareFlightController::new(Arc::clone(&manager));

        fc.request_emergency_landing("battery".to_string());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(emergency_count(&factory, ProtocolType::WebSocket), 1);
        assert!(!fc.is_emergency_landing());
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_landing_follows_failover() {
        let (manager, factory) = connected(DUAL).await;
        let fc = HardwareFlightController::new(Arc::clone(&manager));
        assert_eq!(manager.primary_protocol(), Some(ProtocolType::Mavlink));

        factory.adapter(ProtocolType::Mavlink).set_link_up(false);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(manager.primary_protocol(), Some(ProtocolType::WebSocket));

        fc.request_emergency_landing("communication lost".to_string());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(emergency_count(&factory, ProtocolType::WebSocket), 1);
        assert_eq!(emergency_count(&factory, ProtocolType::Mavlink), 0);
        manager.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_requests_share_one_delivery() {
        let (manager, factory) = connected("unified://mavlink=sim://mav").await;
        let mav = factory.adapter(ProtocolType::Mavlink);
        mav.set_send_latency(Duration::from_millis(500));
        let fc = HardwareFlightController::new(Arc::clone(&manager));

        for _ in 0..10 {
            fc.request_emergency_landing("battery".to_string());
        }
        assert!(fc.is_emergency_landing());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(emergency_count(&factory, ProtocolType::Mavlink), 1);
        assert!(!fc.is_emergency_landing());

        // a finished delivery frees the slot for the next request
        fc.request_emergency_landing("battery again".to_string());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(emergency_count(&factory, ProtocolType::Mavlink), 2);
        manager.disconnect().await;
    }
}
