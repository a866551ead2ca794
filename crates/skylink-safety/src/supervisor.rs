//! [`SafetyModule`] – the safety supervisor.
//!
//! Three monitors run side by side once [`SafetyModule::start`] is called:
//!
//! | Monitor | Wakes on | Raises |
//! |---|---|---|
//! | communication | every health-stream update | `COMMUNICATION_LOST`, `COMMUNICATION_DEGRADED`, `COMMUNICATION_RESTORED` |
//! | telemetry | every telemetry reading | whatever the [`TelemetryInspector`] reports |
//! | periodic | its own interval | `TELEMETRY_TIMEOUT`, `COMMUNICATION_DEGRADED` |
//!
//! Every alert is recorded, folded into the status and published on the
//! alert lane.  Critical alerts whose event demands it additionally fire the
//! emergency-landing callback.  The module holds that callback weakly and
//! never touches flight-controller state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use skylink_middleware::{Broadcaster, HealthSource};
use skylink_types::{
    AlertLevel, ConnectionHealth, ConnectionStatus, EmergencyLander, SafetyAlert, SafetyEvent,
    SafetyStatus, Telemetry,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::rules::TelemetryInspector;
use crate::status::{escalate, recover};
use crate::thresholds::SafetyThresholds;
use crate::watchdog::{FeedHealth, Watchdog};

/// Alerts kept for [`SafetyModule::recent_alerts`].
pub const ALERT_HISTORY_LIMIT: usize = 100;

const TELEMETRY_FEED: &str = "telemetry";

/// Point-in-time overview of the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetySummary {
    pub status: SafetyStatus,
    pub monitoring: bool,
    pub total_alerts: u64,
    pub warning_alerts: u64,
    pub critical_alerts: u64,
    pub emergency_landings_requested: u64,
    pub last_alert: Option<SafetyAlert>,
    pub last_telemetry_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Ledger {
    status: SafetyStatus,
    history: VecDeque<SafetyAlert>,
    total_alerts: u64,
    warning_alerts: u64,
    critical_alerts: u64,
    emergency_landings_requested: u64,
    last_telemetry_at: Option<DateTime<Utc>>,
    /// Error list seen by the last periodic check.
    last_seen_errors: VecDeque<String>,
}

struct Inner {
    thresholds: SafetyThresholds,
    inspector: TelemetryInspector,
    lander: Weak<dyn EmergencyLander>,
    ledger: Mutex<Ledger>,
    watchdog: Mutex<Watchdog>,
    alerts: Broadcaster<SafetyAlert>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn raise(&self, alert: SafetyAlert) {
        match alert.level {
            AlertLevel::Critical => error!(event = %alert.event, message = %alert.message, "safety alert"),
            AlertLevel::Warning => warn!(event = %alert.event, message = %alert.message, "safety alert"),
            AlertLevel::Info => info!(event = %alert.event, message = %alert.message, "safety alert"),
        }

        let trigger = alert.level == AlertLevel::Critical && alert.event.triggers_emergency_landing();
        {
            let mut ledger = lock(&self.ledger);
            ledger.status = escalate(ledger.status, &alert);
            ledger.total_alerts += 1;
            match alert.level {
                AlertLevel::Critical => ledger.critical_alerts += 1,
                AlertLevel::Warning => ledger.warning_alerts += 1,
                AlertLevel::Info => {}
            }
            if trigger {
                ledger.emergency_landings_requested += 1;
            }
            if ledger.history.len() == ALERT_HISTORY_LIMIT {
                ledger.history.pop_front();
            }
            ledger.history.push_back(alert.clone());
        }

        let reason = format!("{}: {}", alert.event, alert.message);
        self.alerts.publish(alert);

        if trigger {
            match self.lander.upgrade() {
                Some(lander) => lander.request_emergency_landing(reason),
                None => error!(reason = %reason, "emergency landing required but no flight controller attached"),
            }
        }
    }

    fn process_telemetry(&self, telemetry: &Telemetry) {
        lock(&self.watchdog).heartbeat(TELEMETRY_FEED);
        lock(&self.ledger).last_telemetry_at = Some(telemetry.timestamp);
        for alert in self.inspector.inspect(telemetry) {
            self.raise(alert);
        }
    }

    fn process_health(&self, health: &ConnectionHealth) {
        if health.status == ConnectionStatus::Disconnected {
            if health.reconnect_attempts >= self.thresholds.max_reconnect_attempts {
                self.raise(SafetyAlert::new(
                    SafetyEvent::CommunicationLost,
                    AlertLevel::Critical,
                    format!(
                        "link down after {} reconnect attempts",
                        health.reconnect_attempts
                    ),
                ));
            }
            let silent_for = health
                .message_age(Utc::now())
                .and_then(|age| age.to_std().ok());
            if let Some(age) = silent_for.filter(|age| *age > self.thresholds.degraded_after) {
                self.raise(SafetyAlert::new(
                    SafetyEvent::CommunicationDegraded,
                    AlertLevel::Warning,
                    format!("no message for {}s", age.as_secs()),
                ));
            }
            return;
        }

        let recovered = {
            let mut ledger = lock(&self.ledger);
            match recover(ledger.status) {
                Some(status) => {
                    ledger.status = status;
                    true
                }
                None => false,
            }
        };
        if recovered {
            self.raise(SafetyAlert::new(
                SafetyEvent::CommunicationRestored,
                AlertLevel::Info,
                format!("link {}", health.status),
            ));
        }
    }

    fn supervise_once(&self, source: &dyn HealthSource) {
        let silence = {
            let watchdog = lock(&self.watchdog);
            (watchdog.health(TELEMETRY_FEED) == FeedHealth::Silent)
                .then(|| watchdog.silence(TELEMETRY_FEED))
                .flatten()
        };
        if let Some(silence) = silence {
            self.raise(SafetyAlert::new(
                SafetyEvent::TelemetryTimeout,
                AlertLevel::Critical,
                format!("no telemetry for {}s", silence.as_secs()),
            ));
        }

        let health = source.health_snapshot();
        let new_errors = {
            let mut ledger = lock(&self.ledger);
            let changed = !health.recent_errors.is_empty()
                && health.recent_errors != ledger.last_seen_errors;
            ledger.last_seen_errors = health.recent_errors.clone();
            changed
        };
        if new_errors {
            let latest = health.recent_errors.back().cloned().unwrap_or_default();
            self.raise(SafetyAlert::new(
                SafetyEvent::CommunicationDegraded,
                AlertLevel::Warning,
                format!(
                    "{} recent link errors, latest: {latest}",
                    health.recent_errors.len()
                ),
            ));
        }

        let stale = health
            .message_age(Utc::now())
            .and_then(|age| age.to_std().ok())
            .filter(|age| *age > self.thresholds.stale_message_after);
        if let Some(age) = stale {
            self.raise(SafetyAlert::new(
                SafetyEvent::CommunicationDegraded,
                AlertLevel::Warning,
                format!("last message {}s ago", age.as_secs()),
            ));
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyModule
// ────────────────────────────────────────────────────────────────────────────

pub struct SafetyModule {
    inner: Arc<Inner>,
}

impl SafetyModule {
    /// `lander` is held weakly; dropping the flight controller disables the
    /// emergency callback without keeping the controller alive.
    pub fn new(thresholds: SafetyThresholds, lander: Weak<dyn EmergencyLander>) -> Self {
        let inspector = TelemetryInspector::from_thresholds(&thresholds);
        let mut watchdog = Watchdog::new();
        watchdog.register(TELEMETRY_FEED, thresholds.telemetry_timeout);
        Self {
            inner: Arc::new(Inner {
                thresholds,
                inspector,
                lander,
                ledger: Mutex::new(Ledger::default()),
                watchdog: Mutex::new(watchdog),
                alerts: Broadcaster::with_default_capacity("safety-alerts"),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn thresholds(&self) -> &SafetyThresholds {
        &self.inner.thresholds
    }

    /// Start the three monitors.  Calling `start` again replaces them.
    pub fn start(
        &self,
        telemetry: BoxStream<'static, Telemetry>,
        health: BoxStream<'static, ConnectionHealth>,
        source: Arc<dyn HealthSource>,
    ) {
        self.stop();
        lock(&self.inner.watchdog).register(TELEMETRY_FEED, self.inner.thresholds.telemetry_timeout);

        let mut tasks = lock(&self.inner.tasks);
        tasks.push(tokio::spawn(run_telemetry_monitor(Arc::clone(&self.inner), telemetry)));
        tasks.push(tokio::spawn(run_communication_monitor(Arc::clone(&self.inner), health)));
        tasks.push(tokio::spawn(run_periodic_supervisor(Arc::clone(&self.inner), source)));
        info!("safety monitoring started");
    }

    pub fn stop(&self) {
        let mut tasks = lock(&self.inner.tasks);
        if tasks.is_empty() {
            return;
        }
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("safety monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.inner.tasks).iter().any(|task| !task.is_finished())
    }

    /// Evaluate one reading as the telemetry monitor would.
    pub fn process_telemetry(&self, telemetry: &Telemetry) {
        self.inner.process_telemetry(telemetry);
    }

    /// Evaluate one health update as the communication monitor would.
    pub fn process_health(&self, health: &ConnectionHealth) {
        self.inner.process_health(health);
    }

    /// Run one round of the periodic supervisor.
    pub fn supervise_once(&self, source: &dyn HealthSource) {
        self.inner.supervise_once(source);
    }

    pub fn status(&self) -> SafetyStatus {
        lock(&self.inner.ledger).status
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<SafetyAlert> {
        self.inner.alerts.subscribe()
    }

    pub fn alert_stream(&self) -> BoxStream<'static, SafetyAlert> {
        self.inner.alerts.stream()
    }

    /// Most recent alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<SafetyAlert> {
        lock(&self.inner.ledger).history.iter().cloned().collect()
    }

    pub fn summary(&self) -> SafetySummary {
        let monitoring = self.is_monitoring();
        let ledger = lock(&self.inner.ledger);
        SafetySummary {
            status: ledger.status,
            monitoring,
            total_alerts: ledger.total_alerts,
            warning_alerts: ledger.warning_alerts,
            critical_alerts: ledger.critical_alerts,
            emergency_landings_requested: ledger.emergency_landings_requested,
            last_alert: ledger.history.back().cloned(),
            last_telemetry_at: ledger.last_telemetry_at,
        }
    }
}

impl Drop for SafetyModule {
    fn drop(&mut self) {
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Monitors
// ────────────────────────────────────────────────────────────────────────────

async fn run_telemetry_monitor(inner: Arc<Inner>, mut telemetry: BoxStream<'static, Telemetry>) {
    while let Some(reading) = telemetry.next().await {
        inner.process_telemetry(&reading);
    }
    debug!("telemetry stream ended");
}

async fn run_communication_monitor(
    inner: Arc<Inner>,
    mut health: BoxStream<'static, ConnectionHealth>,
) {
    while let Some(update) = health.next().await {
        inner.process_health(&update);
    }
    debug!("health stream ended");
}

async fn run_periodic_supervisor(inner: Arc<Inner>, source: Arc<dyn HealthSource>) {
    let period = inner.thresholds.supervisor_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        inner.supervise_once(source.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use skylink_middleware::HealthTracker;

    use super::*;

    #[derive(Default)]
    struct RecordingLander {
        calls: AtomicUsize,
        reasons: Mutex<Vec<String>>,
    }

    impl EmergencyLander for RecordingLander {
        fn request_emergency_landing(&self, reason: String) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            lock(&self.reasons).push(reason);
        }
    }

    fn module() -> (SafetyModule, Arc<RecordingLander>) {
        let lander = Arc::new(RecordingLander::default());
        let weak: Weak<RecordingLander> = Arc::downgrade(&lander);
        (SafetyModule::new(SafetyThresholds::default(), weak), lander)
    }

    fn reading(battery: f64) -> Telemetry {
        let mut t = Telemetry::default();
        t.battery.percentage = battery;
        t.battery.voltage_v = 24.0;
        t.gps.fix_type = 3;
        t.gps.satellite_count = 12;
        t.altitude = 20.0;
        t.armed = true;
        t.flight_mode = "HOVER".to_string();
        t
    }

    struct FixedHealth(ConnectionHealth);

    impl HealthSource for FixedHealth {
        fn health_snapshot(&self) -> ConnectionHealth {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn draining_battery_triggers_one_landing() {
        let (safety, lander) = module();
        for level in [40.0, 26.0, 24.0, 14.0] {
            safety.process_telemetry(&reading(level));
        }
        assert_eq!(lander.calls.load(Ordering::SeqCst), 1);
        assert!(lock(&lander.reasons)[0].starts_with("CRITICAL_BATTERY"));
        assert_eq!(safety.status(), SafetyStatus::CriticalBattery);

        let summary = safety.summary();
        assert_eq!(summary.total_alerts, 2);
        assert_eq!(summary.warning_alerts, 1);
        assert_eq!(summary.critical_alerts, 1);
        assert_eq!(summary.emergency_landings_requested, 1);
        assert!(summary.last_telemetry_at.is_some());
    }

    #[tokio::test]
    async fn warnings_are_published_without_landing() {
        let (safety, lander) = module();
        let mut alerts = safety.subscribe_alerts();
        let mut t = reading(80.0);
        t.velocity.vz = -11.0;
        safety.process_telemetry(&t);

        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.event, SafetyEvent::RapidDescent);
        assert_eq!(alert.level, AlertLevel::Warning);
        assert_eq!(lander.calls.load(Ordering::SeqCst), 0);
        assert_eq!(safety.status(), SafetyStatus::Warning);
    }

    #[tokio::test]
    async fn critical_other_is_recorded_without_landing() {
        let (safety, lander) = module();
        safety.inner.raise(SafetyAlert::new(
            SafetyEvent::GpsPoor,
            AlertLevel::Critical,
            "no fix",
        ));
        assert_eq!(safety.status(), SafetyStatus::CriticalOther);
        assert_eq!(lander.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lost_link_lands_and_restoration_resets_status() {
        let (safety, lander) = module();
        let mut alerts = safety.subscribe_alerts();
        let mut health = ConnectionHealth::disconnected();
        health.reconnect_attempts = 5;
        safety.process_health(&health);
        assert_eq!(safety.status(), SafetyStatus::CriticalCommunication);
        assert_eq!(lander.calls.load(Ordering::SeqCst), 1);
        assert_eq!(alerts.recv().await.unwrap().event, SafetyEvent::CommunicationLost);

        safety.process_health(&ConnectionHealth::new(ConnectionStatus::Degraded));
        assert_eq!(safety.status(), SafetyStatus::Normal);
        let restored = alerts.recv().await.unwrap();
        assert_eq!(restored.event, SafetyEvent::CommunicationRestored);
        assert_eq!(restored.level, AlertLevel::Info);
    }

    #[tokio::test]
    async fn reconnection_does_not_clear_other_criticals() {
        let (safety, _lander) = module();
        safety.process_telemetry(&reading(10.0));
        safety.process_health(&ConnectionHealth::new(ConnectionStatus::Connected));
        assert_eq!(safety.status(), SafetyStatus::CriticalBattery);
    }

    #[tokio::test]
    async fn battery_critical_survives_link_loss_and_restoration() {
        let (safety, lander) = module();
        safety.process_telemetry(&reading(10.0));
        assert_eq!(safety.status(), SafetyStatus::CriticalBattery);

        safety.inner.raise(SafetyAlert::new(
            SafetyEvent::TelemetryTimeout,
            AlertLevel::Critical,
            "no telemetry for 20s",
        ));
        assert_eq!(safety.status(), SafetyStatus::CriticalBattery);
        assert_eq!(lander.calls.load(Ordering::SeqCst), 2);

        safety.process_health(&ConnectionHealth::new(ConnectionStatus::Connected));
        assert_eq!(safety.status(), SafetyStatus::CriticalBattery);
        assert!(
            !safety
                .recent_alerts()
                .iter()
                .any(|a| a.event == SafetyEvent::CommunicationRestored)
        );
    }

    #[tokio::test]
    async fn silent_disconnected_link_is_degraded() {
        let (safety, lander) = module();
        let mut health = ConnectionHealth::disconnected();
        health.reconnect_attempts = 2;
        health.last_message_received_at = Some(Utc::now() - chrono::Duration::seconds(11));
        safety.process_health(&health);

        let alerts = safety.recent_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event, SafetyEvent::CommunicationDegraded);
        assert_eq!(safety.status(), SafetyStatus::Warning);
        assert_eq!(lander.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_silence_times_out() {
        let (safety, lander) = module();
        let source = FixedHealth(ConnectionHealth::new(ConnectionStatus::Connected));

        tokio::time::advance(Duration::from_secs(9)).await;
        safety.process_telemetry(&reading(80.0));
        tokio::time::advance(Duration::from_secs(10)).await;
        safety.supervise_once(&source);
        assert!(safety.recent_alerts().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        safety.supervise_once(&source);
        let alerts = safety.recent_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event, SafetyEvent::TelemetryTimeout);
        assert_eq!(safety.status(), SafetyStatus::CriticalCommunication);
        assert_eq!(lander.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_reports_new_errors_once_and_stale_links() {
        let (safety, _lander) = module();
        let mut health = ConnectionHealth::new(ConnectionStatus::Connected);
        health.last_message_received_at = Some(Utc::now());
        health.record_error("send ARM failed");
        let source = FixedHealth(health.clone());

        safety.process_telemetry(&reading(80.0));
        safety.supervise_once(&source);
        safety.supervise_once(&source);
        let degraded = safety
            .recent_alerts()
            .into_iter()
            .filter(|a| a.event == SafetyEvent::CommunicationDegraded)
            .count();
        assert_eq!(degraded, 1);

        health.last_message_received_at = Some(Utc::now() - chrono::Duration::seconds(31));
        safety.supervise_once(&FixedHealth(health));
        let last = safety.recent_alerts().pop().unwrap();
        assert_eq!(last.event, SafetyEvent::CommunicationDegraded);
        assert!(last.message.contains("ago"));
    }

    #[tokio::test(start_paused = true)]
    async fn monitors_consume_streams() {
        let (safety, lander) = module();
        let telemetry: Broadcaster<Telemetry> = Broadcaster::with_default_capacity("t");
        let tracker = Arc::new(HealthTracker::new("h"));
        safety.start(telemetry.stream(), tracker.stream(), tracker.clone());
        assert!(safety.is_monitoring());

        telemetry.publish(reading(12.0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(lander.calls.load(Ordering::SeqCst), 1);

        tracker.record_error("socket reset");
        tokio::time::sleep(Duration::from_millis(10)).await;
        // disconnected, no attempts, never heard from: nothing to raise
        assert_eq!(safety.summary().total_alerts, 1);

        // periodic round at 5s sees the new error; no telemetry since t=0
        // so the timeout lands at the 15s round
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(
            safety
                .recent_alerts()
                .iter()
                .any(|a| a.event == SafetyEvent::CommunicationDegraded)
        );
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(
            safety
                .recent_alerts()
                .iter()
                .any(|a| a.event == SafetyEvent::TelemetryTimeout)
        );

        safety.stop();
        assert!(!safety.is_monitoring());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let (safety, _lander) = module();
        let mut t = reading(80.0);
        t.gps.satellite_count = 3;
        for _ in 0..(ALERT_HISTORY_LIMIT + 5) {
            safety.process_telemetry(&t);
        }
        assert_eq!(safety.recent_alerts().len(), ALERT_HISTORY_LIMIT);
        assert_eq!(safety.summary().total_alerts, (ALERT_HISTORY_LIMIT + 5) as u64);
    }

    #[tokio::test]
    async fn dropped_lander_is_not_kept_alive() {
        let (safety, lander) = module();
        drop(lander);
        safety.process_telemetry(&reading(5.0));
        assert_eq!(safety.status(), SafetyStatus::CriticalBattery);
    }
}
