//! Per-link health bookkeeping shared by every adapter.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures_util::stream::BoxStream;
use skylink_types::{ConnectionHealth, ConnectionStatus};

use crate::adapter::HealthSource;
use crate::bus::Broadcaster;

/// Current [`ConnectionHealth`] of one link plus a lane announcing its
/// transitions.
#[derive(Debug)]
pub struct HealthTracker {
    current: Mutex<ConnectionHealth>,
    updates: Broadcaster<ConnectionHealth>,
}

impl HealthTracker {
    pub fn new(name: &'static str) -> Self {
        Self {
            current: Mutex::new(ConnectionHealth::disconnected()),
            updates: Broadcaster::with_default_capacity(name),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionHealth> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ConnectionHealth {
        self.lock().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.lock().status
    }

    pub fn stream(&self) -> BoxStream<'static, ConnectionHealth> {
        self.updates.stream()
    }

    /// Change the status.  A transition is published; setting the same status
    /// again is silent.
    pub fn set_status(&self, status: ConnectionStatus) {
        let published = {
            let mut health = self.lock();
            if health.status == status {
                return;
            }
            health.status = status;
            health.clone()
        };
        self.updates.publish(published);
    }

    /// Set the status and publish the record even if nothing changed.  Used
    /// for periodic aggregate readings.
    pub fn publish_status(&self, status: ConnectionStatus) {
        let published = {
            let mut health = self.lock();
            health.status = status;
            health.clone()
        };
        self.updates.publish(published);
    }

    /// Append to the bounded error list and publish the updated record.
    pub fn record_error(&self, error: impl Into<String>) {
        let published = {
            let mut health = self.lock();
            health.record_error(error);
            health.clone()
        };
        self.updates.publish(published);
    }

    /// Stamp `last_message_received_at`.  Not published; this fires on every
    /// telemetry frame.
    pub fn message_received(&self) {
        self.lock().last_message_received_at = Some(Utc::now());
    }

    pub fn reconnect_attempted(&self) -> u32 {
        let (attempts, published) = {
            let mut health = self.lock();
            health.reconnect_attempts += 1;
            (health.reconnect_attempts, health.clone())
        };
        self.updates.publish(published);
        attempts
    }

    pub fn reset_reconnect_attempts(&self) {
        self.lock().reconnect_attempts = 0;
    }
}

impl HealthSource for HealthTracker {
    fn health_snapshot(&self) -> ConnectionHealth {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transitions_are_published_once() {
        let tracker = HealthTracker::new("test");
        let mut rx = tracker.updates.subscribe();

        tracker.set_status(ConnectionStatus::Connected);
        tracker.set_status(ConnectionStatus::Connected);
        tracker.set_status(ConnectionStatus::Disconnected);

        assert_eq!(rx.recv().await.unwrap().status, ConnectionStatus::Connected);
        assert_eq!(rx.recv().await.unwrap().status, ConnectionStatus::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reconnect_attempts_count_until_reset() {
        let tracker = HealthTracker::new("test");
        assert_eq!(tracker.reconnect_attempted(), 1);
        assert_eq!(tracker.reconnect_attempted(), 2);
        tracker.set_status(ConnectionStatus::Connected);
        assert_eq!(tracker.snapshot().reconnect_attempts, 2);

        tracker.reset_reconnect_attempts();
        assert_eq!(tracker.snapshot().reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn periodic_readings_publish_without_change() {
        let tracker = HealthTracker::new("test");
        let mut rx = tracker.updates.subscribe();
        tracker.publish_status(ConnectionStatus::Disconnected);
        tracker.publish_status(ConnectionStatus::Disconnected);
        assert_eq!(rx.recv().await.unwrap().status, ConnectionStatus::Disconnected);
        assert_eq!(rx.recv().await.unwrap().status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn message_received_stamps_time() {
        let tracker = HealthTracker::new("test");
        let source: &dyn HealthSource = &tracker;
        assert!(source.health_snapshot().last_message_received_at.is_none());
        tracker.message_received();
        assert!(source.health_snapshot().last_message_received_at.is_some());
    }
}
