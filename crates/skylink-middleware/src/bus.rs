//! Typed publish/subscribe channels.
//!
//! Uses [`tokio::sync::broadcast`] under the hood so that every subscriber
//! receives every value without any single subscriber blocking the others.
//! A slow subscriber loses the oldest values (it *lags*) instead of applying
//! backpressure to the publisher.
//!
//! The control plane runs one [`Broadcaster`] per lane:
//!
//! | Lane | Typical traffic |
//! |---|---|
//! | telemetry | merged drone telemetry, one value per reading |
//! | health | per-adapter and aggregate [`ConnectionHealth`] transitions |
//! | alerts | safety alerts from the supervisor |
//!
//! [`ConnectionHealth`]: skylink_types::ConnectionHealth

use futures_util::stream::{self, BoxStream};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered values before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// A named broadcast lane.  Clone it cheaply – all clones share the same
/// underlying channel.
#[derive(Debug, Clone)]
pub struct Broadcaster<T> {
    name: &'static str,
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create a lane with the given capacity.  `name` only appears in logs.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { name, sender }
    }

    /// Create a lane with [`DEFAULT_CAPACITY`].
    pub fn with_default_capacity(name: &'static str) -> Self {
        Self::new(name, DEFAULT_CAPACITY)
    }

    /// Publish `value` to every current subscriber.
    ///
    /// Returns the number of subscribers that were handed the value.  Having
    /// no subscribers is a normal condition and returns `0`.
    pub fn publish(&self, value: T) -> usize {
        self.sender.send(value).unwrap_or(0)
    }

    /// Raw receiver.  The caller handles `Lagged` itself.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Subscribe as a [`BoxStream`] that skips over lag and ends once every
    /// clone of this broadcaster has been dropped.
    pub fn stream(&self) -> BoxStream<'static, T> {
        receiver_stream(self.name, self.sender.subscribe())
    }
}

/// Turn a broadcast receiver into a stream.  Lagged values are logged and
/// skipped.
pub fn receiver_stream<T: Clone + Send + 'static>(
    name: &'static str,
    receiver: broadcast::Receiver<T>,
) -> BoxStream<'static, T> {
    Box::pin(stream::unfold(receiver, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(value) => return Some((value, rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = name, lagged_by = n, "stream subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let lane: Broadcaster<u32> = Broadcaster::with_default_capacity("test");
        assert_eq!(lane.publish(7), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_value() {
        let lane = Broadcaster::with_default_capacity("test");
        let mut rx1 = lane.subscribe();
        let mut rx2 = lane.subscribe();

        assert_eq!(lane.publish("hello".to_string()), 2);

        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn stream_preserves_publish_order() {
        let lane = Broadcaster::with_default_capacity("test");
        let stream = lane.stream();
        for i in 0..5u32 {
            lane.publish(i);
        }
        drop(lane);
        let values: Vec<u32> = stream.collect().await;
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    /// Flooding a low-capacity lane while the subscriber sleeps must not block
    /// the publisher; the stream resumes with the newest retained values.
    #[tokio::test]
    async fn stream_skips_over_lag() {
        const CAPACITY: usize = 8;
        let lane = Broadcaster::new("flood", CAPACITY);
        let mut stream = lane.stream();

        for i in 0..1_000u32 {
            lane.publish(i);
        }

        let first = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("stream must yield after lag")
            .expect("lane still open");
        assert!(first >= 1_000 - CAPACITY as u32, "got stale value {first}");
    }

    #[tokio::test]
    async fn subscriber_on_other_lane_sees_nothing() {
        let telemetry: Broadcaster<u32> = Broadcaster::with_default_capacity("telemetry");
        let alerts: Broadcaster<u32> = Broadcaster::with_default_capacity("alerts");
        let mut alerts_rx = alerts.subscribe();
        let _telemetry_rx = telemetry.subscribe();

        telemetry.publish(1);

        let result = tokio::time::timeout(Duration::from_millis(50), alerts_rx.recv()).await;
        assert!(result.is_err(), "alerts lane must not receive telemetry values");
    }
}
