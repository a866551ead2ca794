//! [`Watchdog`] – heartbeat deadlines for monitored feeds.
//!
//! Each feed the supervisor expects to hear from (the telemetry lane, for
//! instance) is registered with a timeout and should call
//! [`Watchdog::heartbeat`] whenever it delivers.  A feed whose last heartbeat
//! is older than its timeout is *silent*.
//!
//! Deadlines run on [`tokio::time::Instant`] so paused-clock tests can move
//! them deterministically.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    /// Heartbeat within the deadline.
    Alive,
    /// No heartbeat within the deadline.
    Silent,
}

// ────────────────────────────────────────────────────────────────────────────
// Internal entry
// ────────────────────────────────────────────────────────────────────────────

struct FeedEntry {
    last_heartbeat: Instant,
    timeout: Duration,
}

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Watchdog {
    feeds: HashMap<String, FeedEntry>,
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `feed` with a heartbeat `timeout`.  The feed starts alive;
    /// re-registering resets its deadline.
    pub fn register(&mut self, feed: &str, timeout: Duration) {
        self.feeds.insert(
            feed.to_string(),
            FeedEntry {
                last_heartbeat: Instant::now(),
                timeout,
            },
        );
    }

    /// Reset the deadline of `feed`.  Unknown feeds are ignored.
    pub fn heartbeat(&mut self, feed: &str) {
        if let Some(entry) = self.feeds.get_mut(feed) {
            entry.last_heartbeat = Instant::now();
        }
    }

    /// Unknown feeds are [`FeedHealth::Silent`].
    pub fn health(&self, feed: &str) -> FeedHealth {
        match self.feeds.get(feed) {
            Some(entry) if entry.last_heartbeat.elapsed() <= entry.timeout => FeedHealth::Alive,
            _ => FeedHealth::Silent,
        }
    }

    /// Time since the last heartbeat of `feed`.
    pub fn silence(&self, feed: &str) -> Option<Duration> {
        self.feeds
            .get(feed)
            .map(|entry| entry.last_heartbeat.elapsed())
    }

    /// Every feed past its deadline, in no particular order.
    pub fn check_all(&self) -> Vec<String> {
        self.feeds
            .iter()
            .filter(|(_, entry)| entry.last_heartbeat.elapsed() > entry.timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn fresh_feed_is_alive() {
        let mut wd = Watchdog::new();
        wd.register("telemetry", Duration::from_secs(10));
        assert_eq!(wd.health("telemetry"), FeedHealth::Alive);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_resets_deadline() {
        let mut wd = Watchdog::new();
        wd.register("telemetry", Duration::from_secs(10));
        advance(Duration::from_secs(8)).await;
        wd.heartbeat("telemetry");
        advance(Duration::from_secs(8)).await;
        assert_eq!(wd.health("telemetry"), FeedHealth::Alive);
        assert_eq!(wd.silence("telemetry"), Some(Duration::from_secs(8)));
    }

    #[tokio::test(start_paused = true)]
    async fn feed_goes_silent_past_deadline() {
        let mut wd = Watchdog::new();
        wd.register("telemetry", Duration::from_secs(10));
        advance(Duration::from_secs(10)).await;
        assert_eq!(wd.health("telemetry"), FeedHealth::Alive);
        advance(Duration::from_millis(1)).await;
        assert_eq!(wd.health("telemetry"), FeedHealth::Silent);
    }

    #[tokio::test(start_paused = true)]
    async fn check_all_lists_only_silent_feeds() {
        let mut wd = Watchdog::new();
        wd.register("telemetry", Duration::from_secs(1));
        wd.register("health", Duration::from_secs(60));
        advance(Duration::from_secs(2)).await;
        assert_eq!(wd.check_all(), vec!["telemetry".to_string()]);
    }

    #[test]
    fn unknown_feed_is_silent_and_heartbeat_is_noop() {
        let mut wd = Watchdog::new();
        wd.heartbeat("ghost");
        assert_eq!(wd.health("ghost"), FeedHealth::Silent);
        assert_eq!(wd.silence("ghost"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reregister_resets_timer() {
        let mut wd = Watchdog::new();
        wd.register("telemetry", Duration::from_millis(20));
        advance(Duration::from_millis(30)).await;
        assert_eq!(wd.health("telemetry"), FeedHealth::Silent);
        wd.register("telemetry", Duration::from_secs(60));
        assert_eq!(wd.health("telemetry"), FeedHealth::Alive);
    }
}
