//! Throttling classification over a sliding window of provider events.
//!
//! Distinguishes delays we inflicted on ourselves (the client-side rate
//! limiter sleeping before dispatch) from pushback by the provider (429s,
//! abnormally slow responses). Occasional sub-second client waits are normal
//! rate-limiter behavior and are not reported as throttling.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::embeddings::ThrottleEvent;

/// Client waits at or below this are routine and never counted.
const SIGNIFICANT_WAIT: Duration = Duration::from_millis(100);

/// Minimum number of significant waits in the window before client
/// throttling is even considered.
const CLIENT_WAIT_MIN_EVENTS: usize = 6;

/// Average significant wait that distinguishes real throttling from noise.
const CLIENT_WAIT_AVG_THRESHOLD: Duration = Duration::from_millis(500);

/// Current throttling classification, for the progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottlingStatus {
    /// Operating at full speed
    FullSpeed,
    /// Our own rate limiter is slowing requests
    ClientThrottled,
    /// The provider is pushing back; takes priority over client throttling
    ServerThrottled,
}

impl ThrottlingStatus {
    /// Display glyph for the progress line.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::FullSpeed => "⚡",
            Self::ClientThrottled => "🟡",
            Self::ServerThrottled => "🔴",
        }
    }
}

impl std::fmt::Display for ThrottlingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullSpeed => write!(f, "full-speed"),
            Self::ClientThrottled => write!(f, "client-throttled"),
            Self::ServerThrottled => write!(f, "server-throttled"),
        }
    }
}

#[derive(Default)]
struct ThrottleState {
    client_waits: VecDeque<(Instant, Duration)>,
    server_events: VecDeque<Instant>,
    client_wait_total: Duration,
    server_throttle_count: u64,
}

/// Sliding-window recorder and classifier for throttle events.
pub struct ThrottleDetector {
    window: Duration,
    state: Mutex<ThrottleState>,
}

impl ThrottleDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn record(&self, event: ThrottleEvent) {
        match event {
            ThrottleEvent::ClientWait(wait) => self.record_client_wait(wait),
            ThrottleEvent::ServerThrottle => self.record_server_throttle(),
        }
    }

    /// Record a rate-limiter sleep. Waits of 100 ms or less add to the
    /// running total but never count toward throttling detection.
    pub fn record_client_wait(&self, wait: Duration) {
        if wait.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut state = self.lock();
        state.client_wait_total += wait;
        if wait > SIGNIFICANT_WAIT {
            state.client_waits.push_back((now, wait));
        }
        Self::prune(&mut state, now, self.window);
    }

    /// Record provider pushback (a 429 or an abnormally slow response).
    pub fn record_server_throttle(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        state.server_throttle_count += 1;
        state.server_events.push_back(now);
        Self::prune(&mut state, now, self.window);
    }

    /// Classify the current window. Any server event wins; otherwise a burst
    /// of long client waits reports client throttling.
    pub fn classify(&self) -> ThrottlingStatus {
        let now = Instant::now();
        let mut state = self.lock();
        Self::prune(&mut state, now, self.window);

        if !state.server_events.is_empty() {
            return ThrottlingStatus::ServerThrottled;
        }

        let significant = state.client_waits.len();
        if significant >= CLIENT_WAIT_MIN_EVENTS {
            let total: Duration = state.client_waits.iter().map(|(_, w)| *w).sum();
            let average = total / significant as u32;
            if average > CLIENT_WAIT_AVG_THRESHOLD {
                return ThrottlingStatus::ClientThrottled;
            }
        }

        ThrottlingStatus::FullSpeed
    }

    /// Lifetime totals: (accumulated client wait, server throttle count).
    pub fn totals(&self) -> (Duration, u64) {
        let state = self.lock();
        (state.client_wait_total, state.server_throttle_count)
    }

    fn prune(state: &mut ThrottleState, now: Instant, window: Duration) {
        while state
            .client_waits
            .front()
            .map(|(at, _)| now.duration_since(*at) > window)
            .unwrap_or(false)
        {
            state.client_waits.pop_front();
        }
        while state
            .server_events
            .front()
            .map(|at| now.duration_since(*at) > window)
            .unwrap_or(false)
        {
            state.server_events.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ThrottleDetector {
        ThrottleDetector::new(Duration::from_secs(10))
    }

    #[test]
    fn test_quiet_window_is_full_speed() {
        assert_eq!(detector().classify(), ThrottlingStatus::FullSpeed);
    }

    #[test]
    fn test_client_throttled_on_burst_of_long_waits() {
        let d = detector();
        // Seven waits averaging ~560 ms: the documented threshold case
        for ms in [120, 150, 600, 800, 700, 900, 650] {
            d.record_client_wait(Duration::from_millis(ms));
        }
        assert_eq!(d.classify(), ThrottlingStatus::ClientThrottled);
    }

    #[test]
    fn test_short_waits_are_not_throttling() {
        let d = detector();
        // Plenty of waits, but all routine sub-100ms sleeps
        for _ in 0..20 {
            d.record_client_wait(Duration::from_millis(50));
        }
        assert_eq!(d.classify(), ThrottlingStatus::FullSpeed);

        let (total, _) = d.totals();
        assert_eq!(total, Duration::from_millis(1000));
    }

    #[test]
    fn test_few_long_waits_are_not_throttling() {
        let d = detector();
        for _ in 0..5 {
            d.record_client_wait(Duration::from_millis(900));
        }
        // Five significant waits is below the six-event floor
        assert_eq!(d.classify(), ThrottlingStatus::FullSpeed);
    }

    #[test]
    fn test_low_average_is_not_throttling() {
        let d = detector();
        // Many significant waits, but the average stays near 200 ms
        for _ in 0..10 {
            d.record_client_wait(Duration::from_millis(200));
        }
        assert_eq!(d.classify(), ThrottlingStatus::FullSpeed);
    }

    #[test]
    fn test_server_event_takes_priority() {
        let d = detector();
        for ms in [600, 800, 700, 900, 650, 750, 700] {
            d.record_client_wait(Duration::from_millis(ms));
        }
        assert_eq!(d.classify(), ThrottlingStatus::ClientThrottled);

        d.record_server_throttle();
        assert_eq!(d.classify(), ThrottlingStatus::ServerThrottled);

        let (_, count) = d.totals();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_server_event_ages_out() {
        let d = ThrottleDetector::new(Duration::from_millis(50));
        d.record_server_throttle();
        assert_eq!(d.classify(), ThrottlingStatus::ServerThrottled);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(d.classify(), ThrottlingStatus::FullSpeed);
        // The lifetime counter is unaffected by window pruning
        assert_eq!(d.totals().1, 1);
    }

    #[test]
    fn test_record_dispatches_event_kinds() {
        let d = detector();
        d.record(ThrottleEvent::ClientWait(Duration::from_millis(300)));
        d.record(ThrottleEvent::ServerThrottle);
        assert_eq!(d.classify(), ThrottlingStatus::ServerThrottled);
    }
}
