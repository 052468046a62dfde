//! Rolling-window rate smoothing shared by the embedding manager and the
//! pipeline driver.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Smoothed rate over a sliding window of `(timestamp, cumulative_count)`
/// samples.
///
/// The rate is the count delta between the oldest and newest in-window
/// samples divided by their time span. With fewer than two samples in the
/// window it falls back to the total average since construction, so early
/// readings are defined instead of spiky.
pub struct RateWindow {
    window: Duration,
    started: Instant,
    entries: VecDeque<(Instant, u64)>,
    latest: u64,
}

impl RateWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            started: Instant::now(),
            entries: VecDeque::new(),
            latest: 0,
        }
    }

    /// Record the current cumulative count and prune expired samples.
    pub fn record(&mut self, cumulative: u64) {
        let now = Instant::now();
        self.latest = cumulative;
        self.entries.push_back((now, cumulative));
        self.prune(now);
    }

    /// Per-second rate smoothed over the window.
    pub fn rate(&mut self) -> f64 {
        let now = Instant::now();
        self.prune(now);

        if self.entries.len() >= 2 {
            let (oldest_at, oldest) = self.entries.front().copied().unwrap();
            let (newest_at, newest) = self.entries.back().copied().unwrap();
            let span = newest_at.duration_since(oldest_at).as_secs_f64();
            if span > 0.0 {
                return (newest - oldest) as f64 / span;
            }
        }

        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed > 0.0 {
            self.latest as f64 / elapsed
        } else {
            0.0
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.entries.front() {
            if now.duration_since(*at) > self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_from_window_samples() {
        let mut window = RateWindow::new(Duration::from_secs(30));
        window.record(0);
        std::thread::sleep(Duration::from_millis(100));
        window.record(10);

        let rate = window.rate();
        // 10 completions over ~0.1s
        assert!(rate > 50.0, "rate was {}", rate);
        assert!(rate < 250.0, "rate was {}", rate);
    }

    #[test]
    fn test_single_sample_falls_back_to_total_average() {
        let mut window = RateWindow::new(Duration::from_secs(30));
        std::thread::sleep(Duration::from_millis(100));
        window.record(5);

        let rate = window.rate();
        assert!(rate > 0.0);
        assert!(rate <= 60.0, "rate was {}", rate);
    }

    #[test]
    fn test_expired_samples_are_pruned() {
        let mut window = RateWindow::new(Duration::from_millis(50));
        window.record(100);
        std::thread::sleep(Duration::from_millis(80));
        window.record(100);

        // The burst aged out of the window; the smoothed rate is flat
        let rate = window.rate();
        assert!(rate < 5.0, "rate was {}", rate);
    }

    #[test]
    fn test_empty_window_reports_zero_ish() {
        let mut window = RateWindow::new(Duration::from_secs(30));
        assert_eq!(window.rate(), 0.0);
    }
}
