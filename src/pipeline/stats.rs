//! Throughput and latency statistics shared between threads.
//!
//! Writers (the producing or consuming module) and readers (subscription
//! owners, `Engine::stats`) touch these concurrently. Every read takes the
//! lock and computes the rate from a consistent snapshot of the window, so a
//! reader never sees a half-updated value.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default trailing window for rate computation.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(1);

/// Number of samples kept by [`LatencyWindow`].
pub const LATENCY_WINDOW_SIZE: usize = 25;

/// Upper bound on timestamps retained by one meter.
const MAX_WINDOW_EVENTS: usize = 100_000;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RateState {
    events: VecDeque<Instant>,
    total: u64,
}

/// Events-per-second over a trailing time window.
pub struct RateMeter {
    window: Duration,
    state: Mutex<RateState>,
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: if window.is_zero() {
                DEFAULT_RATE_WINDOW
            } else {
                window
            },
            state: Mutex::new(RateState {
                events: VecDeque::new(),
                total: 0,
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    pub fn record_at(&self, now: Instant) {
        let mut state = lock(&self.state);
        state.total += 1;
        state.events.push_back(now);
        if state.events.len() > MAX_WINDOW_EVENTS {
            state.events.pop_front();
        }
        Self::prune(&mut state.events, now, self.window);
    }

    fn prune(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = events.front() {
            if now.saturating_duration_since(oldest) > window {
                events.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of events inside the trailing window ending now.
    pub fn events_in_window(&self) -> usize {
        self.events_in_window_at(Instant::now())
    }

    pub fn events_in_window_at(&self, now: Instant) -> usize {
        let state = lock(&self.state);
        state
            .events
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) <= self.window)
            .count()
    }

    /// Frames per second averaged over the trailing window.
    pub fn fps(&self) -> f64 {
        self.fps_at(Instant::now())
    }

    pub fn fps_at(&self, now: Instant) -> f64 {
        self.events_in_window_at(now) as f64 / self.window.as_secs_f64()
    }

    /// Events recorded since creation.
    pub fn total(&self) -> u64 {
        lock(&self.state).total
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

impl std::fmt::Debug for RateMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateMeter")
            .field("window", &self.window)
            .field("total", &self.total())
            .finish()
    }
}

/// Trailing average of the last [`LATENCY_WINDOW_SIZE`] processing durations.
#[derive(Default)]
pub struct LatencyWindow {
    samples: Mutex<VecDeque<Duration>>,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, latency: Duration) {
        let mut samples = lock(&self.samples);
        samples.push_back(latency);
        if samples.len() > LATENCY_WINDOW_SIZE {
            samples.pop_front();
        }
    }

    pub fn average_ms(&self) -> f64 {
        let samples = lock(&self.samples);
        if samples.is_empty() {
            return 0.0;
        }
        let total: f64 = samples.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
        total / samples.len() as f64
    }

    pub fn max_ms(&self) -> f64 {
        lock(&self.samples)
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rate_counts_events_in_window() {
        let meter = RateMeter::new(Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..5 {
            meter.record_at(start + Duration::from_millis(i * 10));
        }
        let now = start + Duration::from_millis(50);
        assert_eq!(meter.events_in_window_at(now), 5);
        assert!((meter.fps_at(now) - 5.0).abs() < 1e-9);
        assert_eq!(meter.total(), 5);
    }

    #[test]
    fn test_rate_forgets_old_events() {
        let meter = RateMeter::new(Duration::from_millis(100));
        let start = Instant::now();
        meter.record_at(start);
        meter.record_at(start + Duration::from_millis(10));
        let later = start + Duration::from_millis(500);
        assert_eq!(meter.events_in_window_at(later), 0);
        assert_eq!(meter.fps_at(later), 0.0);
        assert_eq!(meter.total(), 2);
    }

    #[test]
    fn test_zero_window_falls_back_to_default() {
        let meter = RateMeter::new(Duration::ZERO);
        assert_eq!(meter.window(), DEFAULT_RATE_WINDOW);
    }

    #[test]
    fn test_concurrent_record_and_read() {
        let meter = Arc::new(RateMeter::new(Duration::from_secs(10)));
        let writer = {
            let meter = meter.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    meter.record();
                }
            })
        };
        for _ in 0..100 {
            let fps = meter.fps();
            assert!(fps >= 0.0 && fps <= 100.0);
        }
        writer.join().unwrap();
        assert_eq!(meter.total(), 1000);
    }

    #[test]
    fn test_latency_window_keeps_last_samples() {
        let window = LatencyWindow::new();
        assert_eq!(window.average_ms(), 0.0);
        for _ in 0..LATENCY_WINDOW_SIZE {
            window.record(Duration::from_millis(100));
        }
        for _ in 0..LATENCY_WINDOW_SIZE {
            window.record(Duration::from_millis(2));
        }
        assert!((window.average_ms() - 2.0).abs() < 1e-6);
        assert!((window.max_ms() - 2.0).abs() < 1e-6);
    }
}
