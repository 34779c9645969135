use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Circuit-breaker state, shared by the gateway's per-shard breaker (§4.1)
/// and the agent gateway's per-provider breaker (§4.5).
///
/// Tracks a rolling window of outcomes; trips to `Open` once the error rate
/// over the window crosses `error_rate_threshold`, cools for `cooldown`, then
/// half-opens to let a single trial request through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Minimum samples in the window before the error rate is evaluated.
    pub window_size: usize,
    /// Error rate (0.0..=1.0) that trips the breaker.
    pub error_rate_threshold: f64,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            error_rate_threshold: 0.50,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// A single breaker instance (one per shard, or one per upstream provider).
#[derive(Debug)]
pub struct Breaker {
    config: BreakerConfig,
    samples: VecDeque<bool>, // true = error
    state: BreakerState,
    opened_at: Option<Instant>,
    half_open_trial_in_flight: bool,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            samples: VecDeque::new(),
            state: BreakerState::Closed,
            opened_at: None,
            half_open_trial_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Whether a new call should be let through right now.
    pub fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown {
                    self.state = BreakerState::HalfOpen;
                    self.half_open_trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                // Only one trial call in flight at a time.
                !self.half_open_trial_in_flight
            }
        }
    }

    /// Record a call outcome and update the breaker state.
    pub fn record(&mut self, is_error: bool) {
        match self.state {
            BreakerState::HalfOpen => {
                self.half_open_trial_in_flight = false;
                if is_error {
                    self.trip();
                } else {
                    self.reset();
                }
                return;
            }
            _ => {}
        }

        self.samples.push_back(is_error);
        if self.samples.len() > self.config.window_size {
            self.samples.pop_front();
        }

        if self.samples.len() >= self.config.window_size {
            let errors = self.samples.iter().filter(|e| **e).count();
            let rate = errors as f64 / self.samples.len() as f64;
            if rate >= self.config.error_rate_threshold {
                self.trip();
            }
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.samples.clear();
        self.half_open_trial_in_flight = false;
    }

    fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.samples.clear();
        self.half_open_trial_in_flight = false;
    }

    pub fn retry_after(&self) -> Duration {
        match self.opened_at {
            Some(t) => self.config.cooldown.saturating_sub(t.elapsed()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_when_error_rate_exceeds_threshold() {
        let mut b = Breaker::new(BreakerConfig {
            window_size: 4,
            error_rate_threshold: 0.5,
            cooldown: Duration::from_millis(10),
        });
        assert!(b.allow());
        b.record(true);
        b.record(true);
        b.record(false);
        b.record(true);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn half_opens_after_cooldown_and_closes_on_success() {
        let mut b = Breaker::new(BreakerConfig {
            window_size: 2,
            error_rate_threshold: 0.5,
            cooldown: Duration::from_millis(5),
        });
        b.record(true);
        b.record(true);
        assert_eq!(b.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(10));
        assert!(b.allow());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record(false);
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
