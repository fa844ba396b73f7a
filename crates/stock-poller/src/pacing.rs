//! Poll delay policy.
//!
//! Two independent adjustments act on one delay:
//!
//! * **Backoff** after transport failures: the delay doubles (capped at the
//!   maximum) until too many failures in a row make the poller give up.
//! * **Pacing** after a usable response: the delay shrinks by 10% while the
//!   job reports progress (never below the initial delay) and grows by 20%
//!   while it doesn't (never above the maximum).

use std::time::Duration;

const BACKOFF_FACTOR: u32 = 2;
/// ×0.9 and ×1.2 as exact ratios, so delays stay whole nanoseconds.
const SPEED_UP: (u128, u128) = (9, 10);
const SLOW_DOWN: (u128, u128) = (6, 5);

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Try again after this delay.
    Retry(Duration),
    /// Stop polling; `attempts` failures happened in a row.
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct Pacer {
    initial: Duration,
    max: Duration,
    max_consecutive_errors: u32,
    delay: Duration,
    consecutive_errors: u32,
}

impl Pacer {
    pub fn new(initial: Duration, max: Duration, max_consecutive_errors: u32) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            max_consecutive_errors: max_consecutive_errors.max(1),
            delay: initial,
            consecutive_errors: 0,
        }
    }

    /// Delay before the next fetch.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn on_transport_error(&mut self) -> Backoff {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.max_consecutive_errors {
            return Backoff::GiveUp {
                attempts: self.consecutive_errors,
            };
        }
        self.delay = self.delay.saturating_mul(BACKOFF_FACTOR).min(self.max);
        Backoff::Retry(self.delay)
    }

    /// A payload arrived, whatever it said.
    pub fn on_response(&mut self) {
        self.consecutive_errors = 0;
    }

    /// Adjust the delay from the progress figure the job itself reported.
    pub fn on_progress(&mut self, reported: Option<f64>) -> Duration {
        let moving = reported.map(|p| p > 0.0).unwrap_or(false);
        self.delay = if moving {
            scale(self.delay, SPEED_UP).max(self.initial)
        } else {
            scale(self.delay, SLOW_DOWN).min(self.max)
        };
        self.delay
    }
}

fn scale(delay: Duration, (num, den): (u128, u128)) -> Duration {
    let nanos = delay.as_nanos() * num / den;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
