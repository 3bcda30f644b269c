//! One-second sliding window of received bytes
//!
//! Observational only: nothing in the session reads these numbers back.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::{AddAssign, SubAssign};
use std::time::{Duration, Instant};

/// Byte counts for one inbound frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    /// Whole frame
    pub total: u64,
    /// Numeric component portion of the decoded record
    pub components: u64,
    /// State blob portion of the decoded record
    pub states: u64,
}

impl AddAssign for Footprint {
    fn add_assign(&mut self, rhs: Self) {
        self.total += rhs.total;
        self.components += rhs.components;
        self.states += rhs.states;
    }
}

impl SubAssign for Footprint {
    fn sub_assign(&mut self, rhs: Self) {
        self.total -= rhs.total;
        self.components -= rhs.components;
        self.states -= rhs.states;
    }
}

/// Bytes received within the window
pub type BandwidthSample = Footprint;

/// Sliding-window byte accumulator
#[derive(Debug, Clone)]
pub struct BandwidthMeter {
    window: Duration,
    samples: VecDeque<(Instant, Footprint)>,
    sum: Footprint,
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl BandwidthMeter {
    /// Create a meter over `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            sum: Footprint::default(),
        }
    }

    /// Record a frame received at `now`
    pub fn record(&mut self, now: Instant, footprint: Footprint) {
        self.samples.push_back((now, footprint));
        self.sum += footprint;
        self.evict(now);
    }

    /// Bytes received in the window ending at `now`
    pub fn sample(&mut self, now: Instant) -> BandwidthSample {
        self.evict(now);
        self.sum
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(at, footprint)) = self.samples.front() {
            if now.saturating_duration_since(at) < self.window {
                break;
            }
            self.sum -= footprint;
            self.samples.pop_front();
        }
    }
}
