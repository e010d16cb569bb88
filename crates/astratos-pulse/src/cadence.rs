//! Delay policy between broadcast ticks.

use std::time::Duration;

use rand::Rng;

/// How long the scheduler waits before the next tick.
///
/// A randomized cadence redraws its delay on every tick, so consecutive
/// updates arrive at irregular intervals like real traffic would.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Same delay every tick.
    Fixed(Duration),
    /// Uniformly drawn from `min..=max` on every tick.
    Randomized {
        /// Shortest delay.
        min: Duration,
        /// Longest delay.
        max: Duration,
    },
}

impl Cadence {
    /// Cadence over `min..=max`; collapses to [`Cadence::Fixed`] when the
    /// bounds are equal. Swapped bounds are reordered.
    pub const fn between(min: Duration, max: Duration) -> Self {
        if min.as_nanos() == max.as_nanos() {
            Self::Fixed(min)
        } else if min.as_nanos() < max.as_nanos() {
            Self::Randomized { min, max }
        } else {
            Self::Randomized { min: max, max: min }
        }
    }

    /// Draw the delay before the next tick.
    pub fn next_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Randomized { min, max } => {
                let lo = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
                let hi = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
                if lo >= hi {
                    return min;
                }
                Duration::from_millis(rng.random_range(lo..=hi))
            }
        }
    }
}
