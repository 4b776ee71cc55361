// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::idle::IdleStrategy;
use crate::park::park;
use core::hint;
use std::thread;
use util::CachePadded;

/// Where a [`BackoffIdleStrategy`] currently sits in its spin → yield → park
/// progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    NotIdle,
    Spinning,
    Yielding,
    Parking,
}

#[derive(Debug)]
struct Hot {
    state: BackoffState,
    spins: u64,
    yields: u64,
    park_period_ns: u64,
}

/// Aggressive-to-gentle idle strategy: spin first, then yield to the OS
/// scheduler, then park with an exponentially doubling period capped at
/// `max_park_period_ns`.
///
/// The mutable counters sit inside a [`CachePadded`] region so neighboring
/// allocations cannot false-share a line with the hot path. A productive tick
/// (`reset`) is the only way back out of the parking state.
#[derive(Debug)]
pub struct BackoffIdleStrategy {
    max_spins: u64,
    max_yields: u64,
    min_park_period_ns: u64,
    max_park_period_ns: u64,
    hot: CachePadded<Hot>,
}

// === impl BackoffIdleStrategy ===

impl BackoffIdleStrategy {
    pub const DEFAULT_MAX_SPINS: u64 = 10;
    pub const DEFAULT_MAX_YIELDS: u64 = 5;
    pub const DEFAULT_MIN_PARK_PERIOD_NS: u64 = 1_000;
    pub const DEFAULT_MAX_PARK_PERIOD_NS: u64 = 1_000_000;

    /// # Panics
    ///
    /// Panics unless `1 <= min_park_period_ns <= max_park_period_ns`.
    pub fn new(
        max_spins: u64,
        max_yields: u64,
        min_park_period_ns: u64,
        max_park_period_ns: u64,
    ) -> Self {
        assert!(
            min_park_period_ns >= 1,
            "min park period must be at least 1ns"
        );
        assert!(
            min_park_period_ns <= max_park_period_ns,
            "min park period must not exceed the max park period"
        );
        Self {
            max_spins,
            max_yields,
            min_park_period_ns,
            max_park_period_ns,
            hot: CachePadded::new(Hot {
                state: BackoffState::NotIdle,
                spins: 0,
                yields: 0,
                park_period_ns: 0,
            }),
        }
    }

    #[inline]
    pub fn state(&self) -> BackoffState {
        self.hot.state
    }

    #[inline]
    pub fn spins(&self) -> u64 {
        self.hot.spins
    }

    #[inline]
    pub fn yields(&self) -> u64 {
        self.hot.yields
    }

    #[inline]
    pub fn park_period_ns(&self) -> u64 {
        self.hot.park_period_ns
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_MAX_SPINS,
            Self::DEFAULT_MAX_YIELDS,
            Self::DEFAULT_MIN_PARK_PERIOD_NS,
            Self::DEFAULT_MAX_PARK_PERIOD_NS,
        )
    }
}

impl IdleStrategy for BackoffIdleStrategy {
    fn idle(&mut self) {
        match self.hot.state {
            BackoffState::NotIdle => {
                self.hot.state = BackoffState::Spinning;
                self.hot.spins += 1;
            }
            BackoffState::Spinning => {
                hint::spin_loop();
                self.hot.spins += 1;
                if self.hot.spins > self.max_spins {
                    self.hot.state = BackoffState::Yielding;
                    self.hot.yields = 0;
                }
            }
            BackoffState::Yielding => {
                self.hot.yields += 1;
                if self.hot.yields > self.max_yields {
                    self.hot.state = BackoffState::Parking;
                    self.hot.park_period_ns = self.min_park_period_ns;
                } else {
                    thread::yield_now();
                }
            }
            BackoffState::Parking => {
                park(self.hot.park_period_ns);
                self.hot.park_period_ns = self
                    .hot
                    .park_period_ns
                    .saturating_mul(2)
                    .min(self.max_park_period_ns);
            }
        }
    }

    fn reset(&mut self) {
        self.hot.state = BackoffState::NotIdle;
        self.hot.spins = 0;
        self.hot.yields = 0;
        self.hot.park_period_ns = self.min_park_period_ns;
    }

    fn alias(&self) -> &'static str {
        "backoff"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snapshot(strategy: &BackoffIdleStrategy) -> (BackoffState, u64, u64, u64) {
        (
            strategy.state(),
            strategy.spins(),
            strategy.yields(),
            strategy.park_period_ns(),
        )
    }

    #[test]
    fn progression_spin_yield_park() {
        let mut strategy = BackoffIdleStrategy::new(2, 2, 1_000, 10_000);

        let mut observed = Vec::new();
        for _ in 0..6 {
            strategy.idle();
            observed.push(snapshot(&strategy));
        }

        assert_eq!(
            observed,
            vec![
                (BackoffState::Spinning, 1, 0, 0),
                (BackoffState::Spinning, 2, 0, 0),
                (BackoffState::Yielding, 3, 0, 0),
                (BackoffState::Yielding, 3, 1, 0),
                (BackoffState::Yielding, 3, 2, 0),
                (BackoffState::Parking, 3, 3, 1_000),
            ]
        );

        // the seventh call parks and doubles the period
        strategy.idle();
        assert_eq!(strategy.state(), BackoffState::Parking);
        assert_eq!(strategy.park_period_ns(), 2_000);
    }

    #[test]
    fn park_period_doubles_up_to_the_cap() {
        let mut strategy = BackoffIdleStrategy::new(0, 0, 1_000, 7_000);

        // walk straight through the spin and yield phases
        strategy.idle();
        strategy.idle();
        strategy.idle();
        assert_eq!(strategy.state(), BackoffState::Parking);

        let mut periods = Vec::new();
        for _ in 0..5 {
            periods.push(strategy.park_period_ns());
            strategy.idle();
        }
        assert_eq!(periods, vec![1_000, 2_000, 4_000, 7_000, 7_000]);
    }

    #[test]
    fn reset_returns_to_initial_state() {
        let mut strategy = BackoffIdleStrategy::new(1, 1, 1_000, 4_000);
        for _ in 0..10 {
            strategy.idle();
        }
        assert_eq!(strategy.state(), BackoffState::Parking);

        strategy.reset();
        assert_eq!(strategy.state(), BackoffState::NotIdle);
        assert_eq!(strategy.spins(), 0);
        assert_eq!(strategy.yields(), 0);
        assert_eq!(strategy.park_period_ns(), 1_000);

        // and the progression starts over
        strategy.idle();
        assert_eq!(snapshot(&strategy), (BackoffState::Spinning, 1, 0, 1_000));
    }

    #[test]
    fn productive_work_is_the_only_exit_from_parking() {
        let mut strategy = BackoffIdleStrategy::new(0, 0, 1_000, 2_000);
        for _ in 0..8 {
            strategy.idle_work(0);
        }
        assert_eq!(strategy.state(), BackoffState::Parking);

        strategy.idle_work(1);
        assert_eq!(strategy.state(), BackoffState::NotIdle);
    }

    #[test]
    #[should_panic(expected = "min park period must be at least 1ns")]
    fn rejects_zero_min_park_period() {
        let _strategy = BackoffIdleStrategy::new(1, 1, 0, 1_000);
    }

    #[test]
    #[should_panic(expected = "min park period must not exceed the max park period")]
    fn rejects_inverted_park_periods() {
        let _strategy = BackoffIdleStrategy::new(1, 1, 2_000, 1_000);
    }

    fn rank(state: BackoffState) -> u8 {
        match state {
            BackoffState::NotIdle => 0,
            BackoffState::Spinning => 1,
            BackoffState::Yielding => 2,
            BackoffState::Parking => 3,
        }
    }

    proptest! {
        // The state sequence over any run of empty ticks is monotone, never
        // skipping a phase, and a single productive tick lands exactly on the
        // freshly-reset state.
        #[test]
        fn empty_ticks_then_reset(
            max_spins in 0_u64..6,
            max_yields in 0_u64..6,
            empty_ticks in 1_usize..40,
        ) {
            let mut strategy = BackoffIdleStrategy::new(max_spins, max_yields, 1, 8);

            let mut previous = rank(strategy.state());
            for _ in 0..empty_ticks {
                strategy.idle_work(0);
                let current = rank(strategy.state());
                prop_assert!(current == previous || current == previous + 1);
                previous = current;
            }

            strategy.idle_work(1);
            prop_assert_eq!(strategy.state(), BackoffState::NotIdle);
            prop_assert_eq!(strategy.spins(), 0);
            prop_assert_eq!(strategy.yields(), 0);
            prop_assert_eq!(strategy.park_period_ns(), 1);
        }

        // Once parking, successive periods follow min, 2*min, 4*min, ...
        // capped at the max.
        #[test]
        fn park_periods_double(min in 1_u64..64, factor in 1_u64..16) {
            let max = min * factor;
            let mut strategy = BackoffIdleStrategy::new(0, 0, min, max);

            // three empty ticks walk NOT_IDLE -> SPINNING -> YIELDING -> PARKING
            strategy.idle();
            strategy.idle();
            strategy.idle();
            prop_assert_eq!(strategy.state(), BackoffState::Parking);

            let mut expected = min;
            for _ in 0..12 {
                prop_assert_eq!(strategy.park_period_ns(), expected);
                strategy.idle();
                expected = (expected * 2).min(max);
            }
        }
    }
}
