// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::idle::IdleStrategy;
use crate::loom::sync::Arc;
use crate::loom::sync::atomic::{AtomicU8, Ordering};
use crate::park::park;
use core::hint;
use static_assertions::assert_impl_all;
use std::thread;

/// Behavior selector read by a [`ControllableIdleStrategy`] on every idle
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMode {
    /// No supervisor has taken control yet; behaves like [`Park`].
    ///
    /// [`Park`]: ControlMode::Park
    NotControlled = 0,
    NoOp = 1,
    BusySpin = 2,
    Yield = 3,
    /// Park for a fixed 1 µs period.
    Park = 4,
}

impl ControlMode {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::NoOp,
            2 => Self::BusySpin,
            3 => Self::Yield,
            4 => Self::Park,
            _ => Self::NotControlled,
        }
    }
}

/// Shared mode indicator for [`ControllableIdleStrategy`].
///
/// The indicator lives outside the strategy so that a supervisor can switch
/// the worker's idle behavior without synchronizing with the worker itself:
/// writers release-store the mode, the worker acquire-loads it on its next
/// idle call.
#[derive(Debug)]
pub struct IdleControl(AtomicU8);
assert_impl_all!(IdleControl: Send, Sync);

// === impl IdleControl ===

impl IdleControl {
    pub fn new(mode: ControlMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn set(&self, mode: ControlMode) {
        self.0.store(mode as u8, Ordering::Release);
    }

    pub fn mode(&self) -> ControlMode {
        ControlMode::from_u8(self.0.load(Ordering::Acquire))
    }
}

impl Default for IdleControl {
    fn default() -> Self {
        Self::new(ControlMode::NotControlled)
    }
}

/// Idle strategy whose behavior is switched at runtime through a shared
/// [`IdleControl`] indicator.
#[derive(Debug)]
pub struct ControllableIdleStrategy {
    control: Arc<IdleControl>,
}

// === impl ControllableIdleStrategy ===

impl ControllableIdleStrategy {
    /// Fixed park period used by [`ControlMode::Park`] and the
    /// [`ControlMode::NotControlled`] fallthrough.
    pub const PARK_PERIOD_NS: u64 = 1_000;

    pub fn new(control: Arc<IdleControl>) -> Self {
        Self { control }
    }
}

impl IdleStrategy for ControllableIdleStrategy {
    fn idle(&mut self) {
        match self.control.mode() {
            ControlMode::NoOp => {}
            ControlMode::BusySpin => hint::spin_loop(),
            ControlMode::Yield => thread::yield_now(),
            ControlMode::Park | ControlMode::NotControlled => park(Self::PARK_PERIOD_NS),
        }
    }

    fn alias(&self) -> &'static str {
        "controllable"
    }
}
