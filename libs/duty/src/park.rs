// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::time::Duration;

pub(crate) const NANOS_PER_MILLI: u64 = 1_000_000;
pub(crate) const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Suspends the current OS thread for approximately `nanos` nanoseconds.
///
/// The wait is a plain OS-level timed block; no user-space scheduler is
/// consulted. The suspension may end early: an `unpark` of the thread (the
/// runner's interrupt delivery) or a spurious wakeup both cut it short, and
/// the caller must tolerate that.
///
/// On Windows the wait is rounded up to millisecond granularity and is always
/// at least one millisecond.
pub fn park(nanos: u64) {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            let millis = nanos.div_ceil(NANOS_PER_MILLI).max(1);
            std::thread::park_timeout(Duration::from_millis(millis));
        } else {
            std::thread::park_timeout(Duration::from_nanos(nanos));
        }
    }
}
