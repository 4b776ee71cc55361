// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod composite;
mod dynamic;

use crate::error::AgentError;
pub use composite::CompositeAgent;
pub use dynamic::{DynamicCompositeAgent, DynamicCompositeController, Status};

/// A cooperative, single-threaded state machine with a start → work → close
/// lifecycle, driven by an [`AgentRunner`] or [`AgentInvoker`].
///
/// The framework calls `on_start` exactly once before the first `do_work`,
/// then ticks `do_work` repeatedly, then calls `on_close` exactly once. All
/// calls happen on the same thread; the agent never needs to synchronize its
/// own state.
///
/// Returning [`AgentError::Terminate`] from any lifecycle method ends the run
/// cleanly; it is never reported as an error.
///
/// [`AgentRunner`]: crate::runner::AgentRunner
/// [`AgentInvoker`]: crate::invoker::AgentInvoker
pub trait Agent: Send {
    /// Short identifier for this agent, used for thread names, composite
    /// names and log output. Must be cheap.
    fn name(&self) -> &str;

    /// Called once, before any `do_work`.
    ///
    /// # Errors
    ///
    /// A failure here aborts the lifecycle; `on_close` still runs.
    fn on_start(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Advance one unit of work without blocking.
    ///
    /// The returned work count is approximate; `0` means "nothing to do this
    /// tick" and drives the idle strategy, any positive count resets it.
    ///
    /// # Errors
    ///
    /// [`AgentError::Terminate`] ends the run cleanly; everything else is
    /// routed through the error sink.
    fn do_work(&mut self) -> Result<usize, AgentError>;

    /// Called once iff `on_start` was invoked, whether or not it succeeded.
    ///
    /// # Errors
    ///
    /// Failures are reported through the error sink but never prevent the
    /// close from completing.
    fn on_close(&mut self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Invoked by the error sink after a tick failed.
    ///
    /// # Errors
    ///
    /// The default rethrows, escalating the failure out of the duty-cycle
    /// loop. Overrides may recover by returning `Ok`, or request shutdown by
    /// returning [`AgentError::Terminate`].
    fn on_error(&mut self, error: AgentError) -> Result<(), AgentError> {
        Err(error)
    }
}

impl<A: Agent + ?Sized> Agent for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_start(&mut self) -> Result<(), AgentError> {
        (**self).on_start()
    }

    fn do_work(&mut self) -> Result<usize, AgentError> {
        (**self).do_work()
    }

    fn on_close(&mut self) -> Result<(), AgentError> {
        (**self).on_close()
    }

    fn on_error(&mut self, error: AgentError) -> Result<(), AgentError> {
        (**self).on_error(error)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::loom::sync::Arc;
    use crate::loom::sync::atomic::{AtomicUsize, Ordering};

    /// Probe agent recording every lifecycle call; `do_work` always reports
    /// one unit of work.
    pub(crate) struct TickAgent {
        name: &'static str,
        pub(crate) starts: Arc<AtomicUsize>,
        pub(crate) ticks: Arc<AtomicUsize>,
        pub(crate) closes: Arc<AtomicUsize>,
    }

    impl TickAgent {
        pub(crate) fn new(name: &'static str) -> Self {
            Self {
                name,
                starts: Arc::new(AtomicUsize::new(0)),
                ticks: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Agent for TickAgent {
        fn name(&self) -> &str {
            self.name
        }

        fn on_start(&mut self) -> Result<(), AgentError> {
            self.starts.fetch_add(1, Ordering::Release);
            Ok(())
        }

        fn do_work(&mut self) -> Result<usize, AgentError> {
            self.ticks.fetch_add(1, Ordering::Release);
            Ok(1)
        }

        fn on_close(&mut self) -> Result<(), AgentError> {
            self.closes.fetch_add(1, Ordering::Release);
            Ok(())
        }
    }
}
