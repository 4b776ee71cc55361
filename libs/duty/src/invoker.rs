// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::agent::Agent;
use crate::error::AgentError;
use crate::loom::sync::Arc;
use crate::loom::sync::atomic::AtomicU64;
use crate::sink::{ErrorHandler, ErrorSink};
use core::fmt;

/// Drives one agent's lifecycle with the same semantics as an
/// [`AgentRunner`], but without an owned thread: the caller ticks [`invoke`]
/// from their own loop and decides themselves what to do between empty ticks.
///
/// The invoker is thread-confined by contract, so its lifecycle flags are
/// plain booleans.
///
/// [`AgentRunner`]: crate::runner::AgentRunner
/// [`invoke`]: AgentInvoker::invoke
pub struct AgentInvoker<A> {
    agent: A,
    sink: ErrorSink,
    is_started: bool,
    is_running: bool,
    is_closed: bool,
}

// === impl AgentInvoker ===

impl<A: Agent> AgentInvoker<A> {
    pub fn new(agent: A) -> Self {
        Self {
            agent,
            sink: ErrorSink::default(),
            is_started: false,
            is_running: false,
            is_closed: false,
        }
    }

    /// Installs a callback observing every failure routed through the error
    /// sink, ahead of the agent's own `on_error`.
    #[must_use]
    pub fn with_error_handler(
        mut self,
        handler: impl FnMut(&AgentError) -> Result<(), AgentError> + Send + 'static,
    ) -> Self {
        self.sink.handler = Some(Box::new(handler) as ErrorHandler);
        self
    }

    /// Installs a shared counter incremented once per failure routed through
    /// the error sink.
    #[must_use]
    pub fn with_error_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.sink.counter = Some(counter);
        self
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn agent_mut(&mut self) -> &mut A {
        &mut self.agent
    }

    pub fn is_started(&self) -> bool {
        self.is_started
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Starts the agent: `on_start`, then the invoker accepts [`invoke`]
    /// ticks.
    ///
    /// # Panics
    ///
    /// Panics if the invoker is already closed or was already started.
    ///
    /// # Errors
    ///
    /// When `on_start` fails, the failure is routed through the error sink,
    /// the invoker is closed, and the unabsorbed error is returned. A
    /// termination signal from `on_start` closes cleanly.
    ///
    /// [`invoke`]: AgentInvoker::invoke
    pub fn start(&mut self) -> Result<(), AgentError> {
        assert!(!self.is_closed, "agent invoker is closed");
        assert!(!self.is_started, "agent invoker was already started");
        self.is_started = true;

        match self.agent.on_start() {
            Ok(()) => {
                self.is_running = true;
                Ok(())
            }
            Err(error) => {
                let outcome = match error {
                    AgentError::Terminate => Ok(()),
                    error => self.sink.handle(&mut self.agent, error),
                };
                self.close();
                match outcome {
                    Ok(()) | Err(AgentError::Terminate) => Ok(()),
                    Err(unhandled) => Err(unhandled),
                }
            }
        }
    }

    /// One duty-cycle tick: `do_work` while running, `Ok(0)` otherwise.
    ///
    /// # Errors
    ///
    /// Failures escape to the caller untouched; funnel them back through
    /// [`handle_error`] to get runner-equivalent semantics.
    ///
    /// [`handle_error`]: AgentInvoker::handle_error
    pub fn invoke(&mut self) -> Result<usize, AgentError> {
        if !self.is_running {
            return Ok(0);
        }
        self.agent.do_work()
    }

    /// The caller's funnel for failures escaping [`invoke`].
    ///
    /// An interrupt is ignored, a termination signal closes the invoker, and
    /// everything else is routed through the error sink (closing when the
    /// sink or the agent's `on_error` raises termination).
    ///
    /// # Errors
    ///
    /// An error the sink did not absorb is handed back; the invoker stays
    /// running and the caller decides whether to close.
    ///
    /// [`invoke`]: AgentInvoker::invoke
    pub fn handle_error(&mut self, error: AgentError) -> Result<(), AgentError> {
        match error {
            AgentError::Interrupted => Ok(()),
            AgentError::Terminate => {
                self.close();
                Ok(())
            }
            error => match self.sink.handle(&mut self.agent, error) {
                Ok(()) => Ok(()),
                Err(AgentError::Terminate) => {
                    self.close();
                    Ok(())
                }
                Err(unhandled) => Err(unhandled),
            },
        }
    }

    /// Ends the lifecycle: `on_close` runs iff the invoker was started, with
    /// failures routed through the error sink. Idempotent.
    pub fn close(&mut self) {
        if self.is_closed {
            return;
        }
        self.is_running = false;
        self.is_closed = true;

        if self.is_started {
            if let Err(error) = self.agent.on_close() {
                match error {
                    AgentError::Terminate => {}
                    error => {
                        if let Err(unhandled) = self.sink.handle(&mut self.agent, error) {
                            tracing::error!(error = %unhandled, "agent failed to close");
                        }
                    }
                }
            }
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for AgentInvoker<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentInvoker")
            .field("agent", &self.agent)
            .field("is_started", &self.is_started)
            .field("is_running", &self.is_running)
            .field("is_closed", &self.is_closed)
            .finish_non_exhaustive()
    }
}
