// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::agent::Agent;
use crate::error::AgentError;
use crate::loom::sync::Arc;
use crate::loom::sync::atomic::{AtomicU64, Ordering};
use core::fmt;

/// Callback observing every failure routed through the error sink, invoked
/// before the agent's own `on_error`.
///
/// Returning `Err` escalates instead (skipping the agent's `on_error`);
/// [`AgentError::Terminate`] in particular requests an orderly shutdown.
pub type ErrorHandler = Box<dyn FnMut(&AgentError) -> Result<(), AgentError> + Send>;

/// Optional error counter plus optional handler callback, composed with the
/// failing agent's `on_error`.
#[derive(Default)]
pub(crate) struct ErrorSink {
    pub(crate) counter: Option<Arc<AtomicU64>>,
    pub(crate) handler: Option<ErrorHandler>,
}

// === impl ErrorSink ===

impl ErrorSink {
    /// Routes one lifecycle failure: count it, show it to the handler, then
    /// let the agent's `on_error` decide. A handler error short-circuits.
    pub(crate) fn handle<A: Agent + ?Sized>(
        &mut self,
        agent: &mut A,
        error: AgentError,
    ) -> Result<(), AgentError> {
        if let Some(counter) = &self.counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(handler) = &mut self.handler {
            handler(&error)?;
        }
        agent.on_error(error)
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("counter", &self.counter)
            .field("handler", &self.handler.as_ref().map(|_| ".."))
            .finish()
    }
}
