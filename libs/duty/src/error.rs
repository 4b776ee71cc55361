// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::error::Error;
use core::fmt;

/// Failure value raised by agent lifecycle methods.
///
/// Two variants are control flow rather than errors proper: [`Terminate`] is
/// the agent's "quit" word and is never reported through the error sink, and
/// [`Interrupted`] is the external cancellation request a runner delivers when
/// a close escalates.
///
/// [`Terminate`]: AgentError::Terminate
/// [`Interrupted`]: AgentError::Interrupted
#[derive(Debug)]
pub enum AgentError {
    /// Orderly-shutdown sentinel. An agent may return this from any lifecycle
    /// method to end its run cleanly.
    Terminate,
    /// The runner delivered a cancellation request to the worker thread.
    Interrupted,
    /// Failures collected from several sub-agents of a composite, reported as
    /// one value after every sub-agent was attempted.
    Aggregate(Vec<AgentError>),
    /// Any other lifecycle failure.
    Failed(Box<dyn Error + Send + Sync>),
}

// === impl AgentError ===

impl AgentError {
    /// An ad-hoc failure carrying just a message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into().into())
    }

    /// Wraps an arbitrary error value.
    pub fn failed(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Failed(Box::new(error))
    }

    #[inline]
    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }

    #[inline]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

/// `Ok` when no sub-agent failed, otherwise one aggregate failure holding
/// every collected error.
pub(crate) fn aggregate(failures: Vec<AgentError>) -> Result<(), AgentError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(AgentError::Aggregate(failures))
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Terminate => f.write_str("agent requested termination"),
            AgentError::Interrupted => f.write_str("agent was interrupted"),
            AgentError::Aggregate(failures) => {
                write!(f, "{} sub-agent(s) failed: [", failures.len())?;
                for (i, failure) in failures.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    fmt::Display::fmt(failure, f)?;
                }
                f.write_str("]")
            }
            AgentError::Failed(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl Error for AgentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AgentError::Failed(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}
