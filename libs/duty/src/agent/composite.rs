// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::agent::Agent;
use crate::error::{AgentError, aggregate};
use core::fmt;

/// Fixed, ordered group of agents driven as one: the composite's `do_work`
/// ticks every member in construction order and reports the summed work
/// count, so the whole group shares a single thread and idle strategy.
///
/// Lifecycle edges attempt every member even when an earlier one fails; the
/// collected failures are reported as one [`AgentError::Aggregate`].
pub struct CompositeAgent {
    name: String,
    agents: Vec<Box<dyn Agent>>,
}

// === impl CompositeAgent ===

impl CompositeAgent {
    /// # Panics
    ///
    /// Panics if `agents` is empty.
    pub fn new(agents: Vec<Box<dyn Agent>>) -> Self {
        assert!(
            !agents.is_empty(),
            "a composite agent requires at least one sub-agent"
        );
        let name = format!(
            "[{}]",
            agents
                .iter()
                .map(|agent| agent.name())
                .collect::<Vec<_>>()
                .join(",")
        );
        Self { name, agents }
    }
}

impl Agent for CompositeAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) -> Result<(), AgentError> {
        let mut failures = Vec::new();
        for agent in &mut self.agents {
            if let Err(error) = agent.on_start() {
                failures.push(error);
            }
        }
        aggregate(failures)
    }

    fn do_work(&mut self) -> Result<usize, AgentError> {
        let mut work_count = 0;
        for agent in &mut self.agents {
            work_count += agent.do_work()?;
        }
        Ok(work_count)
    }

    fn on_close(&mut self) -> Result<(), AgentError> {
        let mut failures = Vec::new();
        for agent in &mut self.agents {
            if let Err(error) = agent.on_close() {
                failures.push(error);
            }
        }
        aggregate(failures)
    }
}

impl fmt::Debug for CompositeAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAgent")
            .field("name", &self.name)
            .field("agents", &self.agents.len())
            .finish()
    }
}
