// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::agent::Agent;
use crate::error::{AgentError, aggregate};
use crate::loom::sync::atomic::{AtomicU8, Ordering};
use crate::loom::sync::{Arc, Mutex};
use core::fmt;
use static_assertions::assert_impl_all;

/// Lifecycle status of a [`DynamicCompositeAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Init = 0,
    Active = 1,
    Closed = 2,
}

impl Status {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Init,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

/// The two single-slot membership requests. Deliberately bounded to one
/// pending add and one pending remove: `try_*` returning `false` is the
/// backpressure signal, there is no queue behind it.
#[derive(Default)]
struct Pending {
    add: Option<Box<dyn Agent>>,
    remove: Option<String>,
}

struct Shared {
    status: AtomicU8,
    pending: Mutex<Pending>,
}

/// Composite agent whose membership can change while it runs.
///
/// The member list itself is touched only by the owning worker thread inside
/// `do_work`, so it needs no synchronization. Other threads request changes
/// through a [`DynamicCompositeController`]; a request accepted by `try_add`
/// or `try_remove` is applied by the next `do_work` on the worker.
pub struct DynamicCompositeAgent {
    name: String,
    agents: Vec<Box<dyn Agent>>,
    shared: Arc<Shared>,
}

/// Cloneable cross-thread handle for membership requests against a
/// [`DynamicCompositeAgent`].
#[derive(Clone)]
pub struct DynamicCompositeController {
    shared: Arc<Shared>,
}

assert_impl_all!(DynamicCompositeController: Send, Sync);

// === impl DynamicCompositeAgent ===

impl DynamicCompositeAgent {
    pub fn new(name: impl Into<String>, agents: Vec<Box<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            agents,
            shared: Arc::new(Shared {
                status: AtomicU8::new(Status::Init as u8),
                pending: Mutex::new(Pending::default()),
            }),
        }
    }

    /// Handle for requesting membership changes from other threads, valid for
    /// the composite's whole lifetime.
    pub fn controller(&self) -> DynamicCompositeController {
        DynamicCompositeController {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// See [`DynamicCompositeController::try_add`].
    ///
    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn try_add(&self, agent: Box<dyn Agent>) -> bool {
        self.shared.try_add(agent)
    }

    /// See [`DynamicCompositeController::try_remove`].
    ///
    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn try_remove(&self, name: &str) -> bool {
        self.shared.try_remove(name)
    }

    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn has_add_completed(&self) -> bool {
        self.shared.has_add_completed()
    }

    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn has_remove_completed(&self) -> bool {
        self.shared.has_remove_completed()
    }

    /// Applies one drained add request. A newcomer is started before it is
    /// appended; when its start fails it is closed again and both failures
    /// are reported together.
    fn apply_add(&mut self, mut agent: Box<dyn Agent>, failures: &mut Vec<AgentError>) {
        match agent.on_start() {
            Ok(()) => {
                tracing::debug!(agent = agent.name(), "sub-agent added");
                self.agents.push(agent);
            }
            Err(start_error) => {
                failures.push(start_error);
                if let Err(close_error) = agent.on_close() {
                    failures.push(close_error);
                }
            }
        }
    }

    /// Applies one drained remove request. The member leaves the list before
    /// its `on_close` runs, so it is gone even when the close fails. An
    /// unknown name is a no-op.
    fn apply_remove(&mut self, name: &str, failures: &mut Vec<AgentError>) {
        if let Some(index) = self.agents.iter().position(|agent| agent.name() == name) {
            let mut agent = self.agents.remove(index);
            tracing::debug!(agent = name, "sub-agent removed");
            if let Err(error) = agent.on_close() {
                failures.push(error);
            }
        }
    }
}

impl Agent for DynamicCompositeAgent {
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
        if failures.is_empty() {
            self.shared
                .status
                .store(Status::Active as u8, Ordering::Release);
        }
        aggregate(failures)
    }

    fn do_work(&mut self) -> Result<usize, AgentError> {
        // drain both slots under the mutex, apply them outside of it: the
        // lifecycle calls below run arbitrary user code
        let (add, remove) = {
            let mut pending = self.shared.pending.lock().expect("pending slots poisoned");
            (pending.add.take(), pending.remove.take())
        };

        let mut failures = Vec::new();
        if let Some(agent) = add {
            self.apply_add(agent, &mut failures);
        }
        if let Some(name) = remove {
            self.apply_remove(&name, &mut failures);
        }
        aggregate(failures)?;

        let mut work_count = 0;
        for agent in &mut self.agents {
            work_count += agent.do_work()?;
        }
        Ok(work_count)
    }

    fn on_close(&mut self) -> Result<(), AgentError> {
        self.shared
            .status
            .store(Status::Closed as u8, Ordering::Release);

        let mut failures = Vec::new();
        for mut agent in self.agents.drain(..) {
            if let Err(error) = agent.on_close() {
                failures.push(error);
            }
        }

        // a pending, never-started newcomer is simply dropped
        let mut pending = self.shared.pending.lock().expect("pending slots poisoned");
        pending.add = None;
        pending.remove = None;
        drop(pending);

        aggregate(failures)
    }
}

impl fmt::Debug for DynamicCompositeAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicCompositeAgent")
            .field("name", &self.name)
            .field("agents", &self.agents.len())
            .field("status", &self.status())
            .finish()
    }
}

// === impl DynamicCompositeController ===

impl DynamicCompositeController {
    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// Queues `agent` for addition. Returns `false` when another add is still
    /// pending; the accepted agent is started and appended by the next
    /// `do_work` on the worker thread.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn try_add(&self, agent: Box<dyn Agent>) -> bool {
        self.shared.try_add(agent)
    }

    /// Queues the member called `name` for removal. Returns `false` when
    /// another remove is still pending; the member is closed and erased by
    /// the next `do_work` on the worker thread.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn try_remove(&self, name: &str) -> bool {
        self.shared.try_remove(name)
    }

    /// `true` once the previously accepted add request has been applied.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn has_add_completed(&self) -> bool {
        self.shared.has_add_completed()
    }

    /// `true` once the previously accepted remove request has been applied.
    ///
    /// # Panics
    ///
    /// Panics unless the composite is [`Status::Active`].
    pub fn has_remove_completed(&self) -> bool {
        self.shared.has_remove_completed()
    }
}

impl fmt::Debug for DynamicCompositeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicCompositeController")
            .field("status", &self.status())
            .finish()
    }
}

// === impl Shared ===

impl Shared {
    fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn assert_active(&self) {
        assert_eq!(
            self.status(),
            Status::Active,
            "dynamic composite is not active"
        );
    }

    fn try_add(&self, agent: Box<dyn Agent>) -> bool {
        self.assert_active();
        let mut pending = self.pending.lock().expect("pending slots poisoned");
        if pending.add.is_some() {
            return false;
        }
        pending.add = Some(agent);
        true
    }

    fn try_remove(&self, name: &str) -> bool {
        self.assert_active();
        let mut pending = self.pending.lock().expect("pending slots poisoned");
        if pending.remove.is_some() {
            return false;
        }
        pending.remove = Some(name.to_string());
        true
    }

    fn has_add_completed(&self) -> bool {
        self.assert_active();
        self.pending
            .lock()
            .expect("pending slots poisoned")
            .add
            .is_none()
    }

    fn has_remove_completed(&self) -> bool {
        self.assert_active();
        self.pending
            .lock()
            .expect("pending slots poisoned")
            .remove
            .is_none()
    }
}
