// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::agent::Agent;
use crate::error::AgentError;
use crate::idle::IdleStrategy;
use crate::loom::sync::Arc;
use crate::loom::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crate::sink::{ErrorHandler, ErrorSink};
use core::fmt;
use std::thread;
use std::time::{Duration, Instant};

/// Drives one agent's full lifecycle on a dedicated worker thread, applying
/// an idle strategy between work ticks.
///
/// The runner exclusively owns the agent and the strategy for the thread's
/// lifetime; the outside world observes liveness through atomic flags and may
/// request shutdown through [`close`]. Start is single-shot: a runner runs at
/// most one lifecycle and is then spent.
///
/// Dropping a runner closes it.
///
/// [`close`]: AgentRunner::close
pub struct AgentRunner<S, A> {
    shared: Arc<Shared>,
    worker: Option<Worker<S, A>>,
    thread: Option<thread::JoinHandle<()>>,
    thread_name: Option<String>,
}

/// Everything that moves onto the worker thread on start.
struct Worker<S, A> {
    idle_strategy: S,
    agent: A,
    sink: ErrorSink,
}

struct Shared {
    is_started: AtomicBool,
    is_running: AtomicBool,
    is_closed: AtomicBool,
    interrupt: AtomicBool,
}

// === impl AgentRunner ===

impl<S, A> AgentRunner<S, A>
where
    S: IdleStrategy + 'static,
    A: Agent + 'static,
{
    /// How long [`close`] waits for the worker before it escalates to an
    /// interrupt.
    ///
    /// [`close`]: AgentRunner::close
    pub const RETRY_CLOSE_TIMEOUT: Duration = Duration::from_millis(100);

    pub fn new(idle_strategy: S, agent: A) -> Self {
        Self {
            shared: Arc::new(Shared {
                is_started: AtomicBool::new(false),
                is_running: AtomicBool::new(false),
                is_closed: AtomicBool::new(false),
                interrupt: AtomicBool::new(false),
            }),
            worker: Some(Worker {
                idle_strategy,
                agent,
                sink: ErrorSink::default(),
            }),
            thread: None,
            thread_name: None,
        }
    }

    /// Installs a callback observing every failure routed through the error
    /// sink, ahead of the agent's own `on_error`.
    #[must_use]
    pub fn with_error_handler(
        mut self,
        handler: impl FnMut(&AgentError) -> Result<(), AgentError> + Send + 'static,
    ) -> Self {
        if let Some(worker) = &mut self.worker {
            worker.sink.handler = Some(Box::new(handler) as ErrorHandler);
        }
        self
    }

    /// Installs a shared counter incremented once per failure routed through
    /// the error sink.
    #[must_use]
    pub fn with_error_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        if let Some(worker) = &mut self.worker {
            worker.sink.counter = Some(counter);
        }
        self
    }

    /// Overrides the worker thread's name; by default it is named after the
    /// agent.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Spawns the worker thread and returns immediately; the spawned thread
    /// then runs `on_start`, the duty-cycle loop and `on_close`.
    ///
    /// Returning only means the thread was spawned. Callers that need to
    /// observe the agent running must poll [`is_running`].
    ///
    /// # Panics
    ///
    /// Panics if the runner is already closed, was already started, or the OS
    /// refuses to spawn a thread.
    ///
    /// [`is_running`]: AgentRunner::is_running
    pub fn start_on_thread(&mut self) {
        assert!(
            !self.shared.is_closed.load(Ordering::Acquire),
            "agent runner is closed"
        );
        assert!(
            self.shared
                .is_started
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
            "agent runner was already started"
        );

        let worker = self
            .worker
            .take()
            .expect("started runner still holds its worker");
        let name = self
            .thread_name
            .take()
            .unwrap_or_else(|| worker.agent.name().to_string());
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(&shared, worker))
            .expect("failed to spawn agent worker thread");
        self.thread = Some(handle);
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    /// Blocks until the worker finishes of its own accord, without requesting
    /// shutdown. This is for agents that terminate themselves.
    ///
    /// # Panics
    ///
    /// Resumes the agent's panic if the worker thread panicked.
    pub fn wait(&mut self) {
        if let Some(handle) = self.thread.take() {
            join(handle);
        }
    }

    /// Requests shutdown and blocks until the lifecycle completed, using the
    /// default [`RETRY_CLOSE_TIMEOUT`] escalation window.
    ///
    /// # Panics
    ///
    /// Resumes the agent's panic if the worker thread panicked.
    ///
    /// [`RETRY_CLOSE_TIMEOUT`]: AgentRunner::RETRY_CLOSE_TIMEOUT
    pub fn close(&mut self) {
        self.close_timeout(Self::RETRY_CLOSE_TIMEOUT);
    }

    /// Requests shutdown and blocks until the lifecycle completed.
    ///
    /// The worker is asked to stop cooperatively first. Each time it fails to
    /// finish within `retry_timeout` an interrupt is delivered (waking a
    /// parked worker), until the worker's close completes. Once the lifecycle
    /// is done the worker thread is joined. Closing a runner that was never
    /// started just latches the closed flag.
    ///
    /// # Panics
    ///
    /// Resumes the agent's panic if the worker thread panicked.
    pub fn close_timeout(&mut self, retry_timeout: Duration) {
        self.shared.is_running.store(false, Ordering::Release);

        if let Some(handle) = self.thread.take() {
            let mut deadline = Instant::now() + retry_timeout;
            while !self.shared.is_closed.load(Ordering::Acquire) {
                if Instant::now() >= deadline {
                    tracing::debug!("close timed out, interrupting the worker");
                    self.shared.interrupt.store(true, Ordering::Release);
                    handle.thread().unpark();
                    deadline = Instant::now() + retry_timeout;
                }
                thread::sleep(Duration::from_millis(1));
            }
            join(handle);
        } else {
            // never started (or already waited out): nothing to close on the
            // worker side
            self.worker = None;
        }

        self.shared.is_closed.store(true, Ordering::Release);
    }
}

impl<S, A> Drop for AgentRunner<S, A> {
    fn drop(&mut self) {
        self.shared.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            while !self.shared.is_closed.load(Ordering::Acquire) {
                self.shared.interrupt.store(true, Ordering::Release);
                handle.thread().unpark();
                thread::sleep(Duration::from_millis(1));
            }
            // a panic payload must not escape a destructor; losing the
            // payload here is the lesser evil
            let _ = handle.join();
        }
    }
}

impl<S, A> fmt::Debug for AgentRunner<S, A>
where
    S: IdleStrategy + 'static,
    A: Agent + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRunner")
            .field("is_started", &self.shared.is_started.load(Ordering::Acquire))
            .field("is_running", &self.is_running())
            .field("is_closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn join(handle: thread::JoinHandle<()>) {
    if let Err(payload) = handle.join() {
        std::panic::resume_unwind(payload);
    }
}

/// The worker thread body: full lifecycle of one agent.
fn run<S: IdleStrategy, A: Agent>(shared: &Shared, worker: Worker<S, A>) {
    let Worker {
        mut idle_strategy,
        mut agent,
        mut sink,
    } = worker;
    let _span = tracing::debug_span!("agent_runner", agent = agent.name()).entered();

    shared.is_running.store(true, Ordering::Release);

    let started = match agent.on_start() {
        Ok(()) => {
            tracing::debug!("agent started");
            true
        }
        Err(error) => {
            shared.is_running.store(false, Ordering::Release);
            match error {
                AgentError::Terminate => {
                    tracing::debug!("agent requested termination during start");
                }
                AgentError::Interrupted => tracing::error!("agent interrupted during start"),
                error => {
                    if let Err(unhandled) = sink.handle(&mut agent, error) {
                        tracing::error!(error = %unhandled, "agent failed to start");
                    }
                }
            }
            false
        }
    };

    if started {
        work_loop(shared, &mut idle_strategy, &mut agent, &mut sink);
    }

    // `on_close` runs whenever `on_start` was entered, even after failures
    if let Err(error) = agent.on_close() {
        match error {
            AgentError::Terminate => {}
            error => {
                if let Err(unhandled) = sink.handle(&mut agent, error) {
                    tracing::error!(error = %unhandled, "agent failed to close");
                }
            }
        }
    }
    tracing::debug!("agent closed");

    shared.is_running.store(false, Ordering::Release);
    shared.is_closed.store(true, Ordering::Release);
}

/// The duty-cycle loop: tick, idle, repeat, until someone turns `is_running`
/// off or a failure ends the tick chain.
fn work_loop<S: IdleStrategy, A: Agent>(
    shared: &Shared,
    idle_strategy: &mut S,
    agent: &mut A,
    sink: &mut ErrorSink,
) {
    while shared.is_running.load(Ordering::Acquire) && !shared.is_closed.load(Ordering::Acquire) {
        if shared.interrupt.load(Ordering::Acquire) {
            tracing::error!("agent interrupted");
            shared.is_running.store(false, Ordering::Release);
            break;
        }

        match agent.do_work() {
            Ok(work_count) => idle_strategy.idle_work(work_count),
            Err(AgentError::Terminate) => {
                tracing::debug!("agent requested termination");
                shared.is_running.store(false, Ordering::Release);
            }
            Err(AgentError::Interrupted) => {
                tracing::error!("agent interrupted");
                shared.is_running.store(false, Ordering::Release);
            }
            Err(error) => match sink.handle(agent, error) {
                Ok(()) => {}
                Err(AgentError::Terminate) => {
                    tracing::debug!("error sink requested termination");
                    shared.is_running.store(false, Ordering::Release);
                }
                Err(unhandled) => {
                    tracing::error!(error = %unhandled, "unrecovered agent failure");
                    shared.is_running.store(false, Ordering::Release);
                    break;
                }
            },
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::agent::test_util::TickAgent;
    use crate::error::AgentError;
    use crate::idle::{NoOpIdleStrategy, SleepingMillisIdleStrategy};
    use crate::loom::sync::Mutex;
    use crate::loom::sync::atomic::AtomicUsize;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::util::SubscriberInitExt;

    /// Counts ticks and requests termination on the `limit`-th one.
    struct SelfTerminating {
        inner: TickAgent,
        limit: usize,
    }

    impl SelfTerminating {
        fn new(limit: usize) -> Self {
            Self {
                inner: TickAgent::new("self-terminating"),
                limit,
            }
        }
    }

    impl Agent for SelfTerminating {
        fn name(&self) -> &str {
            self.inner.name()
        }
        fn on_start(&mut self) -> Result<(), AgentError> {
            self.inner.on_start()
        }
        fn do_work(&mut self) -> Result<usize, AgentError> {
            let ticks = self.inner.ticks.fetch_add(1, Ordering::AcqRel) + 1;
            if ticks == self.limit {
                Err(AgentError::Terminate)
            } else {
                Ok(1)
            }
        }
        fn on_close(&mut self) -> Result<(), AgentError> {
            self.inner.on_close()
        }
    }

    #[test]
    fn self_terminating_agent_runs_to_completion() {
        let _trace = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_thread_names(true)
            .set_default();

        let agent = SelfTerminating::new(10);
        let ticks = agent.inner.ticks.clone();
        let starts = agent.inner.starts.clone();
        let closes = agent.inner.closes.clone();

        let mut runner = AgentRunner::new(NoOpIdleStrategy, agent);
        runner.start_on_thread();
        runner.wait();

        assert_eq!(ticks.load(Ordering::Acquire), 10);
        assert_eq!(starts.load(Ordering::Acquire), 1);
        assert_eq!(closes.load(Ordering::Acquire), 1);
        assert!(runner.is_closed());
        assert!(!runner.is_running());
        assert!(!runner.is_open());
    }

    #[test]
    fn close_stops_a_running_agent() {
        let agent = TickAgent::new("ticker");
        let closes = agent.closes.clone();

        let mut runner = AgentRunner::new(NoOpIdleStrategy, agent);
        runner.start_on_thread();
        while !runner.is_running() {
            thread::yield_now();
        }

        runner.close();
        assert!(runner.is_closed());
        assert_eq!(closes.load(Ordering::Acquire), 1);
    }

    #[test]
    fn close_interrupts_a_deeply_parked_worker() {
        // one-minute parks; only the interrupt's unpark can end this promptly
        let agent = TickAgent::new("sleeper");
        let mut runner = AgentRunner::new(SleepingMillisIdleStrategy::new(60_000), agent);
        runner.start_on_thread();
        while !runner.is_running() {
            thread::yield_now();
        }

        let start = Instant::now();
        runner.close_timeout(Duration::from_millis(10));
        assert!(runner.is_closed());
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[test]
    #[should_panic(expected = "already started")]
    fn second_start_is_rejected() {
        let mut runner = AgentRunner::new(NoOpIdleStrategy, SelfTerminating::new(1));
        runner.start_on_thread();
        runner.start_on_thread();
    }

    #[test]
    #[should_panic(expected = "agent runner is closed")]
    fn start_after_close_is_rejected() {
        let mut runner = AgentRunner::new(NoOpIdleStrategy, SelfTerminating::new(1));
        runner.close();
        runner.start_on_thread();
    }

    #[test]
    fn handler_termination_closes_after_one_failure() {
        struct AlwaysFailing {
            events: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Agent for AlwaysFailing {
            fn name(&self) -> &str {
                "always-failing"
            }
            fn do_work(&mut self) -> Result<usize, AgentError> {
                Err(AgentError::message("tick failed"))
            }
            fn on_error(&mut self, error: AgentError) -> Result<(), AgentError> {
                self.events.lock().unwrap().push("on_error");
                Err(error)
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicU64::new(0));

        let agent = AlwaysFailing {
            events: Arc::clone(&events),
        };
        let handler_events = Arc::clone(&events);
        let mut runner = AgentRunner::new(NoOpIdleStrategy, agent)
            .with_error_counter(Arc::clone(&counter))
            .with_error_handler(move |_error| {
                handler_events.lock().unwrap().push("handler");
                Err(AgentError::Terminate)
            });

        runner.start_on_thread();
        runner.wait();

        assert!(runner.is_closed());
        assert_eq!(counter.load(Ordering::Acquire), 1);
        // the handler short-circuited: on_error was never consulted
        assert_eq!(*events.lock().unwrap(), vec!["handler"]);
    }

    #[test]
    fn on_close_runs_even_when_on_start_fails() {
        struct FailsToStart {
            closes: Arc<AtomicUsize>,
        }
        impl Agent for FailsToStart {
            fn name(&self) -> &str {
                "fails-to-start"
            }
            fn on_start(&mut self) -> Result<(), AgentError> {
                Err(AgentError::message("nope"))
            }
            fn do_work(&mut self) -> Result<usize, AgentError> {
                Ok(0)
            }
            fn on_close(&mut self) -> Result<(), AgentError> {
                self.closes.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            fn on_error(&mut self, _error: AgentError) -> Result<(), AgentError> {
                Ok(())
            }
        }

        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(AtomicU64::new(0));
        let mut runner = AgentRunner::new(
            NoOpIdleStrategy,
            FailsToStart {
                closes: Arc::clone(&closes),
            },
        )
        .with_error_counter(Arc::clone(&counter));

        runner.start_on_thread();
        runner.wait();

        assert!(runner.is_closed());
        assert_eq!(closes.load(Ordering::Acquire), 1);
        assert_eq!(counter.load(Ordering::Acquire), 1);
    }

    #[test]
    fn recovered_failures_keep_the_loop_running() {
        struct FlakyThenDone {
            failures_left: usize,
            ticks: Arc<AtomicUsize>,
        }
        impl Agent for FlakyThenDone {
            fn name(&self) -> &str {
                "flaky"
            }
            fn do_work(&mut self) -> Result<usize, AgentError> {
                let ticks = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
                if self.failures_left > 0 {
                    self.failures_left -= 1;
                    Err(AgentError::message("transient"))
                } else if ticks >= 5 {
                    Err(AgentError::Terminate)
                } else {
                    Ok(1)
                }
            }
            fn on_error(&mut self, _error: AgentError) -> Result<(), AgentError> {
                // recover
                Ok(())
            }
        }

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(AtomicU64::new(0));
        let mut runner = AgentRunner::new(
            NoOpIdleStrategy,
            FlakyThenDone {
                failures_left: 3,
                ticks: Arc::clone(&ticks),
            },
        )
        .with_error_counter(Arc::clone(&counter));

        runner.start_on_thread();
        runner.wait();

        assert!(runner.is_closed());
        assert_eq!(counter.load(Ordering::Acquire), 3);
        assert!(ticks.load(Ordering::Acquire) >= 5);
    }

    #[test]
    fn worker_thread_is_named_after_the_agent() {
        struct NameProbe {
            observed: Arc<Mutex<Option<String>>>,
        }
        impl Agent for NameProbe {
            fn name(&self) -> &str {
                "name-probe"
            }
            fn do_work(&mut self) -> Result<usize, AgentError> {
                *self.observed.lock().unwrap() = thread::current().name().map(String::from);
                Err(AgentError::Terminate)
            }
        }

        let observed = Arc::new(Mutex::new(None));
        let mut runner = AgentRunner::new(
            NoOpIdleStrategy,
            NameProbe {
                observed: Arc::clone(&observed),
            },
        );
        runner.start_on_thread();
        runner.wait();

        assert_eq!(observed.lock().unwrap().as_deref(), Some("name-probe"));
    }
}
