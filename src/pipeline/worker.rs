//! Per-module worker threads and the shared stop token.
//!
//! Each module runs its work loop on its own named OS thread:
//!
//! 1. Check the stop token.
//! 2. Call `process` once and record its latency.
//! 3. On `Finished` or end of stream, close the module's outputs so the
//!    end of stream cascades downstream.
//! 4. On error (or panic), mark the module `Faulted`, detach its inputs and
//!    publish the fault. Other modules keep running unless halt-on-fault is set.
//!
//! The thread returns the module by value so the engine can call `on_clean`
//! on the caller's thread later.

use crate::pipeline::connection::{CloseSignal, Connection};
use crate::pipeline::error::PipelineError;
use crate::pipeline::module::{AnyModule, ModuleIo, Step};
use crate::pipeline::stats::{LatencyWindow, RateMeter};
use crate::pipeline::subscription::SubscriptionRegistry;
use crate::types::{EngineEvent, ModuleState};
use crossbeam_channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StopInner {
    signal: CloseSignal,
    live_workers: Mutex<usize>,
    changed: Condvar,
    connections: Mutex<Vec<Arc<Connection>>>,
    registry: Mutex<Option<SubscriptionRegistry>>,
}

/// Cloneable cancellation token for one engine.
///
/// `request_stop` is the cooperative stop: it raises the stop flag, closes
/// every connection and every subscription tap, and wakes anyone waiting in
/// [`StopHandle::wait`]. It may be called from any thread, including module
/// workers.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StopInner {
                signal: CloseSignal::new(),
                live_workers: Mutex::new(0),
                changed: Condvar::new(),
                connections: Mutex::new(Vec::new()),
                registry: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn attach(&self, connections: Vec<Arc<Connection>>, registry: SubscriptionRegistry) {
        *lock(&self.inner.connections) = connections;
        *lock(&self.inner.registry) = Some(registry);
    }

    pub fn request_stop(&self) {
        if !self.inner.signal.close() {
            return;
        }
        tracing::debug!("Stop requested");
        for connection in lock(&self.inner.connections).iter() {
            connection.close();
        }
        if let Some(registry) = lock(&self.inner.registry).as_ref() {
            registry.close_all();
        }
        let _guard = lock(&self.inner.live_workers);
        self.inner.changed.notify_all();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.signal.is_closed()
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        self.inner.signal.receiver()
    }

    fn worker_started(&self) {
        *lock(&self.inner.live_workers) += 1;
    }

    fn worker_exited(&self) {
        let mut live = lock(&self.inner.live_workers);
        *live = live.saturating_sub(1);
        self.inner.changed.notify_all();
    }

    pub fn live_workers(&self) -> usize {
        *lock(&self.inner.live_workers)
    }

    /// Block until every worker has exited or a stop is requested.
    pub fn wait(&self) {
        let mut live = lock(&self.inner.live_workers);
        while *live > 0 && !self.is_stop_requested() {
            live = self
                .inner
                .changed
                .wait(live)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = lock(&self.inner.live_workers);
        while *live > 0 && !self.is_stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            live = self
                .inner
                .changed
                .wait_timeout(live, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stop_requested", &self.is_stop_requested())
            .field("live_workers", &self.live_workers())
            .finish()
    }
}

/// Runtime state and counters of one module, shared with the engine.
pub struct ModuleStatus {
    state: AtomicU8,
    processed: AtomicU64,
    rate: RateMeter,
    latency: LatencyWindow,
}

impl ModuleStatus {
    pub fn new(rate_window: Duration) -> Self {
        Self {
            state: AtomicU8::new(ModuleState::Idle as u8),
            processed: AtomicU64::new(0),
            rate: RateMeter::new(rate_window),
            latency: LatencyWindow::new(),
        }
    }

    pub fn state(&self) -> ModuleState {
        ModuleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ModuleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn record(&self, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.rate.record();
        self.latency.record(elapsed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn process_fps(&self) -> f64 {
        self.rate.fps()
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.latency.average_ms()
    }

    pub fn max_latency_ms(&self) -> f64 {
        self.latency.max_ms()
    }
}

/// Everything a worker thread owns.
pub(crate) struct WorkerSpec {
    pub name: String,
    pub module: AnyModule,
    pub io: ModuleIo,
    pub status: Arc<ModuleStatus>,
    pub stop: StopHandle,
    pub events: Sender<EngineEvent>,
    pub halt_on_fault: bool,
}

enum Outcome {
    Finished,
    Stopped,
    Faulted(PipelineError),
}

/// Spawn the worker thread for one module.
pub(crate) fn spawn(spec: WorkerSpec) -> std::io::Result<JoinHandle<AnyModule>> {
    let stop = spec.stop.clone();
    stop.worker_started();
    let result = thread::Builder::new()
        .name(format!("vidpipe-{}", spec.name))
        .spawn(move || run(spec));
    if result.is_err() {
        stop.worker_exited();
    }
    result
}

fn run(spec: WorkerSpec) -> AnyModule {
    let WorkerSpec {
        name,
        mut module,
        io,
        status,
        stop,
        events,
        halt_on_fault,
    } = spec;

    status.set_state(ModuleState::Running);
    let _ = events.try_send(EngineEvent::ModuleStarted {
        module: name.clone(),
    });
    tracing::debug!("Worker for '{}' started", name);

    let outcome = {
        let ctx = io.context(&name, &stop, &events);
        loop {
            if stop.is_stop_requested() {
                break Outcome::Stopped;
            }
            let started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| module.process(&ctx)));
            match result {
                Ok(Ok(Step::Continue)) => status.record(started.elapsed()),
                Ok(Ok(Step::Idle)) => {}
                Ok(Ok(Step::Finished)) if stop.is_stop_requested() => break Outcome::Stopped,
                Ok(Ok(Step::Finished)) => break Outcome::Finished,
                Ok(Err(e)) if e.is_closed() => {
                    if stop.is_stop_requested() {
                        break Outcome::Stopped;
                    }
                    break Outcome::Finished;
                }
                Ok(Err(e)) => break Outcome::Faulted(e),
                Err(_) => {
                    break Outcome::Faulted(PipelineError::module(&name, "work loop panicked"))
                }
            }
        }
    };

    match outcome {
        Outcome::Finished => {
            tracing::info!("Module '{}' finished, closing its outputs", name);
            io.close_outputs();
            status.set_state(ModuleState::Finished);
            let _ = events.try_send(EngineEvent::ModuleFinished {
                module: name.clone(),
            });
        }
        Outcome::Stopped => {
            tracing::debug!("Module '{}' stopped", name);
            status.set_state(ModuleState::Stopped);
        }
        Outcome::Faulted(error) => {
            tracing::error!("Module '{}' faulted: {}", name, error);
            io.detach_inputs();
            status.set_state(ModuleState::Faulted);
            let _ = events.try_send(EngineEvent::ModuleFaulted {
                module: name.clone(),
                error: error.to_string(),
            });
            if halt_on_fault {
                tracing::warn!("Halting engine after fault in '{}'", name);
                let _ = events.try_send(EngineEvent::HaltRequested {
                    module: name.clone(),
                });
                stop.request_stop();
            }
        }
    }

    if catch_unwind(AssertUnwindSafe(|| module.on_stop())).is_err() {
        tracing::error!("Module '{}' panicked in on_stop", name);
    }
    stop.worker_exited();
    module
}
