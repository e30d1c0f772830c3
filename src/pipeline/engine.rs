//! Engine: owns a graph and drives its lifecycle.
//!
//! ```text
//! Idle ──start──► Starting ──► Running ──stop──► Stopping ──► Stopped ──clean──► Cleaned
//!   ▲                │
//!   └── start hook ──┘
//!       failed (rollback)
//! ```
//!
//! While running, every module has its own worker thread (see
//! [`worker`](crate::pipeline::worker)). The engine itself holds no lock on
//! the hot path: connections and taps are the only state shared between
//! threads.

use crate::config::{AppConfig, EngineConfig};
use crate::pipeline::compiled_plan::CompiledPlan;
use crate::pipeline::connection::Connection;
use crate::pipeline::description::GraphDescription;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::factory::ModuleFactory;
use crate::pipeline::graph::{resolve_port, ConnectionSpec, Graph};
use crate::pipeline::id::{ModuleId, SubscriptionId};
use crate::pipeline::module::{AnyModule, ModuleIo};
use crate::pipeline::module_type::ModuleType;
use crate::pipeline::port::{PortDescriptor, PortDirection};
use crate::pipeline::subscription::{Subscription, SubscriptionRegistry};
use crate::pipeline::worker::{self, ModuleStatus, StopHandle, WorkerSpec};
use crate::types::{ConnectionStats, EngineEvent, EngineState, EngineStats, ModuleState, ModuleStats};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Events published while the channel is full are dropped.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

enum SlotState {
    Ready(AnyModule),
    Running(JoinHandle<AnyModule>),
    /// Worker missed the stop grace period; the module is dropped whenever
    /// the thread exits.
    Abandoned(JoinHandle<AnyModule>),
    Taken,
}

struct ModuleSlot {
    name: String,
    module_type: ModuleType,
    ports: Vec<PortDescriptor>,
    status: Arc<ModuleStatus>,
    state: SlotState,
}

pub struct Engine {
    config: EngineConfig,
    state: EngineState,
    slots: Vec<ModuleSlot>,
    names: HashMap<String, ModuleId>,
    connection_specs: Vec<ConnectionSpec>,
    connections: Vec<Arc<Connection>>,
    plan: CompiledPlan,
    registry: SubscriptionRegistry,
    stop: StopHandle,
    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    dot: String,
}

impl Engine {
    /// Validate `graph` and take ownership of it.
    ///
    /// Fails with `Cycle` for a cycle outside feedback ports. Validation
    /// warnings are logged.
    pub fn new(graph: Graph, config: EngineConfig) -> PipelineResult<Self> {
        let plan = graph.validate()?;
        for warning in &plan.warnings {
            tracing::warn!("Graph: {}", warning);
        }
        let dot = graph.to_dot();

        let (modules, connection_specs) = graph.into_parts();
        let rate_window = config.stats_window();
        let mut names = HashMap::with_capacity(modules.len());
        let slots = modules
            .into_iter()
            .enumerate()
            .map(|(i, module)| {
                names.insert(module.name().to_string(), ModuleId(i as u32));
                ModuleSlot {
                    name: module.name().to_string(),
                    module_type: module.module_type(),
                    ports: module.ports().to_vec(),
                    status: Arc::new(ModuleStatus::new(rate_window)),
                    state: SlotState::Ready(module),
                }
            })
            .collect::<Vec<_>>();

        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        tracing::info!(
            "Engine created with {} modules and {} connections",
            slots.len(),
            connection_specs.len()
        );

        Ok(Self {
            registry: SubscriptionRegistry::new(rate_window),
            config,
            state: EngineState::Idle,
            slots,
            names,
            connection_specs,
            connections: Vec::new(),
            plan,
            stop: StopHandle::new(),
            events_tx,
            events_rx,
            dot,
        })
    }

    /// Build modules and graph from an application config.
    pub fn from_config(config: &AppConfig) -> PipelineResult<Self> {
        let modules = ModuleFactory::build_all(&config.modules)?;
        let description = GraphDescription::parse_map(&config.graph)?;

        let mut graph = Graph::with_default_capacity(config.engine.default_queue_capacity);
        for module in modules {
            graph.add_module(module)?;
        }
        graph.apply_description(&description)?;
        Self::new(graph, config.engine.clone())
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan(&self) -> &CompiledPlan {
        &self.plan
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.slot(name).map(|s| s.status.state())
    }

    fn slot(&self, name: &str) -> Option<&ModuleSlot> {
        self.names.get(name).map(|id| &self.slots[id.index()])
    }

    fn invalid_state(&self, operation: &'static str) -> PipelineError {
        PipelineError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Start every module, sinks first.
    ///
    /// Only valid from `Idle`. If any start hook fails, the modules already
    /// started are cleaned in reverse order, the engine returns to `Idle` and
    /// the error is returned.
    pub fn start(&mut self) -> PipelineResult<()> {
        if self.state != EngineState::Idle {
            return Err(self.invalid_state("start"));
        }
        tracing::info!("Starting engine");
        self.state = EngineState::Starting;

        if let Err(e) = self.run_start_hooks() {
            self.state = EngineState::Idle;
            return Err(e);
        }

        let window = self.config.stats_window();
        let connections = self
            .connection_specs
            .iter()
            .map(|spec| Connection::new(spec.id, spec.capacity, window).map(Arc::new))
            .collect::<PipelineResult<Vec<_>>>();
        let connections = match connections {
            Ok(connections) => connections,
            Err(e) => {
                self.rollback(self.plan.start_order.len());
                self.state = EngineState::Idle;
                return Err(e);
            }
        };
        self.stop.attach(connections.clone(), self.registry.clone());
        self.connections = connections;

        let start_order = self.plan.start_order.clone();
        for (spawned, id) in start_order.iter().enumerate() {
            let io = self.build_io(*id);
            let slot = &mut self.slots[id.index()];
            let SlotState::Ready(module) = std::mem::replace(&mut slot.state, SlotState::Taken)
            else {
                continue;
            };
            let spec = WorkerSpec {
                name: slot.name.clone(),
                module,
                io,
                status: slot.status.clone(),
                stop: self.stop.clone(),
                events: self.events_tx.clone(),
                halt_on_fault: self.config.halt_on_fault,
            };
            match worker::spawn(spec) {
                Ok(handle) => slot.state = SlotState::Running(handle),
                Err(e) => {
                    tracing::error!("Failed to spawn worker for '{}': {}", slot.name, e);
                    tracing::debug!("{} workers were already running", spawned);
                    self.state = EngineState::Running;
                    self.stop()?;
                    return Err(e.into());
                }
            }
        }

        self.state = EngineState::Running;
        tracing::info!("Engine running ({} modules)", self.slots.len());
        Ok(())
    }

    fn run_start_hooks(&mut self) -> PipelineResult<()> {
        let start_order = self.plan.start_order.clone();
        for (position, id) in start_order.iter().enumerate() {
            let slot = &mut self.slots[id.index()];
            let SlotState::Ready(module) = &mut slot.state else {
                continue;
            };
            tracing::debug!("Starting module '{}'", slot.name);
            if let Err(e) = module.on_start() {
                tracing::error!("Module '{}' failed to start: {}", slot.name, e);
                self.rollback(position);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Clean the first `started` modules of the start order, last first.
    fn rollback(&mut self, started: usize) {
        let ids: Vec<ModuleId> = self.plan.start_order[..started].to_vec();
        for id in ids.iter().rev() {
            let slot = &mut self.slots[id.index()];
            if let SlotState::Ready(module) = &mut slot.state {
                tracing::debug!("Rolling back module '{}'", slot.name);
                if let Err(e) = module.on_clean() {
                    tracing::warn!("Rollback of '{}' failed: {}", slot.name, e);
                }
            }
        }
    }

    fn build_io(&self, id: ModuleId) -> ModuleIo {
        let slot = &self.slots[id.index()];
        let mut io = ModuleIo::for_ports(&slot.ports);
        for port in slot.ports.iter().filter(|p| p.direction == PortDirection::Output) {
            io.set_taps(&port.name, self.registry.tap_list(&slot.name, &port.name));
        }
        for (spec, connection) in self.connection_specs.iter().zip(&self.connections) {
            if spec.from == id {
                io.bind_output(&spec.from_port, connection.clone());
            }
            if spec.to == id {
                io.bind_input(&spec.to_port, connection.clone());
            }
        }
        io
    }

    /// Stop every module and join the workers.
    ///
    /// Closes all connections and taps so blocked pushes and pops return.
    /// Workers that miss `stop_grace_period_ms` are abandoned. A no-op unless
    /// the engine is running.
    pub fn stop(&mut self) -> PipelineResult<()> {
        if self.state != EngineState::Running {
            tracing::debug!("Stop ignored in state {}", self.state);
            return Ok(());
        }
        tracing::info!("Stopping engine");
        self.state = EngineState::Stopping;
        self.stop.request_stop();

        let deadline = Instant::now() + self.config.stop_grace_period();
        for id in self.plan.topo_order.clone() {
            let slot = &mut self.slots[id.index()];
            let handle = match std::mem::replace(&mut slot.state, SlotState::Taken) {
                SlotState::Running(handle) => handle,
                other => {
                    slot.state = other;
                    continue;
                }
            };

            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL_INTERVAL);
            }
            if !handle.is_finished() {
                tracing::warn!(
                    "Module '{}' did not stop within {:?}, abandoning its worker",
                    slot.name,
                    self.config.stop_grace_period()
                );
                slot.status.set_state(ModuleState::Abandoned);
                slot.state = SlotState::Abandoned(handle);
                continue;
            }
            match handle.join() {
                Ok(module) => slot.state = SlotState::Ready(module),
                Err(_) => {
                    tracing::error!("Worker for '{}' panicked", slot.name);
                    slot.status.set_state(ModuleState::Faulted);
                }
            }
        }

        self.state = EngineState::Stopped;
        let _ = self.events_tx.try_send(EngineEvent::Stopped);
        tracing::info!("Engine stopped");
        Ok(())
    }

    /// Release module resources, taps and connections.
    ///
    /// Valid from `Idle` and `Stopped`; a second call is a no-op. Every
    /// module is cleaned even if one fails; the first failure is returned.
    pub fn clean(&mut self) -> PipelineResult<()> {
        match self.state {
            EngineState::Idle | EngineState::Stopped => {}
            EngineState::Cleaned => return Ok(()),
            _ => return Err(self.invalid_state("clean")),
        }
        tracing::info!("Cleaning engine");

        let mut first_error = None;
        for slot in &mut self.slots {
            let exited = matches!(&slot.state, SlotState::Abandoned(h) if h.is_finished());
            if exited {
                if let SlotState::Abandoned(handle) =
                    std::mem::replace(&mut slot.state, SlotState::Taken)
                {
                    if let Ok(module) = handle.join() {
                        slot.state = SlotState::Ready(module);
                    }
                }
            }

            match &mut slot.state {
                SlotState::Ready(module) => {
                    if let Err(e) = module.on_clean() {
                        tracing::error!("Failed to clean module '{}': {}", slot.name, e);
                        first_error.get_or_insert(e);
                    }
                    slot.status.set_state(ModuleState::Cleaned);
                }
                SlotState::Abandoned(_) => {
                    tracing::warn!("Module '{}' is still running and was not cleaned", slot.name);
                }
                _ => slot.status.set_state(ModuleState::Cleaned),
            }
        }

        self.registry.clear();
        self.connections.clear();
        self.state = EngineState::Cleaned;
        tracing::info!("Engine cleaned");
        first_error.map_or(Ok(()), Err)
    }

    /// Tap `module`'s output with the configured subscription capacity.
    ///
    /// `port` may be omitted when the module has exactly one output.
    pub fn subscribe(&self, module: &str, port: Option<&str>) -> PipelineResult<Subscription> {
        self.subscribe_with_capacity(module, port, self.config.subscription_capacity)
    }

    pub fn subscribe_with_capacity(
        &self,
        module: &str,
        port: Option<&str>,
        capacity: usize,
    ) -> PipelineResult<Subscription> {
        if self.state == EngineState::Cleaned {
            return Err(self.invalid_state("subscribe"));
        }
        let slot = self
            .slot(module)
            .ok_or_else(|| PipelineError::Structural(format!("unknown module {:?}", module)))?;
        let port = resolve_port(module, &slot.ports, port, PortDirection::Output)?;
        Ok(self.registry.subscribe(module, &port, capacity.max(1)))
    }

    /// Remove a tap. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Fault, finish and transport events published by the workers.
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events_rx
    }

    pub fn try_next_event(&self) -> Option<EngineEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Block until every worker has exited or a stop was requested.
    pub fn wait_until_stopped(&self) {
        if self.state == EngineState::Running {
            self.stop.wait();
        }
    }

    /// Like [`wait_until_stopped`](Self::wait_until_stopped) with a deadline.
    /// Returns `false` on timeout.
    pub fn wait_until_stopped_timeout(&self, timeout: Duration) -> bool {
        self.state != EngineState::Running || self.stop.wait_timeout(timeout)
    }

    /// Cancellation token usable from any thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> EngineStats {
        let modules = self
            .slots
            .iter()
            .map(|slot| ModuleStats {
                name: slot.name.clone(),
                module_type: slot.module_type,
                state: slot.status.state(),
                frames_processed: slot.status.processed(),
                process_fps: slot.status.process_fps(),
                avg_latency_ms: slot.status.avg_latency_ms(),
                max_latency_ms: slot.status.max_latency_ms(),
            })
            .collect();

        let connections = self
            .connection_specs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let live = self.connections.get(i);
                ConnectionStats {
                    from: format!("{}:{}", self.slots[spec.from.index()].name, spec.from_port),
                    to: format!("{}:{}", self.slots[spec.to.index()].name, spec.to_port),
                    capacity: spec.capacity,
                    queued: live.map_or(0, |c| c.len()),
                    push_fps: live.map_or(0.0, |c| c.push_fps()),
                    pushed: live.map_or(0, |c| c.pushed_total()),
                    popped: live.map_or(0, |c| c.popped_total()),
                }
            })
            .collect();

        EngineStats {
            state: self.state,
            modules,
            connections,
            subscriptions: self.registry.len(),
        }
    }

    /// GraphViz DOT rendering of the graph this engine was built from.
    pub fn to_dot(&self) -> &str {
        &self.dot
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state == EngineState::Running {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("modules", &self.slots.len())
            .field("connections", &self.connection_specs.len())
            .finish()
    }
}
