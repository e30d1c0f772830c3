//! Module abstraction for the pipeline.
//!
//! Two-layer design:
//! - **`Module` trait**: for user-defined modules plugged into a graph.
//! - **`BuiltinModule` enum**: for all built-in modules, dispatched with a
//!   `match` instead of a vtable.
//!
//! `AnyModule` wraps either variant so the graph and engine handle both
//! uniformly.
//!
//! # Lifecycle hooks
//!
//! | hook       | thread        | when                                          |
//! |------------|---------------|-----------------------------------------------|
//! | `on_start` | caller        | `Engine::start`, sinks first; failure rolls back |
//! | `process`  | module worker | repeatedly until `Finished`, `Closed` or error |
//! | `on_stop`  | module worker | after the work loop exits                     |
//! | `on_clean` | caller        | `Engine::clean`; release files, sockets       |

use crate::pipeline::connection::Connection;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::Frame;
use crate::pipeline::module_type::ModuleType;
use crate::pipeline::modules::{
    Camera, Classifier, Detector, Receiver, Sender, Strider, Throttler, Tracker, Transformer,
    Writer,
};
use crate::pipeline::port::{PortDescriptor, PortDirection};
use crate::pipeline::subscription::TapList;
use crate::pipeline::worker::StopHandle;
use crate::types::EngineEvent;
use crossbeam_channel::select;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

/// Outcome of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More work may follow.
    Continue,
    /// Nothing was processed this time (poll timed out); not counted in stats.
    Idle,
    /// The module has nothing more to produce; its outputs will be closed.
    Finished,
}

/// Runtime binding of one input port.
pub struct InputBinding {
    name: String,
    connection: Option<Arc<Connection>>,
}

/// Runtime binding of one output port: its connections plus its taps.
pub struct OutputBinding {
    name: String,
    connections: Vec<Arc<Connection>>,
    taps: TapList,
}

impl OutputBinding {
    fn push(&self, frame: Frame) -> PipelineResult<()> {
        {
            let taps = self.taps.read().unwrap_or_else(PoisonError::into_inner);
            for tap in taps.iter() {
                tap.offer(frame.clone());
            }
        }

        let Some((last, rest)) = self.connections.split_last() else {
            return Ok(());
        };
        for connection in rest {
            connection.push(frame.clone())?;
        }
        last.push(frame)?;
        Ok(())
    }
}

/// Port bindings of one module, built by the engine at start.
#[derive(Default)]
pub struct ModuleIo {
    inputs: Vec<InputBinding>,
    outputs: Vec<OutputBinding>,
}

impl ModuleIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unbound slots for every declared port. Output ports get empty tap lists.
    pub fn for_ports(ports: &[PortDescriptor]) -> Self {
        let mut io = Self::new();
        for port in ports {
            match port.direction {
                PortDirection::Input => io.inputs.push(InputBinding {
                    name: port.name.to_string(),
                    connection: None,
                }),
                PortDirection::Output => io.outputs.push(OutputBinding {
                    name: port.name.to_string(),
                    connections: Vec::new(),
                    taps: TapList::default(),
                }),
            }
        }
        io
    }

    pub fn bind_input(&mut self, port: &str, connection: Arc<Connection>) {
        match self.inputs.iter_mut().find(|b| b.name == port) {
            Some(binding) => binding.connection = Some(connection),
            None => self.inputs.push(InputBinding {
                name: port.to_string(),
                connection: Some(connection),
            }),
        }
    }

    pub fn bind_output(&mut self, port: &str, connection: Arc<Connection>) {
        self.output_mut(port).connections.push(connection);
    }

    pub fn set_taps(&mut self, port: &str, taps: TapList) {
        self.output_mut(port).taps = taps;
    }

    fn output_mut(&mut self, port: &str) -> &mut OutputBinding {
        let idx = match self.outputs.iter().position(|b| b.name == port) {
            Some(idx) => idx,
            None => {
                self.outputs.push(OutputBinding {
                    name: port.to_string(),
                    connections: Vec::new(),
                    taps: TapList::default(),
                });
                self.outputs.len() - 1
            }
        };
        &mut self.outputs[idx]
    }

    /// Close every outgoing connection (end of stream).
    pub fn close_outputs(&self) {
        for output in &self.outputs {
            for connection in &output.connections {
                connection.close();
            }
        }
    }

    /// Detach every incoming connection (module faulted).
    pub fn detach_inputs(&self) {
        for input in &self.inputs {
            if let Some(connection) = &input.connection {
                connection.detach();
            }
        }
    }

    pub fn context<'a>(
        &'a self,
        module: &'a str,
        stop: &'a StopHandle,
        events: &'a crossbeam_channel::Sender<EngineEvent>,
    ) -> ModuleContext<'a> {
        ModuleContext {
            module,
            io: self,
            stop,
            events,
        }
    }
}

/// Handle given to `process`: port I/O, stop observation and event reporting.
pub struct ModuleContext<'a> {
    module: &'a str,
    io: &'a ModuleIo,
    stop: &'a StopHandle,
    events: &'a crossbeam_channel::Sender<EngineEvent>,
}

impl<'a> ModuleContext<'a> {
    pub fn module_name(&self) -> &str {
        self.module
    }

    fn input(&self, port: &str) -> PipelineResult<&InputBinding> {
        self.io
            .inputs
            .iter()
            .find(|b| b.name == port)
            .ok_or_else(|| {
                PipelineError::module(self.module, format!("no input port {:?}", port))
            })
    }

    fn output(&self, port: &str) -> PipelineResult<&OutputBinding> {
        self.io
            .outputs
            .iter()
            .find(|b| b.name == port)
            .ok_or_else(|| {
                PipelineError::module(self.module, format!("no output port {:?}", port))
            })
    }

    pub fn is_input_connected(&self, port: &str) -> bool {
        self.input(port)
            .map(|b| b.connection.is_some())
            .unwrap_or(false)
    }

    /// Names of input ports that have an upstream connection.
    pub fn connected_inputs(&self) -> impl Iterator<Item = &str> {
        self.io
            .inputs
            .iter()
            .filter(|b| b.connection.is_some())
            .map(|b| b.name.as_str())
    }

    /// Next frame on `port`. An unconnected port reports end of stream.
    pub fn pop(&self, port: &str) -> PipelineResult<Frame> {
        match &self.input(port)?.connection {
            Some(connection) => Ok(connection.pop()?),
            None => Err(PipelineError::Closed),
        }
    }

    /// Next frame on `port`, or `None` after `timeout`.
    pub fn pop_timeout(&self, port: &str, timeout: Duration) -> PipelineResult<Option<Frame>> {
        match &self.input(port)?.connection {
            Some(connection) => Ok(connection.pop_timeout(timeout)?),
            None => Err(PipelineError::Closed),
        }
    }

    /// Emit a frame on `port`: offered to every tap, then pushed to every
    /// connection (blocking while any of them is full).
    pub fn push(&self, port: &str, frame: Frame) -> PipelineResult<()> {
        self.output(port)?.push(frame)
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_stop_requested()
    }

    /// Sleep for `duration` unless a stop is requested first.
    /// Returns `false` when interrupted by a stop.
    pub fn sleep(&self, duration: Duration) -> bool {
        select! {
            recv(self.stop.receiver()) -> _ => false,
            default(duration) => true,
        }
    }

    /// Publish a recoverable transport problem without faulting the module.
    pub fn report_transport_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}: transport error: {}", self.module, message);
        let _ = self.events.try_send(EngineEvent::TransportError {
            module: self.module.to_string(),
            message,
        });
    }
}

/// Trait for pluggable/user-defined modules.
pub trait Module: Send {
    /// Unique name of this module within its graph.
    fn name(&self) -> &str;

    /// Port descriptors for this module.
    fn ports(&self) -> &[PortDescriptor];

    fn module_type(&self) -> ModuleType {
        ModuleType::Plugin
    }

    /// Acquire resources. Called on the caller's thread, sinks first.
    fn on_start(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    /// Perform one unit of work.
    fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step>;

    /// Called on the worker thread after the work loop exits.
    fn on_stop(&mut self) {}

    /// Release resources. Called once by `Engine::clean`.
    fn on_clean(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}

/// Enum dispatch for built-in modules.
pub enum BuiltinModule {
    Camera(Camera),
    Detector(Detector),
    Transformer(Transformer),
    Classifier(Classifier),
    Tracker(Tracker),
    Throttler(Throttler),
    Strider(Strider),
    Sender(Sender),
    Receiver(Receiver),
    Writer(Writer),
}

macro_rules! dispatch {
    ($value:expr, $m:ident => $body:expr) => {
        match $value {
            BuiltinModule::Camera($m) => $body,
            BuiltinModule::Detector($m) => $body,
            BuiltinModule::Transformer($m) => $body,
            BuiltinModule::Classifier($m) => $body,
            BuiltinModule::Tracker($m) => $body,
            BuiltinModule::Throttler($m) => $body,
            BuiltinModule::Strider($m) => $body,
            BuiltinModule::Sender($m) => $body,
            BuiltinModule::Receiver($m) => $body,
            BuiltinModule::Writer($m) => $body,
        }
    };
}

impl BuiltinModule {
    pub fn name(&self) -> &str {
        dispatch!(self, m => m.name())
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        dispatch!(self, m => m.ports())
    }

    pub fn module_type(&self) -> ModuleType {
        match self {
            BuiltinModule::Camera(_) => ModuleType::Camera,
            BuiltinModule::Detector(_) => ModuleType::Detector,
            BuiltinModule::Transformer(_) => ModuleType::Transformer,
            BuiltinModule::Classifier(_) => ModuleType::Classifier,
            BuiltinModule::Tracker(_) => ModuleType::Tracker,
            BuiltinModule::Throttler(_) => ModuleType::Throttler,
            BuiltinModule::Strider(_) => ModuleType::Strider,
            BuiltinModule::Sender(_) => ModuleType::Sender,
            BuiltinModule::Receiver(_) => ModuleType::Receiver,
            BuiltinModule::Writer(_) => ModuleType::Writer,
        }
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        dispatch!(self, m => m.on_start())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        dispatch!(self, m => m.process(ctx))
    }

    pub fn on_stop(&mut self) {
        dispatch!(self, m => m.on_stop())
    }

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        dispatch!(self, m => m.on_clean())
    }
}

/// Wrapper that holds either a built-in module (enum dispatch) or a plugin (trait object).
pub enum AnyModule {
    Builtin(BuiltinModule),
    Plugin(Box<dyn Module>),
}

impl AnyModule {
    pub fn plugin(module: impl Module + 'static) -> Self {
        AnyModule::Plugin(Box::new(module))
    }

    pub fn name(&self) -> &str {
        match self {
            AnyModule::Builtin(m) => m.name(),
            AnyModule::Plugin(m) => m.name(),
        }
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        match self {
            AnyModule::Builtin(m) => m.ports(),
            AnyModule::Plugin(m) => m.ports(),
        }
    }

    pub fn module_type(&self) -> ModuleType {
        match self {
            AnyModule::Builtin(m) => m.module_type(),
            AnyModule::Plugin(m) => m.module_type(),
        }
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        match self {
            AnyModule::Builtin(m) => m.on_start(),
            AnyModule::Plugin(m) => m.on_start(),
        }
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        match self {
            AnyModule::Builtin(m) => m.process(ctx),
            AnyModule::Plugin(m) => m.process(ctx),
        }
    }

    pub fn on_stop(&mut self) {
        match self {
            AnyModule::Builtin(m) => m.on_stop(),
            AnyModule::Plugin(m) => m.on_stop(),
        }
    }

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        match self {
            AnyModule::Builtin(m) => m.on_clean(),
            AnyModule::Plugin(m) => m.on_clean(),
        }
    }
}

macro_rules! impl_from_builtin {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for AnyModule {
                fn from(m: $variant) -> Self {
                    AnyModule::Builtin(BuiltinModule::$variant(m))
                }
            }
        )*
    };
}

impl_from_builtin!(
    Camera,
    Detector,
    Transformer,
    Classifier,
    Tracker,
    Throttler,
    Strider,
    Sender,
    Receiver,
    Writer
);

impl std::fmt::Debug for AnyModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyModule")
            .field("name", &self.name())
            .field("type", &self.module_type())
            .finish()
    }
}
