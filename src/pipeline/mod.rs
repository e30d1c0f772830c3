//! Module-based video pipeline.
//!
//! Frames flow through named modules: sources (camera, receiver) →
//! transforms (detector, tracker, ...) → sinks (writer, sender). Every module
//! runs on its own worker thread; connections between ports are bounded
//! queues, so a slow consumer applies backpressure to its producers.
//!
//! # Architecture
//!
//! ```text
//! [Camera] ──► [Detector] ──► [Tracker] ──► [Writer]
//!                   │
//!                   ├──► [Sender] ══ tcp/ws ══► [Receiver] (another process)
//!                   └┄┄► Subscription tap (drop-oldest, never blocks)
//! ```
//!
//! # Design
//!
//! - **Enum dispatch on hot path**: `BuiltinModule` enum for all built-in
//!   modules, `Module` trait objects for plugins.
//! - **Ownership**: adding a module moves it into a `Graph`; the `Engine`
//!   moves it into its worker thread and gets it back on join.
//! - **Cooperative stop**: one `StopHandle` per engine closes every queue, so
//!   blocked pushes and pops return promptly.

pub mod compiled_plan;
pub mod compiler;
pub mod connection;
pub mod description;
pub mod engine;
pub mod error;
pub mod factory;
pub mod frame;
pub mod graph;
pub mod id;
pub mod module;
pub mod module_type;
pub mod modules;
pub mod port;
pub mod stats;
pub mod subscription;
pub mod transport;
pub mod wire;
pub mod worker;

pub use compiled_plan::{CompiledPlan, PlanStats};
pub use connection::{Closed, Connection};
pub use description::{EdgeSpec, GraphDescription};
pub use engine::Engine;
pub use error::{PipelineError, PipelineResult};
pub use factory::ModuleFactory;
pub use frame::{FieldType, FieldValue, Frame};
pub use graph::{ConnectionSpec, Graph, DEFAULT_QUEUE_CAPACITY};
pub use id::{ConnectionId, ModuleId, SubscriptionId};
pub use module::{AnyModule, BuiltinModule, Module, ModuleContext, ModuleIo, Step};
pub use module_type::{ModuleKind, ModuleType};
pub use port::{PortDescriptor, PortDirection, PortKind};
pub use subscription::{Subscription, DEFAULT_SUBSCRIPTION_CAPACITY};
pub use transport::{Endpoint, Scheme};
pub use wire::{Envelope, PackageType};
pub use worker::StopHandle;
