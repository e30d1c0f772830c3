//! # vidpipe-rs: Video-Analytics Pipeline Engine
//!
//! Builds graphs of named processing modules (camera, detector, transformer,
//! classifier, tracker, throttler, strider, sender, receiver, writer), runs
//! each module on its own thread and moves frames between them through
//! bounded queues.
//!
//! ## Architecture
//!
//! - **Graph**: modules plus port-level connections, built incrementally or
//!   from a declarative description (`"consumer:inputPort:outputPort"`)
//! - **Engine**: `start` / `stop` / `clean` lifecycle, fault containment and
//!   statistics
//! - **Subscriptions**: non-blocking taps on any module output with
//!   push/pop rate statistics
//! - **Bridge**: `Sender`/`Receiver` modules carrying frames over TCP or
//!   WebSocket in a versioned binary envelope
//!
//! ## Configuration
//!
//! Pipelines can be described in a TOML or JSON file (see [`config`]) and
//! built with [`Engine::from_config`].
//!
//! ## Example
//!
//! ```ignore
//! use vidpipe_rs::pipeline::modules::{Camera, CameraConfig, Detector, DetectorConfig};
//! use vidpipe_rs::{config::EngineConfig, Engine, Graph};
//!
//! let mut graph = Graph::new();
//! graph.add_module(Camera::new(CameraConfig::default())?)?;
//! graph.add_module(Detector::new(DetectorConfig {
//!     detector_type: "ssd".into(),
//!     model: "mobilenet".into(),
//!     ..Default::default()
//! })?)?;
//! graph.connect_default("camera", None, "detector", Some("input0"))?;
//!
//! let mut engine = Engine::new(graph, EngineConfig::default())?;
//! let tap = engine.subscribe("detector", Some("output0"))?;
//! engine.start()?;
//! let frame = tap.pop_frame()?;
//! engine.stop()?;
//! engine.clean()?;
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, EngineConfig, LoggingConfig, ModuleSpec};
pub use error::{Result, ResultExt, VidPipeError};
pub use pipeline::{
    Engine, Frame, Graph, GraphDescription, PipelineError, PipelineResult, StopHandle,
    Subscription,
};
pub use types::{EngineEvent, EngineState, EngineStats, ModuleState};
