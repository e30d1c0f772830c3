//! Integration tests for the engine lifecycle
//!
//! These tests validate:
//! - start / stop / clean ordering and resource release
//! - backpressure through bounded connections
//! - fault containment and halt-on-fault
//! - start rollback when a capture device fails to open

mod common;

use common::builders::{CameraBuilder, Collector, FrameSource};
use common::mock_helpers::{finite_capture, MockCapture};
use common::{drain_events, test_timeout, wait_for_event};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vidpipe_rs::pipeline::modules::{Camera, CameraConfig};
use vidpipe_rs::pipeline::{
    AnyModule, Module, ModuleContext, PipelineResult, PortDescriptor, PortKind, Step,
};
use vidpipe_rs::{
    EngineConfig, Engine, EngineEvent, EngineState, Frame, Graph, ModuleState, PipelineError,
};

static SINK_PORTS: &[PortDescriptor] = &[PortDescriptor::input("input", PortKind::Any)];

/// Sink that never pops; used to hold a queue full.
struct Stalled {
    cleaned: Arc<AtomicUsize>,
}

impl Module for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }
    fn ports(&self) -> &[PortDescriptor] {
        SINK_PORTS
    }
    fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        if ctx.sleep(Duration::from_millis(10)) {
            Ok(Step::Idle)
        } else {
            Ok(Step::Finished)
        }
    }
    fn on_clean(&mut self) -> PipelineResult<()> {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that fails on its third frame.
struct Flaky {
    seen: usize,
}

impl Module for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn ports(&self) -> &[PortDescriptor] {
        SINK_PORTS
    }
    fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        ctx.pop("input")?;
        self.seen += 1;
        if self.seen == 3 {
            return Err(PipelineError::module("flaky", "bad frame"));
        }
        Ok(Step::Continue)
    }
}

/// Sink that ignores stop requests for a while.
struct Stubborn;

impl Module for Stubborn {
    fn name(&self) -> &str {
        "stubborn"
    }
    fn ports(&self) -> &[PortDescriptor] {
        SINK_PORTS
    }
    fn process(&mut self, _ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Step::Idle)
    }
}

#[test]
fn test_finite_camera_with_mock_device() {
    let camera = Camera::with_device(
        CameraConfig {
            max_frames: None,
            ..Default::default()
        },
        Box::new(finite_capture(7)),
    )
    .unwrap();
    let (collector, frames) = Collector::new("collector");

    let mut graph = Graph::new();
    graph.add_module(camera).unwrap();
    graph.add_module(AnyModule::plugin(collector)).unwrap();
    graph.connect_default("camera", None, "collector", None).unwrap();

    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    engine.start().unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    assert!(engine.wait_until_stopped_timeout(test_timeout()));
    engine.stop().unwrap();

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 7);
    let ids: Vec<u64> = frames.iter().map(|f| f.get_u64("frame_id").unwrap()).collect();
    assert_eq!(ids, (0..7).collect::<Vec<_>>());
    assert_eq!(frames[0].get_str("camera_name").unwrap(), "camera");
    assert_eq!(frames[0].get_bytes("original_image").unwrap().len(), 16);
    drop(frames);

    let stats = engine.stats();
    let camera = stats.module("camera").unwrap();
    assert_eq!(camera.frames_processed, 7);
    assert!(camera.max_latency_ms >= camera.avg_latency_ms);
    assert!(camera.avg_latency_ms >= 0.0);

    let events = drain_events(&engine);
    assert!(events.contains(&EngineEvent::ModuleFinished {
        module: "camera".to_string()
    }));
    assert!(events.contains(&EngineEvent::Stopped));

    engine.clean().unwrap();
    assert_eq!(engine.module_state("camera"), Some(ModuleState::Cleaned));
}

#[test]
fn test_backpressure_holds_queue_at_capacity() {
    let cleaned = Arc::new(AtomicUsize::new(0));
    let mut graph = Graph::new();
    graph.add_module(CameraBuilder::new("camera").build()).unwrap();
    graph
        .add_module(AnyModule::plugin(Stalled {
            cleaned: cleaned.clone(),
        }))
        .unwrap();
    graph.connect("camera", "output", "stalled", "input", 3).unwrap();

    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    engine.start().unwrap();
    std::thread::sleep(Duration::from_millis(150));

    let stats = engine.stats();
    assert_eq!(stats.connections[0].queued, 3);
    assert_eq!(stats.connections[0].pushed, 3);
    // The camera is blocked on its fourth push.
    assert_eq!(stats.module("camera").unwrap().frames_processed, 3);

    engine.stop().unwrap();
    assert_eq!(engine.module_state("camera"), Some(ModuleState::Stopped));
    engine.clean().unwrap();
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fault_is_contained() {
    let (collector, frames) = Collector::new("collector");
    let mut graph = Graph::new();
    graph
        .add_module(CameraBuilder::new("camera").fps(200.0).build())
        .unwrap();
    graph.add_module(AnyModule::plugin(Flaky { seen: 0 })).unwrap();
    graph.add_module(AnyModule::plugin(collector)).unwrap();
    graph.connect("camera", "output", "flaky", "input", 2).unwrap();
    graph.connect("camera", "output", "collector", "input", 2).unwrap();

    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    engine.start().unwrap();

    let fault = wait_for_event(&engine, test_timeout(), |e| {
        matches!(e, EngineEvent::ModuleFaulted { .. })
    });
    assert!(matches!(
        fault,
        Some(EngineEvent::ModuleFaulted { ref module, .. }) if module == "flaky"
    ));

    // The camera keeps feeding the healthy branch after the fault.
    let before = frames.lock().unwrap().len();
    std::thread::sleep(Duration::from_millis(100));
    assert!(frames.lock().unwrap().len() > before);
    assert_eq!(engine.module_state("flaky"), Some(ModuleState::Faulted));
    assert_eq!(engine.module_state("camera"), Some(ModuleState::Running));

    engine.stop().unwrap();
    engine.clean().unwrap();
}

#[test]
fn test_halt_on_fault_stops_everything() {
    let mut graph = Graph::new();
    graph.add_module(CameraBuilder::new("camera").build()).unwrap();
    graph.add_module(AnyModule::plugin(Flaky { seen: 0 })).unwrap();
    graph.connect_default("camera", None, "flaky", None).unwrap();

    let config = EngineConfig {
        halt_on_fault: true,
        ..Default::default()
    };
    let mut engine = Engine::new(graph, config).unwrap();
    engine.start().unwrap();
    assert!(engine.wait_until_stopped_timeout(test_timeout()));
    assert!(engine.stop_handle().is_stop_requested());

    engine.stop().unwrap();
    let events = drain_events(&engine);
    assert!(events.contains(&EngineEvent::HaltRequested {
        module: "flaky".to_string()
    }));
    assert_eq!(engine.module_state("camera"), Some(ModuleState::Stopped));
    engine.clean().unwrap();
}

#[test]
fn test_capture_failure_rolls_back_started_sinks() {
    let mut device = MockCapture::new();
    device
        .expect_open()
        .returning(|_, _| Err(PipelineError::Transport("no such device".into())));
    device.expect_capture().never();
    device.expect_close().never();
    let camera = Camera::with_device(CameraConfig::default(), Box::new(device)).unwrap();

    let cleaned = Arc::new(AtomicUsize::new(0));
    let mut graph = Graph::new();
    graph.add_module(camera).unwrap();
    graph
        .add_module(AnyModule::plugin(Stalled {
            cleaned: cleaned.clone(),
        }))
        .unwrap();
    graph.connect_default("camera", None, "stalled", None).unwrap();

    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    let err = engine.start().unwrap_err();
    assert!(matches!(err, PipelineError::Transport(_)));
    assert_eq!(engine.state(), EngineState::Idle);
    // The sink started first and was cleaned during rollback.
    assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stop_handle().live_workers(), 0);
}

#[test]
fn test_stubborn_worker_is_abandoned() {
    let mut graph = Graph::new();
    graph
        .add_module(AnyModule::plugin(FrameSource::new("source", [Frame::new()])))
        .unwrap();
    graph.add_module(AnyModule::plugin(Stubborn)).unwrap();
    graph.connect_default("source", None, "stubborn", None).unwrap();

    let config = EngineConfig {
        stop_grace_period_ms: 20,
        ..Default::default()
    };
    let mut engine = Engine::new(graph, config).unwrap();
    engine.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    engine.stop().unwrap();

    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(engine.module_state("stubborn"), Some(ModuleState::Abandoned));
    assert_eq!(engine.module_state("source"), Some(ModuleState::Finished));
    engine.clean().unwrap();
}

#[test]
fn test_engines_are_independent() {
    let mut first = Engine::new(
        common::builders::camera_detector_graph(3),
        EngineConfig::default(),
    )
    .unwrap();
    let mut second = Engine::new(
        common::builders::camera_detector_graph(1_000_000),
        EngineConfig::default(),
    )
    .unwrap();
    first.start().unwrap();
    second.start().unwrap();

    assert!(first.wait_until_stopped_timeout(test_timeout()));
    first.stop().unwrap();
    assert_eq!(second.state(), EngineState::Running);
    assert!(!second.stop_handle().is_stop_requested());
    second.stop().unwrap();
}
