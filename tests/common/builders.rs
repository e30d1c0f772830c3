//! Test data builders for creating graphs and modules

use std::sync::{Arc, Mutex};
use vidpipe_rs::pipeline::modules::{Camera, CameraConfig, Detector, DetectorConfig};
use vidpipe_rs::pipeline::{
    Module, ModuleContext, PipelineResult, PortDescriptor, PortKind, Step,
};
use vidpipe_rs::{Frame, Graph};

/// Builder for test cameras
pub struct CameraBuilder {
    config: CameraConfig,
}

impl CameraBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: CameraConfig {
                name: name.to_string(),
                width: 8,
                height: 4,
                ..Default::default()
            },
        }
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.config.fps = fps;
        self
    }

    pub fn max_frames(mut self, max_frames: u64) -> Self {
        self.config.max_frames = Some(max_frames);
        self
    }

    pub fn build(self) -> Camera {
        Camera::new(self.config).expect("valid camera config")
    }
}

pub fn detector(name: &str) -> Detector {
    Detector::new(DetectorConfig {
        name: name.to_string(),
        detector_type: "ssd".to_string(),
        model: "mobilenet".to_string(),
        ..Default::default()
    })
    .expect("valid detector config")
}

static COLLECT_PORTS: &[PortDescriptor] = &[PortDescriptor::input("input", PortKind::Any)];

/// Sink plugin that records every frame it pops.
pub struct Collector {
    name: String,
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl Collector {
    pub fn new(name: &str) -> (Self, Arc<Mutex<Vec<Frame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.to_string(),
                frames: frames.clone(),
            },
            frames,
        )
    }
}

impl Module for Collector {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &[PortDescriptor] {
        COLLECT_PORTS
    }

    fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let frame = ctx.pop("input")?;
        self.frames.lock().unwrap().push(frame);
        Ok(Step::Continue)
    }
}

/// `camera -> detector(input0/output0)` with a bounded camera.
pub fn camera_detector_graph(frames: u64) -> Graph {
    let mut graph = Graph::new();
    graph
        .add_module(CameraBuilder::new("camera").max_frames(frames).build())
        .unwrap();
    graph.add_module(detector("detector")).unwrap();
    graph
        .connect("camera", "output", "detector", "input0", 4)
        .unwrap();
    graph
}

static SOURCE_PORTS: &[PortDescriptor] = &[PortDescriptor::output("output", PortKind::Any)];

/// Source plugin that emits a fixed list of frames, then finishes.
pub struct FrameSource {
    name: String,
    frames: std::collections::VecDeque<Frame>,
}

impl FrameSource {
    pub fn new(name: &str, frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            name: name.to_string(),
            frames: frames.into_iter().collect(),
        }
    }
}

impl Module for FrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> &[PortDescriptor] {
        SOURCE_PORTS
    }

    fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        match self.frames.pop_front() {
            Some(frame) => {
                ctx.push("output", frame)?;
                Ok(Step::Continue)
            }
            None => Ok(Step::Finished),
        }
    }
}
