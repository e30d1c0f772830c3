//! Object tracker: assigns stable `ids` to the detector's `bounding_boxes`.

use super::backend::{boxes_from_field, IouTracker, TrackingBackend};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::FieldValue;
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde::{Deserialize, Serialize};

static PORTS: &[PortDescriptor] = &[
    PortDescriptor::input("input", PortKind::Video),
    PortDescriptor::output("output", PortKind::Video),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub name: String,
    /// `iou` (overlap matching) or `sequential` (fresh id per box).
    pub algorithm: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            name: "tracker".to_string(),
            algorithm: "iou".to_string(),
        }
    }
}

pub struct Tracker {
    config: TrackerConfig,
    backend: Box<dyn TrackingBackend>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> PipelineResult<Self> {
        let backend: Box<dyn TrackingBackend> = match config.algorithm.as_str() {
            "iou" => Box::new(IouTracker::default()),
            "sequential" => Box::new(IouTracker::sequential()),
            other => {
                return Err(PipelineError::Config(format!(
                    "tracker {:?}: unknown algorithm {:?}",
                    config.name, other
                )))
            }
        };
        Ok(Self { config, backend })
    }

    pub fn with_backend(config: TrackerConfig, backend: Box<dyn TrackingBackend>) -> Self {
        Self { config, backend }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let mut frame = ctx.pop("input")?;
        let boxes = boxes_from_field(&frame, "bounding_boxes")?;
        let ids = self.backend.track(&boxes)?;
        frame.set(
            "ids",
            ids.into_iter().map(FieldValue::from).collect::<Vec<_>>(),
        );
        ctx.push("output", frame)?;
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}
