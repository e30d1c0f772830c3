//! Image classifier producing the top `num_labels` tags with probabilities.

use super::backend::{ClassificationBackend, StaticScores};
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
pub struct ClassifierConfig {
    pub name: String,
    pub model_name: String,
    pub num_labels: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            name: "classifier".to_string(),
            model_name: String::new(),
            num_labels: 5,
        }
    }
}

pub struct Classifier {
    config: ClassifierConfig,
    backend: Box<dyn ClassificationBackend>,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> PipelineResult<Self> {
        Self::with_backend(config, Box::new(StaticScores::default()))
    }

    pub fn with_backend(
        config: ClassifierConfig,
        backend: Box<dyn ClassificationBackend>,
    ) -> PipelineResult<Self> {
        if config.model_name.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "classifier {:?}: model_name is required",
                config.name
            )));
        }
        if config.num_labels == 0 {
            return Err(PipelineError::Config(format!(
                "classifier {:?}: num_labels must be at least 1",
                config.name
            )));
        }
        Ok(Self { config, backend })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        self.backend.load(&self.config.model_name)
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let mut frame = ctx.pop("input")?;

        let image = frame
            .get("image")
            .or_else(|| frame.get("original_image"))
            .and_then(FieldValue::as_bytes);
        let Some(image) = image else {
            ctx.push("output", frame)?;
            return Ok(Step::Continue);
        };

        let mut scores = self.backend.classify(image)?;
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        scores.truncate(self.config.num_labels);

        let (tags, probabilities): (Vec<FieldValue>, Vec<FieldValue>) = scores
            .into_iter()
            .map(|(label, p)| (FieldValue::from(label), FieldValue::from(p)))
            .unzip();
        frame.set("tags", tags);
        frame.set("probabilities", probabilities);

        ctx.push("output", frame)?;
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}
