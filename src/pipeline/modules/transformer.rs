//! Image preprocessing ahead of a model.
//!
//! Reads `original_image`, writes the converted `image` plus its
//! `input_shape` (`[height, width, channels]`). Frames without an image pass
//! through untouched.

use super::backend::{IdentityTransform, TransformBackend};
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
pub struct TransformerConfig {
    pub name: String,
    pub model_name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            name: "transformer".to_string(),
            model_name: String::new(),
            width: 224,
            height: 224,
            channels: 3,
        }
    }
}

pub struct Transformer {
    config: TransformerConfig,
    backend: Box<dyn TransformBackend>,
}

impl Transformer {
    pub fn new(config: TransformerConfig) -> PipelineResult<Self> {
        Self::with_backend(config, Box::new(IdentityTransform))
    }

    pub fn with_backend(
        config: TransformerConfig,
        backend: Box<dyn TransformBackend>,
    ) -> PipelineResult<Self> {
        if config.model_name.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "transformer {:?}: model_name is required",
                config.name
            )));
        }
        if config.width == 0 || config.height == 0 || config.channels == 0 {
            return Err(PipelineError::Config(format!(
                "transformer {:?}: width, height and channels must be non-zero",
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
        Ok(())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let mut frame = ctx.pop("input")?;
        let TransformerConfig {
            width,
            height,
            channels,
            ..
        } = self.config;

        let converted = match frame.get("original_image").and_then(FieldValue::as_bytes) {
            Some(image) => Some(self.backend.transform(image, width, height, channels)?),
            None => None,
        };
        if let Some(image) = converted {
            frame.set("image", image);
            frame.set(
                "input_shape",
                vec![
                    FieldValue::from(height),
                    FieldValue::from(width),
                    FieldValue::from(channels),
                ],
            );
        }

        ctx.push("output", frame)?;
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {}

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}
