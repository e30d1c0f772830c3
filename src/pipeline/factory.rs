//! Construction of built-in modules from config entries.

use crate::config::ModuleSpec;
use crate::pipeline::error::PipelineResult;
use crate::pipeline::module::AnyModule;
use crate::pipeline::modules::{
    Camera, Classifier, Detector, Receiver, Sender, Strider, Throttler, Tracker, Transformer,
    Writer,
};

pub struct ModuleFactory;

impl ModuleFactory {
    /// Build one module, validating its parameters.
    pub fn build(spec: &ModuleSpec) -> PipelineResult<AnyModule> {
        tracing::debug!("Building {} module '{}'", spec.module_type(), spec.name());
        let module = match spec.clone() {
            ModuleSpec::Camera(c) => Camera::new(c)?.into(),
            ModuleSpec::Detector(c) => Detector::new(c)?.into(),
            ModuleSpec::Transformer(c) => Transformer::new(c)?.into(),
            ModuleSpec::Classifier(c) => Classifier::new(c)?.into(),
            ModuleSpec::Tracker(c) => Tracker::new(c)?.into(),
            ModuleSpec::Throttler(c) => Throttler::new(c)?.into(),
            ModuleSpec::Strider(c) => Strider::new(c)?.into(),
            ModuleSpec::Sender(c) => Sender::new(c)?.into(),
            ModuleSpec::Receiver(c) => Receiver::new(c)?.into(),
            ModuleSpec::Writer(c) => Writer::new(c)?.into(),
        };
        Ok(module)
    }

    /// Build every module, stopping at the first invalid entry.
    pub fn build_all(specs: &[ModuleSpec]) -> PipelineResult<Vec<AnyModule>> {
        specs.iter().map(Self::build).collect()
    }
}
