//! Module entries of a pipeline config file.
//!
//! Each `[[modules]]` table is tagged with its `type`; the remaining keys are
//! the module's own configuration:
//!
//! ```toml
//! [[modules]]
//! type = "writer"
//! name = "log"
//! uri = "out/detections.jsonl"
//! ```

use crate::pipeline::module_type::ModuleType;
use crate::pipeline::modules::{
    CameraConfig, ClassifierConfig, DetectorConfig, ReceiverConfig, SenderConfig, StriderConfig,
    ThrottlerConfig, TrackerConfig, TransformerConfig, WriterConfig,
};
use serde::{Deserialize, Serialize};

/// Configuration of one built-in module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleSpec {
    Camera(CameraConfig),
    Detector(DetectorConfig),
    Transformer(TransformerConfig),
    Classifier(ClassifierConfig),
    Tracker(TrackerConfig),
    Throttler(ThrottlerConfig),
    Strider(StriderConfig),
    Sender(SenderConfig),
    Receiver(ReceiverConfig),
    Writer(WriterConfig),
}

impl ModuleSpec {
    pub fn name(&self) -> &str {
        match self {
            ModuleSpec::Camera(c) => &c.name,
            ModuleSpec::Detector(c) => &c.name,
            ModuleSpec::Transformer(c) => &c.name,
            ModuleSpec::Classifier(c) => &c.name,
            ModuleSpec::Tracker(c) => &c.name,
            ModuleSpec::Throttler(c) => &c.name,
            ModuleSpec::Strider(c) => &c.name,
            ModuleSpec::Sender(c) => &c.name,
            ModuleSpec::Receiver(c) => &c.name,
            ModuleSpec::Writer(c) => &c.name,
        }
    }

    pub fn module_type(&self) -> ModuleType {
        match self {
            ModuleSpec::Camera(_) => ModuleType::Camera,
            ModuleSpec::Detector(_) => ModuleType::Detector,
            ModuleSpec::Transformer(_) => ModuleType::Transformer,
            ModuleSpec::Classifier(_) => ModuleType::Classifier,
            ModuleSpec::Tracker(_) => ModuleType::Tracker,
            ModuleSpec::Throttler(_) => ModuleType::Throttler,
            ModuleSpec::Strider(_) => ModuleType::Strider,
            ModuleSpec::Sender(_) => ModuleType::Sender,
            ModuleSpec::Receiver(_) => ModuleType::Receiver,
            ModuleSpec::Writer(_) => ModuleType::Writer,
        }
    }
}
