//! Module type enumeration.
//!
//! Every built-in module kind, plus `Plugin` for user-supplied modules.

use serde::{Deserialize, Serialize};

/// Position of a module in the data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleKind {
    Source,
    Transform,
    Sink,
}

/// Types of modules that can be instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    // Sources
    /// Frame source backed by a capture device.
    Camera,
    /// Network source that decodes envelopes from a transport.
    Receiver,

    // Transforms
    /// Object detector annotating frames with boxes, tags and confidences.
    Detector,
    /// Image preprocessing (resize/normalize) ahead of a model.
    Transformer,
    /// Image classifier producing tags and probabilities.
    Classifier,
    /// Object tracker assigning stable ids to detections.
    Tracker,
    /// Rate limiter that drops frames above a target fps.
    Throttler,
    /// Forwards every n-th frame.
    Strider,

    // Sinks
    /// Network sink that encodes frames into envelopes.
    Sender,
    /// Writes frames to a file.
    Writer,

    /// User-supplied module.
    Plugin,
}

impl ModuleType {
    /// Get the display name for this module type.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModuleType::Camera => "Camera",
            ModuleType::Receiver => "Receiver",
            ModuleType::Detector => "Detector",
            ModuleType::Transformer => "Transformer",
            ModuleType::Classifier => "Classifier",
            ModuleType::Tracker => "Tracker",
            ModuleType::Throttler => "Throttler",
            ModuleType::Strider => "Strider",
            ModuleType::Sender => "Sender",
            ModuleType::Writer => "Writer",
            ModuleType::Plugin => "Plugin",
        }
    }

    /// Get all built-in module types.
    pub fn all() -> &'static [ModuleType] {
        &[
            ModuleType::Camera,
            ModuleType::Receiver,
            ModuleType::Detector,
            ModuleType::Transformer,
            ModuleType::Classifier,
            ModuleType::Tracker,
            ModuleType::Throttler,
            ModuleType::Strider,
            ModuleType::Sender,
            ModuleType::Writer,
        ]
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            ModuleType::Camera | ModuleType::Receiver => ModuleKind::Source,
            ModuleType::Sender | ModuleType::Writer => ModuleKind::Sink,
            _ => ModuleKind::Transform,
        }
    }

    pub fn is_source(&self) -> bool {
        self.kind() == ModuleKind::Source
    }

    pub fn is_sink(&self) -> bool {
        self.kind() == ModuleKind::Sink
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert!(ModuleType::Camera.is_source());
        assert!(ModuleType::Receiver.is_source());
        assert!(ModuleType::Writer.is_sink());
        assert_eq!(ModuleType::Detector.kind(), ModuleKind::Transform);
        assert!(!ModuleType::all().contains(&ModuleType::Plugin));
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ModuleType::Throttler).unwrap();
        assert_eq!(json, "\"throttler\"");
    }
}
