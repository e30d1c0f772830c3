//! Port descriptors for the module system.
//!
//! Each module declares its ports (inputs/outputs) as a list of
//! `PortDescriptor`s. The graph uses these to resolve connection endpoints;
//! the `kind` tag is informational and mismatches only produce warnings.

use std::borrow::Cow;

/// The kind of data flowing through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Raw or annotated video frames.
    Video,
    /// Metadata-only frames (no image payload expected).
    Metadata,
    /// Accepts or emits anything.
    Any,
}

impl PortKind {
    /// Whether two kinds are considered compatible for review purposes.
    pub fn compatible_with(self, other: PortKind) -> bool {
        self == other || self == PortKind::Any || other == PortKind::Any
    }
}

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        }
    }
}

/// Descriptor for a module's port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: Cow<'static, str>,
    pub direction: PortDirection,
    pub kind: PortKind,
    /// Connections into a feedback input are exempt from the cycle check.
    pub feedback: bool,
}

impl PortDescriptor {
    pub const fn input(name: &'static str, kind: PortKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            direction: PortDirection::Input,
            kind,
            feedback: false,
        }
    }

    pub const fn output(name: &'static str, kind: PortKind) -> Self {
        Self {
            name: Cow::Borrowed(name),
            direction: PortDirection::Output,
            kind,
            feedback: false,
        }
    }

    /// Port with a runtime-generated name (e.g. `input3` on a batched detector).
    pub fn named(name: String, direction: PortDirection, kind: PortKind) -> Self {
        Self {
            name: Cow::Owned(name),
            direction,
            kind,
            feedback: false,
        }
    }

    /// Mark this port as a feedback input.
    pub fn as_feedback(mut self) -> Self {
        self.feedback = true;
        self
    }
}

/// Find the port named `name` in the given direction.
pub fn find_port<'a>(
    ports: &'a [PortDescriptor],
    name: &str,
    direction: PortDirection,
) -> Option<&'a PortDescriptor> {
    ports
        .iter()
        .find(|p| p.direction == direction && p.name == name)
}

/// Ports of one direction, in declaration order.
pub fn ports_in(
    ports: &[PortDescriptor],
    direction: PortDirection,
) -> impl Iterator<Item = &PortDescriptor> {
    ports.iter().filter(move |p| p.direction == direction)
}

#[cfg(test)]
mod tests {
    use super::*;

    static PORTS: &[PortDescriptor] = &[
        PortDescriptor::input("input", PortKind::Video),
        PortDescriptor::output("output", PortKind::Video),
        PortDescriptor::output("thumbnails", PortKind::Any),
    ];

    #[test]
    fn test_find_port_respects_direction() {
        assert!(find_port(PORTS, "input", PortDirection::Input).is_some());
        assert!(find_port(PORTS, "input", PortDirection::Output).is_none());
        assert_eq!(ports_in(PORTS, PortDirection::Output).count(), 2);
    }

    #[test]
    fn test_kind_compatibility() {
        assert!(PortKind::Video.compatible_with(PortKind::Video));
        assert!(PortKind::Video.compatible_with(PortKind::Any));
        assert!(!PortKind::Video.compatible_with(PortKind::Metadata));
    }

    #[test]
    fn test_named_feedback_port() {
        let port = PortDescriptor::named("input2".into(), PortDirection::Input, PortKind::Video)
            .as_feedback();
        assert_eq!(port.name, "input2");
        assert!(port.feedback);
    }
}
