//! Pipeline graph: named modules plus port-level connections.
//!
//! A graph is built incrementally ([`Graph::add_module`], [`Graph::connect`])
//! or from a [`GraphDescription`]. Every connection is checked when it is
//! added:
//!
//! - both modules exist and both ports are declared in the right direction;
//! - the sink input has no other incoming connection;
//! - the capacity is at least 1.
//!
//! Cycles are checked by [`Graph::validate`] (and again when an engine is
//! created), since they may be legal through feedback ports.

use crate::pipeline::compiled_plan::CompiledPlan;
use crate::pipeline::compiler::GraphCompiler;
use crate::pipeline::description::GraphDescription;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{ConnectionId, ModuleId};
use crate::pipeline::module::AnyModule;
use crate::pipeline::port::{find_port, ports_in, PortDescriptor, PortDirection};
use std::collections::HashMap;
use std::fmt::Write as _;

pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// A directed edge between an output port and an input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub id: ConnectionId,
    pub from: ModuleId,
    pub from_port: String,
    pub to: ModuleId,
    pub to_port: String,
    pub capacity: usize,
}

/// Resolve an optional port name against a module's declared ports.
///
/// `None` (or an empty name) selects the module's only port in `direction`.
pub fn resolve_port(
    module: &str,
    ports: &[PortDescriptor],
    name: Option<&str>,
    direction: PortDirection,
) -> PipelineResult<String> {
    match name.filter(|n| !n.is_empty()) {
        Some(name) => find_port(ports, name, direction)
            .map(|p| p.name.to_string())
            .ok_or_else(|| {
                PipelineError::Structural(format!(
                    "module {:?} has no {} port {:?}",
                    module,
                    direction.as_str(),
                    name
                ))
            }),
        None => {
            let candidates: Vec<&PortDescriptor> = ports_in(ports, direction).collect();
            match candidates.as_slice() {
                [only] => Ok(only.name.to_string()),
                [] => Err(PipelineError::Structural(format!(
                    "module {:?} has no {} ports",
                    module,
                    direction.as_str()
                ))),
                many => Err(PipelineError::AmbiguousPort {
                    module: module.to_string(),
                    direction: direction.as_str(),
                    count: many.len(),
                }),
            }
        }
    }
}

#[derive(Default)]
pub struct Graph {
    modules: Vec<AnyModule>,
    names: HashMap<String, ModuleId>,
    connections: Vec<ConnectionSpec>,
    default_capacity: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::with_default_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Graph whose default-capacity connections hold `capacity` frames.
    pub fn with_default_capacity(capacity: usize) -> Self {
        Self {
            default_capacity: capacity.max(1),
            ..Default::default()
        }
    }

    /// Build a graph from modules and a declarative description.
    ///
    /// Atomic: any unresolved module or port fails construction and no graph
    /// is returned.
    pub fn from_description(
        modules: impl IntoIterator<Item = AnyModule>,
        description: &GraphDescription,
    ) -> PipelineResult<Self> {
        let mut graph = Self::new();
        for module in modules {
            graph.add_module(module)?;
        }
        graph.apply_description(description)?;
        Ok(graph)
    }

    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    pub fn set_default_capacity(&mut self, capacity: usize) {
        self.default_capacity = capacity.max(1);
    }

    /// Add a module. Names must be unique and free of whitespace.
    pub fn add_module(&mut self, module: impl Into<AnyModule>) -> PipelineResult<ModuleId> {
        let module = module.into();
        let name = module.name().to_string();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(PipelineError::Structural(format!(
                "invalid module name {:?}",
                name
            )));
        }
        if self.names.contains_key(&name) {
            return Err(PipelineError::DuplicateName(name));
        }

        let id = ModuleId(self.modules.len() as u32);
        tracing::debug!("Added module {:?} ({}) as {:?}", name, module.module_type(), id);
        self.names.insert(name, id);
        self.modules.push(module);
        Ok(id)
    }

    /// Connect `src:src_port` to `dst:dst_port` with an explicit capacity.
    pub fn connect(
        &mut self,
        src: &str,
        src_port: &str,
        dst: &str,
        dst_port: &str,
        capacity: usize,
    ) -> PipelineResult<ConnectionId> {
        let spec = self.check_connection(
            &self.connections,
            src,
            Some(src_port),
            dst,
            Some(dst_port),
            capacity,
        )?;
        Ok(self.push_connection(spec))
    }

    /// Connect with default capacity; omitted ports resolve to the module's
    /// only port in that direction.
    pub fn connect_default(
        &mut self,
        src: &str,
        src_port: Option<&str>,
        dst: &str,
        dst_port: Option<&str>,
    ) -> PipelineResult<ConnectionId> {
        let spec = self.check_connection(
            &self.connections,
            src,
            src_port,
            dst,
            dst_port,
            self.default_capacity,
        )?;
        Ok(self.push_connection(spec))
    }

    /// Add every edge of `description`. Either all edges are added or none.
    pub fn apply_description(&mut self, description: &GraphDescription) -> PipelineResult<()> {
        let mut staged = self.connections.clone();
        for (producer, edge) in description.iter() {
            let mut spec = self.check_connection(
                &staged,
                producer,
                edge.output_port.as_deref(),
                &edge.consumer,
                edge.input_port.as_deref(),
                self.default_capacity,
            )?;
            spec.id = ConnectionId(staged.len() as u32);
            staged.push(spec);
        }
        self.connections = staged;
        Ok(())
    }

    fn check_connection(
        &self,
        existing: &[ConnectionSpec],
        src: &str,
        src_port: Option<&str>,
        dst: &str,
        dst_port: Option<&str>,
        capacity: usize,
    ) -> PipelineResult<ConnectionSpec> {
        let from = self.require(src)?;
        let to = self.require(dst)?;
        let from_port = resolve_port(
            src,
            self.modules[from.index()].ports(),
            src_port,
            PortDirection::Output,
        )?;
        let to_port = resolve_port(
            dst,
            self.modules[to.index()].ports(),
            dst_port,
            PortDirection::Input,
        )?;
        if capacity == 0 {
            return Err(PipelineError::Structural(format!(
                "connection {}:{} -> {}:{} must have capacity of at least 1",
                src, from_port, dst, to_port
            )));
        }
        if existing
            .iter()
            .any(|c| c.to == to && c.to_port == to_port)
        {
            return Err(PipelineError::Structural(format!(
                "input {}:{} already has an incoming connection",
                dst, to_port
            )));
        }
        Ok(ConnectionSpec {
            id: ConnectionId(existing.len() as u32),
            from,
            from_port,
            to,
            to_port,
            capacity,
        })
    }

    fn push_connection(&mut self, spec: ConnectionSpec) -> ConnectionId {
        let id = spec.id;
        tracing::debug!(
            "Connected {}:{} -> {}:{} (capacity {})",
            self.modules[spec.from.index()].name(),
            spec.from_port,
            self.modules[spec.to.index()].name(),
            spec.to_port,
            spec.capacity
        );
        self.connections.push(spec);
        id
    }

    fn require(&self, name: &str) -> PipelineResult<ModuleId> {
        self.module_id(name)
            .ok_or_else(|| PipelineError::Structural(format!("unknown module {:?}", name)))
    }

    pub fn module_id(&self, name: &str) -> Option<ModuleId> {
        self.names.get(name).copied()
    }

    pub fn module(&self, id: ModuleId) -> Option<&AnyModule> {
        self.modules.get(id.index())
    }

    pub fn module_by_name(&self, name: &str) -> Option<&AnyModule> {
        self.module_id(name).and_then(|id| self.module(id))
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &AnyModule)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(i, m)| (ModuleId(i as u32), m))
    }

    pub fn connections(&self) -> &[ConnectionSpec] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Check for cycles and collect warnings.
    pub fn validate(&self) -> PipelineResult<CompiledPlan> {
        GraphCompiler::compile(&self.modules, &self.connections)
    }

    /// GraphViz DOT rendering.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n    rankdir=LR;\n");
        for module in &self.modules {
            let _ = writeln!(
                out,
                "    \"{}\" [label=\"{}\\n({})\"];",
                escape(module.name()),
                escape(module.name()),
                module.module_type()
            );
        }
        for conn in &self.connections {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\" [label=\"{}:{} ({})\"];",
                escape(self.modules[conn.from.index()].name()),
                escape(self.modules[conn.to.index()].name()),
                escape(&conn.from_port),
                escape(&conn.to_port),
                conn.capacity
            );
        }
        out.push_str("}\n");
        out
    }

    pub(crate) fn into_parts(self) -> (Vec<AnyModule>, Vec<ConnectionSpec>) {
        (self.modules, self.connections)
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("modules", &self.modules)
            .field("connections", &self.connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::description::EdgeSpec;
    use crate::pipeline::modules::{
        Camera, CameraConfig, Detector, DetectorConfig, Writer, WriterConfig,
    };

    fn camera(name: &str) -> Camera {
        Camera::new(CameraConfig {
            name: name.into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn detector(batch_size: usize) -> Detector {
        Detector::new(DetectorConfig {
            detector_type: "ssd".into(),
            model: "mobilenet".into(),
            batch_size,
            ..Default::default()
        })
        .unwrap()
    }

    fn writer() -> Writer {
        Writer::new(WriterConfig {
            uri: "unused.jsonl".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_duplicate_name() {
        let mut graph = Graph::new();
        graph.add_module(camera("cam")).unwrap();
        assert!(matches!(
            graph.add_module(camera("cam")),
            Err(PipelineError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_connect_checks() {
        let mut graph = Graph::new();
        graph.add_module(camera("cam")).unwrap();
        graph.add_module(detector(1)).unwrap();

        assert!(graph.connect("cam", "output", "detector", "input0", 0).is_err());
        assert!(graph.connect("cam", "nope", "detector", "input0", 4).is_err());
        assert!(graph.connect("cam", "output", "ghost", "input0", 4).is_err());
        assert!(graph.connect("detector", "input0", "cam", "output", 4).is_err());

        graph.connect("cam", "output", "detector", "input0", 4).unwrap();
        let err = graph
            .connect("cam", "output", "detector", "input0", 4)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Structural(_)));
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_default_port_resolution() {
        let mut graph = Graph::new();
        graph.add_module(camera("cam")).unwrap();
        graph.add_module(detector(2)).unwrap();
        graph.add_module(writer()).unwrap();

        let err = graph.connect_default("cam", None, "detector", None).unwrap_err();
        assert!(matches!(err, PipelineError::AmbiguousPort { count: 2, .. }));

        graph
            .connect_default("cam", None, "detector", Some("input1"))
            .unwrap();
        graph
            .connect_default("detector", Some("output1"), "writer", None)
            .unwrap();
        assert_eq!(graph.connections()[1].to_port, "input");
    }

    #[test]
    fn test_apply_description_is_atomic() {
        let mut graph = Graph::new();
        graph.add_module(camera("cam")).unwrap();
        graph.add_module(detector(1)).unwrap();

        let bad = GraphDescription::new()
            .edge("cam", EdgeSpec::new("detector"))
            .edge("detector", EdgeSpec::new("missing"));
        assert!(graph.apply_description(&bad).is_err());
        assert!(graph.connections().is_empty());

        let good = GraphDescription::new().edge("cam", EdgeSpec::new("detector").input("input0"));
        graph.apply_description(&good).unwrap();
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_to_dot() {
        let description =
            GraphDescription::parse_map([("cam", ["detector:input0:output"])]).unwrap();
        let graph = Graph::from_description(
            vec![AnyModule::from(camera("cam")), AnyModule::from(detector(1))],
            &description,
        )
        .unwrap();
        let dot = graph.to_dot();
        assert!(dot.starts_with("digraph pipeline {"));
        assert!(dot.contains("\"cam\" -> \"detector\" [label=\"output:input0 (16)\"];"));
    }
}
