use crate::pipeline::id::ModuleId;

/// Validated execution plan for a graph.
#[derive(Debug, Clone, Default)]
pub struct CompiledPlan {
    /// Modules in topological order (producers before consumers). Feedback
    /// connections are ignored when ordering.
    pub topo_order: Vec<ModuleId>,

    /// Activation order: reverse topological, so sinks start first.
    pub start_order: Vec<ModuleId>,

    /// Non-fatal findings (port kind mismatches, isolated modules).
    pub warnings: Vec<String>,

    /// Compilation statistics
    pub stats: PlanStats,
}

/// Statistics about the compiled plan
#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    pub total_modules: usize,

    pub connections: usize,

    /// Connections into feedback ports (excluded from the cycle check)
    pub feedback_connections: usize,

    /// Modules without input ports
    pub source_modules: usize,

    /// Modules without output ports
    pub sink_modules: usize,

    /// Modules with no connections at all
    pub isolated_modules: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

impl CompiledPlan {
    pub fn is_empty(&self) -> bool {
        self.topo_order.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
