use super::compiled_plan::{CompiledPlan, PlanStats};
use super::error::{PipelineError, PipelineResult};
use super::graph::ConnectionSpec;
use super::id::ModuleId;
use super::module::AnyModule;
use super::port::{find_port, PortDirection};
use std::collections::VecDeque;

/// Validates a graph and computes its activation order.
pub struct GraphCompiler;

impl GraphCompiler {
    /// Compile a graph into a plan.
    ///
    /// Fails with `Cycle` when the graph has a cycle that does not pass
    /// through a feedback input port. Port kind mismatches and isolated
    /// modules are only reported as warnings.
    pub fn compile(
        modules: &[AnyModule],
        connections: &[ConnectionSpec],
    ) -> PipelineResult<CompiledPlan> {
        let start_time = std::time::Instant::now();
        let n = modules.len();

        let mut warnings = Vec::new();
        let mut feedback_connections = 0;
        let mut adj = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        let mut touched = vec![false; n];

        for conn in connections {
            let (from, to) = (conn.from.index(), conn.to.index());
            if from >= n || to >= n {
                return Err(PipelineError::Structural(format!(
                    "connection {:?} references a missing module",
                    conn.id
                )));
            }
            touched[from] = true;
            touched[to] = true;

            let out_port = find_port(modules[from].ports(), &conn.from_port, PortDirection::Output);
            let in_port = find_port(modules[to].ports(), &conn.to_port, PortDirection::Input);
            if let (Some(out_port), Some(in_port)) = (out_port, in_port) {
                if !out_port.kind.compatible_with(in_port.kind) {
                    warnings.push(format!(
                        "{}:{} ({:?}) feeds {}:{} ({:?})",
                        modules[from].name(),
                        conn.from_port,
                        out_port.kind,
                        modules[to].name(),
                        conn.to_port,
                        in_port.kind
                    ));
                }
                if in_port.feedback {
                    feedback_connections += 1;
                    continue;
                }
            }

            adj[from].push(to);
            in_degree[to] += 1;
        }

        let topo = Self::topological_sort(&adj, in_degree);
        if topo.len() < n {
            let mut in_order = vec![false; n];
            for &idx in &topo {
                in_order[idx] = true;
            }
            let culprit = (0..n).find(|&i| !in_order[i]).unwrap_or(0);
            return Err(PipelineError::Cycle(modules[culprit].name().to_string()));
        }

        let isolated: Vec<usize> = (0..n).filter(|&i| !touched[i]).collect();
        if n > 1 {
            for &idx in &isolated {
                warnings.push(format!("module {:?} has no connections", modules[idx].name()));
            }
        }

        let has_direction = |m: &AnyModule, dir: PortDirection| {
            m.ports().iter().any(|p| p.direction == dir)
        };
        let stats = PlanStats {
            total_modules: n,
            connections: connections.len(),
            feedback_connections,
            source_modules: modules
                .iter()
                .filter(|m| !has_direction(*m, PortDirection::Input))
                .count(),
            sink_modules: modules
                .iter()
                .filter(|m| !has_direction(*m, PortDirection::Output))
                .count(),
            isolated_modules: isolated.len(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        let topo_order: Vec<ModuleId> = topo.into_iter().map(|i| ModuleId(i as u32)).collect();
        let start_order = topo_order.iter().rev().copied().collect();
        Ok(CompiledPlan {
            topo_order,
            start_order,
            warnings,
            stats,
        })
    }

    /// Kahn's algorithm; ties resolved by module index.
    fn topological_sort(adj: &[Vec<usize>], mut in_degree: Vec<usize>) -> Vec<usize> {
        let mut queue: VecDeque<usize> = (0..adj.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut result = Vec::with_capacity(adj.len());

        while let Some(node) = queue.pop_front() {
            result.push(node);
            for &neighbor in &adj[node] {
                in_degree[neighbor] -= 1;
                if in_degree[neighbor] == 0 {
                    queue.push_back(neighbor);
                }
            }
        }

        result
    }
}
