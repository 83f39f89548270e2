use serde::Serialize;

use crate::graph::{ConceptGraph, Diagnostics};

/// A read-only snapshot of the engine for external metrics/dashboard code.
///
/// Design intent:
/// - Observers cannot mutate or steer the graph.
/// - Snapshotting is *on-demand* and can allocate; the engine's hot paths
///   stay unchanged.
/// - Only aggregates and rankings are exposed, never the internal arrays.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub diagnostics: Diagnostics,
    /// Strongest concepts by accumulated activation strength, descending.
    pub strongest: Vec<(String, f32)>,
    /// Best-connected concepts by relation degree, descending.
    pub hubs: Vec<(String, usize)>,
}

pub struct GraphAdapter<'a> {
    graph: &'a ConceptGraph,
}

impl<'a> GraphAdapter<'a> {
    pub fn new(graph: &'a ConceptGraph) -> Self {
        Self { graph }
    }

    pub fn snapshot(&self, top_n: usize) -> GraphSnapshot {
        let mut strongest: Vec<(String, f32)> = Vec::new();
        let mut hubs: Vec<(String, usize)> = Vec::new();

        for (id, name) in self.graph.concept_names().enumerate() {
            let view = match self.graph.get(name) {
                Ok(v) => v,
                Err(_) => continue,
            };
            strongest.push((name.to_string(), view.strength));
            hubs.push((name.to_string(), self.graph.topology().degree(id)));
        }

        strongest.sort_by(|a, b| b.1.total_cmp(&a.1));
        strongest.truncate(top_n);
        hubs.sort_by(|a, b| b.1.cmp(&a.1));
        hubs.truncate(top_n);

        GraphSnapshot {
            diagnostics: self.graph.diagnostics(),
            strongest,
            hubs,
        }
    }
}
