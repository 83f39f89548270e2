//! Mirrored adjacency view over the relation matrix.
//!
//! The weight matrix is the source of truth for edge weights; this view keeps
//! the nonzero structure as sorted neighbor lists so topological queries
//! (neighbors, degree, components) stay cheap for external analysis code.
//! Every mutation of the matrix updates this mirror in the same call, so the
//! two representations never drift apart.

use crate::graph::ConceptId;

#[derive(Debug, Clone, Default)]
pub struct Topology {
    // adjacency[i] is sorted ascending; an edge appears in both endpoints.
    adjacency: Vec<Vec<ConceptId>>,
    edge_count: usize,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(n: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); n],
            edge_count: 0,
        }
    }

    /// Number of nodes tracked by the view.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Register one more node (called when a concept is added).
    pub fn push_node(&mut self) {
        self.adjacency.push(Vec::new());
    }

    pub fn has_edge(&self, a: ConceptId, b: ConceptId) -> bool {
        self.adjacency
            .get(a)
            .map(|n| n.binary_search(&b).is_ok())
            .unwrap_or(false)
    }

    /// Insert the undirected edge a-b. No-op if already present.
    pub fn set_edge(&mut self, a: ConceptId, b: ConceptId) {
        debug_assert!(a != b, "self-loops are rejected upstream");
        if Self::insert_sorted(&mut self.adjacency[a], b) {
            Self::insert_sorted(&mut self.adjacency[b], a);
            self.edge_count += 1;
        }
    }

    /// Remove the undirected edge a-b. No-op if absent.
    pub fn clear_edge(&mut self, a: ConceptId, b: ConceptId) {
        if Self::remove_sorted(&mut self.adjacency[a], b) {
            Self::remove_sorted(&mut self.adjacency[b], a);
            self.edge_count -= 1;
        }
    }

    /// Neighbors of `id`, ascending. Empty slice for out-of-range ids.
    pub fn neighbors(&self, id: ConceptId) -> &[ConceptId] {
        self.adjacency.get(id).map(|n| n.as_slice()).unwrap_or(&[])
    }

    pub fn degree(&self, id: ConceptId) -> usize {
        self.neighbors(id).len()
    }

    /// Fraction of possible undirected edges that exist.
    pub fn density(&self) -> f32 {
        let n = self.adjacency.len();
        if n < 2 {
            return 0.0;
        }
        let possible = n * (n - 1) / 2;
        self.edge_count as f32 / possible as f32
    }

    /// Connected components, each sorted ascending; components ordered by
    /// their smallest member. Isolated nodes form singleton components.
    pub fn components(&self) -> Vec<Vec<ConceptId>> {
        let n = self.adjacency.len();
        let mut seen = vec![false; n];
        let mut out = Vec::new();
        let mut queue = Vec::new();

        for start in 0..n {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            queue.push(start);
            let mut component = Vec::new();
            while let Some(id) = queue.pop() {
                component.push(id);
                for &next in &self.adjacency[id] {
                    if !seen[next] {
                        seen[next] = true;
                        queue.push(next);
                    }
                }
            }
            component.sort_unstable();
            out.push(component);
        }
        out
    }

    fn insert_sorted(list: &mut Vec<ConceptId>, v: ConceptId) -> bool {
        match list.binary_search(&v) {
            Ok(_) => false,
            Err(pos) => {
                list.insert(pos, v);
                true
            }
        }
    }

    fn remove_sorted(list: &mut Vec<ConceptId>, v: ConceptId) -> bool {
        match list.binary_search(&v) {
            Ok(pos) => {
                list.remove(pos);
                true
            }
            Err(_) => false,
        }
    }
}
