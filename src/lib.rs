//! # noema
//!
//! Concept graph engine for a simulated organism: fuzzy concepts stored as
//! uncertain vectors, connected by probabilistic self-modifying relations.
//!
//! The engine is embedded, synchronous and single-writer. Callers drive it
//! with a small set of operations: grow the vocabulary (`add_concept`,
//! `relate`), diffuse attention (`activate`), let the graph rewire itself
//! (`auto_modify`), query associations (`similar`), and persist the whole
//! structure (`save`/`load`).
//!
//! ## Quick Start
//!
//! ```
//! use noema::prelude::*;
//!
//! let mut graph = ConceptGraph::new(GraphConfig::default().with_seed(42));
//!
//! let food = vec![1.0; CONCEPT_DIMS];
//! let water = vec![0.8; CONCEPT_DIMS];
//! graph.add_concept("food", &food, 0.2, "drive").unwrap();
//! graph.add_concept("water", &water, 0.3, "drive").unwrap();
//! graph.relate("food", "water", None).unwrap();
//!
//! let trajectory = graph.activate("food", 3, 0.1).unwrap();
//! let active = graph.active_set(trajectory.last().unwrap());
//! graph.auto_modify(&active, &ModifyParams::default());
//!
//! let neighbors = graph.similar("food", 5).unwrap();
//! let blob = graph.save();
//! let restored = ConceptGraph::load(&blob).unwrap();
//! # let _ = (neighbors, restored);
//! ```
//!
//! ## Modules
//!
//! - [`graph`]: The engine: concept store, relation matrix, propagation,
//!   auto-modification, similarity, persistence.
//! - [`topology`]: Structural mirror of the relation matrix.
//! - [`observer`]: Read-only snapshot adapters for metrics/dashboards.
//! - [`prng`]: Seeded PRNG for reproducible stochastic behavior.
//! - [`storage`]: Chunked binary image primitives.

#[path = "core/error.rs"]
pub mod error;

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/storage.rs"]
pub mod storage;

#[path = "core/topology.rs"]
pub mod topology;

#[path = "core/graph.rs"]
pub mod graph;

pub mod observer;

/// Prelude module for convenient imports.
///
/// ```
/// use noema::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{GraphError, Result};
    pub use crate::graph::{
        ConceptGraph, ConceptId, ConceptView, Diagnostics, GraphConfig, ModifyParams,
        CONCEPT_DIMS,
    };
    pub use crate::observer::{GraphAdapter, GraphSnapshot};
    pub use crate::topology::Topology;
}
