//! The concept graph engine.
//!
//! Concepts live in columnar arrays indexed by a dense `ConceptId`; relations
//! live in a dense symmetric weight matrix over the same index space, mirrored
//! into a [`Topology`] view for structural queries. Activation is a stochastic
//! max-accumulation diffusion over the matrix; auto-modification is a Hebbian
//! rewiring pass over the currently active set.
//!
//! Design intent:
//! - One engine instance per organism, passed by handle; no globals.
//! - Single-threaded, call-and-return. Callers that expose the engine behind
//!   a service serialize access themselves (one writer, whole-call units).
//! - All randomness flows through one seeded PRNG so runs are reproducible.

use std::collections::VecDeque;
use std::io::{self, Read, Write};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::prng::Prng;
use crate::storage;
use crate::topology::Topology;

pub type ConceptId = usize;

/// Dimensionality of concept vectors.
pub const CONCEPT_DIMS: usize = 15;

/// Normalization floor for activation vectors.
const ACTIVATION_EPSILON: f32 = 1e-10;

/// Tuning knobs for the engine.
///
/// These are prototype constants, not invariants; change them freely per
/// organism. `seed` makes every stochastic operation reproducible.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Initial slot capacity for all parallel arrays. Grows by doubling.
    pub initial_capacity: usize,
    /// Maximum retained `current_vector` snapshots per concept.
    pub history_limit: usize,
    /// Activation above this participates in propagation and rewiring.
    pub active_threshold: f32,
    pub default_steps: usize,
    pub default_temperature: f32,
    /// Chance an existing edge between co-active concepts is reinforced.
    pub reinforce_prob: f32,
    /// Chance a missing edge between co-active concepts is created.
    pub create_prob: f32,
    /// Base weight increment for reinforcement.
    pub reinforce_delta: f32,
    /// Scale of uncertainty-driven drift of current vectors after activation.
    pub drift_rate: f32,
    pub seed: Option<u64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            history_limit: 10,
            active_threshold: 0.1,
            default_steps: 3,
            default_temperature: 0.1,
            reinforce_prob: 0.5,
            create_prob: 0.3,
            reinforce_delta: 0.05,
            drift_rate: 0.02,
            seed: None,
        }
    }
}

impl GraphConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity.max(1);
        self
    }

    pub fn with_active_threshold(mut self, threshold: f32) -> Self {
        self.active_threshold = threshold;
        self
    }

    /// Auto-modification parameters derived from this configuration.
    pub fn modify_params(&self) -> ModifyParams {
        ModifyParams {
            reinforce_prob: self.reinforce_prob,
            create_prob: self.create_prob,
            reinforce_delta: self.reinforce_delta,
        }
    }
}

/// Parameters for one [`ConceptGraph::auto_modify`] call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModifyParams {
    pub reinforce_prob: f32,
    pub create_prob: f32,
    pub reinforce_delta: f32,
}

impl Default for ModifyParams {
    fn default() -> Self {
        GraphConfig::default().modify_params()
    }
}

/// Read-only projection of one concept.
#[derive(Debug, Clone, Copy)]
pub struct ConceptView<'a> {
    pub name: &'a str,
    pub index: ConceptId,
    pub base: &'a [f32],
    pub current: &'a [f32],
    pub uncertainty: f32,
    pub strength: f32,
    pub activation_count: u64,
    pub last_activation_step: u64,
    pub category: &'a str,
    pub external_links: u32,
    pub history_len: usize,
}

/// Aggregate counters exposed to callers (metrics, dashboards).
///
/// Callers never see internal arrays; this is the whole observable surface
/// besides activation trajectories and similarity rankings.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub concept_count: usize,
    pub relation_count: usize,
    pub capacity: usize,
    pub step_clock: u64,
    /// Mean weight over existing edges; 0.0 when there are none.
    pub avg_weight: f32,
    pub avg_uncertainty: f32,
}

pub struct ConceptGraph {
    cfg: GraphConfig,

    // Columnar concept store, all numeric slabs sized to `capacity`.
    names: Vec<String>,
    index_of: HashMap<String, ConceptId>,
    base: Vec<f32>,    // capacity * CONCEPT_DIMS, flat
    current: Vec<f32>, // capacity * CONCEPT_DIMS, flat
    uncertainty: Vec<f32>,
    strength: Vec<f32>,
    activation_count: Vec<u64>,
    last_activation_step: Vec<u64>,
    external_links: Vec<u32>,
    category: Vec<String>,
    history: Vec<VecDeque<Vec<f32>>>,

    // Dense symmetric relation matrix, row-major with stride `capacity`,
    // plus the structural mirror.
    weights: Vec<f32>,
    topology: Topology,

    capacity: usize,
    count: usize,

    rng: Prng,
    step_clock: u64,
}

impl ConceptGraph {
    pub fn new(cfg: GraphConfig) -> Self {
        let capacity = cfg.initial_capacity.max(1);
        let rng = Prng::new(cfg.seed.unwrap_or(1));

        Self {
            cfg,
            names: Vec::new(),
            index_of: HashMap::new(),
            base: vec![0.0; capacity * CONCEPT_DIMS],
            current: vec![0.0; capacity * CONCEPT_DIMS],
            uncertainty: vec![0.0; capacity],
            strength: vec![0.0; capacity],
            activation_count: vec![0; capacity],
            last_activation_step: vec![0; capacity],
            external_links: vec![0; capacity],
            category: Vec::new(),
            history: Vec::new(),
            weights: vec![0.0; capacity * capacity],
            topology: Topology::new(),
            capacity,
            count: 0,
            rng,
            step_clock: 0,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.cfg
    }

    pub fn concept_count(&self) -> usize {
        self.count
    }

    pub fn relation_count(&self) -> usize {
        self.topology.edge_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of.contains_key(name)
    }

    pub fn concept_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|s| s.as_str())
    }

    /// Monotonic activation clock; each `activate` call is one tick.
    pub fn step_clock(&self) -> u64 {
        self.step_clock
    }

    /// Structural view over the relations (read-only).
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    // ------------------------------------------------------------------
    // Concept store
    // ------------------------------------------------------------------

    /// Register a new concept and return its dense index.
    ///
    /// May grow every parallel structure (geometric doubling); indices of
    /// existing concepts are preserved across growth.
    pub fn add_concept(
        &mut self,
        name: &str,
        base_vector: &[f32],
        uncertainty: f32,
        category: &str,
    ) -> Result<ConceptId> {
        if self.index_of.contains_key(name) {
            return Err(GraphError::DuplicateName(name.to_string()));
        }
        if base_vector.len() != CONCEPT_DIMS {
            return Err(GraphError::DimensionMismatch {
                expected: CONCEPT_DIMS,
                got: base_vector.len(),
            });
        }

        if self.count == self.capacity {
            self.grow();
        }

        let id = self.count;
        let d = CONCEPT_DIMS;
        self.base[id * d..(id + 1) * d].copy_from_slice(base_vector);
        self.current[id * d..(id + 1) * d].copy_from_slice(base_vector);
        self.uncertainty[id] = uncertainty.max(0.0);
        self.strength[id] = 0.0;
        self.activation_count[id] = 0;
        self.last_activation_step[id] = 0;
        self.external_links[id] = 0;
        self.names.push(name.to_string());
        self.category.push(category.to_string());
        self.history.push(VecDeque::new());
        self.index_of.insert(name.to_string(), id);
        self.topology.push_node();
        self.count += 1;

        Ok(id)
    }

    /// Read-only projection of a concept.
    pub fn get(&self, name: &str) -> Result<ConceptView<'_>> {
        let id = self.index(name)?;
        let d = CONCEPT_DIMS;
        Ok(ConceptView {
            name: &self.names[id],
            index: id,
            base: &self.base[id * d..(id + 1) * d],
            current: &self.current[id * d..(id + 1) * d],
            uncertainty: self.uncertainty[id],
            strength: self.strength[id],
            activation_count: self.activation_count[id],
            last_activation_step: self.last_activation_step[id],
            category: &self.category[id],
            external_links: self.external_links[id],
            history_len: self.history[id].len(),
        })
    }

    /// Past `current_vector` snapshots, oldest first.
    pub fn history<'a>(&'a self, name: &str) -> Result<impl Iterator<Item = &'a [f32]> + 'a> {
        let id = self.index(name)?;
        Ok(self.history[id].iter().map(|v| v.as_slice()))
    }

    /// Bump the external-knowledge link counter for a concept.
    pub fn record_external_link(&mut self, name: &str) -> Result<()> {
        let id = self.index(name)?;
        self.external_links[id] = self.external_links[id].saturating_add(1);
        Ok(())
    }

    // Double every parallel structure. The flat vector slabs key off
    // `id * CONCEPT_DIMS`, so a plain resize preserves them; the matrix
    // strides by `capacity` and must be re-laid-out row by row.
    fn grow(&mut self) {
        let old_capacity = self.capacity;
        let new_capacity = old_capacity * 2;

        self.base.resize(new_capacity * CONCEPT_DIMS, 0.0);
        self.current.resize(new_capacity * CONCEPT_DIMS, 0.0);
        self.uncertainty.resize(new_capacity, 0.0);
        self.strength.resize(new_capacity, 0.0);
        self.activation_count.resize(new_capacity, 0);
        self.last_activation_step.resize(new_capacity, 0);
        self.external_links.resize(new_capacity, 0);

        let mut weights = vec![0.0; new_capacity * new_capacity];
        for i in 0..self.count {
            let src = &self.weights[i * old_capacity..i * old_capacity + self.count];
            weights[i * new_capacity..i * new_capacity + self.count].copy_from_slice(src);
        }
        self.weights = weights;
        self.capacity = new_capacity;
    }

    fn index(&self, name: &str) -> Result<ConceptId> {
        self.index_of
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::NotFound(name.to_string()))
    }

    // ------------------------------------------------------------------
    // Relation matrix
    // ------------------------------------------------------------------

    /// Set the undirected relation between two concepts.
    ///
    /// With `weight: None` the weight is the cosine similarity of the two
    /// current vectors rescaled to [0, 1]. An explicit weight of 0 removes
    /// the edge (zero is semantic sparsity, not a stored value).
    pub fn relate(&mut self, name1: &str, name2: &str, weight: Option<f32>) -> Result<()> {
        if name1 == name2 {
            return Err(GraphError::InvalidRelation(format!(
                "self-loop on '{name1}'"
            )));
        }
        let i = self.index(name1)?;
        let j = self.index(name2)?;

        let w = match weight {
            Some(w) => {
                if !w.is_finite() || !(0.0..=1.0).contains(&w) {
                    return Err(GraphError::InvalidRelation(format!(
                        "weight {w} outside [0, 1]"
                    )));
                }
                w
            }
            None => {
                let d = CONCEPT_DIMS;
                let a = &self.current[i * d..(i + 1) * d];
                let b = &self.current[j * d..(j + 1) * d];
                // Rescale cosine from [-1, 1] into [0, 1].
                ((cosine(a, b) + 1.0) * 0.5).clamp(0.0, 1.0)
            }
        };

        self.set_weight(i, j, w);
        Ok(())
    }

    /// Remove the relation between two concepts, if any.
    pub fn unrelate(&mut self, name1: &str, name2: &str) -> Result<()> {
        if name1 == name2 {
            return Err(GraphError::InvalidRelation(format!(
                "self-loop on '{name1}'"
            )));
        }
        let i = self.index(name1)?;
        let j = self.index(name2)?;
        self.set_weight(i, j, 0.0);
        Ok(())
    }

    /// Current weight between two concepts; 0.0 means no edge.
    pub fn weight(&self, name1: &str, name2: &str) -> Result<f32> {
        let i = self.index(name1)?;
        let j = self.index(name2)?;
        if i == j {
            return Ok(0.0);
        }
        Ok(self.weights[i * self.capacity + j])
    }

    // Writes both matrix triangles and the topology mirror in one step, so
    // the two representations are never observably out of sync.
    fn set_weight(&mut self, i: ConceptId, j: ConceptId, w: f32) {
        self.weights[i * self.capacity + j] = w;
        self.weights[j * self.capacity + i] = w;
        if w > 0.0 {
            self.topology.set_edge(i, j);
        } else {
            self.topology.clear_edge(i, j);
        }
    }

    // ------------------------------------------------------------------
    // Activation propagation
    // ------------------------------------------------------------------

    /// Diffuse activation from a seed concept for `steps` steps.
    ///
    /// Returns `steps + 1` snapshots of length `concept_count`, the one-hot
    /// seed state first. Per step, every concept above the active threshold
    /// pushes `activation * weight * Uniform(1-t, 1+t)` to its neighbors;
    /// incoming values max-accumulate (multiple paths never inflate past the
    /// strongest contributor). The vector is then sum-normalized, jittered
    /// with `N(0, t/2)`, and clamped to [0, 1].
    ///
    /// `temperature == 0.0` makes the whole call deterministic.
    pub fn activate(
        &mut self,
        seed_name: &str,
        steps: usize,
        temperature: f32,
    ) -> Result<Vec<Vec<f32>>> {
        let seed = self.index(seed_name)?;
        let n = self.count;
        let threshold = self.cfg.active_threshold;

        let mut act = vec![0.0f32; n];
        act[seed] = 1.0;

        let mut trajectory = Vec::with_capacity(steps + 1);
        trajectory.push(act.clone());

        let mut active: Vec<ConceptId> = Vec::new();
        for _ in 0..steps {
            active.clear();
            active.extend((0..n).filter(|&i| act[i] > threshold));

            let mut next = act.clone();
            for &i in &active {
                let source = act[i];
                // Contiguous row scan: the hot path stays a slice walk over
                // the active sub-matrix instead of per-pair lookups.
                let row = &self.weights[i * self.capacity..i * self.capacity + n];
                for (j, &w) in row.iter().enumerate() {
                    if w <= 0.0 || j == i {
                        continue;
                    }
                    let noise = self.rng.gen_range_f32(1.0 - temperature, 1.0 + temperature);
                    let candidate = source * w * noise;
                    if candidate > next[j] {
                        next[j] = candidate;
                    }
                }
            }

            let sum: f32 = next.iter().sum();
            let inv = 1.0 / (sum + ACTIVATION_EPSILON);
            for v in &mut next {
                *v *= inv;
            }

            let sigma = temperature * 0.5;
            if sigma > 0.0 {
                for v in &mut next {
                    *v += self.rng.gen_gaussian(sigma);
                }
            }
            for v in &mut next {
                *v = v.clamp(0.0, 1.0);
            }

            trajectory.push(next.clone());
            act = next;
        }

        self.step_clock += 1;
        self.note_activation(&act);

        Ok(trajectory)
    }

    /// [`activate`](Self::activate) with the configured step count and
    /// temperature.
    pub fn activate_default(&mut self, seed_name: &str) -> Result<Vec<Vec<f32>>> {
        self.activate(seed_name, self.cfg.default_steps, self.cfg.default_temperature)
    }

    /// Indices of `activation` entries above the active threshold, suitable
    /// for feeding into [`auto_modify`](Self::auto_modify).
    pub fn active_set(&self, activation: &[f32]) -> Vec<ConceptId> {
        activation
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > self.cfg.active_threshold)
            .map(|(i, _)| i)
            .collect()
    }

    // Bookkeeping for concepts left active after a propagation pass:
    // counters, a bounded history snapshot, and an uncertainty-scaled drift
    // of the current vector, bounded by renormalization.
    fn note_activation(&mut self, final_activation: &[f32]) {
        let d = CONCEPT_DIMS;
        for (i, &a) in final_activation.iter().enumerate() {
            if a <= self.cfg.active_threshold {
                continue;
            }
            self.activation_count[i] += 1;
            self.last_activation_step[i] = self.step_clock;
            self.strength[i] += a * 0.1;

            let snapshot = self.current[i * d..(i + 1) * d].to_vec();
            let slot = &mut self.history[i];
            if slot.len() == self.cfg.history_limit {
                slot.pop_front();
            }
            slot.push_back(snapshot);

            let sigma = self.cfg.drift_rate * self.uncertainty[i] * a;
            if sigma > 0.0 {
                let segment = &mut self.current[i * d..(i + 1) * d];
                for v in segment.iter_mut() {
                    *v += self.rng.gen_gaussian(sigma);
                }
                let norm = segment.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in segment.iter_mut() {
                        *v /= norm;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Auto-modification
    // ------------------------------------------------------------------

    /// Hebbian rewiring over the co-active set: existing edges are
    /// probabilistically reinforced, missing ones probabilistically created
    /// with a small random weight. O(k²) in the active-set size only.
    ///
    /// Out-of-range indices are ignored. Returns the number of edges touched.
    pub fn auto_modify(&mut self, active: &[ConceptId], params: &ModifyParams) -> usize {
        let mut ids: Vec<ConceptId> = active.iter().copied().filter(|&i| i < self.count).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut touched = 0;
        for x in 0..ids.len() {
            for y in x + 1..ids.len() {
                let (i, j) = (ids[x], ids[y]);
                let w = self.weights[i * self.capacity + j];
                if w > 0.0 {
                    // Fire together, wire together.
                    if self.rng.next_f32_01() < params.reinforce_prob {
                        let bump = params.reinforce_delta * self.rng.gen_range_f32(0.5, 1.5);
                        self.set_weight(i, j, (w + bump).min(1.0));
                        touched += 1;
                    }
                } else if self.rng.next_f32_01() < params.create_prob {
                    let w0 = self.rng.gen_range_f32(0.05, 0.15);
                    self.set_weight(i, j, w0);
                    touched += 1;
                }
            }
        }
        touched
    }

    // ------------------------------------------------------------------
    // Similarity
    // ------------------------------------------------------------------

    /// Nearest neighbors of a concept by cosine similarity of current
    /// vectors: descending score, ties broken by ascending index, self
    /// excluded, at most `min(top_k, concept_count - 1)` results.
    ///
    /// One pass over the columnar slab, O(N·D).
    pub fn similar(&self, name: &str, top_k: usize) -> Result<Vec<(String, f32)>> {
        let q = self.index(name)?;
        let d = CONCEPT_DIMS;
        let query = &self.current[q * d..(q + 1) * d];
        let query_norm = norm(query);

        let mut scored: Vec<(ConceptId, f32)> = Vec::with_capacity(self.count.saturating_sub(1));
        for j in 0..self.count {
            if j == q {
                continue;
            }
            let v = &self.current[j * d..(j + 1) * d];
            let denom = query_norm * norm(v);
            let score = if denom > 0.0 { dot(query, v) / denom } else { 0.0 };
            scored.push((j, score));
        }

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(j, score)| (self.names[j].clone(), score))
            .collect())
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn diagnostics(&self) -> Diagnostics {
        let relation_count = self.topology.edge_count();
        let mut weight_sum = 0.0;
        for i in 0..self.count {
            let row = &self.weights[i * self.capacity..i * self.capacity + self.count];
            for &w in &row[i + 1..] {
                weight_sum += w;
            }
        }
        let avg_weight = if relation_count > 0 {
            weight_sum / relation_count as f32
        } else {
            0.0
        };
        let avg_uncertainty = if self.count > 0 {
            self.uncertainty[..self.count].iter().sum::<f32>() / self.count as f32
        } else {
            0.0
        };

        Diagnostics {
            concept_count: self.count,
            relation_count,
            capacity: self.capacity,
            step_clock: self.step_clock,
            avg_weight,
            avg_uncertainty,
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Serialize the whole engine state into a byte blob.
    pub fn save(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.save_image_to(&mut bytes)
            .expect("writing to a Vec cannot fail");
        bytes
    }

    /// Rebuild an engine from a blob produced by [`save`](Self::save).
    ///
    /// Derived structures (name map, dense matrix, topology) are fully
    /// reconstructed before this returns; a half-loaded engine is never
    /// observable.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        Ok(Self::load_image_from(&mut io::Cursor::new(bytes))?)
    }

    /// Serialize a versioned, chunked graph image.
    pub fn save_image_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(storage::MAGIC)?;
        storage::write_u32_le(w, storage::VERSION_CURRENT)?;

        let mut buf = Vec::new();
        self.write_cfg_payload(&mut buf)?;
        storage::write_chunk(w, *b"CFG0", &buf)?;

        buf.clear();
        storage::write_u64_le(&mut buf, self.rng.state())?;
        storage::write_chunk(w, *b"PRNG", &buf)?;

        buf.clear();
        storage::write_u64_le(&mut buf, self.step_clock)?;
        storage::write_chunk(w, *b"STAT", &buf)?;

        buf.clear();
        self.write_concepts_payload(&mut buf)?;
        storage::write_chunk_lz4(w, *b"CNPT", &buf)?;

        buf.clear();
        self.write_relations_payload(&mut buf)?;
        storage::write_chunk_lz4(w, *b"RELS", &buf)?;

        Ok(())
    }

    /// Load a versioned, chunked graph image.
    ///
    /// Unknown chunks are skipped for forward-compatibility.
    pub fn load_image_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let magic = storage::read_exact::<8, _>(r)?;
        if &magic != storage::MAGIC {
            return Err(invalid("bad graph image magic"));
        }
        let version = storage::read_u32_le(r)?;
        if version != storage::VERSION_V1 {
            return Err(invalid("unsupported graph image version"));
        }

        let mut cfg: Option<GraphConfig> = None;
        let mut rng_state: Option<u64> = None;
        let mut step_clock: Option<u64> = None;
        let mut concepts: Option<Vec<ConceptRecord>> = None;
        let mut relations: Option<Vec<(u32, u32, f32)>> = None;

        loop {
            let (tag, len) = match storage::read_chunk_header(r) {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };

            let mut take = r.take(len as u64);
            match &tag {
                b"CFG0" => {
                    cfg = Some(Self::read_cfg_payload(&mut take)?);
                }
                b"PRNG" => {
                    rng_state = Some(storage::read_u64_le(&mut take)?);
                }
                b"STAT" => {
                    step_clock = Some(storage::read_u64_le(&mut take)?);
                }
                b"CNPT" => {
                    let payload = storage::read_chunk_lz4(&mut take)?;
                    concepts = Some(Self::read_concepts_payload(&mut io::Cursor::new(payload))?);
                }
                b"RELS" => {
                    let payload = storage::read_chunk_lz4(&mut take)?;
                    relations = Some(Self::read_relations_payload(&mut io::Cursor::new(payload))?);
                }
                _ => {
                    // Unknown chunk: skip.
                }
            }

            // Drain any remaining payload bytes for unknown or partially-read chunks.
            io::copy(&mut take, &mut io::sink())?;
        }

        let cfg = cfg.ok_or_else(|| invalid("missing CFG0"))?;
        let rng_state = rng_state.ok_or_else(|| invalid("missing PRNG"))?;
        let concepts = concepts.ok_or_else(|| invalid("missing CNPT"))?;
        let relations = relations.ok_or_else(|| invalid("missing RELS"))?;
        let step_clock = step_clock.unwrap_or(0);

        Self::assemble(cfg, rng_state, step_clock, concepts, relations)
    }

    // Rebuild all derived structures from the decoded chunks, validating
    // index consistency along the way.
    fn assemble(
        cfg: GraphConfig,
        rng_state: u64,
        step_clock: u64,
        concepts: Vec<ConceptRecord>,
        relations: Vec<(u32, u32, f32)>,
    ) -> io::Result<Self> {
        let count = concepts.len();
        let mut capacity = cfg.initial_capacity.max(1);
        while capacity < count {
            capacity *= 2;
        }

        let mut graph = Self {
            cfg,
            names: Vec::with_capacity(count),
            index_of: HashMap::with_capacity(count),
            base: vec![0.0; capacity * CONCEPT_DIMS],
            current: vec![0.0; capacity * CONCEPT_DIMS],
            uncertainty: vec![0.0; capacity],
            strength: vec![0.0; capacity],
            activation_count: vec![0; capacity],
            last_activation_step: vec![0; capacity],
            external_links: vec![0; capacity],
            category: Vec::with_capacity(count),
            history: Vec::with_capacity(count),
            weights: vec![0.0; capacity * capacity],
            topology: Topology::with_nodes(count),
            capacity,
            count,
            rng: Prng::from_state(rng_state),
            step_clock,
        };

        let d = CONCEPT_DIMS;
        for (id, rec) in concepts.into_iter().enumerate() {
            if graph.index_of.insert(rec.name.clone(), id).is_some() {
                return Err(invalid("duplicate concept name"));
            }
            graph.base[id * d..(id + 1) * d].copy_from_slice(&rec.base);
            graph.current[id * d..(id + 1) * d].copy_from_slice(&rec.current);
            graph.uncertainty[id] = rec.uncertainty;
            graph.strength[id] = rec.strength;
            graph.activation_count[id] = rec.activation_count;
            graph.last_activation_step[id] = rec.last_activation_step;
            graph.external_links[id] = rec.external_links;
            graph.names.push(rec.name);
            graph.category.push(rec.category);
            graph.history.push(rec.history);
        }

        for (i, j, w) in relations {
            let (i, j) = (i as usize, j as usize);
            if i >= j || j >= count {
                return Err(invalid("relation references an invalid index"));
            }
            if !w.is_finite() || w <= 0.0 || w > 1.0 {
                return Err(invalid("relation weight outside (0, 1]"));
            }
            graph.weights[i * capacity + j] = w;
            graph.weights[j * capacity + i] = w;
            graph.topology.set_edge(i, j);
        }

        Ok(graph)
    }

    fn write_cfg_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        storage::write_u32_le(w, self.cfg.initial_capacity as u32)?;
        storage::write_u32_le(w, self.cfg.history_limit as u32)?;
        storage::write_f32_le(w, self.cfg.active_threshold)?;
        storage::write_u32_le(w, self.cfg.default_steps as u32)?;
        storage::write_f32_le(w, self.cfg.default_temperature)?;
        storage::write_f32_le(w, self.cfg.reinforce_prob)?;
        storage::write_f32_le(w, self.cfg.create_prob)?;
        storage::write_f32_le(w, self.cfg.reinforce_delta)?;
        storage::write_f32_le(w, self.cfg.drift_rate)?;
        storage::write_u32_le(w, if self.cfg.seed.is_some() { 1 } else { 0 })?;
        storage::write_u64_le(w, self.cfg.seed.unwrap_or(0))?;
        Ok(())
    }

    fn read_cfg_payload<R: Read>(r: &mut R) -> io::Result<GraphConfig> {
        let initial_capacity = storage::read_u32_le(r)? as usize;
        let history_limit = storage::read_u32_le(r)? as usize;
        let active_threshold = storage::read_f32_le(r)?;
        let default_steps = storage::read_u32_le(r)? as usize;
        let default_temperature = storage::read_f32_le(r)?;
        let reinforce_prob = storage::read_f32_le(r)?;
        let create_prob = storage::read_f32_le(r)?;
        let reinforce_delta = storage::read_f32_le(r)?;
        let drift_rate = storage::read_f32_le(r)?;
        let seed_present = storage::read_u32_le(r)?;
        let seed = storage::read_u64_le(r)?;

        Ok(GraphConfig {
            initial_capacity,
            history_limit,
            active_threshold,
            default_steps,
            default_temperature,
            reinforce_prob,
            create_prob,
            reinforce_delta,
            drift_rate,
            seed: if seed_present != 0 { Some(seed) } else { None },
        })
    }

    fn write_concepts_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let d = CONCEPT_DIMS;
        storage::write_u32_le(w, self.count as u32)?;
        storage::write_u32_le(w, d as u32)?;
        for id in 0..self.count {
            storage::write_string(w, &self.names[id])?;
            storage::write_string(w, &self.category[id])?;
            for &v in &self.base[id * d..(id + 1) * d] {
                storage::write_f32_le(w, v)?;
            }
            for &v in &self.current[id * d..(id + 1) * d] {
                storage::write_f32_le(w, v)?;
            }
            storage::write_f32_le(w, self.uncertainty[id])?;
            storage::write_f32_le(w, self.strength[id])?;
            storage::write_u64_le(w, self.activation_count[id])?;
            storage::write_u64_le(w, self.last_activation_step[id])?;
            storage::write_u32_le(w, self.external_links[id])?;
            storage::write_u32_le(w, self.history[id].len() as u32)?;
            for snapshot in &self.history[id] {
                for &v in snapshot {
                    storage::write_f32_le(w, v)?;
                }
            }
        }
        Ok(())
    }

    fn read_concepts_payload<R: Read>(r: &mut R) -> io::Result<Vec<ConceptRecord>> {
        let count = storage::read_u32_le(r)? as usize;
        let dims = storage::read_u32_le(r)? as usize;
        if dims != CONCEPT_DIMS {
            return Err(invalid("concept vector dimension mismatch"));
        }

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let name = storage::read_string(r)?;
            let category = storage::read_string(r)?;
            let base = read_f32_vec(r, dims)?;
            let current = read_f32_vec(r, dims)?;
            let uncertainty = storage::read_f32_le(r)?;
            let strength = storage::read_f32_le(r)?;
            let activation_count = storage::read_u64_le(r)?;
            let last_activation_step = storage::read_u64_le(r)?;
            let external_links = storage::read_u32_le(r)?;
            let history_len = storage::read_u32_le(r)? as usize;
            let mut history = VecDeque::with_capacity(history_len);
            for _ in 0..history_len {
                history.push_back(read_f32_vec(r, dims)?);
            }
            out.push(ConceptRecord {
                name,
                category,
                base,
                current,
                uncertainty,
                strength,
                activation_count,
                last_activation_step,
                external_links,
                history,
            });
        }
        Ok(out)
    }

    // Sparse on disk even though the in-memory matrix is dense: only the
    // nonzero upper triangle is written, ascending (i, j).
    fn write_relations_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        storage::write_u32_le(w, self.topology.edge_count() as u32)?;
        for i in 0..self.count {
            let row = &self.weights[i * self.capacity..i * self.capacity + self.count];
            for (j, &weight) in row.iter().enumerate().skip(i + 1) {
                if weight > 0.0 {
                    storage::write_u32_le(w, i as u32)?;
                    storage::write_u32_le(w, j as u32)?;
                    storage::write_f32_le(w, weight)?;
                }
            }
        }
        Ok(())
    }

    fn read_relations_payload<R: Read>(r: &mut R) -> io::Result<Vec<(u32, u32, f32)>> {
        let count = storage::read_u32_le(r)? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let i = storage::read_u32_le(r)?;
            let j = storage::read_u32_le(r)?;
            let w = storage::read_f32_le(r)?;
            out.push((i, j, w));
        }
        Ok(out)
    }
}

struct ConceptRecord {
    name: String,
    category: String,
    base: Vec<f32>,
    current: Vec<f32>,
    uncertainty: f32,
    strength: f32,
    activation_count: u64,
    last_activation_step: u64,
    external_links: u32,
    history: VecDeque<Vec<f32>>,
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn read_f32_vec<R: Read>(r: &mut R, n: usize) -> io::Result<Vec<f32>> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(storage::read_f32_le(r)?);
    }
    Ok(out)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let denom = norm(a) * norm(b);
    if denom > 0.0 {
        dot(a, b) / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; CONCEPT_DIMS];
        v[axis % CONCEPT_DIMS] = 1.0;
        v
    }

    fn test_cfg() -> GraphConfig {
        GraphConfig::default().with_seed(42)
    }

    fn abc_graph() -> ConceptGraph {
        let mut g = ConceptGraph::new(test_cfg());
        g.add_concept("A", &basis(0), 0.2, "test").unwrap();
        g.add_concept("B", &basis(1), 0.2, "test").unwrap();
        g.add_concept("C", &basis(2), 0.2, "test").unwrap();
        g.relate("A", "B", Some(0.9)).unwrap();
        g.relate("B", "C", Some(0.8)).unwrap();
        g
    }

    #[test]
    fn indices_are_dense_and_bijective() {
        let mut g = ConceptGraph::new(test_cfg());
        for i in 0..10 {
            let id = g
                .add_concept(&format!("c{i}"), &basis(i), 0.1, "cat")
                .unwrap();
            assert_eq!(id, i);
        }
        assert_eq!(g.concept_count(), 10);
        for i in 0..10 {
            let view = g.get(&format!("c{i}")).unwrap();
            assert_eq!(view.index, i);
            assert_eq!(view.name, format!("c{i}"));
        }
    }

    #[test]
    fn duplicate_name_is_rejected_without_mutation() {
        let mut g = ConceptGraph::new(test_cfg());
        g.add_concept("food", &basis(0), 0.1, "drive").unwrap();
        let err = g.add_concept("food", &basis(1), 0.1, "drive").unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName(_)));
        assert_eq!(g.concept_count(), 1);
        assert_eq!(g.get("food").unwrap().base, basis(0).as_slice());
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut g = ConceptGraph::new(test_cfg());
        let err = g.add_concept("short", &[1.0, 2.0], 0.1, "x").unwrap_err();
        assert!(matches!(
            err,
            GraphError::DimensionMismatch {
                expected: CONCEPT_DIMS,
                got: 2
            }
        ));
    }

    #[test]
    fn unknown_names_fail_with_not_found() {
        let mut g = abc_graph();
        assert!(matches!(g.get("missing"), Err(GraphError::NotFound(_))));
        assert!(matches!(
            g.relate("A", "missing", Some(0.5)),
            Err(GraphError::NotFound(_))
        ));
        assert!(matches!(
            g.activate("missing", 1, 0.0),
            Err(GraphError::NotFound(_))
        ));
        assert!(matches!(g.similar("missing", 3), Err(GraphError::NotFound(_))));
    }

    #[test]
    fn relations_are_symmetric_and_mirrored() {
        let g = abc_graph();
        assert_eq!(g.weight("A", "B").unwrap(), 0.9);
        assert_eq!(g.weight("B", "A").unwrap(), 0.9);
        assert_eq!(g.relation_count(), 2);
        assert!(g.topology().has_edge(0, 1));
        assert!(g.topology().has_edge(1, 2));
        assert!(!g.topology().has_edge(0, 2));

        // Diagonal is never set.
        for i in 0..g.concept_count() {
            assert_eq!(g.weights[i * g.capacity + i], 0.0);
        }
    }

    #[test]
    fn self_loops_always_fail() {
        let mut g = abc_graph();
        assert!(matches!(
            g.relate("A", "A", Some(0.5)),
            Err(GraphError::InvalidRelation(_))
        ));
        assert!(matches!(
            g.relate("A", "A", None),
            Err(GraphError::InvalidRelation(_))
        ));
    }

    #[test]
    fn out_of_range_weight_is_invalid() {
        let mut g = abc_graph();
        assert!(matches!(
            g.relate("A", "C", Some(1.5)),
            Err(GraphError::InvalidRelation(_))
        ));
        assert!(matches!(
            g.relate("A", "C", Some(-0.1)),
            Err(GraphError::InvalidRelation(_))
        ));
        assert!(matches!(
            g.relate("A", "C", Some(f32::NAN)),
            Err(GraphError::InvalidRelation(_))
        ));
    }

    #[test]
    fn default_weight_is_rescaled_cosine() {
        let mut g = ConceptGraph::new(test_cfg());
        g.add_concept("x", &basis(0), 0.1, "t").unwrap();
        g.add_concept("y", &basis(0), 0.1, "t").unwrap();
        g.add_concept("z", &basis(1), 0.1, "t").unwrap();

        // Identical vectors: cosine 1 -> weight 1.
        g.relate("x", "y", None).unwrap();
        assert!((g.weight("x", "y").unwrap() - 1.0).abs() < 1e-6);

        // Orthogonal vectors: cosine 0 -> weight 0.5.
        g.relate("x", "z", None).unwrap();
        assert!((g.weight("x", "z").unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unrelate_clears_matrix_and_mirror() {
        let mut g = abc_graph();
        g.unrelate("A", "B").unwrap();
        assert_eq!(g.weight("A", "B").unwrap(), 0.0);
        assert!(!g.topology().has_edge(0, 1));
        assert_eq!(g.relation_count(), 1);
    }

    #[test]
    fn zero_steps_returns_one_hot_seed() {
        let mut g = abc_graph();
        let trajectory = g.activate("B", 0, 0.3).unwrap();
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory[0], vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn deterministic_max_propagation_one_step() {
        // A-B=0.9, B-C=0.8, A-C absent. Seeding A at temperature 0 must give
        // exactly normalize([1.0, 0.9, 0.0]) after one step: only A is in the
        // active frontier, and B receives its single strongest contribution.
        let mut g = abc_graph();
        let trajectory = g.activate("A", 1, 0.0).unwrap();
        assert_eq!(trajectory.len(), 2);
        assert_eq!(trajectory[0], vec![1.0, 0.0, 0.0]);

        let step = &trajectory[1];
        assert!((step[0] - 1.0 / 1.9).abs() < 1e-4);
        assert!((step[1] - 0.9 / 1.9).abs() < 1e-4);
        assert_eq!(step[2], 0.0);
        // Max-accumulation, not summation: the ratio is exactly the weight.
        assert!((step[1] / step[0] - 0.9).abs() < 1e-5);
    }

    #[test]
    fn second_step_reaches_two_hop_neighbors() {
        let mut g = abc_graph();
        let trajectory = g.activate("A", 2, 0.0).unwrap();
        // After step one B is active (0.9/1.9 > 0.1), so step two reaches C.
        assert!(trajectory[2][2] > 0.0);
    }

    #[test]
    fn activation_stays_in_unit_interval() {
        let mut g = abc_graph();
        g.relate("A", "C", Some(0.7)).unwrap();
        for temperature in [0.0, 0.1, 0.5, 1.0] {
            let trajectory = g.activate("A", 5, temperature).unwrap();
            assert_eq!(trajectory.len(), 6);
            for snapshot in &trajectory {
                for &v in snapshot {
                    assert!((0.0..=1.0).contains(&v), "value {v} out of range");
                }
            }
        }
    }

    #[test]
    fn fixed_seed_reproduces_trajectories() {
        let run = |seed: u64| {
            let mut g = ConceptGraph::new(GraphConfig::default().with_seed(seed));
            g.add_concept("A", &basis(0), 0.2, "t").unwrap();
            g.add_concept("B", &basis(1), 0.2, "t").unwrap();
            g.relate("A", "B", Some(0.9)).unwrap();
            g.activate("A", 4, 0.2).unwrap()
        };
        assert_eq!(run(7), run(7));
        assert_ne!(run(7), run(8));
    }

    #[test]
    fn activation_updates_bookkeeping_and_history() {
        let mut g = abc_graph();
        g.activate("A", 1, 0.0).unwrap();
        let a = g.get("A").unwrap();
        assert_eq!(a.activation_count, 1);
        assert_eq!(a.last_activation_step, 1);
        assert!(a.strength > 0.0);
        assert_eq!(a.history_len, 1);
        let snapshots: Vec<&[f32]> = g.history("A").unwrap().collect();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].len(), CONCEPT_DIMS);
        // C never crossed the threshold.
        let c = g.get("C").unwrap();
        assert_eq!(c.activation_count, 0);
        assert_eq!(c.history_len, 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut cfg = test_cfg();
        cfg.history_limit = 3;
        let mut g = ConceptGraph::new(cfg);
        g.add_concept("A", &basis(0), 0.2, "t").unwrap();
        for _ in 0..10 {
            g.activate("A", 1, 0.0).unwrap();
        }
        assert_eq!(g.get("A").unwrap().history_len, 3);
    }

    #[test]
    fn growth_preserves_indices_vectors_and_weights() {
        let cfg = GraphConfig::default()
            .with_seed(1)
            .with_initial_capacity(4);
        let mut g = ConceptGraph::new(cfg);
        for i in 0..4 {
            g.add_concept(&format!("c{i}"), &basis(i), 0.1, "t").unwrap();
        }
        g.relate("c0", "c1", Some(0.7)).unwrap();
        g.relate("c2", "c3", Some(0.4)).unwrap();
        assert_eq!(g.capacity(), 4);

        // The fifth concept triggers exactly one doubling.
        g.add_concept("c4", &basis(4), 0.1, "t").unwrap();
        assert_eq!(g.capacity(), 8);
        assert_eq!(g.concept_count(), 5);

        for i in 0..5 {
            let view = g.get(&format!("c{i}")).unwrap();
            assert_eq!(view.index, i);
            assert_eq!(view.base, basis(i).as_slice());
        }
        assert_eq!(g.weight("c0", "c1").unwrap(), 0.7);
        assert_eq!(g.weight("c2", "c3").unwrap(), 0.4);
        assert_eq!(g.relation_count(), 2);
    }

    #[test]
    fn auto_modify_always_creates_with_unit_probability() {
        let mut g = abc_graph();
        assert_eq!(g.weight("A", "C").unwrap(), 0.0);
        let params = ModifyParams {
            reinforce_prob: 0.0,
            create_prob: 1.0,
            reinforce_delta: 0.05,
        };
        let touched = g.auto_modify(&[0, 2], &params);
        assert_eq!(touched, 1);
        let w = g.weight("A", "C").unwrap();
        assert!(w > 0.0 && w <= 1.0);
        assert!(g.topology().has_edge(0, 2));
    }

    #[test]
    fn auto_modify_reinforces_existing_edges() {
        let mut g = abc_graph();
        let before = g.weight("A", "B").unwrap();
        let params = ModifyParams {
            reinforce_prob: 1.0,
            create_prob: 0.0,
            reinforce_delta: 0.05,
        };
        g.auto_modify(&[0, 1], &params);
        let after = g.weight("A", "B").unwrap();
        assert!(after > before);
        assert!(after <= 1.0);
        // Symmetry survives reinforcement.
        assert_eq!(g.weight("B", "A").unwrap(), after);
    }

    #[test]
    fn auto_modify_ignores_junk_indices_and_duplicates() {
        let mut g = abc_graph();
        let params = ModifyParams {
            reinforce_prob: 0.0,
            create_prob: 1.0,
            reinforce_delta: 0.05,
        };
        // Duplicates collapse, out-of-range indices are dropped.
        let touched = g.auto_modify(&[0, 0, 2, 2, 99], &params);
        assert_eq!(touched, 1);
        assert_eq!(g.weight("A", "C").unwrap(), g.weight("C", "A").unwrap());
    }

    #[test]
    fn similar_excludes_self_and_bounds_results() {
        let mut g = ConceptGraph::new(test_cfg());
        g.add_concept("q", &basis(0), 0.1, "t").unwrap();
        g.add_concept("close", &basis(0), 0.1, "t").unwrap();
        g.add_concept("far", &basis(1), 0.1, "t").unwrap();

        let hits = g.similar("q", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(name, _)| name != "q"));
        assert_eq!(hits[0].0, "close");
        assert!(hits[0].1 > hits[1].1);

        let hits = g.similar("q", 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn similar_breaks_ties_by_ascending_index() {
        let mut g = ConceptGraph::new(test_cfg());
        g.add_concept("q", &basis(0), 0.1, "t").unwrap();
        g.add_concept("twin_b", &basis(0), 0.1, "t").unwrap();
        g.add_concept("twin_a", &basis(0), 0.1, "t").unwrap();

        let hits = g.similar("q", 5).unwrap();
        // Equal scores: insertion order (index) decides, not name.
        assert_eq!(hits[0].0, "twin_b");
        assert_eq!(hits[1].0, "twin_a");
    }

    #[test]
    fn image_roundtrip_basic() {
        let mut g = abc_graph();
        g.activate("A", 3, 0.2).unwrap();
        g.auto_modify(&[0, 1, 2], &ModifyParams::default());
        g.record_external_link("B").unwrap();

        let bytes = g.save();
        let loaded = ConceptGraph::load(&bytes).unwrap();

        assert_eq!(loaded.concept_count(), g.concept_count());
        assert_eq!(loaded.relation_count(), g.relation_count());
        assert_eq!(loaded.capacity(), g.capacity());
        assert_eq!(loaded.step_clock(), g.step_clock());
        assert_eq!(loaded.names, g.names);
        assert_eq!(loaded.rng.state(), g.rng.state());

        let a = loaded.get("A").unwrap();
        let a_orig = g.get("A").unwrap();
        assert_eq!(a.current, a_orig.current);
        assert_eq!(a.activation_count, a_orig.activation_count);
        assert_eq!(a.history_len, a_orig.history_len);
        assert_eq!(
            loaded.get("B").unwrap().external_links,
            g.get("B").unwrap().external_links
        );
        assert_eq!(loaded.weight("A", "B").unwrap(), g.weight("A", "B").unwrap());
    }

    #[test]
    fn save_load_save_is_byte_identical() {
        let mut g = abc_graph();
        g.activate("A", 3, 0.3).unwrap();
        g.activate("B", 2, 0.1).unwrap();
        g.auto_modify(&[0, 1, 2], &ModifyParams::default());

        let first = g.save();
        let loaded = ConceptGraph::load(&first).unwrap();
        let second = loaded.save();
        assert_eq!(first, second);
    }

    #[test]
    fn loaded_engine_is_immediately_usable() {
        let mut g = abc_graph();
        let bytes = g.save();
        drop(g);

        let mut loaded = ConceptGraph::load(&bytes).unwrap();
        loaded.add_concept("D", &basis(3), 0.1, "t").unwrap();
        loaded.relate("C", "D", Some(0.6)).unwrap();
        let trajectory = loaded.activate("A", 2, 0.0).unwrap();
        assert_eq!(trajectory[0].len(), 4);
        assert_eq!(loaded.similar("A", 2).unwrap().len(), 2);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let g = abc_graph();
        let mut bytes = g.save();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            ConceptGraph::load(&bytes),
            Err(GraphError::CorruptState(_))
        ));
    }

    #[test]
    fn load_rejects_truncated_image() {
        let g = abc_graph();
        let bytes = g.save();
        assert!(matches!(
            ConceptGraph::load(&bytes[..bytes.len() / 2]),
            Err(GraphError::CorruptState(_))
        ));
    }

    #[test]
    fn load_rejects_out_of_range_relation_index() {
        let g = abc_graph();

        // Re-emit the image with a RELS chunk referencing an unknown index.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(storage::MAGIC);
        storage::write_u32_le(&mut bytes, storage::VERSION_CURRENT).unwrap();

        let mut buf = Vec::new();
        g.write_cfg_payload(&mut buf).unwrap();
        storage::write_chunk(&mut bytes, *b"CFG0", &buf).unwrap();

        buf.clear();
        storage::write_u64_le(&mut buf, g.rng.state()).unwrap();
        storage::write_chunk(&mut bytes, *b"PRNG", &buf).unwrap();

        buf.clear();
        g.write_concepts_payload(&mut buf).unwrap();
        storage::write_chunk_lz4(&mut bytes, *b"CNPT", &buf).unwrap();

        buf.clear();
        storage::write_u32_le(&mut buf, 1).unwrap();
        storage::write_u32_le(&mut buf, 0).unwrap();
        storage::write_u32_le(&mut buf, 57).unwrap(); // only 3 concepts exist
        storage::write_f32_le(&mut buf, 0.5).unwrap();
        storage::write_chunk_lz4(&mut bytes, *b"RELS", &buf).unwrap();

        assert!(matches!(
            ConceptGraph::load(&bytes),
            Err(GraphError::CorruptState(_))
        ));
    }

    #[test]
    fn diagnostics_reports_aggregates() {
        let mut g = abc_graph();
        g.activate("A", 1, 0.0).unwrap();
        let diag = g.diagnostics();
        assert_eq!(diag.concept_count, 3);
        assert_eq!(diag.relation_count, 2);
        assert_eq!(diag.step_clock, 1);
        assert!((diag.avg_weight - (0.9 + 0.8) / 2.0).abs() < 1e-6);
        assert!((diag.avg_uncertainty - 0.2).abs() < 1e-6);
    }

    #[test]
    fn active_set_matches_threshold() {
        let g = abc_graph();
        let set = g.active_set(&[0.5, 0.05, 0.2]);
        assert_eq!(set, vec![0, 2]);
    }
}
