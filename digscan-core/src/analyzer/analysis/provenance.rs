//! Base-Pointer Provenance Tracking
//!
//! Maps a program value to the allocation node it is derived from by walking
//! pointer-producing instructions backward through the def-use graph.
//!
//! # Algorithm
//! 1. A memoized value is its own root.
//! 2. A global follows the stores into it; a unique dominant stored node aliases the global.
//! 3. An indexed address resolves its base; offsets never change identity.
//! 4. A cast resolves its source. Phi and select arms are tried in order.
//! 5. A load tries, in order: stores into the global it reads, structurally
//!    similar field stores anywhere in the program, stores to the same address
//!    in the same function, stores to the local slot it reads.
//!
//! Address arithmetic, casts and merges are walked with an explicit stack.
//! Loads and globals re-enter the walk one level deeper. Every query shares
//! one visited set, a step budget and a depth cap, so it terminates on cyclic
//! phi webs and pathological store chains.
//!
//! # Memoization
//! The memo table only grows. Allocation results are registered by the
//! registry; aliases are added for resolved globals, seeded struct fields and
//! every successfully resolved query.

use crate::analyzer::config::{AnalysisConfig, SimilarityMode};
use crate::analyzer::dig::NodeId;
use crate::analyzer::ir::{Program, ValueId, ValueKind};
use bitvec::prelude::*;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};

/// Per-query walk state.
struct Walk {
    visited: BitVec,
    steps: usize,
    exhausted: bool,
}

impl Walk {
    fn new(values: usize) -> Self {
        Self {
            visited: bitvec![0; values],
            steps: 0,
            exhausted: false,
        }
    }
}

/// Value-to-node memo table with the backward resolution walk.
pub struct ProvenanceTracker<'p> {
    program: &'p Program,
    memo: HashMap<ValueId, NodeId>,
    similarity: SimilarityMode,
    max_steps: usize,
    max_depth: usize,
    /// Stores whose target is an indexed address, in program order.
    field_stores: Vec<ValueId>,
    exhausted_walks: usize,
}

impl<'p> ProvenanceTracker<'p> {
    pub fn new(program: &'p Program, config: &AnalysisConfig) -> Self {
        let field_stores = program
            .all_instructions()
            .filter(|&inst| match program.kind(inst) {
                ValueKind::Store { address, .. } => {
                    matches!(program.kind(*address), ValueKind::IndexAddr { .. })
                }
                _ => false,
            })
            .collect();

        Self {
            program,
            memo: HashMap::new(),
            similarity: config.similarity,
            max_steps: config.max_walk_steps,
            max_depth: config.max_walk_depth,
            field_stores,
            exhausted_walks: 0,
        }
    }

    /// Associate `value` with `node`. An existing association is kept.
    ///
    /// # Returns
    /// `true` if the value was not registered before
    pub fn register(&mut self, value: ValueId, node: NodeId) -> bool {
        if self.memo.contains_key(&value) {
            return false;
        }
        self.memo.insert(value, node);
        true
    }

    #[inline]
    pub fn node_of(&self, value: ValueId) -> Option<NodeId> {
        self.memo.get(&value).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// Memo table entries sorted by value.
    pub fn aliases(&self) -> Vec<(ValueId, NodeId)> {
        let mut entries: Vec<_> = self.memo.iter().map(|(v, n)| (*v, *n)).collect();
        entries.sort_unstable();
        entries
    }

    pub fn exhausted_walks(&self) -> usize {
        self.exhausted_walks
    }

    pub fn similarity(&self) -> SimilarityMode {
        self.similarity
    }

    /// Stores into indexed addresses, in program order.
    pub fn field_stores(&self) -> &[ValueId] {
        &self.field_stores
    }

    /// Value `value` is ultimately derived from.
    ///
    /// # Returns
    /// A registered value on success, `value` itself when nothing was found
    pub fn resolve(&mut self, value: ValueId) -> ValueId {
        if self.memo.contains_key(&value) {
            return value;
        }
        let mut walk = Walk::new(self.program.value_count());
        match self.trace(value, &mut walk, 0) {
            Some(root) => {
                if let Some(node) = self.node_of(root) {
                    self.memo.entry(value).or_insert(node);
                }
                root
            }
            None => {
                if walk.exhausted {
                    self.exhausted_walks += 1;
                    log::warn!(
                        "Provenance walk for {} stopped after {} steps",
                        self.program.display_name(value),
                        walk.steps
                    );
                }
                value
            }
        }
    }

    /// Node `value` is derived from, if any.
    #[inline]
    pub fn resolve_node(&mut self, value: ValueId) -> Option<NodeId> {
        let root = self.resolve(value);
        self.node_of(root)
    }

    /// Depth-first search over address arithmetic, casts and merges with an
    /// explicit stack. Loads and globals hand off to their own tracers.
    fn trace(&mut self, value: ValueId, walk: &mut Walk, depth: usize) -> Option<ValueId> {
        let program = self.program;
        let mut stack: SmallVec<[(ValueId, usize); 8]> = SmallVec::new();
        stack.push((value, depth));

        while let Some((current, depth)) = stack.pop() {
            if self.memo.contains_key(&current) {
                return Some(current);
            }
            if walk.steps >= self.max_steps {
                walk.exhausted = true;
                return None;
            }
            if depth > self.max_depth {
                walk.exhausted = true;
                continue;
            }
            walk.steps += 1;
            if walk.visited[current.index()] {
                continue;
            }
            walk.visited.set(current.index(), true);
            log::trace!("provenance step {} at {}", walk.steps, program.display_name(current));

            let found = match program.kind(current) {
                ValueKind::Global { .. } => self.trace_global(current, walk, depth),
                ValueKind::Load { address } => self.trace_load(current, *address, walk, depth),
                ValueKind::IndexAddr { base, .. } => {
                    stack.push((*base, depth + 1));
                    None
                }
                ValueKind::Cast { source, .. } => {
                    stack.push((*source, depth + 1));
                    None
                }
                ValueKind::Phi { incoming } => {
                    stack.extend(incoming.iter().rev().map(|(arm, _)| (*arm, depth + 1)));
                    None
                }
                ValueKind::Select {
                    if_true, if_false, ..
                } => {
                    stack.push((*if_false, depth + 1));
                    stack.push((*if_true, depth + 1));
                    None
                }
                _ => None,
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// Stores targeting `address` directly or through a cast of it.
    fn stores_into(&self, address: ValueId) -> Vec<(ValueId, ValueId)> {
        let program = self.program;
        let mut stores = Vec::new();
        for &user in program.users(address) {
            match program.kind(user) {
                ValueKind::Store { value, address: target } if *target == address => {
                    stores.push((user, *value));
                }
                ValueKind::Cast { .. } => {
                    for &inner in program.users(user) {
                        if let ValueKind::Store { value, address: target } = program.kind(inner) {
                            if *target == user {
                                stores.push((inner, *value));
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        stores
    }

    fn trace_global(&mut self, global: ValueId, walk: &mut Walk, depth: usize) -> Option<ValueId> {
        let mut tally: BTreeMap<NodeId, (usize, ValueId)> = BTreeMap::new();
        for (_, stored) in self.stores_into(global) {
            if let Some(root) = self.trace(stored, walk, depth + 1) {
                if let Some(node) = self.node_of(root) {
                    tally.entry(node).or_insert((0, root)).0 += 1;
                }
            }
        }

        let best = tally.values().map(|(count, _)| *count).max()?;
        let mut winners = tally.iter().filter(|(_, (count, _))| *count == best);
        let (node, (_, root)) = winners.next()?;
        if winners.next().is_some() {
            log::debug!(
                "Global {} holds several allocations equally often, not aliased",
                self.program.display_name(global)
            );
            return None;
        }
        let (node, root) = (*node, *root);
        if self.register(global, node) {
            log::debug!("Aliased global {} to node {}", self.program.display_name(global), node);
        }
        Some(root)
    }

    fn trace_load(&mut self, load: ValueId, address: ValueId, walk: &mut Walk, depth: usize) -> Option<ValueId> {
        let program = self.program;
        let location = program.strip_casts(address);

        if matches!(program.kind(location), ValueKind::Global { .. }) {
            if let Some(root) = self.trace(location, walk, depth + 1) {
                return Some(root);
            }
        }

        if self.is_field_access(location) {
            for i in 0..self.field_stores.len() {
                let store = self.field_stores[i];
                let ValueKind::Store { value, address: target } = program.kind(store) else {
                    continue;
                };
                if self.structurally_similar(location, *target) {
                    if let Some(root) = self.trace(*value, walk, depth + 1) {
                        return Some(root);
                    }
                }
            }
        }

        let function = program.function_of(load);
        for &user in program.users(address) {
            if let ValueKind::Store { value, address: target } = program.kind(user) {
                if *target == address && program.function_of(user) == function {
                    if let Some(root) = self.trace(*value, walk, depth + 1) {
                        return Some(root);
                    }
                }
            }
        }

        if matches!(program.kind(location), ValueKind::Alloca { .. }) {
            for (store, stored) in self.stores_into(location) {
                if program.function_of(store) != function {
                    continue;
                }
                if let Some(root) = self.trace(stored, walk, depth + 1) {
                    return Some(root);
                }
            }
        }

        None
    }

    /// Indexed address with at least two indices, the last one constant.
    pub fn is_field_access(&self, address: ValueId) -> bool {
        match self.program.kind(address) {
            ValueKind::IndexAddr { indices, .. } => {
                indices.len() >= 2
                    && indices
                        .last()
                        .is_some_and(|&last| self.program.const_value(last).is_some())
            }
            _ => false,
        }
    }

    /// Compare two indexed addresses index by index.
    ///
    /// Constant pairs must be equal and a constant never matches a variable.
    /// Two variable indices match in lenient mode; strict mode also requires
    /// them to be the same value and the source element types to agree.
    pub fn structurally_similar(&self, a: ValueId, b: ValueId) -> bool {
        let program = self.program;
        let (
            ValueKind::IndexAddr {
                source: source_a,
                indices: indices_a,
                ..
            },
            ValueKind::IndexAddr {
                source: source_b,
                indices: indices_b,
                ..
            },
        ) = (program.kind(a), program.kind(b))
        else {
            return false;
        };

        if indices_a.len() != indices_b.len() || indices_a.len() < 2 {
            return false;
        }
        let strict = self.similarity == SimilarityMode::Strict;
        if strict && source_a != source_b {
            return false;
        }

        indices_a.iter().zip(indices_b.iter()).all(|(&x, &y)| {
            match (program.const_value(x), program.const_value(y)) {
                (Some(p), Some(q)) => p == q,
                (None, None) => !strict || x == y,
                _ => false,
            }
        })
    }
}
