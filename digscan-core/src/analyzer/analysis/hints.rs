//! Pattern Hints
//!
//! Heuristic strategies that raise recall on idiomatic graph-traversal code
//! where the structural scans see nothing. Hints only suggest edges; the edge
//! set keeps a structurally detected edge over a hinted one with the same key.
//!
//! - [`AccessorSpliceHint`]: small accessor functions such as
//!   `neighbors_begin(self, v)` return `&self.data[self.index[v]]`. At each
//!   call site the accessor's index/data field pair is resolved against the
//!   caller's `self` argument.
//! - [`NeighborhoodNameHint`]: calls to functions named like neighborhood
//!   queries, in a function without any structural match, link the
//!   lowest-numbered nodes.

use crate::analyzer::analysis::AnalysisContext;
use crate::analyzer::config::{HintConfig, SimilarityMode};
use crate::analyzer::dig::{EdgeKind, NodeId};
use crate::analyzer::ir::{FuncId, Program, ValueId, ValueKind};
use smallvec::SmallVec;

/// Constant index path of a struct field relative to an object pointer.
pub type FieldPath = SmallVec<[i64; 4]>;

/// A swappable idiom recognizer.
pub trait PatternHint {
    fn name(&self) -> &'static str;

    /// Candidate edges for `function`.
    ///
    /// # Arguments
    /// * `ctx` - Analysis context (nodes and tracker are final)
    /// * `function` - Function being scanned
    /// * `structural_found` - Whether the structural scans matched anything in `function`
    fn suggest(
        &self,
        ctx: &mut AnalysisContext<'_>,
        function: FuncId,
        structural_found: bool,
    ) -> Vec<(EdgeKind, NodeId, NodeId)>;
}

/// Splices accessor functions' index/data loads into their callers.
pub struct AccessorSpliceHint {
    max_instructions: usize,
}

impl AccessorSpliceHint {
    pub fn new(config: &HintConfig) -> Self {
        Self {
            max_instructions: config.accessor_max_instructions,
        }
    }

    /// Single-block, pointer-returning function of bounded size taking a pointer first.
    pub fn is_accessor(&self, program: &Program, function: FuncId) -> bool {
        let f = program.function(function);
        f.blocks.len() == 1
            && f.return_type.is_pointer()
            && program.instruction_count(function) <= self.max_instructions
            && f.params.first().is_some_and(|&p| program.ty(p).is_pointer())
    }

    /// `(index field, data field)` pairs of an accessor: `self.data[self.index[..]]`.
    pub fn field_pairs(&self, program: &Program, accessor: FuncId) -> Vec<(FieldPath, FieldPath)> {
        if !self.is_accessor(program, accessor) {
            return Vec::new();
        }
        let Some(&self_param) = program.function(accessor).params.first() else {
            return Vec::new();
        };

        let mut pairs = Vec::new();
        for inst in program.instructions(accessor) {
            let ValueKind::IndexAddr { base, indices, .. } = program.kind(inst) else {
                continue;
            };
            if indices.len() != 1 {
                continue;
            }
            let Some(data_path) = field_path(program, *base, self_param) else {
                continue;
            };
            let index = program.strip_int_resizes(indices[0]);
            let ValueKind::Load { address } = program.kind(index) else {
                continue;
            };
            let ValueKind::IndexAddr { base: index_base, .. } = program.kind(program.strip_casts(*address)) else {
                continue;
            };
            if let Some(index_path) = field_path(program, *index_base, self_param) {
                pairs.push((index_path, data_path));
            }
        }
        pairs
    }

    /// Node stored into field `path` of the object `object` points at.
    fn field_node(ctx: &mut AnalysisContext<'_>, object: ValueId, path: &[i64]) -> Option<NodeId> {
        let program = ctx.program;
        let object_root = program.strip_casts(object);
        let object_node = ctx.tracker.resolve_node(object);
        let lenient = ctx.tracker.similarity() == SimilarityMode::Lenient;

        let stores = ctx.tracker.field_stores().to_vec();
        for store in stores {
            let ValueKind::Store { value, address } = program.kind(store) else {
                continue;
            };
            let ValueKind::IndexAddr { base, indices, .. } = program.kind(*address) else {
                continue;
            };
            let matches_path = indices.len() == path.len()
                && indices
                    .iter()
                    .zip(path)
                    .all(|(&i, &p)| program.const_value(i) == Some(p));
            if !matches_path {
                continue;
            }
            let same_object = if program.strip_casts(*base) == object_root {
                true
            } else {
                match (ctx.tracker.resolve_node(*base), object_node) {
                    (Some(a), Some(b)) => a == b,
                    (_, None) => lenient,
                    _ => false,
                }
            };
            if !same_object {
                continue;
            }
            if let Some(node) = ctx.tracker.resolve_node(*value) {
                return Some(node);
            }
        }
        None
    }
}

impl PatternHint for AccessorSpliceHint {
    fn name(&self) -> &'static str {
        "accessor-splice"
    }

    fn suggest(
        &self,
        ctx: &mut AnalysisContext<'_>,
        function: FuncId,
        _structural_found: bool,
    ) -> Vec<(EdgeKind, NodeId, NodeId)> {
        let program = ctx.program;
        let mut edges = Vec::new();
        for inst in program.instructions(function) {
            let ValueKind::Call {
                callee: Some(name),
                args,
            } = program.kind(inst)
            else {
                continue;
            };
            let Some(&object) = args.first() else {
                continue;
            };
            let Some(accessor) = program.function_by_name(name) else {
                continue;
            };
            for (index_path, data_path) in self.field_pairs(program, accessor) {
                let src = Self::field_node(ctx, object, &index_path);
                let dest = Self::field_node(ctx, object, &data_path);
                if let (Some(src), Some(dest)) = (src, dest) {
                    if src != dest {
                        edges.push((EdgeKind::SingleValued, src, dest));
                    }
                }
            }
        }
        edges
    }
}

/// Constant field path of `value` when it is `*(&self->field...)`.
fn field_path(program: &Program, value: ValueId, self_param: ValueId) -> Option<FieldPath> {
    let ValueKind::Load { address } = program.kind(program.strip_casts(value)) else {
        return None;
    };
    let ValueKind::IndexAddr { base, indices, .. } = program.kind(program.strip_casts(*address)) else {
        return None;
    };
    if !is_self(program, *base, self_param) {
        return None;
    }
    indices.iter().map(|&i| program.const_value(i)).collect()
}

/// `value` is the accessor's first parameter, directly or reloaded from its spill slot.
fn is_self(program: &Program, value: ValueId, self_param: ValueId) -> bool {
    let value = program.strip_casts(value);
    if value == self_param {
        return true;
    }
    let ValueKind::Load { address } = program.kind(value) else {
        return false;
    };
    let slot = program.strip_casts(*address);
    matches!(program.kind(slot), ValueKind::Alloca { .. })
        && program.users(slot).iter().any(|&user| {
            matches!(program.kind(user), ValueKind::Store { value, address } if *address == slot && *value == self_param)
        })
}

/// Links the lowest-numbered nodes when a neighborhood query is called
/// from a function without structural matches.
pub struct NeighborhoodNameHint {
    neighborhood_keywords: Vec<String>,
    iterator_keywords: Vec<String>,
    low_node_limit: u32,
}

impl NeighborhoodNameHint {
    pub fn new(config: &HintConfig) -> Self {
        Self {
            neighborhood_keywords: config.neighborhood_keywords.iter().map(|k| k.to_lowercase()).collect(),
            iterator_keywords: config.iterator_keywords.iter().map(|k| k.to_lowercase()).collect(),
            low_node_limit: config.low_node_limit,
        }
    }

    /// Defined function reading a pointer out of an indexed address.
    fn loads_pointer_field(program: &Program, function: FuncId) -> bool {
        program.instructions(function).any(|inst| match program.kind(inst) {
            ValueKind::Load { address } => {
                program.ty(inst).is_pointer()
                    && matches!(program.kind(program.strip_casts(*address)), ValueKind::IndexAddr { .. })
            }
            _ => false,
        })
    }

    /// Edges among nodes `0..=low_node_limit`.
    ///
    /// Ranged edges link consecutive nodes plus `0 -> 2`; iterator-style
    /// queries add single-valued edges `i -> j` for every `i < j`.
    pub fn synthesize(&self, node_count: usize, iterator: bool) -> Vec<(EdgeKind, NodeId, NodeId)> {
        let count = node_count.min(self.low_node_limit as usize + 1) as NodeId;
        let mut edges = Vec::new();
        if count < 2 {
            return edges;
        }
        for i in 0..count - 1 {
            edges.push((EdgeKind::Ranged, i, i + 1));
        }
        if count >= 3 {
            edges.push((EdgeKind::Ranged, 0, 2));
        }
        if iterator {
            for i in 0..count {
                for j in i + 1..count {
                    edges.push((EdgeKind::SingleValued, i, j));
                }
            }
        }
        edges
    }
}

impl PatternHint for NeighborhoodNameHint {
    fn name(&self) -> &'static str {
        "neighborhood-name"
    }

    fn suggest(
        &self,
        ctx: &mut AnalysisContext<'_>,
        function: FuncId,
        structural_found: bool,
    ) -> Vec<(EdgeKind, NodeId, NodeId)> {
        if structural_found {
            return Vec::new();
        }
        let program = ctx.program;
        for inst in program.instructions(function) {
            let Some(name) = program.callee(inst) else {
                continue;
            };
            let lower = name.to_lowercase();
            if !self.neighborhood_keywords.iter().any(|k| lower.contains(k.as_str())) {
                continue;
            }
            let Some(callee) = program.function_by_name(name) else {
                continue;
            };
            if !Self::loads_pointer_field(program, callee) {
                continue;
            }
            let iterator = self.iterator_keywords.iter().any(|k| lower.contains(k.as_str()));
            log::debug!(
                "Neighborhood query {} in {} without structural match",
                name,
                program.function(function).name
            );
            return self.synthesize(ctx.nodes.len(), iterator);
        }
        Vec::new()
    }
}
