//! Indirection Pattern Detection
//!
//! Per function, two structural scans run first:
//! - **Single-valued** (`A[B[i]]`): an index of a load's address is itself
//!   produced by another load; the inner load's array is the source and the
//!   outer load's array the destination.
//! - **Ranged** (`A[B[i]..B[i+1]]`): see [`ranged`](super::ranged).
//!
//! Hint strategies run afterwards and only add edges the structural scans
//! did not produce.

use crate::analyzer::analysis::hints::{AccessorSpliceHint, NeighborhoodNameHint, PatternHint};
use crate::analyzer::analysis::ranged::RangedScan;
use crate::analyzer::analysis::AnalysisContext;
use crate::analyzer::config::AnalysisConfig;
use crate::analyzer::dig::{EdgeKind, EdgeOrigin};
use crate::analyzer::ir::{FuncId, Program, ValueId, ValueKind};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Structural scans plus the configured hint strategies.
pub struct IndirectionDetector {
    hints: Vec<Box<dyn PatternHint>>,
}

impl IndirectionDetector {
    /// Detector with the hint strategies enabled in `config`.
    pub fn new(config: &AnalysisConfig) -> Self {
        let hints: Vec<Box<dyn PatternHint>> = if config.hints.enabled {
            vec![
                Box::new(AccessorSpliceHint::new(&config.hints)),
                Box::new(NeighborhoodNameHint::new(&config.hints)),
            ]
        } else {
            Vec::new()
        };
        Self { hints }
    }

    /// Detector with a custom set of hint strategies.
    pub fn with_hints(hints: Vec<Box<dyn PatternHint>>) -> Self {
        Self { hints }
    }

    pub fn hint_names(&self) -> Vec<&'static str> {
        self.hints.iter().map(|h| h.name()).collect()
    }

    /// Scan every defined function.
    ///
    /// # Returns
    /// `usize` - Number of edges added to the candidate set
    pub fn detect(&self, ctx: &mut AnalysisContext<'_>) -> usize {
        let program = ctx.program;
        program
            .function_ids()
            .filter(|&f| !program.function(f).is_declaration())
            .map(|f| self.detect_function(ctx, f))
            .sum()
    }

    /// Scan one function.
    ///
    /// # Returns
    /// `usize` - Number of edges added to the candidate set
    pub fn detect_function(&self, ctx: &mut AnalysisContext<'_>, function: FuncId) -> usize {
        let before = ctx.edges.len();
        let matched = Self::detect_single_valued(ctx, function) + RangedScan::detect(ctx, function);

        for hint in &self.hints {
            for (kind, src, dest) in hint.suggest(ctx, function, matched > 0) {
                if ctx.add_edge(kind, src, dest, EdgeOrigin::Hint) {
                    log::debug!("Hint {} added {:?} {} -> {}", hint.name(), kind, src, dest);
                }
            }
        }
        ctx.edges.len() - before
    }

    /// Single-valued scan.
    ///
    /// # Returns
    /// `usize` - Number of candidates whose bases resolved to distinct nodes
    pub fn detect_single_valued(ctx: &mut AnalysisContext<'_>, function: FuncId) -> usize {
        let program = ctx.program;
        let limit = ctx.config.index_trace_limit;
        let mut matched = 0;

        for inst in program.instructions(function) {
            let ValueKind::Load { address } = program.kind(inst) else {
                continue;
            };
            let ValueKind::IndexAddr {
                base: dest_base,
                indices,
                ..
            } = program.kind(program.strip_casts(*address))
            else {
                continue;
            };

            for &index in indices {
                let index = program.strip_int_resizes(index);
                let Some(inner) = trace_to_load(program, index, limit) else {
                    continue;
                };
                let ValueKind::Load { address: inner_address } = program.kind(inner) else {
                    continue;
                };
                let inner_address = program.strip_casts(*inner_address);
                let src_base = match program.kind(inner_address) {
                    ValueKind::IndexAddr { base, .. } => *base,
                    _ => inner_address,
                };

                if let Some((src, dest)) = ctx.resolve_pair(src_base, *dest_base) {
                    matched += 1;
                    ctx.add_edge(EdgeKind::SingleValued, src, dest, EdgeOrigin::Structural);
                }
            }
        }
        matched
    }
}

/// Load that (transitively) produces `value`.
///
/// Follows integer resizes and arithmetic breadth-first, and sees through
/// local slots by following the values stored into them. Visits at most
/// `limit` values.
pub fn trace_to_load(program: &Program, value: ValueId, limit: usize) -> Option<ValueId> {
    let function = program.function_of(value);
    let mut queue = VecDeque::from([value]);
    let mut seen: SmallVec<[ValueId; 16]> = SmallVec::new();

    while let Some(current) = queue.pop_front() {
        if seen.len() >= limit {
            break;
        }
        if seen.contains(&current) {
            continue;
        }
        seen.push(current);

        match program.kind(current) {
            ValueKind::Load { address } => {
                let slot = program.strip_casts(*address);
                if !matches!(program.kind(slot), ValueKind::Alloca { .. }) {
                    return Some(current);
                }
                for &user in program.users(slot) {
                    if let ValueKind::Store { value, address } = program.kind(user) {
                        if *address == slot && program.function_of(user) == function {
                            queue.push_back(*value);
                        }
                    }
                }
            }
            ValueKind::Cast { op, source } if op.is_int_resize() => queue.push_back(*source),
            ValueKind::Binary { lhs, rhs, .. } => {
                queue.push_back(*lhs);
                queue.push_back(*rhs);
            }
            _ => {}
        }
    }
    None
}
