//! Ranged indirection scan (`A[B[i]..B[i+1]]`).
//!
//! # Algorithm
//! 1. Collect the loads of the function that index an array with a single
//!    variable index.
//! 2. A pair is consecutive when both read the same array and one index is
//!    the other plus one, allowing one stored and reloaded copy of either index.
//! 3. The lower load starts the range. Its value and the end value, followed
//!    through one store and reload, feed a comparison; the block that
//!    comparison's branch enters when true is the loop body.
//! 4. Every load or store in the body whose base is another registered
//!    array yields a `Ranged` edge. Strict mode keeps only accesses indexed
//!    by the range counter.

use crate::analyzer::analysis::AnalysisContext;
use crate::analyzer::config::SimilarityMode;
use crate::analyzer::dig::{EdgeKind, EdgeOrigin};
use crate::analyzer::ir::{BinOp, BlockId, FuncId, Program, ValueId, ValueKind};
use smallvec::SmallVec;
use std::collections::BTreeSet;

pub struct RangedScan;

impl RangedScan {
    /// Scan one function.
    ///
    /// # Returns
    /// `usize` - Number of candidates whose bases resolved to distinct nodes
    pub fn detect(ctx: &mut AnalysisContext<'_>, function: FuncId) -> usize {
        let program = ctx.program;
        let loads: Vec<ValueId> = program
            .instructions(function)
            .filter(|&inst| Self::single_variable_index(program, inst).is_some())
            .collect();

        let mut matched = 0;
        for (i, &a) in loads.iter().enumerate() {
            for &b in &loads[i + 1..] {
                if let Some((start, end)) = Self::consecutive(ctx, a, b) {
                    log::trace!(
                        "Consecutive loads {} .. {}",
                        program.display_name(start),
                        program.display_name(end)
                    );
                    matched += Self::scan_range(ctx, function, start, end);
                }
            }
        }
        matched
    }

    /// Base and index of a load through `&base[index]` with a non-constant index.
    fn single_variable_index(program: &Program, load: ValueId) -> Option<(ValueId, ValueId)> {
        let ValueKind::Load { address } = program.kind(load) else {
            return None;
        };
        match program.kind(program.strip_casts(*address)) {
            ValueKind::IndexAddr { base, indices, .. }
                if indices.len() == 1 && program.const_value(indices[0]).is_none() =>
            {
                Some((*base, indices[0]))
            }
            _ => None,
        }
    }

    /// Order a consecutive pair as `(start, end)`.
    fn consecutive(ctx: &mut AnalysisContext<'_>, a: ValueId, b: ValueId) -> Option<(ValueId, ValueId)> {
        let program = ctx.program;
        let (base_a, index_a) = Self::single_variable_index(program, a)?;
        let (base_b, index_b) = Self::single_variable_index(program, b)?;
        if !Self::same_array(ctx, base_a, base_b) {
            return None;
        }
        if Self::is_successor(program, index_b, index_a) {
            Some((a, b))
        } else if Self::is_successor(program, index_a, index_b) {
            Some((b, a))
        } else {
            None
        }
    }

    /// Both bases denote the same array.
    fn same_array(ctx: &mut AnalysisContext<'_>, a: ValueId, b: ValueId) -> bool {
        let program = ctx.program;
        let (a, b) = (program.strip_casts(a), program.strip_casts(b));
        if a == b {
            return true;
        }
        if let (ValueKind::Load { address: la }, ValueKind::Load { address: lb }) =
            (program.kind(a), program.kind(b))
        {
            let (la, lb) = (program.strip_casts(*la), program.strip_casts(*lb));
            if la == lb || ctx.tracker.structurally_similar(la, lb) {
                return true;
            }
        }
        matches!(
            (ctx.tracker.resolve_node(a), ctx.tracker.resolve_node(b)),
            (Some(x), Some(y)) if x == y
        )
    }

    /// `next` computes `prev + 1`.
    fn is_successor(program: &Program, next: ValueId, prev: ValueId) -> bool {
        let next = program.strip_int_resizes(next);
        let ValueKind::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
        } = program.kind(next)
        else {
            return false;
        };
        match (program.const_value(*lhs), program.const_value(*rhs)) {
            (_, Some(1)) => Self::same_index(program, *lhs, prev),
            (Some(1), _) => Self::same_index(program, *rhs, prev),
            _ => false,
        }
    }

    /// Two index values are the same, directly, as reloads of one slot, or
    /// through one stored copy.
    fn same_index(program: &Program, x: ValueId, y: ValueId) -> bool {
        let (x, y) = (program.strip_int_resizes(x), program.strip_int_resizes(y));
        if x == y {
            return true;
        }
        if let (ValueKind::Load { address: ax }, ValueKind::Load { address: ay }) = (program.kind(x), program.kind(y)) {
            if program.strip_casts(*ax) == program.strip_casts(*ay) {
                return true;
            }
        }
        Self::reloads_copy_of(program, x, y) || Self::reloads_copy_of(program, y, x)
    }

    /// `reload` reads a local slot that `original` was stored into.
    fn reloads_copy_of(program: &Program, reload: ValueId, original: ValueId) -> bool {
        let ValueKind::Load { address } = program.kind(reload) else {
            return false;
        };
        let slot = program.strip_casts(*address);
        if !matches!(program.kind(slot), ValueKind::Alloca { .. }) {
            return false;
        }
        stored_into(program, slot)
            .any(|stored| program.strip_int_resizes(stored) == original)
    }

    /// Values a range bound reaches within one store and reload.
    fn bound_copies(program: &Program, bound: ValueId, function: FuncId) -> SmallVec<[ValueId; 8]> {
        let mut copies: SmallVec<[ValueId; 8]> = SmallVec::new();
        copies.push(bound);
        for &user in program.users(bound) {
            if matches!(program.kind(user), ValueKind::Cast { op, .. } if op.is_int_resize()) {
                copies.push(user);
            }
        }
        let direct = copies.clone();
        for value in direct {
            for &user in program.users(value) {
                let ValueKind::Store { value: stored, address } = program.kind(user) else {
                    continue;
                };
                if *stored != value || program.function_of(user) != Some(function) {
                    continue;
                }
                for &reload in program.users(*address) {
                    if matches!(program.kind(reload), ValueKind::Load { address: a } if a == address) {
                        copies.push(reload);
                        for &cast in program.users(reload) {
                            if matches!(program.kind(cast), ValueKind::Cast { op, .. } if op.is_int_resize()) {
                                copies.push(cast);
                            }
                        }
                    }
                }
            }
        }
        copies
    }

    /// Blocks entered when a comparison fed by either bound holds.
    fn loop_bodies(program: &Program, function: FuncId, start: ValueId, end: ValueId) -> BTreeSet<BlockId> {
        let mut bodies = BTreeSet::new();
        let seeds = Self::bound_copies(program, start, function)
            .into_iter()
            .chain(Self::bound_copies(program, end, function));
        for seed in seeds {
            for &compare in program.users(seed) {
                if !matches!(program.kind(compare), ValueKind::Compare { .. }) {
                    continue;
                }
                for &branch in program.users(compare) {
                    if let ValueKind::CondBranch { if_true, .. } = program.kind(branch) {
                        bodies.insert(*if_true);
                    }
                }
            }
        }
        bodies
    }

    /// `index` counts through the range that starts at `start`.
    fn is_range_counter(program: &Program, index: ValueId, start: ValueId) -> bool {
        let index = program.strip_int_resizes(index);
        match program.kind(index) {
            ValueKind::Phi { incoming } => incoming
                .iter()
                .any(|(arm, _)| program.strip_int_resizes(*arm) == start),
            ValueKind::Load { address } => {
                let slot = program.strip_casts(*address);
                matches!(program.kind(slot), ValueKind::Alloca { .. })
                    && stored_into(program, slot).any(|stored| program.strip_int_resizes(stored) == start)
            }
            _ => false,
        }
    }

    /// Address of a load or store with casts stripped.
    fn access_address(program: &Program, access: ValueId) -> Option<ValueId> {
        match program.kind(access) {
            ValueKind::Load { address } | ValueKind::Store { address, .. } => Some(program.strip_casts(*address)),
            _ => None,
        }
    }

    /// Base array of a load or store, looking through one indexed address.
    fn access_base(program: &Program, access: ValueId) -> Option<ValueId> {
        let address = Self::access_address(program, access)?;
        match program.kind(address) {
            ValueKind::IndexAddr { base, .. } => Some(*base),
            _ => Some(address),
        }
    }

    /// The access reads or writes `&base[counter]` for the range starting at `start`.
    fn indexed_by_counter(program: &Program, access: ValueId, start: ValueId) -> bool {
        let Some(address) = Self::access_address(program, access) else {
            return false;
        };
        match program.kind(address) {
            ValueKind::IndexAddr { indices, .. } if indices.len() == 1 => {
                Self::is_range_counter(program, indices[0], start)
            }
            _ => false,
        }
    }

    fn scan_range(ctx: &mut AnalysisContext<'_>, function: FuncId, start: ValueId, end: ValueId) -> usize {
        let program = ctx.program;
        let Some((start_base, _)) = Self::single_variable_index(program, start) else {
            return 0;
        };
        let Some(src) = ctx.tracker.resolve_node(start_base) else {
            ctx.diagnostics.rejected_unresolved += 1;
            return 0;
        };
        let strict = ctx.config.similarity == SimilarityMode::Strict;

        let mut matched = 0;
        for body in Self::loop_bodies(program, function, start, end) {
            for &inst in &program.block(body).instructions {
                let Some(base) = Self::access_base(program, inst) else {
                    continue;
                };
                // Strict mode keeps only accesses indexed by the range counter.
                if strict && !Self::indexed_by_counter(program, inst, start) {
                    continue;
                }
                match ctx.tracker.resolve_node(base) {
                    Some(dest) if dest != src => {
                        matched += 1;
                        ctx.add_edge(EdgeKind::Ranged, src, dest, EdgeOrigin::Structural);
                    }
                    _ => {}
                }
            }
        }
        matched
    }
}

/// Values stored into `slot`, directly or through a cast of it.
fn stored_into(program: &Program, slot: ValueId) -> impl Iterator<Item = ValueId> + '_ {
    program.users(slot).iter().flat_map(move |&user| {
        let mut stored: SmallVec<[ValueId; 2]> = SmallVec::new();
        match program.kind(user) {
            ValueKind::Store { value, address } if *address == slot => stored.push(*value),
            ValueKind::Cast { .. } => {
                for &inner in program.users(user) {
                    if let ValueKind::Store { value, address } = program.kind(inner) {
                        if *address == user {
                            stored.push(*value);
                        }
                    }
                }
            }
            _ => {}
        }
        stored
    })
}
