//! Allocation Registry
//!
//! Scans every defined function, in declaration order, for calls to the
//! configured allocators and creates one [`AllocationNode`] per call site.
//! Node ids are dense and follow that order.
//!
//! Calls made from runtime-internal functions, and calls whose size is the
//! parallel runtime's stack-size sentinel, are counted and skipped.

use crate::analyzer::analysis::element_size::ElementSizeInference;
use crate::analyzer::analysis::AnalysisContext;
use crate::analyzer::config::AllocatorKind;
use crate::analyzer::dig::{AllocationNode, NodeId, StrideSource};
use crate::analyzer::ir::{FuncId, ValueId, ValueKind};

pub struct AllocationRegistry;

impl AllocationRegistry {
    /// Register all allocation sites.
    ///
    /// # Arguments
    /// * `ctx` - Analysis context; nodes are appended and their results registered with the tracker
    ///
    /// # Returns
    /// `usize` - Number of nodes created
    pub fn scan(ctx: &mut AnalysisContext<'_>) -> usize {
        let program = ctx.program;
        let config = ctx.config;
        let before = ctx.nodes.len();

        for function in program.function_ids() {
            if program.function(function).is_declaration() {
                continue;
            }
            ctx.diagnostics.functions_scanned += 1;

            for inst in program.instructions(function) {
                let Some(callee) = program.callee(inst) else {
                    continue;
                };
                let Some(kind) = config.allocator_kind(callee) else {
                    continue;
                };
                ctx.diagnostics.allocation_sites += 1;

                if Self::is_runtime_internal(ctx, function, inst, kind) {
                    ctx.diagnostics.filtered_runtime_internal += 1;
                    continue;
                }
                if ctx.tracker.node_of(inst).is_some() {
                    continue;
                }

                let id = ctx.nodes.len() as NodeId;
                let mut node = AllocationNode::new(id, inst, kind);
                ElementSizeInference::infer(program, config, &mut node);
                if node.stride_source == StrideSource::Default {
                    ctx.diagnostics.default_strides += 1;
                }
                log::debug!(
                    "Node {}: {} in {} ({}), stride {} via {:?}",
                    id,
                    callee,
                    program.function(function).name,
                    kind.name(),
                    node.element_stride,
                    node.stride_source
                );
                ctx.tracker.register(inst, id);
                ctx.nodes.push(node);
            }
        }

        ctx.nodes.len() - before
    }

    fn is_runtime_internal(ctx: &AnalysisContext<'_>, function: FuncId, call: ValueId, kind: AllocatorKind) -> bool {
        let program = ctx.program;
        let name = &program.function(function).name;
        if ctx.config.is_runtime_internal(name) {
            log::debug!("Skipping allocation in runtime function {}", name);
            return true;
        }

        let ValueKind::Call { args, .. } = program.kind(call) else {
            return false;
        };
        let constant_size = match kind.size_argument() {
            Some(index) => args.get(index).and_then(|&a| program.const_value(a)),
            None => match (args.first(), args.get(1)) {
                (Some(&count), Some(&size)) => program
                    .const_value(count)
                    .zip(program.const_value(size))
                    .map(|(c, s)| c.saturating_mul(s)),
                _ => None,
            },
        };
        if constant_size == Some(ctx.config.runtime_stack_size as i64) {
            log::debug!("Skipping runtime stack allocation in {}", name);
            return true;
        }
        false
    }

    /// Alias struct-field addresses that registered allocations are stored into.
    ///
    /// A store of a registered value into an indexed address with at least two
    /// indices, the first a constant 0, makes that address resolve to the
    /// stored node.
    ///
    /// # Returns
    /// `usize` - Number of aliases added
    pub fn seed_field_aliases(ctx: &mut AnalysisContext<'_>) -> usize {
        let program = ctx.program;
        let mut seeded = 0;
        for inst in program.all_instructions() {
            let ValueKind::Store { value, address } = program.kind(inst) else {
                continue;
            };
            let ValueKind::IndexAddr { indices, .. } = program.kind(*address) else {
                continue;
            };
            if indices.len() < 2 || program.const_value(indices[0]) != Some(0) {
                continue;
            }
            let stored = program.strip_casts(*value);
            if let Some(node) = ctx.tracker.node_of(stored) {
                if ctx.tracker.register(*address, node) {
                    log::debug!("Field address {} aliases node {}", program.display_name(*address), node);
                    seeded += 1;
                }
            }
        }
        ctx.diagnostics.aliases_seeded += seeded;
        seeded
    }
}
