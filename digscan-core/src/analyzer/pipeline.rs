//! DIG Extraction Pipeline
//!
//! Runs the analysis stages in order over one program.
//!
//! # Pipeline Stages
//! 1. **Registration**: allocation nodes with inferred element sizes
//! 2. **Alias seeding**: struct fields holding registered allocations
//! 3. **Detection**: single-valued, ranged and hinted edges per function
//! 4. **Assembly**: incoming flags, reachability depth, trigger edges
//!
//! The run cannot fail. Everything the stages could not establish shows up
//! in the [`Diagnostics`] instead.

use crate::analyzer::analysis::{AllocationRegistry, AnalysisContext, Diagnostics, IndirectionDetector};
use crate::analyzer::assembler::DigAssembler;
use crate::analyzer::config::AnalysisConfig;
use crate::analyzer::dig::{Dig, EdgeKind, EdgeOrigin};
use crate::analyzer::ir::Program;
use serde::Serialize;

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub dig: Dig,
    pub diagnostics: Diagnostics,
}

pub struct DigPipeline;

impl DigPipeline {
    /// Extract the DIG of `program`.
    ///
    /// # Arguments
    /// * `program` - Validated program
    /// * `config` - Analysis configuration
    ///
    /// # Returns
    /// `AnalysisOutcome` - Assembled DIG and diagnostics
    ///
    /// # Examples
    /// ```
    /// use digscan_core::{AnalysisConfig, DigPipeline, Program};
    ///
    /// let program = Program::default();
    /// let outcome = DigPipeline::run(&program, &AnalysisConfig::default());
    /// assert!(outcome.dig.nodes().is_empty());
    /// ```
    #[inline(never)]
    pub fn run(program: &Program, config: &AnalysisConfig) -> AnalysisOutcome {
        log::info!("Starting DIG extraction...");
        let mut ctx = AnalysisContext::new(program, config);

        log::info!("Step 1: Registering allocation sites...");
        let nodes = AllocationRegistry::scan(&mut ctx);
        log::info!(
            "Registered {} nodes ({} sites, {} runtime-internal)",
            nodes,
            ctx.diagnostics.allocation_sites,
            ctx.diagnostics.filtered_runtime_internal
        );

        log::info!("Step 2: Seeding struct-field aliases...");
        AllocationRegistry::seed_field_aliases(&mut ctx);

        log::info!("Step 3: Detecting indirections...");
        let detector = IndirectionDetector::new(config);
        let candidates = detector.detect(&mut ctx);
        log::info!("Found {} candidate edges", candidates);

        log::info!("Step 4: Assembling DIG...");
        Self::assemble(ctx)
    }

    fn assemble(ctx: AnalysisContext<'_>) -> AnalysisOutcome {
        let exhausted = ctx.tracker.exhausted_walks();
        let mut diagnostics = ctx.diagnostics;
        let mut dig = Dig::new(ctx.nodes, ctx.edges);
        DigAssembler::assemble(&mut dig);

        diagnostics.exhausted_walks = exhausted;
        diagnostics.nodes = dig.nodes().len();
        diagnostics.single_valued_edges = dig.edge_count(EdgeKind::SingleValued);
        diagnostics.ranged_edges = dig.edge_count(EdgeKind::Ranged);
        diagnostics.trigger_edges = dig.edge_count(EdgeKind::Trigger);
        diagnostics.hint_edges = dig
            .traversal_edges()
            .filter(|e| e.origin == EdgeOrigin::Hint)
            .count();

        log::info!(
            "DIG: {} nodes, {} single-valued, {} ranged, {} trigger edges",
            diagnostics.nodes,
            diagnostics.single_valued_edges,
            diagnostics.ranged_edges,
            diagnostics.trigger_edges
        );
        AnalysisOutcome { dig, diagnostics }
    }
}
