//! Analysis Module
//!
//! The analysis stages of DIG extraction, leaves first: allocation
//! registration with element-size inference, base-pointer provenance,
//! indirection detection (structural scans plus name-based hints).
//!
//! All stages share one [`AnalysisContext`] for the duration of a run. It owns
//! the append-only node list, the provenance memo table, the candidate edge
//! set and the diagnostics counters. Nothing is kept between runs.

pub mod element_size;
pub mod hints;
pub mod indirection;
pub mod provenance;
pub mod ranged;
pub mod registry;

pub use element_size::ElementSizeInference;
pub use hints::{AccessorSpliceHint, NeighborhoodNameHint, PatternHint};
pub use indirection::IndirectionDetector;
pub use provenance::ProvenanceTracker;
pub use registry::AllocationRegistry;

use crate::analyzer::config::AnalysisConfig;
use crate::analyzer::dig::{AllocationNode, EdgeKind, EdgeOrigin, EdgeSet, IndirectionEdge, NodeId};
use crate::analyzer::ir::{Program, ValueId};
use serde::Serialize;

/// Counters reported alongside the DIG. None of them are errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    /// Defined functions scanned for allocation sites
    pub functions_scanned: usize,
    /// Calls to a configured allocator
    pub allocation_sites: usize,
    /// Allocation sites dropped as runtime-internal
    pub filtered_runtime_internal: usize,
    /// Nodes whose stride fell back to the byte-array default
    pub default_strides: usize,
    /// Struct-field addresses aliased to a node before detection
    pub aliases_seeded: usize,
    /// Candidate patterns dropped because a base did not resolve to a node
    pub rejected_unresolved: usize,
    /// Provenance walks stopped by the step or depth budget
    pub exhausted_walks: usize,
    /// Edges contributed by hint strategies
    pub hint_edges: usize,
    pub nodes: usize,
    pub single_valued_edges: usize,
    pub ranged_edges: usize,
    pub trigger_edges: usize,
}

/// Shared state of one analysis run.
pub struct AnalysisContext<'p> {
    pub program: &'p Program,
    pub config: &'p AnalysisConfig,
    pub nodes: Vec<AllocationNode>,
    pub tracker: ProvenanceTracker<'p>,
    pub edges: EdgeSet,
    pub diagnostics: Diagnostics,
}

impl<'p> AnalysisContext<'p> {
    pub fn new(program: &'p Program, config: &'p AnalysisConfig) -> Self {
        Self {
            program,
            config,
            nodes: Vec::new(),
            tracker: ProvenanceTracker::new(program, config),
            edges: EdgeSet::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Resolve two array bases to distinct registered nodes.
    ///
    /// Unresolved bases are counted as rejected candidates; a pair resolving
    /// to the same node is not an indirection and is dropped quietly.
    pub fn resolve_pair(&mut self, src_base: ValueId, dest_base: ValueId) -> Option<(NodeId, NodeId)> {
        let src = self.tracker.resolve_node(src_base);
        let dest = self.tracker.resolve_node(dest_base);
        match (src, dest) {
            (Some(s), Some(d)) if s != d => Some((s, d)),
            (Some(_), Some(_)) => None,
            _ => {
                log::trace!(
                    "Unresolved candidate: {} -> {}",
                    self.program.display_name(src_base),
                    self.program.display_name(dest_base)
                );
                self.diagnostics.rejected_unresolved += 1;
                None
            }
        }
    }

    /// Add a candidate edge. Returns `true` if the edge set changed.
    pub fn add_edge(&mut self, kind: EdgeKind, src: NodeId, dest: NodeId, origin: EdgeOrigin) -> bool {
        let inserted = self
            .edges
            .insert(IndirectionEdge::traversal(kind, src, dest, origin));
        if inserted {
            log::debug!("{:?} edge {} -> {} ({:?})", kind, src, dest, origin);
        }
        inserted
    }
}
