//! Data Indirection Graph
//!
//! Nodes are allocation sites; edges are data-dependent accesses between them.
//! The edge set is keyed by `(src, dest, kind)` so the graph never holds two
//! edges with the same key, no matter how often a pattern was detected.
//!
//! # Function Identifiers
//! Traversal, trigger and squash functions are numbered from one shared
//! enumeration understood by the prefetcher runtime. The numeric ids are
//! part of the rendered facts and must not change.

use crate::analyzer::config::AllocatorKind;
use crate::analyzer::ir::ValueId;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Dense node identifier, assigned in allocation-site order starting at 0.
pub type NodeId = u32;

/// Number of elements in an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementCount {
    /// Known at analysis time.
    Constant(u64),
    /// Computed by the program; the value holding it.
    Runtime(ValueId),
    Unknown,
}

/// Which element-size strategy bound the stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrideSource {
    /// Not inferred yet.
    Pending,
    /// `count * size` or `count << shift` in the size argument.
    DirectArgument,
    /// Separate count and size arguments.
    ExplicitArguments,
    /// Small constant-size object allocation.
    SingleObject,
    /// Dominant access width over the allocation's users.
    UsageMajority,
    /// Common difference between constant byte offsets.
    IndexStride,
    /// Step of an induction variable indexing the allocation.
    AffineStep,
    /// Byte array fallback.
    Default,
}

/// An allocation site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationNode {
    pub id: NodeId,
    /// The allocation call.
    pub site: ValueId,
    pub allocator: AllocatorKind,
    /// Bytes per element; `-1` until inferred.
    pub element_stride: i64,
    pub element_count: ElementCount,
    pub stride_source: StrideSource,
    /// Set by assembly.
    pub has_incoming_edge: bool,
}

impl AllocationNode {
    pub fn new(id: NodeId, site: ValueId, allocator: AllocatorKind) -> Self {
        Self {
            id,
            site,
            allocator,
            element_stride: -1,
            element_count: ElementCount::Unknown,
            stride_source: StrideSource::Pending,
            has_incoming_edge: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    SingleValued,
    Ranged,
    Trigger,
}

impl EdgeKind {
    #[inline]
    pub fn is_traversal(self) -> bool {
        !matches!(self, EdgeKind::Trigger)
    }
}

/// Deduplication key of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeKey {
    pub src: NodeId,
    pub dest: NodeId,
    pub kind: EdgeKind,
}

/// Whether an edge was matched on program structure or guessed by a name hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrigin {
    Structural,
    Hint,
}

/// Traversal functions (ids 0..=3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum TraversalFunction {
    BaseOffset32 = 0,
    BaseOffset64 = 1,
    PointerBounds32 = 2,
    PointerBounds64 = 3,
}

impl TraversalFunction {
    /// Function for an edge of `kind` whose source elements are `source_stride` bytes.
    pub fn for_edge(kind: EdgeKind, source_stride: i64) -> Option<Self> {
        let narrow = source_stride <= 4;
        match (kind, narrow) {
            (EdgeKind::SingleValued, true) => Some(TraversalFunction::BaseOffset32),
            (EdgeKind::SingleValued, false) => Some(TraversalFunction::BaseOffset64),
            (EdgeKind::Ranged, true) => Some(TraversalFunction::PointerBounds32),
            (EdgeKind::Ranged, false) => Some(TraversalFunction::PointerBounds64),
            (EdgeKind::Trigger, _) => None,
        }
    }

    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            TraversalFunction::BaseOffset32 => "BaseOffset_32",
            TraversalFunction::BaseOffset64 => "BaseOffset_64",
            TraversalFunction::PointerBounds32 => "PointerBounds_32",
            TraversalFunction::PointerBounds64 => "PointerBounds_64",
        }
    }
}

/// Trigger functions (ids 5..=21).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum TriggerFunction {
    UpToOffset = 5,
    StaticOffset1 = 6,
    StaticOffset2 = 7,
    StaticOffset4 = 8,
    StaticOffset8 = 9,
    StaticOffset16 = 10,
    StaticOffset32 = 11,
    StaticOffset64 = 12,
    StaticUpToOffset8To16 = 14,
    StaticUpToOffset8To256 = 15,
    StaticUpToOffset8To512 = 16,
    StaticUpToOffset8To1024 = 17,
}

impl TriggerFunction {
    /// Look-ahead for a trigger node whose forward reachability depth is `depth`.
    ///
    /// Deeper chains take smaller look-ahead.
    pub fn for_depth(depth: u32) -> Self {
        match depth {
            0 | 1 => TriggerFunction::StaticOffset16,
            2 => TriggerFunction::StaticOffset8,
            3 => TriggerFunction::StaticOffset2,
            _ => TriggerFunction::StaticOffset1,
        }
    }

    /// Static look-ahead in elements, `None` for the dynamic variants.
    pub fn look_ahead(self) -> Option<u32> {
        match self {
            TriggerFunction::StaticOffset1 => Some(1),
            TriggerFunction::StaticOffset2 => Some(2),
            TriggerFunction::StaticOffset4 => Some(4),
            TriggerFunction::StaticOffset8 => Some(8),
            TriggerFunction::StaticOffset16 => Some(16),
            TriggerFunction::StaticOffset32 => Some(32),
            TriggerFunction::StaticOffset64 => Some(64),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            TriggerFunction::UpToOffset => "UpToOffset",
            TriggerFunction::StaticOffset1 => "StaticOffset_1",
            TriggerFunction::StaticOffset2 => "StaticOffset_2",
            TriggerFunction::StaticOffset4 => "StaticOffset_4",
            TriggerFunction::StaticOffset8 => "StaticOffset_8",
            TriggerFunction::StaticOffset16 => "StaticOffset_16",
            TriggerFunction::StaticOffset32 => "StaticOffset_32",
            TriggerFunction::StaticOffset64 => "StaticOffset_64",
            TriggerFunction::StaticUpToOffset8To16 => "StaticUpToOffset_8_16",
            TriggerFunction::StaticUpToOffset8To256 => "StaticUpToOffset_8_256",
            TriggerFunction::StaticUpToOffset8To512 => "StaticUpToOffset_8_512",
            TriggerFunction::StaticUpToOffset8To1024 => "StaticUpToOffset_8_1024",
        }
    }
}

/// Squash functions (ids 22..=24).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum SquashFunction {
    SquashIfLarger = 22,
    SquashIfSmaller = 23,
    NeverSquash = 24,
}

impl SquashFunction {
    #[inline]
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            SquashFunction::SquashIfLarger => "SquashIfLarger",
            SquashFunction::SquashIfSmaller => "SquashIfSmaller",
            SquashFunction::NeverSquash => "NeverSquash",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndirectionEdge {
    pub kind: EdgeKind,
    pub src: NodeId,
    pub dest: NodeId,
    pub origin: EdgeOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerFunction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squash: Option<SquashFunction>,
}

impl IndirectionEdge {
    pub fn traversal(kind: EdgeKind, src: NodeId, dest: NodeId, origin: EdgeOrigin) -> Self {
        Self {
            kind,
            src,
            dest,
            origin,
            trigger: None,
            squash: None,
        }
    }

    /// Self-edge starting prefetches on `node`.
    pub fn trigger(node: NodeId, trigger: TriggerFunction) -> Self {
        Self {
            kind: EdgeKind::Trigger,
            src: node,
            dest: node,
            origin: EdgeOrigin::Structural,
            trigger: Some(trigger),
            squash: Some(SquashFunction::NeverSquash),
        }
    }

    #[inline]
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            src: self.src,
            dest: self.dest,
            kind: self.kind,
        }
    }
}

/// Edge set keyed by `(src, dest, kind)`.
///
/// A structurally detected edge replaces a hinted one with the same key; a
/// hinted edge never replaces anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeSet {
    edges: BTreeMap<EdgeKey, IndirectionEdge>,
}

impl EdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge. Returns `true` if the set changed.
    pub fn insert(&mut self, edge: IndirectionEdge) -> bool {
        let key = edge.key();
        match self.edges.get(&key) {
            None => {
                self.edges.insert(key, edge);
                true
            }
            Some(existing)
                if existing.origin == EdgeOrigin::Hint && edge.origin == EdgeOrigin::Structural =>
            {
                self.edges.insert(key, edge);
                true
            }
            Some(_) => false,
        }
    }

    #[inline]
    pub fn contains(&self, key: &EdgeKey) -> bool {
        self.edges.contains_key(key)
    }

    pub fn get(&self, key: &EdgeKey) -> Option<&IndirectionEdge> {
        self.edges.get(key)
    }

    /// Edges in key order.
    pub fn iter(&self) -> impl Iterator<Item = &IndirectionEdge> {
        self.edges.values()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&IndirectionEdge) -> bool) {
        self.edges.retain(|_, e| keep(e));
    }
}

impl Serialize for EdgeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.edges.values())
    }
}

/// The assembled graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dig {
    pub(crate) nodes: Vec<AllocationNode>,
    pub(crate) edges: EdgeSet,
}

impl Dig {
    pub fn new(nodes: Vec<AllocationNode>, edges: EdgeSet) -> Self {
        Self { nodes, edges }
    }

    #[inline]
    pub fn nodes(&self) -> &[AllocationNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&AllocationNode> {
        self.nodes.get(id as usize)
    }

    /// Node registered for an allocation call.
    pub fn node_for_site(&self, site: ValueId) -> Option<&AllocationNode> {
        self.nodes.iter().find(|n| n.site == site)
    }

    #[inline]
    pub fn edges(&self) -> &EdgeSet {
        &self.edges
    }

    /// Single-valued and ranged edges in key order.
    pub fn traversal_edges(&self) -> impl Iterator<Item = &IndirectionEdge> {
        self.edges.iter().filter(|e| e.kind.is_traversal())
    }

    pub fn trigger_edges(&self) -> impl Iterator<Item = &IndirectionEdge> {
        self.edges.iter().filter(|e| e.kind == EdgeKind::Trigger)
    }

    pub fn edge_count(&self, kind: EdgeKind) -> usize {
        self.edges.iter().filter(|e| e.kind == kind).count()
    }

    pub fn has_edge(&self, src: NodeId, dest: NodeId, kind: EdgeKind) -> bool {
        self.edges.contains(&EdgeKey { src, dest, kind })
    }

    /// Trigger edge of `node`, if it has one.
    pub fn trigger_of(&self, node: NodeId) -> Option<&IndirectionEdge> {
        self.edges.get(&EdgeKey {
            src: node,
            dest: node,
            kind: EdgeKind::Trigger,
        })
    }

    /// Traversal function of a single-valued or ranged edge.
    pub fn traversal_function(&self, edge: &IndirectionEdge) -> Option<TraversalFunction> {
        let stride = self.node(edge.src).map(|n| n.element_stride).unwrap_or(1);
        TraversalFunction::for_edge(edge.kind, stride)
    }
}
