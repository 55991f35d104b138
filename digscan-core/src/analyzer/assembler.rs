//! DIG Assembly
//!
//! Finalizes node records and synthesizes trigger edges.
//!
//! # Algorithm
//! 1. Drop trigger edges from any previous assembly.
//! 2. Resolve unknown strides to one byte.
//! 3. Mark every node targeted by a single-valued or ranged edge.
//! 4. For every unmarked node, breadth-first search the traversal edges; the
//!    longest shortest path selects the trigger look-ahead.
//!
//! Assembly is idempotent.

use crate::analyzer::dig::{Dig, IndirectionEdge, NodeId, TriggerFunction};
use bitvec::prelude::*;
use smallvec::SmallVec;
use std::collections::{BTreeMap, VecDeque};

pub struct DigAssembler;

impl DigAssembler {
    /// Finalize `dig` in place.
    ///
    /// # Returns
    /// `usize` - Number of trigger edges
    pub fn assemble(dig: &mut Dig) -> usize {
        dig.edges.retain(|e| e.kind.is_traversal());

        for node in &mut dig.nodes {
            if node.element_stride <= 0 {
                node.element_stride = 1;
            }
            node.has_incoming_edge = false;
        }

        let node_count = dig.nodes.len();
        let mut incoming = bitvec![0; node_count];
        let mut adjacency: BTreeMap<NodeId, SmallVec<[NodeId; 4]>> = BTreeMap::new();
        for edge in dig.edges.iter() {
            if (edge.dest as usize) < node_count {
                incoming.set(edge.dest as usize, true);
            }
            let targets = adjacency.entry(edge.src).or_default();
            if !targets.contains(&edge.dest) {
                targets.push(edge.dest);
            }
        }

        let mut triggers = Vec::new();
        for node in &mut dig.nodes {
            node.has_incoming_edge = incoming[node.id as usize];
            if node.has_incoming_edge {
                continue;
            }
            let depth = Self::reachability_depth(&adjacency, node_count, node.id);
            let trigger = TriggerFunction::for_depth(depth);
            log::debug!("Trigger on node {}: depth {}, {}", node.id, depth, trigger.name());
            triggers.push(IndirectionEdge::trigger(node.id, trigger));
        }

        let count = triggers.len();
        for trigger in triggers {
            dig.edges.insert(trigger);
        }
        count
    }

    /// Longest shortest-path distance reachable from `start`.
    pub fn reachability_depth(
        adjacency: &BTreeMap<NodeId, SmallVec<[NodeId; 4]>>,
        node_count: usize,
        start: NodeId,
    ) -> u32 {
        let mut visited = bitvec![0; node_count.max(start as usize + 1)];
        let mut queue = VecDeque::new();
        visited.set(start as usize, true);
        queue.push_back((start, 0u32));
        let mut deepest = 0;

        while let Some((node, depth)) = queue.pop_front() {
            deepest = deepest.max(depth);
            let Some(targets) = adjacency.get(&node) else {
                continue;
            };
            for &next in targets {
                let index = next as usize;
                if index < visited.len() && !visited[index] {
                    visited.set(index, true);
                    queue.push_back((next, depth + 1));
                }
            }
        }
        deepest
    }

    /// Depth of `node` in an assembled graph.
    pub fn depth_of(dig: &Dig, node: NodeId) -> u32 {
        let mut adjacency: BTreeMap<NodeId, SmallVec<[NodeId; 4]>> = BTreeMap::new();
        for edge in dig.traversal_edges() {
            adjacency.entry(edge.src).or_default().push(edge.dest);
        }
        Self::reachability_depth(&adjacency, dig.nodes.len(), node)
    }
}
