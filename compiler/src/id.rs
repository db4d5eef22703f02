// id.rs — Stable numeric identifiers for SDFG graph elements
//
// Nodes and edges reference each other through these IDs rather than through
// pointers. IDs are allocated monotonically per state and never reused, so a
// document that is loaded and saved again keeps every ID it was loaded with.
// The next-ID counters are persisted with the document, so an ID freed by a
// removal stays retired across a save and reload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SdfgError, SdfgResult};

/// Identifier of a node within one state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Identifier of a dataflow edge (memlet) within one state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EdgeId(pub u32);

/// Identifier of a state within a program.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StateId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Allocator for node and edge IDs of a single state.
///
/// `reserve_*` is used by the deserializer so that IDs read from a document
/// are never handed out again.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    next_node: u32,
    next_edge: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn alloc_edge(&mut self) -> EdgeId {
        let id = EdgeId(self.next_edge);
        self.next_edge += 1;
        id
    }

    /// Fails when `id` is the largest representable ID, since nothing could
    /// be allocated after it.
    pub fn reserve_node(&mut self, id: NodeId) -> SdfgResult<()> {
        let next = id
            .0
            .checked_add(1)
            .ok_or_else(|| SdfgError::Schema(format!("node id {} is out of range", id.0)))?;
        self.next_node = self.next_node.max(next);
        Ok(())
    }

    pub fn reserve_edge(&mut self, id: EdgeId) -> SdfgResult<()> {
        let next = id
            .0
            .checked_add(1)
            .ok_or_else(|| SdfgError::Schema(format!("edge id {} is out of range", id.0)))?;
        self.next_edge = self.next_edge.max(next);
        Ok(())
    }

    /// The IDs the next `alloc_node` / `alloc_edge` calls would return.
    pub fn counters(&self) -> (u32, u32) {
        (self.next_node, self.next_edge)
    }

    /// Move the counters forward to at least the given values.
    pub fn advance(&mut self, next_node: u32, next_edge: u32) {
        self.next_node = self.next_node.max(next_node);
        self.next_edge = self.next_edge.max(next_edge);
    }
}
