//! Walking a node's adjacency lists.
//!
//! Every node heads two singly linked lists threaded through edges: the edges
//! it is the first endpoint of, and the edges it is the second endpoint of.
//! New edges are pushed at the head, so both lists read newest first.

use crate::types::{ObjectKind, Result, RowId, SombraError};

use super::handle::Handle;
use super::record::layout;
use super::txn::Session;

/// Which of a node's two adjacency lists to walk.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Dir {
    /// Edges whose first endpoint is the node.
    First,
    /// Edges whose second endpoint is the node.
    Second,
}

impl Dir {
    pub(crate) fn head_field(self) -> usize {
        match self {
            Dir::First => layout::NODE_FIRST_EDGE,
            Dir::Second => layout::NODE_SECOND_EDGE,
        }
    }

    pub(crate) fn next_field(self) -> usize {
        match self {
            Dir::First => layout::EDGE_NEXT_FIRST,
            Dir::Second => layout::EDGE_NEXT_SECOND,
        }
    }
}

/// Edges collected from one adjacency list, newest first.
pub struct EdgeCursor {
    edges: Vec<Handle>,
    index: usize,
}

impl EdgeCursor {
    /// Number of edges collected.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns true if the list was empty.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl Iterator for EdgeCursor {
    type Item = Handle;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.edges.get(self.index).copied()?;
        self.index += 1;
        Some(item)
    }
}

/// Collects the edges on `node`'s `dir` list.
pub fn edges(session: &Session, node: Handle, dir: Dir) -> Result<EdgeCursor> {
    if node.kind() != ObjectKind::Node {
        return Err(SombraError::Invalid("expected a node handle"));
    }
    let limit = session.engine().geometry().max_rows;
    let mut edges = Vec::new();
    let mut next = RowId::from_word(session.load(node.row())?.get(dir.head_field()));
    while let Some(row) = next {
        if edges.len() as u64 >= limit {
            return Err(SombraError::Corruption("adjacency list does not terminate"));
        }
        session.metrics().adjacency_walk(dir);
        edges.push(Handle::new(row, ObjectKind::Edge));
        next = RowId::from_word(session.load(row)?.get(dir.next_field()));
    }
    Ok(EdgeCursor { edges, index: 0 })
}
