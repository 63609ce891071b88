//! Edge creation, lookup and removal.
//!
//! Creating an edge pushes it onto the head of its first endpoint's first
//! list and its second endpoint's second list. Both endpoint nodes get new
//! versions in the same step, so the edge and its links become visible
//! together at commit.

use tracing::trace;

use crate::types::{ObjectId, ObjectKind, Result, RowId, SombraError, TypeId};

use super::adjacency::Dir;
use super::handle::Handle;
use super::record::{layout, RecordBuf};
use super::txn::{Mutation, Session};

fn endpoint_field(dir: Dir) -> usize {
    match dir {
        Dir::First => layout::EDGE_FIRST_NODE,
        Dir::Second => layout::EDGE_SECOND_NODE,
    }
}

/// Creates an edge from node `first` to node `second`.
///
/// # Errors
/// * [`SombraError::InvalidId`] - one of the ids is zero or has the top bit set
/// * [`SombraError::InvalidNodeId`] - an endpoint does not resolve to a live node
/// * [`SombraError::DuplicateId`] - `id` already maps to a live edge
/// * [`SombraError::OutOfMemory`] - a fixed pool is exhausted
pub fn create(
    session: &mut Session,
    id: ObjectId,
    type_id: TypeId,
    first: ObjectId,
    second: ObjectId,
    payload: &[u8],
) -> Result<Handle> {
    let id = id.validate()?;
    first.validate()?;
    second.validate()?;
    let first_node = super::node::open(session, first)?.ok_or(SombraError::InvalidNodeId(first.0))?;
    let second_node =
        super::node::open(session, second)?.ok_or(SombraError::InvalidNodeId(second.0))?;
    let reservation = session.reserve_id(id, ObjectKind::Edge)?;
    let row = session.allocate_row()?;

    let mut edge = RecordBuf::new(ObjectKind::Edge, id, type_id, payload);
    edge.set(layout::EDGE_FIRST_ID, first.0);
    edge.set(layout::EDGE_SECOND_ID, second.0);
    edge.set(layout::EDGE_FIRST_NODE, first_node.row().0);
    edge.set(layout::EDGE_SECOND_NODE, second_node.row().0);

    let mut mutation = Mutation::default();
    for (dir, node) in [(Dir::First, first_node), (Dir::Second, second_node)] {
        let endpoint = mutation.patch(session, node.row())?;
        edge.set(dir.next_field(), endpoint.get(dir.head_field()));
        endpoint.set(dir.head_field(), row.0);
    }
    mutation.insert(row, edge);
    mutation.claim(reservation, row);
    session.apply(mutation)?;
    session.metrics().edge_created();
    trace!(id = %id, row = %row, first = %first, second = %second, "edge created");
    Ok(Handle::new(row, ObjectKind::Edge))
}

/// Looks up a live edge by id.
///
/// Lookups go through the shared identifier index, which is not versioned.
/// Once another transaction's removal of `id` commits, this returns `None`
/// even while this transaction's snapshot still holds the edge: handles
/// already obtained and type scans keep resolving it, and a create of the
/// same id is accepted here but loses at commit if the id is live again.
pub fn open(session: &Session, id: ObjectId) -> Result<Option<Handle>> {
    session.find(id, ObjectKind::Edge)
}

/// Unlinks an edge from both endpoints and removes it. Removing a dead handle
/// does nothing.
pub fn remove(session: &mut Session, handle: Handle) -> Result<()> {
    if handle.kind() != ObjectKind::Edge {
        return Err(SombraError::Invalid("expected an edge handle"));
    }
    if !handle.is_live(session)? {
        return Ok(());
    }
    let edge = session.load(handle.row())?;
    let id = ObjectId(edge.get(layout::ID));
    let mut mutation = Mutation::default();
    for dir in [Dir::First, Dir::Second] {
        let node = RowId(edge.get(endpoint_field(dir)));
        unlink(session, &mut mutation, node, handle.row(), edge.get(dir.next_field()), dir)?;
    }
    mutation.remove(handle.row(), id.index_key(ObjectKind::Edge));
    session.apply(mutation)?;
    session.metrics().edge_removed();
    trace!(id = %id, row = %handle.row(), "edge removed");
    Ok(())
}

/// Repoints whichever link on `node`'s `dir` list refers to `target` at `next`.
fn unlink(
    session: &Session,
    mutation: &mut Mutation,
    node: RowId,
    target: RowId,
    next: u64,
    dir: Dir,
) -> Result<()> {
    let head = session.load(node)?.get(dir.head_field());
    if head == target.0 {
        mutation.patch(session, node)?.set(dir.head_field(), next);
        return Ok(());
    }
    let limit = session.engine().geometry().max_rows;
    let mut current = head;
    for _ in 0..limit {
        let row = RowId::from_word(current)
            .ok_or(SombraError::Corruption("edge missing from its endpoint's adjacency list"))?;
        session.metrics().adjacency_walk(dir);
        let link = session.load(row)?.get(dir.next_field());
        if link == target.0 {
            mutation.patch(session, row)?.set(dir.next_field(), next);
            return Ok(());
        }
        current = link;
    }
    Err(SombraError::Corruption("adjacency list does not terminate"))
}
