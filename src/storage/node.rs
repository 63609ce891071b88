//! Node creation, lookup and removal.

use tracing::trace;

use crate::types::{ObjectId, ObjectKind, Result, SombraError, TypeId};

use super::handle::Handle;
use super::record::{layout, RecordBuf};
use super::txn::{Mutation, Session};

/// Creates a node with both adjacency lists empty.
///
/// # Errors
/// * [`SombraError::InvalidId`] - `id` is zero or has the top bit set
/// * [`SombraError::DuplicateId`] - `id` already maps to a live node
/// * [`SombraError::OutOfMemory`] - row handles, heap words, index overflow
///   entries or the transaction log are exhausted
pub fn create(
    session: &mut Session,
    id: ObjectId,
    type_id: TypeId,
    payload: &[u8],
) -> Result<Handle> {
    let reservation = session.reserve_id(id, ObjectKind::Node)?;
    let row = session.allocate_row()?;
    let mut mutation = Mutation::default();
    mutation.insert(row, RecordBuf::new(ObjectKind::Node, id, type_id, payload));
    mutation.claim(reservation, row);
    session.apply(mutation)?;
    session.metrics().node_created();
    trace!(id = %id, row = %row, "node created");
    Ok(Handle::new(row, ObjectKind::Node))
}

/// Looks up a live node by id.
///
/// Lookups go through the shared identifier index, which is not versioned.
/// Once another transaction's removal of `id` commits, this returns `None`
/// even while this transaction's snapshot still holds the node: handles
/// already obtained and type scans keep resolving it, and a create of the
/// same id is accepted here but loses at commit if the id is live again.
pub fn open(session: &Session, id: ObjectId) -> Result<Option<Handle>> {
    session.find(id, ObjectKind::Node)
}

/// Removes a node that no edge references. Removing a dead handle does nothing.
pub fn remove(session: &mut Session, handle: Handle) -> Result<()> {
    if handle.kind() != ObjectKind::Node {
        return Err(SombraError::Invalid("expected a node handle"));
    }
    if !handle.is_live(session)? {
        return Ok(());
    }
    let buf = session.load(handle.row())?;
    let id = ObjectId(buf.get(layout::ID));
    if buf.get(layout::NODE_FIRST_EDGE) != 0 || buf.get(layout::NODE_SECOND_EDGE) != 0 {
        return Err(SombraError::DependentEdgesExist(id.0));
    }
    let mut mutation = Mutation::default();
    mutation.remove(handle.row(), id.index_key(ObjectKind::Node));
    session.apply(mutation)?;
    session.metrics().node_removed();
    trace!(id = %id, row = %handle.row(), "node removed");
    Ok(())
}
