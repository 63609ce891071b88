use crate::types::{ObjectKind, Result, RowId, SombraError, TypeId};

use super::record::{EdgeRecord, NodeRecord, Record};
use super::txn::{Mutation, Session};
use super::{edge, node};

/// Reference to an object by row handle.
///
/// A handle always resolves to the current version of its row in the
/// session's transaction, so it stays valid across copy-on-write updates.
/// Records obtained through [`Handle::get`] are owned copies and keep showing
/// the bytes they were read with.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Handle {
    row: RowId,
    kind: ObjectKind,
}

impl Handle {
    pub(crate) fn new(row: RowId, kind: ObjectKind) -> Self {
        Self { row, kind }
    }

    /// Row handle this object lives in.
    pub fn row(&self) -> RowId {
        self.row
    }

    /// Whether this handle refers to a node or an edge.
    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Returns true if the row holds a live object in the session's view.
    pub fn is_live(&self, session: &Session) -> Result<bool> {
        session.is_live(self.row)
    }

    /// Reads the current version of the object.
    pub fn get(&self, session: &Session) -> Result<Record> {
        let record = session.load(self.row)?.into_record()?;
        if record.header().kind != self.kind {
            return Err(SombraError::Corruption("row holds a record of another kind"));
        }
        Ok(record)
    }

    /// Reads the object as a node.
    pub fn node(&self, session: &Session) -> Result<NodeRecord> {
        match self.get(session)? {
            Record::Node(node) => Ok(node),
            Record::Edge(_) => Err(SombraError::Invalid("handle refers to an edge")),
        }
    }

    /// Reads the object as an edge.
    pub fn edge(&self, session: &Session) -> Result<EdgeRecord> {
        match self.get(session)? {
            Record::Edge(edge) => Ok(edge),
            Record::Node(_) => Err(SombraError::Invalid("handle refers to a node")),
        }
    }

    /// Copies the current version to fresh heap words and makes the copy the
    /// row's current version in this transaction.
    pub fn cow_clone(&self, session: &mut Session) -> Result<()> {
        let mut mutation = Mutation::default();
        mutation.patch(session, self.row)?;
        session.apply(mutation)
    }

    /// Replaces the payload with a new version sized for `payload`.
    pub fn update_payload(&self, session: &mut Session, payload: &[u8]) -> Result<()> {
        let buf = session.load(self.row)?.with_payload(payload)?;
        let mut mutation = Mutation::default();
        mutation.insert(self.row, buf);
        session.apply(mutation)
    }

    /// Removes the object.
    ///
    /// Nodes refuse removal while edges reference them; edges are unlinked
    /// from both endpoints' adjacency lists first.
    pub fn remove(&self, session: &mut Session) -> Result<()> {
        match self.kind {
            ObjectKind::Node => node::remove(session, *self),
            ObjectKind::Edge => edge::remove(session, *self),
        }
    }

    /// First live `kind` object of `type_id` in row order.
    pub fn find_first(
        session: &Session,
        kind: ObjectKind,
        type_id: TypeId,
    ) -> Result<Option<Handle>> {
        session.scan_from(RowId(1), kind, type_id)
    }

    /// Next live object after this one with the same kind and type.
    ///
    /// Works on a handle this transaction has just removed, so a scan can
    /// remove objects as it goes.
    pub fn find_next(&self, session: &Session) -> Result<Option<Handle>> {
        let type_id = session.type_of(self.row)?;
        session.scan_from(RowId(self.row.0 + 1), self.kind, type_id)
    }

    /// Iterates every live `kind` object of `type_id` in creation order.
    pub fn scan(session: &Session, kind: ObjectKind, type_id: TypeId) -> TypeScan<'_> {
        TypeScan {
            session,
            kind,
            type_id,
            next: Some(RowId(1)),
        }
    }
}

/// Iterator over objects of one type, see [`Handle::scan`].
pub struct TypeScan<'s> {
    session: &'s Session,
    kind: ObjectKind,
    type_id: TypeId,
    next: Option<RowId>,
}

impl Iterator for TypeScan<'_> {
    type Item = Result<Handle>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next.take()?;
        match self.session.scan_from(start, self.kind, self.type_id) {
            Ok(Some(handle)) => {
                self.next = Some(RowId(handle.row.0 + 1));
                Some(Ok(handle))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Engine, EngineOptions};
    use crate::types::ObjectId;
    use tempfile::tempdir;

    #[test]
    fn update_leaves_earlier_reads_untouched() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::create(EngineOptions::new(dir.path()).max_rows(8))?;
        let mut session = engine.session();
        session.begin_transaction()?;
        let handle = node::create(&mut session, ObjectId(1), TypeId(1), b"before")?;
        let before = handle.get(&session)?;
        handle.update_payload(&mut session, b"after, and longer")?;
        assert_eq!(before.payload(), b"before");
        assert_eq!(handle.get(&session)?.payload(), b"after, and longer");
        assert_eq!(handle.get(&session)?.type_id(), TypeId(1));
        session.commit_transaction()
    }

    #[test]
    fn cow_clone_moves_the_row_to_a_new_version() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::create(EngineOptions::new(dir.path()).max_rows(8))?;
        let mut session = engine.session();
        session.begin_transaction()?;
        let handle = node::create(&mut session, ObjectId(1), TypeId(1), b"x")?;
        let first = session.offset(handle.row())?;
        handle.cow_clone(&mut session)?;
        assert_ne!(session.offset(handle.row())?, first);
        assert_eq!(handle.get(&session)?.payload(), b"x");
        session.commit_transaction()
    }

    #[test]
    fn find_next_continues_past_a_removed_handle() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::create(EngineOptions::new(dir.path()).max_rows(8))?;
        let mut session = engine.session();
        session.begin_transaction()?;
        for id in 1..=4 {
            let ty = if id == 3 { TypeId(2) } else { TypeId(1) };
            node::create(&mut session, ObjectId(id), ty, b"")?;
        }
        session.commit_transaction()?;

        session.begin_transaction()?;
        let mut removed = Vec::new();
        let mut cursor = Handle::find_first(&session, ObjectKind::Node, TypeId(1))?;
        while let Some(handle) = cursor {
            removed.push(handle.get(&session)?.id().0);
            handle.remove(&mut session)?;
            cursor = handle.find_next(&session)?;
        }
        assert_eq!(removed, vec![1, 2, 4]);
        assert!(Handle::find_first(&session, ObjectKind::Node, TypeId(1))?.is_none());
        assert!(Handle::find_first(&session, ObjectKind::Node, TypeId(2))?.is_some());
        session.commit_transaction()?;

        session.begin_transaction()?;
        let never_live = Handle::new(RowId(7), ObjectKind::Node);
        assert!(matches!(
            never_live.find_next(&session),
            Err(SombraError::Invalid(_))
        ));
        session.commit_transaction()
    }

    #[test]
    fn scans_skip_other_kinds_with_the_same_type() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::create(EngineOptions::new(dir.path()).max_rows(8))?;
        let mut session = engine.session();
        session.begin_transaction()?;
        node::create(&mut session, ObjectId(1), TypeId(7), b"")?;
        node::create(&mut session, ObjectId(2), TypeId(7), b"")?;
        edge::create(&mut session, ObjectId(1), TypeId(7), ObjectId(1), ObjectId(2), b"")?;
        let edges: Vec<_> = Handle::scan(&session, ObjectKind::Edge, TypeId(7))
            .collect::<Result<_>>()?;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge(&session)?.header.id, ObjectId(1));
        let nodes: Vec<_> = Handle::scan(&session, ObjectKind::Node, TypeId(7))
            .collect::<Result<_>>()?;
        assert_eq!(nodes.len(), 2);
        assert!(Handle::find_first(&session, ObjectKind::Node, TypeId(8))?.is_none());
        session.commit_transaction()
    }
}
