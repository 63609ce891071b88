mod common;

use proptest::prelude::*;
use sombra_shm::storage::adjacency::{edges, Dir};
use sombra_shm::storage::{edge, node, Handle, Session};
use sombra_shm::types::{ObjectId, ObjectKind, TypeId};

const NODES: u64 = 6;

#[derive(Debug, Clone)]
enum Operation {
    CreateNode { type_id: u64 },
    RemoveNode { pick: usize },
    UpdateNode { pick: usize, payload: Vec<u8> },
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => (1u64..=3).prop_map(|type_id| Operation::CreateNode { type_id }),
        1 => any::<usize>().prop_map(|pick| Operation::RemoveNode { pick }),
        1 => (any::<usize>(), prop::collection::vec(any::<u8>(), 0..40))
            .prop_map(|(pick, payload)| Operation::UpdateNode { pick, payload }),
    ]
}

#[derive(Debug, Clone)]
enum EdgeOp {
    Create { first: u64, second: u64 },
    Remove { pick: usize },
}

fn arb_edge_op() -> impl Strategy<Value = EdgeOp> {
    prop_oneof![
        3 => (1u64..=NODES, 1u64..=NODES).prop_map(|(first, second)| EdgeOp::Create { first, second }),
        1 => any::<usize>().prop_map(|pick| EdgeOp::Remove { pick }),
    ]
}

fn scan_ids(session: &Session, type_id: u64) -> Vec<u64> {
    Handle::scan(session, ObjectKind::Node, TypeId(type_id))
        .map(|h| h.unwrap().get(session).unwrap().id().0)
        .collect()
}

fn list_ids(session: &Session, node_id: u64, dir: Dir) -> Vec<u64> {
    let handle = node::open(session, ObjectId(node_id)).unwrap().unwrap();
    edges(session, handle, dir)
        .unwrap()
        .map(|e| e.get(session).unwrap().id().0)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_payloads_survive_commit(
        nodes in prop::collection::vec((1u64..=4, prop::collection::vec(any::<u8>(), 0..64)), 1..40)
    ) {
        let (_dir, engine) = common::engine();
        let mut writer = engine.session();
        writer.begin_transaction().unwrap();
        for (idx, (type_id, payload)) in nodes.iter().enumerate() {
            node::create(&mut writer, ObjectId(idx as u64 + 1), TypeId(*type_id), payload).unwrap();
        }
        writer.commit_transaction().unwrap();

        let mut reader = engine.session();
        reader.begin_transaction().unwrap();
        for (idx, (type_id, payload)) in nodes.iter().enumerate() {
            let handle = node::open(&reader, ObjectId(idx as u64 + 1)).unwrap();
            prop_assert!(handle.is_some(), "node {} should exist", idx + 1);
            let record = handle.unwrap().node(&reader).unwrap();
            prop_assert_eq!(record.header.type_id, TypeId(*type_id));
            prop_assert_eq!(&record.payload, payload);
        }
        reader.commit_transaction().unwrap();
    }

    #[test]
    fn prop_type_scan_matches_creation_order(ops in prop::collection::vec(arb_operation(), 1..80)) {
        let (_dir, engine) = common::engine();
        let mut session = engine.session();
        // (id, type) of live nodes in creation order
        let mut live: Vec<(u64, u64)> = Vec::new();
        let mut next_id = 1u64;

        session.begin_transaction().unwrap();
        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Operation::CreateNode { type_id } => {
                    node::create(&mut session, ObjectId(next_id), TypeId(type_id), b"").unwrap();
                    live.push((next_id, type_id));
                    next_id += 1;
                }
                Operation::RemoveNode { pick } if !live.is_empty() => {
                    let (id, _) = live.remove(pick % live.len());
                    node::open(&session, ObjectId(id)).unwrap().unwrap().remove(&mut session).unwrap();
                }
                Operation::UpdateNode { pick, payload } if !live.is_empty() => {
                    let (id, _) = live[pick % live.len()];
                    let handle = node::open(&session, ObjectId(id)).unwrap().unwrap();
                    handle.update_payload(&mut session, &payload).unwrap();
                }
                _ => {}
            }
            if step % 10 == 9 {
                session.commit_transaction().unwrap();
                session.begin_transaction().unwrap();
            }
        }
        session.commit_transaction().unwrap();

        session.begin_transaction().unwrap();
        for type_id in 1..=3 {
            let expected: Vec<u64> = live.iter().filter(|(_, t)| *t == type_id).map(|(id, _)| *id).collect();
            prop_assert_eq!(scan_ids(&session, type_id), expected);
        }
        session.commit_transaction().unwrap();
        prop_assert_eq!(engine.stats().live_rows, live.len() as u64);
    }

    #[test]
    fn prop_adjacency_lists_are_newest_first(ops in prop::collection::vec(arb_edge_op(), 1..60)) {
        let (_dir, engine) = common::engine();
        let mut session = engine.session();
        session.begin_transaction().unwrap();
        for id in 1..=NODES {
            node::create(&mut session, ObjectId(id), TypeId(1), b"").unwrap();
        }
        // (edge id, first, second) of live edges, oldest first
        let mut live: Vec<(u64, u64, u64)> = Vec::new();
        let mut next_id = 1u64;
        for op in ops {
            match op {
                EdgeOp::Create { first, second } => {
                    edge::create(&mut session, ObjectId(next_id), TypeId(1), ObjectId(first), ObjectId(second), b"")
                        .unwrap();
                    live.push((next_id, first, second));
                    next_id += 1;
                }
                EdgeOp::Remove { pick } if !live.is_empty() => {
                    let (id, _, _) = live.remove(pick % live.len());
                    edge::open(&session, ObjectId(id)).unwrap().unwrap().remove(&mut session).unwrap();
                }
                EdgeOp::Remove { .. } => {}
            }
        }
        session.commit_transaction().unwrap();

        session.begin_transaction().unwrap();
        for id in 1..=NODES {
            let outgoing: Vec<u64> = live.iter().rev().filter(|e| e.1 == id).map(|e| e.0).collect();
            let incoming: Vec<u64> = live.iter().rev().filter(|e| e.2 == id).map(|e| e.0).collect();
            prop_assert_eq!(list_ids(&session, id, Dir::First), outgoing);
            prop_assert_eq!(list_ids(&session, id, Dir::Second), incoming);
        }
        session.commit_transaction().unwrap();
    }

    #[test]
    fn prop_rollback_leaves_committed_state_unchanged(
        committed in 1u64..20,
        discarded in 1u64..20,
    ) {
        let (_dir, engine) = common::engine();
        let mut session = engine.session();
        session.begin_transaction().unwrap();
        for id in 1..=committed {
            node::create(&mut session, ObjectId(id), TypeId(1), &id.to_le_bytes()).unwrap();
        }
        session.commit_transaction().unwrap();

        session.begin_transaction().unwrap();
        for id in 1..=committed {
            let handle = node::open(&session, ObjectId(id)).unwrap().unwrap();
            handle.update_payload(&mut session, b"scratch").unwrap();
        }
        for id in committed + 1..=committed + discarded {
            node::create(&mut session, ObjectId(id), TypeId(1), b"").unwrap();
        }
        session.rollback_transaction().unwrap();

        session.begin_transaction().unwrap();
        let ids = scan_ids(&session, 1);
        prop_assert_eq!(ids, (1..=committed).collect::<Vec<_>>());
        for id in 1..=committed {
            let record = node::open(&session, ObjectId(id)).unwrap().unwrap().get(&session).unwrap();
            prop_assert_eq!(record.payload(), &id.to_le_bytes()[..]);
        }
        session.commit_transaction().unwrap();
    }
}
