//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip4, net4};
use sable_fib2mrib::error::Error;
use sable_fib2mrib::node::Fib2mribNode;
use sable_fib2mrib::tasks::InformRibIo;
use sable_fib2mrib::transaction::{
    MAX_PENDING_TRANSACTIONS, TransactionManager, TransactionOp,
};
use tokio::sync::mpsc;

fn test_node() -> Fib2mribNode {
    let (rib_tx, _rib_rx) = mpsc::unbounded_channel();
    let (response_tx, _response_rx) = mpsc::unbounded_channel();
    let mut node = Fib2mribNode::new(InformRibIo {
        rib: rib_tx,
        response_txp: response_tx,
    });
    node.startup();
    // Routes are applied with the node disabled so no RIB traffic needs
    // to be acknowledged; storage behavior is what's under test.
    node.set_enabled(false);
    node
}

fn test_manager() -> TransactionManager {
    let (transaction_tx, _transaction_rx) = mpsc::unbounded_channel();
    TransactionManager::new(transaction_tx)
}

fn add_op(net: &str, nexthop: &str) -> TransactionOp {
    TransactionOp::AddEntry4 {
        net: net.parse().unwrap(),
        nexthop: nexthop.parse().unwrap(),
        ifname: "eth0".to_owned(),
        vifname: "vif0".to_owned(),
        metric: 1,
        admin_distance: 10,
    }
}

// A committed batch applies all operations.
#[tokio::test]
async fn commit_applies_operations() {
    let mut node = test_node();
    let mut manager = test_manager();

    let tid = manager.start().unwrap();
    manager.add(tid, add_op("10.0.1.0/24", "192.168.1.1")).unwrap();
    manager.add(tid, add_op("10.0.2.0/24", "192.168.1.1")).unwrap();
    manager
        .add(
            tid,
            TransactionOp::DeleteEntry4 {
                net: net4!("10.0.1.0/24"),
                ifname: "eth0".to_owned(),
                vifname: "vif0".to_owned(),
            },
        )
        .unwrap();
    manager.commit(tid, &mut node).unwrap();

    assert_eq!(node.route_count(), 1);
    assert_eq!(
        node.routes_for(&net4!("10.0.2.0/24").into())[0].nexthop,
        std::net::IpAddr::V4(ip4!("192.168.1.1"))
    );
    assert_eq!(manager.pending_count(), 0);
}

// An aborted transaction leaves no trace.
#[tokio::test]
async fn abort_discards_operations() {
    let mut node = test_node();
    let mut manager = test_manager();

    let tid = manager.start().unwrap();
    manager.add(tid, add_op("10.0.1.0/24", "192.168.1.1")).unwrap();
    manager.abort(tid).unwrap();

    assert!(matches!(
        manager.commit(tid, &mut node),
        Err(Error::TransactionUnknown(_))
    ));
    assert_eq!(node.route_count(), 0);
}

// Only the first operation-level error is reported; the rest of the
// batch still runs.
#[tokio::test]
async fn commit_reports_first_error() {
    let mut node = test_node();
    let mut manager = test_manager();

    let tid = manager.start().unwrap();
    manager
        .add(
            tid,
            TransactionOp::DeleteEntry4 {
                net: net4!("10.9.9.0/24"),
                ifname: String::new(),
                vifname: String::new(),
            },
        )
        .unwrap();
    manager.add(tid, add_op("10.0.1.0/24", "192.168.1.1")).unwrap();

    let result = manager.commit(tid, &mut node);
    assert!(matches!(result, Err(Error::TransactionFailed(_))));
    // The add after the failing delete was still applied.
    assert_eq!(node.route_count(), 1);
}

// At most MAX_PENDING transactions may be open.
#[tokio::test]
async fn pending_transaction_limit() {
    let mut manager = test_manager();

    let mut tids = vec![];
    for _ in 0..MAX_PENDING_TRANSACTIONS {
        tids.push(manager.start().unwrap());
    }
    assert!(matches!(
        manager.start(),
        Err(Error::TransactionLimitReached)
    ));

    manager.abort(tids[0]).unwrap();
    manager.start().unwrap();
}

// Delete-all wipes one family at a time.
#[tokio::test]
async fn delete_all_by_family() {
    let mut node = test_node();
    let mut manager = test_manager();

    let tid = manager.start().unwrap();
    manager.add(tid, add_op("10.0.1.0/24", "192.168.1.1")).unwrap();
    manager.add(tid, add_op("10.0.2.0/24", "192.168.1.1")).unwrap();
    manager.commit(tid, &mut node).unwrap();
    assert_eq!(node.route_count(), 2);

    let tid = manager.start().unwrap();
    manager.add(tid, TransactionOp::DeleteAll6).unwrap();
    manager.commit(tid, &mut node).unwrap();
    assert_eq!(node.route_count(), 2);

    let tid = manager.start().unwrap();
    manager.add(tid, TransactionOp::DeleteAll4).unwrap();
    manager.commit(tid, &mut node).unwrap();
    assert_eq!(node.route_count(), 0);
}
