//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::IpAddr;

use const_addrs::{ip4, net4};
use ipnetwork::IpNetwork;
use sable_fib2mrib::node::Fib2mribNode;
use sable_fib2mrib::route::Fib2mribRoute;
use sable_fib2mrib::tasks::InformRibIo;
use sable_fib2mrib::tasks::messages::input::RibResponseMsg;
use sable_utils::policy::{
    PolicyAction, PolicyFilterId, PolicyMatch, PolicyProgram, PolicyTerm,
};
use sable_utils::rib::{RibReceiver, RibRequest};
use sable_utils::service::ServiceStatus;
use sable_utils::southbound::{FteKeyMsg, FteMsg, IfAddr, IfAtom, IfTree, VifAtom};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

struct TestNode {
    node: Fib2mribNode,
    rib_rx: RibReceiver,
    response_rx: UnboundedReceiver<RibResponseMsg>,
}

// A route operation observed at the RIB boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
enum RibOp {
    Add {
        net: IpNetwork,
        nexthop: IpAddr,
        ifname: String,
        vifname: String,
        multicast: bool,
        unicast: bool,
        tags: Vec<u32>,
    },
    Replace(IpNetwork),
    Delete {
        net: IpNetwork,
        multicast: bool,
    },
}

impl TestNode {
    fn new() -> TestNode {
        let (rib_tx, rib_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let mut node = Fib2mribNode::new(InformRibIo {
            rib: rib_tx,
            response_txp: response_tx,
        });
        node.startup();
        TestNode {
            node,
            rib_rx,
            response_rx,
        }
    }

    // Collect and acknowledge every route request issued so far.
    async fn drain_ops(&mut self) -> Vec<RibOp> {
        let mut ops = vec![];
        while let Ok(request) = self.rib_rx.try_recv() {
            let (op, responder) = match request {
                RibRequest::AddRoute { route, responder }
                | RibRequest::AddInterfaceRoute { route, responder } => (
                    RibOp::Add {
                        net: route.net,
                        nexthop: route.nexthop,
                        ifname: route.ifname,
                        vifname: route.vifname,
                        multicast: route.multicast,
                        unicast: route.unicast,
                        tags: route.tags.iter().collect(),
                    },
                    responder,
                ),
                RibRequest::ReplaceRoute { route, responder } => {
                    (RibOp::Replace(route.net), responder)
                }
                RibRequest::DeleteRoute { route, responder } => (
                    RibOp::Delete {
                        net: route.net,
                        multicast: route.multicast,
                    },
                    responder,
                ),
                request => panic!("unexpected RIB request: {:?}", request),
            };
            ops.push(op);
            let _ = responder.send(Ok(()));
            match self.response_rx.recv().await.unwrap() {
                RibResponseMsg::Response { result } => {
                    self.node.rib_response(result);
                }
                RibResponseMsg::Retry => self.node.rib_retry(),
            }
        }
        ops
    }
}

// An interface tree with eth0/vif0 carrying 192.168.1.2/24.
fn iftree(eth0_up: bool) -> IfTree {
    let mut ipv4_addrs = BTreeMap::new();
    ipv4_addrs.insert(
        ip4!("192.168.1.2"),
        IfAddr {
            addr: ip4!("192.168.1.2"),
            prefix_len: 24,
        },
    );
    let vif = VifAtom {
        name: "vif0".to_owned(),
        enabled: true,
        ipv4_addrs,
        ipv6_addrs: BTreeMap::new(),
    };
    let mut vifs = BTreeMap::new();
    vifs.insert("vif0".to_owned(), vif);
    let iface = IfAtom {
        name: "eth0".to_owned(),
        enabled: eth0_up,
        no_carrier: false,
        vifs,
    };
    let mut interfaces = BTreeMap::new();
    interfaces.insert("eth0".to_owned(), iface);
    IfTree { interfaces }
}

fn fte(net: IpNetwork, nexthop: IpAddr, ifname: &str, vifname: &str) -> FteMsg {
    FteMsg {
        net,
        nexthop,
        ifname: ifname.to_owned(),
        vifname: vifname.to_owned(),
        metric: 0,
        admin_distance: 10,
        protocol_origin: "kernel".to_owned(),
        self_installed: false,
    }
}

fn add_route(node: &mut Fib2mribNode, fte: FteMsg) {
    let mut route = Fib2mribRoute::from_fte(fte);
    route.set_add_route();
    node.add_route(route).unwrap();
}

// The full lifecycle: a kernel route is accepted and tagged, withdrawn
// when its interface goes down, and re-added when it comes back.
#[tokio::test]
async fn redistribute_lifecycle() {
    let mut t = TestNode::new();

    // Tag accepted routes for later source matching.
    t.node
        .configure_filter(
            PolicyFilterId::ExportSourceMatch,
            PolicyProgram {
                terms: vec![PolicyTerm {
                    matches: vec![],
                    action: PolicyAction::SetTag(100),
                }],
            },
        )
        .unwrap();

    t.node.tree_update(&iftree(true));
    assert_eq!(t.node.node_status().0, ServiceStatus::Running);

    let net = net4!("10.0.0.0/24");
    add_route(
        &mut t.node,
        fte(net.into(), ip4!("192.168.1.1").into(), "eth0", "vif0"),
    );
    assert_eq!(
        t.drain_ops().await,
        vec![RibOp::Add {
            net: net.into(),
            nexthop: ip4!("192.168.1.1").into(),
            ifname: "eth0".to_owned(),
            vifname: "vif0".to_owned(),
            multicast: true,
            unicast: false,
            tags: vec![100],
        }]
    );

    // eth0 goes down: the route is withdrawn from the multicast table.
    t.node.tree_update(&iftree(false));
    assert_eq!(
        t.drain_ops().await,
        vec![RibOp::Delete {
            net: net.into(),
            multicast: true,
        }]
    );

    // eth0 comes back: the route is re-added.
    t.node.tree_update(&iftree(true));
    let ops = t.drain_ops().await;
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], RibOp::Add { net: n, .. } if *n == net.into()));
}

// On some platforms deleting an interface address silently removes the
// routes through it; an add for a known prefix must act as a replace.
#[tokio::test]
async fn add_for_known_net_is_replace() {
    let mut t = TestNode::new();
    t.node.tree_update(&iftree(true));

    let net = net4!("10.0.0.0/24");
    add_route(
        &mut t.node,
        fte(net.into(), ip4!("192.168.1.1").into(), "eth0", "vif0"),
    );
    t.drain_ops().await;

    add_route(
        &mut t.node,
        fte(net.into(), ip4!("192.168.1.9").into(), "eth0", "vif0"),
    );
    assert_eq!(t.drain_ops().await, vec![RibOp::Replace(net.into())]);
    assert_eq!(t.node.route_count(), 1);
}

// A gateway route without interface information is enriched from the
// directly-connected subnet containing its next hop.
#[tokio::test]
async fn gateway_route_enrichment() {
    let mut t = TestNode::new();
    t.node.tree_update(&iftree(true));

    let net = net4!("10.0.0.0/24");
    add_route(
        &mut t.node,
        fte(net.into(), ip4!("192.168.1.1").into(), "", ""),
    );

    let ops = t.drain_ops().await;
    assert_eq!(ops.len(), 1);
    let RibOp::Add {
        ifname, vifname, ..
    } = &ops[0]
    else {
        panic!("expected an add");
    };
    assert_eq!(ifname, "eth0");
    assert_eq!(vifname, "vif0");
}

// A route rejected by the import filter is stored but not offered to the
// RIB; resetting the filter and re-filtering adds it.
#[tokio::test]
async fn import_filter_rejects() {
    let mut t = TestNode::new();
    t.node.tree_update(&iftree(true));

    let net = net4!("10.0.0.0/24");
    t.node
        .configure_filter(
            PolicyFilterId::Import,
            PolicyProgram {
                terms: vec![PolicyTerm {
                    matches: vec![PolicyMatch::NetworkExact(net.into())],
                    action: PolicyAction::Reject,
                }],
            },
        )
        .unwrap();

    add_route(
        &mut t.node,
        fte(net.into(), ip4!("192.168.1.1").into(), "eth0", "vif0"),
    );
    assert_eq!(t.drain_ops().await, vec![]);
    assert_eq!(t.node.route_count(), 1);

    // After the filter is removed, re-filtering emits the add.
    t.node.reset_filter(PolicyFilterId::Import);
    t.node.push_routes();
    let ops = t.drain_ops().await;
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], RibOp::Add { .. }));
}

// A FIB delete withdraws the route and forgets it.
#[tokio::test]
async fn delete_route() {
    let mut t = TestNode::new();
    t.node.tree_update(&iftree(true));

    let net = net4!("10.0.0.0/24");
    add_route(
        &mut t.node,
        fte(net.into(), ip4!("192.168.1.1").into(), "eth0", "vif0"),
    );
    t.drain_ops().await;

    let mut route = Fib2mribRoute::from_fte_key(FteKeyMsg {
        net: net.into(),
        ifname: "eth0".to_owned(),
        vifname: "vif0".to_owned(),
    });
    route.set_delete_route();
    t.node.delete_route(route).unwrap();

    assert_eq!(
        t.drain_ops().await,
        vec![RibOp::Delete {
            net: net.into(),
            multicast: true,
        }]
    );
    assert_eq!(t.node.route_count(), 0);
}

// Disabling the node withdraws its routes; enabling replays them.
#[tokio::test]
async fn disable_enable_push_pull() {
    let mut t = TestNode::new();
    t.node.tree_update(&iftree(true));

    let net = net4!("10.0.0.0/24");
    add_route(
        &mut t.node,
        fte(net.into(), ip4!("192.168.1.1").into(), "eth0", "vif0"),
    );
    t.drain_ops().await;

    t.node.set_enabled(false);
    assert_eq!(
        t.drain_ops().await,
        vec![RibOp::Delete {
            net: net.into(),
            multicast: true,
        }]
    );

    t.node.set_enabled(true);
    let ops = t.drain_ops().await;
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], RibOp::Add { .. }));
}
