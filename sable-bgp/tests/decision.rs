//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use const_addrs::{ip4, net4};
use sable_bgp::rib::TableResult;

use crate::common::{RibOp, TestPipeline, attrs, attrs_lp, attrs_med};

// Two iBGP peers advertise the same prefix; the higher LocalPref wins.
// The local RIB first learns the route via peer 1, then sees a replace
// toward peer 2's next hop.
#[tokio::test]
async fn simple_win_by_localpref() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));
    let _rx2 = t.add_ibgp_peer(2, ip4!("2.0.0.0"), ip4!("2.0.0.2"));

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_lp(ip4!("2.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("2.0.0.1"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.1"))]
    );

    t.announce(2, net, attrs_lp(ip4!("2.0.0.2"), &[65001], 200));
    t.answer_register_host(ip4!("2.0.0.2"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Replace(net, ip4!("2.0.0.2"))]
    );
}

// Identical attributes from two peers: the lower router ID wins.
#[tokio::test]
async fn router_id_tiebreak() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("101.0.0.0"), ip4!("2.0.0.1"));
    let _rx2 = t.add_ibgp_peer(2, ip4!("100.0.0.0"), ip4!("2.0.0.2"));

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_lp(ip4!("2.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("2.0.0.1"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.1"))]
    );

    // Peer 2's router ID is lower, so its route wins the tiebreak.
    t.announce(2, net, attrs_lp(ip4!("2.0.0.2"), &[65001], 100));
    t.answer_register_host(ip4!("2.0.0.2"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Replace(net, ip4!("2.0.0.2"))]
    );
}

// Identical router IDs: the lower neighbor address wins.
#[tokio::test]
async fn neighbor_addr_tiebreak() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.2"));
    let _rx2 = t.add_ibgp_peer(2, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_lp(ip4!("10.0.1.1"), &[65001], 100));
    t.answer_register_host(ip4!("10.0.1.1"), true, 10).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("10.0.1.1"))]
    );

    t.announce(2, net, attrs_lp(ip4!("10.0.1.2"), &[65001], 100));
    t.answer_register_host(ip4!("10.0.1.2"), true, 10).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Replace(net, ip4!("10.0.1.2"))]
    );
}

// MED does not discriminate between routes from different neighbor ASes;
// the subsequent steps tiebreak instead.
#[tokio::test]
async fn med_across_different_ases() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ebgp_peer(1, ip4!("101.0.0.0"), ip4!("2.0.0.1"), 65001);
    let _rx2 = t.add_ebgp_peer(2, ip4!("100.0.0.0"), ip4!("2.0.0.2"), 65002);

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_med(ip4!("2.0.0.1"), &[65001, 65009], 100));
    t.answer_register_host(ip4!("2.0.0.1"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.1"))]
    );

    // Higher MED, but a different neighbor AS, so MED is not compared;
    // the lower router ID decides.
    t.announce(2, net, attrs_med(ip4!("2.0.0.2"), &[65002, 65009], 200));
    t.answer_register_host(ip4!("2.0.0.2"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Replace(net, ip4!("2.0.0.2"))]
    );
}

// Within the same neighbor AS the lower MED wins.
#[tokio::test]
async fn med_within_same_as() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ebgp_peer(1, ip4!("100.0.0.0"), ip4!("2.0.0.1"), 65001);
    let _rx2 = t.add_ebgp_peer(2, ip4!("101.0.0.0"), ip4!("2.0.0.2"), 65001);

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_med(ip4!("2.0.0.1"), &[65001, 65009], 200));
    t.answer_register_host(ip4!("2.0.0.1"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.1"))]
    );

    // Same neighbor AS, lower MED: peer 2 wins even though peer 1 has
    // the lower router ID.
    t.announce(2, net, attrs_med(ip4!("2.0.0.2"), &[65001, 65009], 100));
    t.answer_register_host(ip4!("2.0.0.2"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Replace(net, ip4!("2.0.0.2"))]
    );
}

// eBGP routes are preferred over iBGP ones.
#[tokio::test]
async fn prefer_external() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("100.0.0.0"), ip4!("2.0.0.1"));
    let _rx2 = t.add_ebgp_peer(2, ip4!("101.0.0.0"), ip4!("2.0.0.2"), 65001);

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_lp(ip4!("2.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("2.0.0.1"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.1"))]
    );

    // Same path length; the eBGP route wins despite the higher router
    // ID. The ingress filter inserts the default LocalPref of 100.
    t.announce(2, net, attrs(ip4!("2.0.0.2"), &[65001]));
    t.answer_register_host(ip4!("2.0.0.2"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Replace(net, ip4!("2.0.0.2"))]
    );
}

// A shorter AS path beats a longer one.
#[tokio::test]
async fn shorter_as_path_wins() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ebgp_peer(1, ip4!("100.0.0.0"), ip4!("2.0.0.1"), 65001);
    let _rx2 = t.add_ebgp_peer(2, ip4!("101.0.0.0"), ip4!("2.0.0.2"), 65002);

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs(ip4!("2.0.0.1"), &[65001, 65008, 65009]));
    t.answer_register_host(ip4!("2.0.0.1"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.1"))]
    );

    t.announce(2, net, attrs(ip4!("2.0.0.2"), &[65002, 65009]));
    t.answer_register_host(ip4!("2.0.0.2"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Replace(net, ip4!("2.0.0.2"))]
    );
}

// A route whose next hop never resolves is held in RibIn and never
// reaches the RIB.
#[tokio::test]
async fn unresolvable_route_is_held() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_lp(ip4!("9.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("9.0.0.1"), false, 0).await;
    assert_eq!(t.drain_rib_route_requests().await, vec![]);

    // The route is still stored and visible to the ingress chain.
    assert!(t.plumbing.peer(1).unwrap().lookup_route(net).is_some());
}

// The winner's next hop becomes unresolvable mid-flight: the RIB
// invalidates the covering entry, re-registration answers unresolvable,
// and the route is withdrawn.
#[tokio::test]
async fn nexthop_becomes_unresolvable() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_lp(ip4!("2.0.0.2"), &[65001], 100));
    t.answer_register_host(ip4!("2.0.0.2"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.2"))]
    );

    // The RIB invalidates the covering entry; the re-registration
    // answers that the next hop no longer resolves.
    t.invalidate(ip4!("2.0.0.2"), 24);
    t.answer_register_host(ip4!("2.0.0.2"), false, 0).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Delete(net)]
    );
}

// Add then delete with the same message leaves every table as it was.
#[tokio::test]
async fn add_delete_round_trip() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    let net = net4!("1.0.1.0/24");

    t.announce(1, net, attrs_lp(ip4!("2.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("2.0.0.1"), true, 27).await;
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Add(net, ip4!("2.0.0.1"))]
    );

    assert_eq!(t.withdraw(1, net), TableResult::Used);
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![RibOp::Delete(net)]
    );

    assert!(t.plumbing.peer(1).unwrap().lookup_route(net).is_none());
    assert!(t.plumbing.lookup_route(net).is_none());
    assert!(t.resolver.lookup(ip4!("2.0.0.1")).is_none());
}
