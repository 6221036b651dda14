//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use const_addrs::{ip4, net4};
use sable_bgp::peer::{LOCAL_PEER_ID, UpdateMsg};
use sable_bgp::rib::TableResult;

use crate::common::{LOCAL_AS, RibOp, TestPipeline, attrs, attrs_lp};

// Egress toward an eBGP peer: LocalPref stripped, local AS prepended,
// the next hop's IGP metric inserted as MED.
#[tokio::test]
async fn ebgp_egress_filters() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));
    let mut rx2 = t.add_ebgp_peer(2, ip4!("3.0.0.0"), ip4!("3.0.0.1"), 65002);

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;

    let msg = rx2.try_recv().unwrap();
    let UpdateMsg::Advertise { net, attrs } = msg else {
        panic!("expected an advertisement, got {:?}", msg);
    };
    assert_eq!(net, net4!("1.0.1.0/24").into());
    assert_eq!(attrs.base.local_pref, None);
    assert_eq!(attrs.base.med, Some(27));
    assert!(attrs.base.as_path.contains(LOCAL_AS));
    assert_eq!(attrs.base.as_path.first(), Some(LOCAL_AS));
}

// Routes learned from one iBGP peer are not re-advertised to another
// iBGP peer, but do reach eBGP peers.
#[tokio::test]
async fn ibgp_loop_prevention() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));
    let mut rx2 = t.add_ibgp_peer(2, ip4!("2.0.0.0"), ip4!("2.0.0.2"));
    let mut rx3 = t.add_ebgp_peer(3, ip4!("3.0.0.0"), ip4!("3.0.0.1"), 65002);

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;

    assert!(rx2.try_recv().is_err());
    assert!(matches!(
        rx3.try_recv().unwrap(),
        UpdateMsg::Advertise { .. }
    ));
}

// Ingress from an eBGP peer: routes carrying our own AS are dropped for
// loop prevention. They stay stored, flagged as filtered.
#[tokio::test]
async fn ebgp_ingress_loop_filter() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ebgp_peer(1, ip4!("3.0.0.0"), ip4!("3.0.0.1"), 65002);

    let net = net4!("1.0.1.0/24");
    let result =
        t.announce(1, net, attrs(ip4!("7.0.0.1"), &[65002, LOCAL_AS]));
    assert_eq!(result, TableResult::Filtered);
    assert_eq!(t.drain_rib_route_requests().await, vec![]);
    assert!(t.plumbing.peer(1).unwrap().lookup_route(net).is_none());

    // Withdrawing the filtered route is a no-op downstream.
    assert_eq!(t.withdraw(1, net), TableResult::NoChange);
}

// Locally-originated routes flow to all peers; the local AS is prepended
// toward iBGP peers too (where the regular prepend filter doesn't run).
#[tokio::test]
async fn originate_local_route() {
    let mut t = TestPipeline::new();
    let mut rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));
    let mut rx2 = t.add_ebgp_peer(2, ip4!("3.0.0.0"), ip4!("3.0.0.1"), 65002);

    let net = net4!("10.10.0.0/16");
    t.plumbing
        .route_update(
            &mut t.resolver,
            LOCAL_PEER_ID,
            net,
            Some(attrs(ip4!("7.0.0.1"), &[])),
        )
        .unwrap();
    t.plumbing.push(&t.resolver, LOCAL_PEER_ID).unwrap();
    t.answer_register_host(ip4!("7.0.0.1"), true, 3).await;

    // The route is not echoed back into the local RIB.
    assert_eq!(t.drain_rib_route_requests().await, vec![]);

    let UpdateMsg::Advertise { attrs, .. } = rx1.try_recv().unwrap() else {
        panic!("expected an advertisement");
    };
    assert_eq!(attrs.base.as_path.first(), Some(LOCAL_AS));

    let UpdateMsg::Advertise { attrs, .. } = rx2.try_recv().unwrap() else {
        panic!("expected an advertisement");
    };
    assert_eq!(attrs.base.as_path.first(), Some(LOCAL_AS));

    // Withdraw it again.
    t.plumbing
        .route_update(&mut t.resolver, LOCAL_PEER_ID, net, None)
        .unwrap();
    t.plumbing.push(&t.resolver, LOCAL_PEER_ID).unwrap();
    assert!(matches!(
        rx1.try_recv().unwrap(),
        UpdateMsg::Withdraw { .. }
    ));
}

// A busy peer has its messages held in the fanout and released one at a
// time as its output drains.
#[tokio::test]
async fn fanout_backpressure() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));
    // Peer 2's update sink holds a single message.
    let mut rx2 = t.add_peer_full(
        2,
        ip4!("3.0.0.0"),
        ip4!("3.0.0.1"),
        65002,
        false,
        1,
        true,
    );

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;
    t.announce(1, net4!("1.0.2.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.announce(1, net4!("1.0.3.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));

    // Only the first advertisement made it out.
    let first = rx2.try_recv().unwrap();
    assert!(matches!(first, UpdateMsg::Advertise { .. }));
    assert!(rx2.try_recv().is_err());

    // Draining the sink releases the rest one at a time.
    t.plumbing.output_ready(&t.resolver, 2).unwrap();
    let second = rx2.try_recv().unwrap();
    assert!(matches!(second, UpdateMsg::Advertise { .. }));
    assert!(rx2.try_recv().is_err());

    t.plumbing.output_ready(&t.resolver, 2).unwrap();
    let third = rx2.try_recv().unwrap();
    assert!(matches!(third, UpdateMsg::Advertise { .. }));
}

// A newly-established peer receives every currently-best route.
#[tokio::test]
async fn dump_to_new_peer() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;
    t.announce(1, net4!("1.0.2.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));

    let mut rx3 = t.add_ebgp_peer(3, ip4!("4.0.0.0"), ip4!("4.0.0.1"), 65003);

    let mut nets = vec![];
    while let Ok(UpdateMsg::Advertise { net, .. }) = rx3.try_recv() {
        nets.push(net);
    }
    assert_eq!(
        nets,
        vec![net4!("1.0.1.0/24").into(), net4!("1.0.2.0/24").into()]
    );
}

// A normal route change for a prefix the dump's cursor hasn't passed is
// superseded by the dump: the target sees the route exactly once.
#[tokio::test]
async fn change_ahead_of_dump_cursor_superseded() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    // Peer 3 comes up but its dump is not driven yet.
    let mut rx3 = t.add_peer_full(
        3,
        ip4!("4.0.0.0"),
        ip4!("4.0.0.1"),
        65003,
        false,
        64,
        false,
    );

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;

    // The change was withheld from the dump target.
    assert!(rx3.try_recv().is_err());

    // The dump itself delivers the live value, exactly once.
    t.pump_dump(3);
    assert!(matches!(
        rx3.try_recv().unwrap(),
        UpdateMsg::Advertise { .. }
    ));
    assert!(rx3.try_recv().is_err());
}

// The dump source goes down mid-dump: its remaining routes are skipped
// by the dump and travel the normal teardown path instead.
#[tokio::test]
async fn dump_source_goes_down() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;
    t.announce(1, net4!("1.0.2.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.drain_rib_route_requests().await;

    // Peer 3 comes up; before its dump makes progress, peer 1 goes down.
    let mut rx3 = t.add_peer_full(
        3,
        ip4!("4.0.0.0"),
        ip4!("4.0.0.1"),
        65003,
        false,
        64,
        false,
    );
    t.plumbing.peering_went_down(1).unwrap();
    t.pump_deletion(1);
    t.pump_dump(3);

    // Each of peer 1's routes reaches peer 3 at most once, as a
    // withdraw via the normal teardown path; the dump emits nothing.
    let mut withdraws = 0;
    while let Ok(msg) = rx3.try_recv() {
        match msg {
            UpdateMsg::Withdraw { .. } => withdraws += 1,
            UpdateMsg::Advertise { .. } => {
                panic!("dump emitted a route from a downed peer")
            }
        }
    }
    assert!(withdraws <= 2);

    // The local RIB saw both deletes.
    assert_eq!(
        t.drain_rib_route_requests().await,
        vec![
            RibOp::Delete(net4!("1.0.1.0/24")),
            RibOp::Delete(net4!("1.0.2.0/24")),
        ]
    );
}

// A peering bounce: teardown withdraws everything, the new session
// re-announces, and downstream peers converge again.
#[tokio::test]
async fn peering_bounce() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));
    let mut rx2 = t.add_ebgp_peer(2, ip4!("3.0.0.0"), ip4!("3.0.0.1"), 65002);

    let net = net4!("1.0.1.0/24");
    t.announce(1, net, attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;
    assert!(matches!(
        rx2.try_recv().unwrap(),
        UpdateMsg::Advertise { .. }
    ));

    t.plumbing.peering_went_down(1).unwrap();
    t.pump_deletion(1);
    assert!(matches!(
        rx2.try_recv().unwrap(),
        UpdateMsg::Withdraw { .. }
    ));

    let _rx1 = t.reup_peer(1);
    t.announce(1, net, attrs_lp(ip4!("7.0.0.1"), &[65009], 100));
    // The teardown's interest deregistration is still ahead in the
    // resolver queue; the fresh registration completes after it.
    t.answer_deregister().await;
    t.answer_register_host(ip4!("7.0.0.1"), true, 27).await;
    assert!(matches!(
        rx2.try_recv().unwrap(),
        UpdateMsg::Advertise { .. }
    ));
}
