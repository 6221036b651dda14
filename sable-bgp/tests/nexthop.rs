//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

mod common;

use const_addrs::{ip4, net4};
use sable_utils::rib::{RibRequest, RpcError};

use crate::common::{TestPipeline, attrs_lp};

// A fresh next hop triggers exactly one RIB request; once answered, the
// synchronous lookup succeeds.
#[tokio::test]
async fn register_then_lookup() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));

    assert!(t.resolver.lookup(ip4!("7.0.0.1")).is_none());
    assert!(t.resolver.request_in_flight());

    t.answer_register_host(ip4!("7.0.0.1"), true, 5).await;
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.1")), Some((true, 5)));
    assert!(!t.resolver.request_in_flight());
}

// A second next hop inside an already-answered covering range is
// satisfied from the cache without another RIB request.
#[tokio::test]
async fn covering_range_shares_answer() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    // The answer covers 7.0.0.0/24.
    t.answer_register(ip4!("7.0.0.0"), 24, 24, true, 5).await;
    assert_eq!(
        t.drain_rib_route_requests().await.len(),
        1 // the add for 1.0.1.0/24
    );

    // A different next hop in the same range resolves synchronously.
    t.announce(1, net4!("1.0.2.0/24"), attrs_lp(ip4!("7.0.0.9"), &[65001], 100));
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.9")), Some((true, 5)));
    assert!(!t.resolver.request_in_flight());
    assert_eq!(t.drain_rib_route_requests().await.len(), 1);
}

// While a request is outstanding, requests for other next hops queue
// behind it; only one request is ever in flight.
#[tokio::test]
async fn one_outstanding_request() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.announce(1, net4!("1.0.2.0/24"), attrs_lp(ip4!("8.0.0.1"), &[65001], 100));

    // Exactly one register-interest is on the wire.
    let first = t.rib_rx.try_recv().unwrap();
    assert!(matches!(first, RibRequest::RegisterInterest { .. }));
    assert!(t.rib_rx.try_recv().is_err());

    // Answer it; the second request goes out only then.
    let RibRequest::RegisterInterest { responder, .. } = first else {
        unreachable!();
    };
    let _ = responder.send(Ok(sable_utils::rib::NexthopInterest {
        resolves: true,
        base_addr: ip4!("7.0.0.1").into(),
        prefix_len: 32,
        real_prefix_len: 24,
        actual_nexthop: ip4!("7.0.0.1").into(),
        metric: 5,
    }));
    t.process_nht().await;

    t.answer_register_host(ip4!("8.0.0.1"), true, 6).await;
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.1")), Some((true, 5)));
    assert_eq!(t.resolver.lookup(ip4!("8.0.0.1")), Some((true, 6)));
}

// Registrations for the same next hop merge into the pending request.
#[tokio::test]
async fn pending_requests_merge() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.announce(1, net4!("1.0.2.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));

    t.answer_register_host(ip4!("7.0.0.1"), true, 5).await;

    // One answer completed both prefixes.
    assert_eq!(t.drain_rib_route_requests().await.len(), 2);
    assert!(t.rib_rx.try_recv().is_err());
}

// While a re-registration is in flight the saved previous answer
// satisfies lookups.
#[tokio::test]
async fn stale_metrics_during_reregistration() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 5).await;
    t.drain_rib_route_requests().await;

    // Invalidate; the entry is gone, but the saved answer remains
    // readable until the new one arrives.
    t.invalidate(ip4!("7.0.0.1"), 24);
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.1")), Some((true, 5)));

    t.answer_register_host(ip4!("7.0.0.1"), true, 9).await;
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.1")), Some((true, 9)));
}

// A metric change re-runs the decision process and the route carries the
// new distance.
#[tokio::test]
async fn metric_change_updates_route() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    let net = net4!("1.0.1.0/24");
    t.announce(1, net, attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 5).await;
    t.drain_rib_route_requests().await;

    t.metric_change(ip4!("7.0.0.1"), 24, 11);
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.1")), Some((true, 11)));

    let data = t.plumbing.lookup_route(net).unwrap();
    assert_eq!(data.route.igp_metric(), Some(11));
}

// All interested parties deregister while the request is in flight: the
// response handler notices the unreferenced entry and backs out a
// deregistration with the RIB.
#[tokio::test]
async fn deregister_while_request_in_flight() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    let net = net4!("1.0.1.0/24");
    t.announce(1, net, attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    // Withdraw before the answer arrives.
    t.withdraw(1, net);

    t.answer_register_host(ip4!("7.0.0.1"), true, 5).await;

    // No route ever reached the RIB, and interest is withdrawn again.
    assert_eq!(t.drain_rib_route_requests().await, vec![]);
    assert!(t.resolver.lookup(ip4!("7.0.0.1")).is_none());
}

// Register/deregister sequences balance out: after the last route using
// a next hop goes away, the covering entry is deregistered with the RIB.
#[tokio::test]
async fn register_deregister_round_trip() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    let net1 = net4!("1.0.1.0/24");
    let net2 = net4!("1.0.2.0/24");
    t.announce(1, net1, attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.answer_register_host(ip4!("7.0.0.1"), true, 5).await;
    t.announce(1, net2, attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.drain_rib_route_requests().await;

    t.withdraw(1, net1);
    // Still referenced by net2.
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.1")), Some((true, 5)));

    t.withdraw(1, net2);
    t.drain_rib_route_requests().await;
    assert!(t.resolver.lookup(ip4!("7.0.0.1")).is_none());
}

// A transient error keeps the request at the head of the queue; the
// retry re-sends it.
#[tokio::test]
async fn transient_error_retries() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.answer_register_error(RpcError::SendFailed).await;
    assert!(!t.resolver.failed());

    // Fire the retry by hand rather than waiting out the timer.
    t.resolver.retry();
    t.answer_register_host(ip4!("7.0.0.1"), true, 5).await;
    assert_eq!(t.resolver.lookup(ip4!("7.0.0.1")), Some((true, 5)));
}

// Losing the RIB is fatal for the resolver.
#[tokio::test]
async fn fatal_error_fails_interface() {
    let mut t = TestPipeline::new();
    let _rx1 = t.add_ibgp_peer(1, ip4!("2.0.0.0"), ip4!("2.0.0.1"));

    t.announce(1, net4!("1.0.1.0/24"), attrs_lp(ip4!("7.0.0.1"), &[65001], 100));
    t.answer_register_error(RpcError::NoFinder).await;
    assert!(t.resolver.failed());
}
