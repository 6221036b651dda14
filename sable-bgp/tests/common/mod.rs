//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::{IpNetwork, Ipv4Network};
use sable_bgp::af::Ipv4Unicast;
use sable_bgp::nexthop::NextHopResolver;
use sable_bgp::packet::attribute::{AsPath, Attrs};
use sable_bgp::peer::{LOCAL_PEER_ID, PeerHandler, PeerId, PeerInfo, UpdateMsg};
use sable_bgp::plumbing::Plumbing;
use sable_bgp::rib::TableResult;
use sable_bgp::tasks::messages::input::{NhtMsg, RibOutQueueMsg};
use sable_bgp::tasks::{ResolverIo, RibQueueIo};
use sable_utils::bgp::Origin;
use sable_utils::protocol::Protocol;
use sable_utils::rib::{
    NexthopInterest, RibReceiver, RibRequest, RpcError,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver};

pub const LOCAL_AS: u32 = 65000;

// A single-family pipeline with its resolver, wired to channels the test
// observes and drives directly, standing in for the RIB service and the
// instance event loop.
pub struct TestPipeline {
    pub plumbing: Plumbing<Ipv4Unicast>,
    pub resolver: NextHopResolver<Ipv4Unicast>,
    pub rib_rx: RibReceiver,
    pub nht_rx: UnboundedReceiver<NhtMsg>,
    pub rib_out_rx: UnboundedReceiver<RibOutQueueMsg>,
}

impl TestPipeline {
    pub fn new() -> TestPipeline {
        let (rib_tx, rib_rx) = mpsc::unbounded_channel();
        let (nht_tx, nht_rx) = mpsc::unbounded_channel();
        let (rib_out_tx, rib_out_rx) = mpsc::unbounded_channel();

        let local_info = PeerInfo {
            peer_id: LOCAL_PEER_ID,
            router_id: Ipv4Addr::new(10, 0, 0, 1),
            neighbor_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_as: LOCAL_AS,
            remote_as: LOCAL_AS,
            ibgp: false,
        };
        let plumbing = Plumbing::new(
            LOCAL_AS,
            local_info,
            RibQueueIo {
                rib: rib_tx.clone(),
                rib_out_txp: rib_out_tx,
                protocol: Protocol::Bgp,
            },
        );
        let resolver = NextHopResolver::new(ResolverIo {
            rib: rib_tx,
            nht_txp: nht_tx,
        });

        TestPipeline {
            plumbing,
            resolver,
            rib_rx,
            nht_rx,
            rib_out_rx,
        }
    }

    // Add an iBGP peer and bring the session up, returning the receiving
    // end of its update sink.
    pub fn add_ibgp_peer(
        &mut self,
        peer_id: PeerId,
        router_id: Ipv4Addr,
        neighbor_addr: Ipv4Addr,
    ) -> Receiver<UpdateMsg> {
        self.add_peer(peer_id, router_id, neighbor_addr, LOCAL_AS, true)
    }

    pub fn add_ebgp_peer(
        &mut self,
        peer_id: PeerId,
        router_id: Ipv4Addr,
        neighbor_addr: Ipv4Addr,
        remote_as: u32,
    ) -> Receiver<UpdateMsg> {
        self.add_peer(peer_id, router_id, neighbor_addr, remote_as, false)
    }

    pub fn add_peer(
        &mut self,
        peer_id: PeerId,
        router_id: Ipv4Addr,
        neighbor_addr: Ipv4Addr,
        remote_as: u32,
        ibgp: bool,
    ) -> Receiver<UpdateMsg> {
        self.add_peer_full(peer_id, router_id, neighbor_addr, remote_as, ibgp, 64, true)
    }

    // Full control over the update sink capacity and whether the initial
    // table dump is driven to completion.
    pub fn add_peer_full(
        &mut self,
        peer_id: PeerId,
        router_id: Ipv4Addr,
        neighbor_addr: Ipv4Addr,
        remote_as: u32,
        ibgp: bool,
        capacity: usize,
        pump: bool,
    ) -> Receiver<UpdateMsg> {
        let (update_tx, update_rx) = mpsc::channel(capacity);
        let info = PeerInfo {
            peer_id,
            router_id,
            neighbor_addr: IpAddr::V4(neighbor_addr),
            local_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_as: LOCAL_AS,
            remote_as,
            ibgp,
        };
        let handler =
            PeerHandler::new(format!("peer{}", peer_id), info, update_tx);
        self.plumbing.add_peering(handler).unwrap();
        self.plumbing.peering_came_up(peer_id).unwrap();
        if pump {
            self.pump_dump(peer_id);
        }
        update_rx
    }

    // Bring a downed peering back up with a fresh update sink.
    pub fn reup_peer(&mut self, peer_id: PeerId) -> Receiver<UpdateMsg> {
        let (update_tx, update_rx) = mpsc::channel(64);
        let info = self.plumbing.peer(peer_id).unwrap().handler.info;
        let handler =
            PeerHandler::new(format!("peer{}", peer_id), info, update_tx);
        self.plumbing.update_peer_handler(peer_id, handler).unwrap();
        self.plumbing.peering_came_up(peer_id).unwrap();
        self.pump_dump(peer_id);
        update_rx
    }

    // Drive a table dump to completion, the way the instance's background
    // messages would.
    pub fn pump_dump(&mut self, peer_id: PeerId) {
        while self.plumbing.dump_continue(&self.resolver, peer_id) {}
    }

    // Drive a peering teardown to completion.
    pub fn pump_deletion(&mut self, peer_id: PeerId) {
        while self
            .plumbing
            .deletion_continue(&mut self.resolver, peer_id)
            .unwrap()
        {}
    }

    pub fn announce(
        &mut self,
        peer_id: PeerId,
        net: Ipv4Network,
        attrs: Attrs,
    ) -> TableResult {
        let result = self
            .plumbing
            .route_update(&mut self.resolver, peer_id, net, Some(attrs))
            .unwrap();
        self.plumbing.push(&self.resolver, peer_id).unwrap();
        result
    }

    pub fn withdraw(
        &mut self,
        peer_id: PeerId,
        net: Ipv4Network,
    ) -> TableResult {
        let result = self
            .plumbing
            .route_update(&mut self.resolver, peer_id, net, None)
            .unwrap();
        self.plumbing.push(&self.resolver, peer_id).unwrap();
        result
    }

    // The RIB's answer to the register-interest request that the resolver
    // currently has in flight. Covers /32, so every next hop gets its own
    // entry unless stated otherwise.
    pub async fn answer_register_host(
        &mut self,
        nexthop: Ipv4Addr,
        resolves: bool,
        metric: u32,
    ) {
        self.answer_register(nexthop, 32, 24, resolves, metric).await;
    }

    pub async fn answer_register(
        &mut self,
        base_addr: Ipv4Addr,
        prefix_len: u8,
        real_prefix_len: u8,
        resolves: bool,
        metric: u32,
    ) {
        let request = self.rib_rx.recv().await.unwrap();
        let RibRequest::RegisterInterest {
            nexthop, responder, ..
        } = request
        else {
            panic!("expected a register-interest request, got {:?}", request);
        };
        let _ = responder.send(Ok(NexthopInterest {
            resolves,
            base_addr: IpAddr::V4(base_addr),
            prefix_len,
            real_prefix_len,
            actual_nexthop: nexthop,
            metric,
        }));
        self.process_nht().await;
    }

    pub async fn answer_register_error(&mut self, error: RpcError) {
        let request = self.rib_rx.recv().await.unwrap();
        let RibRequest::RegisterInterest { responder, .. } = request else {
            panic!("expected a register-interest request, got {:?}", request);
        };
        let _ = responder.send(Err(error));
        self.process_nht().await;
    }

    pub async fn answer_deregister(&mut self) {
        let request = self.rib_rx.recv().await.unwrap();
        let RibRequest::DeregisterInterest { responder, .. } = request else {
            panic!(
                "expected a deregister-interest request, got {:?}",
                request
            );
        };
        let _ = responder.send(Ok(()));
        self.process_nht().await;
    }

    // The RIB invalidates a covering entry, the way the ibus
    // notification would be processed.
    pub fn invalidate(&mut self, addr: Ipv4Addr, real_prefix_len: u8) {
        let changed = self.resolver.route_info_invalid(addr, real_prefix_len);
        for nexthop in changed {
            self.plumbing
                .igp_nexthop_changed(&mut self.resolver, nexthop);
        }
    }

    // The RIB reports a metric change for a covering entry.
    pub fn metric_change(
        &mut self,
        addr: Ipv4Addr,
        real_prefix_len: u8,
        metric: u32,
    ) {
        let changed =
            self.resolver
                .route_info_changed(addr, real_prefix_len, metric);
        for nexthop in changed {
            self.plumbing
                .igp_nexthop_changed(&mut self.resolver, nexthop);
        }
    }

    // Receive one resolver completion and feed it through, the way the
    // instance event loop does.
    pub async fn process_nht(&mut self) {
        match self.nht_rx.recv().await.unwrap() {
            NhtMsg::RegisterResponse { result, .. } => {
                let outcome = self.resolver.register_interest_response(result);
                for done in outcome.done {
                    self.plumbing
                        .rib_lookup_done(
                            &mut self.resolver,
                            done.requester,
                            done.nexthop,
                            &done.nets,
                        )
                        .unwrap();
                }
                for nexthop in outcome.changed {
                    self.plumbing
                        .igp_nexthop_changed(&mut self.resolver, nexthop);
                }
            }
            NhtMsg::DeregisterResponse { result, .. } => {
                self.resolver.deregister_interest_response(result);
            }
            NhtMsg::Retry { .. } => {
                self.resolver.retry();
            }
        }
    }

    // Collect the route requests the local-RIB queue has issued so far,
    // acknowledging each.
    pub async fn drain_rib_route_requests(&mut self) -> Vec<RibOp> {
        let mut ops = vec![];
        while let Ok(request) = self.rib_rx.try_recv() {
            match request {
                RibRequest::AddRoute { route, responder } => {
                    ops.push(RibOp::Add(
                        net_v4(route.net),
                        addr_v4(route.nexthop),
                    ));
                    let _ = responder.send(Ok(()));
                    self.ack_rib_queue().await;
                }
                RibRequest::ReplaceRoute { route, responder } => {
                    ops.push(RibOp::Replace(
                        net_v4(route.net),
                        addr_v4(route.nexthop),
                    ));
                    let _ = responder.send(Ok(()));
                    self.ack_rib_queue().await;
                }
                RibRequest::DeleteRoute { route, responder } => {
                    ops.push(RibOp::Delete(net_v4(route.net)));
                    let _ = responder.send(Ok(()));
                    self.ack_rib_queue().await;
                }
                RibRequest::AddIgpTable { responder, .. }
                | RibRequest::DeleteIgpTable { responder, .. } => {
                    let _ = responder.send(Ok(()));
                    self.ack_rib_queue().await;
                }
                // Resolver housekeeping; acknowledge transparently.
                RibRequest::DeregisterInterest { responder, .. } => {
                    let _ = responder.send(Ok(()));
                    self.process_nht().await;
                }
                request => {
                    panic!("unexpected RIB request: {:?}", request);
                }
            }
        }
        ops
    }

    async fn ack_rib_queue(&mut self) {
        match self.rib_out_rx.recv().await.unwrap() {
            RibOutQueueMsg::Response { result, .. } => {
                self.plumbing.rib_queue_response(result);
            }
            RibOutQueueMsg::Retry { .. } => {
                self.plumbing.rib_queue_retry();
            }
        }
    }
}

// A route operation observed at the RIB boundary.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RibOp {
    Add(Ipv4Network, Ipv4Addr),
    Replace(Ipv4Network, Ipv4Addr),
    Delete(Ipv4Network),
}

fn net_v4(net: IpNetwork) -> Ipv4Network {
    match net {
        IpNetwork::V4(net) => net,
        IpNetwork::V6(_) => panic!("unexpected address family"),
    }
}

fn addr_v4(addr: IpAddr) -> Ipv4Addr {
    match addr {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => panic!("unexpected address family"),
    }
}

// Attribute list helpers.

pub fn attrs(nexthop: Ipv4Addr, as_path: &[u32]) -> Attrs {
    Attrs::new(
        Origin::Igp,
        AsPath::from_sequence(as_path.iter().copied()),
        IpAddr::V4(nexthop),
    )
}

pub fn attrs_lp(nexthop: Ipv4Addr, as_path: &[u32], local_pref: u32) -> Attrs {
    let mut attrs = attrs(nexthop, as_path);
    attrs.base.local_pref = Some(local_pref);
    attrs
}

pub fn attrs_med(nexthop: Ipv4Addr, as_path: &[u32], med: u32) -> Attrs {
    let mut attrs = attrs(nexthop, as_path);
    attrs.base.med = Some(med);
    attrs
}
