//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! One address family's pipeline, from RibIn to RibOut.
//!
//! Per-peer chains live in an arena; cross-table references are arena
//! indices. Each peer owns an ingress chain (RibIn -> Filter -> Cache ->
//! NhLookup) feeding the decision process, which fans out into egress
//! chains (Filter -> Cache -> RibOut), one per peer plus one toward the
//! local RIB. A pseudo-peer at a fixed identity carries locally
//! originated routes into the graph.

use std::collections::BTreeMap;
use std::sync::Arc;

use generational_arena::{Arena, Index};
use sable_utils::ip::IpAddrKind;
use sable_utils::rib::RpcError;
use tracing::warn;

use crate::af::AddressFamily;
use crate::debug::Debug;
use crate::dump::{DUMP_BATCH_SIZE, DumpIterator, PeerDumpPlan};
use crate::error::Error;
use crate::nexthop::NextHopResolver;
use crate::packet::attribute::Attrs;
use crate::peer::{PeerHandler, PeerId, PeerInfo};
use crate::rib::{
    AttrSetsCxt, GENID_UNKNOWN, InternalMessage, RouteData, TableResult,
};
use crate::rib_queue::{RibQueue, RibQueueOp};
use crate::tables::cache::CacheTable;
use crate::tables::decision::{self, Emit};
use crate::tables::fanout::{DownstreamId, FanoutOp, FanoutTable};
use crate::tables::filter::{FilterBank, FilterOutcome};
use crate::tables::nhlookup::{NhLookupTable, NhLookupView, QueueEntry};
use crate::tables::rib_in::{DELETION_BATCH_SIZE, RibInTable};
use crate::tables::rib_out::{DrainOutcome, RibOutTable};
use crate::tasks::RibQueueIo;

// Default LocalPref inserted on ingress from eBGP peers.
pub const DFLT_LOCAL_PREF: u32 = 100;

#[derive(Debug)]
pub struct Plumbing<A: AddressFamily> {
    local_as: u32,
    peers: Arena<PeerPipeline<A>>,
    peers_by_id: BTreeMap<PeerId, Index>,
    fanout: FanoutTable<A>,
    local: LocalRibBranch<A>,
    attr_sets: AttrSetsCxt,
    dumps: Vec<DumpIterator<A>>,
}

// One peer's chains plus its session state.
#[derive(Debug)]
pub struct PeerPipeline<A: AddressFamily> {
    pub handler: PeerHandler,
    pub genid: u32,
    pub session_up: bool,
    rib_in: RibInTable<A>,
    in_filter: FilterBank<A>,
    in_cache: CacheTable<A>,
    nh_lookup: NhLookupTable<A>,
    out_filter: FilterBank<A>,
    out_cache: CacheTable<A>,
    rib_out: RibOutTable<A>,
}

// The egress branch toward the local RIB.
#[derive(Debug)]
struct LocalRibBranch<A: AddressFamily> {
    filter: FilterBank<A>,
    cache: CacheTable<A>,
    queue: RibQueue<A>,
}

// ===== impl PeerPipeline =====

impl<A> PeerPipeline<A>
where
    A: AddressFamily,
{
    fn new(
        handler: PeerHandler,
        in_filter: FilterBank<A>,
        out_filter: FilterBank<A>,
    ) -> PeerPipeline<A> {
        PeerPipeline {
            handler,
            genid: GENID_UNKNOWN,
            session_up: false,
            rib_in: RibInTable::new(),
            in_filter,
            in_cache: CacheTable::new(),
            nh_lookup: NhLookupTable::new(),
            out_filter,
            out_cache: CacheTable::new(),
            rib_out: RibOutTable::new(),
        }
    }

    // What this peer's ingress chain currently publishes to the decision
    // process for the prefix.
    pub fn lookup_route(&self, net: A::IpNetwork) -> Option<RouteData<A>> {
        match self.nh_lookup.lookup(&net) {
            NhLookupView::Hidden => None,
            NhLookupView::Queued(old) => Some(old),
            NhLookupView::Pass => {
                if let Some(entry) = self.in_cache.lookup_route(&net) {
                    return Some(RouteData {
                        route: Arc::clone(&entry.route),
                        attrs: Arc::clone(entry.route.attrs()),
                        peer: self.handler.info,
                        genid: entry.genid,
                    });
                }
                let (route, genid) = self.rib_in.lookup(&net, self.genid)?;
                if route.is_filtered() {
                    return None;
                }
                Some(RouteData {
                    route: Arc::clone(route),
                    attrs: Arc::clone(route.attrs()),
                    peer: self.handler.info,
                    genid,
                })
            }
        }
    }

    pub fn num_routes(&self) -> usize {
        self.rib_in.len()
    }
}

// ===== impl Plumbing =====

impl<A> Plumbing<A>
where
    A: AddressFamily,
{
    pub fn new(
        local_as: u32,
        local_info: PeerInfo,
        rib_queue_io: RibQueueIo,
    ) -> Plumbing<A> {
        let mut plumbing = Plumbing {
            local_as,
            peers: Arena::new(),
            peers_by_id: Default::default(),
            fanout: FanoutTable::new(),
            local: LocalRibBranch {
                filter: FilterBank::new(),
                cache: CacheTable::new(),
                queue: RibQueue::new(rib_queue_io),
            },
            attr_sets: Default::default(),
            dumps: vec![],
        };

        plumbing.fanout.add_downstream(DownstreamId::LocalRib);

        // The pseudo-peer carrying locally originated routes.
        let handler =
            PeerHandler::new_local("local".to_owned(), local_info);
        let mut pipeline =
            PeerPipeline::new(handler, FilterBank::new(), FilterBank::new());
        pipeline.session_up = true;
        let index = plumbing.peers.insert(pipeline);
        plumbing.peers_by_id.insert(local_info.peer_id, index);

        plumbing
    }

    // Register this protocol's origin table with the RIB.
    pub fn register_rib_table(&mut self) {
        self.local.queue.register_igp_table();
    }

    pub fn unregister_rib_table(&mut self) {
        self.local.queue.unregister_igp_table();
    }

    // ===== peering lifecycle =====

    pub fn add_peering(&mut self, handler: PeerHandler) -> Result<PeerId, Error> {
        let info = handler.info;
        if self.peers_by_id.contains_key(&info.peer_id) {
            return Err(Error::PeerExists(info.peer_id));
        }

        let in_filter = self.default_ingress_filters(&info);
        let out_filter = self.default_egress_filters(&info);
        let pipeline = PeerPipeline::new(handler, in_filter, out_filter);
        let index = self.peers.insert(pipeline);
        self.peers_by_id.insert(info.peer_id, index);
        Ok(info.peer_id)
    }

    // A session restart reuses the peer's chains but brings a fresh
    // update sink.
    pub fn update_peer_handler(
        &mut self,
        peer_id: PeerId,
        handler: PeerHandler,
    ) -> Result<(), Error> {
        let index = self.index(peer_id)?;
        let peer = self.peers.get_mut(index).unwrap();
        peer.handler = handler;
        Ok(())
    }

    pub fn peering_came_up(&mut self, peer_id: PeerId) -> Result<(), Error> {
        let index = self.index(peer_id)?;
        let peer = self.peers.get_mut(index).unwrap();
        peer.genid += 1;
        peer.session_up = true;
        let genid = peer.genid;

        Debug::PeeringUp(peer_id, genid).log();

        self.fanout.add_downstream(DownstreamId::Peer(peer_id));
        for dump in &mut self.dumps {
            dump.peering_came_up(peer_id, genid);
        }

        // Replay every currently-best route to the new peer, walking the
        // other peers in a fixed order.
        let peers_to_dump = self
            .peers
            .iter()
            .filter(|(_, peer)| {
                peer.session_up && peer.handler.info.peer_id != peer_id
            })
            .map(|(_, peer)| PeerDumpPlan {
                peer: peer.handler.info.peer_id,
                genid: peer.genid,
            })
            .collect();
        self.dumps
            .push(DumpIterator::new(peer_id, genid, peers_to_dump));

        Ok(())
    }

    pub fn peering_went_down(&mut self, peer_id: PeerId) -> Result<(), Error> {
        let index = self.index(peer_id)?;
        let peer = self.peers.get_mut(index).unwrap();
        peer.session_up = false;
        let info = peer.handler.info;
        let genid = peer.genid;

        Debug::PeeringDown(peer_id, genid).log();

        // Until the teardown completes, the stored routes keep the old
        // generation and keep flowing (as deletes) through the pipeline.
        peer.rib_in.start_deletion(info, genid);
        peer.rib_out.clear();
        peer.out_cache.flush();

        self.fanout.remove_downstream(DownstreamId::Peer(peer_id));
        for dump in &mut self.dumps {
            dump.peering_went_down(peer_id, genid);
        }
        self.dumps.retain(|dump| dump.is_valid());

        Ok(())
    }

    pub fn delete_peering(&mut self, peer_id: PeerId) -> Result<(), Error> {
        let index = self.index(peer_id)?;
        let peer = self.peers.get(index).unwrap();
        if peer.session_up || peer.rib_in.deleting() {
            return Err(Error::PeerActive(peer_id));
        }
        self.peers.remove(index);
        self.peers_by_id.remove(&peer_id);
        Ok(())
    }

    // Tear down one chunk of a downed peering's routes. Returns whether
    // more work remains.
    pub fn deletion_continue(
        &mut self,
        resolver: &mut NextHopResolver<A>,
        peer_id: PeerId,
    ) -> Result<bool, Error> {
        let index = self.index(peer_id)?;
        let peer = self.peers.get_mut(index).unwrap();
        let Some((info, genid, routes, done)) =
            peer.rib_in.next_deletion_chunk(DELETION_BATCH_SIZE)
        else {
            return Ok(false);
        };

        for (_, route) in routes {
            let msg = InternalMessage::from_stored(&route, info, genid);
            self.ingress_delete(resolver, index, msg);
        }
        self.fanout_dispatch(resolver, Some(peer_id), FanoutOp::Push);

        if done {
            self.peering_down_complete(peer_id, genid);
        }

        let peer = self.peers.get(index).unwrap();
        Ok(peer.rib_in.deleting())
    }

    fn peering_down_complete(&mut self, peer_id: PeerId, genid: u32) {
        Debug::PeeringDownComplete(peer_id, genid).log();
        if let Ok(index) = self.index(peer_id) {
            let peer = self.peers.get_mut(index).unwrap();
            peer.in_cache.flush_genid(genid);
        }
        for dump in &mut self.dumps {
            dump.peering_down_complete(peer_id, genid);
        }
    }

    // ===== route flow =====

    // Entry point for parsed route updates from a peer (or the local
    // handler). `attrs = None` withdraws the prefix.
    pub fn route_update(
        &mut self,
        resolver: &mut NextHopResolver<A>,
        peer_id: PeerId,
        net: A::IpNetwork,
        attrs: Option<Attrs>,
    ) -> Result<TableResult, Error> {
        let index = self.index(peer_id)?;
        {
            let peer = self.peers.get(index).unwrap();
            if !peer.session_up {
                return Err(Error::PeerDown(peer_id));
            }
        }

        match attrs {
            Some(attrs) => {
                let attrs = self.attr_sets.get(&attrs);
                let peer = self.peers.get_mut(index).unwrap();
                let info = peer.handler.info;
                let genid = peer.genid;
                let (route, old) = peer.rib_in.update(net, Arc::clone(&attrs));
                let msg = InternalMessage::new(route, attrs, info, genid);
                match old {
                    None => Ok(self.ingress_add(resolver, index, msg)),
                    Some(old_route) => {
                        let old_msg = InternalMessage::from_stored(
                            &old_route, info, genid,
                        );
                        Ok(self.ingress_replace(resolver, index, old_msg, msg))
                    }
                }
            }
            None => {
                let peer = self.peers.get_mut(index).unwrap();
                let info = peer.handler.info;
                let genid = peer.genid;
                let Some(old_route) = peer.rib_in.remove(&net) else {
                    return Ok(TableResult::NoChange);
                };
                let old_msg =
                    InternalMessage::from_stored(&old_route, info, genid);
                Ok(self.ingress_delete(resolver, index, old_msg))
            }
        }
    }

    // Flush deferred output for updates received from this peer.
    pub fn push(
        &mut self,
        resolver: &NextHopResolver<A>,
        peer_id: PeerId,
    ) -> Result<(), Error> {
        self.index(peer_id)?;
        self.fanout_dispatch(resolver, Some(peer_id), FanoutOp::Push);
        Ok(())
    }

    // A peer's output channel has drained; release deferred output and
    // pull queued messages out of the fanout.
    pub fn output_ready(
        &mut self,
        resolver: &NextHopResolver<A>,
        peer_id: PeerId,
    ) -> Result<(), Error> {
        let index = self.index(peer_id)?;
        self.drain_peer_output(resolver, index);
        Ok(())
    }

    // Completion callback from the resolver: the registration for
    // `nexthop` finished on behalf of `requester`'s pending prefixes.
    pub fn rib_lookup_done(
        &mut self,
        resolver: &mut NextHopResolver<A>,
        requester: PeerId,
        nexthop: A::IpAddr,
        nets: &std::collections::BTreeSet<A::IpNetwork>,
    ) -> Result<(), Error> {
        let index = self.index(requester)?;
        let peer = self.peers.get_mut(index).unwrap();
        let ready = peer.nh_lookup.rib_lookup_done(nexthop, nets, resolver);

        let had_ready = !ready.is_empty();
        for entry in ready {
            match entry {
                QueueEntry::Add(msg) => {
                    let (_, emits) = decision::add_route(self, msg);
                    self.dispatch_emits(resolver, emits);
                }
                QueueEntry::Replace { old, new } => {
                    let (_, emits) = decision::replace_route(self, old, new);
                    self.dispatch_emits(resolver, emits);
                }
            }
        }
        if had_ready {
            self.fanout_dispatch(resolver, Some(requester), FanoutOp::Push);
        }
        Ok(())
    }

    // An IGP answer changed; re-run the decision process for every stored
    // route carrying the next hop.
    pub fn igp_nexthop_changed(
        &mut self,
        resolver: &mut NextHopResolver<A>,
        nexthop: A::IpAddr,
    ) {
        Debug::NhtUpdate(nexthop.into(), resolver.lookup(nexthop)).log();

        let indices = self
            .peers
            .iter()
            .map(|(index, _)| index)
            .collect::<Vec<_>>();
        for index in indices {
            let peer = self.peers.get(index).unwrap();
            let info = peer.handler.info;
            let genid = peer.genid;
            let nets = peer.rib_in.routes_with_nexthop(nexthop);
            for net in nets {
                let peer = self.peers.get(index).unwrap();
                let Some((route, genid)) = peer
                    .rib_in
                    .lookup(&net, genid)
                    .map(|(route, genid)| (Arc::clone(route), genid))
                else {
                    continue;
                };
                let old_msg = InternalMessage::from_stored(&route, info, genid);
                let new_msg = old_msg.clone();
                self.ingress_replace(resolver, index, old_msg, new_msg);
            }
        }
        self.fanout_dispatch(resolver, None, FanoutOp::Push);
    }

    // ===== table dump =====

    // Replay one chunk of best routes to a newly-established peer.
    // Returns whether more work remains.
    pub fn dump_continue(
        &mut self,
        resolver: &NextHopResolver<A>,
        target: PeerId,
    ) -> bool {
        let Some(dump_index) =
            self.dumps.iter().position(|dump| dump.target() == target)
        else {
            return false;
        };
        if !self.dumps[dump_index].is_valid() {
            self.dumps.remove(dump_index);
            return false;
        }

        let mut processed = 0;
        let more = loop {
            if processed >= DUMP_BATCH_SIZE {
                break true;
            }

            let Some(plan) = self.dumps[dump_index].current_peer() else {
                // All peers dumped.
                Debug::DumpDone(target).log();
                self.dumps.remove(dump_index);
                self.egress_deliver(
                    resolver,
                    DownstreamId::Peer(target),
                    FanoutOp::Push,
                );
                return false;
            };

            let Ok(source_index) = self.index(plan.peer) else {
                self.dumps[dump_index].next_peer();
                continue;
            };

            let cursor = self.dumps[dump_index].last_dumped();
            let source = self.peers.get(source_index).unwrap();
            let Some((net, _)) = source
                .rib_in
                .next_route_after(cursor.as_ref())
                .map(|(net, route)| (net, Arc::clone(route)))
            else {
                self.dumps[dump_index].next_peer();
                continue;
            };

            // Read the live value the source chain publishes; the dump
            // carries the current state, not the state at dump start.
            let data = source
                .lookup_route(net)
                .filter(|data| data.route.is_winner());
            self.dumps[dump_index].note_dumped(net);
            if let Some(data) = data {
                let msg = data.to_msg();
                self.egress_deliver(
                    resolver,
                    DownstreamId::Peer(target),
                    FanoutOp::Add(msg),
                );
            }
            processed += 1;
        };

        if processed > 0 {
            self.egress_deliver(
                resolver,
                DownstreamId::Peer(target),
                FanoutOp::Push,
            );
        }
        more
    }

    // ===== lookups and status =====

    // The alternatives for a prefix across all ingress chains, excluding
    // the chain the triggering message came from, plus the index of the
    // route currently flagged as winner, if any.
    pub(crate) fn alternative_routes(
        &self,
        exclude: Option<PeerId>,
        net: A::IpNetwork,
    ) -> (Vec<RouteData<A>>, Option<usize>) {
        let mut alternatives = vec![];
        let mut winner = None;
        for (_, peer) in self.peers.iter() {
            if Some(peer.handler.info.peer_id) == exclude {
                continue;
            }
            if let Some(data) = peer.lookup_route(net) {
                if data.route.is_winner() {
                    debug_assert!(winner.is_none());
                    winner = Some(alternatives.len());
                }
                alternatives.push(data);
            }
        }
        (alternatives, winner)
    }

    // What the decision process currently publishes for a prefix: the
    // previous winner if one is flagged, else the best alternative.
    pub fn lookup_route(&self, net: A::IpNetwork) -> Option<RouteData<A>> {
        let (mut alternatives, winner) = self.alternative_routes(None, net);
        match winner {
            Some(index) => Some(alternatives[index].clone()),
            None => decision::find_winner(&mut alternatives),
        }
    }

    pub fn peer(&self, peer_id: PeerId) -> Option<&PeerPipeline<A>> {
        self.index(peer_id)
            .ok()
            .and_then(|index| self.peers.get(index))
    }

    // Pipeline health, used by status reporting.
    pub fn status(&self) -> Result<(), String> {
        if self.local.queue.failed() {
            return Err("local RIB queue failed".to_owned());
        }
        Ok(())
    }

    // Process completions for the local-RIB egress queue.
    pub fn rib_queue_response(&mut self, result: Result<(), RpcError>) {
        self.local.queue.response(result);
    }

    pub fn rib_queue_retry(&mut self) {
        self.local.queue.retry();
    }

    pub fn rib_queue_failed(&self) -> bool {
        self.local.queue.failed()
    }

    // ===== ingress chain =====

    fn ingress_add(
        &mut self,
        resolver: &mut NextHopResolver<A>,
        index: Index,
        msg: InternalMessage<A>,
    ) -> TableResult {
        let route = Arc::clone(&msg.route);
        let peer = self.peers.get_mut(index).unwrap();
        let peer_id = peer.handler.info.peer_id;

        let (msg, modified) =
            match peer.in_filter.apply(msg, &mut self.attr_sets, resolver) {
                FilterOutcome::Pass(msg, modified) => (msg, modified),
                FilterOutcome::Drop => {
                    route.set_filtered(true);
                    return TableResult::Filtered;
                }
            };
        route.set_filtered(false);

        let msg = peer.in_cache.process_add(msg, modified);
        match peer.nh_lookup.add_route(msg, resolver, peer_id) {
            Some(msg) => {
                let (result, emits) = decision::add_route(self, msg);
                self.dispatch_emits(resolver, emits);
                result
            }
            // Waiting on the resolver.
            None => TableResult::Used,
        }
    }

    fn ingress_replace(
        &mut self,
        resolver: &mut NextHopResolver<A>,
        index: Index,
        old_msg: InternalMessage<A>,
        new_msg: InternalMessage<A>,
    ) -> TableResult {
        let new_route = Arc::clone(&new_msg.route);
        let peer = self.peers.get_mut(index).unwrap();
        let peer_id = peer.handler.info.peer_id;

        let old_was_filtered = old_msg.route.is_filtered();
        let old_out = if old_was_filtered {
            None
        } else {
            match peer.in_filter.apply(old_msg, &mut self.attr_sets, resolver)
            {
                FilterOutcome::Pass(msg, _) => Some(msg),
                FilterOutcome::Drop => None,
            }
        };
        let new_out =
            match peer.in_filter.apply(new_msg, &mut self.attr_sets, resolver)
            {
                FilterOutcome::Pass(msg, modified) => {
                    new_route.set_filtered(false);
                    Some((msg, modified))
                }
                FilterOutcome::Drop => {
                    new_route.set_filtered(true);
                    None
                }
            };

        match (old_out, new_out) {
            (Some(old_f), Some((new_f, modified))) => {
                let (old_c, new_c) =
                    peer.in_cache.process_replace(old_f, new_f, modified);
                match peer.nh_lookup.replace_route(
                    old_c, new_c, resolver, peer_id,
                ) {
                    Some(QueueEntry::Replace { old, new }) => {
                        let (result, emits) =
                            decision::replace_route(self, old, new);
                        self.dispatch_emits(resolver, emits);
                        result
                    }
                    Some(QueueEntry::Add(new)) => {
                        let (result, emits) = decision::add_route(self, new);
                        self.dispatch_emits(resolver, emits);
                        result
                    }
                    None => TableResult::Used,
                }
            }
            (None, Some((new_f, modified))) => {
                // The old route never made it downstream.
                let msg = peer.in_cache.process_add(new_f, modified);
                match peer.nh_lookup.add_route(msg, resolver, peer_id) {
                    Some(msg) => {
                        let (result, emits) = decision::add_route(self, msg);
                        self.dispatch_emits(resolver, emits);
                        result
                    }
                    None => TableResult::Used,
                }
            }
            (Some(old_f), None) => {
                // The replacement was filtered; downstream sees a delete.
                let old_c = peer.in_cache.process_delete(old_f);
                match peer.nh_lookup.delete_route(old_c, resolver, peer_id) {
                    Some(del) => {
                        let (_, emits) = decision::delete_route(self, del);
                        self.dispatch_emits(resolver, emits);
                        TableResult::Filtered
                    }
                    None => TableResult::Filtered,
                }
            }
            (None, None) => TableResult::Filtered,
        }
    }

    fn ingress_delete(
        &mut self,
        resolver: &mut NextHopResolver<A>,
        index: Index,
        msg: InternalMessage<A>,
    ) -> TableResult {
        if msg.route.is_filtered() {
            // The route never made it past the ingress filters.
            return TableResult::NoChange;
        }

        let peer = self.peers.get_mut(index).unwrap();
        let peer_id = peer.handler.info.peer_id;
        let old_c = peer.in_cache.process_delete(msg);
        match peer.nh_lookup.delete_route(old_c, resolver, peer_id) {
            Some(del) => {
                let (result, emits) = decision::delete_route(self, del);
                self.dispatch_emits(resolver, emits);
                result
            }
            None => TableResult::NoChange,
        }
    }

    // ===== egress fanout =====

    pub(crate) fn dispatch_emits(
        &mut self,
        resolver: &NextHopResolver<A>,
        emits: Vec<Emit<A>>,
    ) {
        for emit in emits {
            self.fanout_dispatch(resolver, Some(emit.origin), emit.op);
        }
    }

    fn fanout_dispatch(
        &mut self,
        resolver: &NextHopResolver<A>,
        origin: Option<PeerId>,
        op: FanoutOp<A>,
    ) {
        // An in-progress dump may supersede normal changes for prefixes
        // its cursor hasn't passed yet.
        let skip: Vec<DownstreamId> = match &op {
            FanoutOp::Push => vec![],
            FanoutOp::Add(msg)
            | FanoutOp::Replace(_, msg)
            | FanoutOp::Delete(msg) => {
                let is_delete = matches!(op, FanoutOp::Delete(_));
                self.dumps
                    .iter()
                    .filter(|dump| {
                        !dump.route_change_is_valid(
                            msg.peer.peer_id,
                            msg.genid,
                            msg.net(),
                            is_delete,
                        )
                    })
                    .map(|dump| DownstreamId::Peer(dump.target()))
                    .collect()
            }
        };

        let deliveries = self.fanout.dispatch(origin, op, &skip);
        for (target, op) in deliveries {
            self.egress_deliver(resolver, target, op);
        }
    }

    fn egress_deliver(
        &mut self,
        resolver: &NextHopResolver<A>,
        target: DownstreamId,
        op: FanoutOp<A>,
    ) {
        match target {
            DownstreamId::LocalRib => self.local_deliver(resolver, op),
            DownstreamId::Peer(peer_id) => {
                let Ok(index) = self.index(peer_id) else {
                    return;
                };
                {
                    let peer = self.peers.get(index).unwrap();
                    if !peer.session_up {
                        return;
                    }
                }
                self.peer_deliver(resolver, index, op);
            }
        }
    }

    fn peer_deliver(
        &mut self,
        resolver: &NextHopResolver<A>,
        index: Index,
        op: FanoutOp<A>,
    ) {
        let peer = self.peers.get_mut(index).unwrap();
        let push = match op {
            FanoutOp::Add(msg) => {
                let push = msg.push;
                if let FilterOutcome::Pass(msg, modified) =
                    peer.out_filter.apply(msg, &mut self.attr_sets, resolver)
                {
                    let msg = peer.out_cache.process_add(msg, modified);
                    peer.rib_out.add_route(msg);
                }
                push
            }
            FanoutOp::Replace(old_msg, new_msg) => {
                let push = new_msg.push;
                let old_out = match peer.out_filter.apply(
                    old_msg,
                    &mut self.attr_sets,
                    resolver,
                ) {
                    FilterOutcome::Pass(msg, _) => Some(msg),
                    FilterOutcome::Drop => None,
                };
                let new_out = match peer.out_filter.apply(
                    new_msg,
                    &mut self.attr_sets,
                    resolver,
                ) {
                    FilterOutcome::Pass(msg, modified) => {
                        Some((msg, modified))
                    }
                    FilterOutcome::Drop => None,
                };
                match (old_out, new_out) {
                    (Some(old_f), Some((new_f, modified))) => {
                        let (old_c, new_c) = peer
                            .out_cache
                            .process_replace(old_f, new_f, modified);
                        peer.rib_out.replace_route(old_c, new_c);
                    }
                    (None, Some((new_f, modified))) => {
                        let new_c =
                            peer.out_cache.process_add(new_f, modified);
                        peer.rib_out.add_route(new_c);
                    }
                    (Some(old_f), None) => {
                        let old_c = peer.out_cache.process_delete(old_f);
                        peer.rib_out.delete_route(old_c);
                    }
                    (None, None) => (),
                }
                push
            }
            FanoutOp::Delete(msg) => {
                let push = msg.push;
                if let FilterOutcome::Pass(msg, _) =
                    peer.out_filter.apply(msg, &mut self.attr_sets, resolver)
                {
                    let msg = peer.out_cache.process_delete(msg);
                    peer.rib_out.delete_route(msg);
                }
                push
            }
            FanoutOp::Push => true,
        };

        if push {
            self.drain_peer_output(resolver, index);
        }
    }

    fn drain_peer_output(
        &mut self,
        resolver: &NextHopResolver<A>,
        index: Index,
    ) {
        let peer = self.peers.get_mut(index).unwrap();
        let peer_id = peer.handler.info.peer_id;
        match peer.rib_out.push(&peer.handler) {
            DrainOutcome::Drained => {
                self.fanout.set_busy(DownstreamId::Peer(peer_id), false);
                while let Some(op) =
                    self.fanout.get_next_message(DownstreamId::Peer(peer_id))
                {
                    self.peer_deliver(resolver, index, op);
                    if self.fanout.is_busy(DownstreamId::Peer(peer_id)) {
                        break;
                    }
                }
            }
            DrainOutcome::PeerBusy => {
                self.fanout.set_busy(DownstreamId::Peer(peer_id), true);
            }
            DrainOutcome::PeerClosed => {
                warn!(%peer_id, "peer output closed");
            }
        }
    }

    fn local_deliver(
        &mut self,
        resolver: &NextHopResolver<A>,
        op: FanoutOp<A>,
    ) {
        match op {
            FanoutOp::Add(msg) => {
                if let FilterOutcome::Pass(msg, modified) = self
                    .local
                    .filter
                    .apply(msg, &mut self.attr_sets, resolver)
                {
                    let msg = self.local.cache.process_add(msg, modified);
                    self.local.queue.enqueue(RibQueueOp::Add {
                        net: msg.net(),
                        nexthop: msg.nexthop(),
                    });
                }
            }
            FanoutOp::Replace(old_msg, new_msg) => {
                let old_out = match self.local.filter.apply(
                    old_msg,
                    &mut self.attr_sets,
                    resolver,
                ) {
                    FilterOutcome::Pass(msg, _) => Some(msg),
                    FilterOutcome::Drop => None,
                };
                let new_out = match self.local.filter.apply(
                    new_msg,
                    &mut self.attr_sets,
                    resolver,
                ) {
                    FilterOutcome::Pass(msg, modified) => {
                        Some((msg, modified))
                    }
                    FilterOutcome::Drop => None,
                };
                match (old_out, new_out) {
                    (Some(old_f), Some((new_f, modified))) => {
                        let (_, new_c) = self
                            .local
                            .cache
                            .process_replace(old_f, new_f, modified);
                        self.local.queue.enqueue(RibQueueOp::Replace {
                            net: new_c.net(),
                            nexthop: new_c.nexthop(),
                        });
                    }
                    (None, Some((new_f, modified))) => {
                        let new_c =
                            self.local.cache.process_add(new_f, modified);
                        self.local.queue.enqueue(RibQueueOp::Add {
                            net: new_c.net(),
                            nexthop: new_c.nexthop(),
                        });
                    }
                    (Some(old_f), None) => {
                        let old_c = self.local.cache.process_delete(old_f);
                        self.local
                            .queue
                            .enqueue(RibQueueOp::Delete { net: old_c.net() });
                    }
                    (None, None) => (),
                }
            }
            FanoutOp::Delete(msg) => {
                if let FilterOutcome::Pass(msg, _) = self
                    .local
                    .filter
                    .apply(msg, &mut self.attr_sets, resolver)
                {
                    let msg = self.local.cache.process_delete(msg);
                    self.local
                        .queue
                        .enqueue(RibQueueOp::Delete { net: msg.net() });
                }
            }
            FanoutOp::Push => self.local.queue.flush(),
        }
    }

    // ===== helper functions =====

    fn index(&self, peer_id: PeerId) -> Result<Index, Error> {
        self.peers_by_id
            .get(&peer_id)
            .copied()
            .ok_or(Error::PeerUnknown(peer_id))
    }

    fn default_ingress_filters(&self, info: &PeerInfo) -> FilterBank<A> {
        let mut bank = FilterBank::new();
        if !info.ibgp {
            // Loop prevention, and a LocalPref for routes that arrive
            // without one.
            bank.add_simple_as_filter(self.local_as);
            bank.add_localpref_insertion_filter(DFLT_LOCAL_PREF);
        }
        bank
    }

    fn default_egress_filters(&self, info: &PeerInfo) -> FilterBank<A> {
        let mut bank = FilterBank::new();
        if info.ibgp {
            bank.add_ibgp_loop_filter();
            bank.add_originate_route_filter(self.local_as);
        } else {
            bank.add_localpref_removal_filter();
            bank.add_med_removal_filter();
            bank.add_med_insertion_filter();
            bank.add_as_prepend_filter(self.local_as);
            if let Some(nexthop) = A::IpAddr::get(info.local_addr)
                && !nexthop.is_unspecified()
            {
                bank.add_nexthop_rewrite_filter(nexthop);
            }
        }
        bank.add_unknown_filter();
        bank
    }
}
