//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use crate::af::AddressFamily;
use crate::packet::attribute::Attrs;
use crate::peer::PeerInfo;

// Generation number carried by routes injected outside any peering
// session (e.g. locally-originated routes).
pub const GENID_UNKNOWN: u32 = 0;

// Cached per-route state bits. See the setters on `SubnetRoute` for who is
// allowed to flip each bit.
mod flags {
    pub const WINNER: u8 = 0x01;
    pub const RESOLVED: u8 = 0x02;
    pub const FILTERED: u8 = 0x04;
}

const IGP_METRIC_UNSET: u32 = u32::MAX;

// A route for one prefix, shared by reference across the tables of one
// family. The prefix and attributes are immutable; the cached state bits
// are mutable through the explicit setters only, and only by the table
// that currently owns the corresponding aspect of the route's lifecycle.
//
// Dropping the last reference releases the route; tables hold strong
// references for exactly as long as they publish the route.
#[derive(Debug)]
pub struct SubnetRoute<A: AddressFamily> {
    net: A::IpNetwork,
    attrs: Arc<AttrSet>,
    flags: AtomicU8,
    igp_metric: AtomicU32,
}

// A hash-consed path attribute list. Equal lists share one allocation and
// one index.
#[derive(Debug, Eq, PartialEq)]
pub struct AttrSet {
    pub index: u64,
    pub value: Attrs,
}

#[derive(Debug, Default)]
pub struct AttrSetsCxt {
    tree: BTreeMap<Attrs, Arc<AttrSet>>,
    next_index: u64,
}

// The unit of flow through the pipeline. `attrs` may differ from
// `route.attrs()` after a filter bank substituted a modified list; the
// message owns the substituted list in that case.
#[derive(Debug)]
pub struct InternalMessage<A: AddressFamily> {
    pub route: Arc<SubnetRoute<A>>,
    pub attrs: Arc<AttrSet>,
    pub peer: PeerInfo,
    pub genid: u32,
    pub push: bool,
}

// One alternative considered by the decision process.
#[derive(Debug)]
pub struct RouteData<A: AddressFamily> {
    pub route: Arc<SubnetRoute<A>>,
    pub attrs: Arc<AttrSet>,
    pub peer: PeerInfo,
    pub genid: u32,
}

impl<A> Clone for RouteData<A>
where
    A: AddressFamily,
{
    fn clone(&self) -> RouteData<A> {
        RouteData {
            route: Arc::clone(&self.route),
            attrs: Arc::clone(&self.attrs),
            peer: self.peer,
            genid: self.genid,
        }
    }
}

// Outcome of offering a route to a table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableResult {
    // Route was cached and forwarded.
    Used,
    // Route was stored but is of no current use downstream.
    Unused,
    // Route was dropped by a filter.
    Filtered,
    // The operation did not change what this table publishes.
    NoChange,
}

// ===== impl SubnetRoute =====

impl<A> SubnetRoute<A>
where
    A: AddressFamily,
{
    pub fn new(net: A::IpNetwork, attrs: Arc<AttrSet>) -> SubnetRoute<A> {
        SubnetRoute {
            net,
            attrs,
            flags: AtomicU8::new(0),
            igp_metric: AtomicU32::new(IGP_METRIC_UNSET),
        }
    }

    pub fn net(&self) -> A::IpNetwork {
        self.net
    }

    pub fn attrs(&self) -> &Arc<AttrSet> {
        &self.attrs
    }

    pub fn is_winner(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & flags::WINNER != 0
    }

    // Flip the winner bit. Only the decision process may call this, and
    // only for routes on the chain it is currently evaluating.
    pub fn set_is_winner(&self, igp_metric: u32) {
        self.flags.fetch_or(flags::WINNER, Ordering::Relaxed);
        self.igp_metric.store(igp_metric, Ordering::Relaxed);
    }

    pub fn set_is_not_winner(&self) {
        self.flags.fetch_and(!flags::WINNER, Ordering::Relaxed);
    }

    pub fn nexthop_resolved(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & flags::RESOLVED != 0
    }

    // Record the resolver's answer for this route's next hop. Only the
    // next-hop lookup stage (or an IGP change rescan) may call this.
    pub fn set_nexthop_resolved(&self, resolved: bool, igp_metric: u32) {
        if resolved {
            self.flags.fetch_or(flags::RESOLVED, Ordering::Relaxed);
            self.igp_metric.store(igp_metric, Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!flags::RESOLVED, Ordering::Relaxed);
            self.igp_metric.store(IGP_METRIC_UNSET, Ordering::Relaxed);
        }
    }

    // IGP distance to the next hop, as of the route's last visit to the
    // resolver or the decision process.
    pub fn igp_metric(&self) -> Option<u32> {
        match self.igp_metric.load(Ordering::Relaxed) {
            IGP_METRIC_UNSET => None,
            metric => Some(metric),
        }
    }

    pub fn is_filtered(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & flags::FILTERED != 0
    }

    pub fn set_filtered(&self, filtered: bool) {
        if filtered {
            self.flags.fetch_or(flags::FILTERED, Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!flags::FILTERED, Ordering::Relaxed);
        }
    }
}

// ===== impl AttrSetsCxt =====

impl AttrSetsCxt {
    // Return the shared attribute set for this list, interning it if it
    // wasn't seen before.
    pub fn get(&mut self, attrs: &Attrs) -> Arc<AttrSet> {
        if let Some(attr_set) = self.tree.get(attrs) {
            Arc::clone(attr_set)
        } else {
            self.next_index += 1;
            let attr_set = Arc::new(AttrSet {
                index: self.next_index,
                value: attrs.clone(),
            });
            self.tree.insert(attrs.clone(), Arc::clone(&attr_set));
            attr_set
        }
    }
}

// ===== impl InternalMessage =====

impl<A> InternalMessage<A>
where
    A: AddressFamily,
{
    pub fn new(
        route: Arc<SubnetRoute<A>>,
        attrs: Arc<AttrSet>,
        peer: PeerInfo,
        genid: u32,
    ) -> InternalMessage<A> {
        InternalMessage {
            route,
            attrs,
            peer,
            genid,
            push: false,
        }
    }

    pub fn net(&self) -> A::IpNetwork {
        self.route.net()
    }

    pub fn nexthop(&self) -> A::IpAddr {
        A::nexthop(&self.attrs.value.base)
    }

    pub fn set_push(&mut self) {
        self.push = true;
    }

    pub fn clear_push(&mut self) {
        self.push = false;
    }
}

impl<A> Clone for InternalMessage<A>
where
    A: AddressFamily,
{
    fn clone(&self) -> InternalMessage<A> {
        InternalMessage {
            route: Arc::clone(&self.route),
            attrs: Arc::clone(&self.attrs),
            peer: self.peer,
            genid: self.genid,
            push: self.push,
        }
    }
}

// ===== impl RouteData =====

impl<A> RouteData<A>
where
    A: AddressFamily,
{
    pub fn from_msg(msg: &InternalMessage<A>) -> RouteData<A> {
        RouteData {
            route: Arc::clone(&msg.route),
            attrs: Arc::clone(&msg.attrs),
            peer: msg.peer,
            genid: msg.genid,
        }
    }

    pub fn to_msg(&self) -> InternalMessage<A> {
        InternalMessage::new(
            Arc::clone(&self.route),
            Arc::clone(&self.attrs),
            self.peer,
            self.genid,
        )
    }

    pub fn nexthop(&self) -> A::IpAddr {
        A::nexthop(&self.attrs.value.base)
    }
}
