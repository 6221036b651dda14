//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};

use crate::af::AddressFamily;
use crate::nexthop::NextHopResolver;
use crate::peer::PeerId;
use crate::rib::{InternalMessage, RouteData};

// Holds routes whose next hop has been sent to the resolver but not yet
// answered. By the time a route reaches the decision process its
// resolvability must be known; everything else waits here.
#[derive(Debug, Default)]
pub struct NhLookupTable<A: AddressFamily> {
    // Pending messages by prefix.
    queue_by_net: BTreeMap<A::IpNetwork, QueueEntry<A>>,
    // Prefixes waiting on each next hop.
    queue_by_nexthop: BTreeMap<A::IpAddr, BTreeSet<A::IpNetwork>>,
}

#[derive(Debug)]
pub enum QueueEntry<A: AddressFamily> {
    Add(InternalMessage<A>),
    Replace {
        // What downstream last saw for this prefix.
        old: InternalMessage<A>,
        new: InternalMessage<A>,
    },
}

// What a lookup through this table sees for a prefix.
#[derive(Debug)]
pub enum NhLookupView<A: AddressFamily> {
    // A queued add: downstream hasn't seen the prefix yet.
    Hidden,
    // A queued replace: downstream still sees the old route.
    Queued(RouteData<A>),
    // Nothing queued; the parent's view passes through.
    Pass,
}

// ===== impl NhLookupTable =====

impl<A> NhLookupTable<A>
where
    A: AddressFamily,
{
    pub fn new() -> NhLookupTable<A> {
        NhLookupTable {
            queue_by_net: Default::default(),
            queue_by_nexthop: Default::default(),
        }
    }

    // Offer an add. Returns the message when its next hop is already
    // answered; otherwise the message is queued until the resolver calls
    // back.
    pub fn add_route(
        &mut self,
        msg: InternalMessage<A>,
        resolver: &mut NextHopResolver<A>,
        requester: PeerId,
    ) -> Option<InternalMessage<A>> {
        let nexthop = msg.nexthop();
        let net = msg.net();

        if resolver.register_nexthop(nexthop, net, requester) {
            resolve_flags(&msg, resolver);
            return Some(msg);
        }

        self.enqueue(nexthop, net, QueueEntry::Add(msg));
        None
    }

    // Offer a replace. The returned entry is what may continue downstream
    // now; the old half's next hop registration is always released.
    pub fn replace_route(
        &mut self,
        old: InternalMessage<A>,
        new: InternalMessage<A>,
        resolver: &mut NextHopResolver<A>,
        requester: PeerId,
    ) -> Option<QueueEntry<A>> {
        let net = new.net();

        // Merge with any pending entry for the prefix; its new half was
        // never seen downstream, so its registration is dropped and the
        // downstream-visible old half (if any) is carried over.
        let prior_old = match self.dequeue(&net) {
            Some(QueueEntry::Add(queued)) => {
                resolver.deregister_nexthop(
                    queued.nexthop(),
                    net,
                    requester,
                );
                None
            }
            Some(QueueEntry::Replace { old, new: queued }) => {
                resolver.deregister_nexthop(
                    queued.nexthop(),
                    net,
                    requester,
                );
                Some(old)
            }
            None => {
                resolver.deregister_nexthop(old.nexthop(), net, requester);
                Some(old)
            }
        };

        let nexthop = new.nexthop();
        if resolver.register_nexthop(nexthop, net, requester) {
            resolve_flags(&new, resolver);
            return Some(match prior_old {
                Some(old) => QueueEntry::Replace { old, new },
                None => QueueEntry::Add(new),
            });
        }

        let entry = match prior_old {
            Some(old) => QueueEntry::Replace { old, new },
            None => QueueEntry::Add(new),
        };
        self.enqueue(nexthop, net, entry);
        None
    }

    // Offer a delete. Returns the delete to forward downstream, if
    // downstream ever saw the prefix.
    pub fn delete_route(
        &mut self,
        msg: InternalMessage<A>,
        resolver: &mut NextHopResolver<A>,
        requester: PeerId,
    ) -> Option<InternalMessage<A>> {
        let net = msg.net();
        match self.dequeue(&net) {
            Some(QueueEntry::Add(queued)) => {
                // Downstream never saw it; the delete is swallowed.
                resolver.deregister_nexthop(
                    queued.nexthop(),
                    net,
                    requester,
                );
                None
            }
            Some(QueueEntry::Replace { old, new: queued }) => {
                resolver.deregister_nexthop(
                    queued.nexthop(),
                    net,
                    requester,
                );
                Some(old)
            }
            None => {
                resolver.deregister_nexthop(msg.nexthop(), net, requester);
                Some(msg)
            }
        }
    }

    // The resolver's answer for a next hop arrived; release every queued
    // message for the given prefixes, with their resolution flags set.
    pub fn rib_lookup_done(
        &mut self,
        nexthop: A::IpAddr,
        nets: &BTreeSet<A::IpNetwork>,
        resolver: &NextHopResolver<A>,
    ) -> Vec<QueueEntry<A>> {
        let mut ready = vec![];
        for net in nets {
            let Some(entry) = self.dequeue_nexthop(nexthop, net) else {
                continue;
            };
            match &entry {
                QueueEntry::Add(msg) => resolve_flags(msg, resolver),
                QueueEntry::Replace { new, .. } => {
                    resolve_flags(new, resolver)
                }
            }
            ready.push(entry);
        }
        ready
    }

    // What this table publishes for the prefix.
    pub fn lookup(&self, net: &A::IpNetwork) -> NhLookupView<A> {
        match self.queue_by_net.get(net) {
            Some(QueueEntry::Add(_)) => NhLookupView::Hidden,
            Some(QueueEntry::Replace { old, .. }) => {
                NhLookupView::Queued(RouteData::from_msg(old))
            }
            None => NhLookupView::Pass,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue_by_net.is_empty()
    }

    fn enqueue(
        &mut self,
        nexthop: A::IpAddr,
        net: A::IpNetwork,
        entry: QueueEntry<A>,
    ) {
        self.queue_by_net.insert(net, entry);
        self.queue_by_nexthop.entry(nexthop).or_default().insert(net);
    }

    fn dequeue(&mut self, net: &A::IpNetwork) -> Option<QueueEntry<A>> {
        let entry = self.queue_by_net.remove(net)?;
        let nexthop = match &entry {
            QueueEntry::Add(msg) => msg.nexthop(),
            QueueEntry::Replace { new, .. } => new.nexthop(),
        };
        if let Some(nets) = self.queue_by_nexthop.get_mut(&nexthop) {
            nets.remove(net);
            if nets.is_empty() {
                self.queue_by_nexthop.remove(&nexthop);
            }
        }
        Some(entry)
    }

    fn dequeue_nexthop(
        &mut self,
        nexthop: A::IpAddr,
        net: &A::IpNetwork,
    ) -> Option<QueueEntry<A>> {
        let nets = self.queue_by_nexthop.get_mut(&nexthop)?;
        if !nets.remove(net) {
            return None;
        }
        if nets.is_empty() {
            self.queue_by_nexthop.remove(&nexthop);
        }
        self.queue_by_net.remove(net)
    }
}

// Record the resolver's current answer on the route itself, so that later
// decision passes can rely on the cached state.
fn resolve_flags<A>(msg: &InternalMessage<A>, resolver: &NextHopResolver<A>)
where
    A: AddressFamily,
{
    match resolver.lookup(msg.nexthop()) {
        Some((resolved, metric)) => {
            msg.route.set_nexthop_resolved(resolved, metric);
        }
        None => {
            msg.route.set_nexthop_resolved(false, 0);
        }
    }
}
