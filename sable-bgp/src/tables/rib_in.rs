//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;

use crate::af::AddressFamily;
use crate::peer::PeerInfo;
use crate::rib::{AttrSet, InternalMessage, SubnetRoute};

// Number of stored routes torn down per event-loop turn when a peering
// goes down.
pub const DELETION_BATCH_SIZE: usize = 64;

// Stores the full set of routes currently advertised by one peer.
//
// When the peering goes down the stored routes move into a deletion
// batch, which is drained a chunk at a time; the batch keeps the session
// generation it was advertised under, and its routes remain visible to
// `lookup` until their individual deletes have flowed downstream.
#[derive(Debug, Default)]
pub struct RibInTable<A: AddressFamily> {
    routes: BTreeMap<A::IpNetwork, Arc<SubnetRoute<A>>>,
    deletion_batches: VecDeque<DeletionBatch<A>>,
}

#[derive(Debug)]
pub struct DeletionBatch<A: AddressFamily> {
    pub peer: PeerInfo,
    pub genid: u32,
    routes: BTreeMap<A::IpNetwork, Arc<SubnetRoute<A>>>,
}

// ===== impl RibInTable =====

impl<A> RibInTable<A>
where
    A: AddressFamily,
{
    pub fn new() -> RibInTable<A> {
        RibInTable {
            routes: Default::default(),
            deletion_batches: Default::default(),
        }
    }

    // Store a route, returning the new shared route and the previous one
    // for the same prefix, if any (an update for a known prefix is a
    // replace).
    pub fn update(
        &mut self,
        net: A::IpNetwork,
        attrs: Arc<AttrSet>,
    ) -> (Arc<SubnetRoute<A>>, Option<Arc<SubnetRoute<A>>>) {
        let route = Arc::new(SubnetRoute::new(net, attrs));
        let old = self.routes.insert(net, Arc::clone(&route));
        (route, old)
    }

    pub fn remove(
        &mut self,
        net: &A::IpNetwork,
    ) -> Option<Arc<SubnetRoute<A>>> {
        self.routes.remove(net)
    }

    // What this table currently publishes for the prefix, together with
    // the generation it was advertised under. Routes pending teardown are
    // still published (under their old generation) until their deletes
    // have been emitted.
    pub fn lookup(
        &self,
        net: &A::IpNetwork,
        current_genid: u32,
    ) -> Option<(&Arc<SubnetRoute<A>>, u32)> {
        if let Some(route) = self.routes.get(net) {
            return Some((route, current_genid));
        }
        self.deletion_batches.iter().find_map(|batch| {
            batch.routes.get(net).map(|route| (route, batch.genid))
        })
    }

    // Prefixes of all stored routes whose attributes carry the given next
    // hop. Used to re-run the decision process after an IGP change.
    pub fn routes_with_nexthop(&self, nexthop: A::IpAddr) -> Vec<A::IpNetwork> {
        self.routes
            .iter()
            .filter(|(_, route)| {
                A::nexthop(&route.attrs().value.base) == nexthop
            })
            .map(|(net, _)| *net)
            .collect()
    }

    // First stored prefix strictly greater than the cursor, in table
    // order. Used by the dump iterator.
    pub fn next_route_after(
        &self,
        cursor: Option<&A::IpNetwork>,
    ) -> Option<(A::IpNetwork, &Arc<SubnetRoute<A>>)> {
        let range = match cursor {
            Some(cursor) => self
                .routes
                .range((Bound::Excluded(*cursor), Bound::Unbounded)),
            None => self.routes.range(..),
        };
        range.map(|(net, route)| (*net, route)).next()
    }

    // Move the current contents into a deletion batch for asynchronous
    // teardown.
    pub fn start_deletion(&mut self, peer: PeerInfo, genid: u32) {
        let routes = std::mem::take(&mut self.routes);
        if !routes.is_empty() {
            self.deletion_batches.push_back(DeletionBatch {
                peer,
                genid,
                routes,
            });
        }
    }

    // Take the next chunk of routes to delete. Returns the batch identity,
    // the routes, and whether the teardown is complete after this chunk.
    #[allow(clippy::type_complexity)]
    pub fn next_deletion_chunk(
        &mut self,
        max: usize,
    ) -> Option<(PeerInfo, u32, Vec<(A::IpNetwork, Arc<SubnetRoute<A>>)>, bool)>
    {
        let batch = self.deletion_batches.front_mut()?;
        let peer = batch.peer;
        let genid = batch.genid;

        let nets = batch
            .routes
            .keys()
            .take(max)
            .copied()
            .collect::<Vec<_>>();
        let routes = nets
            .into_iter()
            .filter_map(|net| {
                batch.routes.remove(&net).map(|route| (net, route))
            })
            .collect::<Vec<_>>();

        let done = batch.routes.is_empty();
        if done {
            self.deletion_batches.pop_front();
        }
        Some((peer, genid, routes, done))
    }

    pub fn deleting(&self) -> bool {
        !self.deletion_batches.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

impl<A> InternalMessage<A>
where
    A: AddressFamily,
{
    // Build a pipeline message for a route as stored in a RibIn.
    pub fn from_stored(
        route: &Arc<SubnetRoute<A>>,
        peer: PeerInfo,
        genid: u32,
    ) -> InternalMessage<A> {
        InternalMessage::new(
            Arc::clone(route),
            Arc::clone(route.attrs()),
            peer,
            genid,
        )
    }
}
