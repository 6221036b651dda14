//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::af::AddressFamily;
use crate::rib::{InternalMessage, SubnetRoute};

// Stores the post-filter version of every route whose attribute list was
// modified by the preceding filter bank.
//
// This is a correctness mechanism, not an optimization: filters are not
// required to be idempotent (AsPrepend is not), so later deletes, dumps,
// and peering teardown must replay the exact list that was sent
// downstream rather than re-filtering the original.
#[derive(Debug, Default)]
pub struct CacheTable<A: AddressFamily> {
    routes: BTreeMap<A::IpNetwork, CacheEntry<A>>,
}

#[derive(Debug)]
pub struct CacheEntry<A: AddressFamily> {
    pub route: Arc<SubnetRoute<A>>,
    pub genid: u32,
}

// ===== impl CacheTable =====

impl<A> CacheTable<A>
where
    A: AddressFamily,
{
    pub fn new() -> CacheTable<A> {
        CacheTable {
            routes: Default::default(),
        }
    }

    // Process an add coming out of the filter bank. Modified routes are
    // cached under a fresh `SubnetRoute` carrying the filtered list;
    // unmodified routes pass through (and clear any stale entry).
    pub fn process_add(
        &mut self,
        msg: InternalMessage<A>,
        modified: bool,
    ) -> InternalMessage<A> {
        let net = msg.net();
        if !modified {
            self.routes.remove(&net);
            return msg;
        }

        let route =
            Arc::new(SubnetRoute::new(net, Arc::clone(&msg.attrs)));
        self.routes.insert(
            net,
            CacheEntry {
                route: Arc::clone(&route),
                genid: msg.genid,
            },
        );

        let mut out = InternalMessage::new(
            route,
            Arc::clone(&msg.attrs),
            msg.peer,
            msg.genid,
        );
        if msg.push {
            out.set_push();
        }
        out
    }

    // Process a delete. If the add was cached, the delete must carry the
    // cached route and attributes, not a re-filtered version of the
    // original.
    pub fn process_delete(
        &mut self,
        msg: InternalMessage<A>,
    ) -> InternalMessage<A> {
        let net = msg.net();
        match self.routes.remove(&net) {
            Some(entry) => {
                let attrs = Arc::clone(entry.route.attrs());
                let mut out = InternalMessage::new(
                    entry.route,
                    attrs,
                    msg.peer,
                    entry.genid,
                );
                if msg.push {
                    out.set_push();
                }
                out
            }
            None => msg,
        }
    }

    // Process a replace: the old half is substituted from the cache, the
    // new half is cached like an add.
    pub fn process_replace(
        &mut self,
        old_msg: InternalMessage<A>,
        new_msg: InternalMessage<A>,
        new_modified: bool,
    ) -> (InternalMessage<A>, InternalMessage<A>) {
        let old_out = match self.routes.remove(&old_msg.net()) {
            Some(entry) => {
                let attrs = Arc::clone(entry.route.attrs());
                InternalMessage::new(
                    entry.route,
                    attrs,
                    old_msg.peer,
                    entry.genid,
                )
            }
            None => old_msg,
        };
        let new_out = self.process_add(new_msg, new_modified);
        (old_out, new_out)
    }

    pub fn lookup_route(&self, net: &A::IpNetwork) -> Option<&CacheEntry<A>> {
        self.routes.get(net)
    }

    // Drop every cached route of an obsolete generation.
    pub fn flush_genid(&mut self, genid: u32) {
        self.routes.retain(|_, entry| entry.genid != genid);
    }

    pub fn flush(&mut self) {
        self.routes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
