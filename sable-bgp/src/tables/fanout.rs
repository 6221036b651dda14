//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use crate::af::AddressFamily;
use crate::peer::{LOCAL_PEER_ID, PeerId};
use crate::rib::InternalMessage;

// One egress target of the fanout.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DownstreamId {
    Peer(PeerId),
    LocalRib,
}

// A route operation traveling from the decision process toward one egress
// chain.
#[derive(Debug)]
pub enum FanoutOp<A: AddressFamily> {
    Add(InternalMessage<A>),
    Replace(InternalMessage<A>, InternalMessage<A>),
    Delete(InternalMessage<A>),
    Push,
}

impl<A> Clone for FanoutOp<A>
where
    A: AddressFamily,
{
    fn clone(&self) -> FanoutOp<A> {
        match self {
            FanoutOp::Add(m) => FanoutOp::Add(m.clone()),
            FanoutOp::Replace(a, b) => FanoutOp::Replace(a.clone(), b.clone()),
            FanoutOp::Delete(m) => FanoutOp::Delete(m.clone()),
            FanoutOp::Push => FanoutOp::Push,
        }
    }
}

// Multiplexes the decision output to the egress chains. This is the only
// node holding egress-side backpressure state: a busy downstream has its
// messages queued and released one at a time through
// `get_next_message`. Push markers queue behind routes, so the final push
// reaches a peer only once its queue has drained.
#[derive(Debug, Default)]
pub struct FanoutTable<A: AddressFamily> {
    downstreams: Vec<Downstream<A>>,
}

#[derive(Debug)]
struct Downstream<A: AddressFamily> {
    id: DownstreamId,
    busy: bool,
    queue: VecDeque<FanoutOp<A>>,
}

// ===== impl FanoutTable =====

impl<A> FanoutTable<A>
where
    A: AddressFamily,
{
    pub fn new() -> FanoutTable<A> {
        FanoutTable {
            downstreams: vec![],
        }
    }

    pub fn add_downstream(&mut self, id: DownstreamId) {
        if self.downstream(id).is_none() {
            self.downstreams.push(Downstream {
                id,
                busy: false,
                queue: VecDeque::new(),
            });
        }
    }

    pub fn remove_downstream(&mut self, id: DownstreamId) {
        self.downstreams.retain(|downstream| downstream.id != id);
    }

    pub fn has_downstream(&self, id: DownstreamId) -> bool {
        self.downstream(id).is_some()
    }

    // Distribute an operation to every downstream except the origin peer
    // and the explicitly skipped targets. Busy downstreams get it queued;
    // the caller must deliver the returned (target, op) pairs to the idle
    // ones.
    pub fn dispatch(
        &mut self,
        origin: Option<PeerId>,
        op: FanoutOp<A>,
        skip: &[DownstreamId],
    ) -> Vec<(DownstreamId, FanoutOp<A>)> {
        let mut deliveries = vec![];
        for downstream in &mut self.downstreams {
            if let (Some(origin), DownstreamId::Peer(peer_id)) =
                (origin, downstream.id)
                && peer_id == origin
            {
                continue;
            }
            // Locally-originated routes don't go back into the local RIB.
            if downstream.id == DownstreamId::LocalRib
                && origin == Some(LOCAL_PEER_ID)
            {
                continue;
            }
            if skip.contains(&downstream.id) {
                continue;
            }
            if downstream.busy || !downstream.queue.is_empty() {
                downstream.queue.push_back(op.clone());
            } else {
                deliveries.push((downstream.id, op.clone()));
            }
        }
        deliveries
    }

    pub fn set_busy(&mut self, id: DownstreamId, busy: bool) {
        if let Some(downstream) = self.downstream_mut(id) {
            downstream.busy = busy;
        }
    }

    pub fn is_busy(&self, id: DownstreamId) -> bool {
        self.downstream(id).is_some_and(|downstream| downstream.busy)
    }

    // Release one queued message for a downstream that has signalled it
    // can make progress.
    pub fn get_next_message(&mut self, id: DownstreamId) -> Option<FanoutOp<A>> {
        self.downstream_mut(id)?.queue.pop_front()
    }

    pub fn has_queued(&self, id: DownstreamId) -> bool {
        self.downstream(id)
            .is_some_and(|downstream| !downstream.queue.is_empty())
    }

    fn downstream(&self, id: DownstreamId) -> Option<&Downstream<A>> {
        self.downstreams
            .iter()
            .find(|downstream| downstream.id == id)
    }

    fn downstream_mut(&mut self, id: DownstreamId) -> Option<&mut Downstream<A>> {
        self.downstreams
            .iter_mut()
            .find(|downstream| downstream.id == id)
    }
}
