//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use crate::af::AddressFamily;
use crate::peer::PeerId;

// Routes replayed per event-loop turn while dumping a table to a newly
// established peer.
pub const DUMP_BATCH_SIZE: usize = 64;

// One source peer scheduled for dumping.
#[derive(Clone, Copy, Debug)]
pub struct PeerDumpPlan {
    pub peer: PeerId,
    pub genid: u32,
}

// Progress through one source peer, kept after the peer was dumped or
// went down so that concurrent route changes can be classified.
#[derive(Debug)]
pub struct PeerDumpState<A: AddressFamily> {
    pub peer: PeerId,
    pub genid: u32,
    pub routes_dumped: bool,
    pub last_net: Option<A::IpNetwork>,
    pub delete_complete: bool,
}

// Tracks the replay of all currently-best routes to a newly established
// peer while the table keeps changing underneath.
//
// The iterator walks each source peer's RibIn in table order. Peers that
// go down mid-dump are skipped from the walk (their teardown deletes
// travel the normal pipeline); peers that come up mid-dump are appended
// and dumped after the original list completes.
#[derive(Debug)]
pub struct DumpIterator<A: AddressFamily> {
    target: PeerId,
    target_genid: u32,
    peers_to_dump: VecDeque<PeerDumpPlan>,
    current_started: bool,
    last_dumped: Option<A::IpNetwork>,
    downed_peers: Vec<PeerDumpState<A>>,
    new_peers: Vec<PeerId>,
    dumped_peers: Vec<PeerDumpState<A>>,
    valid: bool,
}

// ===== impl DumpIterator =====

impl<A> DumpIterator<A>
where
    A: AddressFamily,
{
    pub fn new(
        target: PeerId,
        target_genid: u32,
        peers_to_dump: Vec<PeerDumpPlan>,
    ) -> DumpIterator<A> {
        DumpIterator {
            target,
            target_genid,
            peers_to_dump: peers_to_dump.into(),
            current_started: false,
            last_dumped: None,
            downed_peers: vec![],
            new_peers: vec![],
            dumped_peers: vec![],
            valid: true,
        }
    }

    pub fn target(&self) -> PeerId {
        self.target
    }

    pub fn target_genid(&self) -> u32 {
        self.target_genid
    }

    // A dump is valid while the target's session stays at the generation
    // it had at dump start.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn current_peer(&self) -> Option<PeerDumpPlan> {
        self.peers_to_dump.front().copied()
    }

    pub fn last_dumped(&self) -> Option<A::IpNetwork> {
        self.last_dumped
    }

    pub fn note_dumped(&mut self, net: A::IpNetwork) {
        self.current_started = true;
        self.last_dumped = Some(net);
    }

    // The current source peer is exhausted; move to the next one.
    pub fn next_peer(&mut self) {
        if let Some(plan) = self.peers_to_dump.pop_front() {
            self.dumped_peers.push(PeerDumpState {
                peer: plan.peer,
                genid: plan.genid,
                routes_dumped: self.current_started,
                last_net: self.last_dumped,
                delete_complete: false,
            });
        }
        self.current_started = false;
        self.last_dumped = None;
    }

    pub fn is_done(&self) -> bool {
        self.peers_to_dump.is_empty()
    }

    // A peer went down while the dump is in progress.
    pub fn peering_went_down(&mut self, peer: PeerId, genid: u32) {
        if peer == self.target {
            self.valid = false;
            return;
        }

        let current = self
            .current_peer()
            .is_some_and(|plan| plan.peer == peer && plan.genid == genid);
        if current {
            self.downed_peers.push(PeerDumpState {
                peer,
                genid,
                routes_dumped: self.current_started,
                last_net: self.last_dumped,
                delete_complete: false,
            });
            self.peers_to_dump.pop_front();
            self.current_started = false;
            self.last_dumped = None;
            return;
        }

        let was_pending = self
            .peers_to_dump
            .iter()
            .any(|plan| plan.peer == peer && plan.genid == genid);
        self.peers_to_dump
            .retain(|plan| !(plan.peer == peer && plan.genid == genid));
        if was_pending {
            self.downed_peers.push(PeerDumpState {
                peer,
                genid,
                routes_dumped: false,
                last_net: None,
                delete_complete: false,
            });
            return;
        }

        // Already-dumped peers keep their progress record; their teardown
        // deletes must still reach the target.
        if let Some(state) = self
            .dumped_peers
            .iter_mut()
            .find(|state| state.peer == peer && state.genid == genid)
        {
            let state = PeerDumpState {
                peer: state.peer,
                genid: state.genid,
                routes_dumped: state.routes_dumped,
                last_net: state.last_net,
                delete_complete: false,
            };
            self.downed_peers.push(state);
        }
    }

    // A peer that went down has finished deleting all its routes.
    pub fn peering_down_complete(&mut self, peer: PeerId, genid: u32) {
        for state in &mut self.downed_peers {
            if state.peer == peer && state.genid == genid {
                state.delete_complete = true;
            }
        }
    }

    // A new peer came up during the dump; queue it for dumping after the
    // current peer list completes.
    pub fn peering_came_up(&mut self, peer: PeerId, genid: u32) {
        if peer == self.target {
            return;
        }
        self.new_peers.push(peer);
        self.peers_to_dump.push_back(PeerDumpPlan { peer, genid });
    }

    // Should a normal route change for the target be delivered, or will
    // the dump itself carry the value later?
    //
    // Deletes are always delivered; the egress cache swallows withdraws
    // for prefixes the target never received.
    pub fn route_change_is_valid(
        &self,
        origin: PeerId,
        genid: u32,
        net: A::IpNetwork,
        is_delete: bool,
    ) -> bool {
        if is_delete || origin == self.target {
            return true;
        }

        if self
            .downed_peers
            .iter()
            .any(|state| state.peer == origin && state.genid == genid)
        {
            return true;
        }

        if self
            .dumped_peers
            .iter()
            .any(|state| state.peer == origin && state.genid == genid)
        {
            return true;
        }

        if let Some(plan) = self.current_peer()
            && plan.peer == origin
            && plan.genid == genid
        {
            // Changes behind the cursor must flow normally; changes ahead
            // of it are superseded by the dump, which reads live values.
            return match &self.last_dumped {
                Some(last) => net <= *last,
                None => false,
            };
        }

        if self
            .peers_to_dump
            .iter()
            .any(|plan| plan.peer == origin && plan.genid == genid)
        {
            return false;
        }

        // A peer this dump knows nothing about.
        true
    }
}
