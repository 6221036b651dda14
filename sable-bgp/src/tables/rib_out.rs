//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use crate::af::AddressFamily;
use crate::peer::{PeerHandler, SendResult, UpdateMsg};
use crate::rib::InternalMessage;

// Terminal table of one peer's egress chain. Route operations accumulate
// here until a push arrives; the push drains the queue into the peer's
// bounded update sink, stopping (and reporting busy) when the sink fills.
#[derive(Debug, Default)]
pub struct RibOutTable<A: AddressFamily> {
    queue: VecDeque<RibOutEntry<A>>,
}

#[derive(Debug)]
enum RibOutEntry<A: AddressFamily> {
    Advertise(InternalMessage<A>),
    Withdraw(InternalMessage<A>),
}

// Result of attempting to drain the output queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DrainOutcome {
    Drained,
    PeerBusy,
    PeerClosed,
}

// ===== impl RibOutTable =====

impl<A> RibOutTable<A>
where
    A: AddressFamily,
{
    pub fn new() -> RibOutTable<A> {
        RibOutTable {
            queue: VecDeque::new(),
        }
    }

    pub fn add_route(&mut self, msg: InternalMessage<A>) {
        self.queue.push_back(RibOutEntry::Advertise(msg));
    }

    // On the wire a replace is an implicit withdraw, so only the new half
    // is advertised.
    pub fn replace_route(
        &mut self,
        _old: InternalMessage<A>,
        new: InternalMessage<A>,
    ) {
        self.queue.push_back(RibOutEntry::Advertise(new));
    }

    pub fn delete_route(&mut self, msg: InternalMessage<A>) {
        self.queue.push_back(RibOutEntry::Withdraw(msg));
    }

    // Flush deferred output to the peer.
    pub fn push(&mut self, peer: &PeerHandler) -> DrainOutcome {
        while let Some(entry) = self.queue.front() {
            let update = match entry {
                RibOutEntry::Advertise(msg) => UpdateMsg::Advertise {
                    net: msg.net().into(),
                    attrs: msg.attrs.value.clone(),
                },
                RibOutEntry::Withdraw(msg) => UpdateMsg::Withdraw {
                    net: msg.net().into(),
                },
            };
            match peer.send_update_message(update) {
                SendResult::Sent => {
                    self.queue.pop_front();
                }
                SendResult::Busy => {
                    return DrainOutcome::PeerBusy;
                }
                SendResult::Closed => {
                    self.queue.clear();
                    return DrainOutcome::PeerClosed;
                }
            }
        }
        DrainOutcome::Drained
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
