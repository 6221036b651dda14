//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! The egress queue toward the local RIB.
//!
//! A single queue of pending route requests; at most one is in flight.
//! Each completion either pops the queue and sends the next request, or,
//! on a transient failure, retries after one second with the head
//! unchanged. Rejected requests are logged and dropped: the pipeline has
//! no way to undo a decision already taken elsewhere.

use std::collections::VecDeque;

use sable_utils::rib::{ErrorClass, RpcError};
use sable_utils::task::{Task, TimeoutTask};
use tracing::{error, warn};

use crate::af::AddressFamily;
use crate::tasks::{self, RibQueueIo};

#[derive(Debug)]
pub struct RibQueue<A: AddressFamily> {
    queue: VecDeque<RibQueueEntry<A>>,
    flying: bool,
    previously_successful: bool,
    failed: bool,
    io: RibQueueIo,
    response_task: Option<Task<()>>,
    retry_task: Option<TimeoutTask>,
}

#[derive(Debug)]
struct RibQueueEntry<A: AddressFamily> {
    op: RibQueueOp<A>,
    ignored: bool,
}

#[derive(Clone, Debug)]
pub enum RibQueueOp<A: AddressFamily> {
    // Register/unregister this protocol's origin table with the RIB.
    AddIgpTable,
    DeleteIgpTable,
    Add {
        net: A::IpNetwork,
        nexthop: A::IpAddr,
    },
    Replace {
        net: A::IpNetwork,
        nexthop: A::IpAddr,
    },
    Delete {
        net: A::IpNetwork,
    },
}

// ===== impl RibQueue =====

impl<A> RibQueue<A>
where
    A: AddressFamily,
{
    pub fn new(io: RibQueueIo) -> RibQueue<A> {
        RibQueue {
            queue: VecDeque::new(),
            flying: false,
            previously_successful: false,
            failed: false,
            io,
            response_task: None,
            retry_task: None,
        }
    }

    pub fn enqueue(&mut self, op: RibQueueOp<A>) {
        if self.failed {
            return;
        }

        // The decision process emits a winner handover between different
        // peers as a delete followed by an add; toward the RIB that pair
        // is a replace. Only the tail may be rewritten: the head might
        // already be in flight.
        if let RibQueueOp::Add { net, nexthop } = &op
            && let Some(last) = self.queue.back()
            && !last.ignored
            && matches!(&last.op, RibQueueOp::Delete { net: last_net }
                if last_net == net)
            && !(self.flying && self.queue.len() == 1)
        {
            let net = *net;
            let nexthop = *nexthop;
            let last = self.queue.back_mut().unwrap();
            last.op = RibQueueOp::Replace { net, nexthop };
            return;
        }

        self.queue.push_back(RibQueueEntry { op, ignored: false });
    }

    // Start draining the queue. Requests accumulate between pushes so
    // that a winner handover can be recognized before its delete half is
    // already on the wire.
    pub fn flush(&mut self) {
        if self.failed || self.flying {
            return;
        }
        self.send_next();
    }

    // Mark pending requests for a prefix as ignored; they are discarded
    // when they reach the head of the queue.
    pub fn cancel(&mut self, net: &A::IpNetwork) {
        for entry in &mut self.queue {
            let entry_net = match &entry.op {
                RibQueueOp::Add { net, .. }
                | RibQueueOp::Replace { net, .. }
                | RibQueueOp::Delete { net } => net,
                RibQueueOp::AddIgpTable | RibQueueOp::DeleteIgpTable => {
                    continue;
                }
            };
            if entry_net == net {
                entry.ignored = true;
            }
        }
    }

    // Handle the completion of the in-flight request.
    pub fn response(&mut self, result: Result<(), RpcError>) {
        self.flying = false;
        self.response_task = None;

        match result {
            Ok(()) => {
                self.previously_successful = true;
                self.queue.pop_front();
                self.send_next();
            }
            Err(error) => {
                match error.classify(self.previously_successful) {
                    ErrorClass::Transient => {
                        warn!(%error,
                            "RIB route request failed, will retry");
                        self.retry_task =
                            Some(tasks::rib_queue_retry_timer::<A>(&self.io));
                    }
                    ErrorClass::Fatal => {
                        error!(%error, "lost contact with the RIB");
                        self.failed = true;
                    }
                    ErrorClass::AppLevel => {
                        if error == RpcError::CommandFailed {
                            // The RIB rejected the request; nothing can be
                            // undone at this point.
                            error!(%error, "RIB rejected route request");
                            self.queue.pop_front();
                            self.send_next();
                        } else {
                            error!(%error, "unrecoverable RIB request error");
                            self.failed = true;
                        }
                    }
                }
            }
        }
    }

    // Re-send the head of the queue after a transient failure.
    pub fn retry(&mut self) {
        if self.failed {
            return;
        }
        self.retry_task = None;
        self.flying = false;
        self.send_next();
    }

    pub fn register_igp_table(&mut self) {
        self.enqueue(RibQueueOp::AddIgpTable);
        self.flush();
    }

    pub fn unregister_igp_table(&mut self) {
        self.enqueue(RibQueueOp::DeleteIgpTable);
        self.flush();
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn busy(&self) -> bool {
        self.flying
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    fn send_next(&mut self) {
        // Discard ignored entries on dequeue.
        while let Some(front) = self.queue.front()
            && front.ignored
        {
            self.queue.pop_front();
        }

        let Some(front) = self.queue.front() else {
            self.flying = false;
            return;
        };
        self.flying = true;
        self.response_task =
            Some(tasks::rib_queue_request::<A>(&self.io, &front.op));
    }
}
