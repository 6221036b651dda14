//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! The inform-RIB queue.
//!
//! A single queue of pending route changes toward the RIB's multicast
//! table; at most one request is in flight. Entries may be marked ignored
//! while queued (e.g. when the interface they depend on went away) and
//! are discarded on dequeue.

use std::collections::VecDeque;

use sable_utils::protocol::Protocol;
use sable_utils::rib::{
    ErrorClass, RibRequest, RibRouteKeyMsg, RibRouteMsg, RpcError,
};
use sable_utils::task::{Task, TimeoutTask};
use tracing::{error, warn};

use crate::route::Fib2mribRoute;
use crate::tasks::{self, InformRibIo};

#[derive(Debug)]
pub struct InformRibQueue {
    queue: VecDeque<InformRibEntry>,
    flying: bool,
    previously_successful: bool,
    failed: bool,
    io: InformRibIo,
    response_task: Option<Task<()>>,
    retry_task: Option<TimeoutTask>,
}

#[derive(Debug)]
struct InformRibEntry {
    route: Fib2mribRoute,
    ignored: bool,
}

// ===== impl InformRibQueue =====

impl InformRibQueue {
    pub fn new(io: InformRibIo) -> InformRibQueue {
        InformRibQueue {
            queue: VecDeque::new(),
            flying: false,
            previously_successful: false,
            failed: false,
            io,
            response_task: None,
            retry_task: None,
        }
    }

    // Queue a route change. The route's type selects the RPC.
    pub fn enqueue(&mut self, route: Fib2mribRoute) {
        if self.failed {
            return;
        }
        self.queue.push_back(InformRibEntry {
            route,
            ignored: false,
        });
        if !self.flying {
            self.send_next();
        }
    }

    // Mark pending requests matching the route as ignored; they are
    // discarded when they reach the head of the queue.
    pub fn cancel(&mut self, route: &Fib2mribRoute) {
        for entry in &mut self.queue {
            if entry.route == *route {
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
                            "inform-RIB request failed, will retry");
                        self.retry_task =
                            Some(tasks::inform_rib_retry_timer(&self.io));
                    }
                    ErrorClass::Fatal => {
                        error!(%error, "lost contact with the RIB");
                        self.failed = true;
                    }
                    ErrorClass::AppLevel => {
                        if error == RpcError::CommandFailed {
                            error!(%error, "RIB rejected route change");
                            self.queue.pop_front();
                            self.send_next();
                        } else {
                            error!(%error,
                                "unrecoverable inform-RIB request error");
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

        let (responder, task) = tasks::inform_rib_responder(&self.io);
        let route = &front.route;
        let request = if route.is_delete_route() {
            RibRequest::DeleteRoute {
                route: RibRouteKeyMsg {
                    protocol: Protocol::Fib2mrib,
                    net: route.net,
                    unicast: false,
                    multicast: true,
                },
                responder,
            }
        } else {
            let msg = RibRouteMsg {
                protocol: Protocol::Fib2mrib,
                net: route.net,
                nexthop: route.nexthop,
                ifname: route.ifname.clone(),
                vifname: route.vifname.clone(),
                metric: route.metric,
                unicast: false,
                multicast: true,
                tags: route.policy_tags.clone(),
            };
            if route.is_replace_route() {
                RibRequest::ReplaceRoute {
                    route: msg,
                    responder,
                }
            } else if route.is_interface_route() {
                RibRequest::AddInterfaceRoute {
                    route: msg,
                    responder,
                }
            } else {
                RibRequest::AddRoute {
                    route: msg,
                    responder,
                }
            }
        };

        let _ = self.io.rib.send(request);
        self.flying = true;
        self.response_task = Some(task);
    }
}
