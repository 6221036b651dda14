//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use tracing::{debug, debug_span};

use crate::peer::PeerId;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug {
    InstanceCreate,
    InstanceDelete,
    InstanceStart,
    InstanceStop,
    PeeringUp(PeerId, u32),
    PeeringDown(PeerId, u32),
    PeeringDownComplete(PeerId, u32),
    BestPathFound(IpNetwork),
    BestPathNotFound(IpNetwork),
    NhtUpdate(IpAddr, Option<(bool, u32)>),
    DumpDone(PeerId),
}

// ===== impl Debug =====

impl Debug {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceCreate
            | Debug::InstanceDelete
            | Debug::InstanceStart
            | Debug::InstanceStop => {
                // Parent span(s): instance
                debug!("{}", self);
            }
            Debug::PeeringUp(peer_id, genid)
            | Debug::PeeringDown(peer_id, genid)
            | Debug::PeeringDownComplete(peer_id, genid) => {
                // Parent span(s): instance
                debug_span!("peering", %peer_id).in_scope(|| {
                    debug!(%genid, "{}", self);
                });
            }
            Debug::BestPathFound(net) | Debug::BestPathNotFound(net) => {
                // Parent span(s): instance
                debug!(prefix = %net, "{}", self);
            }
            Debug::NhtUpdate(addr, answer) => {
                // Parent span(s): instance
                match answer {
                    Some((true, metric)) => {
                        debug!(%addr, %metric, "{}", self);
                    }
                    _ => {
                        debug!(%addr, metric = "unreachable", "{}", self);
                    }
                }
            }
            Debug::DumpDone(peer_id) => {
                // Parent span(s): instance
                debug_span!("peering", %peer_id).in_scope(|| {
                    debug!("{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceCreate => {
                write!(f, "instance created")
            }
            Debug::InstanceDelete => {
                write!(f, "instance deleted")
            }
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::PeeringUp(..) => {
                write!(f, "peering came up")
            }
            Debug::PeeringDown(..) => {
                write!(f, "peering went down")
            }
            Debug::PeeringDownComplete(..) => {
                write!(f, "peering teardown complete")
            }
            Debug::BestPathFound(..) => {
                write!(f, "best path found")
            }
            Debug::BestPathNotFound(..) => {
                write!(f, "best path not found")
            }
            Debug::NhtUpdate(..) => {
                write!(f, "nexthop tracking update")
            }
            Debug::DumpDone(..) => {
                write!(f, "table dump complete")
            }
        }
    }
}
