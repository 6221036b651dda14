//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::policy::{PolicyFilterId, PolicyProgram};
use crate::southbound::{FteKeyMsg, FteMsg, IfTree};

// Useful type definition(s).
pub type IbusReceiver = UnboundedReceiver<IbusMsg>;
pub type IbusSender = UnboundedSender<IbusMsg>;

// Notifications delivered to protocol instances by their collaborators:
// the interface manager, the kernel-FIB observer, the RIB's nexthop
// tracking, and the policy manager.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum IbusMsg {
    // Complete snapshot of the interface tree. The first snapshot marks
    // the tree as complete; later ones are diffed against the local copy.
    IfTreeUpd(Arc<IfTree>),
    // Kernel FIB change notifications.
    FibRouteAdd(FteMsg),
    FibRouteReplace(FteMsg),
    FibRouteDel(FteKeyMsg),
    FibRouteResolve(FteKeyMsg),
    // The RIB reports that registrations covered by this entry are no
    // longer valid.
    NexthopInvalid { addr: IpAddr, real_prefix_len: u8 },
    // The RIB reports a metric change for a covering entry.
    NexthopChange {
        addr: IpAddr,
        real_prefix_len: u8,
        nexthop: IpAddr,
        metric: u32,
    },
    // Policy manager events.
    PolicyConfigure {
        filter_id: PolicyFilterId,
        program: PolicyProgram,
    },
    PolicyReset { filter_id: PolicyFilterId },
    PolicyPushRoutes,
}
