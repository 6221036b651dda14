//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use sable_utils::policy::PolicyFilterId;
use tracing::debug;

// FIB-to-MRIB debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    NodeStart,
    NodeStop,
    TreeComplete,
    RouteAdd(&'a IpNetwork),
    RouteReplace(&'a IpNetwork),
    RouteDelete(&'a IpNetwork),
    FilterConfigure(PolicyFilterId),
    FilterReset(PolicyFilterId),
    PushRoutes,
    TransactionCommit(u32, usize),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::NodeStart
            | Debug::NodeStop
            | Debug::TreeComplete
            | Debug::PushRoutes => {
                // Parent span(s): instance
                debug!("{}", self);
            }
            Debug::RouteAdd(net)
            | Debug::RouteReplace(net)
            | Debug::RouteDelete(net) => {
                // Parent span(s): instance
                debug!(%net, "{}", self);
            }
            Debug::FilterConfigure(filter_id)
            | Debug::FilterReset(filter_id) => {
                // Parent span(s): instance
                debug!(?filter_id, "{}", self);
            }
            Debug::TransactionCommit(tid, n_ops) => {
                // Parent span(s): instance
                debug!(%tid, %n_ops, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::NodeStart => {
                write!(f, "starting node")
            }
            Debug::NodeStop => {
                write!(f, "stopping node")
            }
            Debug::TreeComplete => {
                write!(f, "interface tree complete")
            }
            Debug::RouteAdd(..) => {
                write!(f, "route add")
            }
            Debug::RouteReplace(..) => {
                write!(f, "route replace")
            }
            Debug::RouteDelete(..) => {
                write!(f, "route delete")
            }
            Debug::FilterConfigure(..) => {
                write!(f, "configuring policy filter")
            }
            Debug::FilterReset(..) => {
                write!(f, "resetting policy filter")
            }
            Debug::PushRoutes => {
                write!(f, "re-filtering all routes")
            }
            Debug::TransactionCommit(..) => {
                write!(f, "committing transaction")
            }
        }
    }
}
