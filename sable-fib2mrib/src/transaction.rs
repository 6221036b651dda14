//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

//! The transactional batch interface.
//!
//! A transaction collects route operations and applies them in one
//! bracketed pass; from the caller's perspective the batch is atomic.
//! Only the first operation-level error is reported back.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use ipnetwork::{Ipv4Network, Ipv6Network};
use sable_utils::ip::AddressFamily;
use sable_utils::southbound::{FteKeyMsg, FteMsg};
use sable_utils::task::TimeoutTask;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::debug::Debug;
use crate::error::Error;
use crate::node::Fib2mribNode;
use crate::route::Fib2mribRoute;
use crate::tasks::{self, messages::input::TransactionMsg};

// Limits on open transactions.
pub const MAX_PENDING_TRANSACTIONS: usize = 10;
pub const MAX_TRANSACTION_OPS: usize = 200;
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(5000);

// An operation that can occur within a transaction.
#[derive(Clone, Debug)]
pub enum TransactionOp {
    AddEntry4 {
        net: Ipv4Network,
        nexthop: Ipv4Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
    },
    AddEntry6 {
        net: Ipv6Network,
        nexthop: Ipv6Addr,
        ifname: String,
        vifname: String,
        metric: u32,
        admin_distance: u32,
    },
    DeleteEntry4 {
        net: Ipv4Network,
        ifname: String,
        vifname: String,
    },
    DeleteEntry6 {
        net: Ipv6Network,
        ifname: String,
        vifname: String,
    },
    DeleteAll4,
    DeleteAll6,
    DeleteAll,
}

#[derive(Debug)]
pub struct TransactionManager {
    next_tid: u32,
    pending: BTreeMap<u32, Transaction>,
    transaction_txp: UnboundedSender<TransactionMsg>,
}

#[derive(Debug)]
struct Transaction {
    ops: Vec<TransactionOp>,
    timeout: TimeoutTask,
}

// ===== impl TransactionManager =====

impl TransactionManager {
    pub fn new(
        transaction_txp: UnboundedSender<TransactionMsg>,
    ) -> TransactionManager {
        TransactionManager {
            next_tid: 0,
            pending: Default::default(),
            transaction_txp,
        }
    }

    pub fn start(&mut self) -> Result<u32, Error> {
        if self.pending.len() >= MAX_PENDING_TRANSACTIONS {
            return Err(Error::TransactionLimitReached);
        }
        self.next_tid = self.next_tid.wrapping_add(1);
        let tid = self.next_tid;
        let timeout = tasks::transaction_timeout(
            TRANSACTION_TIMEOUT,
            tid,
            &self.transaction_txp,
        );
        self.pending.insert(
            tid,
            Transaction {
                ops: vec![],
                timeout,
            },
        );
        Ok(tid)
    }

    pub fn add(&mut self, tid: u32, op: TransactionOp) -> Result<(), Error> {
        let transaction = self
            .pending
            .get_mut(&tid)
            .ok_or(Error::TransactionUnknown(tid))?;
        if transaction.ops.len() >= MAX_TRANSACTION_OPS {
            return Err(Error::TransactionTooBig(tid));
        }
        transaction.ops.push(op);
        // Activity keeps the transaction alive.
        transaction.timeout.reset(None);
        Ok(())
    }

    // Run the collected operations. Errors don't stop the batch; the
    // first one is reported.
    pub fn commit(
        &mut self,
        tid: u32,
        node: &mut Fib2mribNode,
    ) -> Result<(), Error> {
        let transaction = self
            .pending
            .remove(&tid)
            .ok_or(Error::TransactionUnknown(tid))?;
        Debug::TransactionCommit(tid, transaction.ops.len()).log();

        node.start_configuration();
        let mut first_error = None;
        for op in transaction.ops {
            if let Err(error) = apply_op(node, op)
                && first_error.is_none()
            {
                first_error = Some(error.to_string());
            }
        }
        node.end_configuration();

        match first_error {
            None => Ok(()),
            Some(reason) => Err(Error::TransactionFailed(reason)),
        }
    }

    pub fn abort(&mut self, tid: u32) -> Result<(), Error> {
        self.pending
            .remove(&tid)
            .map(|_| ())
            .ok_or(Error::TransactionUnknown(tid))
    }

    // Inactivity expiry fired for a transaction.
    pub fn expire(&mut self, tid: u32) {
        if self.pending.remove(&tid).is_some() {
            warn!(%tid, "transaction expired");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ===== helper functions =====

fn apply_op(node: &mut Fib2mribNode, op: TransactionOp) -> Result<(), Error> {
    match op {
        TransactionOp::AddEntry4 {
            net,
            nexthop,
            ifname,
            vifname,
            metric,
            admin_distance,
        } => {
            let mut route = Fib2mribRoute::from_fte(FteMsg {
                net: net.into(),
                nexthop: nexthop.into(),
                ifname,
                vifname,
                metric,
                admin_distance,
                protocol_origin: String::new(),
                self_installed: false,
            });
            route.set_add_route();
            node.add_route(route)
        }
        TransactionOp::AddEntry6 {
            net,
            nexthop,
            ifname,
            vifname,
            metric,
            admin_distance,
        } => {
            let mut route = Fib2mribRoute::from_fte(FteMsg {
                net: net.into(),
                nexthop: nexthop.into(),
                ifname,
                vifname,
                metric,
                admin_distance,
                protocol_origin: String::new(),
                self_installed: false,
            });
            route.set_add_route();
            node.add_route(route)
        }
        TransactionOp::DeleteEntry4 {
            net,
            ifname,
            vifname,
        } => {
            let mut route = Fib2mribRoute::from_fte_key(FteKeyMsg {
                net: net.into(),
                ifname,
                vifname,
            });
            route.set_delete_route();
            node.delete_route(route)
        }
        TransactionOp::DeleteEntry6 {
            net,
            ifname,
            vifname,
        } => {
            let mut route = Fib2mribRoute::from_fte_key(FteKeyMsg {
                net: net.into(),
                ifname,
                vifname,
            });
            route.set_delete_route();
            node.delete_route(route)
        }
        TransactionOp::DeleteAll4 => {
            node.delete_all(Some(AddressFamily::Ipv4));
            Ok(())
        }
        TransactionOp::DeleteAll6 => {
            node.delete_all(Some(AddressFamily::Ipv6));
            Ok(())
        }
        TransactionOp::DeleteAll => {
            node.delete_all(None);
            Ok(())
        }
    }
}
