//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use sable_utils::ibus::IbusMsg;
use tracing::debug;

use crate::instance::Instance;
use crate::route::Fib2mribRoute;
use crate::tasks::messages::input::{
    CommandMsg, ProtocolMsg, RibResponseMsg, TransactionMsg,
};

// ===== ibus message processing =====

pub(crate) fn process_ibus_msg(instance: &mut Instance, msg: IbusMsg) {
    match msg {
        IbusMsg::IfTreeUpd(tree) => {
            instance.node.tree_update(&tree);
        }
        IbusMsg::FibRouteAdd(fte) => {
            let mut route = Fib2mribRoute::from_fte(fte);
            route.set_add_route();
            if let Err(error) = instance.node.add_route(route) {
                error.log();
            }
        }
        IbusMsg::FibRouteReplace(fte) => {
            let mut route = Fib2mribRoute::from_fte(fte);
            route.set_replace_route();
            if let Err(error) = instance.node.replace_route(route) {
                error.log();
            }
        }
        IbusMsg::FibRouteDel(key) => {
            let mut route = Fib2mribRoute::from_fte_key(key);
            route.set_delete_route();
            if let Err(error) = instance.node.delete_route(route) {
                error.log();
            }
        }
        IbusMsg::FibRouteResolve(key) => {
            // The observer is push-only; resolution requests carry no
            // state we track.
            if instance.node.is_log_trace() {
                debug!(net = %key.net, "resolve request ignored");
            }
        }
        IbusMsg::PolicyConfigure { filter_id, program } => {
            if let Err(error) =
                instance.node.configure_filter(filter_id, program)
            {
                error.log();
            }
        }
        IbusMsg::PolicyReset { filter_id } => {
            instance.node.reset_filter(filter_id);
        }
        IbusMsg::PolicyPushRoutes => {
            instance.node.push_routes();
        }
        // Nexthop tracking belongs to the routing protocols.
        _ => (),
    }
}

// ===== protocol message processing =====

pub(crate) fn process_protocol_msg(instance: &mut Instance, msg: ProtocolMsg) {
    match msg {
        ProtocolMsg::Rib(msg) => match msg {
            RibResponseMsg::Response { result } => {
                instance.node.rib_response(result);
            }
            RibResponseMsg::Retry => {
                instance.node.rib_retry();
            }
        },
        ProtocolMsg::Transaction(msg) => {
            process_transaction_msg(instance, msg);
        }
        ProtocolMsg::Command(msg) => match msg {
            CommandMsg::Enable(enable) => {
                instance.node.set_enabled(enable);
            }
            CommandMsg::Start => {
                instance.node.startup();
            }
            CommandMsg::Stop => {
                instance.node.shutdown();
            }
            CommandMsg::LogTraceAll(enable) => {
                instance.node.set_log_trace(enable);
            }
        },
    }
}

fn process_transaction_msg(instance: &mut Instance, msg: TransactionMsg) {
    match msg {
        TransactionMsg::Start { responder } => {
            let _ = responder.send(instance.transactions.start());
        }
        TransactionMsg::AddOperation { tid, op, responder } => {
            let _ = responder.send(instance.transactions.add(tid, op));
        }
        TransactionMsg::Commit { tid, responder } => {
            let result =
                instance.transactions.commit(tid, &mut instance.node);
            let _ = responder.send(result);
        }
        TransactionMsg::Abort { tid, responder } => {
            let _ = responder.send(instance.transactions.abort(tid));
        }
        TransactionMsg::Expire { tid } => {
            instance.transactions.expire(tid);
        }
    }
}
