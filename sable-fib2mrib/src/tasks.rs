//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use sable_utils::rib::{Responder, RibSender, RpcError};
use sable_utils::task::{Task, TimeoutTask};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::tasks::messages::input::{RibResponseMsg, TransactionMsg};

// Delay before a failed RIB request is re-sent.
pub const RETRY_TIMEOUT: Duration = Duration::from_secs(1);

// I/O handles of the inform-RIB queue.
#[derive(Clone, Debug)]
pub struct InformRibIo {
    pub rib: RibSender,
    pub response_txp: UnboundedSender<RibResponseMsg>,
}

// Fib2mrib inter-task message types.
pub mod messages {
    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use sable_utils::rib::RpcError;
        use tokio::sync::oneshot;

        use crate::error::Error;
        use crate::transaction::TransactionOp;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            Rib(RibResponseMsg),
            Transaction(TransactionMsg),
            Command(CommandMsg),
        }

        // Inform-RIB queue completions.
        #[derive(Debug)]
        pub enum RibResponseMsg {
            Response { result: Result<(), RpcError> },
            Retry,
        }

        // The transactional batch interface.
        #[derive(Debug)]
        pub enum TransactionMsg {
            Start {
                responder: oneshot::Sender<Result<u32, Error>>,
            },
            AddOperation {
                tid: u32,
                op: TransactionOp,
                responder: oneshot::Sender<Result<(), Error>>,
            },
            Commit {
                tid: u32,
                responder: oneshot::Sender<Result<(), Error>>,
            },
            Abort {
                tid: u32,
                responder: oneshot::Sender<Result<(), Error>>,
            },
            // A transaction went unused for too long.
            Expire {
                tid: u32,
            },
        }

        // Configuration surface.
        #[derive(Debug)]
        pub enum CommandMsg {
            Enable(bool),
            Start,
            Stop,
            LogTraceAll(bool),
        }
    }
}

// ===== Fib2mrib tasks =====

// Build the responder half for an inform-RIB request and the task that
// forwards its completion to the instance.
pub(crate) fn inform_rib_responder(
    io: &InformRibIo,
) -> (Responder<()>, Task<()>) {
    let (responder, response) = oneshot::channel();
    let response_txp = io.response_txp.clone();
    let task = Task::spawn(async move {
        let result = response.await.unwrap_or(Err(RpcError::NoFinder));
        let _ = response_txp.send(RibResponseMsg::Response { result });
    });
    (responder, task)
}

// Schedule a resend of the inform-RIB queue's head request.
pub(crate) fn inform_rib_retry_timer(io: &InformRibIo) -> TimeoutTask {
    let response_txp = io.response_txp.clone();
    TimeoutTask::new(RETRY_TIMEOUT, move || async move {
        let _ = response_txp.send(RibResponseMsg::Retry);
    })
}

// Expire an idle transaction.
pub(crate) fn transaction_timeout(
    timeout: Duration,
    tid: u32,
    transaction_txp: &UnboundedSender<TransactionMsg>,
) -> TimeoutTask {
    let transaction_txp = transaction_txp.clone();
    TimeoutTask::new(timeout, move || async move {
        let _ = transaction_txp.send(TransactionMsg::Expire { tid });
    })
}
