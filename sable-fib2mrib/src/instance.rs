//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use sable_protocol::{
    InstanceChannelsTx, InstanceShared, MessageReceiver, ProtocolInstance,
};
use sable_utils::ibus::IbusMsg;
use sable_utils::protocol::Protocol;
use sable_utils::service::ServiceStatus;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver, UnboundedSender};

use crate::events;
use crate::node::Fib2mribNode;
use crate::tasks::InformRibIo;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    CommandMsg, ProtocolMsg, RibResponseMsg, TransactionMsg,
};
use crate::transaction::TransactionManager;

#[derive(Debug)]
pub struct Instance {
    // Instance name.
    pub name: String,
    // The redistributor node.
    pub node: Fib2mribNode,
    // Open transactions.
    pub transactions: TransactionManager,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx<Instance>,
    // Shared data.
    pub shared: InstanceShared,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Inform-RIB queue completions.
    pub rib: UnboundedSender<RibResponseMsg>,
    // Transactional batch interface.
    pub transaction: UnboundedSender<TransactionMsg>,
    // Configuration commands.
    pub command: Sender<CommandMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub rib: UnboundedReceiver<RibResponseMsg>,
    pub transaction: UnboundedReceiver<TransactionMsg>,
    pub command: Receiver<CommandMsg>,
}

// ===== impl Instance =====

impl Instance {
    // The operational status plus a human-readable reason.
    pub fn node_status(&self) -> (ServiceStatus, String) {
        self.node.node_status()
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: Protocol = Protocol::Fib2mrib;

    type ProtocolInputMsg = ProtocolInputMsg;
    type ProtocolInputChannelsTx = ProtocolInputChannelsTx;
    type ProtocolInputChannelsRx = ProtocolInputChannelsRx;

    fn new(
        name: String,
        shared: InstanceShared,
        tx: InstanceChannelsTx<Instance>,
    ) -> Instance {
        let node = Fib2mribNode::new(InformRibIo {
            rib: shared.rib.clone(),
            response_txp: tx.protocol_input.rib.clone(),
        });
        let transactions =
            TransactionManager::new(tx.protocol_input.transaction.clone());

        Instance {
            name,
            node,
            transactions,
            tx,
            shared,
        }
    }

    fn init(&mut self) {
        self.node.startup();
    }

    fn shutdown(mut self) {
        self.node.shutdown();
    }

    fn process_ibus_msg(&mut self, msg: IbusMsg) {
        events::process_ibus_msg(self, msg);
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        events::process_protocol_msg(self, msg);
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (ribp, ribc) = mpsc::unbounded_channel();
        let (transactionp, transactionc) = mpsc::unbounded_channel();
        let (commandp, commandc) = mpsc::channel(4);

        let tx = ProtocolInputChannelsTx {
            rib: ribp,
            transaction: transactionp,
            command: commandp,
        };
        let rx = ProtocolInputChannelsRx {
            rib: ribc,
            transaction: transactionc,
            command: commandc,
        };

        (tx, rx)
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl MessageReceiver<ProtocolInputMsg> for ProtocolInputChannelsRx {
    async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.rib.recv() => {
                msg.map(ProtocolMsg::Rib)
            }
            msg = self.transaction.recv() => {
                msg.map(ProtocolMsg::Transaction)
            }
            msg = self.command.recv() => {
                msg.map(ProtocolMsg::Command)
            }
        }
    }
}
