//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

#![forbid(unsafe_code)]

use std::future::Future;

use derive_new::new;
use sable_utils::ibus::{IbusMsg, IbusReceiver};
use sable_utils::protocol::Protocol;
use sable_utils::rib::RibSender;
use sable_utils::task::Task;
use tracing::Instrument;

/// A trait for protocol instances.
pub trait ProtocolInstance
where
    Self: Send + Sized + 'static,
{
    /// Protocol type.
    const PROTOCOL: Protocol;

    type ProtocolInputMsg: Send + std::fmt::Debug;
    type ProtocolInputChannelsTx: Clone + Send + 'static;
    type ProtocolInputChannelsRx: MessageReceiver<Self::ProtocolInputMsg>
        + 'static;

    /// Create protocol instance.
    fn new(
        name: String,
        shared: InstanceShared,
        channels_tx: InstanceChannelsTx<Self>,
    ) -> Self;

    /// Optional protocol instance initialization routine.
    fn init(&mut self) {}

    /// Optional protocol instance shutdown routine.
    fn shutdown(self) {}

    /// Process ibus message.
    fn process_ibus_msg(&mut self, msg: IbusMsg);

    /// Process protocol message.
    fn process_protocol_msg(&mut self, msg: Self::ProtocolInputMsg);

    /// Create channels for all protocol input events.
    fn protocol_input_channels()
    -> (Self::ProtocolInputChannelsTx, Self::ProtocolInputChannelsRx);
}

/// Shared data among all protocol instances.
#[derive(Clone, Debug, new)]
pub struct InstanceShared {
    // Channel to the RIB service.
    pub rib: RibSender,
}

/// Instance output channels.
#[derive(Debug, new)]
pub struct InstanceChannelsTx<P: ProtocolInstance> {
    pub protocol_input: P::ProtocolInputChannelsTx,
}

pub trait MessageReceiver<T: Send>
where
    Self: Send,
{
    fn recv(&mut self) -> impl Future<Output = Option<T>> + Send;
}

// ===== helper functions =====

async fn event_loop<P>(
    instance: &mut P,
    mut ibus_rx: IbusReceiver,
    mut protocol_input_rx: P::ProtocolInputChannelsRx,
) where
    P: ProtocolInstance,
{
    // Main event loop. Every message is processed to completion before the
    // next one is received.
    loop {
        tokio::select! {
            msg = ibus_rx.recv() => {
                match msg {
                    Some(msg) => instance.process_ibus_msg(msg),
                    // Instance was disconnected from the bus.
                    None => return,
                }
            }
            msg = protocol_input_rx.recv() => {
                match msg {
                    Some(msg) => instance.process_protocol_msg(msg),
                    None => return,
                }
            }
        }
    }
}

async fn run<P>(
    name: String,
    ibus_rx: IbusReceiver,
    protocol_input_rx: P::ProtocolInputChannelsRx,
    channels_tx: InstanceChannelsTx<P>,
    shared: InstanceShared,
) where
    P: ProtocolInstance,
{
    // Create protocol instance.
    let mut instance = P::new(name, shared, channels_tx);
    instance.init();

    // Run event loop.
    event_loop(&mut instance, ibus_rx, protocol_input_rx).await;

    // Ensure instance is shut down before exiting.
    instance.shutdown();
}

// ===== global functions =====

/// Spawns a protocol instance as an asynchronous task.
///
/// The returned channel handle is the only way to inject protocol input
/// events from outside the instance.
pub fn spawn_protocol_task<P>(
    name: String,
    ibus_rx: IbusReceiver,
    shared: InstanceShared,
) -> (Task<()>, P::ProtocolInputChannelsTx)
where
    P: ProtocolInstance,
{
    let (proto_input_tx, proto_input_rx) = P::protocol_input_channels();
    let channels_tx = InstanceChannelsTx::new(proto_input_tx.clone());

    let span = tracing::debug_span!("instance", protocol = %P::PROTOCOL, %name);
    let task = Task::spawn(
        run::<P>(name, ibus_rx, proto_input_rx, channels_tx, shared)
            .instrument(span),
    );

    (task, proto_input_tx)
}
