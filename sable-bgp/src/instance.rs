//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use sable_protocol::{
    InstanceChannelsTx, InstanceShared, MessageReceiver, ProtocolInstance,
};
use sable_utils::ibus::IbusMsg;
use sable_utils::protocol::Protocol;
use sable_utils::service::ServiceStatus;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver, UnboundedSender};

use crate::af::{Ipv4Unicast, Ipv6Unicast};
use crate::debug::Debug;
use crate::events;
use crate::nexthop::NextHopResolver;
use crate::peer::{LOCAL_PEER_ID, PeerInfo};
use crate::plumbing::Plumbing;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::messages::input::{
    BackgroundMsg, NhtMsg, OutputReadyMsg, ProtocolMsg, RibOutQueueMsg,
    RouteMsg, SessionMsg,
};
use crate::tasks::{ResolverIo, RibQueueIo};

#[derive(Debug)]
pub struct Instance {
    // Instance name.
    pub name: String,
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx<Instance>,
    // Shared data.
    pub shared: InstanceShared,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InstanceCfg {
    pub asn: u32,
    pub identifier: Option<Ipv4Addr>,
    pub enabled: bool,
}

#[derive(Debug)]
pub struct InstanceState {
    // Instance Router ID.
    pub router_id: Ipv4Addr,
    // Per-family pipelines.
    pub pipelines: Pipelines,
    // Per-family next-hop resolvers.
    pub resolvers: Resolvers,
    // Operational status.
    pub status: ServiceStatus,
}

#[derive(Debug)]
pub struct Pipelines {
    pub ipv4_unicast: Plumbing<Ipv4Unicast>,
    pub ipv6_unicast: Plumbing<Ipv6Unicast>,
}

#[derive(Debug)]
pub struct Resolvers {
    pub ipv4_unicast: NextHopResolver<Ipv4Unicast>,
    pub ipv6_unicast: NextHopResolver<Ipv6Unicast>,
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    // Peering lifecycle events.
    pub session: Sender<SessionMsg>,
    // Parsed route events.
    pub route: Sender<RouteMsg>,
    // Peer output drained notifications.
    pub output_ready: Sender<OutputReadyMsg>,
    // Next-hop tracking completions.
    pub nht: UnboundedSender<NhtMsg>,
    // Local-RIB egress queue completions.
    pub rib_out: UnboundedSender<RibOutQueueMsg>,
    // Background continuations.
    pub background: UnboundedSender<BackgroundMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub session: Receiver<SessionMsg>,
    pub route: Receiver<RouteMsg>,
    pub output_ready: Receiver<OutputReadyMsg>,
    pub nht: UnboundedReceiver<NhtMsg>,
    pub rib_out: UnboundedReceiver<RibOutQueueMsg>,
    pub background: UnboundedReceiver<BackgroundMsg>,
}

// ===== impl Instance =====

impl Instance {
    // Checks if the instance needs to be started or stopped in response
    // to a configuration change.
    pub(crate) fn update(&mut self) {
        match self.is_ready() {
            Some(router_id) if self.state.is_none() => {
                self.start(router_id);
            }
            None if self.state.is_some() => {
                self.stop();
            }
            _ => (),
        }
    }

    fn is_ready(&self) -> Option<Ipv4Addr> {
        if !self.config.enabled || self.config.asn == 0 {
            return None;
        }
        self.config.identifier
    }

    fn start(&mut self, router_id: Ipv4Addr) {
        Debug::InstanceStart.log();

        let state =
            InstanceState::new(router_id, &self.config, &self.tx, &self.shared);
        self.state = Some(state);
    }

    fn stop(&mut self) {
        Debug::InstanceStop.log();

        if let Some(mut state) = self.state.take() {
            state.status = ServiceStatus::ShuttingDown;
            // The deregistrations are fired before the queues are
            // dropped; failures at this point are logged by the RIB side
            // and don't block shutdown.
            state.pipelines.ipv4_unicast.unregister_rib_table();
            state.pipelines.ipv6_unicast.unregister_rib_table();
        }
    }

    // The operational status plus a human-readable reason.
    pub fn node_status(&self) -> (ServiceStatus, String) {
        match &self.state {
            None => (ServiceStatus::Disabled, "instance disabled".to_owned()),
            Some(state) => {
                let mut reasons = vec![];
                if let Err(reason) = state.pipelines.ipv4_unicast.status() {
                    reasons.push(format!("ipv4-unicast: {}", reason));
                }
                if let Err(reason) = state.pipelines.ipv6_unicast.status() {
                    reasons.push(format!("ipv6-unicast: {}", reason));
                }
                if state.resolvers.ipv4_unicast.failed() {
                    reasons.push("ipv4-unicast: resolver failed".to_owned());
                }
                if state.resolvers.ipv6_unicast.failed() {
                    reasons.push("ipv6-unicast: resolver failed".to_owned());
                }
                (state.status, reasons.join("; "))
            }
        }
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: Protocol = Protocol::Bgp;

    type ProtocolInputMsg = ProtocolInputMsg;
    type ProtocolInputChannelsTx = ProtocolInputChannelsTx;
    type ProtocolInputChannelsRx = ProtocolInputChannelsRx;

    fn new(
        name: String,
        shared: InstanceShared,
        tx: InstanceChannelsTx<Instance>,
    ) -> Instance {
        Debug::InstanceCreate.log();

        Instance {
            name,
            config: Default::default(),
            state: None,
            tx,
            shared,
        }
    }

    fn shutdown(mut self) {
        // Ensure instance is disabled before exiting.
        self.config.enabled = false;
        self.update();
        Debug::InstanceDelete.log();
    }

    fn process_ibus_msg(&mut self, msg: IbusMsg) {
        events::process_ibus_msg(self, msg);
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        if let Err(error) = events::process_protocol_msg(self, msg) {
            error.log();
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        let (sessionp, sessionc) = mpsc::channel(4);
        let (routep, routec) = mpsc::channel(16);
        let (output_readyp, output_readyc) = mpsc::channel(4);
        let (nhtp, nhtc) = mpsc::unbounded_channel();
        let (rib_outp, rib_outc) = mpsc::unbounded_channel();
        let (backgroundp, backgroundc) = mpsc::unbounded_channel();

        let tx = ProtocolInputChannelsTx {
            session: sessionp,
            route: routep,
            output_ready: output_readyp,
            nht: nhtp,
            rib_out: rib_outp,
            background: backgroundp,
        };
        let rx = ProtocolInputChannelsRx {
            session: sessionc,
            route: routec,
            output_ready: output_readyc,
            nht: nhtc,
            rib_out: rib_outc,
            background: backgroundc,
        };

        (tx, rx)
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    fn new(
        router_id: Ipv4Addr,
        config: &InstanceCfg,
        tx: &InstanceChannelsTx<Instance>,
        shared: &InstanceShared,
    ) -> InstanceState {
        let resolvers = Resolvers {
            ipv4_unicast: NextHopResolver::new(ResolverIo {
                rib: shared.rib.clone(),
                nht_txp: tx.protocol_input.nht.clone(),
            }),
            ipv6_unicast: NextHopResolver::new(ResolverIo {
                rib: shared.rib.clone(),
                nht_txp: tx.protocol_input.nht.clone(),
            }),
        };

        let rib_queue_io = RibQueueIo {
            rib: shared.rib.clone(),
            rib_out_txp: tx.protocol_input.rib_out.clone(),
            protocol: Protocol::Bgp,
        };
        let mut pipelines = Pipelines {
            ipv4_unicast: Plumbing::new(
                config.asn,
                local_peer_info(
                    router_id,
                    config.asn,
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                ),
                rib_queue_io.clone(),
            ),
            ipv6_unicast: Plumbing::new(
                config.asn,
                local_peer_info(
                    router_id,
                    config.asn,
                    IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                ),
                rib_queue_io,
            ),
        };

        // Register the origin tables with the RIB.
        pipelines.ipv4_unicast.register_rib_table();
        pipelines.ipv6_unicast.register_rib_table();

        InstanceState {
            router_id,
            pipelines,
            resolvers,
            status: ServiceStatus::Running,
        }
    }
}

// ===== impl ProtocolInputChannelsRx =====

impl MessageReceiver<ProtocolInputMsg> for ProtocolInputChannelsRx {
    async fn recv(&mut self) -> Option<ProtocolInputMsg> {
        tokio::select! {
            biased;
            msg = self.session.recv() => {
                msg.map(ProtocolMsg::Session)
            }
            msg = self.nht.recv() => {
                msg.map(ProtocolMsg::Nht)
            }
            msg = self.rib_out.recv() => {
                msg.map(ProtocolMsg::RibOut)
            }
            msg = self.output_ready.recv() => {
                msg.map(ProtocolMsg::OutputReady)
            }
            msg = self.route.recv() => {
                msg.map(ProtocolMsg::Route)
            }
            msg = self.background.recv() => {
                msg.map(ProtocolMsg::Background)
            }
        }
    }
}

// ===== helper functions =====

fn local_peer_info(
    router_id: Ipv4Addr,
    asn: u32,
    unspecified: IpAddr,
) -> PeerInfo {
    PeerInfo {
        peer_id: LOCAL_PEER_ID,
        router_id,
        neighbor_addr: unspecified,
        local_addr: unspecified,
        local_as: asn,
        remote_as: asn,
        ibgp: false,
    }
}
