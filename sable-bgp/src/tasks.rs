//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use sable_utils::ip::IpAddrKind;
use sable_utils::protocol::Protocol;
use sable_utils::rib::{RibRequest, RibRouteKeyMsg, RibRouteMsg, RibSender, RpcError};
use sable_utils::task::{Task, TimeoutTask};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

use crate::af::AddressFamily;
use crate::rib_queue::RibQueueOp;
use crate::tasks::messages::input::{NhtMsg, RibOutQueueMsg};

// Delay before a failed RIB request is re-sent.
pub const RETRY_TIMEOUT: Duration = Duration::from_secs(1);

//
// BGP tasks diagram:
//
//                                  +--------------+
//              peer sessions  <->  |              |
//     nht response/retry (0/1x) -> |              |
// rib-out response/retry (0/1x) -> |   instance   |
//   background continuations   ->  |              |
//                                  +--------------+
//                          ibus (1x) | ^
//                                    V |
//                                  +--------------+
//                                  | ibus / RIB   |
//                                  +--------------+
//

// I/O handles of the next-hop resolver: the channel to the RIB service
// and the channel completions are reported back on.
#[derive(Clone, Debug)]
pub struct ResolverIo {
    pub rib: RibSender,
    pub nht_txp: UnboundedSender<NhtMsg>,
}

// I/O handles of the local-RIB egress queue.
#[derive(Clone, Debug)]
pub struct RibQueueIo {
    pub rib: RibSender,
    pub rib_out_txp: UnboundedSender<RibOutQueueMsg>,
    pub protocol: Protocol,
}

// BGP inter-task message types.
pub mod messages {
    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (child task -> main task).
    pub mod input {
        use ipnetwork::IpNetwork;
        use sable_utils::bgp::AfiSafi;
        use sable_utils::rib::{NexthopInterest, RpcError};
        use tokio::sync::mpsc::Sender;

        use crate::packet::attribute::Attrs;
        use crate::peer::{PeerId, PeerInfo, UpdateMsg};

        #[derive(Debug)]
        pub enum ProtocolMsg {
            Session(SessionMsg),
            Route(RouteMsg),
            OutputReady(OutputReadyMsg),
            Nht(NhtMsg),
            RibOut(RibOutQueueMsg),
            Background(BackgroundMsg),
        }

        // Peering lifecycle events from the per-peer session handlers.
        #[derive(Debug)]
        pub enum SessionMsg {
            Configure {
                asn: u32,
                router_id: std::net::Ipv4Addr,
                enabled: bool,
            },
            PeerUp {
                afi_safi: AfiSafi,
                name: String,
                info: PeerInfo,
                update_txp: Sender<UpdateMsg>,
            },
            PeerDown {
                afi_safi: AfiSafi,
                peer_id: PeerId,
            },
            PeerDelete {
                afi_safi: AfiSafi,
                peer_id: PeerId,
            },
        }

        // Route events from the per-peer decoders, plus local route
        // origination.
        #[derive(Debug)]
        pub enum RouteMsg {
            Update {
                afi_safi: AfiSafi,
                peer_id: PeerId,
                net: IpNetwork,
                // None withdraws the prefix.
                attrs: Option<Attrs>,
            },
            Push {
                afi_safi: AfiSafi,
                peer_id: PeerId,
            },
            Originate {
                afi_safi: AfiSafi,
                net: IpNetwork,
                attrs: Attrs,
            },
            Withdraw {
                afi_safi: AfiSafi,
                net: IpNetwork,
            },
        }

        // A peer's output channel drained below capacity.
        #[derive(Debug)]
        pub struct OutputReadyMsg {
            pub afi_safi: AfiSafi,
            pub peer_id: PeerId,
        }

        // Next-hop resolver RIB request completions.
        #[derive(Debug)]
        pub enum NhtMsg {
            RegisterResponse {
                afi_safi: AfiSafi,
                result: Result<NexthopInterest, RpcError>,
            },
            DeregisterResponse {
                afi_safi: AfiSafi,
                result: Result<(), RpcError>,
            },
            Retry {
                afi_safi: AfiSafi,
            },
        }

        // Local-RIB egress queue completions.
        #[derive(Debug)]
        pub enum RibOutQueueMsg {
            Response {
                afi_safi: AfiSafi,
                result: Result<(), RpcError>,
            },
            Retry {
                afi_safi: AfiSafi,
            },
        }

        // Work continued across event-loop turns.
        #[derive(Debug)]
        pub enum BackgroundMsg {
            RibInDeletion {
                afi_safi: AfiSafi,
                peer_id: PeerId,
            },
            DumpContinue {
                afi_safi: AfiSafi,
                peer_id: PeerId,
            },
        }
    }
}

// ===== BGP tasks =====

// Register interest in a next hop with the RIB, forwarding the response
// to the instance.
pub(crate) fn nht_register_interest<A>(
    io: &ResolverIo,
    nexthop: A::IpAddr,
) -> Task<()>
where
    A: AddressFamily,
{
    let (responder, response) = oneshot::channel();
    let _ = io.rib.send(RibRequest::RegisterInterest {
        af: A::IpAddr::address_family(),
        nexthop: nexthop.into(),
        responder,
    });

    let nht_txp = io.nht_txp.clone();
    Task::spawn(async move {
        let result = response.await.unwrap_or(Err(RpcError::NoFinder));
        let _ = nht_txp.send(NhtMsg::RegisterResponse {
            afi_safi: A::AFI_SAFI,
            result,
        });
    })
}

// Deregister interest in a covering range with the RIB.
pub(crate) fn nht_deregister_interest<A>(
    io: &ResolverIo,
    base_addr: A::IpAddr,
    prefix_len: u8,
) -> Task<()>
where
    A: AddressFamily,
{
    let (responder, response) = oneshot::channel();
    let _ = io.rib.send(RibRequest::DeregisterInterest {
        af: A::IpAddr::address_family(),
        base_addr: base_addr.into(),
        prefix_len,
        responder,
    });

    let nht_txp = io.nht_txp.clone();
    Task::spawn(async move {
        let result = response.await.unwrap_or(Err(RpcError::NoFinder));
        let _ = nht_txp.send(NhtMsg::DeregisterResponse {
            afi_safi: A::AFI_SAFI,
            result,
        });
    })
}

// Schedule a resend of the resolver's head request.
pub(crate) fn nht_retry_timer<A>(io: &ResolverIo) -> TimeoutTask
where
    A: AddressFamily,
{
    let nht_txp = io.nht_txp.clone();
    TimeoutTask::new(RETRY_TIMEOUT, move || async move {
        let _ = nht_txp.send(NhtMsg::Retry {
            afi_safi: A::AFI_SAFI,
        });
    })
}

// Send one local-RIB egress request, forwarding the response to the
// instance.
pub(crate) fn rib_queue_request<A>(
    io: &RibQueueIo,
    op: &RibQueueOp<A>,
) -> Task<()>
where
    A: AddressFamily,
{
    let (responder, response) = oneshot::channel();
    let request = match op {
        RibQueueOp::AddIgpTable => RibRequest::AddIgpTable {
            protocol: io.protocol,
            af: A::IpAddr::address_family(),
            unicast: true,
            multicast: false,
            responder,
        },
        RibQueueOp::DeleteIgpTable => RibRequest::DeleteIgpTable {
            protocol: io.protocol,
            af: A::IpAddr::address_family(),
            unicast: true,
            multicast: false,
            responder,
        },
        RibQueueOp::Add { net, nexthop } => RibRequest::AddRoute {
            route: rib_route_msg::<A>(io, *net, *nexthop),
            responder,
        },
        RibQueueOp::Replace { net, nexthop } => RibRequest::ReplaceRoute {
            route: rib_route_msg::<A>(io, *net, *nexthop),
            responder,
        },
        RibQueueOp::Delete { net } => RibRequest::DeleteRoute {
            route: RibRouteKeyMsg {
                protocol: io.protocol,
                net: (*net).into(),
                unicast: true,
                multicast: false,
            },
            responder,
        },
    };
    let _ = io.rib.send(request);

    let rib_out_txp = io.rib_out_txp.clone();
    Task::spawn(async move {
        let result = response.await.unwrap_or(Err(RpcError::NoFinder));
        let _ = rib_out_txp.send(RibOutQueueMsg::Response {
            afi_safi: A::AFI_SAFI,
            result,
        });
    })
}

// Schedule a resend of the local-RIB queue's head request.
pub(crate) fn rib_queue_retry_timer<A>(io: &RibQueueIo) -> TimeoutTask
where
    A: AddressFamily,
{
    let rib_out_txp = io.rib_out_txp.clone();
    TimeoutTask::new(RETRY_TIMEOUT, move || async move {
        let _ = rib_out_txp.send(RibOutQueueMsg::Retry {
            afi_safi: A::AFI_SAFI,
        });
    })
}

// ===== helper functions =====

fn rib_route_msg<A>(
    io: &RibQueueIo,
    net: A::IpNetwork,
    nexthop: A::IpAddr,
) -> RibRouteMsg
where
    A: AddressFamily,
{
    RibRouteMsg {
        protocol: io.protocol,
        net: net.into(),
        nexthop: nexthop.into(),
        ifname: String::new(),
        vifname: String::new(),
        metric: 0,
        unicast: true,
        multicast: false,
        tags: Default::default(),
    }
}
