//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use sable_utils::bgp::AfiSafi;
use sable_utils::ibus::IbusMsg;
use sable_utils::ip::IpNetworkKind;
use sable_utils::rib::{NexthopInterest, RpcError};
use sable_utils::service::ServiceStatus;
use tokio::sync::mpsc::Sender;

use crate::af::{AddressFamily, Ipv4Unicast, Ipv6Unicast};
use crate::error::Error;
use crate::instance::{Instance, InstanceCfg, InstanceState};
use crate::packet::attribute::Attrs;
use crate::peer::{LOCAL_PEER_ID, PeerHandler, PeerId, PeerInfo, UpdateMsg};
use crate::tasks::messages::input::{
    BackgroundMsg, NhtMsg, ProtocolMsg, RibOutQueueMsg, RouteMsg, SessionMsg,
};

// ===== ibus message processing =====

pub(crate) fn process_ibus_msg(instance: &mut Instance, msg: IbusMsg) {
    match msg {
        IbusMsg::NexthopInvalid {
            addr,
            real_prefix_len,
        } => match addr {
            IpAddr::V4(addr) => process_nexthop_invalid::<Ipv4Unicast>(
                instance,
                addr,
                real_prefix_len,
            ),
            IpAddr::V6(addr) => process_nexthop_invalid::<Ipv6Unicast>(
                instance,
                addr,
                real_prefix_len,
            ),
        },
        IbusMsg::NexthopChange {
            addr,
            real_prefix_len,
            metric,
            ..
        } => match addr {
            IpAddr::V4(addr) => process_nexthop_change::<Ipv4Unicast>(
                instance,
                addr,
                real_prefix_len,
                metric,
            ),
            IpAddr::V6(addr) => process_nexthop_change::<Ipv6Unicast>(
                instance,
                addr,
                real_prefix_len,
                metric,
            ),
        },
        // Interface, FIB, and policy events belong to other subsystems.
        _ => (),
    }
}

fn process_nexthop_invalid<A>(
    instance: &mut Instance,
    addr: A::IpAddr,
    real_prefix_len: u8,
) where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return;
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    let plumbing = A::plumbing(pipelines);

    // Invalidation erases the covering entry and re-requests interest;
    // next hops satisfied from another cached entry may change answers
    // immediately.
    let changed = resolver.route_info_invalid(addr, real_prefix_len);
    for nexthop in changed {
        plumbing.igp_nexthop_changed(resolver, nexthop);
    }
}

fn process_nexthop_change<A>(
    instance: &mut Instance,
    addr: A::IpAddr,
    real_prefix_len: u8,
    metric: u32,
) where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return;
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    let plumbing = A::plumbing(pipelines);

    let changed = resolver.route_info_changed(addr, real_prefix_len, metric);
    for nexthop in changed {
        plumbing.igp_nexthop_changed(resolver, nexthop);
    }
}

// ===== protocol message processing =====

pub(crate) fn process_protocol_msg(
    instance: &mut Instance,
    msg: ProtocolMsg,
) -> Result<(), Error> {
    match msg {
        ProtocolMsg::Session(msg) => process_session_msg(instance, msg),
        ProtocolMsg::Route(msg) => process_route_msg(instance, msg),
        ProtocolMsg::OutputReady(msg) => match msg.afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_output_ready::<Ipv4Unicast>(instance, msg.peer_id)
            }
            AfiSafi::Ipv6Unicast => {
                process_output_ready::<Ipv6Unicast>(instance, msg.peer_id)
            }
        },
        ProtocolMsg::Nht(msg) => process_nht_msg(instance, msg),
        ProtocolMsg::RibOut(msg) => process_rib_out_msg(instance, msg),
        ProtocolMsg::Background(msg) => process_background_msg(instance, msg),
    }
}

fn process_session_msg(
    instance: &mut Instance,
    msg: SessionMsg,
) -> Result<(), Error> {
    match msg {
        SessionMsg::Configure {
            asn,
            router_id,
            enabled,
        } => {
            instance.config = InstanceCfg {
                asn,
                identifier: Some(router_id),
                enabled,
            };
            instance.update();
            Ok(())
        }
        SessionMsg::PeerUp {
            afi_safi,
            name,
            info,
            update_txp,
        } => match afi_safi {
            AfiSafi::Ipv4Unicast => process_peer_up::<Ipv4Unicast>(
                instance, name, info, update_txp,
            ),
            AfiSafi::Ipv6Unicast => process_peer_up::<Ipv6Unicast>(
                instance, name, info, update_txp,
            ),
        },
        SessionMsg::PeerDown { afi_safi, peer_id } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_peer_down::<Ipv4Unicast>(instance, peer_id)
            }
            AfiSafi::Ipv6Unicast => {
                process_peer_down::<Ipv6Unicast>(instance, peer_id)
            }
        },
        SessionMsg::PeerDelete { afi_safi, peer_id } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_peer_delete::<Ipv4Unicast>(instance, peer_id)
            }
            AfiSafi::Ipv6Unicast => {
                process_peer_delete::<Ipv6Unicast>(instance, peer_id)
            }
        },
    }
}

fn process_route_msg(
    instance: &mut Instance,
    msg: RouteMsg,
) -> Result<(), Error> {
    match msg {
        RouteMsg::Update {
            afi_safi,
            peer_id,
            net,
            attrs,
        } => match afi_safi {
            AfiSafi::Ipv4Unicast => process_route_update::<Ipv4Unicast>(
                instance, peer_id, net, attrs,
            ),
            AfiSafi::Ipv6Unicast => process_route_update::<Ipv6Unicast>(
                instance, peer_id, net, attrs,
            ),
        },
        RouteMsg::Push { afi_safi, peer_id } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_push::<Ipv4Unicast>(instance, peer_id)
            }
            AfiSafi::Ipv6Unicast => {
                process_push::<Ipv6Unicast>(instance, peer_id)
            }
        },
        RouteMsg::Originate {
            afi_safi,
            net,
            attrs,
        } => match afi_safi {
            AfiSafi::Ipv4Unicast => process_local_route::<Ipv4Unicast>(
                instance,
                net,
                Some(attrs),
            ),
            AfiSafi::Ipv6Unicast => process_local_route::<Ipv6Unicast>(
                instance,
                net,
                Some(attrs),
            ),
        },
        RouteMsg::Withdraw { afi_safi, net } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_local_route::<Ipv4Unicast>(instance, net, None)
            }
            AfiSafi::Ipv6Unicast => {
                process_local_route::<Ipv6Unicast>(instance, net, None)
            }
        },
    }
}

fn process_nht_msg(
    instance: &mut Instance,
    msg: NhtMsg,
) -> Result<(), Error> {
    match msg {
        NhtMsg::RegisterResponse { afi_safi, result } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_nht_register_response::<Ipv4Unicast>(instance, result)
            }
            AfiSafi::Ipv6Unicast => {
                process_nht_register_response::<Ipv6Unicast>(instance, result)
            }
        },
        NhtMsg::DeregisterResponse { afi_safi, result } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_nht_deregister_response::<Ipv4Unicast>(
                    instance, result,
                )
            }
            AfiSafi::Ipv6Unicast => {
                process_nht_deregister_response::<Ipv6Unicast>(
                    instance, result,
                )
            }
        },
        NhtMsg::Retry { afi_safi } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_nht_retry::<Ipv4Unicast>(instance)
            }
            AfiSafi::Ipv6Unicast => {
                process_nht_retry::<Ipv6Unicast>(instance)
            }
        },
    }
}

fn process_rib_out_msg(
    instance: &mut Instance,
    msg: RibOutQueueMsg,
) -> Result<(), Error> {
    match msg {
        RibOutQueueMsg::Response { afi_safi, result } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_rib_out_response::<Ipv4Unicast>(instance, result)
            }
            AfiSafi::Ipv6Unicast => {
                process_rib_out_response::<Ipv6Unicast>(instance, result)
            }
        },
        RibOutQueueMsg::Retry { afi_safi } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_rib_out_retry::<Ipv4Unicast>(instance)
            }
            AfiSafi::Ipv6Unicast => {
                process_rib_out_retry::<Ipv6Unicast>(instance)
            }
        },
    }
}

fn process_background_msg(
    instance: &mut Instance,
    msg: BackgroundMsg,
) -> Result<(), Error> {
    match msg {
        BackgroundMsg::RibInDeletion { afi_safi, peer_id } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_ribin_deletion::<Ipv4Unicast>(instance, peer_id)
            }
            AfiSafi::Ipv6Unicast => {
                process_ribin_deletion::<Ipv6Unicast>(instance, peer_id)
            }
        },
        BackgroundMsg::DumpContinue { afi_safi, peer_id } => match afi_safi {
            AfiSafi::Ipv4Unicast => {
                process_dump_continue::<Ipv4Unicast>(instance, peer_id)
            }
            AfiSafi::Ipv6Unicast => {
                process_dump_continue::<Ipv6Unicast>(instance, peer_id)
            }
        },
    }
}

// ===== peering events =====

fn process_peer_up<A>(
    instance: &mut Instance,
    name: String,
    info: PeerInfo,
    update_txp: Sender<UpdateMsg>,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let plumbing = A::plumbing(&mut state.pipelines);

    let handler = PeerHandler::new(name, info, update_txp);
    if plumbing.peer(info.peer_id).is_some() {
        // A session restart reuses the existing chains; the new session
        // gets a new update sink.
        plumbing.update_peer_handler(info.peer_id, handler)?;
    } else {
        plumbing.add_peering(handler)?;
    }
    plumbing.peering_came_up(info.peer_id)?;

    // Pump the table dump toward the new peer.
    let _ = instance.tx.protocol_input.background.send(
        BackgroundMsg::DumpContinue {
            afi_safi: A::AFI_SAFI,
            peer_id: info.peer_id,
        },
    );
    Ok(())
}

fn process_peer_down<A>(
    instance: &mut Instance,
    peer_id: PeerId,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let plumbing = A::plumbing(&mut state.pipelines);
    plumbing.peering_went_down(peer_id)?;

    // Pump the background teardown of the peer's routes.
    let _ = instance.tx.protocol_input.background.send(
        BackgroundMsg::RibInDeletion {
            afi_safi: A::AFI_SAFI,
            peer_id,
        },
    );
    Ok(())
}

fn process_peer_delete<A>(
    instance: &mut Instance,
    peer_id: PeerId,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let plumbing = A::plumbing(&mut state.pipelines);
    plumbing.delete_peering(peer_id)
}

// ===== route events =====

fn process_route_update<A>(
    instance: &mut Instance,
    peer_id: PeerId,
    net: IpNetwork,
    attrs: Option<Attrs>,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    let plumbing = A::plumbing(pipelines);

    let net =
        A::IpNetwork::get(net).ok_or(Error::AfMismatch(A::AFI_SAFI))?;
    plumbing.route_update(resolver, peer_id, net, attrs)?;
    Ok(())
}

fn process_push<A>(
    instance: &mut Instance,
    peer_id: PeerId,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    A::plumbing(pipelines).push(resolver, peer_id)
}

fn process_local_route<A>(
    instance: &mut Instance,
    net: IpNetwork,
    attrs: Option<Attrs>,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    let plumbing = A::plumbing(pipelines);

    let net =
        A::IpNetwork::get(net).ok_or(Error::AfMismatch(A::AFI_SAFI))?;
    plumbing.route_update(resolver, LOCAL_PEER_ID, net, attrs)?;
    plumbing.push(resolver, LOCAL_PEER_ID)
}

fn process_output_ready<A>(
    instance: &mut Instance,
    peer_id: PeerId,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    A::plumbing(pipelines).output_ready(resolver, peer_id)
}

// ===== next-hop tracking events =====

fn process_nht_register_response<A>(
    instance: &mut Instance,
    result: Result<NexthopInterest, RpcError>,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let InstanceState {
        pipelines,
        resolvers,
        status,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    let plumbing = A::plumbing(pipelines);

    let outcome = resolver.register_interest_response(result);
    if outcome.fatal {
        *status = ServiceStatus::Failed;
        return Ok(());
    }
    for done in outcome.done {
        plumbing.rib_lookup_done(
            resolver,
            done.requester,
            done.nexthop,
            &done.nets,
        )?;
    }
    for nexthop in outcome.changed {
        plumbing.igp_nexthop_changed(resolver, nexthop);
    }
    Ok(())
}

fn process_nht_deregister_response<A>(
    instance: &mut Instance,
    result: Result<(), RpcError>,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let fatal = A::resolver(&mut state.resolvers)
        .deregister_interest_response(result);
    if fatal {
        state.status = ServiceStatus::Failed;
    }
    Ok(())
}

fn process_nht_retry<A>(instance: &mut Instance) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    A::resolver(&mut state.resolvers).retry();
    Ok(())
}

// ===== local-RIB egress queue events =====

fn process_rib_out_response<A>(
    instance: &mut Instance,
    result: Result<(), RpcError>,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let plumbing = A::plumbing(&mut state.pipelines);
    plumbing.rib_queue_response(result);
    if plumbing.rib_queue_failed() {
        state.status = ServiceStatus::Failed;
    }
    Ok(())
}

fn process_rib_out_retry<A>(instance: &mut Instance) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    A::plumbing(&mut state.pipelines).rib_queue_retry();
    Ok(())
}

// ===== background continuations =====

fn process_ribin_deletion<A>(
    instance: &mut Instance,
    peer_id: PeerId,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    let more =
        A::plumbing(pipelines).deletion_continue(resolver, peer_id)?;
    if more {
        let _ = instance.tx.protocol_input.background.send(
            BackgroundMsg::RibInDeletion {
                afi_safi: A::AFI_SAFI,
                peer_id,
            },
        );
    }
    Ok(())
}

fn process_dump_continue<A>(
    instance: &mut Instance,
    peer_id: PeerId,
) -> Result<(), Error>
where
    A: AddressFamily,
{
    let Some(state) = &mut instance.state else {
        return Ok(());
    };
    let InstanceState {
        pipelines,
        resolvers,
        ..
    } = state;
    let resolver = A::resolver(resolvers);
    let more = A::plumbing(pipelines).dump_continue(resolver, peer_id);
    if more {
        let _ = instance.tx.protocol_input.background.send(
            BackgroundMsg::DumpContinue {
                afi_safi: A::AFI_SAFI,
                peer_id,
            },
        );
    }
    Ok(())
}
