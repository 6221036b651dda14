//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnetwork::{Ipv4Network, Ipv6Network};
use sable_utils::bgp::AfiSafi;
use sable_utils::ip::{IpAddrKind, IpNetworkKind};

use crate::instance::{Pipelines, Resolvers};
use crate::nexthop::NextHopResolver;
use crate::packet::attribute::BaseAttrs;
use crate::plumbing::Plumbing;

// BGP address-family specific code.
pub trait AddressFamily: Send + Sync + Sized + std::fmt::Debug + 'static {
    // Combined AFI and SAFI.
    const AFI_SAFI: AfiSafi;

    // The type of IP address used by this address family.
    type IpAddr: IpAddrKind;
    // The type of IP network used by this address family.
    type IpNetwork: IpNetworkKind<Self::IpAddr> + prefix_trie::Prefix;

    // Extract the next hop IP address from the route attributes.
    fn nexthop(attrs: &BaseAttrs) -> Self::IpAddr;

    // Get the pipeline for this address family.
    fn plumbing(pipelines: &mut Pipelines) -> &mut Plumbing<Self>;

    // Get the next-hop resolver for this address family.
    fn resolver(resolvers: &mut Resolvers) -> &mut NextHopResolver<Self>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Ipv4Unicast;

#[derive(Clone, Copy, Debug, Default)]
pub struct Ipv6Unicast;

// ===== impl Ipv4Unicast =====

impl AddressFamily for Ipv4Unicast {
    const AFI_SAFI: AfiSafi = AfiSafi::Ipv4Unicast;

    type IpAddr = Ipv4Addr;
    type IpNetwork = Ipv4Network;

    fn nexthop(attrs: &BaseAttrs) -> Ipv4Addr {
        Ipv4Addr::get(attrs.nexthop).unwrap()
    }

    fn plumbing(pipelines: &mut Pipelines) -> &mut Plumbing<Self> {
        &mut pipelines.ipv4_unicast
    }

    fn resolver(resolvers: &mut Resolvers) -> &mut NextHopResolver<Self> {
        &mut resolvers.ipv4_unicast
    }
}

// ===== impl Ipv6Unicast =====

impl AddressFamily for Ipv6Unicast {
    const AFI_SAFI: AfiSafi = AfiSafi::Ipv6Unicast;

    type IpAddr = Ipv6Addr;
    type IpNetwork = Ipv6Network;

    fn nexthop(attrs: &BaseAttrs) -> Ipv6Addr {
        Ipv6Addr::get(attrs.nexthop).unwrap()
    }

    fn plumbing(pipelines: &mut Pipelines) -> &mut Plumbing<Self> {
        &mut pipelines.ipv6_unicast
    }

    fn resolver(resolvers: &mut Resolvers) -> &mut NextHopResolver<Self> {
        &mut resolvers.ipv6_unicast
    }
}
