//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use sable_utils::policy::PolicyTags;
use sable_utils::southbound::{FteKeyMsg, FteMsg};
use serde::{Deserialize, Serialize};

// A routing entry mirrored from the kernel FIB.
//
// Created on a FIB notification and held until the FIB deletes it or the
// redistributor shuts down. Several entries may exist for the same
// prefix when they differ in interface/vif (IPv6 link-local prefixes
// exist once per interface).
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Fib2mribRoute {
    pub net: IpNetwork,
    pub nexthop: IpAddr,
    pub ifname: String,
    pub vifname: String,
    pub metric: u32,
    pub admin_distance: u32,
    pub protocol_origin: String,
    pub self_installed: bool,
    route_type: RouteType,
    filtered: bool,
    accepted_by_nexthop: bool,
    pub policy_tags: PolicyTags,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
enum RouteType {
    Idle,
    Add,
    Replace,
    Delete,
}

// ===== impl Fib2mribRoute =====

impl Fib2mribRoute {
    pub fn from_fte(fte: FteMsg) -> Fib2mribRoute {
        Fib2mribRoute {
            net: fte.net,
            nexthop: fte.nexthop,
            ifname: fte.ifname,
            vifname: fte.vifname,
            metric: fte.metric,
            admin_distance: fte.admin_distance,
            protocol_origin: fte.protocol_origin,
            self_installed: fte.self_installed,
            route_type: RouteType::Idle,
            filtered: false,
            accepted_by_nexthop: false,
            policy_tags: Default::default(),
        }
    }

    pub fn from_fte_key(key: FteKeyMsg) -> Fib2mribRoute {
        let nexthop = match key.net {
            IpNetwork::V4(_) => {
                IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
            }
            IpNetwork::V6(_) => {
                IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
            }
        };
        Fib2mribRoute {
            net: key.net,
            nexthop,
            ifname: key.ifname,
            vifname: key.vifname,
            metric: 0,
            admin_distance: 0,
            protocol_origin: String::new(),
            self_installed: false,
            route_type: RouteType::Idle,
            filtered: false,
            accepted_by_nexthop: false,
            policy_tags: Default::default(),
        }
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self.net, IpNetwork::V4(_))
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.net, IpNetwork::V6(_))
    }

    // An entry is interface-specific when the observer named the
    // interface explicitly.
    pub fn is_interface_route(&self) -> bool {
        !(self.ifname.is_empty() && self.vifname.is_empty())
    }

    pub fn is_add_route(&self) -> bool {
        self.route_type == RouteType::Add
    }

    pub fn is_replace_route(&self) -> bool {
        self.route_type == RouteType::Replace
    }

    pub fn is_delete_route(&self) -> bool {
        self.route_type == RouteType::Delete
    }

    pub fn set_add_route(&mut self) {
        self.route_type = RouteType::Add;
    }

    pub fn set_replace_route(&mut self) {
        self.route_type = RouteType::Replace;
    }

    pub fn set_delete_route(&mut self) {
        self.route_type = RouteType::Delete;
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    pub fn set_filtered(&mut self, filtered: bool) {
        self.filtered = filtered;
    }

    pub fn is_accepted_by_nexthop(&self) -> bool {
        self.accepted_by_nexthop
    }

    pub fn set_accepted_by_nexthop(&mut self, accepted: bool) {
        self.accepted_by_nexthop = accepted;
    }

    // Whether this route is offered to the downstream RIB.
    pub fn is_accepted_by_rib(&self) -> bool {
        self.accepted_by_nexthop && !self.filtered
    }

    // Check whether the route entry is usable at all.
    pub fn validate(&self) -> Result<(), String> {
        match (&self.net, &self.nexthop) {
            (IpNetwork::V4(_), IpAddr::V4(_))
            | (IpNetwork::V6(_), IpAddr::V6(_)) => Ok(()),
            _ => Err("network and next hop address families differ"
                .to_owned()),
        }
    }
}

// Identity comparison used when cancelling pending RIB requests; the
// volatile acceptance bits don't participate.
impl PartialEq for Fib2mribRoute {
    fn eq(&self, other: &Fib2mribRoute) -> bool {
        self.net == other.net
            && self.nexthop == other.nexthop
            && self.ifname == other.ifname
            && self.vifname == other.vifname
            && self.metric == other.metric
            && self.route_type == other.route_type
            && self.policy_tags == other.policy_tags
    }
}
