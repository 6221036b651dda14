//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

// Mirror of the interface manager's tree: interfaces, their vifs, and the
// addresses configured on each vif. Subsystems receive complete snapshots
// and diff them against their local copy.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfTree {
    pub interfaces: BTreeMap<String, IfAtom>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfAtom {
    pub name: String,
    pub enabled: bool,
    pub no_carrier: bool,
    pub vifs: BTreeMap<String, VifAtom>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VifAtom {
    pub name: String,
    pub enabled: bool,
    pub ipv4_addrs: BTreeMap<Ipv4Addr, IfAddr<Ipv4Addr>>,
    pub ipv6_addrs: BTreeMap<Ipv6Addr, IfAddr<Ipv6Addr>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IfAddr<A> {
    pub addr: A,
    pub prefix_len: u8,
}

// A forwarding table entry as reported by the kernel-FIB observer.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FteMsg {
    pub net: IpNetwork,
    pub nexthop: IpAddr,
    pub ifname: String,
    pub vifname: String,
    pub metric: u32,
    pub admin_distance: u32,
    pub protocol_origin: String,
    pub self_installed: bool,
}

// Key identifying an entry removed from the kernel FIB.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct FteKeyMsg {
    pub net: IpNetwork,
    pub ifname: String,
    pub vifname: String,
}

// ===== impl IfTree =====

impl IfTree {
    pub fn find_interface(&self, ifname: &str) -> Option<&IfAtom> {
        self.interfaces.get(ifname)
    }

    pub fn find_vif(&self, ifname: &str, vifname: &str) -> Option<&VifAtom> {
        self.interfaces
            .get(ifname)
            .and_then(|iface| iface.vifs.get(vifname))
    }

    // Checks whether the address is configured on one of our enabled vifs.
    pub fn is_my_addr(&self, addr: IpAddr) -> Option<(String, String)> {
        self.enabled_vifs().find_map(|(iface, vif)| {
            let found = match addr {
                IpAddr::V4(addr) => vif.ipv4_addrs.contains_key(&addr),
                IpAddr::V6(addr) => vif.ipv6_addrs.contains_key(&addr),
            };
            found.then(|| (iface.name.clone(), vif.name.clone()))
        })
    }

    // Checks whether the address falls within a subnet that is directly
    // connected through one of our enabled vifs.
    pub fn is_directly_connected(
        &self,
        addr: IpAddr,
    ) -> Option<(String, String)> {
        self.enabled_vifs().find_map(|(iface, vif)| {
            let found = match addr {
                IpAddr::V4(addr) => vif
                    .ipv4_addrs
                    .values()
                    .filter_map(|a| a.to_network())
                    .any(|net| net.contains(addr)),
                IpAddr::V6(addr) => vif
                    .ipv6_addrs
                    .values()
                    .filter_map(|a| a.to_network())
                    .any(|net| net.contains(addr)),
            };
            found.then(|| (iface.name.clone(), vif.name.clone()))
        })
    }

    // Whether the named vif exists, is enabled, and its interface is
    // enabled and has carrier.
    pub fn is_vif_up(&self, ifname: &str, vifname: &str) -> bool {
        let Some(iface) = self.find_interface(ifname) else {
            return false;
        };
        let Some(vif) = iface.vifs.get(vifname) else {
            return false;
        };
        iface.enabled && !iface.no_carrier && vif.enabled
    }

    fn enabled_vifs(&self) -> impl Iterator<Item = (&IfAtom, &VifAtom)> {
        self.interfaces
            .values()
            .filter(|iface| iface.enabled && !iface.no_carrier)
            .flat_map(|iface| {
                iface
                    .vifs
                    .values()
                    .filter(|vif| vif.enabled)
                    .map(move |vif| (iface, vif))
            })
    }
}

// ===== impl IfAddr =====

impl IfAddr<Ipv4Addr> {
    pub fn to_network(&self) -> Option<Ipv4Network> {
        Ipv4Network::new(self.addr, self.prefix_len).ok()
    }
}

impl IfAddr<Ipv6Addr> {
    pub fn to_network(&self) -> Option<Ipv6Network> {
        Ipv6Network::new(self.addr, self.prefix_len).ok()
    }
}

// ===== impl FteMsg =====

impl FteMsg {
    // An entry is interface-specific when the observer named the interface
    // explicitly.
    pub fn is_interface_route(&self) -> bool {
        !(self.ifname.is_empty() && self.vifname.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use const_addrs::ip4;

    use super::*;

    fn tree(enabled: bool, no_carrier: bool) -> IfTree {
        let mut ipv4_addrs = BTreeMap::new();
        ipv4_addrs.insert(
            ip4!("192.0.2.1"),
            IfAddr {
                addr: ip4!("192.0.2.1"),
                prefix_len: 24,
            },
        );
        let vif = VifAtom {
            name: "vif0".to_owned(),
            enabled: true,
            ipv4_addrs,
            ipv6_addrs: BTreeMap::new(),
        };
        let mut vifs = BTreeMap::new();
        vifs.insert("vif0".to_owned(), vif);
        let iface = IfAtom {
            name: "eth0".to_owned(),
            enabled,
            no_carrier,
            vifs,
        };
        let mut interfaces = BTreeMap::new();
        interfaces.insert("eth0".to_owned(), iface);
        IfTree { interfaces }
    }

    #[test]
    fn my_addr_lookup() {
        let tree = tree(true, false);
        assert_eq!(
            tree.is_my_addr(IpAddr::V4(ip4!("192.0.2.1"))),
            Some(("eth0".to_owned(), "vif0".to_owned()))
        );
        assert_eq!(tree.is_my_addr(IpAddr::V4(ip4!("192.0.2.2"))), None);
    }

    #[test]
    fn directly_connected_lookup() {
        let tree = tree(true, false);
        assert_eq!(
            tree.is_directly_connected(IpAddr::V4(ip4!("192.0.2.99"))),
            Some(("eth0".to_owned(), "vif0".to_owned()))
        );
        assert_eq!(
            tree.is_directly_connected(IpAddr::V4(ip4!("198.51.100.1"))),
            None
        );
    }

    #[test]
    fn down_interfaces_dont_match() {
        let disabled = tree(false, false);
        assert!(
            disabled
                .is_directly_connected(IpAddr::V4(ip4!("192.0.2.99")))
                .is_none()
        );
        assert!(!disabled.is_vif_up("eth0", "vif0"));

        let no_carrier = tree(true, true);
        assert!(
            no_carrier
                .is_my_addr(IpAddr::V4(ip4!("192.0.2.1")))
                .is_none()
        );
        assert!(!no_carrier.is_vif_up("eth0", "vif0"));
    }
}
