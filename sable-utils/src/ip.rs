//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::{IpNetwork, IpNetworkError, Ipv4Network, Ipv6Network};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// Address Family identifier.
//
// IANA registry:
// http://www.iana.org/assignments/address-family-numbers
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4 = 1,
    Ipv6 = 2,
}

// Extension methods for IpAddr.
pub trait IpAddrExt {
    // Converts this IP address into a host prefix network.
    fn to_host_prefix(&self) -> IpNetwork;

    // Returns an unspecified address of the given address family.
    fn unspecified(af: AddressFamily) -> IpAddr;
}

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    // Converts this IPv4 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv4Network;
}

// Extension methods for Ipv6Addr.
pub trait Ipv6AddrExt {
    // Converts this IPv6 address into a host prefix network.
    fn to_host_prefix(&self) -> Ipv6Network;
}

pub trait IpAddrKind:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpAddr>
    + 'static
{
    fn address_family() -> AddressFamily;

    fn get(addr: IpAddr) -> Option<Self>;

    fn unspecified() -> Self;

    fn is_unspecified(&self) -> bool;
}

pub trait IpNetworkKind<I: IpAddrKind>:
    std::fmt::Debug
    + std::fmt::Display
    + Clone
    + Copy
    + Eq
    + std::hash::Hash
    + Ord
    + PartialEq
    + PartialOrd
    + Send
    + Sync
    + DeserializeOwned
    + Serialize
    + Into<IpNetwork>
    + 'static
{
    const MAX_PREFIXLEN: u8;

    fn new(addr: I, prefix: u8) -> Result<Self, IpNetworkError>;

    // The host prefix covering exactly this address.
    fn host_prefix(addr: I) -> Self {
        Self::new(addr, Self::MAX_PREFIXLEN).unwrap()
    }

    fn get(prefix: IpNetwork) -> Option<Self>;

    fn contains(&self, ip: I) -> bool;

    fn ip(&self) -> I;

    fn prefix(&self) -> u8;

    // Zero out the host bits below the prefix length.
    #[must_use]
    fn apply_mask(&self) -> Self;
}

// ===== impl AddressFamily =====

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "IPv4"),
            AddressFamily::Ipv6 => write!(f, "IPv6"),
        }
    }
}

// ===== impl IpAddr =====

impl IpAddrExt for IpAddr {
    fn to_host_prefix(&self) -> IpNetwork {
        match self {
            IpAddr::V4(addr) => IpNetwork::V4(addr.to_host_prefix()),
            IpAddr::V6(addr) => IpNetwork::V6(addr.to_host_prefix()),
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, 32).unwrap()
    }
}

impl IpAddrKind for Ipv4Addr {
    fn address_family() -> AddressFamily {
        AddressFamily::Ipv4
    }

    fn get(addr: IpAddr) -> Option<Ipv4Addr> {
        match addr {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        }
    }

    fn unspecified() -> Ipv4Addr {
        Ipv4Addr::UNSPECIFIED
    }

    fn is_unspecified(&self) -> bool {
        Ipv4Addr::is_unspecified(self)
    }
}

// ===== impl Ipv6Addr =====

impl Ipv6AddrExt for Ipv6Addr {
    fn to_host_prefix(&self) -> Ipv6Network {
        Ipv6Network::new(*self, 128).unwrap()
    }
}

impl IpAddrKind for Ipv6Addr {
    fn address_family() -> AddressFamily {
        AddressFamily::Ipv6
    }

    fn get(addr: IpAddr) -> Option<Ipv6Addr> {
        match addr {
            IpAddr::V4(_) => None,
            IpAddr::V6(addr) => Some(addr),
        }
    }

    fn unspecified() -> Ipv6Addr {
        Ipv6Addr::UNSPECIFIED
    }

    fn is_unspecified(&self) -> bool {
        Ipv6Addr::is_unspecified(self)
    }
}

// ===== impl Ipv4Network =====

impl IpNetworkKind<Ipv4Addr> for Ipv4Network {
    const MAX_PREFIXLEN: u8 = 32;

    fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv4Network::new(addr, prefix)
    }

    fn get(prefix: IpNetwork) -> Option<Ipv4Network> {
        match prefix {
            IpNetwork::V4(prefix) => Some(prefix),
            IpNetwork::V6(_) => None,
        }
    }

    fn contains(&self, ip: Ipv4Addr) -> bool {
        Ipv4Network::contains(*self, ip)
    }

    fn ip(&self) -> Ipv4Addr {
        Ipv4Network::ip(*self)
    }

    fn prefix(&self) -> u8 {
        Ipv4Network::prefix(*self)
    }

    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), Ipv4Network::prefix(*self)).unwrap()
    }
}

// ===== impl Ipv6Network =====

impl IpNetworkKind<Ipv6Addr> for Ipv6Network {
    const MAX_PREFIXLEN: u8 = 128;

    fn new(addr: Ipv6Addr, prefix: u8) -> Result<Self, IpNetworkError> {
        Ipv6Network::new(addr, prefix)
    }

    fn get(prefix: IpNetwork) -> Option<Ipv6Network> {
        match prefix {
            IpNetwork::V4(_) => None,
            IpNetwork::V6(prefix) => Some(prefix),
        }
    }

    fn contains(&self, ip: Ipv6Addr) -> bool {
        Ipv6Network::contains(self, ip)
    }

    fn ip(&self) -> Ipv6Addr {
        Ipv6Network::ip(self)
    }

    fn prefix(&self) -> u8 {
        Ipv6Network::prefix(self)
    }

    fn apply_mask(&self) -> Ipv6Network {
        Ipv6Network::new(self.network(), Ipv6Network::prefix(self)).unwrap()
    }
}
