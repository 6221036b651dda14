//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::ip::AddressFamily;
use crate::policy::PolicyTags;
use crate::protocol::Protocol;

// Useful type definition(s).
pub type RibSender = mpsc::UnboundedSender<RibRequest>;
pub type RibReceiver = mpsc::UnboundedReceiver<RibRequest>;
pub type Responder<T> = oneshot::Sender<Result<T, RpcError>>;

// Transport/application error returned from every RIB call site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RpcError {
    CommandFailed,
    NoFinder,
    ResolveFailed,
    SendFailed,
    SendFailedTransient,
    ReplyTimedOut,
    BadArgs,
    NoSuchMethod,
    InternalError,
}

// How a request queue should react to an error at its head.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    // Retry after one second with the head of the queue unchanged.
    Transient,
    // Flush the queue and mark the interface failed.
    Fatal,
    // The remote side processed and rejected the request; the caller
    // decides between logging and failing.
    AppLevel,
}

// A route to be installed into the RIB.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RibRouteMsg {
    pub protocol: Protocol,
    pub net: IpNetwork,
    pub nexthop: IpAddr,
    pub ifname: String,
    pub vifname: String,
    pub metric: u32,
    pub unicast: bool,
    pub multicast: bool,
    pub tags: PolicyTags,
}

// Key identifying a route to be removed from the RIB.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RibRouteKeyMsg {
    pub protocol: Protocol,
    pub net: IpNetwork,
    pub unicast: bool,
    pub multicast: bool,
}

// Response to a nexthop interest registration.
//
// `base_addr/prefix_len` is the covering range for which this answer is
// valid. `real_prefix_len` is the prefix length the RIB will use when
// reporting invalidations for this registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NexthopInterest {
    pub resolves: bool,
    pub base_addr: IpAddr,
    pub prefix_len: u8,
    pub real_prefix_len: u8,
    pub actual_nexthop: IpAddr,
    pub metric: u32,
}

// Requests to the RIB service. Each carries a oneshot responder; the
// transport behind the channel is out of scope, only this shape and the
// error taxonomy are contractual.
#[derive(Debug)]
pub enum RibRequest {
    AddIgpTable {
        protocol: Protocol,
        af: AddressFamily,
        unicast: bool,
        multicast: bool,
        responder: Responder<()>,
    },
    DeleteIgpTable {
        protocol: Protocol,
        af: AddressFamily,
        unicast: bool,
        multicast: bool,
        responder: Responder<()>,
    },
    AddRoute {
        route: RibRouteMsg,
        responder: Responder<()>,
    },
    AddInterfaceRoute {
        route: RibRouteMsg,
        responder: Responder<()>,
    },
    ReplaceRoute {
        route: RibRouteMsg,
        responder: Responder<()>,
    },
    DeleteRoute {
        route: RibRouteKeyMsg,
        responder: Responder<()>,
    },
    RegisterInterest {
        af: AddressFamily,
        nexthop: IpAddr,
        responder: Responder<NexthopInterest>,
    },
    DeregisterInterest {
        af: AddressFamily,
        base_addr: IpAddr,
        prefix_len: u8,
        responder: Responder<()>,
    },
}

// ===== impl RpcError =====

impl RpcError {
    // The single error classifier shared by every request queue.
    pub fn classify(&self, previously_successful: bool) -> ErrorClass {
        match self {
            RpcError::NoFinder => ErrorClass::Fatal,
            RpcError::ResolveFailed if previously_successful => {
                ErrorClass::Fatal
            }
            RpcError::ResolveFailed
            | RpcError::SendFailed
            | RpcError::SendFailedTransient
            | RpcError::ReplyTimedOut => ErrorClass::Transient,
            RpcError::CommandFailed
            | RpcError::BadArgs
            | RpcError::NoSuchMethod
            | RpcError::InternalError => ErrorClass::AppLevel,
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::CommandFailed => write!(f, "command failed"),
            RpcError::NoFinder => write!(f, "finder unreachable"),
            RpcError::ResolveFailed => write!(f, "failed to resolve target"),
            RpcError::SendFailed => write!(f, "failed to send request"),
            RpcError::SendFailedTransient => {
                write!(f, "failed to send request (transient)")
            }
            RpcError::ReplyTimedOut => write!(f, "reply timed out"),
            RpcError::BadArgs => write!(f, "bad arguments"),
            RpcError::NoSuchMethod => write!(f, "no such method"),
            RpcError::InternalError => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert_eq!(
            RpcError::SendFailed.classify(false),
            ErrorClass::Transient
        );
        assert_eq!(
            RpcError::ReplyTimedOut.classify(true),
            ErrorClass::Transient
        );

        // RESOLVE_FAILED is transient only before the first success.
        assert_eq!(
            RpcError::ResolveFailed.classify(false),
            ErrorClass::Transient
        );
        assert_eq!(
            RpcError::ResolveFailed.classify(true),
            ErrorClass::Fatal
        );

        assert_eq!(RpcError::NoFinder.classify(false), ErrorClass::Fatal);
        assert_eq!(
            RpcError::CommandFailed.classify(true),
            ErrorClass::AppLevel
        );
        assert_eq!(
            RpcError::InternalError.classify(false),
            ErrorClass::AppLevel
        );
    }
}
