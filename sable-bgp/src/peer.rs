//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::packet::attribute::Attrs;

// Stable identity of a peer within one pipeline.
pub type PeerId = u32;

// The pseudo-peer behind the local-RIB branch; it originates local routes
// and never appears as an egress target.
pub const LOCAL_PEER_ID: PeerId = 0;

// Immutable identity of a peer. Never mutated after construction; a
// session restart is expressed by bumping the generation number kept next
// to the peer's pipeline, not by touching this.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub router_id: Ipv4Addr,
    pub neighbor_addr: IpAddr,
    // Local address of the session, used for next-hop rewriting on
    // egress.
    pub local_addr: IpAddr,
    pub local_as: u32,
    pub remote_as: u32,
    pub ibgp: bool,
}

// An update handed to the per-peer encoder. The encoder and the wire
// format are out of scope; this is the boundary.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum UpdateMsg {
    Advertise { net: IpNetwork, attrs: Attrs },
    Withdraw { net: IpNetwork },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendResult {
    Sent,
    // The peer's output channel is full; the caller must hold the message
    // and wait for an output-ready notification.
    Busy,
    // The peer's session is gone.
    Closed,
}

// The pipeline's handle on one peer: identity plus the bounded sink
// feeding the peer's encoder task.
#[derive(Debug)]
pub struct PeerHandler {
    pub name: String,
    pub info: PeerInfo,
    update_txp: Option<mpsc::Sender<UpdateMsg>>,
}

// ===== impl PeerInfo =====

impl PeerInfo {
    pub fn is_local(&self) -> bool {
        self.peer_id == LOCAL_PEER_ID
    }
}

// ===== impl PeerHandler =====

impl PeerHandler {
    pub fn new(
        name: String,
        info: PeerInfo,
        update_txp: mpsc::Sender<UpdateMsg>,
    ) -> PeerHandler {
        PeerHandler {
            name,
            info,
            update_txp: Some(update_txp),
        }
    }

    // The local-RIB pseudo-peer has no wire; its egress is the RIB queue.
    pub fn new_local(name: String, info: PeerInfo) -> PeerHandler {
        PeerHandler {
            name,
            info,
            update_txp: None,
        }
    }

    pub fn send_update_message(&self, msg: UpdateMsg) -> SendResult {
        let Some(update_txp) = &self.update_txp else {
            return SendResult::Closed;
        };
        match update_txp.try_send(msg) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendResult::Busy,
            Err(mpsc::error::TrySendError::Closed(_)) => SendResult::Closed,
        }
    }
}
