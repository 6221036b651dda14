//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use sable_utils::bgp::AfiSafi;
use sable_utils::rib::RpcError;
use tracing::{error, warn};

use crate::peer::PeerId;

// BGP pipeline errors.
#[derive(Debug)]
pub enum Error {
    // Peering management
    PeerUnknown(PeerId),
    PeerExists(PeerId),
    PeerDown(PeerId),
    PeerActive(PeerId),
    // Message processing
    AfMismatch(AfiSafi),
    // RIB interface
    RibFailure(RpcError),
    // Other
    InstanceStartError(Box<Error>),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::PeerUnknown(peer_id)
            | Error::PeerDown(peer_id)
            | Error::PeerExists(peer_id)
            | Error::PeerActive(peer_id) => {
                warn!(%peer_id, "{}", self);
            }
            Error::AfMismatch(afi_safi) => {
                warn!(?afi_safi, "{}", self);
            }
            Error::RibFailure(error) => {
                error!(%error, "{}", self);
            }
            Error::InstanceStartError(error) => {
                error!(error = %error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PeerUnknown(..) => {
                write!(f, "unknown peer")
            }
            Error::PeerExists(..) => {
                write!(f, "peer already configured")
            }
            Error::PeerDown(..) => {
                write!(f, "peering session is down")
            }
            Error::PeerActive(..) => {
                write!(f, "peering session is still active")
            }
            Error::AfMismatch(..) => {
                write!(f, "address family mismatch")
            }
            Error::RibFailure(..) => {
                write!(f, "RIB interface failure")
            }
            Error::InstanceStartError(..) => {
                write!(f, "failed to start instance")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::RibFailure(error) => Some(error),
            Error::InstanceStartError(error) => Some(error),
            _ => None,
        }
    }
}
