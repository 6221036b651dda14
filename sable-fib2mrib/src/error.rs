//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use sable_utils::policy::PolicyError;
use sable_utils::rib::RpcError;
use tracing::{error, warn};

// FIB-to-MRIB redistributor errors.
#[derive(Debug)]
pub enum Error {
    // Route processing
    InvalidRoute(IpNetwork, String),
    NoSuchRoute(IpNetwork),
    // Policy engine
    Policy(PolicyError),
    // Transactional batch interface
    TransactionLimitReached,
    TransactionTooBig(u32),
    TransactionUnknown(u32),
    TransactionFailed(String),
    // RIB interface
    RibFailure(RpcError),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::InvalidRoute(net, reason) => {
                warn!(%net, %reason, "{}", self);
            }
            Error::NoSuchRoute(net) => {
                warn!(%net, "{}", self);
            }
            Error::Policy(error) => {
                error!(%error, "{}", self);
            }
            Error::TransactionLimitReached => {
                warn!("{}", self);
            }
            Error::TransactionTooBig(tid) | Error::TransactionUnknown(tid) => {
                warn!(%tid, "{}", self);
            }
            Error::TransactionFailed(reason) => {
                error!(%reason, "{}", self);
            }
            Error::RibFailure(error) => {
                error!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidRoute(..) => {
                write!(f, "invalid route entry")
            }
            Error::NoSuchRoute(..) => {
                write!(f, "no such route")
            }
            Error::Policy(..) => {
                write!(f, "policy filter error")
            }
            Error::TransactionLimitReached => {
                write!(f, "too many pending transactions")
            }
            Error::TransactionTooBig(..) => {
                write!(f, "too many operations in transaction")
            }
            Error::TransactionUnknown(..) => {
                write!(f, "unknown transaction")
            }
            Error::TransactionFailed(..) => {
                write!(f, "transaction failed")
            }
            Error::RibFailure(..) => {
                write!(f, "RIB interface failure")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Policy(error) => Some(error),
            Error::RibFailure(error) => Some(error),
            _ => None,
        }
    }
}

impl From<PolicyError> for Error {
    fn from(error: PolicyError) -> Error {
        Error::Policy(error)
    }
}
