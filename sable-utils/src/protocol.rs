//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// The protocols implemented by this suite, plus the external origins that
// routes mirrored from the kernel FIB may carry.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum Protocol {
    Bgp,
    Fib2mrib,
}

// ===== impl Protocol =====

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Bgp => "bgp",
            Protocol::Fib2mrib => "fib2mrib",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
