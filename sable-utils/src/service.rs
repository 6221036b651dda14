//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

// Operational status of a subsystem.
//
// Transitions: Starting -> Running -> ShuttingDown -> Shutdown. Any state
// may transition to Failed on unrecoverable dependency loss; supervision
// observes Failed and terminates the process with a non-zero exit code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ServiceStatus {
    Disabled,
    Starting,
    Running,
    ShuttingDown,
    Shutdown,
    Failed,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Disabled => write!(f, "disabled"),
            ServiceStatus::Starting => write!(f, "starting"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::ShuttingDown => write!(f, "shutting down"),
            ServiceStatus::Shutdown => write!(f, "shutdown"),
            ServiceStatus::Failed => write!(f, "failed"),
        }
    }
}
