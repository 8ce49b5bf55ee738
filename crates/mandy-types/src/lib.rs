//! Shared types for the Mandy voice agent control plane.
//!
//! This crate holds the authoritative shape of an agent's control state
//! ([`RuntimeState`]), the wire payloads exchanged with the web control
//! surface and the room ([`StatePayload`], [`StateMessage`],
//! [`ControlPayload`]), the control action vocabulary, and room key
//! derivation.
//!
//! Nothing here performs I/O. The controller and the server crates depend on
//! `mandy-types` for every cross-crate type so the dependency graph stays
//! acyclic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod control;
mod room;
mod state;

pub use control::{ControlAction, ControlPayload, DEFAULT_REQUESTER};
pub use room::{
    derive_domain, resolve_room_url, room_name_from_url, RoomKey, RoomKeyError, ROOM_HOST_SUFFIX,
};
pub use state::{RuntimeState, StateMessage, StatePayload, DEFAULT_MODE, STATE_MESSAGE_TYPE};

/// Connection status of an agent in its room.
///
/// Legal transitions:
///
/// ```text
/// connecting ──► online
///     │            │
///     ├──► error ◄─┘
///     │      │
///     ▼      ▼
///   disconnected ──► connecting (new lifecycle)
/// ```
///
/// Any non-terminal status may also move straight to `disconnected`, and a
/// status may always be re-broadcast unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Pipeline is being set up; nobody has joined yet.
    Connecting,
    /// The first participant joined and the agent is live.
    Online,
    /// The pipeline run failed. Always followed by `Disconnected`.
    Error,
    /// The lifecycle ended. Terminal for a run.
    Disconnected,
}

impl AgentStatus {
    /// Returns the wire label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Error => "error",
            Self::Disconnected => "disconnected",
        }
    }

    /// Returns `true` if the status may move from `self` to `next`.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Connecting, Online)
                | (Connecting | Online, Error)
                | (Connecting | Online | Error, Disconnected)
                | (Disconnected, Connecting)
        )
    }

    /// Returns `true` once the lifecycle has ended.
    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for AgentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connecting" => Ok(Self::Connecting),
            "online" => Ok(Self::Online),
            "error" => Ok(Self::Error),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
