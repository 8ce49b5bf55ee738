//! Control action vocabulary sent by the web control surface.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recorded as `updatedBy` when a control payload names no requester.
pub const DEFAULT_REQUESTER: &str = "unknown";

/// A control action tag.
///
/// Tags are case-sensitive. Anything outside the vocabulary is kept as
/// [`ControlAction::Unrecognized`] so it still counts as a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Mute,
    Unmute,
    SetMode,
    UpdateDirective,
    LockMode,
    UnlockMode,
    Stop,
    Start,
    Unrecognized(String),
}

impl ControlAction {
    /// Parses a wire tag such as `mandy:mute`.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "mandy:mute" => Self::Mute,
            "mandy:unmute" => Self::Unmute,
            "mandy:set_mode" => Self::SetMode,
            "mandy:update_directive" => Self::UpdateDirective,
            "mandy:lock_mode" => Self::LockMode,
            "mandy:unlock_mode" => Self::UnlockMode,
            "mandy:stop" => Self::Stop,
            "mandy:start" => Self::Start,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Returns the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Mute => "mandy:mute",
            Self::Unmute => "mandy:unmute",
            Self::SetMode => "mandy:set_mode",
            Self::UpdateDirective => "mandy:update_directive",
            Self::LockMode => "mandy:lock_mode",
            Self::UnlockMode => "mandy:unlock_mode",
            Self::Stop => "mandy:stop",
            Self::Start => "mandy:start",
            Self::Unrecognized(tag) => tag,
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a control request as delivered to the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPayload {
    pub action: String,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub directive: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Caller's view of the state version. Informational only.
    #[serde(default)]
    pub version: Option<u64>,
}

impl ControlPayload {
    /// Creates a payload carrying only an action tag.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn requested_by(mut self, requester: impl Into<String>) -> Self {
        self.requested_by = Some(requester.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = Some(directive.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Returns the parsed action.
    pub fn action(&self) -> ControlAction {
        ControlAction::parse(&self.action)
    }

    /// Returns the requester, falling back to [`DEFAULT_REQUESTER`].
    pub fn requester(&self) -> &str {
        self.requested_by.as_deref().unwrap_or(DEFAULT_REQUESTER)
    }
}
