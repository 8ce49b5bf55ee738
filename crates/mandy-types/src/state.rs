//! Runtime control state and its wire projection.

use crate::AgentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mode a freshly started agent begins in.
pub const DEFAULT_MODE: &str = "silent";

/// `type` tag of the app-message that carries state into the room.
pub const STATE_MESSAGE_TYPE: &str = "mandy/state";

/// Control state of one agent.
///
/// Owned and mutated by a single controller. Everything outside the
/// controller sees it through [`StatePayload`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeState {
    /// Bumped by exactly one on every accepted control action.
    pub version: u64,
    pub mode: String,
    /// Whether the agent's speech output is gated.
    pub muted: bool,
    /// Persona / system instruction. May be empty.
    pub directive: String,
    /// Identity holding the advisory control lock.
    pub locked_by: Option<String>,
    pub updated_by: Option<String>,
    pub status: AgentStatus,
    /// Carried on the wire; nothing sets it yet.
    pub pending_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RuntimeState {
    /// Creates the initial state for a room: version 0, muted, `connecting`.
    pub fn new(directive: impl Into<String>) -> Self {
        Self {
            version: 0,
            mode: DEFAULT_MODE.to_string(),
            muted: true,
            directive: directive.into(),
            locked_by: None,
            updated_by: None,
            status: AgentStatus::Connecting,
            pending_reason: None,
            updated_at: Utc::now(),
        }
    }

    /// Projects the state onto its fixed wire shape.
    pub fn to_payload(&self) -> StatePayload {
        StatePayload {
            version: self.version,
            mode: self.mode.clone(),
            muted: self.muted,
            directive: self.directive.clone(),
            locked_by: self.locked_by.clone(),
            updated_by: self.updated_by.clone(),
            status: self.status,
            pending_reason: self.pending_reason.clone(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new("")
    }
}

/// Wire shape of [`RuntimeState`].
///
/// Optional fields serialize as `null` rather than being omitted, so every
/// key is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePayload {
    pub version: u64,
    pub mode: String,
    pub muted: bool,
    pub directive: String,
    pub locked_by: Option<String>,
    pub updated_by: Option<String>,
    pub status: AgentStatus,
    pub pending_reason: Option<String>,
    /// ISO-8601 / RFC 3339 timestamp.
    pub updated_at: String,
}

/// App-message broadcast into the room whenever state is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub state: StatePayload,
}

impl StateMessage {
    pub fn new(state: StatePayload) -> Self {
        Self {
            kind: STATE_MESSAGE_TYPE.to_string(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn new_state_starts_connecting_at_version_zero() {
        let state = RuntimeState::new("be brief");
        assert_eq!(state.version, 0);
        assert_eq!(state.status, AgentStatus::Connecting);
        assert_eq!(state.mode, DEFAULT_MODE);
        assert!(state.muted);
        assert_eq!(state.directive, "be brief");
        assert!(state.locked_by.is_none());
    }

    #[test]
    fn payload_uses_fixed_camel_case_keys() {
        let payload = RuntimeState::new("").to_payload();
        let value = serde_json::to_value(&payload).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "directive",
                "lockedBy",
                "mode",
                "muted",
                "pendingReason",
                "status",
                "updatedAt",
                "updatedBy",
                "version",
            ]
        );
        assert_eq!(obj["lockedBy"], Value::Null);
        assert_eq!(obj["pendingReason"], Value::Null);
        assert_eq!(obj["status"], "connecting");
    }

    #[test]
    fn payload_parses_back_unchanged() {
        let mut state = RuntimeState::new("persona");
        state.version = 7;
        state.locked_by = Some("alice".to_string());
        state.updated_by = Some("bob".to_string());
        state.status = AgentStatus::Online;

        let payload = state.to_payload();
        let text = serde_json::to_string(&payload).unwrap();
        let parsed: StatePayload = serde_json::from_str(&text).unwrap();

        assert_eq!(parsed, payload);
        assert_eq!(parsed.pending_reason, None);
    }

    #[test]
    fn updated_at_is_rfc3339() {
        let payload = RuntimeState::new("").to_payload();
        assert!(DateTime::parse_from_rfc3339(&payload.updated_at).is_ok());
    }

    #[test]
    fn state_message_carries_type_tag() {
        let message = StateMessage::new(RuntimeState::new("").to_payload());
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], json!(STATE_MESSAGE_TYPE));
        assert_eq!(value["state"]["version"], json!(0));
    }
}
