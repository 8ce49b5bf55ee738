//! Room transport interface.
//!
//! The transport owns real-time room connectivity. The controller only needs
//! to register lifecycle callbacks and close the connection; media and join
//! mechanics stay behind the adapter.

use crate::error::VoiceError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A participant as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub user_name: Option<String>,
}

impl Participant {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_name: None,
        }
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    /// Display name, `Guest` when the participant has none.
    pub fn display_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or("Guest")
    }
}

/// Lifecycle event kinds a handler can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportEventKind {
    ParticipantJoined,
    FirstParticipantJoined,
    ParticipantLeft,
}

/// A lifecycle event raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ParticipantJoined(Participant),
    FirstParticipantJoined(Participant),
    ParticipantLeft {
        participant: Participant,
        reason: String,
    },
}

impl TransportEvent {
    pub fn kind(&self) -> TransportEventKind {
        match self {
            Self::ParticipantJoined(_) => TransportEventKind::ParticipantJoined,
            Self::FirstParticipantJoined(_) => TransportEventKind::FirstParticipantJoined,
            Self::ParticipantLeft { .. } => TransportEventKind::ParticipantLeft,
        }
    }
}

/// Callback invoked for a transport event. The transport awaits it.
pub type EventHandler = Arc<dyn Fn(TransportEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Parameters used to join a room.
#[derive(Clone)]
pub struct TransportParams {
    pub room_url: String,
    /// Meeting token; open rooms need none.
    pub token: Option<String>,
    pub bot_name: String,
    pub audio_in_enabled: bool,
    pub audio_out_enabled: bool,
    pub vad_enabled: bool,
    /// Keep passing audio through while voice activity detection runs.
    pub vad_audio_passthrough: bool,
}

impl TransportParams {
    pub fn new(room_url: impl Into<String>, token: Option<String>, bot_name: impl Into<String>) -> Self {
        Self {
            room_url: room_url.into(),
            token: token.filter(|t| !t.is_empty()),
            bot_name: bot_name.into(),
            audio_in_enabled: true,
            audio_out_enabled: true,
            vad_enabled: true,
            vad_audio_passthrough: true,
        }
    }
}

impl fmt::Debug for TransportParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportParams")
            .field("room_url", &self.room_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("bot_name", &self.bot_name)
            .field("audio_in_enabled", &self.audio_in_enabled)
            .field("audio_out_enabled", &self.audio_out_enabled)
            .field("vad_enabled", &self.vad_enabled)
            .field("vad_audio_passthrough", &self.vad_audio_passthrough)
            .finish()
    }
}

/// A live connection to one room.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// The room this transport is joined to.
    fn room_url(&self) -> &str;

    /// Registers a handler for one event kind. Handlers accumulate.
    fn register_callback(&self, kind: TransportEventKind, handler: EventHandler);

    /// Leaves the room. Closing twice is not an error.
    async fn close(&self) -> Result<(), VoiceError>;
}

/// Opens room transports.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, params: TransportParams) -> Result<Arc<dyn RoomTransport>, VoiceError>;
}
