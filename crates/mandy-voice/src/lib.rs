//! Voice agent lifecycle for the Mandy control plane.
//!
//! An [`AgentController`] owns one room's runtime state and one background
//! pipeline run. It reaches the outside world only through two injected
//! collaborators: a [`TransportFactory`] that joins real-time rooms and a
//! [`PipelineEngine`] that executes the speech-to-text, language model, and
//! text-to-speech stages. Adapters for concrete services implement those
//! traits; [`sim`] provides an in-process simulation of both.
//!
//! State changes are fanned out twice on every publish: as a
//! [`mandy_types::StateMessage`] app-message into the room (best-effort) and
//! to the controller's [`StateCallback`].

pub mod config;
pub mod controller;
pub mod error;
pub mod pipeline;
pub mod sim;
pub mod transport;

pub use config::{AgentConfig, LlmConfig, SttConfig, TtsConfig, DEFAULT_DIRECTIVE};
pub use controller::{AgentBackend, AgentController, AgentSpec, StateCallback};
pub use error::VoiceError;
pub use pipeline::{build_stages, PipelineEngine, PipelineStage, PipelineTask};
pub use transport::{
    EventHandler, Participant, RoomTransport, TransportEvent, TransportEventKind,
    TransportFactory, TransportParams,
};
