//! Pipeline engine interface.
//!
//! The engine executes the speech/response stages. The controller hands it an
//! ordered stage list, runs the resulting task in the background, and injects
//! app-messages through [`PipelineTask::queue_message`].

use crate::config::{AgentConfig, LlmConfig, SttConfig, TtsConfig};
use crate::error::VoiceError;
use async_trait::async_trait;
use std::sync::Arc;

/// One stage of the voice pipeline, in processing order.
#[derive(Debug, Clone)]
pub enum PipelineStage {
    /// Audio and app-messages arriving from the room.
    TransportInput,
    /// Logs transcription and text frames as they pass.
    FrameLogger,
    SpeechToText(SttConfig),
    /// Folds user transcripts into the conversation context.
    UserContext,
    LanguageModel {
        settings: LlmConfig,
        system_prompt: String,
    },
    TextToSpeech(TtsConfig),
    /// Audio and app-messages leaving for the room.
    TransportOutput,
    /// Records assistant replies in the conversation context.
    AssistantContext,
}

impl PipelineStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TransportInput => "transport_input",
            Self::FrameLogger => "frame_logger",
            Self::SpeechToText(_) => "stt",
            Self::UserContext => "user_context",
            Self::LanguageModel { .. } => "llm",
            Self::TextToSpeech(_) => "tts",
            Self::TransportOutput => "transport_output",
            Self::AssistantContext => "assistant_context",
        }
    }
}

/// Builds the ordered stage list for an agent with the given directive.
pub fn build_stages(config: &AgentConfig, directive: &str) -> Vec<PipelineStage> {
    let mut stages = vec![PipelineStage::TransportInput];
    if config.debug_frames {
        stages.push(PipelineStage::FrameLogger);
    }
    stages.extend([
        PipelineStage::SpeechToText(config.stt.clone()),
        PipelineStage::UserContext,
        PipelineStage::LanguageModel {
            settings: config.llm.clone(),
            system_prompt: config.system_prompt(directive).to_string(),
        },
        PipelineStage::TextToSpeech(config.tts.clone()),
        PipelineStage::TransportOutput,
        PipelineStage::AssistantContext,
    ]);
    stages
}

/// A constructed, runnable pipeline.
#[async_trait]
pub trait PipelineTask: Send + Sync {
    /// Runs until the pipeline ends or is cancelled.
    async fn run(&self) -> Result<(), VoiceError>;

    /// Asks a running pipeline to stop. Cancelling twice is not an error.
    async fn cancel(&self) -> Result<(), VoiceError>;

    /// Queues a structured app-message for delivery into the room.
    async fn queue_message(&self, message: serde_json::Value) -> Result<(), VoiceError>;
}

/// Constructs pipeline tasks from ordered stages.
pub trait PipelineEngine: Send + Sync {
    fn build(&self, stages: Vec<PipelineStage>) -> Result<Arc<dyn PipelineTask>, VoiceError>;
}
