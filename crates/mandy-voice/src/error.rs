use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("Room transport error: {0}")]
    Transport(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Message delivery failed: {0}")]
    Delivery(String),
}
