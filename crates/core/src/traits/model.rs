//! Speech model seam
//!
//! A `SpeechModel` is a speech-to-speech backend: it eats user audio and
//! context, and emits generation events (audio, transcripts, lifecycle
//! markers) on a broadcast channel. The pipeline talks to it through the
//! model service stage; nothing else in the workspace knows how the model
//! is implemented.

use crate::audio::AudioFrame;
use crate::conversation::ContextSnapshot;
use crate::error::Result;
use crate::frame::MetricsEvent;
use crate::transcript::Transcription;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// What the model can transcribe alongside generating speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    /// Emits transcriptions of the user's audio
    pub transcribe_user_audio: bool,
    /// Emits transcriptions of its own generated speech
    pub transcribe_bot_audio: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            transcribe_user_audio: true,
            transcribe_bot_audio: true,
        }
    }
}

/// Events a model publishes while running
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// A generation turn began; bot audio follows
    GenerationStarted,
    /// One chunk of generated speech
    Audio(AudioFrame),
    /// Transcription of user or bot speech, per capabilities
    Transcription(Transcription),
    /// The generation turn finished naturally
    GenerationComplete,
    /// Token/usage accounting for the last turn
    Usage(MetricsEvent),
    /// Backend failure; unrecoverable errors terminate the session
    Error { message: String, recoverable: bool },
}

/// A speech-to-speech model backend
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Open the backend connection
    async fn start(&self) -> Result<()>;

    /// Close the backend connection
    async fn stop(&self) -> Result<()>;

    /// Feed one chunk of user audio
    async fn send_audio(&self, frame: AudioFrame) -> Result<()>;

    /// The user stopped speaking; the current audio turn is complete.
    /// Models that segment on their own may ignore this.
    async fn end_of_turn(&self) -> Result<()> {
        Ok(())
    }

    /// Replace the model's conversation context. A primed context with a
    /// pending user turn triggers a generation.
    async fn prime_context(&self, snapshot: ContextSnapshot) -> Result<()>;

    /// Cancel the in-flight generation, if any. Events for the cancelled
    /// turn must stop; a later turn starts fresh with `GenerationStarted`.
    async fn interrupt(&self) -> Result<()>;

    /// Subscribe to generation events
    fn subscribe(&self) -> broadcast::Receiver<ModelEvent>;

    fn capabilities(&self) -> ModelCapabilities;

    fn model_name(&self) -> &str;
}
