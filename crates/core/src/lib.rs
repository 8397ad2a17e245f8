//! Core types for the voicechat pipeline
//!
//! This crate provides the foundational vocabulary shared by every other
//! crate in the workspace:
//! - The `Frame` taxonomy and travel directions
//! - Audio and transcription payloads
//! - Append-only conversation history
//! - Client notification events
//! - The `FrameProcessor` and `SpeechModel` trait seams
//! - Error types

pub mod audio;
pub mod conversation;
pub mod error;
pub mod event;
pub mod frame;
pub mod traits;
pub mod transcript;

pub use audio::{AudioFrame, Channels, SampleRate};
pub use conversation::{ContextSnapshot, ConversationContext, Turn, TurnRole};
pub use error::{Error, Result};
pub use event::ClientEvent;
pub use frame::{ControlFrame, DirectedFrame, Frame, FrameDirection, MetricsEvent};
pub use transcript::Transcription;

pub use traits::{
    FrameOrigin, FrameProcessor, InjectedFrame, ModelCapabilities, ModelEvent,
    ProcessorContext, SpeechModel, StageLink,
};
