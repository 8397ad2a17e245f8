//! Frame taxonomy
//!
//! Every unit of work in the pipeline is a `Frame`. Frames are immutable
//! values: a stage that wants to change one constructs a new frame and
//! emits it. Data frames flow downstream toward the transport output,
//! control signals may flow either way.

use crate::audio::AudioFrame;
use crate::conversation::ContextSnapshot;
use crate::transcript::Transcription;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Which way a frame is travelling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Toward the output/tail of the pipeline
    Downstream,
    /// Toward the input/head of the pipeline
    Upstream,
}

impl FrameDirection {
    pub fn reversed(&self) -> Self {
        match self {
            Self::Downstream => Self::Upstream,
            Self::Upstream => Self::Downstream,
        }
    }
}

/// Out-of-band control signals
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Cancel the in-flight generation; travels upstream on interruption
    Cancel,
    /// Flush any buffered partial state
    Flush,
    /// Ask the context aggregator to emit a snapshot frame
    GetContext,
}

/// A named metrics sample emitted into the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsEvent {
    pub name: String,
    pub timestamp_ms: u64,
    pub data: HashMap<String, serde_json::Value>,
}

impl MetricsEvent {
    pub fn new(name: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            name: name.into(),
            timestamp_ms,
            data: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// The frame variants moving through the pipeline
#[derive(Debug, Clone)]
pub enum Frame {
    /// First frame of a session, emitted once by the task
    Start,
    /// Captured participant audio
    AudioInput(AudioFrame),
    /// Synthesized bot audio
    AudioOutput(AudioFrame),
    /// Transcribed speech, user or bot
    Transcription(Transcription),
    /// Point-in-time conversation history
    ContextSnapshot(ContextSnapshot),
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    /// The user interrupted the bot; downstream stages flush stale output
    StartInterruption,
    /// Terminal frame; the pipeline shuts down once it exits the tail
    EndOfStream,
    /// An error observed inside the stream
    Error {
        stage: &'static str,
        message: String,
        recoverable: bool,
    },
    Control(ControlFrame),
    Metrics(Arc<MetricsEvent>),
}

impl Frame {
    pub fn error(stage: &'static str, message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            stage,
            message: message.into(),
            recoverable,
        }
    }

    /// Terminates the pipeline when it exits the tail
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    pub fn is_control(&self) -> bool {
        matches!(self, Self::Control(_))
    }

    /// Static variant name for structured logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::AudioInput(_) => "audio_input",
            Self::AudioOutput(_) => "audio_output",
            Self::Transcription(_) => "transcription",
            Self::ContextSnapshot(_) => "context_snapshot",
            Self::UserStartedSpeaking => "user_started_speaking",
            Self::UserStoppedSpeaking => "user_stopped_speaking",
            Self::BotStartedSpeaking => "bot_started_speaking",
            Self::BotStoppedSpeaking => "bot_stopped_speaking",
            Self::StartInterruption => "start_interruption",
            Self::EndOfStream => "end_of_stream",
            Self::Error { .. } => "error",
            Self::Control(_) => "control",
            Self::Metrics(_) => "metrics",
        }
    }
}

/// A frame paired with its travel direction, as emitted by a stage
#[derive(Debug, Clone)]
pub struct DirectedFrame {
    pub frame: Frame,
    pub direction: FrameDirection,
}

impl DirectedFrame {
    pub fn new(frame: Frame, direction: FrameDirection) -> Self {
        Self { frame, direction }
    }

    pub fn downstream(frame: Frame) -> Self {
        Self::new(frame, FrameDirection::Downstream)
    }

    pub fn upstream(frame: Frame) -> Self {
        Self::new(frame, FrameDirection::Upstream)
    }

    /// Pass-through: same frame, same direction
    pub fn forward(frame: Frame, direction: FrameDirection) -> Vec<Self> {
        vec![Self::new(frame, direction)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_predicate() {
        assert!(Frame::EndOfStream.is_terminal());
        assert!(!Frame::Start.is_terminal());
        assert!(!Frame::Control(ControlFrame::Cancel).is_terminal());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Frame::StartInterruption.kind(), "start_interruption");
        assert_eq!(
            Frame::error("model_service", "boom", true).kind(),
            "error"
        );
    }

    #[test]
    fn test_direction_reversed() {
        assert_eq!(
            FrameDirection::Downstream.reversed(),
            FrameDirection::Upstream
        );
    }

    #[test]
    fn test_metrics_builder() {
        let m = MetricsEvent::new("ttfb", 1200).with("value_ms", 87);
        assert_eq!(m.data["value_ms"], 87);
    }
}
