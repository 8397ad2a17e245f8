//! Transcription payloads

use crate::conversation::TurnRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A piece of transcribed speech, user or bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    /// Stable identifier of the speaker ("user", "bot", a participant id)
    pub speaker_id: String,
    /// Which side of the conversation spoke
    pub role: TurnRole,
    pub text: String,
    /// Final transcriptions are committed to history; partials are display-only
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Transcription {
    /// Final user transcription
    pub fn user(speaker_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            role: TurnRole::User,
            text: text.into(),
            is_final: true,
            timestamp: Utc::now(),
            confidence: None,
        }
    }

    /// Final bot transcription
    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            speaker_id: "bot".to_string(),
            role: TurnRole::Assistant,
            text: text.into(),
            is_final: true,
            timestamp: Utc::now(),
            confidence: None,
        }
    }

    pub fn partial(mut self) -> Self {
        self.is_final = false;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}
