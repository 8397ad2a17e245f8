//! Transcription filter
//!
//! Drops downstream transcriptions from one speaker. The client already
//! renders the user's own speech locally, so echoing it back downstream
//! of the notifier would duplicate it.

use async_trait::async_trait;
use tracing::trace;
use voicechat_core::{
    DirectedFrame, Frame, FrameDirection, FrameProcessor, ProcessorContext, Result,
};

/// Stateless filter keyed on `Transcription::speaker_id`
pub struct TranscriptionFilter {
    speaker_id: String,
}

impl TranscriptionFilter {
    pub fn for_speaker(speaker_id: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
        }
    }
}

#[async_trait]
impl FrameProcessor for TranscriptionFilter {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        match &frame {
            Frame::Transcription(t)
                if direction == FrameDirection::Downstream && t.speaker_id == self.speaker_id =>
            {
                trace!(speaker = %t.speaker_id, "transcription dropped");
                Ok(Vec::new())
            }
            _ => Ok(DirectedFrame::forward(frame, direction)),
        }
    }

    fn name(&self) -> &'static str {
        "transcription_filter"
    }
}
