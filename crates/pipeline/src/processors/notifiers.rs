//! Client notifier stages
//!
//! Pure observers: each one watches for its frames, emits a timestamped
//! `ClientEvent` on the notification channel, and always forwards the
//! frame unchanged. The notification boundary never blocks or fails the
//! frame stream; a closed channel is logged and ignored.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::warn;
use voicechat_core::{
    ClientEvent, DirectedFrame, Frame, FrameDirection, FrameProcessor, ProcessorContext, Result,
    TurnRole,
};

/// Sender side of the notification boundary
pub type EventSink = mpsc::UnboundedSender<ClientEvent>;

fn emit(sink: &EventSink, stage: &'static str, event: ClientEvent) {
    if sink.send(event).is_err() {
        warn!(stage, "client event dropped, notification channel closed");
    }
}

/// Reports speaking start/stop for both sides
pub struct SpeakingNotifier {
    sink: EventSink,
}

impl SpeakingNotifier {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl FrameProcessor for SpeakingNotifier {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        if direction == FrameDirection::Downstream {
            let event = match &frame {
                Frame::UserStartedSpeaking => Some(ClientEvent::UserStartedSpeaking {
                    timestamp: Utc::now(),
                }),
                Frame::UserStoppedSpeaking => Some(ClientEvent::UserStoppedSpeaking {
                    timestamp: Utc::now(),
                }),
                Frame::BotStartedSpeaking => Some(ClientEvent::BotStartedSpeaking {
                    timestamp: Utc::now(),
                }),
                Frame::BotStoppedSpeaking => Some(ClientEvent::BotStoppedSpeaking {
                    timestamp: Utc::now(),
                }),
                _ => None,
            };
            if let Some(event) = event {
                emit(&self.sink, self.name(), event);
            }
        }
        Ok(DirectedFrame::forward(frame, direction))
    }

    fn name(&self) -> &'static str {
        "speaking_notifier"
    }
}

/// Reports user transcriptions, partials included
pub struct UserTranscriptNotifier {
    sink: EventSink,
}

impl UserTranscriptNotifier {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl FrameProcessor for UserTranscriptNotifier {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        if direction == FrameDirection::Downstream {
            if let Frame::Transcription(t) = &frame {
                if t.role == TurnRole::User {
                    emit(
                        &self.sink,
                        self.name(),
                        ClientEvent::UserTranscript {
                            text: t.text.clone(),
                            is_final: t.is_final,
                            timestamp: Utc::now(),
                        },
                    );
                }
            }
        }
        Ok(DirectedFrame::forward(frame, direction))
    }

    fn name(&self) -> &'static str {
        "user_transcript_notifier"
    }
}

/// Reports final bot transcriptions
pub struct BotTranscriptNotifier {
    sink: EventSink,
}

impl BotTranscriptNotifier {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl FrameProcessor for BotTranscriptNotifier {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        if direction == FrameDirection::Downstream {
            if let Frame::Transcription(t) = &frame {
                if t.role == TurnRole::Assistant && t.is_final {
                    emit(
                        &self.sink,
                        self.name(),
                        ClientEvent::BotTranscript {
                            text: t.text.clone(),
                            timestamp: Utc::now(),
                        },
                    );
                }
            }
        }
        Ok(DirectedFrame::forward(frame, direction))
    }

    fn name(&self) -> &'static str {
        "bot_transcript_notifier"
    }
}

/// Reports metrics frames
pub struct MetricsNotifier {
    sink: EventSink,
}

impl MetricsNotifier {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl FrameProcessor for MetricsNotifier {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        if direction == FrameDirection::Downstream {
            if let Frame::Metrics(event) = &frame {
                emit(&self.sink, self.name(), ClientEvent::metrics(event));
            }
        }
        Ok(DirectedFrame::forward(frame, direction))
    }

    fn name(&self) -> &'static str {
        "metrics_notifier"
    }
}
