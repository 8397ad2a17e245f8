//! Context aggregation
//!
//! A `ContextAggregator` owns the shared conversation history and hands
//! out the user/assistant stage pair that commits turns into it. The
//! history is append-only; both stages only ever push whole turns.
//!
//! The user stage sits near the pipeline head. Final user transcriptions
//! reach it travelling upstream from the model stage; each one commits a
//! user turn and publishes a fresh snapshot downstream so the model sees
//! the updated history.
//!
//! The assistant stage sits at the tail. It buffers bot transcriptions
//! while the bot speaks and commits one assistant turn when the bot stops,
//! or whatever was said so far when the user interrupts.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use voicechat_core::{
    ControlFrame, ConversationContext, DirectedFrame, Frame, FrameDirection, FrameProcessor,
    ProcessorContext, Result, Turn, TurnRole,
};

/// Factory for the aggregator stage pair sharing one history
pub struct ContextAggregator {
    context: Arc<Mutex<ConversationContext>>,
}

impl ContextAggregator {
    pub fn new(initial: ConversationContext) -> Self {
        Self {
            context: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn context(&self) -> Arc<Mutex<ConversationContext>> {
        self.context.clone()
    }

    /// Snapshot frame for external queueing (e.g. on participant join)
    pub fn context_frame(&self) -> Frame {
        Frame::ContextSnapshot(self.context.lock().snapshot())
    }

    pub fn user(&self) -> UserContextAggregator {
        UserContextAggregator {
            context: self.context.clone(),
        }
    }

    pub fn assistant(&self) -> AssistantContextAggregator {
        AssistantContextAggregator {
            context: self.context.clone(),
            pending: Mutex::new(Vec::new()),
        }
    }
}

/// Commits user turns; placed after the transport input
pub struct UserContextAggregator {
    context: Arc<Mutex<ConversationContext>>,
}

impl UserContextAggregator {
    fn commit(&self, text: &str) -> Frame {
        let mut context = self.context.lock();
        // User turns cannot violate ordering; push is infallible here.
        if let Err(err) = context.push(Turn::user(text)) {
            warn!(error = %err, "user turn rejected");
        }
        debug!(turns = context.len(), "user turn committed");
        Frame::ContextSnapshot(context.snapshot())
    }
}

#[async_trait]
impl FrameProcessor for UserContextAggregator {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        match (&frame, direction) {
            // Final user transcriptions arrive upstream from the model
            // stage; consuming them here is this stage's purpose.
            (Frame::Transcription(t), FrameDirection::Upstream)
                if t.role == TurnRole::User =>
            {
                if !t.is_final {
                    return Ok(Vec::new());
                }
                let snapshot = self.commit(&t.text);
                Ok(vec![DirectedFrame::downstream(snapshot)])
            }
            (Frame::Control(ControlFrame::GetContext), FrameDirection::Downstream) => {
                let snapshot = self.context.lock().snapshot();
                Ok(vec![DirectedFrame::downstream(Frame::ContextSnapshot(
                    snapshot,
                ))])
            }
            _ => Ok(DirectedFrame::forward(frame, direction)),
        }
    }

    fn name(&self) -> &'static str {
        "user_context_aggregator"
    }
}

/// Commits assistant turns; placed at the pipeline tail
pub struct AssistantContextAggregator {
    context: Arc<Mutex<ConversationContext>>,
    pending: Mutex<Vec<String>>,
}

impl AssistantContextAggregator {
    fn commit_pending(&self) -> Result<()> {
        let text = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(());
            }
            pending.drain(..).collect::<Vec<_>>().join(" ")
        };
        let mut context = self.context.lock();
        context.push(Turn::assistant(text))?;
        debug!(turns = context.len(), "assistant turn committed");
        Ok(())
    }
}

#[async_trait]
impl FrameProcessor for AssistantContextAggregator {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        if direction == FrameDirection::Downstream {
            match &frame {
                Frame::Transcription(t) if t.role == TurnRole::Assistant && t.is_final => {
                    self.pending.lock().push(t.text.clone());
                }
                Frame::BotStoppedSpeaking => {
                    self.commit_pending()?;
                }
                // Interrupted turn: keep what was audibly spoken.
                Frame::StartInterruption => {
                    self.commit_pending()?;
                }
                Frame::EndOfStream => {
                    self.commit_pending()?;
                }
                _ => {}
            }
        }
        Ok(DirectedFrame::forward(frame, direction))
    }

    fn name(&self) -> &'static str {
        "assistant_context_aggregator"
    }
}
