//! Stage contract
//!
//! A pipeline is a straight line of `FrameProcessor` stages. A stage
//! receives one frame at a time together with its travel direction and
//! returns the frames it emits. The default contract is pass-through: a
//! stage that does not recognize a frame forwards it unchanged in the
//! direction it arrived. Returning no output is reserved for stages whose
//! purpose is to consume that frame.
//!
//! Stages that produce frames outside a traversal (a model emitting audio,
//! a transport reading a socket) do so through the `StageLink` handed to
//! them at wiring time; injected frames enter the pipeline at the stage's
//! own position.

use crate::error::{Error, Result};
use crate::frame::{DirectedFrame, Frame, FrameDirection};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Where an injected frame enters the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Before the first stage (external queueing)
    Head,
    /// After the last stage (task-driven upstream signals)
    Tail,
    /// Produced by the stage at this index
    Stage(usize),
}

/// A frame entering the pipeline from outside a traversal
#[derive(Debug, Clone)]
pub struct InjectedFrame {
    pub frame: Frame,
    pub direction: FrameDirection,
    pub origin: FrameOrigin,
}

/// Injection handle given to a stage when the pipeline wires it in
#[derive(Debug, Clone)]
pub struct StageLink {
    index: usize,
    sender: mpsc::UnboundedSender<InjectedFrame>,
}

impl StageLink {
    pub fn new(index: usize, sender: mpsc::UnboundedSender<InjectedFrame>) -> Self {
        Self { index, sender }
    }

    /// Position of the owning stage in the pipeline
    pub fn index(&self) -> usize {
        self.index
    }

    /// Inject a frame at this stage's position.
    ///
    /// Fails with `PipelineClosed` once the pipeline has shut down.
    pub fn inject(&self, frame: Frame, direction: FrameDirection) -> Result<()> {
        self.sender
            .send(InjectedFrame {
                frame,
                direction,
                origin: FrameOrigin::Stage(self.index),
            })
            .map_err(|_| Error::PipelineClosed)
    }
}

/// Mutable context threaded through every traversal
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    pub session_id: Uuid,
    /// Completed user/assistant exchanges so far
    pub turn_number: u32,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ProcessorContext {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            turn_number: 0,
            metadata: HashMap::new(),
        }
    }

    pub fn with_session(session_id: Uuid) -> Self {
        Self {
            session_id,
            ..Self::new()
        }
    }
}

impl Default for ProcessorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One stage in the pipeline
#[async_trait]
pub trait FrameProcessor: Send + Sync {
    /// Process one frame, returning the frames to emit.
    ///
    /// Implementations must forward unrecognized frames unchanged:
    /// `Ok(DirectedFrame::forward(frame, direction))`.
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>>;

    /// Short stable name used in logs and error frames
    fn name(&self) -> &'static str;

    /// Called once when the pipeline wires this stage in. Stages that
    /// inject frames out-of-band keep the link; others ignore it.
    fn linked(&self, _link: StageLink) {}

    /// Called when the pipeline starts, in stage order
    async fn on_start(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }

    /// Called after `EndOfStream` passes this stage
    async fn on_stop(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }
}
