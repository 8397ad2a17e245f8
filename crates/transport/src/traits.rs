//! Transport seam
//!
//! A transport owns the session's media boundary and exposes it to the
//! pipeline as two stages: `input()` sits at the head and turns captured
//! audio into frames, `output()` sits near the tail and plays generated
//! audio out. Participant lifecycle is reported on a broadcast channel so
//! the application can react without touching the frame stream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use voicechat_core::{FrameProcessor, Result, SampleRate};

/// Session-level transport events
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    ParticipantJoined { participant_id: String },
    ParticipantLeft { participant_id: String },
}

/// Audio formats on each side of the transport
#[derive(Debug, Clone, Copy)]
pub struct TransportParams {
    pub in_sample_rate: SampleRate,
    pub out_sample_rate: SampleRate,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            in_sample_rate: SampleRate::Hz16000,
            out_sample_rate: SampleRate::Hz24000,
        }
    }
}

/// A media transport bridging participants to the pipeline
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Subscribe to participant lifecycle events
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Stage for the pipeline head
    fn input(&self) -> Arc<dyn FrameProcessor>;

    /// Stage for the pipeline tail side
    fn output(&self) -> Arc<dyn FrameProcessor>;
}
