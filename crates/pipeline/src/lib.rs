//! Frame pipeline for real-time voice chat
//!
//! The pipeline is an ordered line of [`FrameProcessor`] stages. Frames
//! flow downstream toward the transport output and upstream toward the
//! input; a [`PipelineTask`] owns the injection queue and the lifecycle,
//! and a [`PipelineRunner`] drives a task under signal handling.
//!
//! [`FrameProcessor`]: voicechat_core::FrameProcessor

pub mod pipeline;
pub mod processors;
pub mod runner;
pub mod task;

pub use pipeline::{Pipeline, PipelineBuilder, Traversal};
pub use processors::{
    AssistantContextAggregator, BotTranscriptNotifier, ContextAggregator, EventSink,
    MetricsNotifier, SpeakingNotifier, SpeechModelService, TranscriptionFilter,
    UserContextAggregator, UserTranscriptNotifier,
};
pub use runner::PipelineRunner;
pub use task::{PipelineParams, PipelineTask, TaskHandle, TaskState};
