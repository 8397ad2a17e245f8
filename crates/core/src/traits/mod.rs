//! Trait seams between the pipeline and its pluggable parts

pub mod model;
pub mod processor;

pub use model::{ModelCapabilities, ModelEvent, SpeechModel};
pub use processor::{
    FrameOrigin, FrameProcessor, InjectedFrame, ProcessorContext, StageLink,
};
