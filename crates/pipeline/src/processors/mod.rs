//! Concrete pipeline stages

pub mod aggregator;
pub mod filter;
pub mod model;
pub mod notifiers;

pub use aggregator::{AssistantContextAggregator, ContextAggregator, UserContextAggregator};
pub use filter::TranscriptionFilter;
pub use model::SpeechModelService;
pub use notifiers::{
    BotTranscriptNotifier, EventSink, MetricsNotifier, SpeakingNotifier, UserTranscriptNotifier,
};
