//! Client-facing notification events
//!
//! Notifier stages translate frames into these events at the observation
//! boundary. Each event carries its own timestamp taken when the frame was
//! observed, not when the client receives it.

use crate::frame::MetricsEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Event sent to a connected client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    UserStartedSpeaking {
        timestamp: DateTime<Utc>,
    },
    UserStoppedSpeaking {
        timestamp: DateTime<Utc>,
    },
    BotStartedSpeaking {
        timestamp: DateTime<Utc>,
    },
    BotStoppedSpeaking {
        timestamp: DateTime<Utc>,
    },
    UserTranscript {
        text: String,
        is_final: bool,
        timestamp: DateTime<Utc>,
    },
    BotTranscript {
        text: String,
        timestamp: DateTime<Utc>,
    },
    Metrics {
        name: String,
        data: HashMap<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    pub fn metrics(event: &MetricsEvent) -> Self {
        Self::Metrics {
            name: event.name.clone(),
            data: event.data.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = ClientEvent::UserTranscript {
            text: "hello".to_string(),
            is_final: true,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user_transcript");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["is_final"], true);
    }

    #[test]
    fn test_metrics_event_conversion() {
        let m = MetricsEvent::new("processing_latency", 42).with("avg_us", 310);
        let event = ClientEvent::metrics(&m);
        match event {
            ClientEvent::Metrics { name, data, .. } => {
                assert_eq!(name, "processing_latency");
                assert_eq!(data["avg_us"], 310);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
