//! Deterministic in-process speech model
//!
//! Stands in for a real speech-to-speech backend. It "transcribes" user
//! audio by measuring it, echoes the last user turn as its reply, and
//! synthesizes a tone for the reply audio. Generation is chunked with
//! short pauses so interruption behaves like it would against a live
//! backend.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use voicechat_core::{
    AudioFrame, ContextSnapshot, MetricsEvent, ModelCapabilities, ModelEvent, Result, SampleRate,
    SpeechModel, Transcription, TurnRole,
};

const REPLY_CHUNK_SAMPLES: usize = 480; // 20 ms at 24 kHz
const REPLY_TONE_HZ: f32 = 440.0;

pub struct EchoSpeechModel {
    events: broadcast::Sender<ModelEvent>,
    capabilities: ModelCapabilities,
    voice_id: String,
    /// Milliseconds of user audio accumulated in the current turn
    pending_audio_ms: AtomicU64,
    /// History length already answered, to avoid double generations
    answered_turns: AtomicUsize,
    cancel: Mutex<Option<Arc<AtomicBool>>>,
    sequence: Arc<AtomicU64>,
}

impl EchoSpeechModel {
    pub fn new(voice_id: impl Into<String>, capabilities: ModelCapabilities) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            events,
            capabilities,
            voice_id: voice_id.into(),
            pending_audio_ms: AtomicU64::new(0),
            answered_turns: AtomicUsize::new(0),
            cancel: Mutex::new(None),
            sequence: Arc::new(AtomicU64::new(0)),
        })
    }

    fn reply_for(turn: &str) -> String {
        format!("You said: {turn}")
    }

    fn spawn_generation(&self, reply: String) {
        let cancel = Arc::new(AtomicBool::new(false));
        *self.cancel.lock() = Some(cancel.clone());

        let events = self.events.clone();
        let sequence = self.sequence.clone();
        let transcribe_bot = self.capabilities.transcribe_bot_audio;
        tokio::spawn(async move {
            let _ = events.send(ModelEvent::GenerationStarted);

            // Tone length proportional to the reply text.
            let chunks = (10 + reply.len() / 5).min(50);
            for _ in 0..chunks {
                if cancel.load(Ordering::Acquire) {
                    debug!("generation cancelled");
                    return;
                }
                let seq = sequence.fetch_add(1, Ordering::Relaxed);
                let samples: Vec<f32> = (0..REPLY_CHUNK_SAMPLES)
                    .map(|i| {
                        let t = (seq as usize * REPLY_CHUNK_SAMPLES + i) as f32 / 24_000.0;
                        (t * REPLY_TONE_HZ * std::f32::consts::TAU).sin() * 0.2
                    })
                    .collect();
                let frame = AudioFrame::new(samples, SampleRate::Hz24000, seq, seq * 20);
                if events.send(ModelEvent::Audio(frame)).is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            if cancel.load(Ordering::Acquire) {
                return;
            }
            if transcribe_bot {
                let _ = events.send(ModelEvent::Transcription(Transcription::bot(&reply)));
            }
            let _ = events.send(ModelEvent::GenerationComplete);
            let usage = MetricsEvent::new("usage", Utc::now().timestamp_millis() as u64)
                .with("completion_tokens", reply.split_whitespace().count())
                .with("audio_chunks", chunks);
            let _ = events.send(ModelEvent::Usage(usage));
        });
    }
}

#[async_trait]
impl SpeechModel for EchoSpeechModel {
    async fn start(&self) -> Result<()> {
        debug!(voice = %self.voice_id, "echo model ready");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.interrupt().await
    }

    async fn send_audio(&self, frame: AudioFrame) -> Result<()> {
        self.pending_audio_ms
            .fetch_add(frame.duration().as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn end_of_turn(&self) -> Result<()> {
        let heard_ms = self.pending_audio_ms.swap(0, Ordering::Relaxed);
        if heard_ms == 0 {
            return Ok(());
        }
        if self.capabilities.transcribe_user_audio {
            let text = format!("({heard_ms} ms of speech)");
            let _ = self
                .events
                .send(ModelEvent::Transcription(Transcription::user("user", text)));
        }
        Ok(())
    }

    async fn prime_context(&self, snapshot: ContextSnapshot) -> Result<()> {
        let last_user = match snapshot.turns.last() {
            Some(turn) if turn.role == TurnRole::User => turn.content.clone(),
            _ => return Ok(()),
        };
        // GetContext snapshots re-deliver known history; answer only once.
        let seen = self.answered_turns.swap(snapshot.len(), Ordering::AcqRel);
        if snapshot.len() <= seen {
            return Ok(());
        }
        self.spawn_generation(Self::reply_for(&last_user));
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.events.subscribe()
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicechat_core::{ConversationContext, Turn};

    fn snapshot_with_user(text: &str) -> ContextSnapshot {
        let mut history = ConversationContext::with_system("x");
        history.push(Turn::user(text)).unwrap();
        history.snapshot()
    }

    #[tokio::test]
    async fn test_end_of_turn_transcribes_heard_audio() {
        let model = EchoSpeechModel::new("Puck", ModelCapabilities::default());
        let mut events = model.subscribe();

        model
            .send_audio(AudioFrame::new(vec![0.0; 320], SampleRate::Hz16000, 0, 0))
            .await
            .unwrap();
        model.end_of_turn().await.unwrap();

        match events.recv().await.unwrap() {
            ModelEvent::Transcription(t) => {
                assert_eq!(t.role, TurnRole::User);
                assert!(t.text.contains("20 ms"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_priming_triggers_one_generation() {
        let model = EchoSpeechModel::new("Puck", ModelCapabilities::default());
        let mut events = model.subscribe();

        let snapshot = snapshot_with_user("hello");
        model.prime_context(snapshot.clone()).await.unwrap();
        // Re-priming with the same history must not answer twice.
        model.prime_context(snapshot).await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            ModelEvent::GenerationStarted
        ));
        let mut completes = 0;
        let mut starts = 1;
        loop {
            match events.recv().await {
                Ok(ModelEvent::GenerationStarted) => starts += 1,
                Ok(ModelEvent::GenerationComplete) => completes += 1,
                Ok(ModelEvent::Usage(_)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert_eq!(starts, 1);
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn test_interrupt_stops_generation() {
        let model = EchoSpeechModel::new("Puck", ModelCapabilities::default());
        let mut events = model.subscribe();

        model.prime_context(snapshot_with_user("hello")).await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            ModelEvent::GenerationStarted
        ));
        model.interrupt().await.unwrap();

        // Drain: the cancelled generation never completes.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let remaining = deadline - tokio::time::Instant::now();
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(ModelEvent::GenerationComplete)) => panic!("completed after interrupt"),
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
    }
}
