//! Speech model service stage
//!
//! Bridges the pipeline to a [`SpeechModel`]. Downstream audio and context
//! snapshots are consumed into the model; model events come back through a
//! forwarder task that injects frames at this stage's position.
//!
//! Interruption: a `Cancel` travelling upstream bumps the generation
//! counter and interrupts the model. The forwarder drops any buffered
//! event belonging to a cancelled generation, so stale bot audio never
//! re-enters the pipeline after the cancel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voicechat_core::{
    ControlFrame, DirectedFrame, Error, Frame, FrameDirection, FrameProcessor, ModelEvent,
    ProcessorContext, Result, SpeechModel, StageLink, TurnRole,
};

pub struct SpeechModelService {
    model: Arc<dyn SpeechModel>,
    /// Bumped on every cancel; the forwarder compares against the value it
    /// captured at `GenerationStarted`.
    generation: Arc<AtomicU64>,
    forward_usage: bool,
    link: Mutex<Option<StageLink>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechModelService {
    pub fn new(model: Arc<dyn SpeechModel>) -> Self {
        Self {
            model,
            generation: Arc::new(AtomicU64::new(0)),
            forward_usage: true,
            link: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    pub fn with_usage_metrics(mut self, enabled: bool) -> Self {
        self.forward_usage = enabled;
        self
    }

    fn spawn_forwarder(&self, link: StageLink) -> JoinHandle<()> {
        let mut events = self.model.subscribe();
        let generation = self.generation.clone();
        let capabilities = self.model.capabilities();
        let forward_usage = self.forward_usage;

        tokio::spawn(async move {
            // Generation the bot-side events currently belong to.
            let mut current = generation.load(Ordering::Acquire);
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "model events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let stale = generation.load(Ordering::Acquire) != current;
                let result = match event {
                    ModelEvent::GenerationStarted => {
                        current = generation.load(Ordering::Acquire);
                        link.inject(Frame::BotStartedSpeaking, FrameDirection::Downstream)
                    }
                    ModelEvent::Audio(frame) if !stale => {
                        link.inject(Frame::AudioOutput(frame), FrameDirection::Downstream)
                    }
                    ModelEvent::Audio(_) => Ok(()),
                    ModelEvent::Transcription(t) if t.role == TurnRole::User => {
                        if !capabilities.transcribe_user_audio {
                            Ok(())
                        } else {
                            // Downstream for the notifiers, upstream for
                            // the user context aggregator.
                            link.inject(
                                Frame::Transcription(t.clone()),
                                FrameDirection::Downstream,
                            )
                            .and_then(|_| {
                                link.inject(
                                    Frame::Transcription(t),
                                    FrameDirection::Upstream,
                                )
                            })
                        }
                    }
                    ModelEvent::Transcription(t) => {
                        if stale || !capabilities.transcribe_bot_audio {
                            Ok(())
                        } else {
                            link.inject(
                                Frame::Transcription(t),
                                FrameDirection::Downstream,
                            )
                        }
                    }
                    ModelEvent::GenerationComplete if !stale => {
                        link.inject(Frame::BotStoppedSpeaking, FrameDirection::Downstream)
                    }
                    ModelEvent::GenerationComplete => Ok(()),
                    ModelEvent::Usage(event) => {
                        if forward_usage {
                            link.inject(
                                Frame::Metrics(Arc::new(event)),
                                FrameDirection::Downstream,
                            )
                        } else {
                            Ok(())
                        }
                    }
                    ModelEvent::Error {
                        message,
                        recoverable,
                    } => {
                        let inject = link.inject(
                            Frame::error("model_service", message, recoverable),
                            FrameDirection::Downstream,
                        );
                        if recoverable {
                            inject
                        } else {
                            inject.and_then(|_| {
                                link.inject(Frame::EndOfStream, FrameDirection::Downstream)
                            })
                        }
                    }
                };

                if result.is_err() {
                    debug!("pipeline closed, model forwarder exiting");
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl FrameProcessor for SpeechModelService {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        match (frame, direction) {
            (Frame::AudioInput(audio), FrameDirection::Downstream) => {
                self.model
                    .send_audio(audio)
                    .await
                    .map_err(|err| Error::stage("model_service", err.to_string()))?;
                Ok(Vec::new())
            }
            (Frame::ContextSnapshot(snapshot), FrameDirection::Downstream) => {
                debug!(turns = snapshot.len(), "priming model context");
                self.model
                    .prime_context(snapshot)
                    .await
                    .map_err(|err| Error::stage("model_service", err.to_string()))?;
                Ok(Vec::new())
            }
            (frame @ Frame::UserStoppedSpeaking, FrameDirection::Downstream) => {
                if let Err(err) = self.model.end_of_turn().await {
                    warn!(error = %err, "end of turn signal failed");
                }
                Ok(DirectedFrame::forward(frame, direction))
            }
            (frame @ Frame::Control(ControlFrame::Cancel), FrameDirection::Upstream) => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                if let Err(err) = self.model.interrupt().await {
                    warn!(error = %err, "model interrupt failed");
                }
                Ok(DirectedFrame::forward(frame, direction))
            }
            (frame, direction) => Ok(DirectedFrame::forward(frame, direction)),
        }
    }

    fn name(&self) -> &'static str {
        "model_service"
    }

    fn linked(&self, link: StageLink) {
        *self.link.lock() = Some(link);
    }

    async fn on_start(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.model.start().await?;
        info!(model = self.model.model_name(), "speech model started");
        let link = self
            .link
            .lock()
            .clone()
            .ok_or_else(|| Error::Pipeline("model service not linked".to_string()))?;
        *self.forwarder.lock() = Some(self.spawn_forwarder(link));
        Ok(())
    }

    async fn on_stop(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
        self.model.stop().await?;
        info!(model = self.model.model_name(), "speech model stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use tokio::sync::mpsc;
    use voicechat_core::{
        AudioFrame, ContextSnapshot, ModelCapabilities, SampleRate, Transcription,
    };

    struct MockModel {
        events: broadcast::Sender<ModelEvent>,
        sent_audio: PlMutex<Vec<u64>>,
        primed: PlMutex<Vec<usize>>,
        interrupts: PlMutex<u32>,
        capabilities: ModelCapabilities,
    }

    impl MockModel {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(64);
            Arc::new(Self {
                events,
                sent_audio: PlMutex::new(Vec::new()),
                primed: PlMutex::new(Vec::new()),
                interrupts: PlMutex::new(0),
                capabilities: ModelCapabilities::default(),
            })
        }
    }

    #[async_trait]
    impl SpeechModel for MockModel {
        async fn start(&self) -> Result<()> {
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn send_audio(&self, frame: AudioFrame) -> Result<()> {
            self.sent_audio.lock().push(frame.sequence);
            Ok(())
        }

        async fn prime_context(&self, snapshot: ContextSnapshot) -> Result<()> {
            self.primed.lock().push(snapshot.len());
            Ok(())
        }

        async fn interrupt(&self) -> Result<()> {
            *self.interrupts.lock() += 1;
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
            self.events.subscribe()
        }

        fn capabilities(&self) -> ModelCapabilities {
            self.capabilities
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    fn audio(sequence: u64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 320], SampleRate::Hz16000, sequence, sequence * 20)
    }

    async fn started_service(
        model: Arc<MockModel>,
    ) -> (SpeechModelService, mpsc::UnboundedReceiver<voicechat_core::InjectedFrame>) {
        let service = SpeechModelService::new(model);
        let (tx, rx) = mpsc::unbounded_channel();
        service.linked(StageLink::new(2, tx));
        let mut ctx = ProcessorContext::new();
        service.on_start(&mut ctx).await.unwrap();
        (service, rx)
    }

    #[tokio::test]
    async fn test_audio_consumed_into_model() {
        let model = MockModel::new();
        let (service, _rx) = started_service(model.clone()).await;
        let mut ctx = ProcessorContext::new();

        let out = service
            .process(
                Frame::AudioInput(audio(7)),
                FrameDirection::Downstream,
                &mut ctx,
            )
            .await
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(model.sent_audio.lock().as_slice(), [7]);
    }

    #[tokio::test]
    async fn test_snapshot_primes_model() {
        let model = MockModel::new();
        let (service, _rx) = started_service(model.clone()).await;
        let mut ctx = ProcessorContext::new();

        let mut history = voicechat_core::ConversationContext::with_system("x");
        history.push(voicechat_core::Turn::user("hello")).unwrap();
        let out = service
            .process(
                Frame::ContextSnapshot(history.snapshot()),
                FrameDirection::Downstream,
                &mut ctx,
            )
            .await
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(model.primed.lock().as_slice(), [2]);
    }

    #[tokio::test]
    async fn test_generation_events_injected() {
        let model = MockModel::new();
        let (_service, mut rx) = started_service(model.clone()).await;

        model.events.send(ModelEvent::GenerationStarted).unwrap();
        model.events.send(ModelEvent::Audio(audio(1))).unwrap();
        model
            .events
            .send(ModelEvent::Transcription(Transcription::bot("hi")))
            .unwrap();
        model.events.send(ModelEvent::GenerationComplete).unwrap();

        let kinds: Vec<_> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|injected| injected.frame.kind())
        .collect();
        assert_eq!(
            kinds,
            [
                "bot_started_speaking",
                "audio_output",
                "transcription",
                "bot_stopped_speaking"
            ]
        );
    }

    #[tokio::test]
    async fn test_user_transcription_goes_both_ways() {
        let model = MockModel::new();
        let (_service, mut rx) = started_service(model.clone()).await;

        model
            .events
            .send(ModelEvent::Transcription(Transcription::user(
                "user", "hello",
            )))
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.direction, FrameDirection::Downstream);
        assert_eq!(second.direction, FrameDirection::Upstream);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_and_drops_stale_events() {
        let model = MockModel::new();
        let (service, mut rx) = started_service(model.clone()).await;
        let mut ctx = ProcessorContext::new();

        model.events.send(ModelEvent::GenerationStarted).unwrap();
        assert_eq!(rx.recv().await.unwrap().frame.kind(), "bot_started_speaking");

        let out = service
            .process(
                Frame::Control(ControlFrame::Cancel),
                FrameDirection::Upstream,
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(*model.interrupts.lock(), 1);

        // Events from the cancelled generation are dropped; a new
        // generation passes again.
        model.events.send(ModelEvent::Audio(audio(9))).unwrap();
        model.events.send(ModelEvent::GenerationComplete).unwrap();
        model.events.send(ModelEvent::GenerationStarted).unwrap();
        assert_eq!(rx.recv().await.unwrap().frame.kind(), "bot_started_speaking");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unrecoverable_error_escalates_to_terminal() {
        let model = MockModel::new();
        let (_service, mut rx) = started_service(model.clone()).await;

        model
            .events
            .send(ModelEvent::Error {
                message: "socket gone".to_string(),
                recoverable: false,
            })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().frame.kind(), "error");
        assert_eq!(rx.recv().await.unwrap().frame.kind(), "end_of_stream");
    }
}
