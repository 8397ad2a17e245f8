//! In-memory channel transport
//!
//! Loopback transport for tests and local demos. The remote participant
//! is a cloneable handle feeding commands over a channel; generated audio
//! comes back on a playback receiver. Real transports implement the same
//! stage pair over a network boundary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voicechat_core::{
    AudioFrame, DirectedFrame, Error, Frame, FrameDirection, FrameProcessor, ProcessorContext,
    Result, SampleRate, StageLink,
};

use crate::traits::{Transport, TransportEvent, TransportParams};

enum RemoteCommand {
    Join(String),
    Leave(String),
    StartSpeaking,
    Audio(AudioFrame),
    StopSpeaking,
}

/// The far side of the loopback: what a connected participant can do
#[derive(Clone)]
pub struct RemoteHandle {
    commands: mpsc::UnboundedSender<RemoteCommand>,
    sequence: Arc<AtomicU64>,
    sample_rate: SampleRate,
}

impl RemoteHandle {
    fn send(&self, command: RemoteCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Transport("transport closed".to_string()))
    }

    pub fn join(&self, participant_id: impl Into<String>) -> Result<()> {
        self.send(RemoteCommand::Join(participant_id.into()))
    }

    pub fn leave(&self, participant_id: impl Into<String>) -> Result<()> {
        self.send(RemoteCommand::Leave(participant_id.into()))
    }

    pub fn start_speaking(&self) -> Result<()> {
        self.send(RemoteCommand::StartSpeaking)
    }

    pub fn stop_speaking(&self) -> Result<()> {
        self.send(RemoteCommand::StopSpeaking)
    }

    /// Send one chunk of captured audio
    pub fn send_audio(&self, samples: Vec<f32>) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let frame = AudioFrame::new(samples, self.sample_rate, sequence, sequence * 20);
        self.send(RemoteCommand::Audio(frame))
    }
}

/// Head stage: turns remote commands into frames
pub struct ChannelInput {
    commands: Mutex<Option<mpsc::UnboundedReceiver<RemoteCommand>>>,
    events: broadcast::Sender<TransportEvent>,
    link: Mutex<Option<StageLink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl FrameProcessor for ChannelInput {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        Ok(DirectedFrame::forward(frame, direction))
    }

    fn name(&self) -> &'static str {
        "transport_input"
    }

    fn linked(&self, link: StageLink) {
        *self.link.lock() = Some(link);
    }

    async fn on_start(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        let mut commands = self
            .commands
            .lock()
            .take()
            .ok_or_else(|| Error::Transport("input already started".to_string()))?;
        let link = self
            .link
            .lock()
            .clone()
            .ok_or_else(|| Error::Transport("input not linked".to_string()))?;
        let events = self.events.clone();

        *self.reader.lock() = Some(tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                let result = match command {
                    RemoteCommand::Join(participant_id) => {
                        info!(participant_id, "participant joined");
                        let _ = events.send(TransportEvent::ParticipantJoined { participant_id });
                        Ok(())
                    }
                    RemoteCommand::Leave(participant_id) => {
                        info!(participant_id, "participant left");
                        let _ = events.send(TransportEvent::ParticipantLeft { participant_id });
                        Ok(())
                    }
                    RemoteCommand::StartSpeaking => {
                        link.inject(Frame::UserStartedSpeaking, FrameDirection::Downstream)
                    }
                    RemoteCommand::Audio(frame) => {
                        link.inject(Frame::AudioInput(frame), FrameDirection::Downstream)
                    }
                    RemoteCommand::StopSpeaking => {
                        link.inject(Frame::UserStoppedSpeaking, FrameDirection::Downstream)
                    }
                };
                if result.is_err() {
                    debug!("pipeline closed, transport reader exiting");
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn on_stop(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        Ok(())
    }
}

/// Tail-side stage: delivers bot audio to playback, flushes on interruption
pub struct ChannelOutput {
    /// Rate the playout side runs at; frames in any other format are
    /// dropped rather than played back wrong.
    sample_rate: SampleRate,
    buffer: Arc<Mutex<VecDeque<AudioFrame>>>,
    wakeup: Arc<Notify>,
    /// Set between an interruption and the next bot turn; audio from the
    /// cancelled turn is dropped instead of played.
    gated: AtomicBool,
    playback: mpsc::UnboundedSender<AudioFrame>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl FrameProcessor for ChannelOutput {
    async fn process(
        &self,
        frame: Frame,
        direction: FrameDirection,
        _ctx: &mut ProcessorContext,
    ) -> Result<Vec<DirectedFrame>> {
        if direction == FrameDirection::Downstream {
            match &frame {
                Frame::AudioOutput(audio) => {
                    if audio.sample_rate != self.sample_rate {
                        warn!(
                            sequence = audio.sequence,
                            rate = audio.sample_rate.as_u32(),
                            expected = self.sample_rate.as_u32(),
                            "bot audio in wrong format dropped"
                        );
                    } else if self.gated.load(Ordering::Acquire) {
                        debug!(sequence = audio.sequence, "stale bot audio dropped");
                    } else {
                        self.buffer.lock().push_back(audio.clone());
                        self.wakeup.notify_one();
                    }
                    // Delivery is this stage's purpose.
                    return Ok(Vec::new());
                }
                Frame::BotStartedSpeaking => {
                    self.gated.store(false, Ordering::Release);
                }
                Frame::StartInterruption => {
                    self.gated.store(true, Ordering::Release);
                    let flushed = {
                        let mut buffer = self.buffer.lock();
                        let flushed = buffer.len();
                        buffer.clear();
                        flushed
                    };
                    debug!(flushed, "playout buffer flushed on interruption");
                }
                _ => {}
            }
        }
        Ok(DirectedFrame::forward(frame, direction))
    }

    fn name(&self) -> &'static str {
        "transport_output"
    }

    async fn on_start(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        let buffer = self.buffer.clone();
        let wakeup = self.wakeup.clone();
        let playback = self.playback.clone();
        *self.writer.lock() = Some(tokio::spawn(async move {
            loop {
                let frame = buffer.lock().pop_front();
                match frame {
                    Some(frame) => {
                        if playback.send(frame).is_err() {
                            break;
                        }
                    }
                    None => wakeup.notified().await,
                }
            }
        }));
        Ok(())
    }

    async fn on_stop(&self, _ctx: &mut ProcessorContext) -> Result<()> {
        if let Some(writer) = self.writer.lock().take() {
            writer.abort();
        }
        Ok(())
    }
}

/// Loopback transport wired over in-process channels
pub struct ChannelTransport {
    events: broadcast::Sender<TransportEvent>,
    input: Arc<ChannelInput>,
    output: Arc<ChannelOutput>,
    remote: RemoteHandle,
    playback: Mutex<Option<mpsc::UnboundedReceiver<AudioFrame>>>,
}

impl ChannelTransport {
    pub fn new(params: TransportParams) -> Self {
        let (events, _) = broadcast::channel(64);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();

        let input = Arc::new(ChannelInput {
            commands: Mutex::new(Some(command_rx)),
            events: events.clone(),
            link: Mutex::new(None),
            reader: Mutex::new(None),
        });
        let output = Arc::new(ChannelOutput {
            sample_rate: params.out_sample_rate,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            wakeup: Arc::new(Notify::new()),
            gated: AtomicBool::new(false),
            playback: playback_tx,
            writer: Mutex::new(None),
        });
        let remote = RemoteHandle {
            commands: command_tx,
            sequence: Arc::new(AtomicU64::new(0)),
            sample_rate: params.in_sample_rate,
        };

        Self {
            events,
            input,
            output,
            remote,
            playback: Mutex::new(Some(playback_rx)),
        }
    }

    /// Handle driving the simulated remote participant
    pub fn remote(&self) -> RemoteHandle {
        self.remote.clone()
    }

    /// Receiver for audio the bot plays out; callable once
    pub fn take_playback(&self) -> Option<mpsc::UnboundedReceiver<AudioFrame>> {
        self.playback.lock().take()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<()> {
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let _ = self.events.send(TransportEvent::Disconnected);
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn input(&self) -> Arc<dyn FrameProcessor> {
        self.input.clone()
    }

    fn output(&self) -> Arc<dyn FrameProcessor> {
        self.output.clone()
    }
}
