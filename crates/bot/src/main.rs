//! Voice-chat bot binary
//!
//! Assembles the full pipeline: transport input, user context aggregation,
//! the speech model, the client notifier block, transport output and
//! assistant aggregation. A loopback participant drives a short demo
//! session against the bundled echo model.

mod echo_model;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voicechat_config::load_settings;
use voicechat_core::{
    ClientEvent, ConversationContext, ModelCapabilities, SampleRate, Turn,
};
use voicechat_pipeline::{
    BotTranscriptNotifier, ContextAggregator, MetricsNotifier, Pipeline, PipelineParams,
    PipelineRunner, PipelineTask, SpeakingNotifier, SpeechModelService, TaskHandle,
    TranscriptionFilter, UserTranscriptNotifier,
};
use voicechat_transport::{
    ChannelTransport, RemoteHandle, Transport, TransportEvent, TransportParams,
};

use echo_model::EchoSpeechModel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings(std::env::var("VOICECHAT_ENV").ok().as_deref())
        .context("failed to load settings")?;

    let transport = ChannelTransport::new(TransportParams {
        in_sample_rate: SampleRate::from_u32(settings.audio.in_sample_rate)
            .context("unsupported input sample rate")?,
        out_sample_rate: SampleRate::from_u32(settings.audio.out_sample_rate)
            .context("unsupported output sample rate")?,
    });

    let model = EchoSpeechModel::new(
        settings.model.voice_id.clone(),
        ModelCapabilities {
            transcribe_user_audio: settings.model.transcribe_user_audio,
            transcribe_bot_audio: settings.model.transcribe_bot_audio,
        },
    );

    let mut history = ConversationContext::with_system(&settings.bot.system_instruction);
    history
        .push(Turn::user(&settings.bot.greeting_instruction))
        .context("failed to seed conversation")?;
    let aggregator = ContextAggregator::new(history);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let pipeline = Pipeline::builder(settings.bot.name.clone())
        .stage_arc(transport.input())
        .stage(aggregator.user())
        .stage(SpeechModelService::new(model).with_usage_metrics(
            settings.pipeline.enable_usage_metrics,
        ))
        .stage(SpeakingNotifier::new(event_tx.clone()))
        .stage(UserTranscriptNotifier::new(event_tx.clone()))
        .stage(TranscriptionFilter::for_speaker("user"))
        .stage(BotTranscriptNotifier::new(event_tx.clone()))
        .stage(MetricsNotifier::new(event_tx))
        .stage_arc(transport.output())
        .stage(aggregator.assistant())
        .build();

    let mut task = PipelineTask::new(
        pipeline,
        PipelineParams {
            allow_interruptions: settings.pipeline.allow_interruptions,
            enable_metrics: settings.pipeline.enable_metrics,
            enable_usage_metrics: settings.pipeline.enable_usage_metrics,
        },
    );
    let handle = task.handle();

    spawn_transport_event_loop(
        transport.subscribe_events(),
        handle.clone(),
        aggregator.context(),
    );
    spawn_client_event_logger(event_rx);
    if let Some(playback) = transport.take_playback() {
        spawn_playback_drain(playback);
    }

    transport.connect().await?;
    spawn_loopback_participant(transport.remote());

    info!(bot = %settings.bot.name, "starting pipeline");
    PipelineRunner::new().run(&mut task).await?;
    transport.disconnect().await?;

    let history = aggregator.context();
    let history = history.lock();
    info!(turns = history.len(), "session finished");
    for turn in history.turns() {
        info!(role = turn.role.as_str(), content = %turn.content, "turn");
    }
    Ok(())
}

/// First join primes the model with the seeded context (which opens the
/// conversation); a departure ends the session.
fn spawn_transport_event_loop(
    mut events: tokio::sync::broadcast::Receiver<TransportEvent>,
    handle: TaskHandle,
    history: Arc<parking_lot::Mutex<ConversationContext>>,
) {
    tokio::spawn(async move {
        let mut greeted = false;
        while let Ok(event) = events.recv().await {
            match event {
                TransportEvent::ParticipantJoined { participant_id } => {
                    info!(participant_id, "first participant joined");
                    if !greeted {
                        greeted = true;
                        let snapshot =
                            voicechat_core::Frame::ContextSnapshot(history.lock().snapshot());
                        if handle.queue_frame(snapshot).is_err() {
                            break;
                        }
                    }
                }
                TransportEvent::ParticipantLeft { participant_id } => {
                    info!(participant_id, "participant left, stopping");
                    let _ = handle.stop();
                    break;
                }
                TransportEvent::Connected | TransportEvent::Disconnected => {}
            }
        }
    });
}

fn spawn_client_event_logger(mut events: mpsc::UnboundedReceiver<ClientEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "client", "{json}"),
                Err(err) => warn!(error = %err, "client event serialization failed"),
            }
        }
    });
}

fn spawn_playback_drain(mut playback: mpsc::UnboundedReceiver<voicechat_core::AudioFrame>) {
    tokio::spawn(async move {
        let mut frames = 0u64;
        while playback.recv().await.is_some() {
            frames += 1;
            if frames % 50 == 0 {
                info!(frames, "bot audio playing");
            }
        }
    });
}

/// Simulated remote participant: two short utterances, then leave
fn spawn_loopback_participant(remote: RemoteHandle) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        if remote.join("user-1").is_err() {
            return;
        }
        // Let the greeting play before speaking.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        for _ in 0..2 {
            if remote.start_speaking().is_err() {
                return;
            }
            for _ in 0..15 {
                if remote.send_audio(vec![0.05; 320]).is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            let _ = remote.stop_speaking();
            tokio::time::sleep(Duration::from_millis(2500)).await;
        }

        let _ = remote.leave("user-1");
    });
}
