//! Pipeline task lifecycle
//!
//! A task owns a pipeline and its unified injection queue. External
//! callers queue frames at the head through a [`TaskHandle`]; stages
//! inject at their own position through their [`StageLink`]. The task
//! serves the queue in FIFO order, one full traversal per frame, until a
//! terminal frame exits the tail.
//!
//! State moves one way only: `Idle -> Running -> Terminated`. A terminated
//! task rejects further frames with `PipelineClosed`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voicechat_core::{
    ControlFrame, Error, Frame, FrameDirection, FrameOrigin, InjectedFrame, MetricsEvent,
    ProcessorContext, Result,
};

use crate::pipeline::Pipeline;

/// Traversals between periodic latency metrics emissions
const METRICS_INTERVAL_FRAMES: u64 = 50;

/// Runtime switches for a task
#[derive(Debug, Clone, Copy)]
pub struct PipelineParams {
    /// User speech cancels an in-flight bot turn
    pub allow_interruptions: bool,
    /// Emit periodic traversal-latency metrics frames
    pub enable_metrics: bool,
    /// Forward model usage accounting as metrics frames
    pub enable_usage_metrics: bool,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            enable_metrics: true,
            enable_usage_metrics: true,
        }
    }
}

/// Task lifecycle state, strictly one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Terminated,
}

/// Cloneable handle for queueing frames into a running task
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<Mutex<TaskState>>,
    sender: mpsc::UnboundedSender<InjectedFrame>,
}

impl TaskHandle {
    /// Queue a frame at the pipeline head, travelling downstream
    pub fn queue_frame(&self, frame: Frame) -> Result<()> {
        if *self.state.lock() == TaskState::Terminated {
            return Err(Error::PipelineClosed);
        }
        self.sender
            .send(InjectedFrame {
                frame,
                direction: FrameDirection::Downstream,
                origin: FrameOrigin::Head,
            })
            .map_err(|_| Error::PipelineClosed)
    }

    pub fn queue_frames(&self, frames: impl IntoIterator<Item = Frame>) -> Result<()> {
        for frame in frames {
            self.queue_frame(frame)?;
        }
        Ok(())
    }

    /// Graceful shutdown: queue a terminal frame that drains the pipeline
    pub fn stop(&self) -> Result<()> {
        self.queue_frame(Frame::EndOfStream)
    }

    /// Immediate shutdown: terminate without draining queued frames
    pub fn cancel(&self) {
        *self.state.lock() = TaskState::Terminated;
        // Nudge the run loop out of its recv; dropped on arrival.
        let _ = self.sender.send(InjectedFrame {
            frame: Frame::EndOfStream,
            direction: FrameDirection::Downstream,
            origin: FrameOrigin::Tail,
        });
    }

    pub fn is_terminated(&self) -> bool {
        *self.state.lock() == TaskState::Terminated
    }
}

/// A pipeline plus the machinery to run it
pub struct PipelineTask {
    pipeline: Pipeline,
    params: PipelineParams,
    ctx: ProcessorContext,
    state: Arc<Mutex<TaskState>>,
    sender: mpsc::UnboundedSender<InjectedFrame>,
    receiver: Option<mpsc::UnboundedReceiver<InjectedFrame>>,
    output: Option<mpsc::UnboundedSender<Frame>>,
    latency_acc_us: u128,
    frames_seen: u64,
}

impl PipelineTask {
    pub fn new(pipeline: Pipeline, params: PipelineParams) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            pipeline,
            params,
            ctx: ProcessorContext::new(),
            state: Arc::new(Mutex::new(TaskState::Idle)),
            sender,
            receiver: Some(receiver),
            output: None,
            latency_acc_us: 0,
            frames_seen: 0,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            state: self.state.clone(),
            sender: self.sender.clone(),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Receiver for frames that exit the pipeline tail
    pub fn take_output(&mut self) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.output = Some(tx);
        rx
    }

    /// Run the pipeline to completion.
    ///
    /// Returns once a terminal frame exits the tail (graceful stop,
    /// participant departure, or an unrecoverable error escalated to one).
    pub async fn run(&mut self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                TaskState::Idle => *state = TaskState::Running,
                TaskState::Running => {
                    return Err(Error::Pipeline("task already started".to_string()))
                }
                TaskState::Terminated => return Err(Error::PipelineClosed),
            }
        }
        let mut receiver = self
            .receiver
            .take()
            .ok_or_else(|| Error::Pipeline("task already started".to_string()))?;

        self.pipeline.link(&self.sender);
        self.pipeline.start(&mut self.ctx).await?;
        info!(
            pipeline = %self.pipeline.name(),
            session_id = %self.ctx.session_id,
            stages = self.pipeline.len(),
            "pipeline task running"
        );

        self.dispatch(FrameOrigin::Head, Frame::Start, FrameDirection::Downstream)
            .await;

        let mut terminal = false;
        while let Some(injected) = receiver.recv().await {
            if *self.state.lock() == TaskState::Terminated {
                break;
            }

            if self.params.allow_interruptions
                && matches!(injected.frame, Frame::UserStartedSpeaking)
            {
                self.interrupt().await;
            }
            if matches!(injected.frame, Frame::BotStoppedSpeaking) {
                self.ctx.turn_number += 1;
            }

            let started = Instant::now();
            terminal = self
                .dispatch(injected.origin, injected.frame, injected.direction)
                .await;
            if terminal {
                // Nothing may follow a terminal frame, not even metrics.
                break;
            }
            if self.params.enable_metrics {
                self.record_latency(started.elapsed().as_micros()).await;
            }
        }

        *self.state.lock() = TaskState::Terminated;
        if !terminal {
            // Cancelled before a terminal frame drained the line; the
            // stages still get their stop hooks.
            self.pipeline.stop(&mut self.ctx).await;
        }
        receiver.close();
        let mut dropped = 0usize;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "frames discarded at shutdown");
        }
        info!(
            session_id = %self.ctx.session_id,
            turns = self.ctx.turn_number,
            graceful = terminal,
            "pipeline task terminated"
        );
        Ok(())
    }

    /// Cancel the in-flight bot turn: signal upstream first so the model
    /// stops producing, then flush stale output downstream.
    async fn interrupt(&mut self) {
        debug!("user interruption, cancelling bot turn");
        self.dispatch(
            FrameOrigin::Tail,
            Frame::Control(ControlFrame::Cancel),
            FrameDirection::Upstream,
        )
        .await;
        self.dispatch(
            FrameOrigin::Head,
            Frame::StartInterruption,
            FrameDirection::Downstream,
        )
        .await;
    }

    /// Traverse one frame and route everything that leaves the pipeline.
    /// Returns true when a terminal frame exited the tail.
    async fn dispatch(
        &mut self,
        origin: FrameOrigin,
        frame: Frame,
        direction: FrameDirection,
    ) -> bool {
        let traversal = self
            .pipeline
            .traverse(origin, frame, direction, &mut self.ctx)
            .await;

        let mut terminal = false;
        let mut fatal = false;
        for frame in traversal.output {
            if frame.is_terminal() {
                terminal = true;
            }
            if let Frame::Error {
                stage,
                message,
                recoverable: false,
            } = &frame
            {
                warn!(stage, %message, "unrecoverable error reached tail");
                fatal = true;
            }
            if let Some(output) = &self.output {
                let _ = output.send(frame);
            }
        }
        for frame in traversal.backflow {
            debug!(frame = frame.kind(), "frame exited pipeline head");
        }

        if fatal && !terminal {
            // Escalate: drain the pipeline with a terminal frame.
            return Box::pin(self.dispatch(
                FrameOrigin::Head,
                Frame::EndOfStream,
                FrameDirection::Downstream,
            ))
            .await;
        }
        terminal
    }

    async fn record_latency(&mut self, elapsed_us: u128) {
        self.latency_acc_us += elapsed_us;
        self.frames_seen += 1;
        if self.frames_seen % METRICS_INTERVAL_FRAMES != 0 {
            return;
        }
        let avg_us = (self.latency_acc_us / METRICS_INTERVAL_FRAMES as u128) as u64;
        self.latency_acc_us = 0;
        let event = MetricsEvent::new(
            "processing_latency",
            Utc::now().timestamp_millis() as u64,
        )
        .with("avg_us", avg_us)
        .with("frames", self.frames_seen);
        self.dispatch(
            FrameOrigin::Head,
            Frame::Metrics(Arc::new(event)),
            FrameDirection::Downstream,
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use voicechat_core::{DirectedFrame, FrameProcessor};

    struct Passthrough;

    #[async_trait]
    impl FrameProcessor for Passthrough {
        async fn process(
            &self,
            frame: Frame,
            direction: FrameDirection,
            _ctx: &mut ProcessorContext,
        ) -> Result<Vec<DirectedFrame>> {
            Ok(DirectedFrame::forward(frame, direction))
        }

        fn name(&self) -> &'static str {
            "passthrough"
        }
    }

    fn passthrough_task() -> PipelineTask {
        let pipeline = Pipeline::builder("test").stage(Passthrough).build();
        PipelineTask::new(pipeline, PipelineParams::default())
    }

    #[tokio::test]
    async fn test_stop_terminates() {
        let mut task = passthrough_task();
        let handle = task.handle();
        let mut output = task.take_output();

        handle.queue_frame(Frame::UserStartedSpeaking).unwrap();
        handle.stop().unwrap();
        task.run().await.unwrap();

        assert_eq!(task.state(), TaskState::Terminated);
        let mut kinds = Vec::new();
        while let Ok(frame) = output.try_recv() {
            kinds.push(frame.kind());
        }
        assert_eq!(kinds.last(), Some(&"end_of_stream"));
    }

    #[tokio::test]
    async fn test_queue_after_termination_fails() {
        let mut task = passthrough_task();
        let handle = task.handle();
        handle.stop().unwrap();
        task.run().await.unwrap();

        let err = handle.queue_frame(Frame::UserStartedSpeaking).unwrap_err();
        assert!(matches!(err, Error::PipelineClosed));
        assert!(handle.is_terminated());
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let mut task = passthrough_task();
        task.handle().stop().unwrap();
        task.run().await.unwrap();
        assert!(task.run().await.is_err());
    }

    #[tokio::test]
    async fn test_terminal_frame_is_last_even_on_metrics_boundary() {
        let mut task = passthrough_task();
        let handle = task.handle();
        let mut output = task.take_output();

        // The terminal frame lands exactly on the metrics interval.
        for _ in 0..(METRICS_INTERVAL_FRAMES - 1) {
            handle.queue_frame(Frame::BotStartedSpeaking).unwrap();
        }
        handle.stop().unwrap();
        task.run().await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(frame) = output.try_recv() {
            kinds.push(frame.kind());
        }
        assert_eq!(kinds.last(), Some(&"end_of_stream"));
        assert!(!kinds.contains(&"metrics"));
    }

    #[tokio::test]
    async fn test_cancel_runs_stop_hooks() {
        struct StopTracker {
            stops: Arc<Mutex<u32>>,
        }

        #[async_trait]
        impl FrameProcessor for StopTracker {
            async fn process(
                &self,
                frame: Frame,
                direction: FrameDirection,
                _ctx: &mut ProcessorContext,
            ) -> Result<Vec<DirectedFrame>> {
                Ok(DirectedFrame::forward(frame, direction))
            }

            fn name(&self) -> &'static str {
                "stop_tracker"
            }

            async fn on_stop(&self, _ctx: &mut ProcessorContext) -> Result<()> {
                *self.stops.lock() += 1;
                Ok(())
            }
        }

        let stops = Arc::new(Mutex::new(0u32));
        let pipeline = Pipeline::builder("test")
            .stage(StopTracker {
                stops: stops.clone(),
            })
            .build();
        let mut task = PipelineTask::new(pipeline, PipelineParams::default());
        let handle = task.handle();
        let mut output = task.take_output();
        let join = tokio::spawn(async move { task.run().await });

        let first = output.recv().await.unwrap();
        assert_eq!(first.kind(), "start");
        handle.cancel();
        join.await.unwrap().unwrap();

        assert_eq!(*stops.lock(), 1);
    }

    #[tokio::test]
    async fn test_cancel_terminates_without_draining() {
        let mut task = passthrough_task();
        let handle = task.handle();
        let mut output = task.take_output();
        let join = tokio::spawn(async move { task.run().await });

        // The startup frame reaching the tail proves the loop is live.
        let first = output.recv().await.unwrap();
        assert_eq!(first.kind(), "start");
        handle.cancel();
        join.await.unwrap().unwrap();

        assert!(handle.is_terminated());
        let err = handle.queue_frame(Frame::UserStartedSpeaking).unwrap_err();
        assert!(matches!(err, Error::PipelineClosed));
    }
}
