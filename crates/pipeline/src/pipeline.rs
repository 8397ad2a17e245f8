//! Linear frame pipeline
//!
//! Stages are wired in a straight line at link time. Traversal is
//! single-lane and depth-first: when a stage emits several frames, the
//! first one completes its whole journey before the second starts, so
//! frames arrive at each stage in the order they were emitted, per
//! direction.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use voicechat_core::{
    DirectedFrame, Frame, FrameDirection, FrameOrigin, FrameProcessor, InjectedFrame,
    ProcessorContext, Result, StageLink,
};

/// Frames that left the pipeline during one traversal
#[derive(Debug, Default)]
pub struct Traversal {
    /// Downstream frames that exited past the last stage
    pub output: Vec<Frame>,
    /// Upstream frames that exited past the first stage
    pub backflow: Vec<Frame>,
}

/// An ordered line of frame processors
pub struct Pipeline {
    name: String,
    stages: Vec<Arc<dyn FrameProcessor>>,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Hand every stage its position and injection handle. Topology is
    /// fixed from this point on.
    pub fn link(&self, sender: &mpsc::UnboundedSender<InjectedFrame>) {
        for (index, stage) in self.stages.iter().enumerate() {
            stage.linked(StageLink::new(index, sender.clone()));
        }
    }

    /// Run start hooks in stage order
    pub async fn start(&self, ctx: &mut ProcessorContext) -> Result<()> {
        for stage in &self.stages {
            stage.on_start(ctx).await?;
        }
        Ok(())
    }

    /// Run stop hooks in stage order. During a graceful shutdown the
    /// hooks run as the terminal frame passes each stage; this covers
    /// termination without one.
    pub async fn stop(&self, ctx: &mut ProcessorContext) {
        for stage in &self.stages {
            if let Err(err) = stage.on_stop(ctx).await {
                warn!(stage = stage.name(), error = %err, "on_stop failed");
            }
        }
    }

    /// Walk one frame through the pipeline from its origin.
    ///
    /// A stage error is logged and replaced by a recoverable error frame
    /// that keeps travelling in the same direction; the lane is never
    /// silently dropped.
    pub async fn traverse(
        &self,
        origin: FrameOrigin,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Traversal {
        let len = self.stages.len() as isize;
        let start = match (origin, direction) {
            (FrameOrigin::Head, FrameDirection::Downstream) => 0,
            (FrameOrigin::Head, FrameDirection::Upstream) => -1,
            (FrameOrigin::Tail, FrameDirection::Downstream) => len,
            (FrameOrigin::Tail, FrameDirection::Upstream) => len - 1,
            (FrameOrigin::Stage(i), FrameDirection::Downstream) => i as isize + 1,
            (FrameOrigin::Stage(i), FrameDirection::Upstream) => i as isize - 1,
        };

        let mut result = Traversal::default();
        let mut stack: Vec<(isize, Frame, FrameDirection)> = vec![(start, frame, direction)];

        while let Some((index, frame, direction)) = stack.pop() {
            if index < 0 {
                result.backflow.push(frame);
                continue;
            }
            if index >= len {
                result.output.push(frame);
                continue;
            }

            let stage = &self.stages[index as usize];
            let stops_here = frame.is_terminal() && direction == FrameDirection::Downstream;
            debug!(
                pipeline = %self.name,
                stage = stage.name(),
                frame = frame.kind(),
                downstream = direction == FrameDirection::Downstream,
                "processing frame"
            );

            match stage.process(frame, direction, ctx).await {
                Ok(outputs) => {
                    // Reversed pushes keep depth-first order: the first
                    // emitted frame finishes its journey first.
                    for out in outputs.into_iter().rev() {
                        let next = match out.direction {
                            FrameDirection::Downstream => index + 1,
                            FrameDirection::Upstream => index - 1,
                        };
                        stack.push((next, out.frame, out.direction));
                    }
                }
                Err(err) => {
                    warn!(
                        pipeline = %self.name,
                        stage = stage.name(),
                        error = %err,
                        "stage failed, emitting error frame"
                    );
                    let next = match direction {
                        FrameDirection::Downstream => index + 1,
                        FrameDirection::Upstream => index - 1,
                    };
                    stack.push((
                        next,
                        Frame::error(stage.name(), err.to_string(), true),
                        direction,
                    ));
                }
            }

            if stops_here {
                if let Err(err) = stage.on_stop(ctx).await {
                    warn!(stage = stage.name(), error = %err, "on_stop failed");
                }
            }
        }

        result
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<Arc<dyn FrameProcessor>>,
}

impl PipelineBuilder {
    pub fn stage<P: FrameProcessor + 'static>(self, stage: P) -> Self {
        self.stage_arc(Arc::new(stage))
    }

    pub fn stage_arc(mut self, stage: Arc<dyn FrameProcessor>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            name: self.name,
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use voicechat_core::{Error, Transcription};

    /// Records every frame kind it sees, then forwards
    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FrameProcessor for Recorder {
        async fn process(
            &self,
            frame: Frame,
            direction: FrameDirection,
            _ctx: &mut ProcessorContext,
        ) -> Result<Vec<DirectedFrame>> {
            self.seen.lock().push(frame.kind().to_string());
            Ok(DirectedFrame::forward(frame, direction))
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    /// Emits two transcriptions for every speaking-stopped marker
    struct Doubler;

    #[async_trait]
    impl FrameProcessor for Doubler {
        async fn process(
            &self,
            frame: Frame,
            direction: FrameDirection,
            _ctx: &mut ProcessorContext,
        ) -> Result<Vec<DirectedFrame>> {
            match frame {
                Frame::UserStoppedSpeaking => Ok(vec![
                    DirectedFrame::downstream(Frame::Transcription(Transcription::user(
                        "user", "first",
                    ))),
                    DirectedFrame::downstream(Frame::Transcription(Transcription::user(
                        "user", "second",
                    ))),
                ]),
                other => Ok(DirectedFrame::forward(other, direction)),
            }
        }

        fn name(&self) -> &'static str {
            "doubler"
        }
    }

    struct Failing;

    #[async_trait]
    impl FrameProcessor for Failing {
        async fn process(
            &self,
            _frame: Frame,
            _direction: FrameDirection,
            _ctx: &mut ProcessorContext,
        ) -> Result<Vec<DirectedFrame>> {
            Err(Error::stage("failing", "always fails"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_downstream_exits_tail() {
        let pipeline = Pipeline::builder("test")
            .stage(Recorder {
                name: "a",
                seen: Arc::new(Mutex::new(Vec::new())),
            })
            .build();
        let mut ctx = ProcessorContext::new();
        let result = pipeline
            .traverse(
                FrameOrigin::Head,
                Frame::Start,
                FrameDirection::Downstream,
                &mut ctx,
            )
            .await;
        assert_eq!(result.output.len(), 1);
        assert!(result.backflow.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_exits_head() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder("test")
            .stage(Recorder {
                name: "a",
                seen: seen.clone(),
            })
            .stage(Recorder {
                name: "b",
                seen: seen.clone(),
            })
            .build();
        let mut ctx = ProcessorContext::new();
        let result = pipeline
            .traverse(
                FrameOrigin::Tail,
                Frame::Control(voicechat_core::ControlFrame::Cancel),
                FrameDirection::Upstream,
                &mut ctx,
            )
            .await;
        assert!(result.output.is_empty());
        assert_eq!(result.backflow.len(), 1);
        // Both stages saw the upstream frame.
        assert_eq!(seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_emission_order_preserved() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        struct TextRecorder(Arc<Mutex<Vec<String>>>);

        #[async_trait]
        impl FrameProcessor for TextRecorder {
            async fn process(
                &self,
                frame: Frame,
                direction: FrameDirection,
                _ctx: &mut ProcessorContext,
            ) -> Result<Vec<DirectedFrame>> {
                if let Frame::Transcription(t) = &frame {
                    self.0.lock().push(t.text.clone());
                }
                Ok(DirectedFrame::forward(frame, direction))
            }

            fn name(&self) -> &'static str {
                "text_recorder"
            }
        }

        let pipeline = Pipeline::builder("test")
            .stage(Doubler)
            .stage(TextRecorder(seen.clone()))
            .build();
        let mut ctx = ProcessorContext::new();
        let result = pipeline
            .traverse(
                FrameOrigin::Head,
                Frame::UserStoppedSpeaking,
                FrameDirection::Downstream,
                &mut ctx,
            )
            .await;
        assert_eq!(seen.lock().as_slice(), ["first", "second"]);
        assert_eq!(result.output.len(), 2);
    }

    #[tokio::test]
    async fn test_stage_failure_becomes_error_frame() {
        let pipeline = Pipeline::builder("test").stage(Failing).build();
        let mut ctx = ProcessorContext::new();
        let result = pipeline
            .traverse(
                FrameOrigin::Head,
                Frame::Start,
                FrameDirection::Downstream,
                &mut ctx,
            )
            .await;
        assert_eq!(result.output.len(), 1);
        match &result.output[0] {
            Frame::Error {
                stage, recoverable, ..
            } => {
                assert_eq!(*stage, "failing");
                assert!(*recoverable);
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stage_origin_skips_earlier_stages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder("test")
            .stage(Recorder {
                name: "a",
                seen: seen.clone(),
            })
            .stage(Recorder {
                name: "b",
                seen: seen.clone(),
            })
            .build();
        let mut ctx = ProcessorContext::new();
        // Injected by stage 0: only stage 1 should see it.
        let result = pipeline
            .traverse(
                FrameOrigin::Stage(0),
                Frame::UserStartedSpeaking,
                FrameDirection::Downstream,
                &mut ctx,
            )
            .await;
        assert_eq!(result.output.len(), 1);
        assert_eq!(seen.lock().len(), 1);
    }
}
