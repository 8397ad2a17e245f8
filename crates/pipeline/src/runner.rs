//! Pipeline runner
//!
//! Drives a task to completion and turns Ctrl-C into an immediate cancel
//! so a session never outlives its process.

use tracing::info;
use voicechat_core::Result;

use crate::task::PipelineTask;

#[derive(Debug, Default)]
pub struct PipelineRunner {
    handle_signals: bool,
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self {
            handle_signals: true,
        }
    }

    /// Skip signal handling; used by tests and embedded callers
    pub fn without_signals() -> Self {
        Self {
            handle_signals: false,
        }
    }

    pub async fn run(&self, task: &mut PipelineTask) -> Result<()> {
        if !self.handle_signals {
            return task.run().await;
        }

        let handle = task.handle();
        let signal = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt signal received, cancelling pipeline");
                handle.cancel();
            }
        });
        let result = task.run().await;
        signal.abort();
        result
    }
}
