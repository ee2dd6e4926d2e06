use crate::errors::PipelineError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between the caller and the pipeline.
/// Checked between stages, batches and batch pairs, never inside a
/// matrix operation.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `PipelineError::Cancelled` once cancelled
    pub fn check(&self, stage: &'static str) -> anyhow::Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled { stage }.into());
        }
        Ok(())
    }
}
