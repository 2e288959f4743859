use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Coarse position of a run, reported at step boundaries and per medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum RunStage {
    Queued,
    Extracting,
    Parsing,
    Selecting,
    Encoding { done: usize, total: usize },
    Summarizing,
}

impl RunStage {
    pub fn describe(&self) -> String {
        match self {
            RunStage::Queued => "Waiting to start".to_string(),
            RunStage::Extracting => "Extracting archive".to_string(),
            RunStage::Parsing => "Parsing transcript".to_string(),
            RunStage::Selecting => "Selecting messages and media".to_string(),
            RunStage::Encoding { done, total } => format!("Encoding media {done}/{total}"),
            RunStage::Summarizing => "Waiting for summary".to_string(),
        }
    }
}

/// Latest-value progress channel; usable from blocking code.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<RunStage>>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunStage::Queued);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, stage: RunStage) {
        self.tx.send_replace(stage);
    }

    pub fn current(&self) -> RunStage {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStage> {
        self.tx.subscribe()
    }
}
