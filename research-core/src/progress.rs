use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Searching,
    Fetching,
    Collecting,
    Scoring,
    Complete,
    Error,
}

/// A progress update as delivered to the presentation layer:
/// `{"stage": "...", "message": "...", "progress": 0..100}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    pub progress: u8,
}

impl ProgressEvent {
    pub fn new(stage: Stage, message: impl Into<String>, progress: u8) -> Self {
        Self {
            stage,
            message: message.into(),
            progress: progress.min(100),
        }
    }

    pub fn error(message: impl Into<String>, progress: u8) -> Self {
        Self::new(Stage::Error, message, progress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, Stage::Complete | Stage::Error)
    }
}
