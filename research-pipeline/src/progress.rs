//! Per-run progress channels.
//!
//! Each background run gets one unbounded channel keyed by research id and
//! operation kind. The run holds the [`ProgressReporter`]; the presentation
//! layer takes the receiving end out of the registry with
//! [`ProgressRegistry::subscribe`]. Taking it removes the entry, so a channel
//! lives in the registry only until its single consumer attaches and is
//! dropped with that consumer. Nothing is persisted.

use futures::stream::{self, Stream};
use research_core::{ProgressEvent, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Research,
    Expand,
    AddThread,
}

impl OperationKind {
    /// How long a subscriber waits for the next event before giving up.
    pub fn wait_timeout(&self) -> Duration {
        match self {
            OperationKind::Expand => Duration::from_secs(300),
            OperationKind::Research | OperationKind::AddThread => Duration::from_secs(120),
        }
    }

    fn not_found_message(&self) -> &'static str {
        match self {
            OperationKind::Research => "Research not found",
            OperationKind::Expand => "Expand task not found",
            OperationKind::AddThread => "Task not found",
        }
    }

    fn timeout_message(&self) -> &'static str {
        match self {
            OperationKind::Research => "Research timed out",
            OperationKind::Expand => "Expand timed out",
            OperationKind::AddThread => "Timed out",
        }
    }
}

#[derive(Debug)]
enum ProgressMessage {
    Event(ProgressEvent),
    EndOfStream,
}

type ChannelKey = (String, OperationKind);

#[derive(Debug, Default)]
pub struct ProgressRegistry {
    channels: Mutex<HashMap<ChannelKey, UnboundedReceiver<ProgressMessage>>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<ChannelKey, UnboundedReceiver<ProgressMessage>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the channel for a new run. A stale channel left under the same
    /// key by an earlier, never-observed run is replaced.
    pub fn register(&self, research_id: &str, kind: OperationKind) -> ProgressReporter {
        let (sender, receiver) = mpsc::unbounded_channel();
        if self
            .channels()
            .insert((research_id.to_string(), kind), receiver)
            .is_some()
        {
            debug!("Replaced unobserved {:?} channel for {}", kind, research_id);
        }
        ProgressReporter::new(sender)
    }

    /// Takes the channel for `(research_id, kind)`. An unknown key yields a
    /// subscription that reports a single error event.
    pub fn subscribe(&self, research_id: &str, kind: OperationKind) -> ProgressSubscription {
        let receiver = self.channels().remove(&(research_id.to_string(), kind));
        if receiver.is_none() {
            warn!("No {:?} progress channel for research {}", kind, research_id);
        }
        ProgressSubscription {
            receiver,
            kind,
            timeout: kind.wait_timeout(),
            last_progress: 0,
            finished: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self, research_id: &str, kind: OperationKind) -> bool {
        self.channels()
            .contains_key(&(research_id.to_string(), kind))
    }
}

/// Producer side, owned by a pipeline run.
///
/// Percentages never go backwards: a lower value than one already reported
/// is raised to it. Dropping the reporter closes the stream.
#[derive(Debug)]
pub struct ProgressReporter {
    sender: UnboundedSender<ProgressMessage>,
    last_progress: AtomicU8,
    closed: bool,
}

impl ProgressReporter {
    fn new(sender: UnboundedSender<ProgressMessage>) -> Self {
        Self {
            sender,
            last_progress: AtomicU8::new(0),
            closed: false,
        }
    }

    pub fn report(&self, stage: Stage, message: impl Into<String>, progress: u8) {
        let progress = progress.min(100);
        let previous = self.last_progress.fetch_max(progress, Ordering::SeqCst);
        self.send(ProgressEvent::new(stage, message, previous.max(progress)));
    }

    pub fn complete(&self, message: impl Into<String>) {
        self.report(Stage::Complete, message, 100);
    }

    /// Reports a failure at the last percentage reached.
    pub fn fail(&self, message: impl Into<String>) {
        let progress = self.last_progress.load(Ordering::SeqCst);
        self.send(ProgressEvent::error(message, progress));
    }

    /// Sends the end-of-stream marker.
    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.sender.send(ProgressMessage::EndOfStream);
        }
    }

    fn send(&self, event: ProgressEvent) {
        debug!("Progress {:?} {}%: {}", event.stage, event.progress, event.message);
        // Nobody listening is fine; events are best effort.
        let _ = self.sender.send(ProgressMessage::Event(event));
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer side. Yields events until the end-of-stream marker, a timeout,
/// or a closed channel.
#[derive(Debug)]
pub struct ProgressSubscription {
    receiver: Option<UnboundedReceiver<ProgressMessage>>,
    kind: OperationKind,
    timeout: Duration,
    last_progress: u8,
    finished: bool,
}

impl ProgressSubscription {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub(crate) fn is_found(&self) -> bool {
        self.receiver.is_some()
    }

    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        let Some(receiver) = self.receiver.as_mut() else {
            self.finished = true;
            return Some(ProgressEvent::error(self.kind.not_found_message(), 0));
        };

        match tokio::time::timeout(self.timeout, receiver.recv()).await {
            Ok(Some(ProgressMessage::Event(event))) => {
                self.last_progress = self.last_progress.max(event.progress);
                Some(event)
            }
            Ok(Some(ProgressMessage::EndOfStream)) | Ok(None) => {
                self.finished = true;
                None
            }
            Err(_) => {
                warn!("{:?} progress stream timed out after {:?}", self.kind, self.timeout);
                self.finished = true;
                Some(ProgressEvent::error(
                    self.kind.timeout_message(),
                    self.last_progress,
                ))
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .next_event()
                .await
                .map(|event| (event, subscription))
        })
    }
}
