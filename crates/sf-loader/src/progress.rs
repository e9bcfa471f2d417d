//! Batch state transitions, reported to the caller as they happen.

use busbar_sf_jobs::BatchId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle of one batch on the loader side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchState {
    Created,
    Queued,
    InProgress,
    Completed,
    Failed,
    Aborted,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Failed | BatchState::Aborted
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Created => "Created",
            BatchState::Queued => "Queued",
            BatchState::InProgress => "InProgress",
            BatchState::Completed => "Completed",
            BatchState::Failed => "Failed",
            BatchState::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// One batch state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub object_name: String,
    /// Position of the batch within its object.
    pub batch_sequence: usize,
    /// Server id, once the batch has been uploaded.
    pub batch_id: Option<BatchId>,
    pub state: BatchState,
    pub at: DateTime<Utc>,
}

type Callback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Where progress events go. The default drops them.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    sink: Option<Callback>,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}

impl ProgressReporter {
    pub fn none() -> Self {
        Self::default()
    }

    /// Deliver events to a callback. It runs on the loader's tasks and
    /// should return quickly.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            sink: Some(Arc::new(callback)),
        }
    }

    /// Deliver events to a channel. Events are dropped once the receiver
    /// is gone.
    pub fn from_channel(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self::from_fn(move |event| {
            let _ = sender.send(event);
        })
    }

    pub(crate) fn emit(
        &self,
        object_name: &str,
        batch_sequence: usize,
        batch_id: Option<&BatchId>,
        state: BatchState,
    ) {
        if let Some(sink) = &self.sink {
            sink(ProgressEvent {
                object_name: object_name.to_string(),
                batch_sequence,
                batch_id: batch_id.cloned(),
                state,
                at: Utc::now(),
            });
        }
    }
}
