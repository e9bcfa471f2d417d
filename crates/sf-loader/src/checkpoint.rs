//! Caller-supplied persistence of load progress.
//!
//! The loader keeps all state in memory. A [`CheckpointHook`] receives a
//! snapshot after every wave and may store it wherever it likes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Snapshot taken after a wave finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadCheckpoint {
    pub run_id: Uuid,
    pub completed_waves: usize,
    pub total_waves: usize,
    /// Objects loaded so far, in wave order.
    pub objects: Vec<String>,
    /// object → `client_row_id` → new id.
    pub resolved_ids: BTreeMap<String, BTreeMap<String, String>>,
}

/// Receives a checkpoint after every wave.
///
/// A failing hook is logged and does not stop the load.
#[async_trait]
pub trait CheckpointHook: Send + Sync {
    async fn checkpoint(&self, checkpoint: &LoadCheckpoint) -> Result<(), HookError>;
}
