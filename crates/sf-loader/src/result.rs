//! Load results, per record, per object and per call.

use busbar_sf_jobs::{Record, RowResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::error::{Error, ErrorKind};
use crate::request::LoadRequest;

/// Error code of a row the server returned no result for.
pub const MISSING_RESULT: &str = "MISSING_RESULT";

/// Error code of a record withheld for exceeding the batch byte ceiling.
pub const OVERSIZED_RECORD: &str = "OVERSIZED_RECORD";

/// Outcome of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub client_row_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BatchResult {
    pub(crate) fn from_row(client_row_id: &str, row: RowResult) -> Self {
        let (error_code, error_message) = match row.error {
            Some(error) => (Some(error.code), Some(error.message)),
            None => (None, None),
        };
        Self {
            client_row_id: client_row_id.to_string(),
            success: row.success,
            new_id: row.id,
            error_code,
            error_message,
        }
    }

    pub(crate) fn failed(
        client_row_id: &str,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            client_row_id: client_row_id.to_string(),
            success: false,
            new_id: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// How one object's load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStatus {
    /// Every record succeeded.
    Completed,
    /// Some records succeeded, some failed on their own merits.
    PartiallySucceeded,
    /// Every processed record failed on its own merits.
    RecordsFailed,
    /// A batch or the job broke; see [`ObjectResult::error`].
    Failed,
    /// The load was cancelled before this object finished.
    Cancelled,
    /// Never attempted, because fail-fast tripped or the load was cancelled
    /// before its wave.
    Skipped,
}

/// Kind of an object-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transport failure after the retry budget was spent, or on a call
    /// that is never retried.
    Transport,
    /// Terminal job client or server-side batch failure.
    Job,
    Cancelled,
}

/// Object-level failure, kept as data in the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&Error> for ObjectFailure {
    fn from(err: &Error) -> Self {
        let kind = match &err.kind {
            ErrorKind::Transport(_) => FailureKind::Transport,
            ErrorKind::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Job,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Something the caller should know about that did not fail a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LoadWarning {
    /// The lookup target has no id, so the field was nulled or omitted.
    #[serde(rename_all = "camelCase")]
    UnresolvedReference {
        client_row_id: String,
        field_name: String,
        target_object: String,
        target_client_row_id: String,
    },
    /// The record exceeds the batch byte ceiling.
    #[serde(rename_all = "camelCase")]
    OversizedRecord {
        client_row_id: String,
        encoded_bytes: usize,
        max_bytes: usize,
    },
}

/// Aggregated outcome of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectResult {
    /// Records in the request.
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Per-record outcomes in submission order. Records of a batch that
    /// broke have no entry.
    pub results: Vec<BatchResult>,
    pub status: ObjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ObjectFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<LoadWarning>,
}

impl ObjectResult {
    pub(crate) fn skipped(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
            results: Vec::new(),
            status: ObjectStatus::Skipped,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// Records without an outcome.
    pub fn unprocessed(&self) -> usize {
        self.total.saturating_sub(self.succeeded + self.failed)
    }

    /// `client_row_id` → new id of every record that succeeded with an id.
    pub fn resolved_ids(&self) -> HashMap<String, String> {
        self.results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| Some((r.client_row_id.clone(), r.new_id.clone()?)))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchResult> {
        self.results.iter().filter(|r| !r.success)
    }

    fn succeeded_rows(&self) -> HashSet<&str> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.client_row_id.as_str())
            .collect()
    }
}

/// Outcome of one `load` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub per_object: BTreeMap<String, ObjectResult>,
    /// The caller cancelled the load or its deadline elapsed.
    pub cancelled: bool,
    pub deadline_exceeded: bool,
    /// A failure stopped later waves from starting.
    pub fail_fast_tripped: bool,
}

impl LoadResult {
    pub fn object(&self, object_name: &str) -> Option<&ObjectResult> {
        self.per_object.get(object_name)
    }

    pub fn total(&self) -> usize {
        self.per_object.values().map(|o| o.total).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.per_object.values().map(|o| o.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.per_object.values().map(|o| o.failed).sum()
    }

    /// True when every record of every object succeeded.
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled
            && self
                .per_object
                .values()
                .all(|o| o.status == ObjectStatus::Completed)
    }

    /// Objects that broke at the batch or job level.
    pub fn failed_objects(&self) -> impl Iterator<Item = (&str, &ObjectResult)> {
        self.per_object
            .iter()
            .filter(|(_, o)| o.status == ObjectStatus::Failed)
            .map(|(name, o)| (name.as_str(), o))
    }

    /// Build the follow-up submission for everything that did not succeed.
    ///
    /// Succeeded records are dropped. A lookup whose target already has an
    /// id is replaced by that id, so the follow-up never needs the dropped
    /// records. Requests left without records are dropped.
    pub fn resubmission(&self, requests: &[LoadRequest]) -> Vec<LoadRequest> {
        let resolved: HashMap<&str, HashMap<String, String>> = self
            .per_object
            .iter()
            .map(|(name, o)| (name.as_str(), o.resolved_ids()))
            .collect();

        requests
            .iter()
            .filter_map(|request| {
                let done = self
                    .per_object
                    .get(&request.object_name)
                    .map(ObjectResult::succeeded_rows)
                    .unwrap_or_default();

                let records: Vec<Record> = request
                    .records
                    .iter()
                    .filter(|r| !done.contains(r.client_row_id.as_str()))
                    .map(|r| substitute_known_ids(r, &resolved))
                    .collect();

                (!records.is_empty()).then(|| LoadRequest {
                    records,
                    ..request.clone()
                })
            })
            .collect()
    }
}

fn substitute_known_ids(record: &Record, resolved: &HashMap<&str, HashMap<String, String>>) -> Record {
    let mut record = record.clone();
    let lookups = std::mem::take(&mut record.lookups);
    for lookup in lookups {
        let known = resolved
            .get(lookup.target_object.as_str())
            .and_then(|ids| ids.get(&lookup.target_client_row_id));
        match known {
            Some(id) => record.set(lookup.field_name, Value::String(id.clone())),
            None => record.lookups.push(lookup),
        }
    }
    record
}
