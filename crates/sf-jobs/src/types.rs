//! Types shared between the loader and a job client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// Bulk API operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Insert new records
    Insert,
    /// Update existing records
    Update,
    /// Upsert based on external ID
    Upsert,
    /// Delete records (soft delete)
    Delete,
    /// Hard delete records (permanent)
    HardDelete,
    /// Query records
    Query,
    /// Query all records including deleted
    QueryAll,
}

impl Operation {
    /// Get the API string for this operation.
    pub fn api_name(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Upsert => "upsert",
            Operation::Delete => "delete",
            Operation::HardDelete => "hardDelete",
            Operation::Query => "query",
            Operation::QueryAll => "queryAll",
        }
    }

    /// Check if this is a query operation.
    pub fn is_query(&self) -> bool {
        matches!(self, Operation::Query | Operation::QueryAll)
    }

    /// Check if this is an ingest operation.
    pub fn is_ingest(&self) -> bool {
        !self.is_query()
    }

    /// Upsert is the only operation keyed by an external id field.
    pub fn requires_external_id(&self) -> bool {
        matches!(self, Operation::Upsert)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// How the server schedules the batches of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConcurrencyMode {
    #[default]
    Parallel,
    /// Batches are processed strictly in submission order.
    Serial,
}

/// Opaque identifier of a server-side job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned identifier of an uploaded batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(String);

impl BatchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Records
// =============================================================================

/// Forward reference from a record to a record of another object in the
/// same submission, resolved to the target's new id before upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRef {
    /// Field on the referencing record that receives the id.
    pub field_name: String,
    /// Object the referenced record belongs to.
    pub target_object: String,
    /// `client_row_id` of the referenced record.
    pub target_client_row_id: String,
}

impl LookupRef {
    pub fn new(
        field_name: impl Into<String>,
        target_object: impl Into<String>,
        target_client_row_id: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            target_object: target_object.into(),
            target_client_row_id: target_client_row_id.into(),
        }
    }
}

/// One row to load: an ordered field map plus the caller's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Caller-side id used to correlate results; never sent as a field.
    pub client_row_id: String,
    /// Field values in column order.
    pub fields: Map<String, Value>,
    /// Lookups into other objects of the same submission.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lookups: Vec<LookupRef>,
}

impl Record {
    /// Create an empty record.
    pub fn new(client_row_id: impl Into<String>) -> Self {
        Self {
            client_row_id: client_row_id.into(),
            fields: Map::new(),
            lookups: Vec::new(),
        }
    }

    /// Set a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Declare a lookup into another object's record.
    pub fn with_lookup(
        mut self,
        field_name: impl Into<String>,
        target_object: impl Into<String>,
        target_client_row_id: impl Into<String>,
    ) -> Self {
        self.lookups
            .push(LookupRef::new(field_name, target_object, target_client_row_id));
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Remove a field, keeping the order of the remaining ones.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.shift_remove(field)
    }

    /// Returns the value of `field` as text if it is string-like.
    pub fn string_like(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Total size of this record's values as cells of a CSV row, quoting
    /// included but delimiters and the terminator left out.
    pub fn encoded_cells_len(&self) -> usize {
        csv_cells_len(self.fields.values().map(cell_text))
    }
}

/// Bytes `cells` take when written as part of a multi-column CSV row,
/// excluding delimiters and the terminator.
///
/// A row that cannot be encoded reports `usize::MAX` so that it always
/// lands in a batch of its own.
pub fn csv_cells_len<I>(cells: I) -> usize
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    encode_cells(cells).unwrap_or(usize::MAX)
}

fn encode_cells<I>(cells: I) -> Result<usize>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut count = 0usize;
    for cell in cells {
        writer.write_field(cell)?;
        count += 1;
    }
    if count == 0 {
        return Ok(0);
    }
    // trailing empty cell, so a lone blank value is not written as `""`
    writer.write_field("")?;
    writer.write_record(None::<&[u8]>)?;
    let row = writer
        .into_inner()
        .map_err(|err| Error::new(ErrorKind::InvalidData(err.to_string())))?;
    // `count` delimiters plus the terminator
    Ok(row.len().saturating_sub(count + 1))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Request to create a job for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    /// SObject API name
    pub object: String,
    /// Operation type
    pub operation: Operation,
    /// External ID field for upsert
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id_field_name: Option<String>,
    /// Batch scheduling mode
    pub concurrency_mode: ConcurrencyMode,
}

impl CreateJobRequest {
    /// Create a new job request.
    pub fn new(object: impl Into<String>, operation: Operation) -> Self {
        Self {
            object: object.into(),
            operation,
            external_id_field_name: None,
            concurrency_mode: ConcurrencyMode::Parallel,
        }
    }

    /// Set the external ID field for upsert operations.
    pub fn with_external_id_field(mut self, field: impl Into<String>) -> Self {
        self.external_id_field_name = Some(field.into());
        self
    }

    /// Ask the server to process batches in submission order.
    pub fn with_serial_mode(mut self, serial: bool) -> Self {
        self.concurrency_mode = if serial {
            ConcurrencyMode::Serial
        } else {
            ConcurrencyMode::Parallel
        };
        self
    }
}

// =============================================================================
// Status
// =============================================================================

/// Job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Job is open and accepting batches
    Open,
    /// Upload is complete, job is ready for processing
    UploadComplete,
    /// Job is processing
    InProgress,
    /// Job was aborted
    Aborted,
    /// Job completed
    JobComplete,
    /// Job failed
    Failed,
}

impl JobState {
    /// Check if job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Aborted | JobState::JobComplete | JobState::Failed
        )
    }
}

/// Server-side state of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteBatchState {
    Queued,
    InProgress,
    Completed,
    Failed,
    NotProcessed,
}

impl RemoteBatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteBatchState::Completed | RemoteBatchState::Failed | RemoteBatchState::NotProcessed
        )
    }
}

/// Status of one batch as reported with its job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBatchInfo {
    pub id: BatchId,
    pub state: RemoteBatchState,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Job status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub batches_queued: u32,
    #[serde(default)]
    pub batches_completed: u32,
    /// Per-batch states, when the server reports them.
    #[serde(default)]
    pub batches: Vec<RemoteBatchInfo>,
}

impl JobStatus {
    /// Look up one batch in this status report.
    pub fn batch(&self, id: &BatchId) -> Option<&RemoteBatchInfo> {
        self.batches.iter().find(|b| &b.id == id)
    }
}

// =============================================================================
// Results
// =============================================================================

/// Per-record failure reported by the API (validation rule, bad value, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl RecordError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            fields: Vec::new(),
        }
    }
}

/// One row of a batch result, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub success: bool,
    /// Id of the created or affected record.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub error: Option<RecordError>,
}

impl RowResult {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            error: None,
        }
    }

    pub fn failed(error: RecordError) -> Self {
        Self {
            success: false,
            id: None,
            error: Some(error),
        }
    }
}
