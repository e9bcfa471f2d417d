//! In-memory [`JobClient`] for tests and dry runs.
//!
//! Every call is recorded. Batches finish after a configurable number of
//! status polls, records get synthetic ids, and failures can be injected
//! per call kind (transport) or per record (application).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::JobClient;
use crate::error::{Error, ErrorKind, Result};
use crate::types::*;

/// The six job client calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    CreateJob,
    UploadBatch,
    CloseJob,
    GetJobStatus,
    GetBatchResults,
    AbortJob,
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Call {
    pub kind: CallKind,
    pub object: String,
    pub job: Option<JobHandle>,
    pub batch: Option<BatchId>,
    /// Rows uploaded, for `UploadBatch`.
    pub rows: usize,
}

type RecordRule = Arc<dyn Fn(&str, &Record) -> Option<RecordError> + Send + Sync>;

/// Scriptable in-memory job client.
pub struct InMemoryJobClient {
    state: Mutex<State>,
    polls_until_complete: u32,
    record_rule: Option<RecordRule>,
    failing_objects: HashMap<(CallKind, String), String>,
    remote_failures: Vec<String>,
    report_batch_states: bool,
}

#[derive(Default)]
struct State {
    next_job: u64,
    next_batch: u64,
    next_record: u64,
    jobs: HashMap<JobHandle, JobEntry>,
    calls: Vec<Call>,
    transport_failures: HashMap<CallKind, u32>,
}

struct JobEntry {
    request: CreateJobRequest,
    closed: bool,
    aborted: bool,
    batches: Vec<BatchEntry>,
}

struct BatchEntry {
    id: BatchId,
    records: Vec<Record>,
    polls: u32,
    results: Vec<RowResult>,
}

impl Default for InMemoryJobClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryJobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobClient")
            .field("polls_until_complete", &self.polls_until_complete)
            .finish_non_exhaustive()
    }
}

impl InMemoryJobClient {
    /// Batches complete on the first status poll after upload.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            polls_until_complete: 1,
            record_rule: None,
            failing_objects: HashMap::new(),
            remote_failures: Vec::new(),
            report_batch_states: true,
        }
    }

    /// Number of status polls a batch stays queued/in progress.
    pub fn with_polls_until_complete(mut self, polls: u32) -> Self {
        self.polls_until_complete = polls.max(1);
        self
    }

    /// Batches never leave the in-progress state.
    pub fn never_completing(mut self) -> Self {
        self.polls_until_complete = u32::MAX;
        self
    }

    /// Per-record outcome: return `Some(error)` to fail a row.
    pub fn with_record_rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&str, &Record) -> Option<RecordError> + Send + Sync + 'static,
    {
        self.record_rule = Some(Arc::new(rule));
        self
    }

    /// The first `times` calls of `kind` fail with a timeout.
    pub fn fail_transport(mut self, kind: CallKind, times: u32) -> Self {
        self.state.get_mut().transport_failures.insert(kind, times);
        self
    }

    /// Every `kind` call for `object` fails with a non-retryable error.
    pub fn fail_permanently(
        mut self,
        kind: CallKind,
        object: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.failing_objects
            .insert((kind, object.into()), message.into());
        self
    }

    /// Batches of `object` finish in the remote `Failed` state.
    pub fn fail_batches_remotely(mut self, object: impl Into<String>) -> Self {
        self.remote_failures.push(object.into());
        self
    }

    /// Status responses carry only the job-level state and counters,
    /// leaving `JobStatus::batches` empty.
    pub fn without_batch_states(mut self) -> Self {
        self.report_batch_states = false;
        self
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// All recorded calls, in order.
    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    /// Number of recorded calls of one kind.
    pub async fn call_count(&self, kind: CallKind) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.kind == kind)
            .count()
    }

    /// Records uploaded for `object`, in upload order.
    pub async fn uploaded_records(&self, object: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        let mut jobs: Vec<(&JobHandle, &JobEntry)> = state
            .jobs
            .iter()
            .filter(|(_, job)| job.request.object == object)
            .collect();
        jobs.sort_by(|a, b| a.0.cmp(b.0));

        let mut batches: Vec<&BatchEntry> = jobs
            .into_iter()
            .flat_map(|(_, job)| job.batches.iter())
            .collect();
        batches.sort_by(|a, b| a.id.cmp(&b.id));
        batches
            .into_iter()
            .flat_map(|b| b.records.iter().cloned())
            .collect()
    }

    /// Row counts of the batches uploaded for `object`, in upload order.
    pub async fn batch_sizes(&self, object: &str) -> Vec<usize> {
        let state = self.state.lock().await;
        state
            .calls
            .iter()
            .filter(|c| c.kind == CallKind::UploadBatch && c.object == object && c.batch.is_some())
            .map(|c| c.rows)
            .collect()
    }

    /// Job requests received, in order.
    pub async fn created_jobs(&self) -> Vec<CreateJobRequest> {
        let state = self.state.lock().await;
        let mut jobs: Vec<(&JobHandle, &JobEntry)> = state.jobs.iter().collect();
        jobs.sort_by(|a, b| a.0.cmp(b.0));
        jobs.into_iter().map(|(_, job)| job.request.clone()).collect()
    }

    /// The id assigned to a record, if it was uploaded and succeeded.
    pub async fn assigned_id(&self, object: &str, client_row_id: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .jobs
            .values()
            .filter(|job| job.request.object == object)
            .flat_map(|job| job.batches.iter())
            .flat_map(|batch| batch.records.iter().zip(batch.results.iter()))
            .find(|(record, _)| record.client_row_id == client_row_id)
            .and_then(|(_, result)| result.id.clone())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn record(state: &mut State, kind: CallKind, object: &str, job: Option<&JobHandle>) {
        state.calls.push(Call {
            kind,
            object: object.to_string(),
            job: job.cloned(),
            batch: None,
            rows: 0,
        });
    }

    fn injected_failure(&self, state: &mut State, kind: CallKind, object: &str) -> Option<Error> {
        if let Some(remaining) = state.transport_failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(?kind, object, remaining = *remaining, "Injected transport failure");
                return Some(Error::new(ErrorKind::Timeout));
            }
        }
        let message = self.failing_objects.get(&(kind, object.to_string()))?;
        debug!(?kind, object, "Injected terminal failure");
        Some(Error::new(ErrorKind::InvalidData(message.clone())))
    }

    fn object_of(state: &State, job: &JobHandle) -> Result<String> {
        state
            .jobs
            .get(job)
            .map(|entry| entry.request.object.clone())
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("job {job}"))))
    }

    fn batch_state(&self, object: &str, job: &JobEntry, batch: &BatchEntry) -> RemoteBatchState {
        if batch.polls >= self.polls_until_complete {
            if self.remote_failures.iter().any(|o| o == object) {
                RemoteBatchState::Failed
            } else {
                RemoteBatchState::Completed
            }
        } else if job.aborted {
            RemoteBatchState::NotProcessed
        } else if batch.polls == 0 {
            RemoteBatchState::Queued
        } else {
            RemoteBatchState::InProgress
        }
    }
}

#[async_trait]
impl JobClient for InMemoryJobClient {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobHandle> {
        let mut state = self.state.lock().await;
        Self::record(&mut state, CallKind::CreateJob, &request.object, None);
        if let Some(err) = self.injected_failure(&mut state, CallKind::CreateJob, &request.object) {
            return Err(err);
        }

        state.next_job += 1;
        let handle = JobHandle::new(format!("750{:012}", state.next_job));
        state.jobs.insert(
            handle.clone(),
            JobEntry {
                request: request.clone(),
                closed: false,
                aborted: false,
                batches: Vec::new(),
            },
        );
        Ok(handle)
    }

    async fn upload_batch(&self, job: &JobHandle, records: &[Record]) -> Result<BatchId> {
        let mut state = self.state.lock().await;
        let object = Self::object_of(&state, job)?;
        state.calls.push(Call {
            kind: CallKind::UploadBatch,
            object: object.clone(),
            job: Some(job.clone()),
            batch: None,
            rows: records.len(),
        });
        if let Some(err) = self.injected_failure(&mut state, CallKind::UploadBatch, &object) {
            return Err(err);
        }

        match state.jobs.get(job) {
            Some(entry) if !entry.closed && !entry.aborted => {}
            _ => {
                return Err(Error::new(ErrorKind::InvalidData(format!(
                    "job {job} is not open"
                ))))
            }
        }

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let failure = self
                .record_rule
                .as_ref()
                .and_then(|rule| rule(&object, record));
            match failure {
                Some(error) => results.push(RowResult::failed(error)),
                None => {
                    state.next_record += 1;
                    results.push(RowResult::ok(format!("{}-{:06}", object, state.next_record)));
                }
            }
        }

        state.next_batch += 1;
        let id = BatchId::new(format!("751{:012}", state.next_batch));
        if let Some(last) = state.calls.last_mut() {
            last.batch = Some(id.clone());
        }

        let entry = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("job {job}"))))?;
        entry.batches.push(BatchEntry {
            id: id.clone(),
            records: records.to_vec(),
            polls: 0,
            results,
        });
        Ok(id)
    }

    async fn close_job(&self, job: &JobHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        let object = Self::object_of(&state, job)?;
        Self::record(&mut state, CallKind::CloseJob, &object, Some(job));
        if let Some(err) = self.injected_failure(&mut state, CallKind::CloseJob, &object) {
            return Err(err);
        }
        if let Some(entry) = state.jobs.get_mut(job) {
            entry.closed = true;
        }
        Ok(())
    }

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let mut state = self.state.lock().await;
        let object = Self::object_of(&state, job)?;
        Self::record(&mut state, CallKind::GetJobStatus, &object, Some(job));
        if let Some(err) = self.injected_failure(&mut state, CallKind::GetJobStatus, &object) {
            return Err(err);
        }

        let entry = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("job {job}"))))?;
        if !entry.aborted {
            for batch in entry.batches.iter_mut() {
                batch.polls = batch.polls.saturating_add(1);
            }
        }

        let entry = &*entry;
        let mut batches: Vec<RemoteBatchInfo> = entry
            .batches
            .iter()
            .map(|batch| {
                let batch_state = self.batch_state(&object, entry, batch);
                RemoteBatchInfo {
                    id: batch.id.clone(),
                    state: batch_state,
                    error_message: (batch_state == RemoteBatchState::Failed)
                        .then(|| "InvalidBatch : simulated failure".to_string()),
                }
            })
            .collect();

        let completed = batches.iter().filter(|b| b.state.is_terminal()).count() as u32;
        let queued = batches.len() as u32 - completed;
        let job_state = if entry.aborted {
            JobState::Aborted
        } else if entry.closed && queued == 0 {
            JobState::JobComplete
        } else if entry.closed {
            JobState::UploadComplete
        } else if batches.is_empty() {
            JobState::Open
        } else {
            JobState::InProgress
        };
        if !self.report_batch_states {
            batches.clear();
        }

        Ok(JobStatus {
            state: job_state,
            batches_queued: queued,
            batches_completed: completed,
            batches,
        })
    }

    async fn get_batch_results(&self, job: &JobHandle, batch: &BatchId) -> Result<Vec<RowResult>> {
        let mut state = self.state.lock().await;
        let object = Self::object_of(&state, job)?;
        state.calls.push(Call {
            kind: CallKind::GetBatchResults,
            object: object.clone(),
            job: Some(job.clone()),
            batch: Some(batch.clone()),
            rows: 0,
        });
        if let Some(err) = self.injected_failure(&mut state, CallKind::GetBatchResults, &object) {
            return Err(err);
        }

        let entry = state
            .jobs
            .get(job)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("job {job}"))))?;
        let found = entry
            .batches
            .iter()
            .find(|b| &b.id == batch)
            .ok_or_else(|| Error::new(ErrorKind::NotFound(format!("batch {batch}"))))?;
        if self.batch_state(&object, entry, found) != RemoteBatchState::Completed {
            return Err(Error::new(ErrorKind::InvalidData(format!(
                "batch {batch} has no results"
            ))));
        }
        Ok(found.results.clone())
    }

    async fn abort_job(&self, job: &JobHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        let object = Self::object_of(&state, job)?;
        Self::record(&mut state, CallKind::AbortJob, &object, Some(job));
        if let Some(err) = self.injected_failure(&mut state, CallKind::AbortJob, &object) {
            return Err(err);
        }
        if let Some(entry) = state.jobs.get_mut(job) {
            entry.aborted = true;
        }
        Ok(())
    }
}
