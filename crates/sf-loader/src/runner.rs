//! Drives one batch from upload to results.

use busbar_sf_jobs::{
    BatchId, ErrorKind as JobErrorKind, JobClient, JobHandle, JobState, JobStatus,
    RemoteBatchState, RetryConfig, RetryPolicy, RowResult,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::PollConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::progress::{BatchState, ProgressReporter};
use crate::result::{BatchResult, MISSING_RESULT};
use crate::splitter::Batch;

/// Retry and cancellation shared by every job client call of one load.
#[derive(Debug, Clone)]
pub(crate) struct CallContext {
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(retry: RetryConfig, cancel: CancellationToken) -> Self {
        Self { retry, cancel }
    }

    pub(crate) fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a job client call, retrying transport failures.
    ///
    /// Cancellation interrupts both the call and the wait before a retry.
    pub(crate) async fn call<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = busbar_sf_jobs::Result<T>>,
    {
        let mut policy = RetryPolicy::new(self.retry.clone());

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::cancelled()),
                result = attempt() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    let attempts = policy.attempts();
                    let Some(delay) = policy.next_delay(err.retry_after()) else {
                        return Err(busbar_sf_jobs::Error::with_source(
                            JobErrorKind::RetriesExhausted {
                                attempts,
                                last: err.to_string(),
                            },
                            err,
                        )
                        .into());
                    };
                    warn!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Job client call failed, retrying"
                    );
                    self.pause(delay).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Run a job client call exactly once, for calls that are not safe to
    /// repeat. Cancellation still interrupts it.
    pub(crate) async fn call_once<T, Fut>(&self, operation: &'static str, attempt: Fut) -> Result<T>
    where
        Fut: Future<Output = busbar_sf_jobs::Result<T>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::cancelled()),
            result = attempt => result,
        };
        result.map_err(|err| {
            warn!(operation, error = %err, "Job client call failed, not retried");
            err.into()
        })
    }

    /// Sleep unless cancelled first.
    pub(crate) async fn pause(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

/// Aborts a job at most once, however many batches ask for it.
#[derive(Debug, Default)]
pub(crate) struct JobAbort {
    issued: AtomicBool,
}

impl JobAbort {
    /// Best effort: a failed abort is logged and otherwise ignored.
    pub(crate) async fn abort(&self, client: &dyn JobClient, job: &JobHandle) {
        if self.issued.swap(true, Ordering::SeqCst) {
            return;
        }
        match client.abort_job(job).await {
            Ok(()) => debug!(job = %job, "Job aborted"),
            Err(err) => warn!(job = %job, error = %err, "Failed to abort job"),
        }
    }

    pub(crate) fn issued(&self) -> bool {
        self.issued.load(Ordering::SeqCst)
    }
}

/// Final state of one batch.
#[derive(Debug)]
pub(crate) struct BatchOutcome {
    pub sequence: usize,
    pub batch_id: Option<BatchId>,
    pub state: BatchState,
    /// Per-record results, only for `Completed`.
    pub results: Vec<BatchResult>,
    /// Why the batch did not complete.
    pub error: Option<Error>,
}

enum Poll {
    Pending { processing: bool },
    Finished,
}

/// Owns one batch for its whole life.
pub(crate) struct BatchRunner {
    client: Arc<dyn JobClient>,
    job: JobHandle,
    batch: Batch,
    calls: CallContext,
    poll: PollConfig,
    progress: ProgressReporter,
    abort: Arc<JobAbort>,
    uploaded: Option<mpsc::Sender<()>>,
    slot: Option<OwnedSemaphorePermit>,
    state: BatchState,
    batch_id: Option<BatchId>,
}

impl BatchRunner {
    pub(crate) fn new(
        client: Arc<dyn JobClient>,
        job: JobHandle,
        batch: Batch,
        calls: CallContext,
        poll: PollConfig,
        progress: ProgressReporter,
        abort: Arc<JobAbort>,
    ) -> Self {
        Self {
            client,
            job,
            batch,
            calls,
            poll,
            progress,
            abort,
            uploaded: None,
            slot: None,
            state: BatchState::Created,
            batch_id: None,
        }
    }

    /// Dropped once the upload phase is over, successful or not.
    pub(crate) fn with_upload_signal(mut self, signal: mpsc::Sender<()>) -> Self {
        self.uploaded = Some(signal);
        self
    }

    /// Concurrency slot held while the batch runs.
    ///
    /// Released when the batch finishes, or as soon as a job status leaves
    /// the batch out: the batch then only finishes with the job, which
    /// needs every other batch uploaded first.
    pub(crate) fn with_slot(mut self, slot: OwnedSemaphorePermit) -> Self {
        self.slot = Some(slot);
        self
    }

    #[instrument(
        name = "batch",
        skip(self),
        fields(
            object = %self.batch.object_name,
            sequence = self.batch.sequence,
            job = %self.job,
            rows = self.batch.len(),
        )
    )]
    pub(crate) async fn run(mut self) -> BatchOutcome {
        self.transition(BatchState::Created);

        let outcome = self.drive().await;
        self.uploaded.take();
        self.slot.take();

        match outcome {
            Ok(results) => {
                self.transition(BatchState::Completed);
                self.finish(results, None)
            }
            Err(err) if err.is_cancelled() => {
                self.abort.abort(&*self.client, &self.job).await;
                self.transition(BatchState::Aborted);
                self.finish(Vec::new(), Some(err))
            }
            Err(err) => {
                warn!(error = %err, "Batch failed");
                self.transition(BatchState::Failed);
                self.finish(Vec::new(), Some(err))
            }
        }
    }

    async fn drive(&mut self) -> Result<Vec<BatchResult>> {
        let batch_id = {
            let client = &*self.client;
            let job = &self.job;
            let records = self.batch.records.as_slice();
            self.calls
                .call("upload_batch", move || client.upload_batch(job, records))
                .await?
        };
        self.batch_id = Some(batch_id.clone());
        self.uploaded.take();
        self.transition(BatchState::Queued);

        let mut polls = 0u32;
        loop {
            self.calls.pause(self.poll.interval(polls)).await?;
            polls = polls.saturating_add(1);

            let status = {
                let client = &*self.client;
                let job = &self.job;
                self.calls
                    .call("get_job_status", move || client.get_job_status(job))
                    .await?
            };
            if status.batch(&batch_id).is_none() && self.slot.take().is_some() {
                debug!("Job reports no batch states, releasing batch slot");
            }

            match self.observe(&status, &batch_id)? {
                Poll::Finished => break,
                Poll::Pending { processing } => {
                    debug!(polls, job_state = ?status.state, "Batch not finished");
                    if processing && self.state != BatchState::InProgress {
                        self.transition(BatchState::InProgress);
                    }
                }
            }
        }

        let rows = {
            let client = &*self.client;
            let job = &self.job;
            let id = &batch_id;
            self.calls
                .call("get_batch_results", move || client.get_batch_results(job, id))
                .await?
        };
        Ok(correlate(&self.batch, rows))
    }

    /// Read this batch's progress out of a job status report.
    fn observe(&self, status: &JobStatus, batch_id: &BatchId) -> Result<Poll> {
        if let Some(info) = status.batch(batch_id) {
            return match info.state {
                RemoteBatchState::Queued => Ok(Poll::Pending { processing: false }),
                RemoteBatchState::InProgress => Ok(Poll::Pending { processing: true }),
                RemoteBatchState::Completed => Ok(Poll::Finished),
                RemoteBatchState::Failed => Err(Error::new(ErrorKind::Job(format!(
                    "batch {batch_id} failed: {}",
                    info.error_message.as_deref().unwrap_or("no reason given")
                )))),
                RemoteBatchState::NotProcessed if self.calls.is_cancelled() => {
                    Err(Error::cancelled())
                }
                RemoteBatchState::NotProcessed => Err(Error::new(ErrorKind::Job(format!(
                    "batch {batch_id} was not processed"
                )))),
            };
        }

        match status.state {
            JobState::JobComplete => Ok(Poll::Finished),
            JobState::Failed => Err(Error::new(ErrorKind::Job(format!(
                "job {} failed before batch {batch_id} finished",
                self.job
            )))),
            JobState::Aborted => Err(Error::cancelled()),
            JobState::InProgress => Ok(Poll::Pending { processing: true }),
            JobState::Open | JobState::UploadComplete => Ok(Poll::Pending { processing: false }),
        }
    }

    fn transition(&mut self, state: BatchState) {
        debug!(from = %self.state, to = %state, batch_id = ?self.batch_id, "Batch state");
        self.state = state;
        self.progress.emit(
            &self.batch.object_name,
            self.batch.sequence,
            self.batch_id.as_ref(),
            state,
        );
    }

    fn finish(self, results: Vec<BatchResult>, error: Option<Error>) -> BatchOutcome {
        BatchOutcome {
            sequence: self.batch.sequence,
            batch_id: self.batch_id,
            state: self.state,
            results,
            error,
        }
    }
}

/// Pair row `i` of the server's results with record `i` of the batch.
fn correlate(batch: &Batch, rows: Vec<RowResult>) -> Vec<BatchResult> {
    if rows.len() != batch.records.len() {
        warn!(
            expected = batch.records.len(),
            received = rows.len(),
            "Result row count does not match batch"
        );
    }

    let mut rows = rows.into_iter();
    batch
        .records
        .iter()
        .enumerate()
        .map(|(index, record)| match rows.next() {
            Some(row) => BatchResult::from_row(&record.client_row_id, row),
            None => BatchResult::failed(
                &record.client_row_id,
                MISSING_RESULT,
                format!("no result returned for row {index}"),
            ),
        })
        .collect()
}
