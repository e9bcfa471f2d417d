//! Loads one object: one job, many batches.

use busbar_sf_jobs::{JobClient, JobHandle};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{LoadOptions, OversizedRecordPolicy, PollConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::limiter::ConcurrencyLimiter;
use crate::progress::{BatchState, ProgressReporter};
use crate::request::LoadRequest;
use crate::result::{BatchResult, LoadWarning, ObjectFailure, ObjectResult, ObjectStatus, OVERSIZED_RECORD};
use crate::runner::{BatchOutcome, BatchRunner, CallContext, JobAbort};
use crate::splitter::{Batch, BatchLimits, BatchSplitter};

/// Runs the batches of one [`LoadRequest`] through a single job.
#[derive(Clone)]
pub(crate) struct ObjectLoadCoordinator {
    client: Arc<dyn JobClient>,
    calls: CallContext,
    poll: PollConfig,
    splitter: BatchSplitter,
    batch_concurrency: usize,
    oversized_records: OversizedRecordPolicy,
    progress: ProgressReporter,
}

impl ObjectLoadCoordinator {
    pub(crate) fn new(
        client: Arc<dyn JobClient>,
        options: &LoadOptions,
        calls: CallContext,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            client,
            calls,
            poll: options.poll.clone(),
            splitter: BatchSplitter::new(BatchLimits {
                max_rows: options.max_batch_size,
                max_bytes: options.max_batch_bytes,
            }),
            batch_concurrency: options.batch_concurrency,
            oversized_records: options.oversized_records,
            progress,
        }
    }

    /// Load `request`, whose lookups are already resolved.
    ///
    /// Never returns an error: object-level failures are recorded in the
    /// result so the rest of the wave carries on.
    #[instrument(
        name = "object",
        skip_all,
        fields(
            object = %request.object_name,
            operation = %request.operation,
            records = request.records.len(),
        )
    )]
    pub(crate) async fn run(&self, request: LoadRequest, mut warnings: Vec<LoadWarning>) -> ObjectResult {
        let total = request.records.len();
        let job_request = request.job_request();

        // not idempotent, so never retried
        let job = self
            .calls
            .call_once("create_job", self.client.create_job(&job_request))
            .await;
        let job = match job {
            Ok(job) => job,
            Err(err) => {
                warn!(error = %err, "Failed to create job");
                return aggregate(total, Vec::new(), Some(err), warnings, self.calls.is_cancelled());
            }
        };
        info!(job = %job, "Job created");

        let batches = self.splitter.split(&request.object_name, request.records);
        let (batches, mut outcomes) = self.withhold_oversized(batches, &mut warnings);
        debug!(batches = batches.len(), "Records split");

        let abort = Arc::new(JobAbort::default());
        let concurrency = if request.serial_mode {
            1
        } else {
            self.batch_concurrency
        };
        let (ran, close_error) = self.run_batches(&job, batches, &abort, concurrency).await;
        outcomes.extend(ran);

        if self.calls.is_cancelled() && !abort.issued() {
            abort.abort(&*self.client, &job).await;
        }

        let result = aggregate(total, outcomes, close_error, warnings, self.calls.is_cancelled());
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            status = ?result.status,
            "Object finished"
        );
        result
    }

    /// Up to `concurrency` batches at a time, each holding a slot until it
    /// finishes or the job stops reporting per-batch states. The job is
    /// closed as soon as every batch has been uploaded.
    ///
    /// With one slot, batches upload in order and each finishes before the
    /// next upload whenever the job reports batch states.
    async fn run_batches(
        &self,
        job: &JobHandle,
        batches: Vec<Batch>,
        abort: &Arc<JobAbort>,
        concurrency: usize,
    ) -> (Vec<BatchOutcome>, Option<Error>) {
        let limiter = ConcurrencyLimiter::new(concurrency);
        let (uploaded_tx, mut uploaded_rx) = mpsc::channel::<()>(1);
        let mut tasks = JoinSet::new();

        for batch in batches {
            let Some(slot) = limiter.acquire(self.calls.cancel()).await else {
                break;
            };
            let runner = self
                .runner(job, batch, abort)
                .with_upload_signal(uploaded_tx.clone())
                .with_slot(slot);
            tasks.spawn(runner.run());
        }
        drop(uploaded_tx);

        // every sender is gone once each runner is past its upload
        while uploaded_rx.recv().await.is_some() {}
        let close_error = self.close(job).await.err();

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => error!(error = %err, "Batch task failed"),
            }
        }
        (outcomes, close_error)
    }

    async fn close(&self, job: &JobHandle) -> Result<()> {
        if self.calls.is_cancelled() {
            return Ok(());
        }
        let client = &*self.client;
        let result = self
            .calls
            .call("close_job", move || client.close_job(job))
            .await;
        match &result {
            Ok(()) => debug!(job = %job, "Job closed"),
            Err(err) if err.is_cancelled() => return Ok(()),
            Err(err) => warn!(job = %job, error = %err, "Failed to close job"),
        }
        result
    }

    fn runner(&self, job: &JobHandle, batch: Batch, abort: &Arc<JobAbort>) -> BatchRunner {
        BatchRunner::new(
            self.client.clone(),
            job.clone(),
            batch,
            self.calls.clone(),
            self.poll.clone(),
            self.progress.clone(),
            abort.clone(),
        )
    }

    /// Warn about oversized records and, if asked to, fail them here
    /// instead of submitting them.
    fn withhold_oversized(
        &self,
        batches: Vec<Batch>,
        warnings: &mut Vec<LoadWarning>,
    ) -> (Vec<Batch>, Vec<BatchOutcome>) {
        let max_bytes = self.splitter.limits().max_bytes;
        let mut submit = Vec::with_capacity(batches.len());
        let mut withheld = Vec::new();

        for batch in batches {
            if !batch.oversized {
                submit.push(batch);
                continue;
            }
            for record in &batch.records {
                warn!(
                    client_row_id = %record.client_row_id,
                    encoded_bytes = batch.encoded_bytes,
                    max_bytes,
                    "Record exceeds the batch byte limit"
                );
                warnings.push(LoadWarning::OversizedRecord {
                    client_row_id: record.client_row_id.clone(),
                    encoded_bytes: batch.encoded_bytes,
                    max_bytes,
                });
            }
            match self.oversized_records {
                OversizedRecordPolicy::Submit => submit.push(batch),
                OversizedRecordPolicy::FailRecord => withheld.push(BatchOutcome {
                    sequence: batch.sequence,
                    batch_id: None,
                    state: BatchState::Failed,
                    results: batch
                        .records
                        .iter()
                        .map(|r| {
                            BatchResult::failed(
                                &r.client_row_id,
                                OVERSIZED_RECORD,
                                format!(
                                    "record is {} bytes, the batch limit is {max_bytes}",
                                    batch.encoded_bytes
                                ),
                            )
                        })
                        .collect(),
                    error: None,
                }),
            }
        }
        (submit, withheld)
    }
}

/// Fold batch outcomes, in submission order, into the object's result.
fn aggregate(
    total: usize,
    mut outcomes: Vec<BatchOutcome>,
    extra_error: Option<Error>,
    warnings: Vec<LoadWarning>,
    cancelled: bool,
) -> ObjectResult {
    outcomes.sort_by_key(|o| o.sequence);

    let mut results = Vec::with_capacity(total);
    let mut first_error: Option<Error> = None;
    let mut aborted = false;
    for outcome in outcomes {
        aborted |= outcome.state == BatchState::Aborted;
        results.extend(outcome.results);
        if let Some(err) = outcome.error {
            if !err.is_cancelled() && first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    if first_error.is_none() {
        first_error = extra_error.filter(|e| !e.is_cancelled());
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = results.len() - succeeded;
    let unfinished = total > results.len();

    let (status, error) = if aborted || (cancelled && unfinished) {
        (
            ObjectStatus::Cancelled,
            Some(ObjectFailure::from(&Error::new(ErrorKind::Cancelled))),
        )
    } else if let Some(err) = &first_error {
        (ObjectStatus::Failed, Some(ObjectFailure::from(err)))
    } else if failed == 0 {
        (ObjectStatus::Completed, None)
    } else if succeeded == 0 {
        (ObjectStatus::RecordsFailed, None)
    } else {
        (ObjectStatus::PartiallySucceeded, None)
    };

    ObjectResult {
        total,
        succeeded,
        failed,
        results,
        status,
        error,
        warnings,
    }
}
