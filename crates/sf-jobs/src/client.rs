//! The job client contract.
//!
//! The loader never issues HTTP itself. The application supplies a
//! [`JobClient`] that maps these six calls onto the vendor Bulk API and
//! classifies failures through [`ErrorKind`](crate::ErrorKind): transport
//! failures (timeouts, connection resets, 5xx, throttling) are retried by
//! the loader, everything else is terminal for the batch.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{BatchId, CreateJobRequest, JobHandle, JobStatus, Record, RowResult};

/// Thin interface to a Bulk API job.
///
/// Operation and object are job-scoped: one [`JobHandle`] owns many batches.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Create a job for one object and operation.
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobHandle>;

    /// Upload one batch of records; returns the server's batch id.
    async fn upload_batch(&self, job: &JobHandle, records: &[Record]) -> Result<BatchId>;

    /// Mark the job as fully uploaded.
    async fn close_job(&self, job: &JobHandle) -> Result<()>;

    /// Current job and batch states.
    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus>;

    /// Per-row results of a finished batch, in submission order.
    async fn get_batch_results(&self, job: &JobHandle, batch: &BatchId) -> Result<Vec<RowResult>>;

    /// Abort the job.
    async fn abort_job(&self, job: &JobHandle) -> Result<()>;
}

#[async_trait]
impl<T: JobClient + ?Sized> JobClient for Arc<T> {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobHandle> {
        (**self).create_job(request).await
    }

    async fn upload_batch(&self, job: &JobHandle, records: &[Record]) -> Result<BatchId> {
        (**self).upload_batch(job, records).await
    }

    async fn close_job(&self, job: &JobHandle) -> Result<()> {
        (**self).close_job(job).await
    }

    async fn get_job_status(&self, job: &JobHandle) -> Result<JobStatus> {
        (**self).get_job_status(job).await
    }

    async fn get_batch_results(&self, job: &JobHandle, batch: &BatchId) -> Result<Vec<RowResult>> {
        (**self).get_batch_results(job, batch).await
    }

    async fn abort_job(&self, job: &JobHandle) -> Result<()> {
        (**self).abort_job(job).await
    }
}
