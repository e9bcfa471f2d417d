//! Load configuration.

use busbar_sf_jobs::{BackoffStrategy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Rows per batch accepted by the Bulk API.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Encoded bytes per batch accepted by the Bulk API.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 10_000_000;

/// Configuration for one load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Concurrent batches per object.
    pub batch_concurrency: usize,
    /// Concurrent objects per wave.
    pub object_concurrency: usize,
    /// Maximum rows per batch.
    pub max_batch_size: usize,
    /// Maximum encoded bytes per batch.
    pub max_batch_bytes: usize,
    /// Skip later waves once any record or object fails.
    pub fail_fast: bool,
    /// Overall time budget, measured from the start of the load.
    pub deadline: Option<Duration>,
    /// Retry of transport failures.
    pub retry: RetryConfig,
    /// Job status polling.
    pub poll: PollConfig,
    /// What to do with a lookup whose target was not created.
    pub unresolved_references: UnresolvedReferencePolicy,
    /// What to do with a record larger than `max_batch_bytes`.
    pub oversized_records: OversizedRecordPolicy,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_concurrency: 5,
            object_concurrency: 3,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            fail_fast: false,
            deadline: None,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            unresolved_references: UnresolvedReferencePolicy::default(),
            oversized_records: OversizedRecordPolicy::default(),
        }
    }
}

impl LoadOptions {
    /// Create a new options builder.
    pub fn builder() -> LoadOptionsBuilder {
        LoadOptionsBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.batch_concurrency == 0 {
            return Err(Error::validation(None, "batch_concurrency must be at least 1"));
        }
        if self.object_concurrency == 0 {
            return Err(Error::validation(None, "object_concurrency must be at least 1"));
        }
        if self.max_batch_size == 0 {
            return Err(Error::validation(None, "max_batch_size must be at least 1"));
        }
        if self.max_batch_bytes == 0 {
            return Err(Error::validation(None, "max_batch_bytes must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for LoadOptions.
#[derive(Debug, Default)]
pub struct LoadOptionsBuilder {
    options: LoadOptions,
}

impl LoadOptionsBuilder {
    /// Set concurrent batches per object.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.options.batch_concurrency = concurrency;
        self
    }

    /// Set concurrent objects per wave.
    pub fn with_object_concurrency(mut self, concurrency: usize) -> Self {
        self.options.object_concurrency = concurrency;
        self
    }

    /// Set the maximum rows per batch.
    pub fn with_max_batch_size(mut self, rows: usize) -> Self {
        self.options.max_batch_size = rows;
        self
    }

    /// Set the maximum encoded bytes per batch.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.options.max_batch_bytes = bytes;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.options.fail_fast = fail_fast;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.options.deadline = Some(deadline);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.options.poll = poll;
        self
    }

    pub fn with_unresolved_references(mut self, policy: UnresolvedReferencePolicy) -> Self {
        self.options.unresolved_references = policy;
        self
    }

    pub fn with_oversized_records(mut self, policy: OversizedRecordPolicy) -> Self {
        self.options.oversized_records = policy;
        self
    }

    /// Build the load options.
    pub fn build(self) -> LoadOptions {
        self.options
    }
}

/// Backoff schedule for job status polling.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wait before the first poll.
    pub initial_interval: Duration,
    /// Longest wait between polls.
    pub max_interval: Duration,
    pub backoff: BackoffStrategy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            backoff: BackoffStrategy::ExponentialWithJitter { factor: 2.0 },
        }
    }
}

impl PollConfig {
    /// Fixed interval without growth or jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            backoff: BackoffStrategy::Constant,
        }
    }

    /// Delay before poll number `poll` (0-indexed).
    pub fn interval(&self, poll: u32) -> Duration {
        self.backoff
            .delay(poll, self.initial_interval, self.max_interval)
    }
}

/// Value written to a lookup field whose target record has no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnresolvedReferencePolicy {
    /// Submit the field as an explicit null.
    #[default]
    SetNull,
    /// Drop the field from the record.
    Omit,
}

/// Handling of a single record larger than the batch byte ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OversizedRecordPolicy {
    /// Submit it alone and let the API decide.
    #[default]
    Submit,
    /// Fail the record without submitting it.
    FailRecord,
}
