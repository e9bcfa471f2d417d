//! # busbar-sf-jobs
//!
//! The contract between the bulk load orchestrator and the application's
//! Salesforce Bulk API client.
//!
//! ## Contents
//!
//! - **[`JobClient`]** - the six job calls the orchestrator drives
//! - **Records** - ordered field maps with lookups into other objects
//! - **Job/batch status and per-row results**
//! - **Errors** - transport vs. terminal classification
//! - **Retry** - exponential backoff with jitter
//!
//! With the `mock` feature, [`mock::InMemoryJobClient`] provides a
//! scriptable client that never touches the network.
//!
//! ## Example - Implementing a client
//!
//! ```rust,ignore
//! use busbar_sf_jobs::{JobClient, CreateJobRequest, JobHandle, Result};
//!
//! struct MyBulkClient { /* HTTP client, session */ }
//!
//! #[async_trait::async_trait]
//! impl JobClient for MyBulkClient {
//!     async fn create_job(&self, request: &CreateJobRequest) -> Result<JobHandle> {
//!         // POST /services/async/62.0/job
//!         # unimplemented!()
//!     }
//!     // ...
//! }
//! ```

mod client;
mod error;
mod retry;
mod types;

#[cfg(feature = "mock")]
pub mod mock;

pub use client::JobClient;
pub use error::{Error, ErrorKind, Result};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy};
pub use types::*;
