//! # busbar-sf-loader
//!
//! Dependency-ordered, concurrent bulk loads into Salesforce.
//!
//! Given one [`LoadRequest`] per object, the loader works out which
//! objects must exist before others (records declare [`LookupRef`]s into
//! other objects), loads them in waves, and substitutes the ids created in
//! earlier waves into the lookup fields of later ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   LoadOrchestrator                          │
//! │  - validation, DependencyGraph waves, lookup resolution     │
//! │  - fail-fast, deadline, cancellation, checkpoints           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  one per object, wave by wave
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ObjectLoadCoordinator                       │
//! │  - one job per object, BatchSplitter, close after uploads   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  one per batch, bounded
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      BatchRunner                            │
//! │  Created → Queued → InProgress → Completed|Failed|Aborted   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    JobClient (busbar-sf-jobs)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use busbar_sf_loader::{load, LoadOptions, LoadRequest, Operation, Record};
//! use tokio_util::sync::CancellationToken;
//!
//! let accounts = LoadRequest::new("Account", Operation::Insert)
//!     .with_records([Record::new("a1").with_field("Name", "Acme")]);
//! let contacts = LoadRequest::new("Contact", Operation::Insert).with_records([
//!     Record::new("c1")
//!         .with_field("LastName", "Smith")
//!         .with_lookup("AccountId", "Account", "a1"),
//! ]);
//!
//! let result = load(client, &CancellationToken::new(), &[accounts, contacts], LoadOptions::default()).await?;
//! for (object, outcome) in &result.per_object {
//!     println!("{object}: {} ok, {} failed", outcome.succeeded, outcome.failed);
//! }
//! ```

mod checkpoint;
mod config;
mod coordinator;
mod error;
mod graph;
mod limiter;
mod orchestrator;
mod progress;
mod request;
mod result;
mod runner;
mod splitter;

pub use checkpoint::{CheckpointHook, HookError, LoadCheckpoint};
pub use config::{
    LoadOptions, LoadOptionsBuilder, OversizedRecordPolicy, PollConfig, UnresolvedReferencePolicy,
    DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_SIZE,
};
pub use error::{Error, ErrorKind, Result};
pub use graph::DependencyGraph;
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::{load, LoadOrchestrator};
pub use progress::{BatchState, ProgressEvent, ProgressReporter};
pub use request::LoadRequest;
pub use result::{
    BatchResult, FailureKind, LoadResult, LoadWarning, ObjectFailure, ObjectResult, ObjectStatus,
    MISSING_RESULT, OVERSIZED_RECORD,
};
pub use splitter::{split, Batch, BatchLimits, BatchSplitter};

// The record and job types a caller needs to build requests.
pub use busbar_sf_jobs::{
    BackoffStrategy, JobClient, LookupRef, Operation, Record, RecordError, RetryConfig,
};
