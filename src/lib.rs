//! # busbar-sf-load
//!
//! Dependency-ordered Salesforce bulk data loading for Rust.
//!
//! The loader never talks HTTP itself: the application implements
//! [`jobs::JobClient`] over its Bulk API client and hands it to the
//! orchestrator.
//!
//! ## Crates
//!
//! - **busbar-sf-jobs** - JobClient contract, records, job status, retry policy
//! - **busbar-sf-loader** - Dependency graph, batch splitting, concurrent batch
//!   runners, wave orchestration, results and resubmission
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use busbar_sf_load::{LoadOptions, LoadOrchestrator, LoadRequest, Operation, Record};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = std::sync::Arc::new(MyBulkClient::connect().await?);
//!
//!     let requests = vec![
//!         LoadRequest::new("Account", Operation::Insert)
//!             .with_records([Record::new("a1").with_field("Name", "Acme")]),
//!         LoadRequest::new("Contact", Operation::Insert).with_records([Record::new("c1")
//!             .with_field("LastName", "Smith")
//!             .with_lookup("AccountId", "Account", "a1")]),
//!     ];
//!
//!     let result = LoadOrchestrator::new(client)
//!         .with_options(LoadOptions::builder().with_batch_concurrency(3).build())
//!         .load(&CancellationToken::new(), &requests)
//!         .await?;
//!
//!     // retry whatever did not make it
//!     let follow_up = result.resubmission(&requests);
//!     println!("{} records to resubmit", follow_up.iter().map(|r| r.records.len()).sum::<usize>());
//!     Ok(())
//! }
//! ```

#[cfg(feature = "jobs")]
pub use busbar_sf_jobs as jobs;
#[cfg(feature = "loader")]
pub use busbar_sf_loader as loader;

#[cfg(feature = "loader")]
pub use busbar_sf_loader::{
    load, LoadOptions, LoadOrchestrator, LoadRequest, LoadResult, ObjectResult, ObjectStatus,
    ProgressEvent, ProgressReporter,
};

#[cfg(feature = "jobs")]
pub use busbar_sf_jobs::{JobClient, LookupRef, Operation, Record};
