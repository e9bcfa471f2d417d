//! Transport failures and the retry budget.

use super::common::*;
use busbar_sf_jobs::mock::{CallKind, InMemoryJobClient};
use busbar_sf_loader::{FailureKind, LoadOrchestrator, ObjectStatus, RetryConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn load_with_failures(kind: CallKind, times: u32) -> (busbar_sf_loader::LoadResult, usize) {
    let client = Arc::new(InMemoryJobClient::new().fail_transport(kind, times));
    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().build())
        .load(&CancellationToken::new(), &[accounts(3)])
        .await
        .unwrap();
    let calls = client.call_count(kind).await;
    (result, calls)
}

#[tokio::test(start_paused = true)]
async fn test_upload_retry_bound() {
    init_tracing();
    for k in 0..=4u32 {
        let (result, uploads) = load_with_failures(CallKind::UploadBatch, k).await;
        let account = result.object("Account").unwrap();

        if k < 3 {
            assert_eq!(account.status, ObjectStatus::Completed, "k={k}");
            assert_eq!(uploads, k as usize + 1);
        } else {
            assert_eq!(account.status, ObjectStatus::Failed, "k={k}");
            assert_eq!(account.error.as_ref().unwrap().kind, FailureKind::Transport);
            assert_eq!(uploads, 3);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_status_poll_retry_bound() {
    for k in 0..=4u32 {
        let (result, _) = load_with_failures(CallKind::GetJobStatus, k).await;
        let status = result.object("Account").unwrap().status;
        let expected = if k < 3 {
            ObjectStatus::Completed
        } else {
            ObjectStatus::Failed
        };
        assert_eq!(status, expected, "k={k}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_job_creation_is_not_retried() {
    let (result, creates) = load_with_failures(CallKind::CreateJob, 1).await;
    let account = result.object("Account").unwrap();
    assert_eq!(account.status, ObjectStatus::Failed);
    assert_eq!(account.error.as_ref().unwrap().kind, FailureKind::Transport);
    assert_eq!(account.unprocessed(), 3);
    assert_eq!(creates, 1);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_errors_are_not_retried() {
    let client = Arc::new(InMemoryJobClient::new().fail_permanently(
        CallKind::UploadBatch,
        "Account",
        "InvalidBatch : Records not processed",
    ));

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().with_retry(RetryConfig::default().with_max_attempts(5)).build())
        .load(&CancellationToken::new(), &[accounts(1)])
        .await
        .unwrap();

    let account = result.object("Account").unwrap();
    assert_eq!(account.status, ObjectStatus::Failed);
    assert_eq!(account.error.as_ref().unwrap().kind, FailureKind::Job);
    assert_eq!(client.call_count(CallKind::UploadBatch).await, 1);
}
