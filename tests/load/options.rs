//! Fail-fast, concurrency limits, serial mode and checkpoints.

use super::common::*;
use busbar_sf_jobs::mock::{CallKind, InMemoryJobClient};
use busbar_sf_jobs::ConcurrencyMode;
use busbar_sf_loader::{
    LoadOrchestrator, LoadRequest, LoadWarning, ObjectStatus, Operation, Record, RecordError,
    UnresolvedReferencePolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn failing_account() -> InMemoryJobClient {
    InMemoryJobClient::new().with_record_rule(|object, record| {
        (object == "Account" && record.client_row_id == "a0")
            .then(|| RecordError::new("FIELD_CUSTOM_VALIDATION_EXCEPTION", "Name is reserved"))
    })
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_skips_later_waves() {
    init_tracing();
    let client = Arc::new(failing_account());

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().with_fail_fast(true).build())
        .load(&CancellationToken::new(), &[accounts(2), contacts(2, 2)])
        .await
        .unwrap();

    assert!(result.fail_fast_tripped);
    assert!(!result.cancelled);
    assert_eq!(
        result.object("Account").unwrap().status,
        ObjectStatus::PartiallySucceeded
    );
    let contact = result.object("Contact").unwrap();
    assert_eq!(contact.status, ObjectStatus::Skipped);
    assert_eq!(contact.unprocessed(), 2);
    assert_eq!(position(&client.calls().await, CallKind::CreateJob, "Contact"), None);
}

#[tokio::test(start_paused = true)]
async fn test_partial_success_continues_without_fail_fast() {
    let client = Arc::new(failing_account());

    let result = LoadOrchestrator::new(client.clone())
        .with_options(
            options()
                .with_unresolved_references(UnresolvedReferencePolicy::Omit)
                .build(),
        )
        .load(&CancellationToken::new(), &[accounts(2), contacts(2, 2)])
        .await
        .unwrap();

    assert!(!result.fail_fast_tripped);
    let contact = result.object("Contact").unwrap();
    assert_eq!(contact.status, ObjectStatus::Completed);
    assert!(matches!(
        &contact.warnings[..],
        [LoadWarning::UnresolvedReference { client_row_id, .. }] if client_row_id == "c0"
    ));

    let uploaded = client.uploaded_records("Contact").await;
    assert!(uploaded[0].get("AccountId").is_none());
    assert!(uploaded[1].get("AccountId").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_object_concurrency_limit() {
    let client = Arc::new(InMemoryJobClient::new().with_polls_until_complete(3));
    let requests: Vec<LoadRequest> = ["Account", "Lead", "Campaign"]
        .into_iter()
        .map(|object| {
            LoadRequest::new(object, Operation::Insert)
                .with_records([Record::new("r1").with_field("Name", object)])
        })
        .collect();

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().with_object_concurrency(1).build())
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap();
    assert!(result.is_complete_success());

    // one object at a time: each job is closed before the next is created
    let calls = client.calls().await;
    let mut open = 0usize;
    for call in &calls {
        match call.kind {
            CallKind::CreateJob => {
                open += 1;
                assert_eq!(open, 1);
            }
            CallKind::CloseJob => open -= 1,
            _ => {}
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_serial_mode_end_to_end() {
    let client = Arc::new(InMemoryJobClient::new());

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().with_max_batch_size(1).with_batch_concurrency(5).build())
        .load(
            &CancellationToken::new(),
            &[accounts(3).with_serial_mode(true)],
        )
        .await
        .unwrap();

    assert!(result.is_complete_success());
    assert_eq!(
        client.created_jobs().await[0].concurrency_mode,
        ConcurrencyMode::Serial
    );
    let calls = client.calls().await;
    let uploads: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind == CallKind::UploadBatch)
        .map(|(i, _)| i)
        .collect();
    let results: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| c.kind == CallKind::GetBatchResults)
        .map(|(i, _)| i)
        .collect();
    // batch n's results arrive before batch n+1 is uploaded
    assert!(results[0] < uploads[1]);
    assert!(results[1] < uploads[2]);
}

/// Load under a one-hour virtual deadline, against a client whose status
/// responses carry no per-batch states.
async fn load_without_batch_states(
    client: &Arc<InMemoryJobClient>,
    concurrency: usize,
    requests: &[LoadRequest],
) -> busbar_sf_loader::LoadResult {
    let orchestrator = LoadOrchestrator::new(client.clone()).with_options(
        options()
            .with_max_batch_size(1)
            .with_batch_concurrency(concurrency)
            .build(),
    );
    let cancel = CancellationToken::new();
    let result = tokio::time::timeout(Duration::from_secs(3600), orchestrator.load(&cancel, requests))
        .await
        .expect("load finished within the hour");
    result.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_job_level_status_with_more_batches_than_slots() {
    let client = Arc::new(InMemoryJobClient::new().without_batch_states());

    let result = load_without_batch_states(&client, 1, &[accounts(3), contacts(2, 3)]).await;

    assert!(result.is_complete_success());
    assert_eq!(client.batch_sizes("Account").await, vec![1, 1, 1]);
    let uploaded = client.uploaded_records("Contact").await;
    assert_eq!(
        uploaded[1].get("AccountId").and_then(|v| v.as_str()),
        client.assigned_id("Account", "a1").await.as_deref()
    );
}

#[tokio::test(start_paused = true)]
async fn test_job_level_status_in_serial_mode() {
    let client = Arc::new(InMemoryJobClient::new().without_batch_states());

    let result = load_without_batch_states(&client, 5, &[accounts(3).with_serial_mode(true)]).await;

    assert!(result.is_complete_success());
    assert_eq!(client.call_count(CallKind::UploadBatch).await, 3);
    let calls = client.calls().await;
    let close = position(&calls, CallKind::CloseJob, "Account").unwrap();
    assert!(last_position(&calls, CallKind::UploadBatch, "Account").unwrap() < close);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_after_each_wave() {
    let client = Arc::new(InMemoryJobClient::new());
    let hook = Arc::new(RecordingCheckpoint::default());

    let result = LoadOrchestrator::new(client)
        .with_options(options().build())
        .with_checkpoint(hook.clone())
        .load(&CancellationToken::new(), &[accounts(2), contacts(2, 2)])
        .await
        .unwrap();

    let seen = hook.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|c| c.run_id == result.run_id && c.total_waves == 2));
    assert_eq!(seen[0].objects, vec!["Account".to_string()]);
    assert_eq!(seen[0].resolved_ids["Account"].len(), 2);
    assert_eq!(seen[1].completed_waves, 2);
    assert_eq!(seen[1].resolved_ids["Contact"].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failing_checkpoint_does_not_fail_load() {
    let hook = Arc::new(RecordingCheckpoint {
        fail: true,
        ..Default::default()
    });

    let result = LoadOrchestrator::new(Arc::new(InMemoryJobClient::new()))
        .with_options(options().build())
        .with_checkpoint(hook.clone())
        .load(&CancellationToken::new(), &[accounts(1)])
        .await
        .unwrap();

    assert!(result.is_complete_success());
    assert_eq!(hook.seen.lock().unwrap().len(), 1);
}
