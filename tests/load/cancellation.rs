//! Cancellation and the overall deadline.

use super::common::*;
use busbar_sf_jobs::mock::{CallKind, InMemoryJobClient};
use busbar_sf_loader::{BatchState, LoadOrchestrator, ObjectStatus, PollConfig, ProgressReporter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_secs(2);

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run() {
    init_tracing();
    let client = Arc::new(InMemoryJobClient::new().never_completing());
    let cancel = CancellationToken::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let orchestrator = LoadOrchestrator::new(client.clone())
        .with_options(
            options()
                .with_max_batch_size(2)
                .with_poll(PollConfig::fixed(POLL))
                .build(),
        )
        .with_progress(ProgressReporter::from_channel(tx));
    let requests = vec![accounts(5), contacts(4, 5)];

    let task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { orchestrator.load(&cancel, &requests).await })
    };

    tokio::time::sleep(Duration::from_secs(9)).await;
    let cancelled_at = Instant::now();
    cancel.cancel();
    let result = task.await.unwrap().unwrap();

    assert!(cancelled_at.elapsed() <= POLL);
    assert!(result.cancelled);
    assert!(!result.deadline_exceeded);
    assert_eq!(result.object("Account").unwrap().status, ObjectStatus::Cancelled);
    assert_eq!(result.object("Contact").unwrap().status, ObjectStatus::Skipped);
    assert_eq!(client.call_count(CallKind::AbortJob).await, 1);
    assert_eq!(client.call_count(CallKind::CreateJob).await, 1);

    // no batch is left in flight
    let mut last_state = HashMap::new();
    while let Ok(event) = rx.try_recv() {
        last_state.insert(event.batch_sequence, event.state);
    }
    assert_eq!(last_state.len(), 3);
    assert!(last_state.values().all(|s| *s == BatchState::Aborted));
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_the_load() {
    init_tracing();
    let client = Arc::new(InMemoryJobClient::new().never_completing());
    let started = Instant::now();

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().with_deadline(Duration::from_secs(30)).build())
        .load(&CancellationToken::new(), &[accounts(2)])
        .await
        .unwrap();

    assert!(result.cancelled);
    assert!(result.deadline_exceeded);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(started.elapsed() <= Duration::from_secs(31));
    assert_eq!(result.object("Account").unwrap().status, ObjectStatus::Cancelled);
    assert_eq!(client.call_count(CallKind::AbortJob).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_not_reached() {
    let client = Arc::new(InMemoryJobClient::new());

    let result = LoadOrchestrator::new(client)
        .with_options(options().with_deadline(Duration::from_secs(600)).build())
        .load(&CancellationToken::new(), &[accounts(2)])
        .await
        .unwrap();

    assert!(!result.cancelled);
    assert!(!result.deadline_exceeded);
    assert!(result.is_complete_success());
}
