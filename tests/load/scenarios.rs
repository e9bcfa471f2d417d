//! Dependency-ordered loads, cycles and validation.

use super::common::*;
use busbar_sf_jobs::mock::{CallKind, InMemoryJobClient};
use busbar_sf_load::{LoadOrchestrator, ObjectStatus};
use busbar_sf_loader::{BatchState, ErrorKind, LoadRequest, Operation, ProgressReporter, Record};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_accounts_then_contacts() {
    init_tracing();
    let client = Arc::new(InMemoryJobClient::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let requests = vec![contacts(5, 3), accounts(3)];

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().with_max_batch_size(2).build())
        .with_progress(ProgressReporter::from_channel(tx))
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap();

    assert!(result.is_complete_success());
    assert_eq!(result.total(), 8);
    assert_eq!(result.succeeded(), 8);

    // wave 1 finishes before wave 2 starts
    let calls = client.calls().await;
    let account_done = last_position(&calls, CallKind::GetBatchResults, "Account").unwrap();
    let contact_start = position(&calls, CallKind::CreateJob, "Contact").unwrap();
    assert!(account_done < contact_start);

    let mut account_sizes = client.batch_sizes("Account").await;
    account_sizes.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(account_sizes, vec![2, 1]);
    let mut contact_sizes = client.batch_sizes("Contact").await;
    contact_sizes.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(contact_sizes, vec![2, 2, 1]);

    // every contact carries the id its account really received
    let account_ids = result.object("Account").unwrap().resolved_ids();
    for contact in client.uploaded_records("Contact").await {
        let index: usize = contact.client_row_id[1..].parse().unwrap();
        let target = format!("a{}", index % 3);
        let expected = client.assigned_id("Account", &target).await.unwrap();
        assert_eq!(contact.get("AccountId"), Some(&Value::String(expected.clone())));
        assert_eq!(account_ids[&target], expected);
        assert!(contact.lookups.is_empty());
    }

    // results come back in submission order
    let rows: Vec<&str> = result
        .object("Contact")
        .unwrap()
        .results
        .iter()
        .map(|r| r.client_row_id.as_str())
        .collect();
    assert_eq!(rows, vec!["c0", "c1", "c2", "c3", "c4"]);

    let mut last_state = HashMap::new();
    while let Ok(event) = rx.try_recv() {
        last_state.insert((event.object_name, event.batch_sequence), event.state);
    }
    assert_eq!(last_state.len(), 5);
    assert!(last_state.values().all(|s| *s == BatchState::Completed));
}

#[tokio::test]
async fn test_cycle_is_rejected_without_calls() {
    init_tracing();
    let client = Arc::new(InMemoryJobClient::new());
    let requests = vec![
        LoadRequest::new("ObjectA__c", Operation::Insert).with_records([Record::new("a1")
            .with_lookup("ObjectB__c", "ObjectB__c", "b1")]),
        LoadRequest::new("ObjectB__c", Operation::Insert).with_records([Record::new("b1")
            .with_lookup("ObjectA__c", "ObjectA__c", "a1")]),
    ];

    let err = LoadOrchestrator::new(client.clone())
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap_err();

    match err.kind {
        ErrorKind::CyclicDependency { objects } => {
            assert_eq!(objects, vec!["ObjectA__c".to_string(), "ObjectB__c".to_string()]);
        }
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(client.calls().await.is_empty());
}

#[tokio::test]
async fn test_upsert_without_external_id_is_rejected_without_calls() {
    init_tracing();
    let client = Arc::new(InMemoryJobClient::new());
    let requests = vec![LoadRequest::new("Account", Operation::Upsert)
        .with_records([Record::new("a1").with_field("Name", "Acme")])];

    let err = busbar_sf_load::load(
        client.clone(),
        &CancellationToken::new(),
        &requests,
        options().build(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err.kind, ErrorKind::Validation { .. }));
    assert!(err.to_string().contains("Account"));
    assert!(client.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_upsert_passes_external_id_to_job() {
    let client = Arc::new(InMemoryJobClient::new());
    let requests = vec![LoadRequest::new("Account", Operation::Upsert)
        .with_external_id_field("Legacy_Id__c")
        .with_records([
            Record::new("a1").with_field("Legacy_Id__c", "L-1"),
            Record::new("a2").with_field("Legacy_Id__c", 2),
        ])];

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().build())
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap();

    assert!(result.is_complete_success());
    let jobs = client.created_jobs().await;
    assert_eq!(jobs[0].external_id_field_name.as_deref(), Some("Legacy_Id__c"));
}

#[tokio::test(start_paused = true)]
async fn test_self_reference_is_left_unresolved() {
    init_tracing();
    let client = Arc::new(InMemoryJobClient::new());
    let requests = vec![
        LoadRequest::new("Account", Operation::Insert).with_records([
            Record::new("parent").with_field("Name", "Parent"),
            Record::new("child")
                .with_field("Name", "Child")
                .with_lookup("ParentId", "Account", "parent"),
        ]),
        LoadRequest::new("Contact", Operation::Insert).with_records([Record::new("c1")
            .with_field("LastName", "Smith")
            .with_lookup("AccountId", "Account", "child")]),
    ];

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().build())
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap();

    let account = result.object("Account").unwrap();
    assert_eq!(account.status, ObjectStatus::Completed);
    assert_eq!(account.warnings.len(), 1);

    let uploaded = client.uploaded_records("Account").await;
    assert_eq!(uploaded[1].get("ParentId"), Some(&Value::Null));

    let contact = &client.uploaded_records("Contact").await[0];
    assert_eq!(
        contact.get("AccountId").and_then(Value::as_str),
        client.assigned_id("Account", "child").await.as_deref()
    );
}

#[tokio::test(start_paused = true)]
async fn test_batch_failure_stays_with_its_object() {
    init_tracing();
    let client = Arc::new(InMemoryJobClient::new().fail_batches_remotely("Lead"));
    let requests = vec![
        accounts(2),
        LoadRequest::new("Lead", Operation::Insert)
            .with_records([Record::new("l1").with_field("LastName", "Lead")]),
    ];

    let result = LoadOrchestrator::new(client.clone())
        .with_options(options().build())
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap();

    let lead = result.object("Lead").unwrap();
    assert_eq!(lead.status, ObjectStatus::Failed);
    assert_eq!(lead.unprocessed(), 1);
    assert!(lead.error.as_ref().unwrap().message.contains("InvalidBatch"));

    assert_eq!(result.object("Account").unwrap().status, ObjectStatus::Completed);
    assert_eq!(result.failed_objects().count(), 1);
    assert!(!result.fail_fast_tripped);
}
