//! Loading only what failed last time.

use super::common::*;
use busbar_sf_jobs::mock::InMemoryJobClient;
use busbar_sf_loader::{LoadOrchestrator, ObjectStatus, Record, RecordError};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Fails Account `a1`, and every Contact submitted without an AccountId.
fn flaky_org() -> InMemoryJobClient {
    InMemoryJobClient::new().with_record_rule(|object, record: &Record| match object {
        "Account" if record.client_row_id == "a1" => {
            Some(RecordError::new("DUPLICATES_DETECTED", "Use one of these records?"))
        }
        "Contact" if record.get("AccountId") == Some(&Value::Null) => {
            Some(RecordError::new("REQUIRED_FIELD_MISSING", "AccountId"))
        }
        _ => None,
    })
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_never_touches_succeeded_records() {
    init_tracing();
    let requests = vec![accounts(3), contacts(6, 3)];

    let first_client = Arc::new(flaky_org());
    let first = LoadOrchestrator::new(first_client.clone())
        .with_options(options().with_max_batch_size(2).build())
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap();

    let account = first.object("Account").unwrap();
    assert_eq!(account.status, ObjectStatus::PartiallySucceeded);
    assert_eq!((account.succeeded, account.failed), (2, 1));

    // c1 and c4 pointed at a1 and were sent with a null AccountId
    let contact = first.object("Contact").unwrap();
    assert_eq!(contact.warnings.len(), 2);
    let failed: Vec<&str> = contact.failures().map(|r| r.client_row_id.as_str()).collect();
    assert_eq!(failed, vec!["c1", "c4"]);

    let follow_up = first.resubmission(&requests);
    let succeeded: HashSet<(String, String)> = first
        .per_object
        .iter()
        .flat_map(|(object, o)| {
            o.results
                .iter()
                .filter(|r| r.success)
                .map(move |r| (object.clone(), r.client_row_id.clone()))
        })
        .collect();

    let second_client = Arc::new(InMemoryJobClient::new());
    let second = LoadOrchestrator::new(second_client.clone())
        .with_options(options().build())
        .load(&CancellationToken::new(), &follow_up)
        .await
        .unwrap();
    assert!(second.is_complete_success());

    for object in ["Account", "Contact"] {
        for record in second_client.uploaded_records(object).await {
            assert!(
                !succeeded.contains(&(object.to_string(), record.client_row_id.clone())),
                "{object} {} was loaded twice",
                record.client_row_id
            );
        }
    }

    // the retried contacts point at the account created by the second run
    let new_a1 = second_client.assigned_id("Account", "a1").await.unwrap();
    let contacts = second_client.uploaded_records("Contact").await;
    assert_eq!(contacts.len(), 2);
    assert!(contacts
        .iter()
        .all(|c| c.get("AccountId") == Some(&Value::String(new_a1.clone()))));

    // and nothing is left after a clean second run
    assert!(second.resubmission(&follow_up).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_reuses_ids_from_first_run() {
    let requests = vec![accounts(2), contacts(2, 2)];
    let client = Arc::new(InMemoryJobClient::new().with_record_rule(|object, record| {
        (object == "Contact" && record.client_row_id == "c0")
            .then(|| RecordError::new("INVALID_EMAIL_ADDRESS", "Email: invalid"))
    }));

    let first = LoadOrchestrator::new(client.clone())
        .with_options(options().build())
        .load(&CancellationToken::new(), &requests)
        .await
        .unwrap();
    let follow_up = first.resubmission(&requests);

    // accounts all succeeded, so only the contact is left, pointing at a0's id
    assert_eq!(follow_up.len(), 1);
    let retry = &follow_up[0].records[0];
    assert_eq!(retry.client_row_id, "c0");
    assert!(retry.lookups.is_empty());
    assert_eq!(
        retry.get("AccountId").and_then(Value::as_str),
        client.assigned_id("Account", "a0").await.as_deref()
    );
}
