use async_trait::async_trait;
use busbar_sf_jobs::mock::{Call, CallKind};
use busbar_sf_loader::{
    CheckpointHook, HookError, LoadCheckpoint, LoadOptions, LoadOptionsBuilder, LoadRequest,
    Operation, PollConfig, Record,
};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options with a fixed one-second poll, so virtual time stays readable.
pub fn options() -> LoadOptionsBuilder {
    LoadOptions::builder().with_poll(PollConfig::fixed(Duration::from_secs(1)))
}

pub fn accounts(count: usize) -> LoadRequest {
    LoadRequest::new("Account", Operation::Insert).with_records(
        (0..count).map(|i| Record::new(format!("a{i}")).with_field("Name", format!("Account {i}"))),
    )
}

/// Contact `c{i}` looks up Account `a{i % accounts}`.
pub fn contacts(count: usize, accounts: usize) -> LoadRequest {
    LoadRequest::new("Contact", Operation::Insert).with_records((0..count).map(|i| {
        Record::new(format!("c{i}"))
            .with_field("LastName", format!("Contact {i}"))
            .with_lookup("AccountId", "Account", format!("a{}", i % accounts))
    }))
}

pub fn position(calls: &[Call], kind: CallKind, object: &str) -> Option<usize> {
    calls.iter().position(|c| c.kind == kind && c.object == object)
}

pub fn last_position(calls: &[Call], kind: CallKind, object: &str) -> Option<usize> {
    calls.iter().rposition(|c| c.kind == kind && c.object == object)
}

/// Keeps every checkpoint it is handed.
#[derive(Default)]
pub struct RecordingCheckpoint {
    pub seen: Mutex<Vec<LoadCheckpoint>>,
    pub fail: bool,
}

#[async_trait]
impl CheckpointHook for RecordingCheckpoint {
    async fn checkpoint(&self, checkpoint: &LoadCheckpoint) -> Result<(), HookError> {
        self.seen.lock().unwrap().push(checkpoint.clone());
        if self.fail {
            return Err("checkpoint store unavailable".into());
        }
        Ok(())
    }
}
