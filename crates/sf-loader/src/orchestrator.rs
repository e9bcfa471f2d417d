//! Top-level load: validation, waves, lookup resolution.

use busbar_sf_jobs::JobClient;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointHook, LoadCheckpoint};
use crate::config::{LoadOptions, UnresolvedReferencePolicy};
use crate::coordinator::ObjectLoadCoordinator;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::limiter::ConcurrencyLimiter;
use crate::progress::ProgressReporter;
use crate::request::{validate_submission, LoadRequest};
use crate::result::{LoadResult, LoadWarning, ObjectResult, ObjectStatus};
use crate::runner::CallContext;

/// `object` → `client_row_id` → new id, published after each wave.
type ResolvedIds = HashMap<String, HashMap<String, String>>;

/// Loads a set of objects in dependency order.
///
/// # Example
///
/// ```rust,ignore
/// use busbar_sf_loader::{LoadOptions, LoadOrchestrator, LoadRequest};
/// use tokio_util::sync::CancellationToken;
///
/// let orchestrator = LoadOrchestrator::new(client)
///     .with_options(LoadOptions::builder().with_fail_fast(true).build());
/// let result = orchestrator.load(&CancellationToken::new(), &requests).await?;
/// println!("{} of {} records loaded", result.succeeded(), result.total());
/// ```
#[derive(Clone)]
pub struct LoadOrchestrator {
    client: Arc<dyn JobClient>,
    options: LoadOptions,
    progress: ProgressReporter,
    checkpoint: Option<Arc<dyn CheckpointHook>>,
}

impl std::fmt::Debug for LoadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOrchestrator")
            .field("options", &self.options)
            .field("progress", &self.progress)
            .field("checkpoint", &self.checkpoint.is_some())
            .finish_non_exhaustive()
    }
}

impl LoadOrchestrator {
    pub fn new(client: Arc<dyn JobClient>) -> Self {
        Self {
            client,
            options: LoadOptions::default(),
            progress: ProgressReporter::none(),
            checkpoint: None,
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    /// Receive a [`ProgressEvent`](crate::ProgressEvent) on every batch
    /// state transition.
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Receive a [`LoadCheckpoint`] after every wave.
    pub fn with_checkpoint(mut self, hook: Arc<dyn CheckpointHook>) -> Self {
        self.checkpoint = Some(hook);
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Load `requests`.
    ///
    /// Validation errors and dependency cycles are returned before any job
    /// client call. Everything after that, including cancellation, ends in
    /// `Ok` with the outcome of each object recorded in the [`LoadResult`].
    #[instrument(skip_all, fields(objects = requests.len()))]
    pub async fn load(
        &self,
        cancel: &CancellationToken,
        requests: &[LoadRequest],
    ) -> Result<LoadResult> {
        self.options.validate()?;
        validate_submission(requests)?;
        let graph = DependencyGraph::build(requests);
        let waves = graph.order()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, waves = waves.len(), "Starting load");

        let token = cancel.child_token();
        let deadline_hit = Arc::new(AtomicBool::new(false));
        let timer = self.options.deadline.map(|deadline| {
            let token = token.clone();
            let hit = deadline_hit.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(deadline) => {
                        warn!(deadline_ms = deadline.as_millis() as u64, "Load deadline exceeded");
                        hit.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            })
        });

        let by_name: HashMap<&str, &LoadRequest> = requests
            .iter()
            .map(|r| (r.object_name.as_str(), r))
            .collect();
        let coordinator = ObjectLoadCoordinator::new(
            self.client.clone(),
            &self.options,
            CallContext::new(self.options.retry.clone(), token.clone()),
            self.progress.clone(),
        );
        let objects = ConcurrencyLimiter::new(self.options.object_concurrency);

        let mut resolved = ResolvedIds::new();
        let mut per_object = BTreeMap::new();
        let mut loaded = Vec::new();
        let mut fail_fast_tripped = false;

        for (index, wave) in waves.iter().enumerate() {
            if token.is_cancelled() || fail_fast_tripped {
                debug!(wave = index + 1, "Skipping wave");
                for object in wave {
                    let total = by_name.get(object.as_str()).map_or(0, |r| r.records.len());
                    per_object.insert(object.clone(), ObjectResult::skipped(total));
                }
                continue;
            }
            info!(wave = index + 1, objects = ?wave, "Starting wave");

            let runs = wave
                .iter()
                .filter_map(|object| by_name.get(object.as_str()).copied())
                .map(|request| {
                    let (request, warnings) =
                        resolve_lookups(request, &resolved, self.options.unresolved_references);
                    let coordinator = &coordinator;
                    let objects = &objects;
                    let token = &token;
                    async move {
                        let name = request.object_name.clone();
                        let Some(_permit) = objects.acquire(token).await else {
                            let mut skipped = ObjectResult::skipped(request.records.len());
                            skipped.warnings = warnings;
                            return (name, skipped);
                        };
                        let result = coordinator.run(request, warnings).await;
                        (name, result)
                    }
                });

            let finished = join_all(runs).await;
            for (name, result) in finished {
                resolved.insert(name.clone(), result.resolved_ids());
                loaded.push(name.clone());
                per_object.insert(name, result);
            }

            self.save_checkpoint(LoadCheckpoint {
                run_id,
                completed_waves: index + 1,
                total_waves: waves.len(),
                objects: loaded.clone(),
                resolved_ids: resolved
                    .iter()
                    .map(|(object, ids)| {
                        (
                            object.clone(),
                            ids.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                        )
                    })
                    .collect(),
            })
            .await;

            if self.options.fail_fast {
                let failing = wave.iter().find(|object| {
                    per_object.get(object.as_str()).is_some_and(|r: &ObjectResult| {
                        r.failed > 0 || r.status == ObjectStatus::Failed
                    })
                });
                if let Some(object) = failing {
                    warn!(wave = index + 1, object = %object, "Failure with fail_fast set, skipping later waves");
                    fail_fast_tripped = true;
                }
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let result = LoadResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            per_object,
            cancelled: token.is_cancelled(),
            deadline_exceeded: deadline_hit.load(Ordering::SeqCst),
            fail_fast_tripped,
        };
        info!(
            run_id = %run_id,
            total = result.total(),
            succeeded = result.succeeded(),
            failed = result.failed(),
            cancelled = result.cancelled,
            "Load finished"
        );
        Ok(result)
    }

    async fn save_checkpoint(&self, checkpoint: LoadCheckpoint) {
        let Some(hook) = &self.checkpoint else {
            return;
        };
        if let Err(err) = hook.checkpoint(&checkpoint).await {
            warn!(
                completed_waves = checkpoint.completed_waves,
                error = %err,
                "Checkpoint hook failed"
            );
        }
    }
}

/// Load `requests` through `client` with `options`.
pub async fn load(
    client: Arc<dyn JobClient>,
    cancel: &CancellationToken,
    requests: &[LoadRequest],
    options: LoadOptions,
) -> Result<LoadResult> {
    LoadOrchestrator::new(client)
        .with_options(options)
        .load(cancel, requests)
        .await
}

/// Replace each lookup with the id its target received.
///
/// Lookups are consumed: the returned request carries plain field values.
/// A target without an id, including a record of the same object, is
/// nulled or omitted per `policy` and reported as a warning.
fn resolve_lookups(
    request: &LoadRequest,
    resolved: &ResolvedIds,
    policy: UnresolvedReferencePolicy,
) -> (LoadRequest, Vec<LoadWarning>) {
    let mut request = request.clone();
    let mut warnings = Vec::new();

    for record in &mut request.records {
        for lookup in std::mem::take(&mut record.lookups) {
            let id = resolved
                .get(&lookup.target_object)
                .and_then(|ids| ids.get(&lookup.target_client_row_id));
            if let Some(id) = id {
                record.set(lookup.field_name, Value::String(id.clone()));
                continue;
            }

            warn!(
                object = %request.object_name,
                client_row_id = %record.client_row_id,
                field = %lookup.field_name,
                target_object = %lookup.target_object,
                target_client_row_id = %lookup.target_client_row_id,
                "Unresolved reference"
            );
            match policy {
                UnresolvedReferencePolicy::SetNull => record.set(lookup.field_name.clone(), Value::Null),
                UnresolvedReferencePolicy::Omit => {
                    record.remove(&lookup.field_name);
                }
            }
            warnings.push(LoadWarning::UnresolvedReference {
                client_row_id: record.client_row_id.clone(),
                field_name: lookup.field_name,
                target_object: lookup.target_object,
                target_client_row_id: lookup.target_client_row_id,
            });
        }
    }

    (request, warnings)
}
