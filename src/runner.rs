//! Pipeline runner: one pass of one stage over its current candidates.
//!
//! ```text
//! candidates ──▶ filter by checkpoint ──▶ for each unfinished item:
//!                                           [claim] → fetch → transform
//!                                           → persist → checkpoint → [release]
//! ```
//!
//! The runner owns the three guarantees of the pipeline:
//!
//! 1. items whose checkpoint is already set are not processed again;
//! 2. a failure on one item is recorded and the loop moves on;
//! 3. the checkpoint is written only after the stage output was persisted.
//!
//! Only failing to enumerate candidates aborts a run. There is no retry
//! inside a run: an item that fails stays unfinished and the next run picks
//! it up again.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkpoint::Checkpoints;
use crate::config::RunConfig;
use crate::error::{ItemFailure, Step};
use crate::traits::ClaimStore;

/// One pipeline stage as seen by the [`Runner`].
#[async_trait]
pub trait Stage: Send + Sync {
    /// Raw input read for one item.
    type Input: Send;
    /// Result of the stage transform for one item.
    type Output: Send;

    /// Stage name used in logs, reports and claim keys.
    fn name(&self) -> &'static str;

    /// Completion checkpoints for this stage.
    fn checkpoints(&self) -> &dyn Checkpoints;

    /// Enumerate every candidate item, in source order.
    async fn candidates(&self) -> Result<Vec<String>>;

    async fn fetch(&self, item: &str) -> Result<Self::Input>;

    async fn transform(&self, item: &str, input: Self::Input) -> Result<Self::Output>;

    async fn persist(&self, item: &str, output: Self::Output) -> Result<()>;
}

/// Counts and failures for one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stage: String,
    pub run_id: String,
    /// Candidates returned by the source.
    pub scanned: usize,
    /// Candidates whose checkpoint was already set.
    pub already_complete: usize,
    /// Unfinished items left for a later run because of the item limit.
    pub deferred: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
}

impl RunReport {
    fn new(stage: &str, run_id: &str) -> Self {
        Self {
            stage: stage.to_string(),
            run_id: run_id.to_string(),
            scanned: 0,
            already_complete: 0,
            deferred: 0,
            completed: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    fn skip(&mut self, item: &str, step: Step, err: &anyhow::Error) {
        warn!(
            stage = %self.stage,
            item = %item,
            step = %step,
            "skipping item: {:#}",
            err
        );
        self.failures.push(ItemFailure::new(item, step, err));
        self.skipped += 1;
    }
}

/// Why an item's processing stopped early.
struct Abandoned {
    step: Step,
    error: anyhow::Error,
}

fn at(step: Step) -> impl FnOnce(anyhow::Error) -> Abandoned {
    move |error| Abandoned { step, error }
}

enum Outcome {
    Completed,
    AlreadyComplete,
}

/// Drives [`Stage`]s. Holds only run policy; stages carry their own
/// dependencies.
#[derive(Default)]
pub struct Runner {
    claims: Option<(Arc<dyn ClaimStore>, Duration)>,
    limit: Option<usize>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim each item for `lease` before processing it.
    pub fn with_claims(mut self, store: Arc<dyn ClaimStore>, lease: Duration) -> Self {
        self.claims = Some((store, lease));
        self
    }

    /// Process at most `limit` unfinished items per run.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Runner policy from configuration: claims are enabled when the lease
    /// is non-zero.
    pub fn from_config(run: &RunConfig, claims: Arc<dyn ClaimStore>) -> Self {
        let runner = Self::new().with_limit(run.max_items);
        if run.claim_lease_secs > 0 {
            runner.with_claims(claims, Duration::from_secs(run.claim_lease_secs))
        } else {
            runner
        }
    }

    /// Run one pass of `stage`.
    ///
    /// # Errors
    ///
    /// Only when the candidate set cannot be obtained. Per-item failures are
    /// reported in [`RunReport::failures`].
    pub async fn run<S: Stage>(&self, stage: &S) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let name = stage.name();
        let mut report = RunReport::new(name, &run_id);

        info!(stage = name, run_id = %run_id, "run started");

        let candidates = stage
            .candidates()
            .await
            .with_context(|| format!("Failed to enumerate candidates for stage '{}'", name))?;
        report.scanned = candidates.len();
        info!(stage = name, found = candidates.len(), "candidates found");

        let mut unfinished = Vec::new();
        for item in candidates {
            match stage.checkpoints().is_complete(&item).await {
                Ok(true) => report.already_complete += 1,
                Ok(false) => unfinished.push(item),
                Err(e) => report.skip(&item, Step::Checkpoint, &e),
            }
        }

        if let Some(limit) = self.limit {
            if unfinished.len() > limit {
                report.deferred = unfinished.len() - limit;
                unfinished.truncate(limit);
            }
        }

        info!(
            stage = name,
            unfinished = unfinished.len(),
            deferred = report.deferred,
            "processing unfinished items"
        );

        for item in &unfinished {
            info!(stage = name, item = %item, "processing item");
            match self.process_item(stage, item, &run_id).await {
                Ok(Outcome::Completed) => {
                    report.completed += 1;
                    info!(stage = name, item = %item, "item completed");
                }
                Ok(Outcome::AlreadyComplete) => {
                    report.already_complete += 1;
                    info!(stage = name, item = %item, "item completed by another run");
                }
                Err(Abandoned { step, error }) => report.skip(item, step, &error),
            }
        }

        info!(
            stage = name,
            run_id = %run_id,
            scanned = report.scanned,
            already_complete = report.already_complete,
            completed = report.completed,
            skipped = report.skipped,
            deferred = report.deferred,
            "run finished"
        );

        Ok(report)
    }

    async fn process_item<S: Stage>(
        &self,
        stage: &S,
        item: &str,
        run_id: &str,
    ) -> Result<Outcome, Abandoned> {
        let Some((claims, lease)) = &self.claims else {
            return process(stage, item).await;
        };

        let claimed = claims
            .try_claim(stage.name(), item, run_id, *lease)
            .await
            .map_err(at(Step::Claim))?;
        if !claimed {
            return Err(Abandoned {
                step: Step::Claim,
                error: anyhow!("item is claimed by another run"),
            });
        }

        // Another run may have finished the item between the partition and
        // our claim.
        let outcome = match stage.checkpoints().is_complete(item).await {
            Ok(true) => Ok(Outcome::AlreadyComplete),
            Ok(false) => process(stage, item).await,
            Err(e) => Err(Abandoned {
                step: Step::Checkpoint,
                error: e,
            }),
        };

        if let Err(e) = claims.release(stage.name(), item, run_id).await {
            warn!(
                stage = stage.name(),
                item = %item,
                "failed to release claim, it will expire: {:#}",
                e
            );
        }

        outcome
    }
}

/// fetch → transform → persist → checkpoint, stopping at the first failure.
async fn process<S: Stage>(stage: &S, item: &str) -> Result<Outcome, Abandoned> {
    let input = stage.fetch(item).await.map_err(at(Step::Fetch))?;
    let output = stage
        .transform(item, input)
        .await
        .map_err(at(Step::Transform))?;
    stage.persist(item, output).await.map_err(at(Step::Persist))?;
    stage
        .checkpoints()
        .mark_complete(item)
        .await
        .map_err(at(Step::Checkpoint))?;
    Ok(Outcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MarkerCheckpoints;
    use crate::memory_store::MemoryStore;
    use crate::models::Fields;
    use crate::traits::DocumentStore;
    use anyhow::bail;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Upper-cases item names into an `out` collection.
    struct UpperStage {
        items: Vec<String>,
        store: Arc<MemoryStore>,
        checkpoints: MarkerCheckpoints,
        fail_fetch: HashSet<String>,
        fail_transform: HashSet<String>,
        fail_persist: HashSet<String>,
        enumerate_fails: bool,
        transforms: AtomicUsize,
    }

    impl UpperStage {
        fn new(store: Arc<MemoryStore>, items: &[&str]) -> Self {
            Self {
                items: items.iter().map(|s| s.to_string()).collect(),
                checkpoints: MarkerCheckpoints::new(store.clone(), "done"),
                store,
                fail_fetch: HashSet::new(),
                fail_transform: HashSet::new(),
                fail_persist: HashSet::new(),
                enumerate_fails: false,
                transforms: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Stage for UpperStage {
        type Input = String;
        type Output = String;

        fn name(&self) -> &'static str {
            "upper"
        }

        fn checkpoints(&self) -> &dyn Checkpoints {
            &self.checkpoints
        }

        async fn candidates(&self) -> Result<Vec<String>> {
            if self.enumerate_fails {
                bail!("listing refused");
            }
            Ok(self.items.clone())
        }

        async fn fetch(&self, item: &str) -> Result<String> {
            if self.fail_fetch.contains(item) {
                bail!("object vanished");
            }
            Ok(item.to_string())
        }

        async fn transform(&self, item: &str, input: String) -> Result<String> {
            self.transforms.fetch_add(1, Ordering::SeqCst);
            if self.fail_transform.contains(item) {
                bail!("service unavailable");
            }
            Ok(input.to_uppercase())
        }

        async fn persist(&self, item: &str, output: String) -> Result<()> {
            if self.fail_persist.contains(item) {
                bail!("write rejected");
            }
            let mut fields = Fields::new();
            fields.insert("value".into(), json!(output));
            self.store.set("out", item, &fields).await
        }
    }

    #[tokio::test]
    async fn processes_all_and_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let stage = UpperStage::new(store.clone(), &["a", "b", "c"]);
        let runner = Runner::new();

        let first = runner.run(&stage).await.unwrap();
        assert_eq!(first.scanned, 3);
        assert_eq!(first.completed, 3);
        assert_eq!(first.skipped, 0);

        let second = runner.run(&stage).await.unwrap();
        assert_eq!(second.scanned, 3);
        assert_eq!(second.already_complete, 3);
        assert_eq!(second.completed, 0);
        assert_eq!(stage.transforms.load(Ordering::SeqCst), 3);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test]
    async fn transform_failure_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let mut stage = UpperStage::new(store.clone(), &["a", "b", "c", "d"]);
        stage.fail_transform.insert("b".into());

        let report = Runner::new().run(&stage).await.unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures[0].item, "b");
        assert_eq!(report.failures[0].step, Step::Transform);
        assert!(report.failures[0].reason.contains("service unavailable"));

        assert!(store.get("out", "b").await.unwrap().is_none());
        assert!(!stage.checkpoints.is_complete("b").await.unwrap());
        assert!(stage.checkpoints.is_complete("d").await.unwrap());
    }

    #[tokio::test]
    async fn failed_item_is_retried_next_run() {
        let store = Arc::new(MemoryStore::new());
        let mut stage = UpperStage::new(store.clone(), &["a", "b"]);
        stage.fail_fetch.insert("a".into());

        let first = Runner::new().run(&stage).await.unwrap();
        assert_eq!(first.failures[0].step, Step::Fetch);

        stage.fail_fetch.clear();
        let second = Runner::new().run(&stage).await.unwrap();
        assert_eq!(second.already_complete, 1);
        assert_eq!(second.completed, 1);
        assert_eq!(
            store.get("out", "a").await.unwrap().unwrap().get("value"),
            Some(&json!("A"))
        );
    }

    #[tokio::test]
    async fn persist_failure_leaves_checkpoint_unset() {
        let store = Arc::new(MemoryStore::new());
        let mut stage = UpperStage::new(store.clone(), &["a"]);
        stage.fail_persist.insert("a".into());

        let report = Runner::new().run(&stage).await.unwrap();
        assert_eq!(report.failures[0].step, Step::Persist);
        assert!(!stage.checkpoints.is_complete("a").await.unwrap());
    }

    #[tokio::test]
    async fn enumeration_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let mut stage = UpperStage::new(store, &["a"]);
        stage.enumerate_fails = true;

        let err = Runner::new().run(&stage).await.unwrap_err();
        assert!(format!("{:#}", err).contains("listing refused"));
    }

    #[tokio::test]
    async fn limit_defers_remaining_items() {
        let store = Arc::new(MemoryStore::new());
        let stage = UpperStage::new(store.clone(), &["a", "b", "c"]);
        let runner = Runner::new().with_limit(Some(2));

        let first = runner.run(&stage).await.unwrap();
        assert_eq!(first.completed, 2);
        assert_eq!(first.deferred, 1);
        // Source order decides which items go first.
        assert!(store.get("out", "c").await.unwrap().is_none());

        let second = runner.run(&stage).await.unwrap();
        assert_eq!(second.completed, 1);
        assert_eq!(second.deferred, 0);
    }

    #[tokio::test]
    async fn claimed_item_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let stage = UpperStage::new(store.clone(), &["a", "b"]);
        let lease = Duration::from_secs(60);
        store.try_claim("upper", "a", "other-run", lease).await.unwrap();

        let report = Runner::new()
            .with_claims(store.clone(), lease)
            .run(&stage)
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.failures[0].item, "a");
        assert_eq!(report.failures[0].step, Step::Claim);

        // Our own claims were released.
        assert!(store.try_claim("upper", "b", "third-run", lease).await.unwrap());
    }

    #[tokio::test]
    async fn item_finished_elsewhere_is_not_reprocessed_after_claim() {
        struct RacingCheckpoints {
            reads: AtomicUsize,
        }

        #[async_trait]
        impl Checkpoints for RacingCheckpoints {
            // Unfinished at partition time, finished by the time we re-check.
            async fn is_complete(&self, _item: &str) -> Result<bool> {
                Ok(self.reads.fetch_add(1, Ordering::SeqCst) > 0)
            }
            async fn mark_complete(&self, _item: &str) -> Result<()> {
                bail!("must not be called")
            }
        }

        struct RacingStage {
            checkpoints: RacingCheckpoints,
        }

        #[async_trait]
        impl Stage for RacingStage {
            type Input = ();
            type Output = ();
            fn name(&self) -> &'static str {
                "racing"
            }
            fn checkpoints(&self) -> &dyn Checkpoints {
                &self.checkpoints
            }
            async fn candidates(&self) -> Result<Vec<String>> {
                Ok(vec!["a".into()])
            }
            async fn fetch(&self, _item: &str) -> Result<()> {
                bail!("must not be called")
            }
            async fn transform(&self, _item: &str, _input: ()) -> Result<()> {
                bail!("must not be called")
            }
            async fn persist(&self, _item: &str, _output: ()) -> Result<()> {
                bail!("must not be called")
            }
        }

        let stage = RacingStage {
            checkpoints: RacingCheckpoints {
                reads: AtomicUsize::new(0),
            },
        };
        let report = Runner::new()
            .with_claims(Arc::new(MemoryStore::new()), Duration::from_secs(60))
            .run(&stage)
            .await
            .unwrap();
        assert_eq!(report.already_complete, 1);
        assert_eq!(report.completed, 0);
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn from_config_enables_claims_only_with_lease() {
        let store: Arc<dyn ClaimStore> = Arc::new(MemoryStore::new());
        let run = RunConfig {
            http_timeout_secs: 30,
            max_items: Some(5),
            claim_lease_secs: 0,
        };
        let runner = Runner::from_config(&run, store.clone());
        assert!(runner.claims.is_none());
        assert_eq!(runner.limit, Some(5));

        let run = RunConfig {
            claim_lease_secs: 300,
            ..run
        };
        let runner = Runner::from_config(&run, store);
        assert_eq!(
            runner.claims.as_ref().map(|(_, lease)| *lease),
            Some(Duration::from_secs(300))
        );
    }
}
