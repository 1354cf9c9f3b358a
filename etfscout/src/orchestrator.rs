//! Batch orchestrator
//!
//! Splits the identifier list into fixed-size batches preserving input
//! order and drives each batch through a bounded worker pool. A batch is
//! committed as one checkpoint only after every item in it has finished
//! (success or exhausted-retry failure); commit order across batches is
//! strictly sequential even though in-batch processing is parallel.
//!
//! Cancellation stops dispatch of new items immediately, keeps queued
//! items from starting, and bounds in-flight items with a grace period.
//! A batch whose items did not all run is never committed, so the last
//! committed checkpoint stays a valid resume point.

use crate::checkpoint::{CheckpointStore, PersistenceError, RunManifest};
use crate::model::{ScoredRecord, ScrapeStatus};
use crate::rating;
use crate::retry::{ItemOutcome, ItemResult, RetryController};
use crate::types::Isin;
use chrono::Utc;
use etfscout_common::fingerprint::fingerprint_identifiers;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long in-flight items may run after cancellation interrupts a
/// batch's dispatch
const CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Run-level failure. Item-level failures are data, not errors; only
/// persistence problems and setup mistakes abort a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(
        "state directory already holds checkpoints; pass resume to continue \
         that run or point at a fresh directory"
    )]
    ExistingRunWithoutResume,

    #[error("worker task panicked: {0}")]
    WorkerPanic(String),
}

/// Per-batch outcome counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    pub batch_index: u32,
    /// Items that completed with all core fields present
    pub success: usize,
    /// Items that completed with notable fields missing
    pub partial: usize,
    /// Items that failed terminally or exhausted their retry budget
    pub failed: usize,
}

/// Final run summary
///
/// Hard-failed identifiers are listed explicitly for manual re-run;
/// nothing is silently dropped.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub batches: Vec<BatchStats>,
    pub failed_identifiers: Vec<Isin>,
    /// Batch index the run resumed after, if it resumed
    pub resumed_after: Option<u32>,
    /// True when cancellation stopped the run before all batches committed
    pub cancelled: bool,
}

impl RunSummary {
    pub fn total_success(&self) -> usize {
        self.batches.iter().map(|b| b.success).sum()
    }

    pub fn total_partial(&self) -> usize {
        self.batches.iter().map(|b| b.partial).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.batches.iter().map(|b| b.failed).sum()
    }
}

/// Drives a full scrape run over an identifier list
pub struct Orchestrator {
    controller: Arc<RetryController>,
    store: CheckpointStore,
    batch_size: usize,
    worker_count: usize,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        controller: Arc<RetryController>,
        store: CheckpointStore,
        batch_size: usize,
        worker_count: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            controller,
            store,
            batch_size: batch_size.max(1),
            worker_count: worker_count.max(1),
            cancel,
        }
    }

    /// Run the pipeline over `identifiers`, optionally resuming a prior
    /// interrupted run in the same state directory
    pub async fn run(
        &self,
        identifiers: &[Isin],
        resume: bool,
    ) -> Result<RunSummary, RunError> {
        let fingerprint = fingerprint_identifiers(
            &identifiers.iter().map(|i| i.as_str()).collect::<Vec<_>>(),
        );
        self.store.verify_or_write_manifest(&RunManifest {
            run_id: uuid::Uuid::new_v4(),
            fingerprint,
            identifier_count: identifiers.len(),
            batch_size: self.batch_size,
            started_at: Utc::now(),
        })?;

        let last_committed = self.store.resume()?;
        let first_batch = match (resume, last_committed) {
            (true, Some(last)) => last + 1,
            (true, None) => 0,
            (false, Some(_)) => return Err(RunError::ExistingRunWithoutResume),
            (false, None) => 0,
        };

        let batches: Vec<&[Isin]> = identifiers.chunks(self.batch_size).collect();
        info!(
            identifiers = identifiers.len(),
            batches = batches.len(),
            first_batch,
            workers = self.worker_count,
            "Starting run"
        );

        let mut summary = RunSummary {
            batches: Vec::new(),
            failed_identifiers: Vec::new(),
            resumed_after: if resume { last_committed } else { None },
            cancelled: false,
        };

        for (index, batch) in batches.iter().enumerate().skip(first_batch as usize) {
            if self.cancel.is_cancelled() {
                warn!(next_batch = index, "Cancelled before batch dispatch");
                summary.cancelled = true;
                break;
            }

            match self.process_batch(index as u32, batch).await? {
                Some(results) => {
                    self.commit_batch(index as u32, results, &mut summary)?;
                }
                None => {
                    // Cancelled mid-batch: nothing committed for it
                    warn!(batch_index = index, "Batch abandoned on cancellation");
                    summary.cancelled = true;
                    break;
                }
            }
        }

        info!(
            success = summary.total_success(),
            partial = summary.total_partial(),
            failed = summary.total_failed(),
            cancelled = summary.cancelled,
            "Run finished"
        );
        Ok(summary)
    }

    /// Process one batch through the worker pool
    ///
    /// Returns `None` when cancellation stopped any item before it ran:
    /// queued workers check the token after acquiring their permit and
    /// return without fetching, items still in flight get
    /// [`CANCEL_GRACE`] to finish, and the partial batch is discarded
    /// rather than committed.
    async fn process_batch(
        &self,
        batch_index: u32,
        batch: &[Isin],
    ) -> Result<Option<Vec<ItemResult>>, RunError> {
        debug!(batch_index, items = batch.len(), "Dispatching batch");
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut tasks: JoinSet<(usize, Option<ItemResult>)> = JoinSet::new();

        for (position, isin) in batch.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let permit = semaphore.clone();
            let controller = self.controller.clone();
            let cancel = self.cancel.clone();
            let isin = isin.clone();
            tasks.spawn(async move {
                // Closing the semaphore is never done, acquire cannot fail
                let _permit = permit.acquire_owned().await.expect("semaphore open");
                // Items queued behind the pool stop here on cancellation
                if cancel.is_cancelled() {
                    return (position, None);
                }
                let result = controller.process(&isin).await;
                (position, Some(result))
            });
        }

        let mut slots: Vec<Option<ItemResult>> = batch.iter().map(|_| None).collect();
        let mut grace_deadline: Option<Instant> = None;
        loop {
            if grace_deadline.is_none() && self.cancel.is_cancelled() {
                grace_deadline = Some(Instant::now() + CANCEL_GRACE);
            }
            let joined = match grace_deadline {
                Some(deadline) => match timeout_at(deadline, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(batch_index, "Grace period elapsed, aborting in-flight items");
                        tasks.abort_all();
                        return Ok(None);
                    }
                },
                None => tokio::select! {
                    joined = tasks.join_next() => joined,
                    _ = self.cancel.cancelled() => continue,
                },
            };
            let Some(joined) = joined else { break };
            let (position, result) =
                joined.map_err(|e| RunError::WorkerPanic(e.to_string()))?;
            slots[position] = result;
        }

        if slots.iter().any(Option::is_none) {
            // At least one item never ran; the batch is not committable
            return Ok(None);
        }
        // Every item was processed, restore input order
        Ok(Some(slots.into_iter().flatten().collect()))
    }

    /// Score, tally and durably commit one completed batch
    fn commit_batch(
        &self,
        batch_index: u32,
        results: Vec<ItemResult>,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        let mut stats = BatchStats {
            batch_index,
            success: 0,
            partial: 0,
            failed: 0,
        };

        let mut scored = Vec::with_capacity(results.len());
        for result in results {
            match (result.outcome, result.record.status) {
                (ItemOutcome::Failed, _) => {
                    stats.failed += 1;
                    summary.failed_identifiers.push(result.record.isin.clone());
                }
                (ItemOutcome::Success, ScrapeStatus::Complete) => stats.success += 1,
                (ItemOutcome::Success, _) => stats.partial += 1,
            }
            let rating = rating::score_now(&result.record);
            scored.push(ScoredRecord {
                record: result.record,
                rating,
            });
        }

        self.store.commit(batch_index, scored)?;
        summary.batches.push(stats);
        Ok(())
    }

    /// The checkpoint store backing this run
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{CandidateValidator, ExtractionEngine};
    use crate::fetch::{FetchError, PageFetcher};
    use crate::types::RawDocument;
    use async_trait::async_trait;
    use etfscout_common::retry::RetryPolicy;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fetcher with a fixed behavior per identifier
    struct MapFetcher {
        pages: HashMap<String, String>,
        timeouts: Vec<String>,
    }

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch(&self, isin: &Isin) -> Result<RawDocument, FetchError> {
            if self.timeouts.iter().any(|t| t == isin.as_str()) {
                return Err(FetchError::Timeout(isin.clone()));
            }
            match self.pages.get(isin.as_str()) {
                Some(html) => Ok(RawDocument {
                    isin: isin.clone(),
                    html: html.clone(),
                    fetched_at: Utc::now(),
                }),
                None => Err(FetchError::NotFound(isin.clone())),
            }
        }
    }

    fn page(name: &str) -> String {
        format!(
            r#"<html><body><h1>{name}</h1><table>
            <tr><td>Total expense ratio</td><td>0.20%</td></tr>
            <tr><td>Fund size</td><td>EUR 1,000 m</td></tr>
            </table>
            <table>
            <tr><th>Exchange</th><th>Ticker</th></tr>
            <tr><td>Xetra</td><td>TEST</td></tr>
            </table></body></html>"#
        )
    }

    fn isins(n: usize) -> Vec<Isin> {
        (0..n)
            .map(|i| format!("IE00B5BMR{:03}", i).parse().unwrap())
            .collect()
    }

    fn orchestrator(
        fetcher: MapFetcher,
        dir: &TempDir,
        batch_size: usize,
    ) -> Orchestrator {
        let controller = RetryController::new(
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            Arc::new(fetcher),
            Arc::new(ExtractionEngine::new(CandidateValidator::default())),
        );
        Orchestrator::new(
            Arc::new(controller),
            CheckpointStore::open(dir.path()).unwrap(),
            batch_size,
            2,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_persistent_timeout_yields_one_hard_failure() {
        let ids = isins(10);
        let mut pages = HashMap::new();
        for id in &ids {
            pages.insert(id.as_str().to_string(), page(id.as_str()));
        }
        let fetcher = MapFetcher {
            pages,
            timeouts: vec![ids[6].as_str().to_string()],
        };

        let dir = TempDir::new().unwrap();
        let orch = orchestrator(fetcher, &dir, 5);
        let summary = orch.run(&ids, false).await.unwrap();

        assert_eq!(summary.total_failed(), 1);
        assert_eq!(summary.failed_identifiers, vec![ids[6].clone()]);
        assert_eq!(summary.total_success() + summary.total_partial(), 9);
        // Failed item is still checkpointed, never dropped
        let all = orch.store().load_all().unwrap();
        assert_eq!(all.len(), 10);
    }

    #[tokio::test]
    async fn test_records_are_committed_in_input_order() {
        let ids = isins(6);
        let mut pages = HashMap::new();
        for id in &ids {
            pages.insert(id.as_str().to_string(), page(id.as_str()));
        }
        let fetcher = MapFetcher {
            pages,
            timeouts: vec![],
        };

        let dir = TempDir::new().unwrap();
        let orch = orchestrator(fetcher, &dir, 3);
        orch.run(&ids, false).await.unwrap();

        let all = orch.store().load_all().unwrap();
        let committed: Vec<&str> = all.iter().map(|s| s.record.isin.as_str()).collect();
        let expected: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(committed, expected);
    }

    #[tokio::test]
    async fn test_existing_checkpoints_require_resume_flag() {
        let ids = isins(2);
        let mut pages = HashMap::new();
        for id in &ids {
            pages.insert(id.as_str().to_string(), page(id.as_str()));
        }

        let dir = TempDir::new().unwrap();
        let orch = orchestrator(
            MapFetcher {
                pages: pages.clone(),
                timeouts: vec![],
            },
            &dir,
            1,
        );
        orch.run(&ids, false).await.unwrap();

        let orch2 = orchestrator(
            MapFetcher {
                pages,
                timeouts: vec![],
            },
            &dir,
            1,
        );
        assert!(matches!(
            orch2.run(&ids, false).await,
            Err(RunError::ExistingRunWithoutResume)
        ));
    }

    #[tokio::test]
    async fn test_changed_identifier_list_refuses_resume() {
        let ids = isins(2);
        let mut pages = HashMap::new();
        for id in &ids {
            pages.insert(id.as_str().to_string(), page(id.as_str()));
        }

        let dir = TempDir::new().unwrap();
        let orch = orchestrator(
            MapFetcher {
                pages: pages.clone(),
                timeouts: vec![],
            },
            &dir,
            1,
        );
        orch.run(&ids, false).await.unwrap();

        let other_ids = isins(3);
        let orch2 = orchestrator(
            MapFetcher {
                pages,
                timeouts: vec![],
            },
            &dir,
            1,
        );
        assert!(matches!(
            orch2.run(&other_ids, true).await,
            Err(RunError::Persistence(PersistenceError::ManifestMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn test_changed_batch_size_refuses_resume() {
        // Re-chunking the same list would remap committed batch indices
        // onto different identifiers and silently drop items
        let ids = isins(4);
        let mut pages = HashMap::new();
        for id in &ids {
            pages.insert(id.as_str().to_string(), page(id.as_str()));
        }

        let dir = TempDir::new().unwrap();
        let orch = orchestrator(
            MapFetcher {
                pages: pages.clone(),
                timeouts: vec![],
            },
            &dir,
            2,
        );
        orch.run(&ids, false).await.unwrap();

        let orch2 = orchestrator(
            MapFetcher {
                pages,
                timeouts: vec![],
            },
            &dir,
            3,
        );
        assert!(matches!(
            orch2.run(&ids, true).await,
            Err(RunError::Persistence(PersistenceError::ManifestMismatch {
                field: "batch size",
                ..
            }))
        ));
    }

    /// Fetcher that cancels the run token on its first fetch
    struct CancellingFetcher {
        token: CancellationToken,
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for CancellingFetcher {
        async fn fetch(&self, isin: &Isin) -> Result<RawDocument, FetchError> {
            self.token.cancel();
            match self.pages.get(isin.as_str()) {
                Some(html) => Ok(RawDocument {
                    isin: isin.clone(),
                    html: html.clone(),
                    fetched_at: Utc::now(),
                }),
                None => Err(FetchError::NotFound(isin.clone())),
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_stops_queued_items_and_commits_nothing() {
        // One worker, four items: cancellation during the first fetch
        // must keep the three queued items from fetching at all
        let ids = isins(4);
        let mut pages = HashMap::new();
        for id in &ids {
            pages.insert(id.as_str().to_string(), page(id.as_str()));
        }
        let cancel = CancellationToken::new();
        let fetcher = CancellingFetcher {
            token: cancel.clone(),
            pages,
        };

        let dir = TempDir::new().unwrap();
        let controller = RetryController::new(
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            Arc::new(fetcher),
            Arc::new(ExtractionEngine::new(CandidateValidator::default())),
        );
        let orch = Orchestrator::new(
            Arc::new(controller),
            CheckpointStore::open(dir.path()).unwrap(),
            4,
            1,
            cancel,
        );

        let summary = orch.run(&ids, false).await.unwrap();
        assert!(summary.cancelled);
        assert!(summary.batches.is_empty());
        assert!(orch.store().load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_commits_nothing() {
        let ids = isins(4);
        let mut pages = HashMap::new();
        for id in &ids {
            pages.insert(id.as_str().to_string(), page(id.as_str()));
        }
        let fetcher = MapFetcher {
            pages,
            timeouts: vec![],
        };

        let dir = TempDir::new().unwrap();
        let controller = RetryController::new(
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            Arc::new(fetcher),
            Arc::new(ExtractionEngine::new(CandidateValidator::default())),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orch = Orchestrator::new(
            Arc::new(controller),
            CheckpointStore::open(dir.path()).unwrap(),
            2,
            2,
            cancel,
        );

        let summary = orch.run(&ids, false).await.unwrap();
        assert!(summary.cancelled);
        assert!(summary.batches.is_empty());
        assert!(orch.store().load_all().unwrap().is_empty());
    }
}
