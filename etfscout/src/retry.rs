//! Per-identifier retry controller
//!
//! Wraps one fetch+extract pipeline in a bounded, classified retry loop.
//! The attempt budget and delay sampling come from the shared
//! `RetryPolicy` value object; the loop itself is written out here
//! because partial results must be carried across attempts, which the
//! generic policy runner cannot do.
//!
//! Classification: fetch timeouts, blocked responses and server errors
//! are transient, as is a page that parsed but yielded zero extractable
//! fields (interstitial or consent pages look like that). Not-found is
//! terminal. A failed item still returns the best record gathered across
//! all attempts, never less than an earlier attempt produced.

use crate::extract::ExtractionEngine;
use crate::fetch::PageFetcher;
use crate::model::{ExtractedRecord, ScrapeStatus};
use crate::types::Isin;
use chrono::Utc;
use etfscout_common::retry::{ErrorClass, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, warn};

/// Final outcome of one identifier's processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Extraction produced a usable record within the retry budget
    Success,
    /// Terminal error or retry budget exhausted
    Failed,
}

/// One identifier's record plus its outcome
#[derive(Debug, Clone)]
pub struct ItemResult {
    pub record: ExtractedRecord,
    pub outcome: ItemOutcome,
}

/// Bounded retry wrapper around fetch + extraction
pub struct RetryController {
    policy: RetryPolicy,
    fetcher: Arc<dyn PageFetcher>,
    engine: Arc<ExtractionEngine>,
}

impl RetryController {
    pub fn new(
        policy: RetryPolicy,
        fetcher: Arc<dyn PageFetcher>,
        engine: Arc<ExtractionEngine>,
    ) -> Self {
        Self {
            policy,
            fetcher,
            engine,
        }
    }

    /// Process one identifier to a final record
    ///
    /// Always returns a record: on failure it carries `status=Failed`,
    /// the retry count, and every field any attempt managed to extract.
    pub async fn process(&self, isin: &Isin) -> ItemResult {
        let mut best: Option<ExtractedRecord> = None;
        let mut attempt: u32 = 1;

        loop {
            match self.fetcher.fetch(isin).await {
                Ok(raw) => {
                    let mut record = self.engine.extract(&raw);
                    if record.extracted_field_count() > 0 {
                        // Newer values win, earlier attempts only fill gaps
                        if let Some(earlier) = best.take() {
                            record.merge_missing_from(earlier);
                        }
                        record.retry_count = attempt - 1;
                        debug!(%isin, attempt, "Item succeeded");
                        return ItemResult {
                            record,
                            outcome: ItemOutcome::Success,
                        };
                    }
                    // Zero extractable fields: transient, the page was
                    // served but carried no usable content
                    debug!(%isin, attempt, "Fetched page yielded no fields");
                    if best.is_none() {
                        best = Some(record);
                    }
                }
                Err(err) => {
                    if err.class() == ErrorClass::Terminal {
                        warn!(%isin, attempt, error = %err, "Terminal fetch failure");
                        return self.failed(isin, best, attempt);
                    }
                    debug!(%isin, attempt, error = %err, "Transient fetch failure");
                }
            }

            if attempt >= self.policy.max_attempts {
                warn!(%isin, attempt, "Retry budget exhausted");
                return self.failed(isin, best, attempt);
            }
            tokio::time::sleep(self.policy.sample_delay()).await;
            attempt += 1;
        }
    }

    fn failed(
        &self,
        isin: &Isin,
        best: Option<ExtractedRecord>,
        attempts: u32,
    ) -> ItemResult {
        let mut record =
            best.unwrap_or_else(|| ExtractedRecord::new(isin.clone(), Utc::now()));
        record.status = ScrapeStatus::Failed;
        record.retry_count = attempts.saturating_sub(1);
        ItemResult {
            record,
            outcome: ItemOutcome::Failed,
        }
    }
}
