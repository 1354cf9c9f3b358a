//! Storage upload
//!
//! The storage backend is an external collaborator behind the
//! `UploadAdapter` seam. Records are flattened into rows with one
//! canonical absent marker (JSON null) per missing value, never a mix of
//! null and empty string for the same column.
//!
//! Failure handling follows the same retry policy as scraping: transient
//! adapter failures are retried with randomized delays, and a chunk that
//! keeps failing is split into smaller sub-chunks so one bad record
//! cannot sink a whole batch. A schema mismatch on optional columns
//! (rating fields not yet provisioned) degrades by omitting those
//! columns and retrying instead of failing the run.

use crate::model::ScoredRecord;
use async_trait::async_trait;
use etfscout_common::retry::{ErrorClass, RetryPolicy};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One flattened storage row
pub type UploadRow = Map<String, Value>;

/// Typed upload failure
#[derive(Debug, Error)]
pub enum UploadError {
    /// Backend rejected the payload; retrying the same rows cannot help
    #[error("upload rejected: {0}")]
    Rejected(String),

    /// Backend does not know some columns; retry without them
    #[error("unknown columns: {0:?}")]
    SchemaMismatch(Vec<String>),

    /// Transport-level failure, worth retrying
    #[error("upload transport failure: {0}")]
    Transport(String),
}

impl UploadError {
    pub fn class(&self) -> ErrorClass {
        match self {
            UploadError::Transport(_) => ErrorClass::Transient,
            _ => ErrorClass::Terminal,
        }
    }
}

/// External storage seam: idempotent upsert keyed by the `isin` column
#[async_trait]
pub trait UploadAdapter: Send + Sync {
    async fn upsert(&self, rows: &[UploadRow]) -> Result<(), UploadError>;
}

/// Outcome of one upload pass
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub uploaded: usize,
    /// Identifiers whose row could not be stored even alone
    pub failed: Vec<String>,
    /// Columns dropped after a schema mismatch
    pub omitted_columns: Vec<String>,
}

/// Chunked, retrying uploader over an adapter
pub struct Uploader<A: UploadAdapter> {
    adapter: A,
    policy: RetryPolicy,
    chunk_size: usize,
}

impl<A: UploadAdapter> Uploader<A> {
    pub fn new(adapter: A, policy: RetryPolicy, chunk_size: usize) -> Self {
        Self {
            adapter,
            policy,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Upsert all records, chunked, with sub-chunk fallback
    pub async fn upload(&self, records: &[ScoredRecord]) -> UploadReport {
        let rows: Vec<UploadRow> = records.iter().map(to_row).collect();
        let mut report = UploadReport::default();

        let mut pending: Vec<Vec<UploadRow>> = rows
            .chunks(self.chunk_size)
            .map(|c| c.to_vec())
            .collect();

        while let Some(chunk) = pending.pop() {
            match self.try_chunk(&chunk).await {
                Ok(()) => report.uploaded += chunk.len(),
                Err(UploadError::SchemaMismatch(columns)) => {
                    warn!(?columns, "Schema mismatch, retrying without those columns");
                    let stripped: Vec<UploadRow> = chunk
                        .iter()
                        .map(|row| {
                            let mut row = row.clone();
                            for column in &columns {
                                row.remove(column);
                            }
                            row
                        })
                        .collect();
                    for column in columns {
                        if !report.omitted_columns.contains(&column) {
                            report.omitted_columns.push(column);
                        }
                    }
                    pending.push(stripped);
                }
                Err(err) if chunk.len() > 1 => {
                    // Split and re-queue both halves
                    debug!(size = chunk.len(), error = %err, "Splitting failed chunk");
                    let mid = chunk.len() / 2;
                    pending.push(chunk[mid..].to_vec());
                    pending.push(chunk[..mid].to_vec());
                }
                Err(err) => {
                    let isin = chunk[0]
                        .get("isin")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?")
                        .to_string();
                    warn!(%isin, error = %err, "Row could not be stored");
                    report.failed.push(isin);
                }
            }
        }

        info!(
            uploaded = report.uploaded,
            failed = report.failed.len(),
            "Upload pass finished"
        );
        report
    }

    async fn try_chunk(&self, chunk: &[UploadRow]) -> Result<(), UploadError> {
        self.policy
            .run(|_attempt| self.adapter.upsert(chunk), UploadError::class)
            .await
    }
}

/// Flatten a scored record into one storage row
///
/// Absent values become JSON null for every type. Rating columns carry a
/// `rating_` prefix so a schema mismatch can name and drop them as a
/// group.
pub fn to_row(scored: &ScoredRecord) -> UploadRow {
    let r = &scored.record;
    let mut row = Map::new();
    row.insert("isin".into(), json!(r.isin.as_str()));
    row.insert("name".into(), json!(r.name));
    row.insert("provider".into(), json!(r.provider));
    row.insert("index_name".into(), json!(r.index_name));
    row.insert("ter_pct".into(), json!(r.ter_pct));
    row.insert("fund_size_m".into(), json!(r.fund_size_m));
    row.insert("fund_currency".into(), json!(r.fund_currency));
    row.insert("replication".into(), json!(r.replication));
    row.insert("domicile".into(), json!(r.domicile));
    row.insert("legal_structure".into(), json!(r.legal_structure));
    row.insert("inception_date".into(), json!(r.inception_date));
    row.insert("distribution_policy".into(), json!(r.distribution_policy));
    row.insert(
        "distribution_frequency".into(),
        json!(r.distribution_frequency),
    );
    row.insert("return_ytd_pct".into(), json!(r.return_ytd_pct));
    row.insert("return_1y_pct".into(), json!(r.return_1y_pct));
    row.insert("return_3y_pct".into(), json!(r.return_3y_pct));
    row.insert("return_5y_pct".into(), json!(r.return_5y_pct));
    row.insert("volatility_1y_pct".into(), json!(r.volatility_1y_pct));
    row.insert("volatility_3y_pct".into(), json!(r.volatility_3y_pct));
    row.insert("tracking_error_pct".into(), json!(r.tracking_error_pct));
    row.insert("dividend_yield_pct".into(), json!(r.dividend_yield_pct));
    row.insert("primary_ticker".into(), json!(r.primary_ticker()));
    row.insert("listings".into(), json!(r.listings));
    row.insert("description".into(), json!(r.description));
    row.insert("status".into(), json!(r.status));
    row.insert("retry_count".into(), json!(r.retry_count));
    row.insert("scraped_at".into(), json!(r.scraped_at));
    row.insert("rating_stars".into(), json!(scored.rating.stars));
    row.insert("rating_score".into(), json!(scored.rating.score));
    row.insert(
        "rating_insufficient_data".into(),
        json!(scored.rating.insufficient_data),
    );
    row
}
