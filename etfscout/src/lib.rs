//! etfscout - ETF page scraping and rating pipeline
//!
//! Extracts structured fund records from an HTML-based source, resolves
//! ambiguous fields through competing extraction strategies, persists
//! progress as crash-safe batch checkpoints, and computes a
//! deterministic 1-5 star rating per record.
//!
//! Library interface so integration tests can drive the pipeline with
//! mock collaborators.

pub mod checkpoint;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod model;
pub mod orchestrator;
pub mod rating;
pub mod retry;
pub mod types;
pub mod upload;

pub use crate::model::{ExchangeListing, ExtractedRecord, ScoredRecord, ScrapeStatus};
pub use crate::types::Isin;
