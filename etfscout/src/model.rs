//! Durable record model
//!
//! `ExtractedRecord` is the output entity keyed by ISIN. Every field is
//! independently optional; absence means no strategy produced a valid
//! candidate, never "zero". Records serialize deterministically (no
//! hash-ordered containers) so repeated extraction of the same document
//! is byte-identical.

use crate::types::Isin;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Maximum retained exchange listings per record
pub const MAX_LISTINGS: usize = 10;

/// One exchange listing for a fund
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeListing {
    /// Exchange name (e.g., "London Stock Exchange")
    pub exchange: Option<String>,
    /// Trade ticker on this exchange
    pub ticker: String,
    /// Trade currency on this exchange
    pub currency: Option<String>,
    /// Bloomberg code, when present in the source
    pub bloomberg_code: Option<String>,
    /// Reuters/RIC code, when present in the source
    pub reuters_code: Option<String>,
    /// Exactly one listing per record is primary when any are valid
    pub primary: bool,
}

/// Terminal processing state of one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrapeStatus {
    /// All field groups attempted, core fields present
    Complete,
    /// Extraction succeeded but notable fields are missing
    Partial,
    /// Fetch/extract failed after exhausting retries; the record still
    /// carries whatever was gathered before the failure
    Failed,
}

/// The durable extraction output for one fund
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Unique key
    pub isin: Isin,

    // --- identity ---
    pub name: Option<String>,
    pub provider: Option<String>,
    pub index_name: Option<String>,

    // --- cost ---
    /// Ongoing cost ratio (TER) in percent, e.g. 0.07
    pub ter_pct: Option<f64>,

    // --- size / structure ---
    /// Fund size in millions of the fund currency
    pub fund_size_m: Option<f64>,
    pub fund_currency: Option<String>,
    pub replication: Option<String>,
    pub domicile: Option<String>,
    pub legal_structure: Option<String>,
    pub inception_date: Option<NaiveDate>,

    // --- distribution ---
    pub distribution_policy: Option<String>,
    pub distribution_frequency: Option<String>,

    // --- performance ---
    pub return_ytd_pct: Option<f64>,
    pub return_1y_pct: Option<f64>,
    pub return_3y_pct: Option<f64>,
    pub return_5y_pct: Option<f64>,
    pub volatility_1y_pct: Option<f64>,
    pub volatility_3y_pct: Option<f64>,

    // --- risk ---
    pub tracking_error_pct: Option<f64>,

    // --- listings ---
    pub listings: Vec<ExchangeListing>,

    // --- dividend ---
    pub dividend_yield_pct: Option<f64>,

    // --- free text ---
    pub description: Option<String>,

    // --- status metadata ---
    pub status: ScrapeStatus,
    pub retry_count: u32,
    pub scraped_at: DateTime<Utc>,
}

impl ExtractedRecord {
    /// Empty record for an identifier, before any extraction
    pub fn new(isin: Isin, scraped_at: DateTime<Utc>) -> Self {
        Self {
            isin,
            name: None,
            provider: None,
            index_name: None,
            ter_pct: None,
            fund_size_m: None,
            fund_currency: None,
            replication: None,
            domicile: None,
            legal_structure: None,
            inception_date: None,
            distribution_policy: None,
            distribution_frequency: None,
            return_ytd_pct: None,
            return_1y_pct: None,
            return_3y_pct: None,
            return_5y_pct: None,
            volatility_1y_pct: None,
            volatility_3y_pct: None,
            tracking_error_pct: None,
            listings: Vec::new(),
            dividend_yield_pct: None,
            description: None,
            status: ScrapeStatus::Failed,
            retry_count: 0,
            scraped_at,
        }
    }

    /// The listing marked primary, if any
    pub fn primary_ticker(&self) -> Option<&str> {
        self.listings
            .iter()
            .find(|l| l.primary)
            .map(|l| l.ticker.as_str())
    }

    /// Count of populated fields (listings count as one)
    ///
    /// Used to detect the "zero extractable fields" transient condition
    /// and to distinguish Complete from Partial.
    pub fn extracted_field_count(&self) -> usize {
        let mut count = 0;
        count += self.name.is_some() as usize;
        count += self.provider.is_some() as usize;
        count += self.index_name.is_some() as usize;
        count += self.ter_pct.is_some() as usize;
        count += self.fund_size_m.is_some() as usize;
        count += self.fund_currency.is_some() as usize;
        count += self.replication.is_some() as usize;
        count += self.domicile.is_some() as usize;
        count += self.legal_structure.is_some() as usize;
        count += self.inception_date.is_some() as usize;
        count += self.distribution_policy.is_some() as usize;
        count += self.distribution_frequency.is_some() as usize;
        count += self.return_ytd_pct.is_some() as usize;
        count += self.return_1y_pct.is_some() as usize;
        count += self.return_3y_pct.is_some() as usize;
        count += self.return_5y_pct.is_some() as usize;
        count += self.volatility_1y_pct.is_some() as usize;
        count += self.volatility_3y_pct.is_some() as usize;
        count += self.tracking_error_pct.is_some() as usize;
        count += (!self.listings.is_empty()) as usize;
        count += self.dividend_yield_pct.is_some() as usize;
        count += self.description.is_some() as usize;
        count
    }

    /// Merge a newer partial extraction into this record without losing
    /// anything already gathered.
    ///
    /// A later failed attempt must never return less information than an
    /// earlier attempt within the same item, so existing values win and
    /// the newer attempt only fills gaps.
    pub fn merge_missing_from(&mut self, newer: ExtractedRecord) {
        macro_rules! fill {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = newer.$field;
                }
            };
        }
        fill!(name);
        fill!(provider);
        fill!(index_name);
        fill!(ter_pct);
        fill!(fund_size_m);
        fill!(fund_currency);
        fill!(replication);
        fill!(domicile);
        fill!(legal_structure);
        fill!(inception_date);
        fill!(distribution_policy);
        fill!(distribution_frequency);
        fill!(return_ytd_pct);
        fill!(return_1y_pct);
        fill!(return_3y_pct);
        fill!(return_5y_pct);
        fill!(volatility_1y_pct);
        fill!(volatility_3y_pct);
        fill!(tracking_error_pct);
        fill!(dividend_yield_pct);
        fill!(description);
        if self.listings.is_empty() {
            self.listings = newer.listings;
        }
    }
}

/// A finalized record together with its computed rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: ExtractedRecord,
    pub rating: crate::rating::RatingResult,
}
