//! Core types and trait definitions for the extraction pipeline
//!
//! Defines the candidate/strategy vocabulary shared by every extraction
//! strategy:
//! - `Isin` — validated source identifier
//! - `RawDocument` — one fetched page, tied to one attempt
//! - `ConfidenceValue<T>` — value + confidence + provenance
//! - `FieldValue<T>` — tagged per-field extraction outcome
//! - `FieldCandidate` / `ExtractStrategy` — the pluggable strategy seam

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Length of an ISIN (2-char country code + 9-char NSIN + check digit)
pub const ISIN_LEN: usize = 12;

/// Validated fund identifier (ISIN)
///
/// Parse-time validation: exactly 12 ASCII alphanumeric characters,
/// normalized to upper case. A malformed identifier is a terminal error —
/// retrying a fetch cannot fix it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Isin(String);

impl Isin {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Isin {
    type Err = IsinParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != ISIN_LEN {
            return Err(IsinParseError::BadLength(trimmed.len()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IsinParseError::BadCharacter(trimmed.to_string()));
        }
        Ok(Isin(trimmed.to_ascii_uppercase()))
    }
}

impl fmt::Display for Isin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier parse failure (terminal, never retried)
#[derive(Debug, Error)]
pub enum IsinParseError {
    #[error("ISIN must be {ISIN_LEN} characters, got {0}")]
    BadLength(usize),

    #[error("ISIN contains non-alphanumeric characters: {0}")]
    BadCharacter(String),
}

// ============================================================================
// Fetched documents
// ============================================================================

/// One fetched page for one identifier and one attempt
///
/// Ephemeral: consumed by extraction, never persisted.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Identifier the page was fetched for
    pub isin: Isin,
    /// Raw HTML body
    pub html: String,
    /// Fetch completion time
    pub fetched_at: DateTime<Utc>,
}

// ============================================================================
// Confidence-scored values
// ============================================================================

/// Confidence-scored extracted value with source provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceValue<T> {
    /// Extracted value
    pub value: T,
    /// Confidence score (0.0-1.0)
    pub confidence: f32,
    /// Strategy that produced this value
    pub source: String,
}

impl<T> ConfidenceValue<T> {
    /// Create new confidence value with clamped confidence (0.0-1.0)
    pub fn new(value: T, confidence: f32, source: impl Into<String>) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }
}

/// Tagged per-field extraction outcome
///
/// Absence is a first-class value, distinct from zero or empty string.
/// `Invalid` records why a candidate was rejected without losing the
/// distinction from "nothing found at all".
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<T> {
    /// A validated value with confidence and provenance
    Found(ConfidenceValue<T>),
    /// No strategy produced a candidate
    Absent,
    /// Candidates existed but all failed validation
    Invalid(String),
}

impl<T> FieldValue<T> {
    /// Value if found, discarding confidence/provenance
    pub fn into_option(self) -> Option<T> {
        match self {
            FieldValue::Found(cv) => Some(cv.value),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FieldValue::Found(_))
    }
}

// ============================================================================
// Strategy seam
// ============================================================================

/// Logical field groups resolved independently by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldGroup {
    /// Fund name, provider, benchmark index
    Identity,
    /// Ongoing cost ratio (TER)
    Cost,
    /// Fund size, currency, replication, domicile, legal structure
    SizeStructure,
    /// Distribution policy and frequency
    Distribution,
    /// Returns over multiple horizons, volatility
    Performance,
    /// Tracking error
    Risk,
    /// Exchange listings and tickers
    Listings,
    /// Dividend yield
    Dividend,
    /// Free-text description
    Description,
}

impl FieldGroup {
    /// Resolution order. Listings last so identity/metric context is
    /// already logged when the hard case runs.
    pub const ALL: [FieldGroup; 9] = [
        FieldGroup::Identity,
        FieldGroup::Cost,
        FieldGroup::SizeStructure,
        FieldGroup::Distribution,
        FieldGroup::Performance,
        FieldGroup::Risk,
        FieldGroup::Dividend,
        FieldGroup::Description,
        FieldGroup::Listings,
    ];
}

/// Individually named fields within groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Name,
    Provider,
    IndexName,
    Ter,
    FundSize,
    FundCurrency,
    Replication,
    Domicile,
    LegalStructure,
    DistributionPolicy,
    DistributionFrequency,
    InceptionDate,
    ReturnYtd,
    Return1y,
    Return3y,
    Return5y,
    Volatility1y,
    Volatility3y,
    TrackingError,
    DividendYield,
    Description,
}

impl FieldKind {
    /// Every named field, in record order
    pub const ALL: [FieldKind; 21] = [
        FieldKind::Name,
        FieldKind::Provider,
        FieldKind::IndexName,
        FieldKind::Ter,
        FieldKind::FundSize,
        FieldKind::FundCurrency,
        FieldKind::Replication,
        FieldKind::Domicile,
        FieldKind::LegalStructure,
        FieldKind::InceptionDate,
        FieldKind::DistributionPolicy,
        FieldKind::DistributionFrequency,
        FieldKind::ReturnYtd,
        FieldKind::Return1y,
        FieldKind::Return3y,
        FieldKind::Return5y,
        FieldKind::Volatility1y,
        FieldKind::Volatility3y,
        FieldKind::TrackingError,
        FieldKind::DividendYield,
        FieldKind::Description,
    ];

    pub fn group(&self) -> FieldGroup {
        match self {
            FieldKind::Name | FieldKind::Provider | FieldKind::IndexName => FieldGroup::Identity,
            FieldKind::Ter => FieldGroup::Cost,
            FieldKind::FundSize
            | FieldKind::FundCurrency
            | FieldKind::Replication
            | FieldKind::Domicile
            | FieldKind::LegalStructure
            | FieldKind::InceptionDate => FieldGroup::SizeStructure,
            FieldKind::DistributionPolicy | FieldKind::DistributionFrequency => {
                FieldGroup::Distribution
            }
            FieldKind::ReturnYtd
            | FieldKind::Return1y
            | FieldKind::Return3y
            | FieldKind::Return5y
            | FieldKind::Volatility1y
            | FieldKind::Volatility3y => FieldGroup::Performance,
            FieldKind::TrackingError => FieldGroup::Risk,
            FieldKind::DividendYield => FieldGroup::Dividend,
            FieldKind::Description => FieldGroup::Description,
        }
    }
}

/// Candidate payload produced by a strategy
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateValue {
    /// Free-text value (names, policies, description)
    Text(String),
    /// Raw numeric-looking text, parsed/validated downstream
    Numeric(String),
    /// One exchange listing row
    Listing {
        exchange: Option<String>,
        ticker: String,
        currency: Option<String>,
        bloomberg_code: Option<String>,
        reuters_code: Option<String>,
    },
}

/// One candidate as produced by a strategy, before validation
///
/// Candidates are never persisted; accepted values flow into the record
/// with their confidence and provenance.
#[derive(Debug, Clone)]
pub struct FieldCandidate {
    /// Named field, or `None` for listing-group candidates
    pub field: Option<FieldKind>,
    /// Candidate payload
    pub value: CandidateValue,
    /// Confidence score (0.0-1.0)
    pub confidence: f32,
    /// Strategy provenance
    pub source: &'static str,
    /// Short excerpt of the document region the candidate came from
    pub excerpt: String,
}

/// Pluggable extraction strategy
///
/// Strategies are pure over the parsed document: same document, same
/// candidates. The engine runs them in priority order per field group and
/// stops at the first strategy whose candidates survive validation.
pub trait ExtractStrategy: Send + Sync {
    /// Strategy name for provenance tracking
    fn name(&self) -> &'static str;

    /// Base confidence for candidates from this strategy (0.0-1.0)
    ///
    /// Structural position is the strongest signal, so the table strategy
    /// carries the highest base confidence.
    fn base_confidence(&self) -> f32;

    /// Produce candidates for one field group
    ///
    /// Returns an empty vec for groups this strategy does not cover —
    /// that is an expected outcome, not an error.
    fn extract(&self, doc: &crate::extract::DocumentContext, group: FieldGroup)
        -> Vec<FieldCandidate>;
}

// ============================================================================
// Tests
// ============================================================================
