//! Multi-strategy field-extraction engine
//!
//! For each field group an ordered list of strategies runs until one
//! yields an accepted candidate, or all are exhausted and the field stays
//! absent. Candidate validation and deterministic selection live here so
//! every strategy is held to the same rules.
//!
//! # Strategy order
//! 1. `TableStrategy` — structural position, strongest signal
//! 2. `ExchangeContextStrategy` — windowed free-text search
//! 3. `DocumentRegexStrategy` — whole-document label-anchored fallback
//! 4. `StructuredDataStrategy` — embedded machine-readable data

pub mod cleanup;
pub mod context;
pub mod document;
pub mod listings;
pub mod numeric;
pub mod structured;
pub mod table;
pub mod validate;

use crate::model::{ExtractedRecord, ScrapeStatus};
use crate::types::{
    CandidateValue, ConfidenceValue, ExtractStrategy, FieldCandidate, FieldGroup, FieldKind,
    FieldValue, RawDocument,
};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use std::collections::HashMap;
use tracing::{debug, trace};

pub use validate::{CandidateValidator, DenyList, ValidationError};

/// Maximum characters kept in a candidate's source excerpt
const EXCERPT_LEN: usize = 120;

/// Truncate a source excerpt to a char boundary
pub(crate) fn excerpt(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.len() <= EXCERPT_LEN {
        return trimmed.to_string();
    }
    let mut end = EXCERPT_LEN;
    while end > 0 && !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

static TAG_STRIPPER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").expect("valid pattern")
});
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid pattern"));

/// Parsed document shared by all strategies for one extraction pass
///
/// Holds the DOM for structural strategies and a flattened visible-text
/// view (script/style content removed) for the regex strategies. Built
/// and dropped synchronously within one extraction call.
pub struct DocumentContext {
    pub isin: crate::types::Isin,
    pub dom: Html,
    pub text: String,
}

impl DocumentContext {
    pub fn parse(raw: &RawDocument) -> Self {
        let without_scripts = TAG_STRIPPER.replace_all(&raw.html, " ");
        let text_raw = TAGS.replace_all(&without_scripts, " ");
        let text = text_raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            isin: raw.isin.clone(),
            dom: Html::parse_document(&raw.html),
            text,
        }
    }
}

/// Accepted value ranges per numeric field; candidates outside the range
/// are rejected and the next candidate is tried
fn range_ok(kind: FieldKind, value: f64) -> bool {
    let (lo, hi) = match kind {
        FieldKind::Ter => (0.0, 10.0),
        FieldKind::FundSize => (0.0, 5_000_000.0),
        FieldKind::ReturnYtd
        | FieldKind::Return1y
        | FieldKind::Return3y
        | FieldKind::Return5y => (-100.0, 10_000.0),
        FieldKind::Volatility1y | FieldKind::Volatility3y => (0.0, 500.0),
        FieldKind::TrackingError => (0.0, 50.0),
        FieldKind::DividendYield => (0.0, 100.0),
        _ => return true,
    };
    value >= lo && value <= hi
}

/// Date formats seen across page variants
const DATE_FORMATS: &[&str] = &["%d %B %Y", "%B %d, %Y", "%d.%m.%Y", "%d/%m/%Y", "%Y-%m-%d"];

fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// Per-field resolution outcomes from one extraction pass
///
/// Carries the provenance a record alone cannot: which strategy produced
/// each value at what confidence, and for unfilled fields whether no
/// candidate existed (`Absent`) or candidates were all rejected
/// (`Invalid`, with the last rejection reason).
#[derive(Debug, Default)]
pub struct ExtractionTrace {
    outcomes: Vec<(FieldKind, FieldValue<String>)>,
}

impl ExtractionTrace {
    pub fn outcome(&self, kind: FieldKind) -> Option<&FieldValue<String>> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(FieldKind, FieldValue<String>)> {
        self.outcomes.iter()
    }
}

/// The extraction engine: ordered strategies plus shared validation
pub struct ExtractionEngine {
    strategies: Vec<Box<dyn ExtractStrategy>>,
    validator: CandidateValidator,
}

impl ExtractionEngine {
    /// Engine with the default strategy order
    pub fn new(validator: CandidateValidator) -> Self {
        Self {
            strategies: vec![
                Box::new(table::TableStrategy::new()),
                Box::new(context::ExchangeContextStrategy),
                Box::new(document::DocumentRegexStrategy::new()),
                Box::new(structured::StructuredDataStrategy::new()),
            ],
            validator,
        }
    }

    /// Engine with a caller-supplied strategy list (tests)
    pub fn with_strategies(
        strategies: Vec<Box<dyn ExtractStrategy>>,
        validator: CandidateValidator,
    ) -> Self {
        Self { strategies, validator }
    }

    /// Extract a record from one fetched document
    ///
    /// Deterministic: the same document always produces the same record,
    /// including the `scraped_at` timestamp (taken from the fetch, not
    /// from the wall clock here).
    pub fn extract(&self, raw: &RawDocument) -> ExtractedRecord {
        self.extract_with_trace(raw).0
    }

    /// Extract a record plus the per-field outcome trace
    pub fn extract_with_trace(
        &self,
        raw: &RawDocument,
    ) -> (ExtractedRecord, ExtractionTrace) {
        let doc = DocumentContext::parse(raw);
        let mut record = ExtractedRecord::new(raw.isin.clone(), raw.fetched_at);
        let mut outcomes = ExtractionTrace::default();

        // Per-pass memo of strategy output, keyed by (strategy, group)
        let mut cache: Vec<HashMap<FieldGroup, Vec<FieldCandidate>>> =
            self.strategies.iter().map(|_| HashMap::new()).collect();

        for group in FieldGroup::ALL {
            if group == FieldGroup::Listings {
                self.resolve_listings(&doc, &mut cache, &mut record);
            } else {
                for kind in FieldKind::ALL.iter().filter(|k| k.group() == group) {
                    let outcome = self.resolve_field(&doc, &mut cache, &mut record, *kind);
                    trace!(field = ?kind, ?outcome, "Field outcome");
                    outcomes.outcomes.push((*kind, outcome));
                }
            }
        }

        record.status = classify_status(&record);
        debug!(
            isin = %record.isin,
            fields = record.extracted_field_count(),
            listings = record.listings.len(),
            status = ?record.status,
            "Extraction complete"
        );
        (record, outcomes)
    }

    fn candidates_for<'a>(
        &self,
        doc: &DocumentContext,
        cache: &'a mut Vec<HashMap<FieldGroup, Vec<FieldCandidate>>>,
        strategy_idx: usize,
        group: FieldGroup,
    ) -> &'a [FieldCandidate] {
        cache[strategy_idx]
            .entry(group)
            .or_insert_with(|| self.strategies[strategy_idx].extract(doc, group))
    }

    /// Resolve the listings group: first strategy whose candidates
    /// survive validation wins the whole group.
    fn resolve_listings(
        &self,
        doc: &DocumentContext,
        cache: &mut Vec<HashMap<FieldGroup, Vec<FieldCandidate>>>,
        record: &mut ExtractedRecord,
    ) {
        for idx in 0..self.strategies.len() {
            let candidates =
                self.candidates_for(doc, cache, idx, FieldGroup::Listings).to_vec();
            if candidates.is_empty() {
                continue;
            }
            let assembled = listings::assemble_listings(&candidates, &self.validator);
            if !assembled.is_empty() {
                trace!(
                    strategy = self.strategies[idx].name(),
                    listings = assembled.len(),
                    "Listings group resolved"
                );
                record.listings = assembled;
                return;
            }
        }
    }

    /// Resolve one named field: strategies in order, candidates within a
    /// strategy ordered deterministically, first valid value wins.
    ///
    /// The returned outcome is a tagged value: `Found` with confidence
    /// and provenance, `Absent` when no strategy produced a candidate, or
    /// `Invalid` when candidates existed but all failed validation.
    fn resolve_field(
        &self,
        doc: &DocumentContext,
        cache: &mut Vec<HashMap<FieldGroup, Vec<FieldCandidate>>>,
        record: &mut ExtractedRecord,
        kind: FieldKind,
    ) -> FieldValue<String> {
        let mut last_rejection: Option<String> = None;

        for idx in 0..self.strategies.len() {
            let mut candidates: Vec<FieldCandidate> = self
                .candidates_for(doc, cache, idx, kind.group())
                .iter()
                .filter(|c| c.field == Some(kind))
                .cloned()
                .collect();
            if candidates.is_empty() {
                continue;
            }

            // Deterministic within-strategy order: confidence, then value
            candidates.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| candidate_text(a).cmp(candidate_text(b)))
            });

            for candidate in &candidates {
                match self.apply_candidate(record, kind, candidate) {
                    Ok(()) => {
                        return FieldValue::Found(ConfidenceValue::new(
                            candidate_text(candidate).to_string(),
                            candidate.confidence,
                            candidate.source,
                        ));
                    }
                    Err(reason) => {
                        last_rejection = Some(reason.to_string());
                    }
                }
            }
        }

        match last_rejection {
            Some(reason) => FieldValue::Invalid(reason),
            None => FieldValue::Absent,
        }
    }

    /// Parse and store one candidate value; errors fall through to the
    /// next candidate or strategy
    fn apply_candidate(
        &self,
        record: &mut ExtractedRecord,
        kind: FieldKind,
        candidate: &FieldCandidate,
    ) -> Result<(), ValidationError> {
        let raw = candidate_text(candidate);

        match kind {
            // numeric fields
            FieldKind::Ter
            | FieldKind::FundSize
            | FieldKind::ReturnYtd
            | FieldKind::Return1y
            | FieldKind::Return3y
            | FieldKind::Return5y
            | FieldKind::Volatility1y
            | FieldKind::Volatility3y
            | FieldKind::TrackingError
            | FieldKind::DividendYield => {
                let Some(value) = numeric::parse_decimal(raw) else {
                    // Placeholder text is absence, not zero; skip quietly
                    return Err(ValidationError::ShapeMismatch(raw.to_string()));
                };
                if !range_ok(kind, value) {
                    return Err(ValidationError::OutOfRange(
                        raw.to_string(),
                        format!("{:?} value {} outside accepted range", kind, value),
                    ));
                }
                let slot = match kind {
                    FieldKind::Ter => &mut record.ter_pct,
                    FieldKind::FundSize => &mut record.fund_size_m,
                    FieldKind::ReturnYtd => &mut record.return_ytd_pct,
                    FieldKind::Return1y => &mut record.return_1y_pct,
                    FieldKind::Return3y => &mut record.return_3y_pct,
                    FieldKind::Return5y => &mut record.return_5y_pct,
                    FieldKind::Volatility1y => &mut record.volatility_1y_pct,
                    FieldKind::Volatility3y => &mut record.volatility_3y_pct,
                    FieldKind::TrackingError => &mut record.tracking_error_pct,
                    FieldKind::DividendYield => &mut record.dividend_yield_pct,
                    _ => unreachable!(),
                };
                *slot = Some(value);
                Ok(())
            }

            FieldKind::InceptionDate => {
                let Some(date) = parse_flexible_date(raw) else {
                    return Err(ValidationError::ShapeMismatch(raw.to_string()));
                };
                record.inception_date = Some(date);
                Ok(())
            }

            // text fields, cleaned before acceptance
            _ => {
                let Some(cleaned) = cleanup::clean_text_opt(raw) else {
                    return Err(ValidationError::ShapeMismatch(raw.to_string()));
                };
                let slot = match kind {
                    FieldKind::Name => &mut record.name,
                    FieldKind::Provider => &mut record.provider,
                    FieldKind::IndexName => &mut record.index_name,
                    FieldKind::FundCurrency => &mut record.fund_currency,
                    FieldKind::Replication => &mut record.replication,
                    FieldKind::Domicile => &mut record.domicile,
                    FieldKind::LegalStructure => &mut record.legal_structure,
                    FieldKind::DistributionPolicy => &mut record.distribution_policy,
                    FieldKind::DistributionFrequency => &mut record.distribution_frequency,
                    FieldKind::Description => &mut record.description,
                    _ => unreachable!(),
                };
                *slot = Some(cleaned);
                Ok(())
            }
        }
    }
}

fn candidate_text(candidate: &FieldCandidate) -> &str {
    match &candidate.value {
        CandidateValue::Text(t) | CandidateValue::Numeric(t) => t,
        CandidateValue::Listing { ticker, .. } => ticker,
    }
}

/// Complete / Partial / Failed classification for a finished extraction
fn classify_status(record: &ExtractedRecord) -> ScrapeStatus {
    if record.extracted_field_count() == 0 {
        return ScrapeStatus::Failed;
    }
    let core_present = record.name.is_some()
        && record.ter_pct.is_some()
        && record.fund_size_m.is_some()
        && !record.listings.is_empty();
    if core_present {
        ScrapeStatus::Complete
    } else {
        ScrapeStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn raw(html: &str) -> RawDocument {
        RawDocument {
            isin: "IE00B5BMR087".parse().unwrap(),
            html: html.to_string(),
            fetched_at: Utc::now(),
        }
    }

    const FULL_PAGE: &str = r#"
        <html>
        <head>
            <title>iShares Core S&amp;P 500 UCITS ETF</title>
            <meta name="description" content="Tracks the S&amp;P 500 index. Show more">
            <script type="application/ld+json">{"name":"iShares Core S&amp;P 500 UCITS ETF","provider":"iShares"}</script>
        </head>
        <body>
            <h1>iShares Core S&amp;P 500 UCITS ETF</h1>
            <table>
                <tr><td>Total expense ratio</td><td>0.07% p.a.</td></tr>
                <tr><td>Fund size</td><td>EUR 45,632 m</td></tr>
                <tr><td>Replication</td><td>Physical</td></tr>
                <tr><td>Fund domicile</td><td>Ireland</td></tr>
                <tr><td>Distribution policy</td><td>Accumulating</td></tr>
                <tr><td>Tracking error</td><td>0,12%</td></tr>
                <tr><td>Return 3 years</td><td>41.2%</td></tr>
            </table>
            <table>
                <tr><th>Exchange</th><th>Ticker</th><th>Currency</th></tr>
                <tr><td>London Stock Exchange</td><td>CSP1</td><td>GBX</td></tr>
                <tr><td>Euronext Amsterdam</td><td>CSPX</td><td>EUR</td></tr>
            </table>
        </body>
        </html>"#;

    #[test]
    fn test_full_page_extraction() {
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let record = engine.extract(&raw(FULL_PAGE));

        assert_eq!(record.name.as_deref(), Some("iShares Core S&P 500 UCITS ETF"));
        assert_eq!(record.ter_pct, Some(0.07));
        assert_eq!(record.fund_size_m, Some(45632.0));
        assert_eq!(record.replication.as_deref(), Some("Physical"));
        assert_eq!(record.domicile.as_deref(), Some("Ireland"));
        assert_eq!(record.tracking_error_pct, Some(0.12));
        assert_eq!(record.return_3y_pct, Some(41.2));
        assert_eq!(record.listings.len(), 2);
        assert_eq!(record.status, ScrapeStatus::Complete);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let document = raw(FULL_PAGE);

        let first = engine.extract(&document);
        let second = engine.extract(&document);

        assert_eq!(first, second);
        // Byte-identical when serialized
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_scenario_a_primary_tiebreak() {
        // Equal-length tickers CSP1/CSPX: lexicographic rule fixes CSP1
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let record = engine.extract(&raw(FULL_PAGE));
        assert_eq!(record.primary_ticker(), Some("CSP1"));
    }

    #[test]
    fn test_empty_page_is_failed_with_no_fields() {
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let record = engine.extract(&raw("<html><body></body></html>"));
        assert_eq!(record.extracted_field_count(), 0);
        assert_eq!(record.status, ScrapeStatus::Failed);
    }

    #[test]
    fn test_placeholder_metric_stays_absent() {
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let record = engine.extract(&raw(
            r#"<html><body><h1>Some Fund</h1><table>
            <tr><td>Total expense ratio</td><td>-</td></tr>
            </table></body></html>"#,
        ));
        assert_eq!(record.ter_pct, None);
    }

    #[test]
    fn test_fallback_strategy_only_when_table_absent() {
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let record = engine.extract(&raw(
            "<html><body><h1>Fund</h1><p>Ticker: VUSA on the exchange.</p></body></html>",
        ));
        assert_eq!(record.listings.len(), 1);
        assert_eq!(record.primary_ticker(), Some("VUSA"));
    }

    #[test]
    fn test_description_cleanup_applied() {
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let record = engine.extract(&raw(FULL_PAGE));
        let description = record.description.unwrap();
        assert!(!description.to_lowercase().contains("show more"));
    }

    #[test]
    fn test_trace_carries_provenance_for_found_fields() {
        let engine = ExtractionEngine::new(CandidateValidator::default());
        let (record, outcomes) = engine.extract_with_trace(&raw(FULL_PAGE));

        assert_eq!(record.ter_pct, Some(0.07));
        match outcomes.outcome(FieldKind::Ter) {
            Some(FieldValue::Found(v)) => {
                assert_eq!(v.source, "TableStrategy");
                assert!(v.confidence > 0.0);
            }
            other => panic!("expected Found outcome for TER, got {:?}", other),
        }
    }

    #[test]
    fn test_trace_distinguishes_absent_from_invalid() {
        let engine = ExtractionEngine::new(CandidateValidator::default());

        // No TER anywhere: absent
        let (_, outcomes) = engine.extract_with_trace(&raw(
            "<html><body><h1>Some Fund</h1></body></html>",
        ));
        assert_eq!(outcomes.outcome(FieldKind::Ter), Some(&FieldValue::Absent));

        // TER candidate exists but is a placeholder: invalid, with reason
        let (record, outcomes) = engine.extract_with_trace(&raw(
            r#"<html><body><h1>Some Fund</h1><table>
            <tr><td>Total expense ratio</td><td>-</td></tr>
            </table></body></html>"#,
        ));
        assert_eq!(record.ter_pct, None);
        assert!(matches!(
            outcomes.outcome(FieldKind::Ter),
            Some(FieldValue::Invalid(_))
        ));
    }

    #[test]
    fn test_date_parsing_variants() {
        assert_eq!(
            parse_flexible_date("19 May 2010"),
            NaiveDate::from_ymd_opt(2010, 5, 19)
        );
        assert_eq!(
            parse_flexible_date("19.05.2010"),
            NaiveDate::from_ymd_opt(2010, 5, 19)
        );
        assert_eq!(
            parse_flexible_date("2010-05-19"),
            NaiveDate::from_ymd_opt(2010, 5, 19)
        );
        assert_eq!(parse_flexible_date("sometime"), None);
    }
}
