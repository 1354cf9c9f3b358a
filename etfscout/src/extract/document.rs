//! Full-document regex fallback
//!
//! Label-anchored patterns run over the whole visible text. Lowest
//! priority for tickers: only consulted when the structural and windowed
//! strategies produced nothing for the listings group. Also the fallback
//! source for identity fields (document title/heading) and the
//! description (meta tag).

use crate::extract::{excerpt, DocumentContext};
use crate::types::{CandidateValue, ExtractStrategy, FieldCandidate, FieldGroup, FieldKind};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;

/// Prioritized label-anchored ticker patterns; the first pattern with any
/// match wins, later patterns are not consulted
static TICKER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)ticker\s*[:\s]\s*([A-Za-z0-9]{2,8})\b").expect("valid pattern"),
        Regex::new(r"(?i)symbol\s*[:\s]\s*([A-Za-z0-9]{2,8})\b").expect("valid pattern"),
        Regex::new(r"(?i)available\s+as\s+([A-Z0-9]{2,8})\s+on\b").expect("valid pattern"),
        Regex::new(r"\(([A-Z0-9]{2,8})\)").expect("valid pattern"),
    ]
});

/// Label-anchored numeric patterns for metric fields
static METRIC_PATTERNS: Lazy<Vec<(FieldKind, Regex)>> = Lazy::new(|| {
    vec![
        (
            FieldKind::Ter,
            Regex::new(r"(?i)(?:total\s+expense\s+ratio|ongoing\s+charges|ter)\s*[:\s]\s*([0-9][0-9.,]*\s*%)")
                .expect("valid pattern"),
        ),
        (
            FieldKind::FundSize,
            Regex::new(r"(?i)fund\s+size\s*[:\s]\s*([A-Z]{3}\s*[0-9][0-9.,]*\s*(?:m|bn)?)")
                .expect("valid pattern"),
        ),
        (
            FieldKind::TrackingError,
            Regex::new(r"(?i)tracking\s+error\s*[:\s]\s*([0-9][0-9.,]*\s*%)").expect("valid pattern"),
        ),
        (
            FieldKind::DividendYield,
            Regex::new(r"(?i)dividend\s+yield\s*[:\s]\s*([0-9][0-9.,]*\s*%)").expect("valid pattern"),
        ),
    ]
});

/// Full-document fallback strategy
pub struct DocumentRegexStrategy {
    h1_selector: Selector,
    title_selector: Selector,
    meta_description_selector: Selector,
}

impl DocumentRegexStrategy {
    pub fn new() -> Self {
        Self {
            h1_selector: Selector::parse("h1").expect("valid selector"),
            title_selector: Selector::parse("title").expect("valid selector"),
            meta_description_selector: Selector::parse("meta[name=\"description\"]")
                .expect("valid selector"),
        }
    }

    fn ticker_candidates(&self, doc: &DocumentContext) -> Vec<FieldCandidate> {
        for pattern in TICKER_PATTERNS.iter() {
            let candidates: Vec<FieldCandidate> = pattern
                .captures_iter(&doc.text)
                .map(|capture| {
                    let whole = capture.get(0).map(|m| m.as_str()).unwrap_or("");
                    FieldCandidate {
                        field: None,
                        value: CandidateValue::Listing {
                            exchange: None,
                            ticker: capture[1].to_string(),
                            currency: None,
                            bloomberg_code: None,
                            reuters_code: None,
                        },
                        confidence: 0.5,
                        source: "DocumentRegexStrategy",
                        excerpt: excerpt(whole),
                    }
                })
                .collect();
            if !candidates.is_empty() {
                return candidates;
            }
        }
        Vec::new()
    }

    fn identity_candidates(&self, doc: &DocumentContext) -> Vec<FieldCandidate> {
        let mut candidates = Vec::new();

        let heading = doc
            .dom
            .select(&self.h1_selector)
            .next()
            .map(|h| h.text().collect::<String>())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                doc.dom
                    .select(&self.title_selector)
                    .next()
                    .map(|t| t.text().collect::<String>())
            });

        if let Some(name) = heading {
            let name = name.trim().to_string();
            if !name.is_empty() {
                candidates.push(FieldCandidate {
                    field: Some(FieldKind::Name),
                    value: CandidateValue::Text(name.clone()),
                    confidence: 0.6,
                    source: "DocumentRegexStrategy",
                    excerpt: excerpt(&name),
                });
            }
        }

        candidates
    }

    fn description_candidates(&self, doc: &DocumentContext) -> Vec<FieldCandidate> {
        let mut candidates = Vec::new();
        if let Some(meta) = doc.dom.select(&self.meta_description_selector).next() {
            if let Some(content) = meta.value().attr("content") {
                let content = content.trim();
                if !content.is_empty() {
                    candidates.push(FieldCandidate {
                        field: Some(FieldKind::Description),
                        value: CandidateValue::Text(content.to_string()),
                        confidence: 0.6,
                        source: "DocumentRegexStrategy",
                        excerpt: excerpt(content),
                    });
                }
            }
        }
        candidates
    }

    fn metric_candidates(&self, doc: &DocumentContext, group: FieldGroup) -> Vec<FieldCandidate> {
        METRIC_PATTERNS
            .iter()
            .filter(|(kind, _)| kind.group() == group)
            .filter_map(|(kind, pattern)| {
                pattern.captures(&doc.text).map(|capture| {
                    let whole = capture.get(0).map(|m| m.as_str()).unwrap_or("");
                    FieldCandidate {
                        field: Some(*kind),
                        value: CandidateValue::Numeric(capture[1].to_string()),
                        confidence: 0.5,
                        source: "DocumentRegexStrategy",
                        excerpt: excerpt(whole),
                    }
                })
            })
            .collect()
    }
}

impl Default for DocumentRegexStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for DocumentRegexStrategy {
    fn name(&self) -> &'static str {
        "DocumentRegexStrategy"
    }

    fn base_confidence(&self) -> f32 {
        0.5
    }

    fn extract(&self, doc: &DocumentContext, group: FieldGroup) -> Vec<FieldCandidate> {
        match group {
            FieldGroup::Listings => self.ticker_candidates(doc),
            FieldGroup::Identity => self.identity_candidates(doc),
            FieldGroup::Description => self.description_candidates(doc),
            _ => self.metric_candidates(doc, group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawDocument;
    use chrono::Utc;

    fn context(html: &str) -> DocumentContext {
        DocumentContext::parse(&RawDocument {
            isin: "IE00B5BMR087".parse().unwrap(),
            html: html.to_string(),
            fetched_at: Utc::now(),
        })
    }

    #[test]
    fn test_labeled_ticker_beats_parenthesized() {
        let doc = context(
            "<html><body><p>Fund overview (ABCD). Ticker: CSPX for the main line.</p></body></html>",
        );
        let candidates = DocumentRegexStrategy::new().extract(&doc, FieldGroup::Listings);
        assert_eq!(candidates.len(), 1);
        assert!(matches!(
            &candidates[0].value,
            CandidateValue::Listing { ticker, .. } if ticker == "CSPX"
        ));
    }

    #[test]
    fn test_parenthesized_fallback_when_no_label() {
        let doc = context("<html><body><p>iShares Core S&amp;P 500 (CSPX) overview.</p></body></html>");
        let candidates = DocumentRegexStrategy::new().extract(&doc, FieldGroup::Listings);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_name_from_heading() {
        let doc = context("<html><body><h1>iShares Core S&amp;P 500 UCITS ETF</h1></body></html>");
        let candidates = DocumentRegexStrategy::new().extract(&doc, FieldGroup::Identity);
        assert!(candidates.iter().any(|c| {
            c.field == Some(FieldKind::Name)
                && matches!(&c.value, CandidateValue::Text(t) if t.contains("iShares"))
        }));
    }

    #[test]
    fn test_description_from_meta_tag() {
        let doc = context(
            r#"<html><head><meta name="description" content="Tracks the S&amp;P 500 index."></head><body></body></html>"#,
        );
        let candidates = DocumentRegexStrategy::new().extract(&doc, FieldGroup::Description);
        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn test_metric_label_pattern() {
        let doc = context("<html><body><p>Total expense ratio: 0.07% per annum.</p></body></html>");
        let candidates = DocumentRegexStrategy::new().extract(&doc, FieldGroup::Cost);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].field, Some(FieldKind::Ter));
    }
}
