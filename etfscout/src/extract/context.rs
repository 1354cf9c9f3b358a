//! Exchange-context strategy
//!
//! Locates known exchange names and aliases anywhere in the document's
//! visible text, then applies ticker-shaped patterns only within a
//! bounded window around each occurrence. Bounding the window is what
//! keeps the false-positive rate low compared to whole-document search.

use crate::extract::{excerpt, DocumentContext};
use crate::types::{CandidateValue, ExtractStrategy, FieldCandidate, FieldGroup};
use once_cell::sync::Lazy;
use regex::Regex;

/// Characters of context taken on each side of an alias occurrence
const CONTEXT_WINDOW: usize = 100;

/// Known exchanges: canonical name plus lower-case aliases to search for
const EXCHANGES: &[(&str, &[&str])] = &[
    ("London Stock Exchange", &["london stock exchange", "lse"]),
    ("Xetra", &["xetra"]),
    ("Euronext Amsterdam", &["euronext amsterdam"]),
    ("Euronext Paris", &["euronext paris"]),
    ("Borsa Italiana", &["borsa italiana", "euronext milan"]),
    ("SIX Swiss Exchange", &["six swiss exchange", "six swiss"]),
    ("Boerse Stuttgart", &["stuttgart stock exchange", "boerse stuttgart"]),
    ("gettex", &["gettex"]),
    ("NYSE", &["new york stock exchange"]),
    ("Nasdaq", &["nasdaq"]),
];

/// Ticker-shaped patterns applied only inside the window, labeled or
/// parenthesized forms first
static WINDOW_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)(?:ticker|symbol|trading\s+code)\s*[:\s]\s*([A-Za-z0-9]{2,8})\b")
            .expect("valid pattern"),
        Regex::new(r"\(([A-Z0-9]{2,8})\)").expect("valid pattern"),
    ]
});

static WINDOW_CURRENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(EUR|USD|GBP|GBX|CHF|JPY|SEK|NOK|DKK|CAD|AUD)\b").expect("valid pattern")
});

/// Windowed free-text strategy for the listings group
pub struct ExchangeContextStrategy;

impl ExchangeContextStrategy {
    /// Byte offsets of every case-insensitive whole-word occurrence of
    /// `alias`. Word boundaries matter for short aliases: "lse" must not
    /// match inside "else".
    fn occurrences(haystack_lower: &str, alias: &str) -> Vec<usize> {
        let bytes = haystack_lower.as_bytes();
        let mut found = Vec::new();
        let mut start = 0;
        while let Some(pos) = haystack_lower[start..].find(alias) {
            let at = start + pos;
            let end = at + alias.len();
            let before_ok = at == 0 || !bytes[at - 1].is_ascii_alphanumeric();
            let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
            if before_ok && after_ok {
                found.push(at);
            }
            start = end;
        }
        found
    }

    /// Clamp a window around an occurrence to char boundaries
    fn window(text: &str, center: usize, alias_len: usize) -> &str {
        let mut lo = center.saturating_sub(CONTEXT_WINDOW);
        let mut hi = (center + alias_len + CONTEXT_WINDOW).min(text.len());
        while lo > 0 && !text.is_char_boundary(lo) {
            lo -= 1;
        }
        while hi < text.len() && !text.is_char_boundary(hi) {
            hi += 1;
        }
        &text[lo..hi]
    }
}

impl ExtractStrategy for ExchangeContextStrategy {
    fn name(&self) -> &'static str {
        "ExchangeContextStrategy"
    }

    fn base_confidence(&self) -> f32 {
        0.75
    }

    fn extract(&self, doc: &DocumentContext, group: FieldGroup) -> Vec<FieldCandidate> {
        if group != FieldGroup::Listings {
            return Vec::new();
        }

        let text = &doc.text;
        let lower = text.to_lowercase();
        let mut candidates = Vec::new();

        for (canonical, aliases) in EXCHANGES {
            for alias in *aliases {
                for pos in Self::occurrences(&lower, alias) {
                    let window = Self::window(text, pos, alias.len());

                    for pattern in WINDOW_PATTERNS.iter() {
                        for capture in pattern.captures_iter(window) {
                            let ticker = capture[1].to_string();
                            let currency = WINDOW_CURRENCY
                                .captures(window)
                                .map(|c| c[1].to_string());
                            candidates.push(FieldCandidate {
                                field: None,
                                value: CandidateValue::Listing {
                                    exchange: Some(canonical.to_string()),
                                    ticker,
                                    currency,
                                    bloomberg_code: None,
                                    reuters_code: None,
                                },
                                confidence: 0.75,
                                source: "ExchangeContextStrategy",
                                excerpt: excerpt(window),
                            });
                        }
                    }
                }
            }
        }

        candidates
    }
}
