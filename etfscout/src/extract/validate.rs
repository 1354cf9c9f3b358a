//! Candidate validation
//!
//! Every ticker candidate, whichever strategy produced it, passes the
//! same two checks: a shape check and a deny-list of known false
//! positives. The deny-list is data, not code — a built-in default ships
//! with the binary and an external file can replace it wholesale.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Ticker shape: alphanumeric, 2-8 characters
static TICKER_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{2,8}$").expect("ticker shape pattern is valid"));

/// Candidate rejection (strategy falls through to the next candidate)
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("candidate {0:?} does not look like a ticker")]
    ShapeMismatch(String),

    #[error("candidate {0:?} is a known false positive")]
    DenyListed(String),

    #[error("candidate {0:?} is out of range: {1}")]
    OutOfRange(String, String),
}

/// Built-in false positives: currency codes, fund-structure tokens,
/// exchange abbreviations, stopwords, file/protocol tokens, calendar and
/// unit abbreviations. Tokens frequently sit right next to real tickers
/// in source text and match the ticker shape.
const DEFAULT_DENYLIST: &[&str] = &[
    // currency codes
    "EUR", "USD", "GBP", "GBX", "CHF", "JPY", "SEK", "NOK", "DKK", "PLN", "CAD", "AUD", "HKD",
    "SGD", "MXN",
    // fund-structure tokens
    "ETF", "ETC", "ETN", "UCITS", "ACC", "DIST", "SICAV", "OEIC", "ICAV", "FCP", "REIT",
    // exchange-name abbreviations
    "LSE", "XETRA", "SIX", "NYSE", "NASDAQ", "BATS", "AMEX", "BME", "WSE", "OMX",
    // common stopwords seen in labels
    "THE", "AND", "FOR", "WITH", "FROM", "VON", "DER", "DES", "LES", "PER",
    // file and protocol tokens
    "HTTP", "HTTPS", "WWW", "HTML", "PDF", "JSON", "CSV", "XML", "API",
    // calendar abbreviations
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC", "MON",
    "TUE", "WED", "THU", "FRI", "SAT", "SUN", "YTD",
    // unit and metric abbreviations
    "PCT", "NAV", "TER", "ISIN", "WKN", "BP", "BPS", "MIO", "MRD",
];

/// Deny-list of known false-positive ticker tokens
#[derive(Debug, Clone)]
pub struct DenyList {
    tokens: HashSet<String>,
}

impl Default for DenyList {
    fn default() -> Self {
        Self {
            tokens: DEFAULT_DENYLIST.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl DenyList {
    /// Load from a file: one token per line, `#` starts a comment,
    /// blank lines ignored. Replaces the built-in list entirely.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let tokens: HashSet<String> = content
            .lines()
            .map(|line| line.split('#').next().unwrap_or("").trim())
            .filter(|line| !line.is_empty())
            .map(|line| line.to_ascii_uppercase())
            .collect();
        info!(path = %path.display(), tokens = tokens.len(), "Loaded ticker deny-list");
        Ok(Self { tokens })
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(&token.to_ascii_uppercase())
    }
}

/// Shared validator applied to candidates from every strategy
#[derive(Debug, Clone)]
pub struct CandidateValidator {
    denylist: DenyList,
}

impl CandidateValidator {
    pub fn new(denylist: DenyList) -> Self {
        Self { denylist }
    }

    /// Validate and normalize a ticker candidate
    ///
    /// Returns the upper-cased ticker on success.
    pub fn validate_ticker(&self, raw: &str) -> Result<String, ValidationError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if !TICKER_SHAPE.is_match(&normalized) {
            return Err(ValidationError::ShapeMismatch(raw.to_string()));
        }
        if self.denylist.contains(&normalized) {
            return Err(ValidationError::DenyListed(normalized));
        }
        Ok(normalized)
    }
}

impl Default for CandidateValidator {
    fn default() -> Self {
        Self::new(DenyList::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_real_tickers() {
        let v = CandidateValidator::default();
        for t in ["CSPX", "VUSA", "SXR8", "CSP1", "vwce"] {
            assert!(v.validate_ticker(t).is_ok(), "{} should validate", t);
        }
        assert_eq!(v.validate_ticker("vwce").unwrap(), "VWCE");
    }

    #[test]
    fn test_rejects_shape_mismatches() {
        let v = CandidateValidator::default();
        assert!(matches!(
            v.validate_ticker("X"),
            Err(ValidationError::ShapeMismatch(_))
        ));
        assert!(matches!(
            v.validate_ticker("TOOLONGTICKER"),
            Err(ValidationError::ShapeMismatch(_))
        ));
        assert!(matches!(
            v.validate_ticker("CS PX"),
            Err(ValidationError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_rejects_denylisted_tokens() {
        let v = CandidateValidator::default();
        for t in ["EUR", "ETF", "UCITS", "LSE", "PDF", "JAN", "ter"] {
            assert!(
                matches!(v.validate_ticker(t), Err(ValidationError::DenyListed(_))),
                "{} should be deny-listed",
                t
            );
        }
    }

    #[test]
    fn test_denylist_file_replaces_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("denylist.txt");
        std::fs::write(&path, "# test list\nFOO\nbar  # inline comment\n\n").unwrap();

        let list = DenyList::from_file(&path).unwrap();
        assert!(list.contains("FOO"));
        assert!(list.contains("BAR"));
        // Built-in entries are gone once a file is supplied
        assert!(!list.contains("EUR"));
    }
}
