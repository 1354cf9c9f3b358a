//! Structured-metadata mining
//!
//! Pages often embed machine-readable JSON (ld+json blocks and inline
//! data islands). This strategy parses every such block and recursively
//! walks the value tree looking for ticker/symbol/code keys, plus
//! identity and description keys as a low-priority supplement.

use crate::extract::{excerpt, DocumentContext};
use crate::types::{CandidateValue, ExtractStrategy, FieldCandidate, FieldGroup, FieldKind};
use scraper::Selector;
use serde_json::Value;
use tracing::trace;

/// JSON keys treated as ticker-bearing
const TICKER_KEYS: &[&str] = &["ticker", "tickersymbol", "symbol", "code"];
/// JSON keys carrying an exchange name alongside a ticker
const EXCHANGE_KEYS: &[&str] = &["exchange", "market", "exchangename"];
/// JSON keys carrying a currency alongside a ticker
const CURRENCY_KEYS: &[&str] = &["currency", "pricecurrency"];

/// Embedded machine-readable data strategy
pub struct StructuredDataStrategy {
    script_selector: Selector,
}

impl StructuredDataStrategy {
    pub fn new() -> Self {
        Self {
            script_selector: Selector::parse("script[type=\"application/ld+json\"]")
                .expect("valid selector"),
        }
    }

    fn json_blocks(&self, doc: &DocumentContext) -> Vec<Value> {
        doc.dom
            .select(&self.script_selector)
            .filter_map(|script| {
                let raw = script.text().collect::<String>();
                match serde_json::from_str::<Value>(&raw) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        trace!(error = %e, "Skipping unparseable ld+json block");
                        None
                    }
                }
            })
            .collect()
    }

    /// Recursively collect listing candidates from a JSON value tree
    ///
    /// A ticker key found in an object picks up sibling exchange/currency
    /// keys from the same object as its row context.
    fn walk_listings(value: &Value, out: &mut Vec<FieldCandidate>) {
        match value {
            Value::Object(map) => {
                let sibling = |keys: &[&str]| -> Option<String> {
                    map.iter()
                        .find(|(k, v)| {
                            keys.contains(&k.to_ascii_lowercase().as_str()) && v.is_string()
                        })
                        .and_then(|(_, v)| v.as_str())
                        .map(|s| s.to_string())
                };

                for (key, val) in map {
                    let key_lower = key.to_ascii_lowercase();
                    if TICKER_KEYS.contains(&key_lower.as_str()) {
                        if let Some(ticker) = val.as_str() {
                            out.push(FieldCandidate {
                                field: None,
                                value: CandidateValue::Listing {
                                    exchange: sibling(EXCHANGE_KEYS),
                                    ticker: ticker.to_string(),
                                    currency: sibling(CURRENCY_KEYS),
                                    bloomberg_code: None,
                                    reuters_code: None,
                                },
                                confidence: 0.8,
                                source: "StructuredDataStrategy",
                                excerpt: excerpt(&format!("{}: {}", key, ticker)),
                            });
                        }
                    }
                    Self::walk_listings(val, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    Self::walk_listings(item, out);
                }
            }
            _ => {}
        }
    }

    /// Top-level identity/description keys from any block
    fn scalar_candidates(&self, blocks: &[Value], group: FieldGroup) -> Vec<FieldCandidate> {
        let mut candidates = Vec::new();
        for block in blocks {
            let Value::Object(map) = block else { continue };
            let mut push_text = |kind: FieldKind, key: &str| {
                if kind.group() != group {
                    return;
                }
                if let Some(text) = map.get(key).and_then(|v| v.as_str()) {
                    if !text.trim().is_empty() {
                        candidates.push(FieldCandidate {
                            field: Some(kind),
                            value: CandidateValue::Text(text.trim().to_string()),
                            confidence: 0.8,
                            source: "StructuredDataStrategy",
                            excerpt: excerpt(text),
                        });
                    }
                }
            };
            push_text(FieldKind::Name, "name");
            push_text(FieldKind::Provider, "provider");
            push_text(FieldKind::Provider, "brand");
            push_text(FieldKind::Description, "description");
        }
        candidates
    }
}

impl Default for StructuredDataStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractStrategy for StructuredDataStrategy {
    fn name(&self) -> &'static str {
        "StructuredDataStrategy"
    }

    fn base_confidence(&self) -> f32 {
        0.8
    }

    fn extract(&self, doc: &DocumentContext, group: FieldGroup) -> Vec<FieldCandidate> {
        let blocks = self.json_blocks(doc);
        if blocks.is_empty() {
            return Vec::new();
        }

        match group {
            FieldGroup::Listings => {
                let mut out = Vec::new();
                for block in &blocks {
                    Self::walk_listings(block, &mut out);
                }
                out
            }
            FieldGroup::Identity | FieldGroup::Description => {
                self.scalar_candidates(&blocks, group)
            }
            _ => Vec::new(),
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
    fn test_mines_nested_ticker_with_row_context() {
        let doc = context(
            r#"<html><head><script type="application/ld+json">
            {"name":"iShares Core S&P 500","listings":[
                {"exchange":"Xetra","tickerSymbol":"SXR8","currency":"EUR"},
                {"exchange":"London Stock Exchange","tickerSymbol":"CSPX","currency":"USD"}
            ]}
            </script></head><body></body></html>"#,
        );
        let candidates = StructuredDataStrategy::new().extract(&doc, FieldGroup::Listings);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().any(|c| matches!(
            &c.value,
            CandidateValue::Listing { exchange, ticker, currency, .. }
                if exchange.as_deref() == Some("Xetra")
                    && ticker == "SXR8"
                    && currency.as_deref() == Some("EUR")
        )));
    }

    #[test]
    fn test_mines_identity_fields() {
        let doc = context(
            r#"<html><head><script type="application/ld+json">
            {"name":"Vanguard S&P 500 UCITS ETF","provider":"Vanguard"}
            </script></head><body></body></html>"#,
        );
        let strategy = StructuredDataStrategy::new();
        let candidates = strategy.extract(&doc, FieldGroup::Identity);
        assert!(candidates.iter().any(|c| c.field == Some(FieldKind::Name)));
        assert!(candidates.iter().any(|c| c.field == Some(FieldKind::Provider)));
    }

    #[test]
    fn test_unparseable_block_is_skipped() {
        let doc = context(
            r#"<html><head><script type="application/ld+json">{not json</script></head><body></body></html>"#,
        );
        let candidates = StructuredDataStrategy::new().extract(&doc, FieldGroup::Listings);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_no_blocks_yields_nothing() {
        let doc = context("<html><body><p>plain page</p></body></html>");
        assert!(StructuredDataStrategy::new()
            .extract(&doc, FieldGroup::Listings)
            .is_empty());
    }
}
