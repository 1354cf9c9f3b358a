//! Structured layout strategy (highest priority)
//!
//! Locates tabular regions and maps header cell text to logical columns
//! via case-insensitive keyword sets. Structural position is the
//! strongest signal the page offers, so candidates from this strategy
//! carry the highest base confidence.
//!
//! Two table shapes are understood:
//! - listing tables: a header row naming ticker/exchange/currency
//!   columns, one candidate per data row tied to that row's exchange
//! - definition tables: two-cell rows of (label, value), mined for the
//!   metric and structure fields

use crate::extract::{excerpt, DocumentContext};
use crate::types::{CandidateValue, ExtractStrategy, FieldCandidate, FieldGroup, FieldKind};
use scraper::{ElementRef, Selector};
use tracing::trace;

/// Header keywords per logical listing column (case-insensitive contains)
const TICKER_HEADERS: &[&str] = &["ticker", "symbol", "trading code"];
const EXCHANGE_HEADERS: &[&str] = &["exchange", "market", "listing", "b\u{f6}rse"];
const CURRENCY_HEADERS: &[&str] = &["currency", "w\u{e4}hrung"];
const BLOOMBERG_HEADERS: &[&str] = &["bloomberg"];
const REUTERS_HEADERS: &[&str] = &["reuters", "ric"];

/// Label keywords for definition-table rows, most specific first so
/// "volatility 1 year" never lands on a broader label
const LABEL_KEYWORDS: &[(FieldKind, &[&str])] = &[
    (FieldKind::Ter, &["total expense ratio", "ongoing charges", "ter"]),
    (FieldKind::FundSize, &["fund size", "assets under management", "aum"]),
    (FieldKind::FundCurrency, &["fund currency"]),
    (FieldKind::Replication, &["replication"]),
    (FieldKind::Domicile, &["fund domicile", "domicile"]),
    (FieldKind::LegalStructure, &["legal structure"]),
    (FieldKind::InceptionDate, &["inception", "launch date"]),
    (
        FieldKind::DistributionPolicy,
        &["distribution policy", "use of profit", "use of income"],
    ),
    (
        FieldKind::DistributionFrequency,
        &["distribution frequency", "distribution interval"],
    ),
    (FieldKind::Volatility1y, &["volatility 1 year"]),
    (FieldKind::Volatility3y, &["volatility 3 year"]),
    (FieldKind::ReturnYtd, &["return ytd", "ytd return", "current year"]),
    (FieldKind::Return1y, &["return 1 year", "1 year return"]),
    (FieldKind::Return3y, &["return 3 year", "3 year return"]),
    (FieldKind::Return5y, &["return 5 year", "5 year return"]),
    (FieldKind::TrackingError, &["tracking error", "tracking difference"]),
    (FieldKind::DividendYield, &["dividend yield", "distribution yield"]),
    (FieldKind::IndexName, &["underlying index", "index"]),
];

/// Fields whose values are numeric-looking text
fn is_numeric_field(kind: FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::Ter
            | FieldKind::FundSize
            | FieldKind::ReturnYtd
            | FieldKind::Return1y
            | FieldKind::Return3y
            | FieldKind::Return5y
            | FieldKind::Volatility1y
            | FieldKind::Volatility3y
            | FieldKind::TrackingError
            | FieldKind::DividendYield
    )
}

/// Structured layout strategy over HTML tables
pub struct TableStrategy {
    table_selector: Selector,
    row_selector: Selector,
    cell_selector: Selector,
}

impl TableStrategy {
    pub fn new() -> Self {
        Self {
            table_selector: Selector::parse("table").expect("valid selector"),
            row_selector: Selector::parse("tr").expect("valid selector"),
            cell_selector: Selector::parse("td, th").expect("valid selector"),
        }
    }

    fn cell_texts(&self, row: ElementRef<'_>) -> Vec<String> {
        row.select(&self.cell_selector)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect()
    }

    /// Map a header row onto logical listing columns
    fn map_listing_columns(&self, headers: &[String]) -> Option<ListingColumns> {
        let mut columns = ListingColumns::default();
        for (idx, header) in headers.iter().enumerate() {
            let h = header.to_lowercase();
            let matches = |keys: &[&str]| keys.iter().any(|k| h.contains(k));
            if columns.ticker.is_none() && matches(TICKER_HEADERS) {
                columns.ticker = Some(idx);
            } else if columns.exchange.is_none() && matches(EXCHANGE_HEADERS) {
                columns.exchange = Some(idx);
            } else if columns.bloomberg.is_none() && matches(BLOOMBERG_HEADERS) {
                columns.bloomberg = Some(idx);
            } else if columns.reuters.is_none() && matches(REUTERS_HEADERS) {
                columns.reuters = Some(idx);
            } else if columns.currency.is_none() && matches(CURRENCY_HEADERS) {
                columns.currency = Some(idx);
            }
        }
        // A listing table must at least name a ticker column
        columns.ticker.map(|_| columns)
    }

    fn listing_candidates(&self, doc: &DocumentContext) -> Vec<FieldCandidate> {
        let mut candidates = Vec::new();

        for table in doc.dom.select(&self.table_selector) {
            let mut rows = table.select(&self.row_selector);
            let Some(header_row) = rows.next() else {
                continue;
            };
            // Header row is either <th> cells or a plain first <tr>
            let headers = self.cell_texts(header_row);
            let Some(columns) = self.map_listing_columns(&headers) else {
                continue;
            };
            trace!(?headers, "Listing table header mapped");

            for row in rows {
                let cells = self.cell_texts(row);
                let at = |idx: Option<usize>| -> Option<String> {
                    idx.and_then(|i| cells.get(i))
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                };
                let Some(ticker) = at(columns.ticker) else {
                    continue;
                };
                candidates.push(FieldCandidate {
                    field: None,
                    value: CandidateValue::Listing {
                        exchange: at(columns.exchange),
                        ticker,
                        currency: at(columns.currency),
                        bloomberg_code: at(columns.bloomberg),
                        reuters_code: at(columns.reuters),
                    },
                    confidence: 0.9,
                    source: "TableStrategy",
                    excerpt: excerpt(&cells.join(" | ")),
                });
            }
        }

        candidates
    }

    fn definition_candidates(&self, doc: &DocumentContext, group: FieldGroup) -> Vec<FieldCandidate> {
        let mut candidates = Vec::new();

        for table in doc.dom.select(&self.table_selector) {
            for row in table.select(&self.row_selector) {
                let cells = self.cell_texts(row);
                if cells.len() != 2 {
                    continue;
                }
                let label = cells[0].to_lowercase();
                let value = cells[1].trim();
                if value.is_empty() {
                    continue;
                }

                let Some((kind, _)) = LABEL_KEYWORDS
                    .iter()
                    .find(|(_, keys)| keys.iter().any(|k| label.contains(k)))
                else {
                    continue;
                };
                if kind.group() != group {
                    continue;
                }

                let payload = if is_numeric_field(*kind) {
                    CandidateValue::Numeric(value.to_string())
                } else {
                    CandidateValue::Text(value.to_string())
                };
                candidates.push(FieldCandidate {
                    field: Some(*kind),
                    value: payload,
                    confidence: 0.9,
                    source: "TableStrategy",
                    excerpt: excerpt(&format!("{}: {}", cells[0], value)),
                });
            }
        }

        candidates
    }
}

impl Default for TableStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ListingColumns {
    ticker: Option<usize>,
    exchange: Option<usize>,
    currency: Option<usize>,
    bloomberg: Option<usize>,
    reuters: Option<usize>,
}

impl ExtractStrategy for TableStrategy {
    fn name(&self) -> &'static str {
        "TableStrategy"
    }

    fn base_confidence(&self) -> f32 {
        0.9
    }

    fn extract(&self, doc: &DocumentContext, group: FieldGroup) -> Vec<FieldCandidate> {
        match group {
            FieldGroup::Listings => self.listing_candidates(doc),
            FieldGroup::Description => Vec::new(),
            _ => self.definition_candidates(doc, group),
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

    const LISTING_TABLE: &str = r#"
        <html><body><table>
            <tr><th>Exchange</th><th>Ticker</th><th>Currency</th></tr>
            <tr><td>London Stock Exchange</td><td>CSP1</td><td>GBX</td></tr>
            <tr><td>Euronext Amsterdam</td><td>CSPX</td><td>EUR</td></tr>
        </table></body></html>"#;

    #[test]
    fn test_listing_table_yields_row_candidates() {
        let doc = context(LISTING_TABLE);
        let strategy = TableStrategy::new();
        let candidates = strategy.extract(&doc, FieldGroup::Listings);
        assert_eq!(candidates.len(), 2);

        let CandidateValue::Listing {
            exchange, ticker, currency, ..
        } = &candidates[0].value
        else {
            panic!("expected listing candidate");
        };
        assert_eq!(exchange.as_deref(), Some("London Stock Exchange"));
        assert_eq!(ticker, "CSP1");
        assert_eq!(currency.as_deref(), Some("GBX"));
    }

    #[test]
    fn test_definition_table_yields_metric_candidates() {
        let doc = context(
            r#"<html><body><table>
                <tr><td>Total expense ratio</td><td>0.07% p.a.</td></tr>
                <tr><td>Fund size</td><td>EUR 45,632 m</td></tr>
                <tr><td>Replication</td><td>Physical (Full replication)</td></tr>
            </table></body></html>"#,
        );
        let strategy = TableStrategy::new();

        let cost = strategy.extract(&doc, FieldGroup::Cost);
        assert_eq!(cost.len(), 1);
        assert_eq!(cost[0].field, Some(FieldKind::Ter));
        assert!(matches!(&cost[0].value, CandidateValue::Numeric(v) if v.contains("0.07")));

        let size = strategy.extract(&doc, FieldGroup::SizeStructure);
        assert!(size.iter().any(|c| c.field == Some(FieldKind::FundSize)));
        assert!(size.iter().any(|c| c.field == Some(FieldKind::Replication)));
    }

    #[test]
    fn test_table_without_ticker_column_is_not_a_listing_table() {
        let doc = context(
            r#"<html><body><table>
                <tr><th>Year</th><th>Return</th></tr>
                <tr><td>2023</td><td>24.6%</td></tr>
            </table></body></html>"#,
        );
        let strategy = TableStrategy::new();
        assert!(strategy.extract(&doc, FieldGroup::Listings).is_empty());
    }

    #[test]
    fn test_blank_ticker_cells_are_skipped() {
        let doc = context(
            r#"<html><body><table>
                <tr><th>Exchange</th><th>Ticker</th></tr>
                <tr><td>Xetra</td><td></td></tr>
                <tr><td>SIX</td><td>CSSPX</td></tr>
            </table></body></html>"#,
        );
        let strategy = TableStrategy::new();
        let candidates = strategy.extract(&doc, FieldGroup::Listings);
        assert_eq!(candidates.len(), 1);
    }
}
