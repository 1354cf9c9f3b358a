//! Consolidated output artifacts
//!
//! Two export shapes: a structured JSON array (full fidelity, nested
//! listings and rating breakdown) and a flat CSV for spreadsheet use.
//! Absent values are empty CSV cells, never a literal zero.

use crate::model::ScoredRecord;
use etfscout_common::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Column order of the flat export
const CSV_HEADER: &[&str] = &[
    "isin",
    "name",
    "provider",
    "primary_ticker",
    "ter_pct",
    "fund_size_m",
    "fund_currency",
    "replication",
    "domicile",
    "inception_date",
    "distribution_policy",
    "return_ytd_pct",
    "return_1y_pct",
    "return_3y_pct",
    "return_5y_pct",
    "volatility_3y_pct",
    "tracking_error_pct",
    "dividend_yield_pct",
    "listing_count",
    "status",
    "retry_count",
    "rating_stars",
    "rating_score",
    "rating_insufficient_data",
];

/// Write the full structured export as a JSON array
pub fn write_json(records: &[ScoredRecord], path: &Path) -> Result<()> {
    let payload = serde_json::to_vec_pretty(records)
        .map_err(|e| Error::Internal(format!("serializing export: {}", e)))?;
    fs::write(path, payload)?;
    info!(path = %path.display(), records = records.len(), "JSON export written");
    Ok(())
}

/// Write the flat tabular export as CSV
pub fn write_csv(records: &[ScoredRecord], path: &Path) -> Result<()> {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push('\n');
    for scored in records {
        out.push_str(&csv_line(scored));
        out.push('\n');
    }
    fs::write(path, out)?;
    info!(path = %path.display(), records = records.len(), "CSV export written");
    Ok(())
}

fn csv_line(scored: &ScoredRecord) -> String {
    let r = &scored.record;
    let cells: Vec<String> = vec![
        csv_cell(r.isin.as_str()),
        opt_text(&r.name),
        opt_text(&r.provider),
        r.primary_ticker().map(csv_cell).unwrap_or_default(),
        opt_num(r.ter_pct),
        opt_num(r.fund_size_m),
        opt_text(&r.fund_currency),
        opt_text(&r.replication),
        opt_text(&r.domicile),
        r.inception_date
            .map(|d| d.to_string())
            .unwrap_or_default(),
        opt_text(&r.distribution_policy),
        opt_num(r.return_ytd_pct),
        opt_num(r.return_1y_pct),
        opt_num(r.return_3y_pct),
        opt_num(r.return_5y_pct),
        opt_num(r.volatility_3y_pct),
        opt_num(r.tracking_error_pct),
        opt_num(r.dividend_yield_pct),
        r.listings.len().to_string(),
        format!("{:?}", r.status),
        r.retry_count.to_string(),
        scored.rating.stars.to_string(),
        scored.rating.score.to_string(),
        scored.rating.insufficient_data.to_string(),
    ];
    cells.join(",")
}

fn opt_text(value: &Option<String>) -> String {
    value.as_deref().map(csv_cell).unwrap_or_default()
}

fn opt_num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Quote a cell when it contains a delimiter, quote, or newline
fn csv_cell(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExtractedRecord;
    use crate::rating;
    use chrono::Utc;
    use tempfile::TempDir;

    fn scored(isin: &str, name: Option<&str>) -> ScoredRecord {
        let mut record = ExtractedRecord::new(isin.parse().unwrap(), Utc::now());
        record.name = name.map(|n| n.to_string());
        let rating = rating::score_now(&record);
        ScoredRecord { record, rating }
    }

    #[test]
    fn test_json_export_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let records = vec![scored("IE00B5BMR087", Some("Test Fund"))];

        write_json(&records, &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<ScoredRecord> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].record.name.as_deref(), Some("Test Fund"));
    }

    #[test]
    fn test_csv_has_header_and_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let records = vec![
            scored("IE00B5BMR087", Some("Fund A")),
            scored("IE00B4L5Y983", None),
        ];

        write_csv(&records, &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("isin,name,"));
        assert!(lines[1].starts_with("IE00B5BMR087,Fund A,"));
    }

    #[test]
    fn test_absent_numeric_is_empty_cell_not_zero() {
        let line = csv_line(&scored("IE00B5BMR087", None));
        let cells: Vec<&str> = line.split(',').collect();
        assert_eq!(cells.len(), CSV_HEADER.len());
        let ter_idx = CSV_HEADER.iter().position(|h| *h == "ter_pct").unwrap();
        assert_eq!(cells[ter_idx], "");
    }

    #[test]
    fn test_cells_with_commas_are_quoted() {
        assert_eq!(csv_cell("a,b"), "\"a,b\"");
        assert_eq!(csv_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_cell("plain"), "plain");
    }
}
