//! Deterministic rating scorer
//!
//! Pure function from a finalized record to a 1-5 star rating. Six
//! bounded sub-scores sum to a 0-100 total; fixed thresholds map the
//! total to stars. Every sub-score has a neutral fallback for missing
//! input, so a sparse record still rates without error. The only
//! time-dependent input is elapsed time since inception, passed in as an
//! explicit evaluation date so the function stays referentially
//! transparent.

use crate::model::ExtractedRecord;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Score thresholds for the star mapping
const STAR_THRESHOLDS: [(u8, u8); 4] = [(85, 5), (70, 4), (55, 3), (40, 2)];

/// Providers that earn the full provider sub-score (case-insensitive
/// substring match against the provider or fund name)
const TOP_TIER_PROVIDERS: &[&str] = &[
    "ishares",
    "vanguard",
    "xtrackers",
    "amundi",
    "lyxor",
    "spdr",
    "invesco",
    "ubs",
];

/// Metrics counted toward the insufficient-data check
const REQUIRED_METRICS: usize = 5;
/// Minimum present metrics for a rating to be considered well-founded
const MIN_PRESENT_METRICS: usize = 3;

/// Per-component sub-scores, each independently bounded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingBreakdown {
    /// Ongoing cost ratio, 0-25, lower cost scores higher
    pub cost: u8,
    /// Fund size, 0-20, larger scores higher
    pub scale: u8,
    /// Elapsed time since inception, 0-15, capped
    pub track_record: u8,
    /// Top-tier provider bonus vs. baseline, 0-15
    pub provider: u8,
    /// Multi-year return plus risk-adjusted return, 0-15
    pub performance: u8,
    /// Tracking error magnitude, 0-10, lower scores higher
    pub tracking: u8,
}

/// Full rating output: stars, total score, breakdown, data-quality flag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingResult {
    /// Star rating, 1-5
    pub stars: u8,
    /// Total score, 0-100
    pub score: u8,
    pub breakdown: RatingBreakdown,
    /// Set when fewer than the minimum required metrics were present;
    /// annotative only, never blocks a rating
    pub insufficient_data: bool,
}

/// Score a finalized record as of the current date
pub fn score_now(record: &ExtractedRecord) -> RatingResult {
    score(record, Utc::now().date_naive())
}

/// Score a finalized record as of an explicit evaluation date
///
/// Total and deterministic: the same record and date always produce the
/// same result. Missing metrics fall back to neutral sub-scores and are
/// tallied toward the insufficient-data flag.
pub fn score(record: &ExtractedRecord, as_of: NaiveDate) -> RatingResult {
    let breakdown = RatingBreakdown {
        cost: cost_score(record.ter_pct),
        scale: scale_score(record.fund_size_m),
        track_record: track_record_score(record.inception_date, as_of),
        provider: provider_score(record),
        performance: performance_score(record),
        tracking: tracking_score(record.tracking_error_pct),
    };

    let score = breakdown.cost
        + breakdown.scale
        + breakdown.track_record
        + breakdown.provider
        + breakdown.performance
        + breakdown.tracking;

    let stars = STAR_THRESHOLDS
        .iter()
        .find(|(threshold, _)| score >= *threshold)
        .map(|(_, stars)| *stars)
        .unwrap_or(1);

    let present = [
        record.ter_pct.is_some(),
        record.fund_size_m.is_some(),
        record.inception_date.is_some(),
        record.return_3y_pct.is_some(),
        record.tracking_error_pct.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    debug_assert_eq!(REQUIRED_METRICS, 5);

    RatingResult {
        stars,
        score,
        breakdown,
        insufficient_data: present < MIN_PRESENT_METRICS,
    }
}

/// Cost sub-score: step function over the ongoing cost ratio in percent
fn cost_score(ter_pct: Option<f64>) -> u8 {
    let Some(ter) = ter_pct else { return 12 };
    match ter {
        t if t <= 0.10 => 25,
        t if t <= 0.20 => 22,
        t if t <= 0.35 => 18,
        t if t <= 0.50 => 14,
        t if t <= 0.75 => 10,
        t if t <= 1.00 => 6,
        _ => 2,
    }
}

/// Scale sub-score: step function over fund size in millions
fn scale_score(fund_size_m: Option<f64>) -> u8 {
    let Some(size) = fund_size_m else { return 10 };
    match size {
        s if s >= 10_000.0 => 20,
        s if s >= 5_000.0 => 17,
        s if s >= 1_000.0 => 14,
        s if s >= 500.0 => 11,
        s if s >= 100.0 => 8,
        s if s >= 25.0 => 4,
        _ => 1,
    }
}

/// Track-record sub-score: whole years elapsed since inception, capped
fn track_record_score(inception: Option<NaiveDate>, as_of: NaiveDate) -> u8 {
    let Some(inception) = inception else { return 7 };
    let years = elapsed_years(inception, as_of);
    match years {
        y if y >= 10 => 15,
        y if y >= 5 => 12,
        y if y >= 3 => 9,
        y if y >= 1 => 5,
        _ => 2,
    }
}

/// Whole years between two dates, zero when as_of precedes inception
fn elapsed_years(from: NaiveDate, to: NaiveDate) -> i32 {
    if to < from {
        return 0;
    }
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years.max(0)
}

/// Provider sub-score: full bonus for a curated top-tier match, otherwise
/// a neutral baseline. Checks the provider field first, then the fund
/// name (many pages only carry the brand inside the name).
fn provider_score(record: &ExtractedRecord) -> u8 {
    let haystacks = [record.provider.as_deref(), record.name.as_deref()];
    let matched = haystacks.iter().flatten().any(|text| {
        let lower = text.to_lowercase();
        TOP_TIER_PROVIDERS.iter().any(|p| lower.contains(p))
    });
    if matched {
        15
    } else {
        8
    }
}

/// Performance sub-score: additive bonuses for positive multi-year
/// return and for risk-adjusted return when volatility is known
fn performance_score(record: &ExtractedRecord) -> u8 {
    let Some(return_3y) = record.return_3y_pct else {
        return 7;
    };

    let mut score: u8 = match return_3y {
        r if r >= 30.0 => 9,
        r if r >= 15.0 => 7,
        r if r >= 5.0 => 5,
        r if r >= 0.0 => 3,
        _ => 1,
    };

    if let Some(vol) = record.volatility_3y_pct {
        if vol > 0.0 {
            let risk_adjusted = return_3y / vol;
            score += match risk_adjusted {
                ra if ra >= 2.0 => 6,
                ra if ra >= 1.0 => 4,
                ra if ra >= 0.5 => 2,
                _ => 0,
            };
        }
    }

    score.min(15)
}

/// Tracking-quality sub-score: step function over tracking error percent
fn tracking_score(tracking_error_pct: Option<f64>) -> u8 {
    let Some(te) = tracking_error_pct else { return 5 };
    match te {
        t if t <= 0.10 => 10,
        t if t <= 0.25 => 8,
        t if t <= 0.50 => 6,
        t if t <= 1.00 => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> ExtractedRecord {
        ExtractedRecord::new("IE00B5BMR087".parse().unwrap(), Utc::now())
    }

    fn eval_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 24).unwrap()
    }

    #[test]
    fn test_empty_record_rates_with_insufficient_data() {
        let result = score(&record(), eval_date());
        assert!((1..=5).contains(&result.stars));
        assert!(result.insufficient_data);
        // Neutral fallbacks, never zero across the board
        assert!(result.score > 0);
    }

    #[test]
    fn test_strong_record_gets_five_stars() {
        let mut r = record();
        r.name = Some("iShares Core S&P 500 UCITS ETF".to_string());
        r.ter_pct = Some(0.07);
        r.fund_size_m = Some(45_632.0);
        r.inception_date = NaiveDate::from_ymd_opt(2010, 5, 19);
        r.return_3y_pct = Some(41.2);
        r.volatility_3y_pct = Some(14.0);
        r.tracking_error_pct = Some(0.05);

        let result = score(&r, eval_date());
        assert_eq!(result.breakdown.cost, 25);
        assert_eq!(result.breakdown.scale, 20);
        assert_eq!(result.breakdown.track_record, 15);
        assert_eq!(result.breakdown.provider, 15);
        assert_eq!(result.breakdown.tracking, 10);
        assert!(result.score >= 85);
        assert_eq!(result.stars, 5);
        assert!(!result.insufficient_data);
    }

    #[test]
    fn test_missing_size_and_cost_sets_insufficient_data() {
        let mut r = record();
        r.inception_date = NaiveDate::from_ymd_opt(2020, 1, 1);
        r.return_3y_pct = Some(10.0);
        // Only 2 of 5 required metrics present
        let result = score(&r, eval_date());
        assert!(result.insufficient_data);
        assert!((1..=5).contains(&result.stars));
    }

    #[test]
    fn test_cost_monotonicity() {
        let mut previous = u8::MAX;
        for ter in [0.05, 0.15, 0.30, 0.45, 0.60, 0.90, 1.50] {
            let current = cost_score(Some(ter));
            assert!(current <= previous, "cost score rose as TER rose");
            previous = current;
        }
    }

    #[test]
    fn test_track_record_monotone_and_capped() {
        let inception = NaiveDate::from_ymd_opt(2010, 5, 19).unwrap();
        let mut previous = 0;
        for years_later in 0..20 {
            let as_of = NaiveDate::from_ymd_opt(2010 + years_later, 6, 1).unwrap();
            let current = track_record_score(Some(inception), as_of);
            assert!(current >= previous, "track record score decreased over time");
            assert!(current <= 15);
            previous = current;
        }
        assert_eq!(previous, 15);
    }

    #[test]
    fn test_elapsed_years_respects_anniversary() {
        let from = NaiveDate::from_ymd_opt(2020, 6, 15).unwrap();
        assert_eq!(elapsed_years(from, NaiveDate::from_ymd_opt(2021, 6, 14).unwrap()), 0);
        assert_eq!(elapsed_years(from, NaiveDate::from_ymd_opt(2021, 6, 15).unwrap()), 1);
        assert_eq!(elapsed_years(from, NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()), 0);
    }

    #[test]
    fn test_provider_match_is_substring_and_case_insensitive() {
        let mut r = record();
        r.name = Some("Xtrackers MSCI World UCITS ETF 1C".to_string());
        assert_eq!(provider_score(&r), 15);

        let mut r2 = record();
        r2.provider = Some("Some Boutique Asset Manager".to_string());
        assert_eq!(provider_score(&r2), 8);
    }

    #[test]
    fn test_determinism_at_fixed_date() {
        let mut r = record();
        r.ter_pct = Some(0.20);
        r.fund_size_m = Some(800.0);
        assert_eq!(score(&r, eval_date()), score(&r, eval_date()));
    }

    #[test]
    fn test_performance_risk_adjusted_bonus() {
        let mut r = record();
        r.return_3y_pct = Some(30.0);
        let without_vol = performance_score(&r);
        r.volatility_3y_pct = Some(10.0);
        let with_vol = performance_score(&r);
        assert!(with_vol > without_vol);
        assert!(with_vol <= 15);
    }
}
