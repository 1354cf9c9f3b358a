//! Locale-tolerant numeric parsing
//!
//! Source pages mix `.` and `,` decimal conventions and decorate numbers
//! with percent signs, currency symbols and unit suffixes. Placeholder
//! text yields absence, never a defaulted zero.

use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder strings that mean "no value"
const PLACEHOLDERS: [&str; 6] = ["-", "--", "\u{2013}", "\u{2014}", "n/a", "na"];

/// First numeric token in the text, signed, with embedded separators
static NUMBER_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d[\d.,]*").expect("number token pattern is valid"));

/// True if the raw text is an explicit no-value marker
pub fn is_placeholder(raw: &str) -> bool {
    let t = raw.trim().to_ascii_lowercase();
    t.is_empty() || PLACEHOLDERS.contains(&t.as_str())
}

/// Parse a decorated, locale-ambiguous decimal
///
/// Accepts both `.` and `,` as separators, strips percent/currency/unit
/// decorations, and requires the remainder to parse as a finite number.
///
/// Separator resolution:
/// - both present: the later one is the decimal separator
/// - one present multiple times: thousands separator
/// - one present once with exactly 3 trailing digits and a 1-3 digit
///   head not starting with zero: thousands separator, otherwise
///   decimal (no locale groups a zero integer part, so "0,123" is a
///   decimal)
pub fn parse_decimal(raw: &str) -> Option<f64> {
    if is_placeholder(raw) {
        return None;
    }

    // Take the first numeric token; decorations before it (currency
    // symbols) and after it ("%", "m", "p.a.") are ignored
    let cleaned = NUMBER_TOKEN
        .find(raw)?
        .as_str()
        .trim_end_matches(['.', ','])
        .to_string();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            let (decimal, thousands) = if d > c { ('.', ',') } else { (',', '.') };
            let without_thousands: String =
                cleaned.chars().filter(|&ch| ch != thousands).collect();
            without_thousands.replace(decimal, ".")
        }
        (Some(_), None) => resolve_single_separator(&cleaned, '.'),
        (None, Some(_)) => resolve_single_separator(&cleaned, ','),
        (None, None) => cleaned,
    };

    match normalized.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}

/// Decide whether a lone separator is decimal or thousands
fn resolve_single_separator(cleaned: &str, sep: char) -> String {
    let count = cleaned.matches(sep).count();
    if count > 1 {
        // "1.234.567" style grouping
        return cleaned.chars().filter(|&c| c != sep).collect();
    }
    let tail_len = cleaned
        .rsplit(sep)
        .next()
        .map(|t| t.len())
        .unwrap_or(0);
    let head = cleaned
        .split(sep)
        .next()
        .unwrap_or("")
        .trim_start_matches(['-', '+']);
    let grouped_head = (1..=3).contains(&head.len()) && !head.starts_with('0');
    if tail_len == 3 && grouped_head && cleaned.len() > 4 {
        // "45,632" — grouping, not five digits of precision
        cleaned.chars().filter(|&c| c != sep).collect()
    } else {
        cleaned.replace(sep, ".")
    }
}
