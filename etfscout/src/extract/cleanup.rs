//! Free-text cleanup pass
//!
//! Scraped description text drags along UI toggle-button artifacts in
//! whatever language variant the page was served in. This pass strips the
//! known fragments and collapses whitespace. It is idempotent and runs
//! after all strategies, before a text field is considered final.

use once_cell::sync::Lazy;
use regex::Regex;

/// Known toggle-button artifacts, several language variants of the same
/// show-more/show-less control
static BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(show\s+(more|less)|read\s+(more|less)|mehr\s+anzeigen|weniger\s+anzeigen|afficher\s+(plus|moins)|mostra\s+(di\s+pi\u{f9}|meno)|mostrar\s+(m\u{e1}s|menos))\b",
    )
    .expect("boilerplate pattern is valid")
});

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Strip boilerplate fragments and collapse whitespace
///
/// Applying this twice equals applying it once.
pub fn clean_text(raw: &str) -> String {
    let stripped = BOILERPLATE.replace_all(raw, " ");
    WHITESPACE.replace_all(stripped.trim(), " ").trim().to_string()
}

/// Cleanup that treats an emptied-out string as absence
pub fn clean_text_opt(raw: &str) -> Option<String> {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_english_toggle() {
        let cleaned = clean_text("The fund tracks the S&P 500. Show more");
        assert_eq!(cleaned, "The fund tracks the S&P 500.");
    }

    #[test]
    fn test_strips_german_toggle_case_insensitive() {
        let cleaned = clean_text("Der Fonds bildet den Index ab. MEHR ANZEIGEN");
        assert_eq!(cleaned, "Der Fonds bildet den Index ab.");
    }

    #[test]
    fn test_strips_mid_text_artifact_and_collapses_whitespace() {
        let cleaned = clean_text("Tracks the index.  Show more   Physically replicated.");
        assert_eq!(cleaned, "Tracks the index. Physically replicated.");
    }

    #[test]
    fn test_idempotent() {
        let raw = "Afficher plus  The fund   invests. Show less";
        let once = clean_text(raw);
        let twice = clean_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_pure_boilerplate_becomes_absent() {
        assert_eq!(clean_text_opt("Show more"), None);
        assert_eq!(clean_text_opt("   "), None);
    }

    #[test]
    fn test_clean_text_preserves_normal_prose() {
        let raw = "iShares Core S&P 500 UCITS ETF seeks to track the S&P 500 index.";
        assert_eq!(clean_text(raw), raw);
    }
}
