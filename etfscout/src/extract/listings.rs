//! Exchange listing assembly and primary-ticker selection
//!
//! Selection is order-independent: the same candidate set in any
//! permutation resolves to the same primary and the same retained
//! listings. Tie-break: shorter ticker wins, equal length falls back to
//! lexicographic order.

use crate::extract::validate::CandidateValidator;
use crate::model::{ExchangeListing, MAX_LISTINGS};
use crate::types::{CandidateValue, FieldCandidate};
use tracing::debug;

/// True if `candidate` is strictly preferred over `incumbent` as primary
///
/// An already-assigned primary is never replaced on a tie.
pub fn is_strictly_preferred(candidate: &str, incumbent: &str) -> bool {
    match candidate.len().cmp(&incumbent.len()) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => candidate < incumbent,
    }
}

/// Build the record's listing sub-list from raw strategy candidates
///
/// - validates every ticker (shape + deny-list); invalid candidates fall
///   out without affecting the rest
/// - deduplicates by (exchange, ticker)
/// - orders deterministically: primary tie-break order, so permuting the
///   input changes nothing
/// - caps at `MAX_LISTINGS`; losing the primary tie-break alone never
///   drops a candidate, only the cap does
pub fn assemble_listings(
    candidates: &[FieldCandidate],
    validator: &CandidateValidator,
) -> Vec<ExchangeListing> {
    let mut listings: Vec<ExchangeListing> = Vec::new();

    for candidate in candidates {
        let CandidateValue::Listing {
            exchange,
            ticker,
            currency,
            bloomberg_code,
            reuters_code,
        } = &candidate.value
        else {
            continue;
        };

        let ticker = match validator.validate_ticker(ticker) {
            Ok(t) => t,
            Err(e) => {
                debug!(source = candidate.source, error = %e, "Listing candidate rejected");
                continue;
            }
        };

        let duplicate = listings.iter_mut().find(|l| {
            l.ticker == ticker
                && normalized(&l.exchange) == normalized(exchange)
        });
        if let Some(existing) = duplicate {
            // Same row seen again: fill gaps, never overwrite
            if existing.currency.is_none() {
                existing.currency = currency.clone();
            }
            if existing.bloomberg_code.is_none() {
                existing.bloomberg_code = bloomberg_code.clone();
            }
            if existing.reuters_code.is_none() {
                existing.reuters_code = reuters_code.clone();
            }
            continue;
        }

        listings.push(ExchangeListing {
            exchange: exchange.clone(),
            ticker,
            currency: currency.clone(),
            bloomberg_code: bloomberg_code.clone(),
            reuters_code: reuters_code.clone(),
            primary: false,
        });
    }

    // Deterministic order == primary preference order; permutation of the
    // candidate input cannot change the result
    listings.sort_by(|a, b| {
        (a.ticker.len(), a.ticker.as_str(), a.exchange.as_deref().unwrap_or(""))
            .cmp(&(b.ticker.len(), b.ticker.as_str(), b.exchange.as_deref().unwrap_or("")))
    });
    listings.truncate(MAX_LISTINGS);

    apply_primary_tiebreak(&mut listings);
    listings
}

/// Ensure exactly one listing is primary (when any exist)
///
/// Respects an incumbent: a listing already marked primary keeps the flag
/// unless another ticker is strictly preferred.
pub fn apply_primary_tiebreak(listings: &mut [ExchangeListing]) {
    if listings.is_empty() {
        return;
    }

    let incumbent = listings.iter().position(|l| l.primary);

    let mut best = incumbent.unwrap_or(0);
    for (i, listing) in listings.iter().enumerate() {
        if is_strictly_preferred(&listing.ticker, &listings[best].ticker) {
            best = i;
        }
    }

    for (i, listing) in listings.iter_mut().enumerate() {
        listing.primary = i == best;
    }
}

fn normalized(value: &Option<String>) -> String {
    value
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}
