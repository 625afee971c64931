//! Candidate reconciliation across providers
//!
//! Picks one candidate out of every provider attempt for a segment:
//! 1. Highest confidence wins
//! 2. Ties go to the provider queried first (attempts are in priority order)
//! 3. Then to the provider's own ranking
//!
//! The result is a pure function of the attempts, so reruns over the same
//! answers always choose the same candidate.

use std::cmp::Ordering;

use crate::types::{IdentificationCandidate, ProviderAttempt, ReconciliationMethod};

/// Normalized `artist - title` similarity at which two candidates agree
pub const CONSENSUS_SIMILARITY: f64 = 0.9;

/// Chosen candidate and how it was chosen
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub candidate: IdentificationCandidate,
    pub method: ReconciliationMethod,
}

/// Lowercase alphanumeric words separated by single spaces
fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn match_key(candidate: &IdentificationCandidate) -> String {
    format!("{} - {}", normalize(&candidate.artist), normalize(&candidate.title))
}

/// Whether two candidates name the same track
pub fn candidates_agree(a: &IdentificationCandidate, b: &IdentificationCandidate) -> bool {
    strsim::normalized_levenshtein(&match_key(a), &match_key(b)) >= CONSENSUS_SIMILARITY
}

/// Reconcile all candidates from `attempts`
///
/// `attempts` must be in provider priority order. Returns `None` when no
/// provider produced a candidate. A winner at or above `accept_threshold`
/// is reported as [`ReconciliationMethod::EarlyAccept`].
pub fn reconcile(attempts: &[ProviderAttempt], accept_threshold: f64) -> Option<Reconciled> {
    // (priority, candidate) in query order
    let pool: Vec<(usize, &IdentificationCandidate)> = attempts
        .iter()
        .enumerate()
        .flat_map(|(priority, attempt)| attempt.candidates().iter().map(move |c| (priority, c)))
        .collect();

    // min_by keeps the first of equal elements, so the order is total
    let &(_, best) = pool.iter().min_by(|(pa, a), (pb, b)| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| pa.cmp(pb))
            .then_with(|| a.rank.cmp(&b.rank))
    })?;

    let method = if best.confidence >= accept_threshold {
        ReconciliationMethod::EarlyAccept
    } else if pool.len() == 1 {
        ReconciliationMethod::SingleCandidate
    } else if pool.iter().all(|(_, c)| candidates_agree(c, best)) {
        ReconciliationMethod::Consensus
    } else if pool.iter().any(|(_, c)| {
        !std::ptr::eq(*c, best)
            && c.confidence.total_cmp(&best.confidence) == Ordering::Equal
            && !candidates_agree(c, best)
    }) {
        ReconciliationMethod::PriorityTieBreak
    } else {
        ReconciliationMethod::HighestConfidence
    };

    Some(Reconciled {
        candidate: best.clone(),
        method,
    })
}
