//! Trust score engine.
//!
//! Pure function over a profile's task statuses: deterministic,
//! side-effect free, and cheap enough to recompute eagerly on every
//! task mutation instead of caching divergent copies.

use std::collections::BTreeMap;

use crate::models::{TaskStatus, TrustLevel, TrustScore};

/// Verification bonus as a fraction of one task's share.
const VERIFICATION_BONUS_RATIO: f64 = 0.10;

/// Compute the trust score for a hydrated task set.
///
/// Each of the N defined tasks is worth an equal share of 100
/// (catalog N = 8 → 12.5). Each verified task adds 10% of one share.
/// The total is rounded to the nearest half point and capped at 100.
pub fn compute_trust_score(tasks: &[TaskStatus]) -> TrustScore {
    if tasks.is_empty() {
        return TrustScore::zero();
    }

    let share = 100.0 / tasks.len() as f64;
    let completed = tasks.iter().filter(|t| t.completed).count();
    let verified = tasks.iter().filter(|t| t.verified).count();

    let raw = completed as f64 * share + verified as f64 * share * VERIFICATION_BONUS_RATIO;
    let total = round_to_half(raw).min(100.0);

    let mut breakdown = BTreeMap::new();
    for task in tasks.iter().filter(|t| t.completed) {
        *breakdown.entry(task.category).or_insert(0.0) += share;
    }

    // Derived from the tasks themselves so identical input yields
    // identical output, timestamp included.
    let computed_at = tasks
        .iter()
        .flat_map(|t| [t.completed_at, t.verified_at])
        .flatten()
        .max();

    TrustScore {
        total,
        breakdown,
        level: TrustLevel::for_total(total),
        completed_tasks: completed as u32,
        computed_at,
    }
}

fn round_to_half(x: f64) -> f64 {
    (x * 2.0).round() / 2.0
}
