//! Weighted producer selection.
//!
//! A ChaCha8 stream keyed by the 32-byte seed draws `producer_count` points uniformly in
//! `[1, total_power]`. Each point lands on the validator whose cumulative power range
//! covers it, so a validator can be drawn more than once. Independent clients that must
//! derive the same producer set need the same draw procedure.

use crate::validator::Validator;
use alloy::primitives::B256;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Validator ids drawn for the next span, in draw order.
///
/// When there are no more eligible validators than slots, every eligible validator is
/// returned once.
pub fn select_producers(seed: B256, eligible: &[Validator], producer_count: u64) -> Vec<u64> {
    if eligible.len() as u64 <= producer_count {
        return eligible.iter().map(|v| v.id).collect();
    }

    let mut cumulative = Vec::with_capacity(eligible.len());
    let mut total: u64 = 0;
    for v in eligible {
        total = total.saturating_add(u64::try_from(v.voting_power).unwrap_or(0));
        cumulative.push(total);
    }
    if total == 0 {
        return Vec::new();
    }

    let mut rng = ChaCha8Rng::from_seed(seed.0);
    (0..producer_count)
        .map(|_| {
            let point = rng.gen_range(1..=total);
            let idx = cumulative.partition_point(|&c| c < point);
            eligible[idx].id
        })
        .collect()
}
