//! Replay sequence guard.
//!
//! A root-chain event is identified by `(block_number, log_index)`. The sequence id is
//! `block_number * DEFAULT_LOG_INDEX_UNIT + log_index` rendered in decimal, the same
//! encoding existing chain state uses. It is only injective while `log_index` stays below
//! the unit, so [checked_sequence_id] rejects larger indices and every replay-guarded
//! message goes through it.

use crate::error::TxError;
use crate::keys;
use crate::store::KvStore;
use alloy::primitives::U256;

/// Multiplier separating block number from log index in a sequence id.
pub const DEFAULT_LOG_INDEX_UNIT: u64 = 100_000;

/// Decimal sequence id for a root-chain event. Callers must keep `log_index` below
/// [DEFAULT_LOG_INDEX_UNIT]; see [checked_sequence_id].
pub fn sequence_id(block_number: u64, log_index: u64) -> String {
    let seq = U256::from(block_number) * U256::from(DEFAULT_LOG_INDEX_UNIT) + U256::from(log_index);
    seq.to_string()
}

pub fn require_log_index(log_index: u64) -> Result<(), TxError> {
    if log_index >= DEFAULT_LOG_INDEX_UNIT {
        return Err(TxError::InvalidMsg(format!(
            "log index {} out of range, must be below {}",
            log_index, DEFAULT_LOG_INDEX_UNIT
        )));
    }
    Ok(())
}

/// [sequence_id] for an event whose log index fits below the unit.
pub fn checked_sequence_id(block_number: u64, log_index: u64) -> Result<String, TxError> {
    require_log_index(log_index)?;
    Ok(sequence_id(block_number, log_index))
}

/// Per-module replay guard: one presence record per consumed sequence id.
#[derive(Debug, Clone, Copy)]
pub struct SequenceGuard {
    prefix: &'static [u8],
}

impl SequenceGuard {
    pub const fn new(prefix: &'static [u8]) -> Self {
        Self { prefix }
    }

    pub const fn staking() -> Self {
        Self::new(keys::STAKING_SEQUENCE_PREFIX)
    }

    pub const fn topup() -> Self {
        Self::new(keys::TOPUP_SEQUENCE_PREFIX)
    }

    fn key(&self, sequence: &str) -> Vec<u8> {
        let mut key = self.prefix.to_vec();
        key.extend_from_slice(sequence.as_bytes());
        key
    }

    pub fn has(&self, store: &dyn KvStore, sequence: &str) -> bool {
        store.has(&self.key(sequence))
    }

    pub fn set(&self, store: &mut dyn KvStore, sequence: &str) {
        store.set(&self.key(sequence), keys::DEFAULT_VALUE.to_vec());
    }

    /// All consumed sequence ids, in store order.
    pub fn all(&self, store: &dyn KvStore) -> Vec<String> {
        store
            .prefix_iter(self.prefix)
            .into_iter()
            .map(|(k, _)| String::from_utf8_lossy(&k[self.prefix.len()..]).into_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[test]
    fn sequence_id_encoding() {
        assert_eq!(sequence_id(10, 3), "1000003");
        assert_eq!(sequence_id(0, 0), "0");
        assert_eq!(sequence_id(u64::MAX, 99_999), "1844674407370955161599999");
    }

    #[test]
    fn distinct_pairs_do_not_collide() {
        assert_ne!(sequence_id(1, 0), sequence_id(0, 1));
        assert_ne!(sequence_id(2, 5), sequence_id(25, 0));
    }

    #[test]
    fn log_index_must_stay_below_unit() {
        assert_eq!(checked_sequence_id(1, 0).unwrap(), "100000");
        assert_eq!(checked_sequence_id(0, 99_999).unwrap(), "99999");
        assert!(matches!(
            checked_sequence_id(0, DEFAULT_LOG_INDEX_UNIT),
            Err(TxError::InvalidMsg(_))
        ));
        assert!(checked_sequence_id(10, u64::MAX).is_err());
    }

    #[test]
    fn guard_transitions_once() {
        let mut store = MemStore::new();
        let guard = SequenceGuard::staking();
        let seq = sequence_id(10, 3);
        assert!(!guard.has(&store, &seq));
        guard.set(&mut store, &seq);
        assert!(guard.has(&store, &seq));
        assert_eq!(guard.all(&store), vec![seq.clone()]);
        assert!(!SequenceGuard::topup().has(&store, &seq));
    }
}
