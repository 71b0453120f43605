//! Checkpoint lifecycle state.
//!
//! A proposal lands in a single buffer slot. An ack moves it to the committed list at
//! index `ack_count + 1` and bumps the ack count. A no-ack only rotates the proposer. The
//! committed list is append-only and continuous: checkpoint `n` starts right after
//! checkpoint `n - 1` ends, and checkpoint 1 starts at block 0.

pub mod handler;
pub mod milestone;

use crate::config::CheckpointParams;
use crate::error::TxError;
use crate::keys;
use crate::merkle::{merkle_proof, merkle_root};
use crate::store::{decode, KvStore, StoreError, StoreExt};
use crate::topup::DividendAccount;
use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

pub use handler::{MsgCheckpoint, MsgCheckpointAck, MsgCheckpointNoAck};
pub use milestone::{Milestone, MsgMilestone, MsgMilestoneTimeout};

/// A checkpoint, buffered or committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub proposer: Address,
    pub start_block: u64,
    pub end_block: u64,
    pub root_hash: B256,
    pub account_root_hash: B256,
    pub chain_id: String,
    /// Block time the checkpoint was buffered at, unix seconds.
    pub timestamp: u64,
}

impl Checkpoint {
    /// Number of child-chain blocks covered.
    pub fn len(&self) -> u64 {
        self.end_block.saturating_sub(self.start_block) + 1
    }
}

/// Keccak merkle root over dividend accounts ordered by user address.
pub fn account_root_hash(accounts: &[DividendAccount]) -> Result<B256, TxError> {
    let mut sorted = accounts.to_vec();
    sorted.sort_by(|a, b| a.user.cmp(&b.user));
    let leaves: Vec<B256> = sorted.iter().map(DividendAccount::leaf_hash).collect();
    merkle_root(&leaves).ok_or_else(|| TxError::AccountRoot("no dividend accounts".into()))
}

/// Merkle proof of `user`'s dividend account, or `None` if `user` has no account.
pub fn account_proof(accounts: &[DividendAccount], user: &Address) -> Option<Vec<B256>> {
    let mut sorted = accounts.to_vec();
    sorted.sort_by(|a, b| a.user.cmp(&b.user));
    let index = sorted.iter().position(|a| a.user == *user)?;
    let leaves: Vec<B256> = sorted.iter().map(DividendAccount::leaf_hash).collect();
    merkle_proof(&leaves, index)
}

#[derive(Debug, Clone)]
pub struct CheckpointKeeper {
    params: CheckpointParams,
}

impl CheckpointKeeper {
    pub fn new(params: CheckpointParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &CheckpointParams {
        &self.params
    }

    pub fn ack_count(&self, store: &dyn KvStore) -> Result<u64, StoreError> {
        Ok(store.get_decimal(keys::ACK_COUNT_KEY)?.unwrap_or(0))
    }

    pub fn set_ack_count(&self, store: &mut dyn KvStore, count: u64) {
        store.set_decimal(keys::ACK_COUNT_KEY, count);
    }

    pub fn increment_ack_count(&self, store: &mut dyn KvStore) -> Result<u64, StoreError> {
        let count = self.ack_count(store)? + 1;
        self.set_ack_count(store, count);
        Ok(count)
    }

    pub fn buffered(&self, store: &dyn KvStore) -> Result<Option<Checkpoint>, StoreError> {
        store.get_value(keys::BUFFER_CHECKPOINT_KEY)
    }

    pub fn set_buffer(&self, store: &mut dyn KvStore, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        store.set_value(keys::BUFFER_CHECKPOINT_KEY, checkpoint)
    }

    pub fn flush_buffer(&self, store: &mut dyn KvStore) {
        store.delete(keys::BUFFER_CHECKPOINT_KEY);
    }

    /// Time at which a checkpoint buffered at `buffered_at` may be replaced.
    pub fn buffer_expiry(&self, buffered_at: u64) -> u64 {
        buffered_at.saturating_add(self.params.buffer_time_secs)
    }

    pub fn add_checkpoint(
        &self,
        store: &mut dyn KvStore,
        number: u64,
        checkpoint: &Checkpoint,
    ) -> Result<(), StoreError> {
        store.set_value(&keys::checkpoint_key(number), checkpoint)?;
        tracing::debug!(
            number,
            start = checkpoint.start_block,
            end = checkpoint.end_block,
            "checkpoint stored"
        );
        Ok(())
    }

    pub fn checkpoint(&self, store: &dyn KvStore, number: u64) -> Result<Checkpoint, TxError> {
        store
            .get_value(&keys::checkpoint_key(number))?
            .ok_or(TxError::NoCheckpoint(number))
    }

    /// The checkpoint stored at the current ack count, if any has been acked.
    pub fn last_checkpoint(&self, store: &dyn KvStore) -> Result<Option<Checkpoint>, StoreError> {
        match self.ack_count(store)? {
            0 => Ok(None),
            n => store.get_value(&keys::checkpoint_key(n)),
        }
    }

    /// Every committed checkpoint, ordered by number.
    pub fn checkpoints(&self, store: &dyn KvStore) -> Result<Vec<(u64, Checkpoint)>, StoreError> {
        let prefix = keys::CHECKPOINT_PREFIX;
        let mut all = store
            .prefix_iter(prefix)
            .into_iter()
            .map(|(k, v)| {
                let number = std::str::from_utf8(&k[prefix.len()..])
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| StoreError::Decode {
                        key: hex::encode(&k),
                        reason: "checkpoint key suffix is not a number".into(),
                    })?;
                Ok((number, decode(&k, &v)?))
            })
            .collect::<Result<Vec<(u64, Checkpoint)>, StoreError>>()?;
        // decimal suffixes sort lexically in the store
        all.sort_by_key(|(n, _)| *n);
        Ok(all)
    }

    /// Page `page` (1-based) of `limit` checkpoints.
    pub fn checkpoints_page(
        &self,
        store: &dyn KvStore,
        page: u64,
        limit: u64,
    ) -> Result<Vec<(u64, Checkpoint)>, StoreError> {
        if page == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let skip = (page - 1).saturating_mul(limit);
        Ok(self
            .checkpoints(store)?
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    pub fn last_no_ack(&self, store: &dyn KvStore) -> Result<u64, StoreError> {
        Ok(store.get_decimal(keys::LAST_NO_ACK_KEY)?.unwrap_or(0))
    }

    pub fn set_last_no_ack(&self, store: &mut dyn KvStore, time: u64) {
        store.set_decimal(keys::LAST_NO_ACK_KEY, time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::verify_proof;
    use crate::store::MemStore;
    use alloy::primitives::U256;

    fn checkpoint(start: u64, end: u64) -> Checkpoint {
        Checkpoint {
            proposer: Address::repeat_byte(1),
            start_block: start,
            end_block: end,
            root_hash: B256::repeat_byte(0xaa),
            account_root_hash: B256::repeat_byte(0xbb),
            chain_id: "15001".into(),
            timestamp: 10,
        }
    }

    #[test]
    fn ack_count_starts_at_zero() {
        let mut store = MemStore::new();
        let keeper = CheckpointKeeper::new(CheckpointParams::default());
        assert_eq!(keeper.ack_count(&store).unwrap(), 0);
        assert_eq!(keeper.increment_ack_count(&mut store).unwrap(), 1);
        assert_eq!(store.get(keys::ACK_COUNT_KEY), Some(b"1".to_vec()));
    }

    #[test]
    fn checkpoints_are_listed_numerically() {
        let mut store = MemStore::new();
        let keeper = CheckpointKeeper::new(CheckpointParams::default());
        for n in 1..=11u64 {
            keeper
                .add_checkpoint(&mut store, n, &checkpoint((n - 1) * 10, n * 10 - 1))
                .unwrap();
        }
        keeper.set_ack_count(&mut store, 11);

        let all = keeper.checkpoints(&store).unwrap();
        let numbers: Vec<u64> = all.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, (1..=11).collect::<Vec<_>>());

        let page = keeper.checkpoints_page(&store, 2, 5).unwrap();
        assert_eq!(page.first().map(|(n, _)| *n), Some(6));
        assert_eq!(page.len(), 5);
        assert!(keeper.checkpoints_page(&store, 0, 5).unwrap().is_empty());

        assert_eq!(keeper.last_checkpoint(&store).unwrap().unwrap().end_block, 109);
        assert_eq!(keeper.checkpoint(&store, 12).unwrap_err(), TxError::NoCheckpoint(12));
    }

    #[test]
    fn buffer_flush() {
        let mut store = MemStore::new();
        let keeper = CheckpointKeeper::new(CheckpointParams::default());
        keeper.set_buffer(&mut store, &checkpoint(0, 255)).unwrap();
        assert_eq!(keeper.buffered(&store).unwrap().unwrap().len(), 256);
        keeper.flush_buffer(&mut store);
        assert!(keeper.buffered(&store).unwrap().is_none());
    }

    #[test]
    fn account_root_ignores_input_order() {
        let a = DividendAccount::new(Address::repeat_byte(2), U256::from(5));
        let b = DividendAccount::new(Address::repeat_byte(1), U256::from(7));
        let root = account_root_hash(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(root, account_root_hash(&[b.clone(), a.clone()]).unwrap());

        let proof = account_proof(&[a.clone(), b], &a.user).unwrap();
        assert!(verify_proof(a.leaf_hash(), 1, &proof, root));
        assert!(account_proof(&[a], &Address::ZERO).is_none());
    }

    #[test]
    fn empty_accounts_have_no_root() {
        assert!(matches!(account_root_hash(&[]), Err(TxError::AccountRoot(_))));
    }
}
