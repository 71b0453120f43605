//! Validator staking state.
//!
//! Validators are stored by signer address with a secondary `id -> signer` index. Records
//! are never deleted: an exit or a signer rotation only zeroes power or sets `end_epoch`,
//! so historical signers stay resolvable.

pub mod handler;

use crate::error::TxError;
use crate::keys;
use crate::sequence::SequenceGuard;
use crate::store::{decode, KvStore, StoreError, StoreExt};
use crate::validator::{PubKey, Validator};
use crate::validator_set::{get_updated_validators, ValidatorSet};
use alloy::primitives::Address;

pub use handler::{MsgSignerUpdate, MsgStakeUpdate, MsgValidatorExit, MsgValidatorJoin};

#[derive(Debug, Clone, Copy)]
pub struct StakingKeeper {
    sequences: SequenceGuard,
}

impl Default for StakingKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl StakingKeeper {
    pub fn new() -> Self {
        Self {
            sequences: SequenceGuard::staking(),
        }
    }

    pub fn sequences(&self) -> &SequenceGuard {
        &self.sequences
    }

    /// Store `validator` under its signer and point its id at that signer.
    pub fn add_validator(
        &self,
        store: &mut dyn KvStore,
        validator: &Validator,
    ) -> Result<(), StoreError> {
        store.set_value(&keys::validator_key(&validator.signer), validator)?;
        self.set_signer_for_id(store, validator.id, &validator.signer);
        tracing::debug!(id = validator.id, signer = %validator.signer, "validator stored");
        Ok(())
    }

    pub fn validator(
        &self,
        store: &dyn KvStore,
        signer: &Address,
    ) -> Result<Option<Validator>, StoreError> {
        store.get_value(&keys::validator_key(signer))
    }

    pub fn set_signer_for_id(&self, store: &mut dyn KvStore, id: u64, signer: &Address) {
        store.set(&keys::validator_map_key(id), signer.to_vec());
    }

    pub fn signer_for_id(&self, store: &dyn KvStore, id: u64) -> Option<Address> {
        store
            .get(&keys::validator_map_key(id))
            .filter(|b| b.len() == 20)
            .map(|b| Address::from_slice(&b))
    }

    pub fn validator_by_id(
        &self,
        store: &dyn KvStore,
        id: u64,
    ) -> Result<Option<Validator>, StoreError> {
        match self.signer_for_id(store, id) {
            Some(signer) => self.validator(store, &signer),
            None => Ok(None),
        }
    }

    /// Every stored validator record, ordered by signer address.
    pub fn all_validators(&self, store: &dyn KvStore) -> Result<Vec<Validator>, StoreError> {
        store
            .prefix_iter(keys::VALIDATORS_PREFIX)
            .into_iter()
            .map(|(k, v)| decode(&k, &v))
            .collect()
    }

    pub fn current_validators(
        &self,
        store: &dyn KvStore,
        ack_count: u64,
    ) -> Result<Vec<Validator>, StoreError> {
        Ok(self
            .all_validators(store)?
            .into_iter()
            .filter(|v| v.is_current(ack_count))
            .collect())
    }

    /// Current validators that have not started unbonding.
    pub fn span_eligible_validators(
        &self,
        store: &dyn KvStore,
        ack_count: u64,
    ) -> Result<Vec<Validator>, StoreError> {
        Ok(self
            .current_validators(store, ack_count)?
            .into_iter()
            .filter(|v| v.end_epoch == 0)
            .collect())
    }

    pub fn is_current_validator(
        &self,
        store: &dyn KvStore,
        signer: &Address,
        ack_count: u64,
    ) -> Result<bool, StoreError> {
        Ok(self
            .validator(store, signer)?
            .map(|v| v.is_current(ack_count))
            .unwrap_or(false))
    }

    /// The stored validator set; empty when none has been written yet.
    pub fn validator_set(&self, store: &dyn KvStore) -> Result<ValidatorSet, StoreError> {
        Ok(store
            .get_value(keys::CURRENT_VALIDATOR_SET_KEY)?
            .unwrap_or_default())
    }

    pub fn set_validator_set(
        &self,
        store: &mut dyn KvStore,
        set: &ValidatorSet,
    ) -> Result<(), StoreError> {
        store.set_value(keys::CURRENT_VALIDATOR_SET_KEY, set)
    }

    /// The stored set with the proposer rotated `times` steps. Nothing is written.
    pub fn rotated_validator_set(
        &self,
        store: &dyn KvStore,
        times: u32,
    ) -> Result<ValidatorSet, TxError> {
        let mut set = self.validator_set(store)?;
        set.increment_proposer_priority(times)?;
        Ok(set)
    }

    /// Rotate the proposer `times` steps and persist the set.
    pub fn increment_accum(&self, store: &mut dyn KvStore, times: u32) -> Result<(), TxError> {
        let set = self.rotated_validator_set(store, times)?;
        self.set_validator_set(store, &set)?;
        Ok(())
    }

    /// The set rotating milestone proposers. Until the first milestone rotation it is a
    /// copy of the checkpoint validator set.
    pub fn milestone_validator_set(&self, store: &dyn KvStore) -> Result<ValidatorSet, StoreError> {
        match store.get_value(keys::MILESTONE_VALIDATOR_SET_KEY)? {
            Some(set) => Ok(set),
            None => self.validator_set(store),
        }
    }

    pub fn set_milestone_validator_set(
        &self,
        store: &mut dyn KvStore,
        set: &ValidatorSet,
    ) -> Result<(), StoreError> {
        store.set_value(keys::MILESTONE_VALIDATOR_SET_KEY, set)
    }

    pub fn rotated_milestone_validator_set(
        &self,
        store: &dyn KvStore,
        times: u32,
    ) -> Result<ValidatorSet, TxError> {
        let mut set = self.milestone_validator_set(store)?;
        set.increment_proposer_priority(times)?;
        Ok(set)
    }

    pub fn current_milestone_proposer(
        &self,
        store: &dyn KvStore,
    ) -> Result<Option<Validator>, StoreError> {
        Ok(self.milestone_validator_set(store)?.proposer())
    }

    pub fn current_proposer(&self, store: &dyn KvStore) -> Result<Option<Validator>, StoreError> {
        Ok(self.validator_set(store)?.proposer())
    }

    pub fn next_proposer(&self, store: &dyn KvStore) -> Result<Option<Validator>, StoreError> {
        Ok(self.validator_set(store)?.next_proposer())
    }

    pub fn total_power(&self, store: &dyn KvStore) -> Result<i64, StoreError> {
        Ok(self.validator_set(store)?.total_voting_power())
    }

    /// Move validator `prev_signer` to a new key. The old record keeps its id with zero
    /// power; the new one carries the power over.
    pub fn update_signer(
        &self,
        store: &mut dyn KvStore,
        new_signer: Address,
        new_pubkey: PubKey,
        prev_signer: &Address,
    ) -> Result<(), TxError> {
        let mut validator = self
            .validator(store, prev_signer)?
            .ok_or(TxError::NoValidatorForSigner(*prev_signer))?;
        let power = validator.voting_power;
        validator.voting_power = 0;
        self.add_validator(store, &validator)?;

        validator.signer = new_signer;
        validator.pubkey = new_pubkey;
        validator.voting_power = power;
        self.add_validator(store, &validator)?;
        Ok(())
    }

    /// Epoch-change step: fold validator record changes into the stored set and rotate
    /// the proposer once. Returns the applied change set.
    pub fn apply_validator_updates(
        &self,
        store: &mut dyn KvStore,
        ack_count: u64,
    ) -> Result<Vec<Validator>, TxError> {
        let mut set = self.validator_set(store)?;
        let all = self.all_validators(store)?;
        let updates = get_updated_validators(&set, &all, ack_count);
        if updates.is_empty() {
            return Ok(updates);
        }

        set.update_with_change_set(updates.clone())?;
        set.increment_proposer_priority(1)?;

        let milestone_set = match store.get_value::<ValidatorSet>(keys::MILESTONE_VALIDATOR_SET_KEY)? {
            Some(mut milestone_set) => {
                milestone_set.update_with_change_set(updates.clone())?;
                milestone_set.increment_proposer_priority(1)?;
                Some(milestone_set)
            }
            None => None,
        };

        self.set_validator_set(store, &set)?;
        if let Some(milestone_set) = &milestone_set {
            self.set_milestone_validator_set(store, milestone_set)?;
        }
        tracing::info!(
            changes = updates.len(),
            validators = set.len(),
            total_power = set.total_voting_power(),
            "validator set updated"
        );
        Ok(updates)
    }
}
