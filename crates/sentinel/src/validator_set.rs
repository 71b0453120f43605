//! Weighted round-robin validator set.
//!
//! Each rotation adds every validator's voting power to its proposer priority, picks the
//! highest priority as proposer (ties go to the lower signer address), and subtracts the
//! total voting power from the winner. Priorities are rescaled into a window of
//! `PRIORITY_WINDOW_SIZE_FACTOR * total` and centred on zero before every rotation, so
//! the set stays deterministic across nodes and never overflows.

use crate::error::TxError;
use crate::validator::Validator;
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Upper bound on the summed voting power; leaves headroom for priority arithmetic.
pub const MAX_TOTAL_VOTING_POWER: i64 = i64::MAX / 8;

/// Maximum distance between priorities, as a multiple of total voting power.
pub const PRIORITY_WINDOW_SIZE_FACTOR: i64 = 2;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidatorSetError {
    #[error("validator set is empty")]
    Empty,

    #[error("proposer priority can only be incremented a positive number of times")]
    NonPositiveTimes,

    #[error("duplicate entry {0} in change set")]
    Duplicate(Address),

    #[error("voting power can't be negative: {0}")]
    NegativePower(i64),

    #[error("voting power can't be higher than {MAX_TOTAL_VOTING_POWER}, got {0}")]
    PowerTooHigh(i64),

    #[error("cannot process validators with voting power 0 when creating a set")]
    RemovalNotAllowed,

    #[error("applying the validator changes would result in empty set")]
    WouldBeEmpty,

    #[error("failed to find validator {0} to remove")]
    UnknownRemoval(Address),

    #[error("total voting power of resulting set exceeds max {MAX_TOTAL_VOTING_POWER}")]
    TotalPowerOverflow,

    #[error("invalid validator: {0}")]
    InvalidValidator(String),
}

impl From<ValidatorSetError> for TxError {
    fn from(e: ValidatorSetError) -> Self {
        TxError::ValidatorSet(e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    /// Sorted by voting power descending, then signer ascending.
    pub validators: Vec<Validator>,
    pub proposer: Option<Validator>,
    pub total_voting_power: i64,
}

impl ValidatorSet {
    /// Build a set from fresh validators and elect the first proposer.
    pub fn new(validators: Vec<Validator>) -> Result<Self, ValidatorSetError> {
        let mut set = ValidatorSet::default();
        let non_empty = !validators.is_empty();
        set.apply_change_set(validators, false)?;
        if non_empty {
            set.increment_proposer_priority(1)?;
        }
        Ok(set)
    }

    /// Rebuild a set from stored validators without touching their priorities.
    pub fn from_existing(validators: Vec<Validator>) -> Result<Self, ValidatorSetError> {
        for v in &validators {
            v.validate_basic()
                .map_err(ValidatorSetError::InvalidValidator)?;
        }
        let mut set = ValidatorSet {
            validators,
            proposer: None,
            total_voting_power: 0,
        };
        set.proposer = set.find_previous_proposer().cloned();
        set.update_total_voting_power()?;
        set.sort_by_voting_power();
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn validate_basic(&self) -> Result<(), ValidatorSetError> {
        if self.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        for (idx, v) in self.validators.iter().enumerate() {
            v.validate_basic()
                .map_err(|e| ValidatorSetError::InvalidValidator(format!("#{}: {}", idx, e)))?;
        }
        if let Some(p) = &self.proposer {
            p.validate_basic()
                .map_err(|e| ValidatorSetError::InvalidValidator(format!("proposer: {}", e)))?;
        }
        Ok(())
    }

    pub fn total_voting_power(&self) -> i64 {
        if self.total_voting_power == 0 {
            self.sum_voting_power()
        } else {
            self.total_voting_power
        }
    }

    fn sum_voting_power(&self) -> i64 {
        self.validators
            .iter()
            .fold(0i64, |acc, v| acc.saturating_add(v.voting_power))
    }

    fn update_total_voting_power(&mut self) -> Result<(), ValidatorSetError> {
        let mut sum = 0i64;
        for v in &self.validators {
            sum = sum.saturating_add(v.voting_power);
            if sum > MAX_TOTAL_VOTING_POWER {
                return Err(ValidatorSetError::TotalPowerOverflow);
            }
        }
        self.total_voting_power = sum;
        Ok(())
    }

    /// Current proposer; elected from priorities when the set has none recorded.
    pub fn proposer(&self) -> Option<Validator> {
        if self.is_empty() {
            return None;
        }
        match &self.proposer {
            Some(p) => Some(p.clone()),
            None => self.find_proposer().cloned(),
        }
    }

    /// Proposer after one more rotation, computed on a copy.
    pub fn next_proposer(&self) -> Option<Validator> {
        let mut copy = self.clone();
        copy.increment_proposer_priority(1).ok()?;
        copy.proposer
    }

    pub fn has_address(&self, signer: &Address) -> bool {
        self.validators.iter().any(|v| v.signer == *signer)
    }

    pub fn get_by_address(&self, signer: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| v.signer == *signer)
    }

    pub fn get_by_id(&self, id: u64) -> Option<&Validator> {
        self.validators.iter().find(|v| v.id == id)
    }

    fn find_proposer(&self) -> Option<&Validator> {
        self.validators
            .iter()
            .min_by(|a, b| a.cmp_proposer_priority(b))
    }

    fn find_previous_proposer(&self) -> Option<&Validator> {
        self.validators
            .iter()
            .max_by(|a, b| a.cmp_proposer_priority(b))
    }

    /// Rotate the proposer `times` times.
    pub fn increment_proposer_priority(&mut self, times: u32) -> Result<(), ValidatorSetError> {
        if self.is_empty() {
            return Err(ValidatorSetError::Empty);
        }
        if times == 0 {
            return Err(ValidatorSetError::NonPositiveTimes);
        }

        let total = self.total_voting_power();
        self.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR * total);
        self.shift_by_avg_proposer_priority();

        let mut proposer = 0;
        for _ in 0..times {
            proposer = self.rotate_once(total);
        }
        self.proposer = self.validators.get(proposer).cloned();
        tracing::debug!(
            proposer = %self.validators[proposer].signer,
            times,
            "proposer priority incremented"
        );
        Ok(())
    }

    fn rotate_once(&mut self, total: i64) -> usize {
        for v in &mut self.validators {
            v.proposer_priority = v.proposer_priority.saturating_add(v.voting_power);
        }
        let idx = self
            .validators
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.cmp_proposer_priority(b))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let winner = &mut self.validators[idx];
        winner.proposer_priority = winner.proposer_priority.saturating_sub(total);
        idx
    }

    /// Divide all priorities by `ceil(diff / diff_max)` when their spread exceeds `diff_max`.
    pub fn rescale_priorities(&mut self, diff_max: i64) {
        if self.is_empty() || diff_max <= 0 {
            return;
        }
        let max = self.validators.iter().map(|v| v.proposer_priority).max().unwrap_or(0);
        let min = self.validators.iter().map(|v| v.proposer_priority).min().unwrap_or(0);
        let diff = (max as i128 - min as i128).abs();
        let diff_max = diff_max as i128;
        if diff > diff_max {
            let ratio = (diff + diff_max - 1) / diff_max;
            for v in &mut self.validators {
                v.proposer_priority = (v.proposer_priority as i128 / ratio) as i64;
            }
        }
    }

    fn shift_by_avg_proposer_priority(&mut self) {
        if self.is_empty() {
            return;
        }
        let sum: i128 = self.validators.iter().map(|v| v.proposer_priority as i128).sum();
        let avg = sum.div_euclid(self.validators.len() as i128) as i64;
        for v in &mut self.validators {
            v.proposer_priority = v.proposer_priority.saturating_sub(avg);
        }
    }

    fn sort_by_voting_power(&mut self) {
        self.validators.sort_by(|a, b| {
            b.voting_power
                .cmp(&a.voting_power)
                .then_with(|| a.signer.cmp(&b.signer))
        });
    }

    /// Apply additions, power updates and removals (power 0). On error the set is unchanged.
    pub fn update_with_change_set(
        &mut self,
        changes: Vec<Validator>,
    ) -> Result<(), ValidatorSetError> {
        self.apply_change_set(changes, true)
    }

    fn apply_change_set(
        &mut self,
        changes: Vec<Validator>,
        allow_removals: bool,
    ) -> Result<(), ValidatorSetError> {
        if changes.is_empty() {
            return Ok(());
        }

        let (mut updates, removals) = process_changes(changes)?;
        if !allow_removals && !removals.is_empty() {
            return Err(ValidatorSetError::RemovalNotAllowed);
        }

        let new_count = updates
            .iter()
            .filter(|u| !self.has_address(&u.signer))
            .count();
        if new_count == 0 && self.validators.len() == removals.len() {
            return Err(ValidatorSetError::WouldBeEmpty);
        }

        let removed_power = self.verify_removals(&removals)?;
        let tvp_after_updates = self.verify_updates(&updates, removed_power)?;
        self.compute_new_priorities(&mut updates, tvp_after_updates);

        let mut by_address: BTreeMap<Address, Validator> = self
            .validators
            .drain(..)
            .map(|v| (v.signer, v))
            .collect();
        for u in updates {
            by_address.insert(u.signer, u);
        }
        for r in &removals {
            by_address.remove(&r.signer);
        }
        self.validators = by_address.into_values().collect();

        self.update_total_voting_power()?;
        self.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR * self.total_voting_power());
        self.shift_by_avg_proposer_priority();
        self.sort_by_voting_power();
        Ok(())
    }

    fn verify_removals(&self, removals: &[Validator]) -> Result<i64, ValidatorSetError> {
        let mut removed = 0i64;
        for r in removals {
            let existing = self
                .get_by_address(&r.signer)
                .ok_or(ValidatorSetError::UnknownRemoval(r.signer))?;
            removed += existing.voting_power;
        }
        Ok(removed)
    }

    /// Total voting power after updates and before removals. Updates are applied in
    /// ascending order of their power delta so the running total only peaks at the end.
    fn verify_updates(
        &self,
        updates: &[Validator],
        removed_power: i64,
    ) -> Result<i64, ValidatorSetError> {
        let delta = |u: &Validator| match self.get_by_address(&u.signer) {
            Some(v) => u.voting_power - v.voting_power,
            None => u.voting_power,
        };
        let mut deltas: Vec<i64> = updates.iter().map(delta).collect();
        deltas.sort_unstable();

        let mut tvp = self.total_voting_power() - removed_power;
        for d in deltas {
            tvp += d;
            if tvp > MAX_TOTAL_VOTING_POWER {
                return Err(ValidatorSetError::TotalPowerOverflow);
            }
        }
        Ok(tvp + removed_power)
    }

    /// New validators start at `-1.125 * total` so re-bonding cannot reset a negative
    /// priority; existing ones keep theirs.
    fn compute_new_priorities(&self, updates: &mut [Validator], updated_total: i64) {
        for u in updates.iter_mut() {
            u.proposer_priority = match self.get_by_address(&u.signer) {
                Some(v) => v.proposer_priority,
                None => -(updated_total + (updated_total >> 3)),
            };
        }
    }
}

/// Sort changes by address and split them into updates and removals.
fn process_changes(
    mut changes: Vec<Validator>,
) -> Result<(Vec<Validator>, Vec<Validator>), ValidatorSetError> {
    changes.sort_by(|a, b| a.signer.cmp(&b.signer));

    let mut updates = Vec::with_capacity(changes.len());
    let mut removals = Vec::new();
    let mut prev: Option<Address> = None;
    for change in changes {
        if prev == Some(change.signer) {
            return Err(ValidatorSetError::Duplicate(change.signer));
        }
        prev = Some(change.signer);
        match change.voting_power {
            p if p < 0 => return Err(ValidatorSetError::NegativePower(p)),
            p if p > MAX_TOTAL_VOTING_POWER => return Err(ValidatorSetError::PowerTooHigh(p)),
            0 => removals.push(change),
            _ => updates.push(change),
        }
    }
    Ok((updates, removals))
}

/// Diff the stored validators against the current set for the epoch after `ack_count`.
///
/// Members that stopped being current are emitted with power 0, current validators
/// missing from the set are added, and members whose power changed are updated.
pub fn get_updated_validators(
    current: &ValidatorSet,
    all: &[Validator],
    ack_count: u64,
) -> Vec<Validator> {
    let mut updates = Vec::new();
    for v in all {
        let in_set = current.get_by_address(&v.signer);
        let is_current = v.is_current(ack_count);
        match in_set {
            Some(_) if !is_current => {
                let mut removal = v.clone();
                removal.voting_power = 0;
                updates.push(removal);
            }
            None if is_current => updates.push(v.clone()),
            Some(member) if member.voting_power != v.voting_power => updates.push(v.clone()),
            _ => {}
        }
    }
    updates
}
