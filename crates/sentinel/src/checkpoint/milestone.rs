//! Milestones: short, fast finality votes over child-chain block ranges.
//!
//! Milestones chain like checkpoints (each starts right after the previous one ends) but
//! never reach the root chain. They rotate their own proposer set, and a milestone that
//! fails to gather a yes majority is remembered by id as a no-ack.

use super::CheckpointKeeper;
use crate::config::Params;
use crate::context::BlockContext;
use crate::error::TxError;
use crate::event::{Event, EVENT_MILESTONE, EVENT_MILESTONE_TIMEOUT};
use crate::keys;
use crate::sidetx::Verdict;
use crate::staking::StakingKeeper;
use crate::store::{KvStore, StoreError, StoreExt};
use crate::verifier::ChainVerifier;
use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub proposer: Address,
    pub start_block: u64,
    pub end_block: u64,
    /// Hash of child-chain block `end_block`.
    pub hash: B256,
    pub chain_id: String,
    pub milestone_id: String,
    /// Block time the milestone was committed at, unix seconds.
    pub timestamp: u64,
}

/// Proposal to finalize child-chain blocks `start_block..=end_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMilestone {
    pub proposer: Address,
    pub start_block: u64,
    pub end_block: u64,
    pub hash: B256,
    pub chain_id: String,
    pub milestone_id: String,
}

impl MsgMilestone {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.hash == B256::ZERO {
            return Err(TxError::InvalidMsg("zero end block hash".into()));
        }
        if self.proposer == Address::ZERO {
            return Err(TxError::InvalidMsg("empty proposer".into()));
        }
        if self.start_block >= self.end_block {
            return Err(TxError::InvalidMsg(format!(
                "invalid range {}..={}",
                self.start_block, self.end_block
            )));
        }
        if self.milestone_id.is_empty() {
            return Err(TxError::InvalidMsg("empty milestone id".into()));
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        self.end_block.saturating_sub(self.start_block).saturating_add(1)
    }
}

/// Claim that no milestone landed in time; rotates the milestone proposer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMilestoneTimeout {
    pub from: Address,
}

impl MsgMilestoneTimeout {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.from == Address::ZERO {
            return Err(TxError::InvalidMsg("empty from address".into()));
        }
        Ok(())
    }
}

impl CheckpointKeeper {
    pub fn milestone_count(&self, store: &dyn KvStore) -> Result<u64, StoreError> {
        Ok(store.get_decimal(keys::MILESTONE_COUNT_KEY)?.unwrap_or(0))
    }

    /// Store `milestone` under the next number and prune the one that fell out of the
    /// retention window. Returns the new count.
    pub fn add_milestone(
        &self,
        store: &mut dyn KvStore,
        milestone: &Milestone,
    ) -> Result<u64, StoreError> {
        let number = self.milestone_count(store)? + 1;
        store.set_value(&keys::milestone_key(number), milestone)?;
        let prune = self.params().milestone_prune_number;
        if prune > 0 && number > prune {
            store.delete(&keys::milestone_key(number - prune));
        }
        store.set_decimal(keys::MILESTONE_COUNT_KEY, number);
        tracing::debug!(
            number,
            start = milestone.start_block,
            end = milestone.end_block,
            id = %milestone.milestone_id,
            "milestone stored"
        );
        Ok(number)
    }

    /// Milestone `number`, unless it was never stored or has been pruned.
    pub fn milestone(&self, store: &dyn KvStore, number: u64) -> Result<Option<Milestone>, StoreError> {
        store.get_value(&keys::milestone_key(number))
    }

    pub fn last_milestone(&self, store: &dyn KvStore) -> Result<Option<Milestone>, StoreError> {
        match self.milestone_count(store)? {
            0 => Ok(None),
            n => self.milestone(store, n),
        }
    }

    pub fn set_no_ack_milestone(&self, store: &mut dyn KvStore, milestone_id: &str) {
        store.set(&keys::milestone_no_ack_key(milestone_id), vec![1]);
        store.set(keys::LAST_NO_ACK_MILESTONE_KEY, milestone_id.as_bytes().to_vec());
    }

    pub fn has_no_ack_milestone(&self, store: &dyn KvStore, milestone_id: &str) -> bool {
        store.has(&keys::milestone_no_ack_key(milestone_id))
    }

    pub fn last_no_ack_milestone(&self, store: &dyn KvStore) -> Option<String> {
        store
            .get(keys::LAST_NO_ACK_MILESTONE_KEY)
            .map(|id| String::from_utf8_lossy(&id).into_owned())
    }

    pub fn last_milestone_timeout(&self, store: &dyn KvStore) -> Result<u64, StoreError> {
        Ok(store.get_decimal(keys::LAST_MILESTONE_TIMEOUT_KEY)?.unwrap_or(0))
    }

    pub fn set_last_milestone_timeout(&self, store: &mut dyn KvStore, time: u64) {
        store.set_decimal(keys::LAST_MILESTONE_TIMEOUT_KEY, time);
    }

    /// Host height at which the last milestone was committed.
    pub fn milestone_block_number(&self, store: &dyn KvStore) -> Result<u64, StoreError> {
        Ok(store.get_decimal(keys::MILESTONE_BLOCK_NUMBER_KEY)?.unwrap_or(0))
    }

    pub fn set_milestone_block_number(&self, store: &mut dyn KvStore, height: u64) {
        store.set_decimal(keys::MILESTONE_BLOCK_NUMBER_KEY, height);
    }
}

/// Yes when the child chain has built far enough past `end_block` and its block there
/// hashes to `msg.hash`.
pub async fn verdict_milestone(
    verifier: &dyn ChainVerifier,
    checkpoint: &CheckpointKeeper,
    store: &dyn KvStore,
    msg: &MsgMilestone,
) -> Verdict {
    let params = checkpoint.params();
    match checkpoint.last_milestone(store) {
        Ok(Some(last)) if last.end_block.checked_add(1) != Some(msg.start_block) => {
            tracing::error!(tip = last.end_block, start = msg.start_block, "milestone not in continuity");
            return Verdict::Skip;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(reason = %e, "unable to read last milestone");
            return Verdict::Skip;
        }
    }
    if msg.len() < params.milestone_length {
        tracing::error!(length = msg.len(), min = params.milestone_length, "milestone too short");
        return Verdict::Skip;
    }

    let tip = match verifier.child_chain_block(None).await {
        Ok(block) => block.number,
        Err(e) => {
            tracing::warn!(reason = %e, "unable to fetch child-chain tip");
            return Verdict::Skip;
        }
    };
    if tip < msg.end_block.saturating_add(params.milestone_buffer_length) {
        tracing::debug!(tip, end = msg.end_block, "milestone end block not buried deep enough");
        return Verdict::Skip;
    }

    match verifier.child_chain_block(Some(msg.end_block)).await {
        Ok(block) if block.hash == msg.hash => Verdict::Yes,
        Ok(block) => {
            tracing::error!(
                end = msg.end_block,
                expected = %block.hash,
                got = %msg.hash,
                "milestone hash mismatch"
            );
            Verdict::Skip
        }
        Err(e) => {
            tracing::warn!(end = msg.end_block, reason = %e, "unable to fetch milestone end block");
            Verdict::Skip
        }
    }
}

/// Record the milestone and rotate the milestone proposer.
pub fn commit_milestone(
    checkpoint: &CheckpointKeeper,
    staking: &StakingKeeper,
    params: &Params,
    store: &mut dyn KvStore,
    ctx: &BlockContext,
    msg: &MsgMilestone,
) -> Result<Vec<Event>, TxError> {
    let proposer = staking.current_milestone_proposer(store)?;
    match &proposer {
        Some(p) if p.signer == msg.proposer => {}
        Some(p) => {
            tracing::error!(expected = %p.signer, got = %msg.proposer, "milestone from non-proposer");
            return Err(TxError::InvalidProposer {
                expected: Some(p.signer),
                got: msg.proposer,
            });
        }
        None => return Err(TxError::InvalidMsg("no milestone proposer".into())),
    }

    let min = params.checkpoint.milestone_length;
    if msg.len() < min {
        return Err(TxError::MilestoneTooShort { length: msg.len(), min });
    }

    match checkpoint.last_milestone(store)? {
        Some(last) => {
            if last.end_block > msg.start_block {
                tracing::error!(tip = last.end_block, start = msg.start_block, "old milestone");
                return Err(TxError::OldMilestone {
                    tip: last.end_block,
                    start: msg.start_block,
                });
            }
            if last.end_block.checked_add(1) != Some(msg.start_block) {
                tracing::error!(tip = last.end_block, start = msg.start_block, "milestone not in continuity");
                return Err(TxError::MilestoneNotContinuous {
                    tip: Some(last.end_block),
                    start: msg.start_block,
                });
            }
        }
        None if msg.start_block != params.checkpoint.first_milestone_block => {
            tracing::error!(start = msg.start_block, "first milestone start mismatch");
            return Err(TxError::MilestoneNotContinuous {
                tip: None,
                start: msg.start_block,
            });
        }
        None => {}
    }

    if msg.chain_id != params.chain.child_chain_id {
        return Err(TxError::InvalidMsg(format!(
            "chain id {} does not match {}",
            msg.chain_id, params.chain.child_chain_id
        )));
    }

    let rotated = staking.rotated_milestone_validator_set(store, 1)?;

    let number = checkpoint.add_milestone(
        store,
        &Milestone {
            proposer: msg.proposer,
            start_block: msg.start_block,
            end_block: msg.end_block,
            hash: msg.hash,
            chain_id: msg.chain_id.clone(),
            milestone_id: msg.milestone_id.clone(),
            timestamp: ctx.time,
        },
    )?;
    checkpoint.set_milestone_block_number(store, ctx.height);
    staking.set_milestone_validator_set(store, &rotated)?;
    tracing::info!(number, id = %msg.milestone_id, end = msg.end_block, "milestone committed");

    Ok(vec![Event::new(EVENT_MILESTONE)
        .attr("proposer", msg.proposer)
        .attr("start-block", msg.start_block)
        .attr("end-block", msg.end_block)
        .attr("hash", msg.hash)
        .attr("milestone-id", &msg.milestone_id)])
}

/// Remember a milestone that did not reach a yes majority.
pub fn record_milestone_no_ack(
    checkpoint: &CheckpointKeeper,
    store: &mut dyn KvStore,
    msg: &MsgMilestone,
) {
    checkpoint.set_no_ack_milestone(store, &msg.milestone_id);
    tracing::info!(id = %msg.milestone_id, start = msg.start_block, "milestone not acknowledged");
}

/// Rotate the milestone proposer when no milestone landed for a buffer period.
pub fn commit_milestone_timeout(
    checkpoint: &CheckpointKeeper,
    staking: &StakingKeeper,
    store: &mut dyn KvStore,
    ctx: &BlockContext,
    msg: &MsgMilestoneTimeout,
) -> Result<Vec<Event>, TxError> {
    let buffer_time = checkpoint.params().milestone_buffer_time_secs;

    let last = checkpoint.last_milestone(store)?.ok_or(TxError::NoMilestone)?;
    if ctx.time.saturating_sub(last.timestamp) < buffer_time {
        tracing::debug!(now = ctx.time, last = last.timestamp, "milestone timeout too early");
        return Err(TxError::InvalidMilestoneTimeout);
    }

    let last_timeout = checkpoint.last_milestone_timeout(store)?;
    if ctx.time.saturating_sub(last_timeout) < buffer_time {
        tracing::debug!(now = ctx.time, last_timeout, "too many milestone timeouts");
        return Err(TxError::TooManyNoAck);
    }

    let rotated = staking.rotated_milestone_validator_set(store, 1)?;
    let proposer = rotated.proposer();

    checkpoint.set_last_milestone_timeout(store, ctx.time);
    staking.set_milestone_validator_set(store, &rotated)?;
    tracing::info!(
        from = %msg.from,
        proposer = ?proposer.as_ref().map(|v| v.signer),
        "milestone timeout accepted, proposer rotated"
    );

    let mut event = Event::new(EVENT_MILESTONE_TIMEOUT).attr("from", msg.from);
    if let Some(p) = proposer {
        event = event.attr("new-proposer", p.signer);
    }
    Ok(vec![event])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointParams;
    use crate::store::MemStore;
    use crate::validator::{PubKey, Validator};
    use crate::validator_set::ValidatorSet;

    struct Fixture {
        store: MemStore,
        params: Params,
        checkpoint: CheckpointKeeper,
        staking: StakingKeeper,
    }

    fn fixture() -> Fixture {
        let params = Params::default();
        let mut store = MemStore::new();
        let staking = StakingKeeper::new();
        let vals: Vec<Validator> = (1..=2u8)
            .map(|i| {
                Validator::new(i as u64, 0, 0, 0, 10, PubKey::default(), Address::repeat_byte(i))
            })
            .collect();
        staking
            .set_validator_set(&mut store, &ValidatorSet::new(vals).unwrap())
            .unwrap();
        Fixture {
            store,
            checkpoint: CheckpointKeeper::new(params.checkpoint.clone()),
            params,
            staking,
        }
    }

    impl Fixture {
        fn milestone(&self, start: u64, end: u64, id: &str) -> MsgMilestone {
            let proposer = self.staking.current_milestone_proposer(&self.store).unwrap().unwrap();
            MsgMilestone {
                proposer: proposer.signer,
                start_block: start,
                end_block: end,
                hash: B256::repeat_byte(0xcc),
                chain_id: self.params.chain.child_chain_id.clone(),
                milestone_id: id.to_string(),
            }
        }

        fn commit(&mut self, msg: &MsgMilestone, time: u64) -> Result<Vec<Event>, TxError> {
            commit_milestone(
                &self.checkpoint,
                &self.staking,
                &self.params,
                &mut self.store,
                &BlockContext::new(7, time),
                msg,
            )
        }

        fn timeout(&mut self, time: u64) -> Result<Vec<Event>, TxError> {
            commit_milestone_timeout(
                &self.checkpoint,
                &self.staking,
                &mut self.store,
                &BlockContext::new(8, time),
                &MsgMilestoneTimeout { from: Address::repeat_byte(9) },
            )
        }
    }

    #[test]
    fn validate_basic_rejects_empty_fields() {
        let f = fixture();
        let good = f.milestone(0, 11, "m-0");
        assert!(good.validate_basic().is_ok());

        let mut m = good.clone();
        m.hash = B256::ZERO;
        assert!(m.validate_basic().is_err());
        let mut m = good.clone();
        m.end_block = m.start_block;
        assert!(m.validate_basic().is_err());
        let mut m = good;
        m.milestone_id.clear();
        assert!(m.validate_basic().is_err());
    }

    #[test]
    fn milestones_chain_and_rotate_proposer() {
        let mut f = fixture();
        let first_proposer = f.staking.current_milestone_proposer(&f.store).unwrap().unwrap();

        let mut late = f.milestone(5, 20, "m-0");
        assert_eq!(
            f.commit(&late, 100).unwrap_err(),
            TxError::MilestoneNotContinuous { tip: None, start: 5 }
        );
        late.start_block = 0;
        late.end_block = 5;
        assert_eq!(
            f.commit(&late, 100).unwrap_err(),
            TxError::MilestoneTooShort { length: 6, min: 12 }
        );

        let events = f.commit(&f.milestone(0, 11, "m-0"), 100).unwrap();
        assert_eq!(events[0].get("milestone-id"), Some("m-0"));
        assert_eq!(f.checkpoint.milestone_count(&f.store).unwrap(), 1);
        assert_eq!(f.checkpoint.milestone_block_number(&f.store).unwrap(), 7);
        let last = f.checkpoint.last_milestone(&f.store).unwrap().unwrap();
        assert_eq!((last.end_block, last.timestamp), (11, 100));

        let rotated = f.staking.current_milestone_proposer(&f.store).unwrap().unwrap();
        assert_ne!(rotated.signer, first_proposer.signer);
        assert_eq!(
            f.staking.current_proposer(&f.store).unwrap().unwrap().signer,
            first_proposer.signer
        );

        assert_eq!(
            f.commit(&f.milestone(5, 30, "m-1"), 110).unwrap_err(),
            TxError::OldMilestone { tip: 11, start: 5 }
        );
        assert_eq!(
            f.commit(&f.milestone(13, 30, "m-1"), 110).unwrap_err(),
            TxError::MilestoneNotContinuous { tip: Some(11), start: 13 }
        );
        f.commit(&f.milestone(12, 30, "m-1"), 110).unwrap();
        assert_eq!(f.checkpoint.milestone_count(&f.store).unwrap(), 2);
    }

    #[test]
    fn non_proposer_is_rejected_without_writes() {
        let mut f = fixture();
        let mut msg = f.milestone(0, 11, "m-0");
        msg.proposer = Address::repeat_byte(7);
        let before = f.store.clone();
        assert!(matches!(
            f.commit(&msg, 100).unwrap_err(),
            TxError::InvalidProposer { .. }
        ));
        assert_eq!(f.store, before);
    }

    #[test]
    fn continuity_holds_at_u64_boundary() {
        let mut f = fixture();
        f.commit(&f.milestone(0, u64::MAX, "m-0"), 100).unwrap();
        let before = f.store.clone();
        assert_eq!(
            f.commit(&f.milestone(u64::MAX, u64::MAX, "m-1"), 110).unwrap_err(),
            TxError::MilestoneTooShort { length: 1, min: 12 }
        );
        assert_eq!(
            f.commit(&f.milestone(0, 11, "m-1"), 110).unwrap_err(),
            TxError::OldMilestone { tip: u64::MAX, start: 0 }
        );
        assert_eq!(f.store, before);
    }

    #[test]
    fn old_milestones_are_pruned() {
        let mut store = MemStore::new();
        let keeper = CheckpointKeeper::new(CheckpointParams {
            milestone_prune_number: 2,
            ..CheckpointParams::default()
        });
        for n in 0..4u64 {
            let milestone = Milestone {
                proposer: Address::repeat_byte(1),
                start_block: n * 12,
                end_block: n * 12 + 11,
                hash: B256::repeat_byte(1),
                chain_id: "15001".into(),
                milestone_id: format!("m-{}", n),
                timestamp: n,
            };
            keeper.add_milestone(&mut store, &milestone).unwrap();
        }
        assert_eq!(keeper.milestone_count(&store).unwrap(), 4);
        assert!(keeper.milestone(&store, 1).unwrap().is_none());
        assert!(keeper.milestone(&store, 2).unwrap().is_none());
        assert!(keeper.milestone(&store, 3).unwrap().is_some());
        assert_eq!(keeper.last_milestone(&store).unwrap().unwrap().milestone_id, "m-3");
    }

    #[test]
    fn no_ack_is_remembered_by_id() {
        let mut f = fixture();
        let msg = f.milestone(0, 11, "m-0");
        assert!(!f.checkpoint.has_no_ack_milestone(&f.store, "m-0"));
        record_milestone_no_ack(&f.checkpoint, &mut f.store, &msg);
        assert!(f.checkpoint.has_no_ack_milestone(&f.store, "m-0"));
        assert_eq!(f.checkpoint.last_no_ack_milestone(&f.store).as_deref(), Some("m-0"));
        assert_eq!(f.checkpoint.milestone_count(&f.store).unwrap(), 0);
    }

    #[test]
    fn timeout_waits_for_buffer() {
        let mut f = fixture();
        assert_eq!(f.timeout(1000).unwrap_err(), TxError::NoMilestone);

        f.commit(&f.milestone(0, 11, "m-0"), 100).unwrap();
        let proposer = f.staking.current_milestone_proposer(&f.store).unwrap().unwrap();
        assert_eq!(f.timeout(300).unwrap_err(), TxError::InvalidMilestoneTimeout);

        let events = f.timeout(356).unwrap();
        let rotated = f.staking.current_milestone_proposer(&f.store).unwrap().unwrap();
        assert_ne!(rotated.signer, proposer.signer);
        assert_eq!(events[0].get("new-proposer"), Some(rotated.signer.to_string().as_str()));
        assert_eq!(f.checkpoint.last_milestone_timeout(&f.store).unwrap(), 356);

        let before = f.store.clone();
        assert_eq!(f.timeout(400).unwrap_err(), TxError::TooManyNoAck);
        assert_eq!(f.store, before);
        f.timeout(612).unwrap();
    }
}
