use super::{account_root_hash, Checkpoint, CheckpointKeeper};
use crate::config::{CheckpointParams, Params};
use crate::context::BlockContext;
use crate::error::TxError;
use crate::event::{Event, EVENT_CHECKPOINT, EVENT_CHECKPOINT_ACK, EVENT_CHECKPOINT_NO_ACK};
use crate::sidetx::Verdict;
use crate::staking::StakingKeeper;
use crate::store::KvStore;
use crate::topup::TopupKeeper;
use crate::verifier::ChainVerifier;
use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Proposal of a new checkpoint over child-chain blocks `start_block..=end_block`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCheckpoint {
    pub proposer: Address,
    pub start_block: u64,
    pub end_block: u64,
    pub root_hash: B256,
    pub account_root_hash: B256,
    pub chain_id: String,
}

impl MsgCheckpoint {
    pub fn validate_basic(&self, params: &CheckpointParams) -> Result<(), TxError> {
        if self.root_hash == B256::ZERO {
            return Err(TxError::InvalidMsg("zero root hash".into()));
        }
        if self.proposer == Address::ZERO {
            return Err(TxError::InvalidMsg("empty proposer".into()));
        }
        if self.start_block >= self.end_block || self.end_block == 0 {
            return Err(TxError::InvalidMsg(format!(
                "invalid range {}..={}",
                self.start_block, self.end_block
            )));
        }
        let length = (self.end_block - self.start_block).saturating_add(1);
        if length > params.max_checkpoint_length {
            return Err(TxError::InvalidMsg(format!(
                "checkpoint covers {} blocks, max {}",
                length, params.max_checkpoint_length
            )));
        }
        Ok(())
    }
}

/// Root-chain confirmation of checkpoint `number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCheckpointAck {
    pub from: Address,
    pub number: u64,
    pub proposer: Address,
    pub start_block: u64,
    pub end_block: u64,
    pub root_hash: B256,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl MsgCheckpointAck {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.from == Address::ZERO {
            return Err(TxError::InvalidMsg("empty from address".into()));
        }
        if self.proposer == Address::ZERO {
            return Err(TxError::InvalidMsg("empty proposer".into()));
        }
        if self.root_hash == B256::ZERO {
            return Err(TxError::InvalidMsg("empty root hash".into()));
        }
        Ok(())
    }
}

/// Claim that the buffered checkpoint was never submitted; rotates the proposer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCheckpointNoAck {
    pub from: Address,
}

impl MsgCheckpointNoAck {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.from == Address::ZERO {
            return Err(TxError::InvalidMsg("empty from address".into()));
        }
        Ok(())
    }
}

pub async fn verdict_checkpoint(
    verifier: &dyn ChainVerifier,
    params: &Params,
    msg: &MsgCheckpoint,
) -> Verdict {
    let root = match verifier
        .root_hash(msg.start_block, msg.end_block, params.checkpoint.max_checkpoint_length)
        .await
    {
        Ok(root) => root,
        Err(e) => {
            tracing::warn!(
                start = msg.start_block,
                end = msg.end_block,
                reason = %e,
                "unable to compute child-chain root hash"
            );
            return Verdict::Skip;
        }
    };
    if root != msg.root_hash {
        tracing::error!(
            start = msg.start_block,
            end = msg.end_block,
            expected = %root,
            got = %msg.root_hash,
            "checkpoint root hash mismatch"
        );
        return Verdict::Skip;
    }
    Verdict::Yes
}

pub async fn verdict_checkpoint_ack(
    verifier: &dyn ChainVerifier,
    params: &Params,
    msg: &MsgCheckpointAck,
) -> Verdict {
    let header = match verifier
        .header_info(
            msg.number,
            params.chain.root_chain_address,
            params.checkpoint.child_block_interval,
        )
        .await
    {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(number = msg.number, reason = %e, "unable to fetch checkpoint header");
            return Verdict::Skip;
        }
    };
    if header.start != msg.start_block
        || header.end != msg.end_block
        || header.proposer != msg.proposer
        || header.root != msg.root_hash
    {
        tracing::error!(
            number = msg.number,
            start = header.start,
            end = header.end,
            proposer = %header.proposer,
            root = %header.root,
            "ack does not match root-chain header"
        );
        return Verdict::Skip;
    }
    Verdict::Yes
}

/// Buffer a proposed checkpoint.
pub fn commit_checkpoint(
    checkpoint: &CheckpointKeeper,
    staking: &StakingKeeper,
    topup: &TopupKeeper,
    params: &Params,
    store: &mut dyn KvStore,
    ctx: &BlockContext,
    msg: &MsgCheckpoint,
) -> Result<Vec<Event>, TxError> {
    let buffered = checkpoint.buffered(store)?;
    if let Some(buffered) = &buffered {
        let expires_at = checkpoint.buffer_expiry(buffered.timestamp);
        if ctx.time < expires_at {
            tracing::debug!(expires_at, "checkpoint already buffered");
            return Err(TxError::BufferConflict { expires_at });
        }
    }

    match checkpoint.last_checkpoint(store)? {
        Some(last) => {
            if last.end_block > msg.start_block {
                tracing::error!(tip = last.end_block, start = msg.start_block, "old checkpoint");
                return Err(TxError::OldCheckpoint {
                    tip: last.end_block,
                    start: msg.start_block,
                });
            }
            if last.end_block.checked_add(1) != Some(msg.start_block) {
                tracing::error!(tip = last.end_block, start = msg.start_block, "checkpoint not in continuity");
                return Err(TxError::DiscontinuousCheckpoint {
                    tip: last.end_block,
                    start: msg.start_block,
                });
            }
        }
        None if msg.start_block != 0 => {
            tracing::error!(start = msg.start_block, "first checkpoint must start at 0");
            return Err(TxError::FirstCheckpointStart(msg.start_block));
        }
        None => {}
    }

    if msg.chain_id != params.chain.child_chain_id {
        return Err(TxError::InvalidMsg(format!(
            "chain id {} does not match {}",
            msg.chain_id, params.chain.child_chain_id
        )));
    }

    let proposer = staking.current_proposer(store)?;
    if proposer.as_ref().map(|v| v.signer) != Some(msg.proposer) {
        tracing::error!(got = %msg.proposer, "checkpoint from non-proposer");
        return Err(TxError::InvalidProposer {
            expected: proposer.map(|v| v.signer),
            got: msg.proposer,
        });
    }

    let computed = account_root_hash(&topup.dividend_accounts(store)?)?;
    if computed != msg.account_root_hash {
        tracing::error!(computed = %computed, claimed = %msg.account_root_hash, "account root mismatch");
        return Err(TxError::AccountRootMismatch {
            computed,
            claimed: msg.account_root_hash,
        });
    }

    if buffered.is_some() {
        tracing::info!("flushing expired checkpoint buffer");
        checkpoint.flush_buffer(store);
    }
    checkpoint.set_buffer(
        store,
        &Checkpoint {
            proposer: msg.proposer,
            start_block: msg.start_block,
            end_block: msg.end_block,
            root_hash: msg.root_hash,
            account_root_hash: msg.account_root_hash,
            chain_id: msg.chain_id.clone(),
            timestamp: ctx.time,
        },
    )?;
    tracing::debug!(
        start = msg.start_block,
        end = msg.end_block,
        root = %msg.root_hash,
        "checkpoint buffered"
    );

    Ok(vec![Event::new(EVENT_CHECKPOINT)
        .attr("proposer", msg.proposer)
        .attr("start-block", msg.start_block)
        .attr("end-block", msg.end_block)
        .attr("root-hash", msg.root_hash)
        .attr("account-hash", msg.account_root_hash)])
}

/// Commit the buffered checkpoint as checkpoint `msg.number`.
pub fn commit_checkpoint_ack(
    checkpoint: &CheckpointKeeper,
    staking: &StakingKeeper,
    store: &mut dyn KvStore,
    msg: &MsgCheckpointAck,
) -> Result<Vec<Event>, TxError> {
    let mut buffered = checkpoint
        .buffered(store)?
        .ok_or_else(|| TxError::BadAck("no checkpoint buffered".into()))?;

    let next = checkpoint.ack_count(store)? + 1;
    if msg.number != next {
        return Err(TxError::BadAck(format!(
            "ack for checkpoint {}, expected {}",
            msg.number, next
        )));
    }
    if msg.start_block != buffered.start_block {
        return Err(TxError::BadAck(format!(
            "start {} does not match buffered start {}",
            msg.start_block, buffered.start_block
        )));
    }
    if msg.end_block == buffered.end_block && msg.root_hash != buffered.root_hash {
        return Err(TxError::BadAck(format!(
            "root {} does not match buffered root {}",
            msg.root_hash, buffered.root_hash
        )));
    }

    if buffered.end_block > msg.end_block {
        tracing::info!(
            end = buffered.end_block,
            adjusted = msg.end_block,
            "truncating buffered checkpoint to the submitted range"
        );
        buffered.end_block = msg.end_block;
        buffered.root_hash = msg.root_hash;
        buffered.proposer = msg.proposer;
    }

    let rotated = staking.rotated_validator_set(store, 1)?;

    let ack_count = checkpoint.increment_ack_count(store)?;
    checkpoint.add_checkpoint(store, msg.number, &buffered)?;
    checkpoint.flush_buffer(store);
    staking.set_validator_set(store, &rotated)?;
    tracing::info!(number = msg.number, ack_count, "checkpoint acknowledged");

    Ok(vec![Event::new(EVENT_CHECKPOINT_ACK)
        .attr("header-index", msg.number)
        .attr("start-block", buffered.start_block)
        .attr("end-block", buffered.end_block)])
}

/// Rotate the proposer when no checkpoint arrived in time.
pub fn commit_checkpoint_no_ack(
    checkpoint: &CheckpointKeeper,
    staking: &StakingKeeper,
    store: &mut dyn KvStore,
    ctx: &BlockContext,
    msg: &MsgCheckpointNoAck,
) -> Result<Vec<Event>, TxError> {
    let buffer_time = checkpoint.params().buffer_time_secs;

    let last_checkpoint = checkpoint.last_checkpoint(store)?.map(|c| c.timestamp);
    let buffered = checkpoint.buffered(store)?.map(|c| c.timestamp);
    let reference = last_checkpoint.into_iter().chain(buffered).max().unwrap_or(0);
    if ctx.time.saturating_sub(reference) < buffer_time {
        tracing::debug!(now = ctx.time, reference, "no-ack before checkpoint deadline");
        return Err(TxError::InvalidNoAck);
    }

    let last_no_ack = checkpoint.last_no_ack(store)?;
    if ctx.time.saturating_sub(last_no_ack) < buffer_time {
        tracing::debug!(now = ctx.time, last_no_ack, "too many no-acks");
        return Err(TxError::TooManyNoAck);
    }

    let rotated = staking.rotated_validator_set(store, 1)?;
    let proposer = rotated.proposer();

    checkpoint.set_last_no_ack(store, ctx.time);
    staking.set_validator_set(store, &rotated)?;
    tracing::info!(
        from = %msg.from,
        proposer = ?proposer.as_ref().map(|v| v.signer),
        "no-ack accepted, proposer rotated"
    );

    let mut event = Event::new(EVENT_CHECKPOINT_NO_ACK).attr("from", msg.from);
    if let Some(p) = proposer {
        event = event.attr("new-proposer", p.signer);
    }
    Ok(vec![event])
}
