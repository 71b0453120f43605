use super::SpanKeeper;
use crate::checkpoint::CheckpointKeeper;
use crate::config::Params;
use crate::error::TxError;
use crate::event::{Event, EVENT_PROPOSE_SPAN};
use crate::sidetx::Verdict;
use crate::staking::StakingKeeper;
use crate::store::KvStore;
use crate::verifier::ChainVerifier;
use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgProposeSpan {
    pub span_id: u64,
    pub proposer: Address,
    pub start_block: u64,
    pub end_block: u64,
    pub chain_id: String,
    /// Hash of the root-chain block following the last one consumed as a seed.
    pub seed: B256,
}

impl MsgProposeSpan {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.proposer == Address::ZERO {
            return Err(TxError::InvalidMsg("empty proposer".into()));
        }
        if self.start_block >= self.end_block {
            return Err(TxError::InvalidMsg(format!(
                "invalid span range {}..={}",
                self.start_block, self.end_block
            )));
        }
        if self.chain_id.is_empty() {
            return Err(TxError::InvalidMsg("empty chain id".into()));
        }
        Ok(())
    }
}

/// Hash of the root-chain block that seeds the next span.
pub async fn next_span_seed(
    verifier: &dyn ChainVerifier,
    span: &SpanKeeper,
    store: &dyn KvStore,
) -> Result<B256, String> {
    let number = span
        .last_eth_block(store)
        .map_err(|e| e.to_string())?
        .checked_add(1)
        .ok_or("root-chain block pointer exhausted")?;
    let block = verifier
        .main_chain_block(Some(number))
        .await
        .map_err(|e| e.to_string())?;
    Ok(block.hash)
}

pub async fn verdict_propose_span(
    verifier: &dyn ChainVerifier,
    span: &SpanKeeper,
    store: &dyn KvStore,
    msg: &MsgProposeSpan,
) -> Verdict {
    let seed = match next_span_seed(verifier, span, store).await {
        Ok(seed) => seed,
        Err(reason) => {
            tracing::warn!(%reason, "unable to fetch next span seed");
            return Verdict::Skip;
        }
    };
    if seed != msg.seed {
        tracing::error!(expected = %seed, got = %msg.seed, "span seed mismatch");
        return Verdict::Skip;
    }

    let child = match verifier.child_chain_block(None).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(reason = %e, "unable to fetch child-chain block");
            return Verdict::Skip;
        }
    };
    let last = match span.last_span(store) {
        Ok(Some(last)) => last,
        Ok(None) => {
            tracing::error!("no span to rotate from");
            return Verdict::Skip;
        }
        Err(e) => {
            tracing::warn!(reason = %e, "unable to read last span");
            return Verdict::Skip;
        }
    };
    if child.number < last.start_block || child.number > last.end_block {
        tracing::error!(
            child = child.number,
            start = msg.start_block,
            end = msg.end_block,
            "span proposed out of turn"
        );
        return Verdict::Skip;
    }
    Verdict::Yes
}

pub fn commit_propose_span(
    span: &SpanKeeper,
    staking: &StakingKeeper,
    checkpoint: &CheckpointKeeper,
    params: &Params,
    store: &mut dyn KvStore,
    msg: &MsgProposeSpan,
) -> Result<Vec<Event>, TxError> {
    if span.has_span(store, msg.span_id) {
        tracing::debug!(id = msg.span_id, "span already processed");
        return Err(TxError::OldTx(format!("span {}", msg.span_id)));
    }

    if let Some(last) = span.last_span(store)? {
        if last.id.checked_add(1) != Some(msg.span_id) {
            return Err(TxError::SpanNotContinuous(format!(
                "span id {} does not follow {}",
                msg.span_id, last.id
            )));
        }
        if last.end_block.checked_add(1) != Some(msg.start_block) {
            return Err(TxError::SpanNotContinuous(format!(
                "start block {} does not follow {}",
                msg.start_block, last.end_block
            )));
        }
    }
    if msg.chain_id != params.chain.child_chain_id {
        return Err(TxError::InvalidMsg(format!(
            "chain id {} does not match {}",
            msg.chain_id, params.chain.child_chain_id
        )));
    }

    let ack_count = checkpoint.ack_count(store)?;
    span.freeze_set(
        staking,
        store,
        ack_count,
        msg.span_id,
        msg.start_block,
        msg.end_block,
        &msg.chain_id,
        msg.seed,
    )?;

    Ok(vec![Event::new(EVENT_PROPOSE_SPAN)
        .attr("span-id", msg.span_id)
        .attr("start-block", msg.start_block)
        .attr("end-block", msg.end_block)])
}
