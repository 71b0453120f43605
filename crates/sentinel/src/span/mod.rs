//! Spans and child-chain producer rotation.
//!
//! A span freezes the validator set for a block range and records the producers drawn
//! for it. Spans are append-only and chained: each span's id is one past the previous
//! span's id, and it starts the block after the previous span ends.

pub mod handler;
pub mod selection;

use crate::config::SpanParams;
use crate::error::TxError;
use crate::keys;
use crate::staking::StakingKeeper;
use crate::store::{decode, KvStore, StoreError, StoreExt};
use crate::validator::Validator;
use crate::validator_set::ValidatorSet;
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use handler::MsgProposeSpan;
pub use selection::select_producers;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub id: u64,
    pub start_block: u64,
    pub end_block: u64,
    /// Validator set at the time the span was frozen.
    pub validator_set: ValidatorSet,
    /// Producers sorted by signer; `voting_power` is the number of slots drawn.
    pub selected_producers: Vec<Validator>,
    pub chain_id: String,
}

#[derive(Debug, Clone)]
pub struct SpanKeeper {
    params: SpanParams,
}

impl SpanKeeper {
    pub fn new(params: SpanParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpanParams {
        &self.params
    }

    pub fn last_span_id(&self, store: &dyn KvStore) -> Result<Option<u64>, StoreError> {
        store.get_decimal(keys::LAST_SPAN_ID_KEY)
    }

    pub fn set_last_span_id(&self, store: &mut dyn KvStore, id: u64) {
        store.set_decimal(keys::LAST_SPAN_ID_KEY, id);
    }

    /// Store `span` and point the last-span id at it.
    pub fn add_span(&self, store: &mut dyn KvStore, span: &Span) -> Result<(), StoreError> {
        self.add_raw_span(store, span)?;
        self.set_last_span_id(store, span.id);
        Ok(())
    }

    /// Store `span` without moving the last-span pointer.
    pub fn add_raw_span(&self, store: &mut dyn KvStore, span: &Span) -> Result<(), StoreError> {
        store.set_value(&keys::span_key(span.id), span)
    }

    pub fn has_span(&self, store: &dyn KvStore, id: u64) -> bool {
        store.has(&keys::span_key(id))
    }

    pub fn span(&self, store: &dyn KvStore, id: u64) -> Result<Span, TxError> {
        store
            .get_value(&keys::span_key(id))?
            .ok_or(TxError::SpanNotFound(id))
    }

    pub fn last_span(&self, store: &dyn KvStore) -> Result<Option<Span>, StoreError> {
        match self.last_span_id(store)? {
            Some(id) => store.get_value(&keys::span_key(id)),
            None => Ok(None),
        }
    }

    /// Every stored span, ordered by id.
    pub fn spans(&self, store: &dyn KvStore) -> Result<Vec<Span>, StoreError> {
        let mut spans = store
            .prefix_iter(keys::SPAN_PREFIX)
            .into_iter()
            .map(|(k, v)| decode::<Span>(&k, &v))
            .collect::<Result<Vec<_>, _>>()?;
        spans.sort_by_key(|s| s.id);
        Ok(spans)
    }

    /// Page `page` (1-based) of `limit` spans.
    pub fn spans_page(&self, store: &dyn KvStore, page: u64, limit: u64) -> Result<Vec<Span>, StoreError> {
        if page == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let skip = (page - 1).saturating_mul(limit);
        Ok(self
            .spans(store)?
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    /// Last root-chain block whose hash has been used as a span seed.
    pub fn last_eth_block(&self, store: &dyn KvStore) -> Result<u64, StoreError> {
        Ok(store.get_decimal(keys::LAST_PROCESSED_ETH_BLOCK_KEY)?.unwrap_or(0))
    }

    pub fn set_last_eth_block(&self, store: &mut dyn KvStore, block: u64) {
        store.set_decimal(keys::LAST_PROCESSED_ETH_BLOCK_KEY, block);
    }

    pub fn increment_last_eth_block(&self, store: &mut dyn KvStore) -> Result<u64, StoreError> {
        let next = self.last_eth_block(store)?.saturating_add(1);
        self.set_last_eth_block(store, next);
        Ok(next)
    }

    /// Producers for the next span: drawn slots per validator become its voting power.
    pub fn select_next_producers(
        &self,
        staking: &StakingKeeper,
        store: &dyn KvStore,
        ack_count: u64,
        seed: B256,
    ) -> Result<Vec<Validator>, TxError> {
        let eligible = staking.span_eligible_validators(store, ack_count)?;
        if eligible.len() as u64 <= self.params.producer_count {
            return Ok(eligible);
        }

        let mut slots: BTreeMap<u64, i64> = BTreeMap::new();
        for id in select_producers(seed, &eligible, self.params.producer_count) {
            *slots.entry(id).or_default() += 1;
        }

        let mut producers = Vec::with_capacity(slots.len());
        for (id, count) in slots {
            if let Some(mut v) = staking.validator_by_id(store, id)? {
                v.voting_power = count;
                producers.push(v);
            }
        }
        producers.sort_by(|a, b| a.signer.cmp(&b.signer));
        Ok(producers)
    }

    /// Snapshot the validator set and drawn producers into span `id`, then consume the seed
    /// block.
    #[allow(clippy::too_many_arguments)]
    pub fn freeze_set(
        &self,
        staking: &StakingKeeper,
        store: &mut dyn KvStore,
        ack_count: u64,
        id: u64,
        start_block: u64,
        end_block: u64,
        chain_id: &str,
        seed: B256,
    ) -> Result<Span, TxError> {
        let producers = self.select_next_producers(staking, store, ack_count, seed)?;
        if producers.is_empty() {
            return Err(TxError::FreezeSet("no span-eligible validators".into()));
        }
        let span = Span {
            id,
            start_block,
            end_block,
            validator_set: staking.validator_set(store)?,
            selected_producers: producers,
            chain_id: chain_id.to_string(),
        };
        self.increment_last_eth_block(store)?;
        self.add_span(store, &span)?;
        tracing::info!(
            id,
            start = start_block,
            end = end_block,
            producers = span.selected_producers.len(),
            "span frozen"
        );
        Ok(span)
    }
}
