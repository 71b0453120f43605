//! Genesis import and export.
//!
//! A genesis document is the JSON dump of every module's state plus the parameters.
//! Import failures are fatal: the host must refuse to start on a [GenesisError].

use crate::checkpoint::{Checkpoint, CheckpointKeeper};
use crate::config::Params;
use crate::error::GenesisError;
use crate::span::{Span, SpanKeeper};
use crate::staking::StakingKeeper;
use crate::store::KvStore;
use crate::topup::{DividendAccount, TopupKeeper};
use crate::validator::Validator;
use crate::validator_set::ValidatorSet;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointGenesis {
    pub buffered_checkpoint: Option<Checkpoint>,
    pub last_no_ack: u64,
    pub ack_count: u64,
    pub checkpoints: Vec<Checkpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingGenesis {
    pub validators: Vec<Validator>,
    /// Rebuilt from the current validators when absent.
    pub current_validator_set: Option<ValidatorSet>,
    pub staking_sequences: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBalance {
    pub user: Address,
    pub amount: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopupGenesis {
    pub dividend_accounts: Vec<DividendAccount>,
    pub topup_sequences: Vec<String>,
    pub fee_balances: Vec<FeeBalance>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanGenesis {
    pub spans: Vec<Span>,
    pub last_eth_block: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisState {
    pub params: Params,
    pub checkpoint: CheckpointGenesis,
    pub staking: StakingGenesis,
    pub topup: TopupGenesis,
    pub span: SpanGenesis,
}

impl GenesisState {
    pub fn from_json(json: &str) -> Result<Self, GenesisError> {
        serde_json::from_str(json).map_err(|e| GenesisError::Decode(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, GenesisError> {
        serde_json::to_string_pretty(self).map_err(|e| GenesisError::Decode(e.to_string()))
    }
}

/// Write `state` into an empty store.
pub fn init_genesis(store: &mut dyn KvStore, state: &GenesisState) -> Result<(), GenesisError> {
    let checkpoint = CheckpointKeeper::new(state.params.checkpoint.clone());
    let staking = StakingKeeper::new();
    let topup = TopupKeeper::new();
    let span = SpanKeeper::new(state.params.span.clone());

    init_checkpoint(&checkpoint, store, &state.checkpoint)?;
    init_staking(&staking, store, &state.staking, state.checkpoint.ack_count)?;
    init_topup(&topup, store, &state.topup)?;
    init_span(&span, store, &state.span)?;

    tracing::info!(
        ack_count = state.checkpoint.ack_count,
        validators = state.staking.validators.len(),
        spans = state.span.spans.len(),
        "genesis loaded"
    );
    Ok(())
}

fn init_checkpoint(
    keeper: &CheckpointKeeper,
    store: &mut dyn KvStore,
    genesis: &CheckpointGenesis,
) -> Result<(), GenesisError> {
    if !genesis.checkpoints.is_empty() {
        if genesis.ack_count != genesis.checkpoints.len() as u64 {
            return Err(GenesisError::AckCountMismatch {
                ack_count: genesis.ack_count,
                checkpoints: genesis.checkpoints.len(),
            });
        }
        let mut sorted = genesis.checkpoints.clone();
        sorted.sort_by_key(|c| c.start_block);
        for (i, pair) in sorted.windows(2).enumerate() {
            if pair[0].end_block.checked_add(1) != Some(pair[1].start_block) {
                return Err(GenesisError::Discontinuous(i + 1));
            }
        }
        for (i, c) in sorted.iter().enumerate() {
            keeper.add_checkpoint(store, i as u64 + 1, c)?;
        }
    }
    if let Some(buffered) = &genesis.buffered_checkpoint {
        keeper.set_buffer(store, buffered)?;
    }
    keeper.set_ack_count(store, genesis.ack_count);
    keeper.set_last_no_ack(store, genesis.last_no_ack);
    Ok(())
}

fn init_staking(
    keeper: &StakingKeeper,
    store: &mut dyn KvStore,
    genesis: &StakingGenesis,
    ack_count: u64,
) -> Result<(), GenesisError> {
    for v in &genesis.validators {
        keeper.add_validator(store, v)?;
    }

    let set = match &genesis.current_validator_set {
        Some(set) if !set.is_empty() => {
            set.validate_basic()
                .map_err(|e| GenesisError::ValidatorSet(e.to_string()))?;
            set.clone()
        }
        _ => {
            let current: Vec<Validator> = genesis
                .validators
                .iter()
                .filter(|v| v.is_current(ack_count))
                .cloned()
                .collect();
            if current.is_empty() {
                ValidatorSet::default()
            } else {
                ValidatorSet::new(current).map_err(|e| GenesisError::ValidatorSet(e.to_string()))?
            }
        }
    };
    keeper.set_validator_set(store, &set)?;

    for seq in &genesis.staking_sequences {
        keeper.sequences().set(store, seq);
    }
    Ok(())
}

fn init_topup(
    keeper: &TopupKeeper,
    store: &mut dyn KvStore,
    genesis: &TopupGenesis,
) -> Result<(), GenesisError> {
    for account in &genesis.dividend_accounts {
        keeper.set_dividend_account(store, account)?;
    }
    for balance in &genesis.fee_balances {
        keeper.set_fee_balance(store, &balance.user, balance.amount)?;
    }
    for seq in &genesis.topup_sequences {
        keeper.sequences().set(store, seq);
    }
    Ok(())
}

fn init_span(keeper: &SpanKeeper, store: &mut dyn KvStore, genesis: &SpanGenesis) -> Result<(), GenesisError> {
    let mut spans = genesis.spans.clone();
    spans.sort_by_key(|s| s.id);
    for s in &spans {
        keeper.add_raw_span(store, s)?;
    }
    if let Some(last) = spans.last() {
        keeper.set_last_span_id(store, last.id);
    }
    keeper.set_last_eth_block(store, genesis.last_eth_block);
    Ok(())
}

/// Dump the store back into a genesis document.
pub fn export_genesis(store: &dyn KvStore, params: &Params) -> Result<GenesisState, GenesisError> {
    let checkpoint = CheckpointKeeper::new(params.checkpoint.clone());
    let staking = StakingKeeper::new();
    let topup = TopupKeeper::new();
    let span = SpanKeeper::new(params.span.clone());

    let set = staking.validator_set(store)?;
    Ok(GenesisState {
        params: params.clone(),
        checkpoint: CheckpointGenesis {
            buffered_checkpoint: checkpoint.buffered(store)?,
            last_no_ack: checkpoint.last_no_ack(store)?,
            ack_count: checkpoint.ack_count(store)?,
            checkpoints: checkpoint
                .checkpoints(store)?
                .into_iter()
                .map(|(_, c)| c)
                .collect(),
        },
        staking: StakingGenesis {
            validators: staking.all_validators(store)?,
            current_validator_set: (!set.is_empty()).then_some(set),
            staking_sequences: staking.sequences().all(store),
        },
        topup: TopupGenesis {
            dividend_accounts: topup.dividend_accounts(store)?,
            topup_sequences: topup.sequences().all(store),
            fee_balances: topup
                .fee_balances(store)?
                .into_iter()
                .map(|(user, amount)| FeeBalance { user, amount })
                .collect(),
        },
        span: SpanGenesis {
            spans: span.spans(store)?,
            last_eth_block: span.last_eth_block(store)?,
        },
    })
}
