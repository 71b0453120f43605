//! Module parameters.
//!
//! Parameters are fixed at startup (usually from the genesis document) and handed to
//! [crate::App]; handlers never read them from the store.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Checkpoint lifecycle parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointParams {
    /// Lifetime of a buffered checkpoint, and the minimum gap between no-acks.
    pub buffer_time_secs: u64,
    /// Preferred checkpoint length in child-chain blocks.
    pub avg_checkpoint_length: u64,
    /// Upper bound on `end - start + 1` for one checkpoint.
    pub max_checkpoint_length: u64,
    /// Multiplier between checkpoint number and the root-chain header block id.
    pub child_block_interval: u64,
    /// Minimum milestone length in child-chain blocks.
    pub milestone_length: u64,
    /// Blocks the child chain must have built on top of a milestone's end block.
    pub milestone_buffer_length: u64,
    /// Minimum gap between the last milestone and a timeout, and between timeouts.
    pub milestone_buffer_time_secs: u64,
    /// Milestones older than this many numbers are pruned.
    pub milestone_prune_number: u64,
    /// Start block of the first milestone.
    pub first_milestone_block: u64,
}

impl Default for CheckpointParams {
    fn default() -> Self {
        Self {
            buffer_time_secs: 1000,
            avg_checkpoint_length: 256,
            max_checkpoint_length: 1024,
            child_block_interval: 10000,
            milestone_length: 12,
            milestone_buffer_length: 60,
            milestone_buffer_time_secs: 256,
            milestone_prune_number: 100,
            first_milestone_block: 0,
        }
    }
}

/// Root-chain contract addresses and confirmation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Confirmations a root-chain receipt needs before it is trusted.
    pub main_chain_tx_confirmations: u64,
    /// StakingInfo contract emitting staking and top-up events.
    pub staking_info_address: Address,
    /// RootChain contract holding submitted checkpoint headers.
    pub root_chain_address: Address,
    /// Child chain id carried by checkpoints and spans.
    pub child_chain_id: String,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            main_chain_tx_confirmations: 6,
            staking_info_address: Address::ZERO,
            root_chain_address: Address::ZERO,
            child_chain_id: "15001".to_string(),
        }
    }
}

/// Span and producer rotation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanParams {
    pub sprint_duration: u64,
    pub span_duration: u64,
    pub first_span_duration: u64,
    /// Number of producer slots drawn per span.
    pub producer_count: u64,
}

impl Default for SpanParams {
    fn default() -> Self {
        Self {
            sprint_duration: 64,
            span_duration: 100 * 64,
            first_span_duration: 256,
            producer_count: 4,
        }
    }
}

/// Side-transaction protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideTxParams {
    /// Upper bound on a local verdict, adapter round-trips included.
    pub verdict_timeout_ms: u64,
}

impl Default for SideTxParams {
    fn default() -> Self {
        Self {
            verdict_timeout_ms: 5000,
        }
    }
}

/// All module parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub checkpoint: CheckpointParams,
    pub chain: ChainParams,
    pub span: SpanParams,
    pub side_tx: SideTxParams,
}
