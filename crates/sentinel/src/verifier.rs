//! External chain verifier seam.
//!
//! Local verdicts re-derive facts from the root chain and the child chain through
//! [ChainVerifier]. Implementations own transport and caching; the core only sees the
//! decoded facts. Event decoding has default implementations over [crate::abi].

use crate::abi::{self, SignerChange, StakeUpdate, Staked, TopUpFee, UnstakeInit};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifierError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transaction {0} not found")]
    TxNotFound(B256),

    #[error("receipt in block {block} not confirmed: tip {tip}, need {required} confirmations")]
    NotConfirmed { block: u64, tip: u64, required: u64 },

    #[error("event not found at log index {0}")]
    EventNotFound(u64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("verifier call timed out")]
    Timeout,
}

/// One log entry of a root-chain receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub log_index: u64,
}

/// A root-chain transaction receipt with enough confirmations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub logs: Vec<Log>,
}

/// A checkpoint header as recorded by the root-chain contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderInfo {
    pub root: B256,
    pub start: u64,
    pub end: u64,
    pub created_at: u64,
    pub proposer: Address,
}

/// Minimal block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

#[async_trait]
pub trait ChainVerifier: Send + Sync {
    /// Receipt of a root-chain transaction with at least `confirmations` blocks on top.
    async fn confirmed_tx_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<Receipt, VerifierError>;

    /// Merkle root over child-chain headers `start..=end`; fails if the range exceeds
    /// `max_length` blocks.
    async fn root_hash(&self, start: u64, end: u64, max_length: u64)
        -> Result<B256, VerifierError>;

    /// Checkpoint `number` as stored in the root-chain contract.
    async fn header_info(
        &self,
        number: u64,
        root_chain: Address,
        child_block_interval: u64,
    ) -> Result<HeaderInfo, VerifierError>;

    /// Root-chain block `number`, or the latest block when `None`.
    async fn main_chain_block(&self, number: Option<u64>) -> Result<BlockHeader, VerifierError>;

    /// Child-chain block `number`, or the latest block when `None`.
    async fn child_chain_block(&self, number: Option<u64>) -> Result<BlockHeader, VerifierError>;

    fn decode_validator_join(
        &self,
        contract: Address,
        receipt: &Receipt,
        log_index: u64,
    ) -> Result<Staked, VerifierError> {
        abi::decode_event(contract, receipt, log_index)
    }

    fn decode_stake_update(
        &self,
        contract: Address,
        receipt: &Receipt,
        log_index: u64,
    ) -> Result<StakeUpdate, VerifierError> {
        abi::decode_event(contract, receipt, log_index)
    }

    fn decode_signer_update(
        &self,
        contract: Address,
        receipt: &Receipt,
        log_index: u64,
    ) -> Result<SignerChange, VerifierError> {
        abi::decode_event(contract, receipt, log_index)
    }

    fn decode_validator_exit(
        &self,
        contract: Address,
        receipt: &Receipt,
        log_index: u64,
    ) -> Result<UnstakeInit, VerifierError> {
        abi::decode_event(contract, receipt, log_index)
    }

    fn decode_topup(
        &self,
        contract: Address,
        receipt: &Receipt,
        log_index: u64,
    ) -> Result<TopUpFee, VerifierError> {
        abi::decode_event(contract, receipt, log_index)
    }
}
