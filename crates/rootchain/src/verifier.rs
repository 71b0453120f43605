//! [ChainVerifier] over JSON-RPC endpoints.

use crate::config::RpcConfig;
use crate::rpc::{BlockTag, RpcBlock, RpcClient};
use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use futures_util::{stream, StreamExt, TryStreamExt};
use sentinel::merkle::{keccak, pad32, padded_merkle_root};
use sentinel::{BlockHeader, ChainVerifier, HeaderInfo, Receipt, VerifierError};
use std::time::Duration;

sol! {
    /// Checkpoint header storage on the root-chain contract.
    function headerBlocks(uint256 number) external view returns (
        bytes32 root,
        uint256 start,
        uint256 end,
        uint256 createdAt,
        address proposer
    );
}

/// Leaf of the child-chain header tree: 32-byte words of number, time, transactions root
/// and receipts root.
pub fn header_leaf(block: &RpcBlock) -> B256 {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(&pad32(&block.number.to_be_bytes()));
    buf.extend_from_slice(&pad32(&block.timestamp.to_be_bytes()));
    buf.extend_from_slice(block.transactions_root.as_slice());
    buf.extend_from_slice(block.receipts_root.as_slice());
    keccak(&buf)
}

fn rpc_err(e: anyhow::Error) -> VerifierError {
    VerifierError::Rpc(format!("{:#}", e))
}

pub struct RpcVerifier {
    main: RpcClient,
    child: RpcClient,
    header_concurrency: usize,
}

impl RpcVerifier {
    pub fn new(config: &RpcConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        Ok(Self {
            main: RpcClient::new(&config.main_chain_url, timeout, config.retry.clone())?,
            child: RpcClient::new(&config.child_chain_url, timeout, config.retry.clone())?,
            header_concurrency: config.header_concurrency.max(1),
        })
    }

    pub fn main_chain(&self) -> &RpcClient {
        &self.main
    }

    pub fn child_chain(&self) -> &RpcClient {
        &self.child
    }

    async fn child_block(&self, number: u64) -> Result<RpcBlock, VerifierError> {
        self.child
            .block(BlockTag::Number(number))
            .await
            .map_err(rpc_err)?
            .ok_or_else(|| VerifierError::Rpc(format!("child block {} not found", number)))
    }

    /// Headers `start..=end` from the child chain, in order.
    pub async fn child_headers(&self, start: u64, end: u64) -> Result<Vec<RpcBlock>, VerifierError> {
        stream::iter(start..=end)
            .map(|n| self.child_block(n))
            .buffered(self.header_concurrency)
            .try_collect()
            .await
    }

    /// Whether a receipt in `block` is final: at or below the finalized block when the node
    /// reports one, else `confirmations` deep below the tip.
    async fn is_confirmed(&self, block: u64, confirmations: u64) -> Result<(), VerifierError> {
        match self.main.block(BlockTag::Finalized).await {
            Ok(Some(finalized)) => {
                if block > finalized.number {
                    return Err(VerifierError::NotConfirmed {
                        block,
                        tip: finalized.number,
                        required: confirmations,
                    });
                }
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(reason = %e, "finalized block unavailable, using depth"),
        }

        let tip = self.main.block_number().await.map_err(rpc_err)?;
        if tip < block.saturating_add(confirmations) {
            return Err(VerifierError::NotConfirmed {
                block,
                tip,
                required: confirmations,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainVerifier for RpcVerifier {
    async fn confirmed_tx_receipt(
        &self,
        tx_hash: B256,
        confirmations: u64,
    ) -> Result<Receipt, VerifierError> {
        let receipt = self
            .main
            .transaction_receipt(tx_hash)
            .await
            .map_err(rpc_err)?
            .ok_or(VerifierError::TxNotFound(tx_hash))?;
        tracing::debug!(tx = %tx_hash, block = receipt.block_number, "tx included in block");
        self.is_confirmed(receipt.block_number, confirmations).await?;
        Ok(receipt)
    }

    async fn root_hash(&self, start: u64, end: u64, max_length: u64) -> Result<B256, VerifierError> {
        if start > end {
            return Err(VerifierError::InvalidRequest(format!(
                "start {} is greater than end {}",
                start, end
            )));
        }
        let count = end - start + 1;
        if count > max_length {
            return Err(VerifierError::InvalidRequest(format!(
                "{} headers requested, at most {}",
                count, max_length
            )));
        }

        let headers = self.child_headers(start, end).await?;
        let leaves: Vec<B256> = headers.iter().map(header_leaf).collect();
        let root = padded_merkle_root(&leaves);
        tracing::debug!(start, end, root = %root, "computed child-chain root");
        Ok(root)
    }

    async fn header_info(
        &self,
        number: u64,
        root_chain: Address,
        child_block_interval: u64,
    ) -> Result<HeaderInfo, VerifierError> {
        let key = U256::from(number) * U256::from(child_block_interval);
        let calldata = headerBlocksCall { number: key }.abi_encode();
        let data = self
            .main
            .eth_call(root_chain, &calldata)
            .await
            .map_err(rpc_err)?;
        let header = headerBlocksCall::abi_decode_returns(&data, true)
            .map_err(|e| VerifierError::Decode(e.to_string()))?;
        let to_u64 = |v: U256, what: &str| {
            u64::try_from(v).map_err(|_| VerifierError::Decode(format!("{} overflows u64", what)))
        };
        Ok(HeaderInfo {
            root: header.root,
            start: to_u64(header.start, "start")?,
            end: to_u64(header.end, "end")?,
            created_at: to_u64(header.createdAt, "createdAt")?,
            proposer: header.proposer,
        })
    }

    async fn main_chain_block(&self, number: Option<u64>) -> Result<BlockHeader, VerifierError> {
        let tag = number.map_or(BlockTag::Latest, BlockTag::Number);
        self.main
            .block(tag)
            .await
            .map_err(rpc_err)?
            .map(BlockHeader::from)
            .ok_or_else(|| VerifierError::Rpc(format!("main chain block {:?} not found", tag)))
    }

    async fn child_chain_block(&self, number: Option<u64>) -> Result<BlockHeader, VerifierError> {
        let tag = number.map_or(BlockTag::Latest, BlockTag::Number);
        self.child
            .block(tag)
            .await
            .map_err(rpc_err)?
            .map(BlockHeader::from)
            .ok_or_else(|| VerifierError::Rpc(format!("child chain block {:?} not found", tag)))
    }
}
