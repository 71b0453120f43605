//! Common helpers for integration tests.
#![allow(dead_code)]

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sentinel::abi::encode_log;
use sentinel::genesis::GenesisState;
use sentinel::topup::DividendAccount;
use sentinel::validator::TOKEN_UNIT;
use sentinel::{
    App, BlockContext, BlockHeader, ChainVerifier, HeaderInfo, MemStore, Params, PubKey,
    Receipt, Validator, VerifierError,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const STAKING_INFO: Address = Address::repeat_byte(0x5a);
pub const ROOT_CHAIN: Address = Address::repeat_byte(0x7c);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory root chain and child chain.
#[derive(Default)]
pub struct MockVerifier {
    receipts: Mutex<HashMap<B256, Receipt>>,
    roots: Mutex<HashMap<(u64, u64), B256>>,
    headers: Mutex<HashMap<u64, HeaderInfo>>,
    main_blocks: Mutex<HashMap<u64, BlockHeader>>,
    child_blocks: Mutex<HashMap<u64, BlockHeader>>,
    child_tip: Mutex<Option<u64>>,
    delay: Mutex<Option<Duration>>,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_receipt(&self, receipt: Receipt) {
        self.receipts.lock().unwrap().insert(receipt.tx_hash, receipt);
    }

    pub fn set_root(&self, start: u64, end: u64, root: B256) {
        self.roots.lock().unwrap().insert((start, end), root);
    }

    pub fn set_header(&self, number: u64, header: HeaderInfo) {
        self.headers.lock().unwrap().insert(number, header);
    }

    pub fn set_main_block(&self, number: u64, hash: B256) {
        self.main_blocks.lock().unwrap().insert(
            number,
            BlockHeader {
                number,
                hash,
                timestamp: number * 12,
            },
        );
    }

    /// Move the child-chain tip to `number`; blocks up to the tip get a hash derived from
    /// their number unless one was set with [MockVerifier::set_child_hash].
    pub fn set_child_block(&self, number: u64) {
        *self.child_tip.lock().unwrap() = Some(number);
    }

    pub fn set_child_hash(&self, number: u64, hash: B256) {
        self.child_blocks.lock().unwrap().insert(
            number,
            BlockHeader {
                number,
                hash,
                timestamp: number * 2,
            },
        );
    }

    pub fn child_hash(number: u64) -> B256 {
        B256::left_padding_from(&number.to_be_bytes())
    }

    /// Delay every adapter call; used to exercise verdict timeouts.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    async fn wait(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ChainVerifier for MockVerifier {
    async fn confirmed_tx_receipt(
        &self,
        tx_hash: B256,
        _confirmations: u64,
    ) -> Result<Receipt, VerifierError> {
        self.wait().await;
        self.receipts
            .lock()
            .unwrap()
            .get(&tx_hash)
            .cloned()
            .ok_or(VerifierError::TxNotFound(tx_hash))
    }

    async fn root_hash(&self, start: u64, end: u64, max_length: u64) -> Result<B256, VerifierError> {
        self.wait().await;
        if end + 1 - start > max_length {
            return Err(VerifierError::InvalidRequest("range too long".into()));
        }
        self.roots
            .lock()
            .unwrap()
            .get(&(start, end))
            .copied()
            .ok_or_else(|| VerifierError::Rpc(format!("no headers for {}..={}", start, end)))
    }

    async fn header_info(
        &self,
        number: u64,
        _root_chain: Address,
        _child_block_interval: u64,
    ) -> Result<HeaderInfo, VerifierError> {
        self.wait().await;
        self.headers
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| VerifierError::Rpc(format!("no header {}", number)))
    }

    async fn main_chain_block(&self, number: Option<u64>) -> Result<BlockHeader, VerifierError> {
        self.wait().await;
        let blocks = self.main_blocks.lock().unwrap();
        let found = match number {
            Some(n) => blocks.get(&n).cloned(),
            None => blocks.values().max_by_key(|b| b.number).cloned(),
        };
        found.ok_or_else(|| VerifierError::Rpc("block not found".into()))
    }

    async fn child_chain_block(&self, number: Option<u64>) -> Result<BlockHeader, VerifierError> {
        self.wait().await;
        let tip = (*self.child_tip.lock().unwrap())
            .ok_or_else(|| VerifierError::Rpc("child chain unavailable".into()))?;
        let number = number.unwrap_or(tip);
        if number > tip {
            return Err(VerifierError::Rpc(format!("child block {} not found", number)));
        }
        let stored = self.child_blocks.lock().unwrap().get(&number).cloned();
        Ok(stored.unwrap_or(BlockHeader {
            number,
            hash: Self::child_hash(number),
            timestamp: number * 2,
        }))
    }
}

/// Deterministic secp256k1 key `n` as an uncompressed public key and its signer address.
pub fn test_key(n: u8) -> (PubKey, Address) {
    let signing = SigningKey::from_slice(&[n; 32]).expect("valid scalar");
    let point = signing.verifying_key().as_affine().to_encoded_point(false);
    let pubkey = PubKey::new(point.as_bytes().to_vec());
    let address = pubkey.address();
    (pubkey, address)
}

pub fn tokens(n: u64) -> U256 {
    U256::from(n) * U256::from(TOKEN_UNIT)
}

pub fn validator(id: u64, key: u8, power: i64) -> Validator {
    let (pubkey, signer) = test_key(key);
    Validator::new(id, 0, 0, 0, power, pubkey, signer)
}

pub fn params() -> Params {
    let mut params = Params::default();
    params.chain.staking_info_address = STAKING_INFO;
    params.chain.root_chain_address = ROOT_CHAIN;
    params.side_tx.verdict_timeout_ms = 200;
    params
}

/// Genesis with `validators` and a zero dividend account for each of them.
pub fn genesis(validators: Vec<Validator>) -> GenesisState {
    let mut state = GenesisState {
        params: params(),
        ..Default::default()
    };
    state.topup.dividend_accounts = validators
        .iter()
        .map(|v| DividendAccount::new(v.signer, U256::ZERO))
        .collect();
    state.staking.validators = validators;
    state
}

pub fn app_with(state: &GenesisState) -> (App<MockVerifier>, MemStore) {
    init_tracing();
    let mut store = MemStore::new();
    let app = App::from_genesis(MockVerifier::new(), &mut store, state).expect("genesis");
    (app, store)
}

/// App over three validators with keys 1..=3 and powers 10, 20, 30.
pub fn app() -> (App<MockVerifier>, MemStore) {
    app_with(&genesis(vec![
        validator(1, 1, 10),
        validator(2, 2, 20),
        validator(3, 3, 30),
    ]))
}

pub fn ctx(height: u64, time: u64) -> BlockContext {
    BlockContext::new(height, time)
}

/// Receipt carrying `event` from the staking info contract at `log_index`.
pub fn receipt_with<E: SolEvent>(tx_hash: B256, block_number: u64, event: &E, log_index: u64) -> Receipt {
    Receipt {
        tx_hash,
        block_number,
        logs: vec![encode_log(event, STAKING_INFO, log_index)],
    }
}

/// Every entry in the store, for before/after comparisons.
pub fn snapshot(store: &MemStore) -> Vec<(Vec<u8>, Vec<u8>)> {
    use sentinel::KvStore;
    store.prefix_iter(&[])
}
