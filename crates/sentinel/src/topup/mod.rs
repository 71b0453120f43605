//! Fee top-ups and dividend accounts.
//!
//! Top-ups credit a per-address fee balance from root-chain `TopUpFee` events. A withdraw
//! moves balance into the address's dividend account; dividend accounts feed the account
//! root hash carried by every checkpoint.

pub mod handler;

use crate::error::TxError;
use crate::keys;
use crate::merkle::{keccak, pad32};
use crate::sequence::SequenceGuard;
use crate::store::{KvStore, StoreError, StoreExt};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

pub use handler::{MsgTopup, MsgWithdrawFee};

/// Accumulated withdrawn fees of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DividendAccount {
    pub user: Address,
    pub fee_amount: U256,
}

impl DividendAccount {
    pub fn new(user: Address, fee_amount: U256) -> Self {
        Self { user, fee_amount }
    }

    /// Merkle leaf: `keccak256(pad32(user) ‖ pad32(fee))`.
    pub fn leaf_hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&pad32(self.user.as_slice()));
        buf.extend_from_slice(&self.fee_amount.to_be_bytes::<32>());
        keccak(&buf)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TopupKeeper {
    sequences: SequenceGuard,
}

impl Default for TopupKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl TopupKeeper {
    pub fn new() -> Self {
        Self {
            sequences: SequenceGuard::topup(),
        }
    }

    pub fn sequences(&self) -> &SequenceGuard {
        &self.sequences
    }

    pub fn dividend_account(
        &self,
        store: &dyn KvStore,
        user: &Address,
    ) -> Result<Option<DividendAccount>, StoreError> {
        store.get_value(&keys::dividend_account_key(user))
    }

    pub fn set_dividend_account(
        &self,
        store: &mut dyn KvStore,
        account: &DividendAccount,
    ) -> Result<(), StoreError> {
        store.set_value(&keys::dividend_account_key(&account.user), account)
    }

    /// All dividend accounts, ordered by user address.
    pub fn dividend_accounts(&self, store: &dyn KvStore) -> Result<Vec<DividendAccount>, StoreError> {
        store
            .prefix_iter(keys::DIVIDEND_ACCOUNT_PREFIX)
            .into_iter()
            .map(|(k, v)| crate::store::decode(&k, &v))
            .collect()
    }

    pub fn add_fee_to_dividend_account(
        &self,
        store: &mut dyn KvStore,
        user: Address,
        fee: U256,
    ) -> Result<DividendAccount, TxError> {
        let mut account = self
            .dividend_account(store, &user)?
            .unwrap_or_else(|| DividendAccount::new(user, U256::ZERO));
        account.fee_amount = account.fee_amount.saturating_add(fee);
        self.set_dividend_account(store, &account)?;
        Ok(account)
    }

    pub fn fee_balance(&self, store: &dyn KvStore, user: &Address) -> Result<U256, StoreError> {
        Ok(store
            .get_value::<U256>(&keys::fee_balance_key(user))?
            .unwrap_or(U256::ZERO))
    }

    pub fn set_fee_balance(
        &self,
        store: &mut dyn KvStore,
        user: &Address,
        amount: U256,
    ) -> Result<(), StoreError> {
        let key = keys::fee_balance_key(user);
        if amount.is_zero() {
            store.delete(&key);
            Ok(())
        } else {
            store.set_value(&key, &amount)
        }
    }

    pub fn credit_fee(
        &self,
        store: &mut dyn KvStore,
        user: &Address,
        amount: U256,
    ) -> Result<U256, StoreError> {
        let balance = self.fee_balance(store, user)?.saturating_add(amount);
        self.set_fee_balance(store, user, balance)?;
        Ok(balance)
    }

    /// Move the whole fee balance of `from` onto `to`. Returns the moved amount.
    pub fn transfer_fee_balance(
        &self,
        store: &mut dyn KvStore,
        from: &Address,
        to: &Address,
    ) -> Result<U256, StoreError> {
        let amount = self.fee_balance(store, from)?;
        if amount.is_zero() {
            return Ok(amount);
        }
        let credited = self.fee_balance(store, to)?.saturating_add(amount);
        self.set_fee_balance(store, from, U256::ZERO)?;
        self.set_fee_balance(store, to, credited)?;
        Ok(amount)
    }

    /// Non-zero fee balances, ordered by address.
    pub fn fee_balances(&self, store: &dyn KvStore) -> Result<Vec<(Address, U256)>, StoreError> {
        let prefix = keys::FEE_BALANCE_PREFIX;
        store
            .prefix_iter(prefix)
            .into_iter()
            .map(|(k, v)| {
                let amount: U256 = crate::store::decode(&k, &v)?;
                Ok((Address::from_slice(&k[prefix.len()..]), amount))
            })
            .collect()
    }
}
