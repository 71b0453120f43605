use super::TopupKeeper;
use crate::config::Params;
use crate::error::TxError;
use crate::event::{Event, EVENT_FEE_WITHDRAW, EVENT_TOPUP};
use crate::sequence::{checked_sequence_id, require_log_index};
use crate::sidetx::Verdict;
use crate::staking::StakingKeeper;
use crate::store::KvStore;
use crate::verifier::ChainVerifier;
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Fee top-up observed on the root chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTopup {
    pub from: Address,
    pub user: Address,
    pub fee: U256,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

impl MsgTopup {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.user == Address::ZERO {
            return Err(TxError::InvalidMsg("empty user".into()));
        }
        if self.fee.is_zero() {
            return Err(TxError::InvalidMsg("zero fee".into()));
        }
        require_log_index(self.log_index)
    }

    pub fn sequence(&self) -> Result<String, TxError> {
        checked_sequence_id(self.block_number, self.log_index)
    }
}

/// Move accumulated fees into the validator's dividend account. An `amount` of zero
/// withdraws the whole balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgWithdrawFee {
    pub validator: Address,
    pub amount: U256,
}

impl MsgWithdrawFee {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        if self.validator == Address::ZERO {
            return Err(TxError::InvalidMsg("empty validator address".into()));
        }
        Ok(())
    }
}

pub async fn verdict_topup(
    verifier: &dyn ChainVerifier,
    params: &Params,
    msg: &MsgTopup,
) -> Verdict {
    let receipt = match verifier
        .confirmed_tx_receipt(msg.tx_hash, params.chain.main_chain_tx_confirmations)
        .await
    {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(tx = %msg.tx_hash, reason = %e, "topup receipt unavailable");
            return Verdict::Skip;
        }
    };
    let event = match verifier.decode_topup(params.chain.staking_info_address, &receipt, msg.log_index) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(tx = %msg.tx_hash, reason = %e, "topup event decode failed");
            return Verdict::Skip;
        }
    };

    if receipt.block_number != msg.block_number {
        tracing::error!(
            msg_block = msg.block_number,
            receipt_block = receipt.block_number,
            "topup block number mismatch"
        );
        return Verdict::Skip;
    }
    if event.user != msg.user {
        tracing::error!(event = %event.user, msg = %msg.user, "topup user mismatch");
        return Verdict::Skip;
    }
    if event.fee != msg.fee {
        tracing::error!(event = %event.fee, msg = %msg.fee, "topup fee mismatch");
        return Verdict::Skip;
    }
    Verdict::Yes
}

pub fn commit_topup(
    topup: &TopupKeeper,
    store: &mut dyn KvStore,
    msg: &MsgTopup,
) -> Result<Vec<Event>, TxError> {
    let sequence = msg.sequence()?;
    if topup.sequences().has(store, &sequence) {
        tracing::error!(sequence, "older topup already processed");
        return Err(TxError::OldTx(sequence));
    }

    let balance = topup.credit_fee(store, &msg.user, msg.fee)?;
    topup.sequences().set(store, &sequence);
    tracing::debug!(user = %msg.user, fee = %msg.fee, balance = %balance, "fee topped up");

    Ok(vec![Event::new(EVENT_TOPUP)
        .attr("user", msg.user)
        .attr("fee", msg.fee)
        .attr("sequence", sequence)])
}

pub fn commit_withdraw_fee(
    topup: &TopupKeeper,
    staking: &StakingKeeper,
    store: &mut dyn KvStore,
    msg: &MsgWithdrawFee,
) -> Result<Vec<Event>, TxError> {
    let validator = staking
        .validator(store, &msg.validator)?
        .ok_or(TxError::NoValidatorForSigner(msg.validator))?;

    let balance = topup.fee_balance(store, &msg.validator)?;
    let amount = if msg.amount.is_zero() { balance } else { msg.amount };
    if amount.is_zero() {
        return Err(TxError::NoBalanceToWithdraw);
    }
    if amount > balance {
        return Err(TxError::InsufficientBalance {
            have: balance,
            need: amount,
        });
    }

    let account = topup.add_fee_to_dividend_account(store, msg.validator, amount)?;
    topup.set_fee_balance(store, &msg.validator, balance - amount)?;
    tracing::info!(
        validator = validator.id,
        signer = %msg.validator,
        amount = %amount,
        dividend = %account.fee_amount,
        "fee withdrawn to dividend account"
    );

    Ok(vec![Event::new(EVENT_FEE_WITHDRAW)
        .attr("validator-id", validator.id)
        .attr("signer", msg.validator)
        .attr("amount", amount)])
}
