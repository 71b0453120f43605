use super::StakingKeeper;
use crate::checkpoint::CheckpointKeeper;
use crate::config::Params;
use crate::error::TxError;
use crate::event::{
    Event, EVENT_SIGNER_UPDATE, EVENT_STAKE_UPDATE, EVENT_VALIDATOR_EXIT, EVENT_VALIDATOR_JOIN,
};
use crate::sequence::{checked_sequence_id, require_log_index};
use crate::sidetx::Verdict;
use crate::store::KvStore;
use crate::topup::TopupKeeper;
use crate::validator::{power_from_amount, PubKey, Validator};
use crate::verifier::{ChainVerifier, Receipt};
use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgValidatorJoin {
    pub from: Address,
    pub id: u64,
    pub activation_epoch: u64,
    pub amount: U256,
    pub signer_pubkey: PubKey,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgStakeUpdate {
    pub from: Address,
    pub id: u64,
    pub new_amount: U256,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSignerUpdate {
    pub from: Address,
    pub id: u64,
    pub new_signer_pubkey: PubKey,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgValidatorExit {
    pub from: Address,
    pub id: u64,
    pub deactivation_epoch: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub nonce: u64,
}

fn require_from(from: &Address) -> Result<(), TxError> {
    if *from == Address::ZERO {
        return Err(TxError::InvalidMsg("empty from address".into()));
    }
    Ok(())
}

fn require_pubkey(pubkey: &PubKey) -> Result<(), TxError> {
    if !pubkey.is_valid() {
        return Err(TxError::InvalidMsg(format!("invalid signer pubkey {}", pubkey)));
    }
    Ok(())
}

impl MsgValidatorJoin {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        require_from(&self.from)?;
        require_log_index(self.log_index)?;
        require_pubkey(&self.signer_pubkey)
    }

    pub fn sequence(&self) -> Result<String, TxError> {
        checked_sequence_id(self.block_number, self.log_index)
    }
}

impl MsgStakeUpdate {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        require_from(&self.from)?;
        require_log_index(self.log_index)
    }

    pub fn sequence(&self) -> Result<String, TxError> {
        checked_sequence_id(self.block_number, self.log_index)
    }
}

impl MsgSignerUpdate {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        require_from(&self.from)?;
        require_log_index(self.log_index)?;
        require_pubkey(&self.new_signer_pubkey)
    }

    pub fn sequence(&self) -> Result<String, TxError> {
        checked_sequence_id(self.block_number, self.log_index)
    }
}

impl MsgValidatorExit {
    pub fn validate_basic(&self) -> Result<(), TxError> {
        require_from(&self.from)?;
        require_log_index(self.log_index)
    }

    pub fn sequence(&self) -> Result<String, TxError> {
        checked_sequence_id(self.block_number, self.log_index)
    }
}

async fn fetch_receipt(
    verifier: &dyn ChainVerifier,
    params: &Params,
    tx_hash: B256,
) -> Option<Receipt> {
    match verifier
        .confirmed_tx_receipt(tx_hash, params.chain.main_chain_tx_confirmations)
        .await
    {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!(tx = %tx_hash, reason = %e, "staking receipt unavailable");
            None
        }
    }
}

/// Collects field mismatches between a message and its root-chain event.
struct Matcher {
    kind: &'static str,
    ok: bool,
}

impl Matcher {
    fn new(kind: &'static str) -> Self {
        Self { kind, ok: true }
    }

    fn check<T: PartialEq + std::fmt::Debug>(&mut self, field: &str, msg: T, event: T) -> &mut Self {
        if self.ok && msg != event {
            tracing::error!(
                kind = self.kind,
                field,
                msg = ?msg,
                event = ?event,
                "message does not match root-chain event"
            );
            self.ok = false;
        }
        self
    }

    fn verdict(&self) -> Verdict {
        if self.ok {
            Verdict::Yes
        } else {
            Verdict::Skip
        }
    }
}

pub async fn verdict_validator_join(
    verifier: &dyn ChainVerifier,
    params: &Params,
    msg: &MsgValidatorJoin,
) -> Verdict {
    let Some(receipt) = fetch_receipt(verifier, params, msg.tx_hash).await else {
        return Verdict::Skip;
    };
    let event = match verifier.decode_validator_join(
        params.chain.staking_info_address,
        &receipt,
        msg.log_index,
    ) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(tx = %msg.tx_hash, reason = %e, "join event decode failed");
            return Verdict::Skip;
        }
    };
    if !msg.signer_pubkey.is_valid() {
        tracing::error!(pubkey = %msg.signer_pubkey, "pubkey must be uncompressed with 0x04 prefix");
        return Verdict::Skip;
    }

    Matcher::new("validator-join")
        .check("signer_pubkey", msg.signer_pubkey.untagged(), &event.signerPubkey[..])
        .check("signer", msg.signer_pubkey.address(), event.signer)
        .check("id", U256::from(msg.id), event.validatorId)
        .check("activation_epoch", U256::from(msg.activation_epoch), event.activationEpoch)
        .check("amount", msg.amount, event.amount)
        .check("block_number", msg.block_number, receipt.block_number)
        .check("nonce", U256::from(msg.nonce), event.nonce)
        .verdict()
}

pub async fn verdict_stake_update(
    verifier: &dyn ChainVerifier,
    params: &Params,
    msg: &MsgStakeUpdate,
) -> Verdict {
    let Some(receipt) = fetch_receipt(verifier, params, msg.tx_hash).await else {
        return Verdict::Skip;
    };
    let event = match verifier.decode_stake_update(
        params.chain.staking_info_address,
        &receipt,
        msg.log_index,
    ) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(tx = %msg.tx_hash, reason = %e, "stake update event decode failed");
            return Verdict::Skip;
        }
    };

    Matcher::new("stake-update")
        .check("block_number", msg.block_number, receipt.block_number)
        .check("id", U256::from(msg.id), event.validatorId)
        .check("new_amount", msg.new_amount, event.newAmount)
        .check("nonce", U256::from(msg.nonce), event.nonce)
        .verdict()
}

pub async fn verdict_signer_update(
    verifier: &dyn ChainVerifier,
    params: &Params,
    msg: &MsgSignerUpdate,
) -> Verdict {
    let Some(receipt) = fetch_receipt(verifier, params, msg.tx_hash).await else {
        return Verdict::Skip;
    };
    let event = match verifier.decode_signer_update(
        params.chain.staking_info_address,
        &receipt,
        msg.log_index,
    ) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(tx = %msg.tx_hash, reason = %e, "signer change event decode failed");
            return Verdict::Skip;
        }
    };
    if !msg.new_signer_pubkey.is_valid() {
        tracing::error!(pubkey = %msg.new_signer_pubkey, "pubkey must be uncompressed with 0x04 prefix");
        return Verdict::Skip;
    }

    Matcher::new("signer-update")
        .check("block_number", msg.block_number, receipt.block_number)
        .check("id", U256::from(msg.id), event.validatorId)
        .check("signer_pubkey", msg.new_signer_pubkey.untagged(), &event.signerPubkey[..])
        .check("new_signer", msg.new_signer_pubkey.address(), event.newSigner)
        .check("nonce", U256::from(msg.nonce), event.nonce)
        .verdict()
}

pub async fn verdict_validator_exit(
    verifier: &dyn ChainVerifier,
    params: &Params,
    msg: &MsgValidatorExit,
) -> Verdict {
    let Some(receipt) = fetch_receipt(verifier, params, msg.tx_hash).await else {
        return Verdict::Skip;
    };
    let event = match verifier.decode_validator_exit(
        params.chain.staking_info_address,
        &receipt,
        msg.log_index,
    ) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(tx = %msg.tx_hash, reason = %e, "unstake event decode failed");
            return Verdict::Skip;
        }
    };

    Matcher::new("validator-exit")
        .check("block_number", msg.block_number, receipt.block_number)
        .check("id", U256::from(msg.id), event.validatorId)
        .check("deactivation_epoch", U256::from(msg.deactivation_epoch), event.deactivationEpoch)
        .check("nonce", U256::from(msg.nonce), event.nonce)
        .verdict()
}

fn check_replay(staking: &StakingKeeper, store: &dyn KvStore, sequence: &str) -> Result<(), TxError> {
    if staking.sequences().has(store, sequence) {
        tracing::error!(sequence, "older staking event already processed");
        return Err(TxError::OldTx(sequence.to_string()));
    }
    Ok(())
}

pub fn commit_validator_join(
    staking: &StakingKeeper,
    store: &mut dyn KvStore,
    msg: &MsgValidatorJoin,
) -> Result<Vec<Event>, TxError> {
    let sequence = msg.sequence()?;
    check_replay(staking, store, &sequence)?;

    let signer = msg.signer_pubkey.address();
    if let Some(existing) = staking.validator(store, &signer)? {
        if existing.id == msg.id {
            return Err(TxError::ValidatorAlreadyJoined(msg.id));
        }
        tracing::error!(id = msg.id, owner = existing.id, signer = %signer, "signer already in use");
        return Err(TxError::SignerInUse {
            signer,
            id: existing.id,
        });
    }
    let power = power_from_amount(msg.amount)?;

    let mut validator = Validator::new(
        msg.id,
        msg.activation_epoch,
        0,
        msg.nonce,
        power,
        msg.signer_pubkey.clone(),
        signer,
    );
    validator.last_updated = sequence.clone();

    staking.add_validator(store, &validator)?;
    staking.sequences().set(store, &sequence);
    tracing::info!(id = msg.id, signer = %signer, power, "validator joined");

    Ok(vec![Event::new(EVENT_VALIDATOR_JOIN)
        .attr("validator-id", msg.id)
        .attr("signer", signer)
        .attr("nonce", msg.nonce)
        .attr("log-index", msg.log_index)])
}

pub fn commit_stake_update(
    staking: &StakingKeeper,
    store: &mut dyn KvStore,
    msg: &MsgStakeUpdate,
) -> Result<Vec<Event>, TxError> {
    let sequence = msg.sequence()?;
    check_replay(staking, store, &sequence)?;

    let mut validator = staking
        .validator_by_id(store, msg.id)?
        .ok_or(TxError::NoValidator(msg.id))?;
    let power = power_from_amount(msg.new_amount)?;

    validator.voting_power = power;
    validator.nonce = msg.nonce;
    validator.last_updated = sequence.clone();

    staking.add_validator(store, &validator)?;
    staking.sequences().set(store, &sequence);
    tracing::info!(id = msg.id, power, "validator stake updated");

    Ok(vec![Event::new(EVENT_STAKE_UPDATE)
        .attr("validator-id", msg.id)
        .attr("nonce", msg.nonce)])
}

pub fn commit_signer_update(
    staking: &StakingKeeper,
    checkpoint: &CheckpointKeeper,
    topup: &TopupKeeper,
    store: &mut dyn KvStore,
    msg: &MsgSignerUpdate,
) -> Result<Vec<Event>, TxError> {
    let sequence = msg.sequence()?;
    check_replay(staking, store, &sequence)?;

    let current = staking
        .validator_by_id(store, msg.id)?
        .ok_or(TxError::NoValidator(msg.id))?;
    let new_signer = msg.new_signer_pubkey.address();
    if new_signer == current.signer {
        tracing::error!(id = msg.id, signer = %new_signer, "no signer change");
        return Err(TxError::SignerUpdate(format!(
            "validator {} already uses signer {}",
            msg.id, new_signer
        )));
    }
    let ack_count = checkpoint.ack_count(store)?;

    let mut retired = current.clone();
    retired.end_epoch = ack_count;
    retired.voting_power = 0;
    retired.last_updated = sequence.clone();
    retired.nonce = msg.nonce;

    let mut rotated = current;
    rotated.signer = new_signer;
    rotated.pubkey = msg.new_signer_pubkey.clone();
    rotated.last_updated = sequence.clone();
    rotated.nonce = msg.nonce;

    let moved = topup.transfer_fee_balance(store, &retired.signer, &new_signer)?;
    staking.add_validator(store, &retired)?;
    staking.add_validator(store, &rotated)?;
    staking.sequences().set(store, &sequence);
    tracing::info!(
        id = msg.id,
        old = %retired.signer,
        new = %new_signer,
        fee_moved = %moved,
        "validator signer updated"
    );

    Ok(vec![Event::new(EVENT_SIGNER_UPDATE)
        .attr("validator-id", msg.id)
        .attr("old-signer", retired.signer)
        .attr("new-signer", new_signer)
        .attr("nonce", msg.nonce)])
}

pub fn commit_validator_exit(
    staking: &StakingKeeper,
    store: &mut dyn KvStore,
    msg: &MsgValidatorExit,
) -> Result<Vec<Event>, TxError> {
    let sequence = msg.sequence()?;
    check_replay(staking, store, &sequence)?;

    let mut validator = staking
        .validator_by_id(store, msg.id)?
        .ok_or(TxError::NoValidator(msg.id))?;
    validator.end_epoch = msg.deactivation_epoch;
    validator.nonce = msg.nonce;
    validator.last_updated = sequence.clone();

    staking.add_validator(store, &validator)?;
    staking.sequences().set(store, &sequence);
    tracing::info!(id = msg.id, end_epoch = msg.deactivation_epoch, "validator exit started");

    Ok(vec![Event::new(EVENT_VALIDATOR_EXIT)
        .attr("validator-id", msg.id)
        .attr("deactivation-epoch", msg.deactivation_epoch)
        .attr("nonce", msg.nonce)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::validator::TOKEN_UNIT;

    fn pubkey(fill: u8) -> PubKey {
        let mut raw = vec![0x04];
        raw.extend_from_slice(&[fill; 64]);
        PubKey::new(raw)
    }

    fn join(id: u64, fill: u8, block: u64, log: u64) -> MsgValidatorJoin {
        MsgValidatorJoin {
            from: Address::repeat_byte(0xf0),
            id,
            activation_epoch: 1,
            amount: U256::from(TOKEN_UNIT) * U256::from(50),
            signer_pubkey: pubkey(fill),
            tx_hash: B256::repeat_byte(0xee),
            log_index: log,
            block_number: block,
            nonce: 1,
        }
    }

    #[test]
    fn join_is_replay_protected() {
        let mut store = MemStore::new();
        let staking = StakingKeeper::new();
        let msg = join(7, 1, 10, 3);

        commit_validator_join(&staking, &mut store, &msg).unwrap();
        let before = store.clone();
        let err = commit_validator_join(&staking, &mut store, &msg).unwrap_err();
        assert_eq!(err, TxError::OldTx("1000003".into()));
        assert_eq!(store.len(), before.len());

        let v = staking.validator_by_id(&store, 7).unwrap().unwrap();
        assert_eq!(v.voting_power, 50);
        assert_eq!(v.last_updated, "1000003");
        assert_eq!(v.end_epoch, 0);
    }

    #[test]
    fn join_with_taken_signer_is_rejected() {
        let mut store = MemStore::new();
        let staking = StakingKeeper::new();
        commit_validator_join(&staking, &mut store, &join(7, 1, 10, 3)).unwrap();
        let before = store.clone();

        let err = commit_validator_join(&staking, &mut store, &join(8, 1, 11, 0)).unwrap_err();
        assert!(matches!(err, TxError::SignerInUse { id: 7, .. }));
        assert_eq!(store, before);
        assert_eq!(staking.validator_by_id(&store, 7).unwrap().unwrap().voting_power, 50);
        assert!(staking.validator_by_id(&store, 8).unwrap().is_none());
    }

    #[test]
    fn log_index_at_unit_is_rejected() {
        let mut store = MemStore::new();
        let staking = StakingKeeper::new();
        commit_validator_join(&staking, &mut store, &join(1, 1, 11, 0)).unwrap();
        let before = store.clone();

        let colliding = join(2, 2, 10, 100_000);
        assert!(matches!(colliding.validate_basic(), Err(TxError::InvalidMsg(_))));
        assert!(matches!(
            commit_validator_join(&staking, &mut store, &colliding).unwrap_err(),
            TxError::InvalidMsg(_)
        ));
        assert_eq!(store, before);

        let highest = join(2, 2, 10, 99_999);
        assert!(highest.validate_basic().is_ok());
        commit_validator_join(&staking, &mut store, &highest).unwrap();
    }

    #[test]
    fn join_below_one_token_is_rejected() {
        let mut store = MemStore::new();
        let staking = StakingKeeper::new();
        let mut msg = join(1, 1, 10, 0);
        msg.amount = U256::from(1);
        let err = commit_validator_join(&staking, &mut store, &msg).unwrap_err();
        assert!(matches!(err, TxError::InvalidAmount(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn stake_update_requires_validator() {
        let mut store = MemStore::new();
        let staking = StakingKeeper::new();
        let msg = MsgStakeUpdate {
            from: Address::repeat_byte(0xf0),
            id: 9,
            new_amount: U256::from(TOKEN_UNIT),
            tx_hash: B256::ZERO,
            log_index: 0,
            block_number: 1,
            nonce: 2,
        };
        assert_eq!(
            commit_stake_update(&staking, &mut store, &msg).unwrap_err(),
            TxError::NoValidator(9)
        );
    }

    #[test]
    fn exit_sets_end_epoch() {
        let mut store = MemStore::new();
        let staking = StakingKeeper::new();
        commit_validator_join(&staking, &mut store, &join(3, 1, 10, 0)).unwrap();
        let msg = MsgValidatorExit {
            from: Address::repeat_byte(0xf0),
            id: 3,
            deactivation_epoch: 12,
            tx_hash: B256::ZERO,
            log_index: 1,
            block_number: 11,
            nonce: 2,
        };
        commit_validator_exit(&staking, &mut store, &msg).unwrap();
        let v = staking.validator_by_id(&store, 3).unwrap().unwrap();
        assert_eq!((v.end_epoch, v.nonce, v.voting_power), (12, 2, 50));
    }

    #[test]
    fn validate_basic_checks_pubkey() {
        let mut msg = join(1, 1, 1, 0);
        assert!(msg.validate_basic().is_ok());
        msg.signer_pubkey = PubKey::new(vec![0x02; 33]);
        assert!(matches!(msg.validate_basic(), Err(TxError::InvalidMsg(_))));
    }
}
