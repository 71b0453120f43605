//! Validator records.

use crate::error::TxError;
use crate::merkle::keccak;
use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Uncompressed secp256k1 public key length, `0x04 ‖ X ‖ Y`.
pub const PUBKEY_LENGTH: usize = 65;

/// One token in the staking contract's base unit.
pub const TOKEN_UNIT: u64 = 1_000_000_000_000_000_000;

/// Uncompressed secp256k1 public key of a validator signer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubKey(pub Bytes);

impl PubKey {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0.len() == PUBKEY_LENGTH && self.0[0] == 0x04
    }

    /// Key without the leading `0x04` tag, as the staking contract emits it.
    pub fn untagged(&self) -> &[u8] {
        if self.0.is_empty() {
            &[]
        } else {
            &self.0[1..]
        }
    }

    /// Ethereum-style address: last 20 bytes of `keccak256(X ‖ Y)`.
    pub fn address(&self) -> Address {
        let hash = keccak(self.untagged());
        Address::from_slice(&hash[12..])
    }
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// Convert a staked amount to voting power (whole tokens).
pub fn power_from_amount(amount: U256) -> Result<i64, TxError> {
    let power = amount / U256::from(TOKEN_UNIT);
    if power.is_zero() {
        return Err(TxError::InvalidAmount(amount));
    }
    i64::try_from(power).map_err(|_| TxError::InvalidAmount(amount))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: u64,
    pub start_epoch: u64,
    /// Zero while the validator has not started unbonding.
    pub end_epoch: u64,
    pub nonce: u64,
    pub voting_power: i64,
    pub pubkey: PubKey,
    pub signer: Address,
    /// Sequence id of the root-chain event that last touched this record.
    pub last_updated: String,
    pub jailed: bool,
    pub proposer_priority: i64,
}

impl Validator {
    pub fn new(
        id: u64,
        start_epoch: u64,
        end_epoch: u64,
        nonce: u64,
        voting_power: i64,
        pubkey: PubKey,
        signer: Address,
    ) -> Self {
        Self {
            id,
            start_epoch,
            end_epoch,
            nonce,
            voting_power,
            pubkey,
            signer,
            last_updated: String::new(),
            jailed: false,
            proposer_priority: 0,
        }
    }

    /// Whether the validator belongs in the set for the epoch after `ack_count` acks.
    pub fn is_current(&self, ack_count: u64) -> bool {
        let epoch = ack_count + 1;
        !self.jailed
            && self.start_epoch <= epoch
            && (self.end_epoch == 0 || self.end_epoch > epoch)
            && self.voting_power > 0
    }

    pub fn validate_basic(&self) -> Result<(), String> {
        if self.signer == Address::ZERO {
            return Err(format!("validator {} has an empty signer", self.id));
        }
        if self.voting_power < 0 {
            return Err(format!("validator {} has negative voting power", self.id));
        }
        Ok(())
    }

    /// Ordering for proposer selection: higher priority first, ties broken by the
    /// lower signer address.
    pub fn cmp_proposer_priority(&self, other: &Validator) -> Ordering {
        other
            .proposer_priority
            .cmp(&self.proposer_priority)
            .then_with(|| self.signer.cmp(&other.signer))
    }
}

impl fmt::Display for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Validator{{{} {} VP:{} A:{}}}",
            self.id, self.signer, self.voting_power, self.proposer_priority
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(start: u64, end: u64, power: i64) -> Validator {
        Validator::new(1, start, end, 0, power, PubKey::default(), Address::repeat_byte(1))
    }

    #[test]
    fn current_validator_window() {
        assert!(validator(0, 0, 10).is_current(0));
        assert!(validator(1, 0, 10).is_current(0));
        assert!(!validator(2, 0, 10).is_current(0));
        assert!(validator(0, 3, 10).is_current(1));
        assert!(!validator(0, 2, 10).is_current(1));
        assert!(!validator(0, 0, 0).is_current(0));

        let mut jailed = validator(0, 0, 10);
        jailed.jailed = true;
        assert!(!jailed.is_current(0));
    }

    #[test]
    fn power_is_whole_tokens() {
        let unit = U256::from(TOKEN_UNIT);
        assert_eq!(power_from_amount(unit * U256::from(10)).unwrap(), 10);
        assert_eq!(power_from_amount(unit * U256::from(3) / U256::from(2)).unwrap(), 1);
        assert!(matches!(
            power_from_amount(unit - U256::from(1)),
            Err(TxError::InvalidAmount(_))
        ));
    }

    #[test]
    fn priority_order_breaks_ties_by_address() {
        let mut a = validator(0, 0, 1);
        let mut b = validator(0, 0, 1);
        b.signer = Address::repeat_byte(2);
        assert_eq!(a.cmp_proposer_priority(&b), Ordering::Less);
        b.proposer_priority = 5;
        assert_eq!(a.cmp_proposer_priority(&b), Ordering::Greater);
        a.proposer_priority = 6;
        assert_eq!(a.cmp_proposer_priority(&b), Ordering::Less);
    }

    #[test]
    fn pubkey_address_skips_tag() {
        let mut raw = vec![0x04];
        raw.extend_from_slice(&[7u8; 64]);
        let pk = PubKey::new(raw);
        assert!(pk.is_valid());
        let hash = keccak(&[7u8; 64]);
        assert_eq!(pk.address(), Address::from_slice(&hash[12..]));
        assert!(!PubKey::new(vec![1, 2, 3]).is_valid());
    }
}
