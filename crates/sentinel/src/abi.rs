//! StakingInfo event ABI and decoding from confirmed receipts.
//!
//! Events are located by `(contract address, log index)` inside a receipt and decoded
//! with the `sol!` generated types.

use crate::verifier::{Log, Receipt, VerifierError};
use alloy::primitives::Address;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    /// Validator joined with a fresh stake.
    #[derive(Debug, PartialEq, Eq)]
    event Staked(
        address indexed signer,
        uint256 indexed validatorId,
        uint256 nonce,
        uint256 indexed activationEpoch,
        uint256 amount,
        uint256 total,
        bytes signerPubkey
    );

    /// Validator stake changed.
    #[derive(Debug, PartialEq, Eq)]
    event StakeUpdate(
        uint256 indexed validatorId,
        uint256 indexed nonce,
        uint256 indexed newAmount
    );

    /// Validator rotated its signer key.
    #[derive(Debug, PartialEq, Eq)]
    event SignerChange(
        uint256 indexed validatorId,
        uint256 nonce,
        address indexed oldSigner,
        address indexed newSigner,
        bytes signerPubkey
    );

    /// Validator started unbonding.
    #[derive(Debug, PartialEq, Eq)]
    event UnstakeInit(
        address indexed user,
        uint256 indexed validatorId,
        uint256 nonce,
        uint256 deactivationEpoch,
        uint256 indexed amount
    );

    /// Fee top-up for a user.
    #[derive(Debug, PartialEq, Eq)]
    event TopUpFee(address indexed user, uint256 indexed fee);
}

/// Find the log at `log_index` emitted by `contract` and decode it as `E`.
pub fn decode_event<E: SolEvent>(
    contract: Address,
    receipt: &Receipt,
    log_index: u64,
) -> Result<E, VerifierError> {
    let log = receipt
        .logs
        .iter()
        .find(|l| l.log_index == log_index && l.address == contract)
        .ok_or(VerifierError::EventNotFound(log_index))?;
    E::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| VerifierError::Decode(format!("{}: {}", E::SIGNATURE, e)))
}

/// Encode `event` as a log of `contract` at `log_index` (fixtures and mocks).
pub fn encode_log<E: SolEvent>(event: &E, contract: Address, log_index: u64) -> Log {
    let data = event.encode_log_data();
    Log {
        address: contract,
        topics: data.topics().to_vec(),
        data: data.data.to_vec(),
        log_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{B256, U256};

    fn receipt_with(logs: Vec<Log>) -> Receipt {
        Receipt {
            tx_hash: B256::repeat_byte(1),
            block_number: 10,
            logs,
        }
    }

    #[test]
    fn staked_roundtrip_through_log() {
        let contract = Address::repeat_byte(0x55);
        let ev = Staked {
            signer: Address::repeat_byte(0x11),
            validatorId: U256::from(7),
            nonce: U256::from(1),
            activationEpoch: U256::from(3),
            amount: U256::from(10u64).pow(U256::from(19)),
            total: U256::ZERO,
            signerPubkey: vec![4u8; 64].into(),
        };
        let receipt = receipt_with(vec![encode_log(&ev, contract, 3)]);
        let got: Staked = decode_event(contract, &receipt, 3).unwrap();
        assert_eq!(got, ev);
    }

    #[test]
    fn wrong_index_or_contract_is_not_found() {
        let contract = Address::repeat_byte(0x55);
        let ev = TopUpFee {
            user: Address::repeat_byte(0x22),
            fee: U256::from(5),
        };
        let receipt = receipt_with(vec![encode_log(&ev, contract, 0)]);
        let err = decode_event::<TopUpFee>(contract, &receipt, 1).unwrap_err();
        assert_eq!(err, VerifierError::EventNotFound(1));
        let err = decode_event::<TopUpFee>(Address::ZERO, &receipt, 0).unwrap_err();
        assert_eq!(err, VerifierError::EventNotFound(0));
    }

    #[test]
    fn mismatched_event_type_fails_to_decode() {
        let contract = Address::repeat_byte(0x55);
        let ev = TopUpFee {
            user: Address::repeat_byte(0x22),
            fee: U256::from(5),
        };
        let receipt = receipt_with(vec![encode_log(&ev, contract, 0)]);
        let err = decode_event::<StakeUpdate>(contract, &receipt, 0).unwrap_err();
        assert!(matches!(err, VerifierError::Decode(_)));
    }
}
