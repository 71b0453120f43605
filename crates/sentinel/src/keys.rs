//! Store key layout.
//!
//! Prefix bytes are shared with existing chain state and must not change.

use alloy::primitives::Address;

// checkpoint
pub const ACK_COUNT_KEY: &[u8] = &[0x11];
pub const BUFFER_CHECKPOINT_KEY: &[u8] = &[0x12];
pub const CHECKPOINT_PREFIX: &[u8] = &[0x13];
pub const LAST_NO_ACK_KEY: &[u8] = &[0x14];

// milestone
pub const MILESTONE_PREFIX: &[u8] = &[0x20];
pub const MILESTONE_COUNT_KEY: &[u8] = &[0x30];
pub const MILESTONE_NO_ACK_PREFIX: &[u8] = &[0x40];
pub const LAST_NO_ACK_MILESTONE_KEY: &[u8] = &[0x50];
pub const LAST_MILESTONE_TIMEOUT_KEY: &[u8] = &[0x60];
pub const MILESTONE_BLOCK_NUMBER_KEY: &[u8] = &[0x70];

// staking
pub const VALIDATORS_PREFIX: &[u8] = &[0x21];
pub const VALIDATOR_MAP_PREFIX: &[u8] = &[0x22];
pub const CURRENT_VALIDATOR_SET_KEY: &[u8] = &[0x23];
pub const STAKING_SEQUENCE_PREFIX: &[u8] = &[0x24];
pub const MILESTONE_VALIDATOR_SET_KEY: &[u8] = &[0x25];

// span
pub const LAST_SPAN_ID_KEY: &[u8] = &[0x35];
pub const SPAN_PREFIX: &[u8] = &[0x36];
pub const LAST_PROCESSED_ETH_BLOCK_KEY: &[u8] = &[0x38];

// topup
pub const TOPUP_SEQUENCE_PREFIX: &[u8] = &[0x81];
pub const DIVIDEND_ACCOUNT_PREFIX: &[u8] = &[0x82];
pub const FEE_BALANCE_PREFIX: &[u8] = &[0x83];

/// Marker value for presence-only records.
pub const DEFAULT_VALUE: &[u8] = &[0x01];

fn prefixed(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + suffix.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(suffix);
    key
}

/// Committed checkpoint `number`; the suffix is the decimal number.
pub fn checkpoint_key(number: u64) -> Vec<u8> {
    prefixed(CHECKPOINT_PREFIX, number.to_string().as_bytes())
}

pub fn milestone_key(number: u64) -> Vec<u8> {
    prefixed(MILESTONE_PREFIX, number.to_string().as_bytes())
}

pub fn milestone_no_ack_key(milestone_id: &str) -> Vec<u8> {
    prefixed(MILESTONE_NO_ACK_PREFIX, milestone_id.as_bytes())
}

pub fn validator_key(signer: &Address) -> Vec<u8> {
    prefixed(VALIDATORS_PREFIX, signer.as_slice())
}

pub fn validator_map_key(id: u64) -> Vec<u8> {
    prefixed(VALIDATOR_MAP_PREFIX, id.to_string().as_bytes())
}

pub fn span_key(id: u64) -> Vec<u8> {
    prefixed(SPAN_PREFIX, id.to_string().as_bytes())
}

pub fn dividend_account_key(user: &Address) -> Vec<u8> {
    prefixed(DIVIDEND_ACCOUNT_PREFIX, user.as_slice())
}

pub fn fee_balance_key(user: &Address) -> Vec<u8> {
    prefixed(FEE_BALANCE_PREFIX, user.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_key_uses_decimal_suffix() {
        assert_eq!(checkpoint_key(12), vec![0x13, b'1', b'2']);
    }

    #[test]
    fn validator_key_is_prefix_plus_address() {
        let addr = Address::repeat_byte(0xaa);
        let key = validator_key(&addr);
        assert_eq!(key[0], 0x21);
        assert_eq!(&key[1..], addr.as_slice());
    }

    #[test]
    fn prefixes_are_distinct() {
        let all = [
            ACK_COUNT_KEY,
            BUFFER_CHECKPOINT_KEY,
            CHECKPOINT_PREFIX,
            LAST_NO_ACK_KEY,
            MILESTONE_PREFIX,
            MILESTONE_COUNT_KEY,
            MILESTONE_NO_ACK_PREFIX,
            LAST_NO_ACK_MILESTONE_KEY,
            LAST_MILESTONE_TIMEOUT_KEY,
            MILESTONE_BLOCK_NUMBER_KEY,
            VALIDATORS_PREFIX,
            VALIDATOR_MAP_PREFIX,
            CURRENT_VALIDATOR_SET_KEY,
            STAKING_SEQUENCE_PREFIX,
            MILESTONE_VALIDATOR_SET_KEY,
            LAST_SPAN_ID_KEY,
            SPAN_PREFIX,
            LAST_PROCESSED_ETH_BLOCK_KEY,
            TOPUP_SEQUENCE_PREFIX,
            DIVIDEND_ACCOUNT_PREFIX,
            FEE_BALANCE_PREFIX,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
