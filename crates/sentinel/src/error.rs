//! Commit and validation errors.

use crate::sidetx::Verdict;
use crate::store::StoreError;
use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

/// Coarse classification used by the host to decide what to do with a rejected message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed message; never retried automatically.
    Validation,
    /// Checkpoint or span out of sequence; the proposer must resubmit a corrected range.
    Continuity,
    /// Adapter error or fact mismatch detected at commit time.
    ExternalVerification,
    /// Root-chain event already applied; permanent.
    Replay,
    /// A checkpoint is buffered and not yet expired.
    BufferConflict,
    /// Aggregated side-tx result was not YES.
    MinorityVote,
    /// Store or state corruption.
    Internal,
}

/// Errors returned by commit functions and message validation.
///
/// [crate::App::commit] buffers handler writes and drops them on any of these, so a
/// rejected message leaves state unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TxError {
    #[error("invalid message: {0}")]
    InvalidMsg(String),

    #[error("side-tx result was {0}, commit requires yes")]
    MinorityVote(Verdict),

    #[error("older transaction already processed (sequence {0})")]
    OldTx(String),

    #[error("checkpoint already buffered, expires at {expires_at}")]
    BufferConflict { expires_at: u64 },

    #[error("checkpoint already exists: tip {tip}, start {start}")]
    OldCheckpoint { tip: u64, start: u64 },

    #[error("checkpoint not in continuity: tip {tip}, start {start}")]
    DiscontinuousCheckpoint { tip: u64, start: u64 },

    #[error("first checkpoint must start at block 0, got {0}")]
    FirstCheckpointStart(u64),

    #[error("account root hash mismatch: computed {computed}, message {claimed}")]
    AccountRootMismatch { computed: B256, claimed: B256 },

    #[error("account root hash unavailable: {0}")]
    AccountRoot(String),

    #[error("invalid proposer {got}, current proposer is {expected:?}")]
    InvalidProposer { expected: Option<Address>, got: Address },

    #[error("invalid ack: {0}")]
    BadAck(String),

    #[error("invalid no-ack: waiting for last checkpoint ack")]
    InvalidNoAck,

    #[error("too many no-acks")]
    TooManyNoAck,

    #[error("checkpoint {0} not found")]
    NoCheckpoint(u64),

    #[error("milestone covers {length} blocks, minimum {min}")]
    MilestoneTooShort { length: u64, min: u64 },

    #[error("milestone already exists: tip {tip}, start {start}")]
    OldMilestone { tip: u64, start: u64 },

    #[error("milestone not in continuity: tip {tip:?}, start {start}")]
    MilestoneNotContinuous { tip: Option<u64>, start: u64 },

    #[error("no milestone found")]
    NoMilestone,

    #[error("invalid milestone timeout: last milestone is too recent")]
    InvalidMilestoneTimeout,

    #[error("signer {signer} already belongs to validator {id}")]
    SignerInUse { signer: Address, id: u64 },

    #[error("validator {0} not found")]
    NoValidator(u64),

    #[error("validator with signer {0} not found")]
    NoValidatorForSigner(Address),

    #[error("validator {0} has already joined")]
    ValidatorAlreadyJoined(u64),

    #[error("signer update failed: {0}")]
    SignerUpdate(String),

    #[error("invalid stake amount {0}: must be at least one token")]
    InvalidAmount(U256),

    #[error("validator set update failed: {0}")]
    ValidatorSet(String),

    #[error("no fee balance to withdraw")]
    NoBalanceToWithdraw,

    #[error("insufficient fee balance: have {have}, need {need}")]
    InsufficientBalance { have: U256, need: U256 },

    #[error("span not in continuity: {0}")]
    SpanNotContinuous(String),

    #[error("span {0} not found")]
    SpanNotFound(u64),

    #[error("unable to freeze validator set: {0}")]
    FreezeSet(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxError::InvalidMsg(_)
            | TxError::InvalidProposer { .. }
            | TxError::InvalidNoAck
            | TxError::TooManyNoAck
            | TxError::InvalidAmount(_)
            | TxError::NoValidator(_)
            | TxError::NoValidatorForSigner(_)
            | TxError::ValidatorAlreadyJoined(_)
            | TxError::SignerInUse { .. }
            | TxError::MilestoneTooShort { .. }
            | TxError::InvalidMilestoneTimeout
            | TxError::SignerUpdate(_)
            | TxError::NoBalanceToWithdraw
            | TxError::InsufficientBalance { .. } => ErrorKind::Validation,
            TxError::OldCheckpoint { .. }
            | TxError::DiscontinuousCheckpoint { .. }
            | TxError::FirstCheckpointStart(_)
            | TxError::OldMilestone { .. }
            | TxError::MilestoneNotContinuous { .. }
            | TxError::SpanNotContinuous(_) => ErrorKind::Continuity,
            TxError::AccountRootMismatch { .. }
            | TxError::AccountRoot(_)
            | TxError::BadAck(_)
            | TxError::NoCheckpoint(_)
            | TxError::NoMilestone
            | TxError::SpanNotFound(_) => ErrorKind::ExternalVerification,
            TxError::OldTx(_) => ErrorKind::Replay,
            TxError::BufferConflict { .. } => ErrorKind::BufferConflict,
            TxError::MinorityVote(_) => ErrorKind::MinorityVote,
            TxError::ValidatorSet(_) | TxError::FreezeSet(_) | TxError::Store(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Stable numeric code, compatible with the legacy chain's ABCI codes.
    pub fn code(&self) -> u32 {
        match self {
            TxError::InvalidMsg(_) => 1400,
            TxError::OldTx(_) => 1401,
            TxError::InvalidProposer { .. } => 1500,
            TxError::FirstCheckpointStart(_) => 1501,
            TxError::BadAck(_) => 1502,
            TxError::BufferConflict { .. } => 1503,
            TxError::InvalidNoAck => 1505,
            TxError::TooManyNoAck => 1506,
            TxError::NoCheckpoint(_) => 1508,
            TxError::OldCheckpoint { .. } => 1509,
            TxError::DiscontinuousCheckpoint { .. } => 1510,
            TxError::MilestoneNotContinuous { .. } => 1511,
            TxError::MilestoneTooShort { .. } => 1512,
            TxError::NoMilestone => 1513,
            TxError::InvalidMilestoneTimeout => 1514,
            TxError::OldMilestone { .. } => 1515,
            TxError::NoValidator(_) | TxError::NoValidatorForSigner(_) => 2501,
            TxError::InvalidAmount(_) => 1400,
            TxError::ValidatorSet(_) => 2506,
            TxError::ValidatorAlreadyJoined(_) | TxError::SignerInUse { .. } => 2507,
            TxError::SignerUpdate(_) => 2508,
            TxError::NoBalanceToWithdraw => 3101,
            TxError::InsufficientBalance { .. } => 3102,
            TxError::SpanNotContinuous(_) => 3501,
            TxError::FreezeSet(_) => 3502,
            TxError::SpanNotFound(_) => 3503,
            TxError::AccountRootMismatch { .. } => 4504,
            TxError::AccountRoot(_) => 4505,
            TxError::MinorityVote(_) => 5502,
            TxError::Store(_) => 5600,
        }
    }

    /// Whether resubmitting the same message later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxError::BufferConflict { .. }
                | TxError::InvalidNoAck
                | TxError::TooManyNoAck
                | TxError::InvalidMilestoneTimeout
                | TxError::MinorityVote(_)
                | TxError::AccountRootMismatch { .. }
                | TxError::BadAck(_)
        )
    }
}

/// Fatal genesis errors. The host must stop startup when it sees one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenesisError {
    #[error("ack count {ack_count} does not match {checkpoints} genesis checkpoints")]
    AckCountMismatch { ack_count: u64, checkpoints: usize },

    #[error("genesis checkpoints not in continuity at index {0}")]
    Discontinuous(usize),

    #[error("genesis validator set: {0}")]
    ValidatorSet(String),

    #[error("genesis decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_is_permanent() {
        let e = TxError::OldTx("1000003".into());
        assert_eq!(e.kind(), ErrorKind::Replay);
        assert!(!e.is_retryable());
        assert_eq!(e.code(), 1401);
    }

    #[test]
    fn buffer_conflict_is_retryable() {
        let e = TxError::BufferConflict { expires_at: 1000 };
        assert_eq!(e.kind(), ErrorKind::BufferConflict);
        assert!(e.is_retryable());
        assert_eq!(e.to_string(), "checkpoint already buffered, expires at 1000");
    }

    #[test]
    fn continuity_codes() {
        assert_eq!(
            TxError::DiscontinuousCheckpoint { tip: 255, start: 10 }.kind(),
            ErrorKind::Continuity
        );
        assert_eq!(TxError::OldCheckpoint { tip: 255, start: 10 }.code(), 1509);
        assert_eq!(TxError::SpanNotContinuous("id".into()).code(), 3501);
    }

    #[test]
    fn minority_vote_kind() {
        let e = TxError::MinorityVote(Verdict::Skip);
        assert_eq!(e.kind(), ErrorKind::MinorityVote);
        assert_eq!(e.to_string(), "side-tx result was skip, commit requires yes");
    }
}
