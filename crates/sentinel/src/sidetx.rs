//! Side-transaction protocol types.
//!
//! Each message is first judged locally by every validator against the external chains
//! ([Verdict]), the host aggregates the signed verdicts into one result
//! ([VoteAggregator]), and only then is the message committed. [Msg] is the tagged union
//! the host delivers; [MsgKind] names the dispatch slot for each variant.

use crate::checkpoint::{
    MsgCheckpoint, MsgCheckpointAck, MsgCheckpointNoAck, MsgMilestone, MsgMilestoneTimeout,
};
use crate::config::Params;
use crate::error::TxError;
use crate::span::MsgProposeSpan;
use crate::staking::{MsgSignerUpdate, MsgStakeUpdate, MsgValidatorExit, MsgValidatorJoin};
use crate::topup::{MsgTopup, MsgWithdrawFee};
use crate::validator_set::ValidatorSet;
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A validator's local judgement of a side-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The external fact was confirmed.
    Yes,
    /// The message itself is malformed.
    No,
    /// The fact could not be confirmed: the adapter failed or the chain disagrees.
    Skip,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Yes => "yes",
            Verdict::No => "no",
            Verdict::Skip => "skip",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub signer: Address,
    pub verdict: Verdict,
}

impl Vote {
    pub fn new(signer: Address, verdict: Verdict) -> Self {
        Self { signer, verdict }
    }
}

/// Folds per-validator verdicts into the single result handed to commit.
pub trait VoteAggregator: Send + Sync {
    fn aggregate(&self, votes: &[Vote], validators: &ValidatorSet) -> Verdict;
}

/// Power-weighted two-thirds majority.
///
/// Each signer counts once (first vote wins) and only members of the set count. `Yes` or
/// `No` needs strictly more than two thirds of the total power; anything else is `Skip`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoThirdsMajority;

impl TwoThirdsMajority {
    /// Minimum power for a decisive result.
    pub fn threshold(total_power: i64) -> i64 {
        total_power * 2 / 3 + 1
    }
}

impl VoteAggregator for TwoThirdsMajority {
    fn aggregate(&self, votes: &[Vote], validators: &ValidatorSet) -> Verdict {
        let total = validators.total_voting_power();
        if total <= 0 {
            return Verdict::Skip;
        }

        let mut seen = BTreeSet::new();
        let (mut yes, mut no) = (0i64, 0i64);
        for vote in votes {
            if !seen.insert(vote.signer) {
                continue;
            }
            let Some(v) = validators.get_by_address(&vote.signer) else {
                tracing::debug!(signer = %vote.signer, "vote from non-member ignored");
                continue;
            };
            match vote.verdict {
                Verdict::Yes => yes += v.voting_power,
                Verdict::No => no += v.voting_power,
                Verdict::Skip => {}
            }
        }

        let threshold = Self::threshold(total);
        if yes >= threshold {
            Verdict::Yes
        } else if no >= threshold {
            Verdict::No
        } else {
            Verdict::Skip
        }
    }
}

/// Dispatch slot of a [Msg].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MsgKind {
    Checkpoint,
    CheckpointAck,
    CheckpointNoAck,
    Milestone,
    MilestoneTimeout,
    ValidatorJoin,
    StakeUpdate,
    SignerUpdate,
    ValidatorExit,
    Topup,
    WithdrawFee,
    ProposeSpan,
}

impl MsgKind {
    pub const ALL: [MsgKind; 12] = [
        MsgKind::Checkpoint,
        MsgKind::CheckpointAck,
        MsgKind::CheckpointNoAck,
        MsgKind::Milestone,
        MsgKind::MilestoneTimeout,
        MsgKind::ValidatorJoin,
        MsgKind::StakeUpdate,
        MsgKind::SignerUpdate,
        MsgKind::ValidatorExit,
        MsgKind::Topup,
        MsgKind::WithdrawFee,
        MsgKind::ProposeSpan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MsgKind::Checkpoint => "checkpoint",
            MsgKind::CheckpointAck => "checkpoint-ack",
            MsgKind::CheckpointNoAck => "checkpoint-no-ack",
            MsgKind::Milestone => "milestone",
            MsgKind::MilestoneTimeout => "milestone-timeout",
            MsgKind::ValidatorJoin => "validator-join",
            MsgKind::StakeUpdate => "stake-update",
            MsgKind::SignerUpdate => "signer-update",
            MsgKind::ValidatorExit => "validator-exit",
            MsgKind::Topup => "topup",
            MsgKind::WithdrawFee => "withdraw-fee",
            MsgKind::ProposeSpan => "propose-span",
        }
    }

    /// Whether the verdict depends on an external chain. Other kinds are decided from
    /// local state alone at commit time.
    pub fn is_side_tx(&self) -> bool {
        !matches!(
            self,
            MsgKind::CheckpointNoAck | MsgKind::MilestoneTimeout | MsgKind::WithdrawFee
        )
    }

    /// Whether the message is keyed by a root-chain event and replay guarded.
    pub fn is_replay_guarded(&self) -> bool {
        matches!(
            self,
            MsgKind::ValidatorJoin
                | MsgKind::StakeUpdate
                | MsgKind::SignerUpdate
                | MsgKind::ValidatorExit
                | MsgKind::Topup
        )
    }
}

impl fmt::Display for MsgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every message the state machine accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Msg {
    Checkpoint(MsgCheckpoint),
    CheckpointAck(MsgCheckpointAck),
    CheckpointNoAck(MsgCheckpointNoAck),
    Milestone(MsgMilestone),
    MilestoneTimeout(MsgMilestoneTimeout),
    ValidatorJoin(MsgValidatorJoin),
    StakeUpdate(MsgStakeUpdate),
    SignerUpdate(MsgSignerUpdate),
    ValidatorExit(MsgValidatorExit),
    Topup(MsgTopup),
    WithdrawFee(MsgWithdrawFee),
    ProposeSpan(MsgProposeSpan),
}

impl Msg {
    pub fn kind(&self) -> MsgKind {
        match self {
            Msg::Checkpoint(_) => MsgKind::Checkpoint,
            Msg::CheckpointAck(_) => MsgKind::CheckpointAck,
            Msg::CheckpointNoAck(_) => MsgKind::CheckpointNoAck,
            Msg::Milestone(_) => MsgKind::Milestone,
            Msg::MilestoneTimeout(_) => MsgKind::MilestoneTimeout,
            Msg::ValidatorJoin(_) => MsgKind::ValidatorJoin,
            Msg::StakeUpdate(_) => MsgKind::StakeUpdate,
            Msg::SignerUpdate(_) => MsgKind::SignerUpdate,
            Msg::ValidatorExit(_) => MsgKind::ValidatorExit,
            Msg::Topup(_) => MsgKind::Topup,
            Msg::WithdrawFee(_) => MsgKind::WithdrawFee,
            Msg::ProposeSpan(_) => MsgKind::ProposeSpan,
        }
    }

    /// Stateless checks run before the message is accepted into a block.
    pub fn validate_basic(&self, params: &Params) -> Result<(), TxError> {
        match self {
            Msg::Checkpoint(m) => m.validate_basic(&params.checkpoint),
            Msg::CheckpointAck(m) => m.validate_basic(),
            Msg::CheckpointNoAck(m) => m.validate_basic(),
            Msg::Milestone(m) => m.validate_basic(),
            Msg::MilestoneTimeout(m) => m.validate_basic(),
            Msg::ValidatorJoin(m) => m.validate_basic(),
            Msg::StakeUpdate(m) => m.validate_basic(),
            Msg::SignerUpdate(m) => m.validate_basic(),
            Msg::ValidatorExit(m) => m.validate_basic(),
            Msg::Topup(m) => m.validate_basic(),
            Msg::WithdrawFee(m) => m.validate_basic(),
            Msg::ProposeSpan(m) => m.validate_basic(),
        }
    }

    /// Replay sequence id for root-chain sourced messages. `None` for other kinds and
    /// for events whose log index is out of range.
    pub fn sequence(&self) -> Option<String> {
        match self {
            Msg::ValidatorJoin(m) => m.sequence().ok(),
            Msg::StakeUpdate(m) => m.sequence().ok(),
            Msg::SignerUpdate(m) => m.sequence().ok(),
            Msg::ValidatorExit(m) => m.sequence().ok(),
            Msg::Topup(m) => m.sequence().ok(),
            _ => None,
        }
    }
}

macro_rules! impl_from_msg {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Msg {
                fn from(m: $ty) -> Self {
                    Msg::$variant(m)
                }
            }
        )*
    };
}

impl_from_msg!(
    Checkpoint(MsgCheckpoint),
    CheckpointAck(MsgCheckpointAck),
    CheckpointNoAck(MsgCheckpointNoAck),
    Milestone(MsgMilestone),
    MilestoneTimeout(MsgMilestoneTimeout),
    ValidatorJoin(MsgValidatorJoin),
    StakeUpdate(MsgStakeUpdate),
    SignerUpdate(MsgSignerUpdate),
    ValidatorExit(MsgValidatorExit),
    Topup(MsgTopup),
    WithdrawFee(MsgWithdrawFee),
    ProposeSpan(MsgProposeSpan),
);
