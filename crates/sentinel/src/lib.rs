//! Sentinel: validator state-transition core bridging a root chain and a child chain.
//!
//! - **Side-tx protocol** ([sidetx], [app]): every message gets a local [Verdict] checked
//!   against the external chains, the host aggregates verdicts, and [App::commit] applies the
//!   message only under a `yes` majority.
//! - **Checkpoints** ([checkpoint]): buffer, ack and no-ack lifecycle for batches of
//!   child-chain blocks submitted to the root chain, plus milestones for fast finality.
//! - **Staking** ([staking], [validator_set]): validator join, stake update, signer update
//!   and exit from root-chain events, plus weighted proposer rotation.
//! - **Top-ups** ([topup]): fee balances and the dividend accounts behind the checkpoint
//!   account root.
//! - **Spans** ([span]): deterministic producer selection for child-chain block ranges.
//!
//! State lives in a host-supplied [KvStore]; external chain access goes through the
//! [ChainVerifier] seam.

pub mod abi;
pub mod app;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod genesis;
pub mod keys;
pub mod merkle;
pub mod sequence;
pub mod sidetx;
pub mod span;
pub mod staking;
pub mod store;
pub mod topup;
pub mod validator;
pub mod validator_set;
pub mod verifier;

pub use app::App;
pub use checkpoint::{
    Checkpoint, CheckpointKeeper, Milestone, MsgCheckpoint, MsgCheckpointAck, MsgCheckpointNoAck,
    MsgMilestone, MsgMilestoneTimeout,
};
pub use config::{ChainParams, CheckpointParams, Params, SideTxParams, SpanParams};
pub use context::BlockContext;
pub use error::{ErrorKind, GenesisError, TxError};
pub use event::Event;
pub use genesis::GenesisState;
pub use sequence::{checked_sequence_id, sequence_id, SequenceGuard};
pub use sidetx::{Msg, MsgKind, TwoThirdsMajority, Verdict, Vote, VoteAggregator};
pub use span::{MsgProposeSpan, Span, SpanKeeper};
pub use staking::{MsgSignerUpdate, MsgStakeUpdate, MsgValidatorExit, MsgValidatorJoin, StakingKeeper};
pub use store::{KvStore, MemStore, Overlay, StoreError, StoreExt};
pub use topup::{DividendAccount, MsgTopup, MsgWithdrawFee, TopupKeeper};
pub use validator::{PubKey, Validator};
pub use validator_set::ValidatorSet;
pub use verifier::{BlockHeader, ChainVerifier, HeaderInfo, Log, Receipt, VerifierError};
