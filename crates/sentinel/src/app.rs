//! Host-facing entry points.
//!
//! [App] wires the keepers to a [ChainVerifier] and exposes the four operations the
//! consensus host drives: [App::local_verdict] before consensus, [App::commit] after votes
//! are aggregated, [App::end_block] once per block, and genesis import/export.

use crate::checkpoint::{
    handler as checkpoint_handler, milestone as milestone_handler, CheckpointKeeper, MsgMilestone,
};
use crate::config::Params;
use crate::context::BlockContext;
use crate::error::{GenesisError, TxError};
use crate::event::Event;
use crate::genesis::{self, GenesisState};
use crate::sidetx::{Msg, TwoThirdsMajority, Verdict, Vote, VoteAggregator};
use crate::span::{handler as span_handler, SpanKeeper};
use crate::staking::{handler as staking_handler, StakingKeeper};
use crate::store::{KvStore, Overlay};
use crate::topup::{handler as topup_handler, TopupKeeper};
use crate::validator::Validator;
use crate::verifier::ChainVerifier;
use alloy::primitives::B256;
use std::time::Duration;

pub struct App<V: ChainVerifier> {
    verifier: V,
    params: Params,
    checkpoint: CheckpointKeeper,
    staking: StakingKeeper,
    topup: TopupKeeper,
    span: SpanKeeper,
    aggregator: Box<dyn VoteAggregator>,
}

impl<V: ChainVerifier> App<V> {
    pub fn new(verifier: V, params: Params) -> Self {
        Self {
            verifier,
            checkpoint: CheckpointKeeper::new(params.checkpoint.clone()),
            staking: StakingKeeper::new(),
            topup: TopupKeeper::new(),
            span: SpanKeeper::new(params.span.clone()),
            params,
            aggregator: Box::new(TwoThirdsMajority),
        }
    }

    /// Load `state` into `store` and build an app over its parameters.
    pub fn from_genesis(
        verifier: V,
        store: &mut dyn KvStore,
        state: &GenesisState,
    ) -> Result<Self, GenesisError> {
        genesis::init_genesis(store, state)?;
        Ok(Self::new(verifier, state.params.clone()))
    }

    pub fn with_aggregator(mut self, aggregator: impl VoteAggregator + 'static) -> Self {
        self.aggregator = Box::new(aggregator);
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    pub fn checkpoint(&self) -> &CheckpointKeeper {
        &self.checkpoint
    }

    pub fn staking(&self) -> &StakingKeeper {
        &self.staking
    }

    pub fn topup(&self) -> &TopupKeeper {
        &self.topup
    }

    pub fn span(&self) -> &SpanKeeper {
        &self.span
    }

    /// This validator's verdict on `msg`. Never fails: malformed messages get `No`;
    /// adapter errors, timeouts and facts the chain contradicts get `Skip`.
    pub async fn local_verdict(&self, store: &dyn KvStore, msg: &Msg) -> Verdict {
        let kind = msg.kind();
        if let Err(e) = msg.validate_basic(&self.params) {
            tracing::warn!(%kind, reason = %e, "malformed message");
            return Verdict::No;
        }
        if !kind.is_side_tx() {
            return Verdict::Yes;
        }

        let timeout = Duration::from_millis(self.params.side_tx.verdict_timeout_ms);
        match tokio::time::timeout(timeout, self.dispatch_verdict(store, msg)).await {
            Ok(verdict) => {
                tracing::debug!(%kind, %verdict, "local verdict");
                verdict
            }
            Err(_) => {
                tracing::warn!(%kind, timeout_ms = self.params.side_tx.verdict_timeout_ms, "verdict timed out");
                Verdict::Skip
            }
        }
    }

    async fn dispatch_verdict(&self, store: &dyn KvStore, msg: &Msg) -> Verdict {
        let verifier: &dyn ChainVerifier = &self.verifier;
        let params = &self.params;
        match msg {
            Msg::Checkpoint(m) => checkpoint_handler::verdict_checkpoint(verifier, params, m).await,
            Msg::CheckpointAck(m) => {
                checkpoint_handler::verdict_checkpoint_ack(verifier, params, m).await
            }
            Msg::ValidatorJoin(m) => {
                staking_handler::verdict_validator_join(verifier, params, m).await
            }
            Msg::StakeUpdate(m) => staking_handler::verdict_stake_update(verifier, params, m).await,
            Msg::SignerUpdate(m) => {
                staking_handler::verdict_signer_update(verifier, params, m).await
            }
            Msg::ValidatorExit(m) => {
                staking_handler::verdict_validator_exit(verifier, params, m).await
            }
            Msg::Topup(m) => topup_handler::verdict_topup(verifier, params, m).await,
            Msg::ProposeSpan(m) => {
                span_handler::verdict_propose_span(verifier, &self.span, store, m).await
            }
            Msg::Milestone(m) => {
                milestone_handler::verdict_milestone(verifier, &self.checkpoint, store, m).await
            }
            Msg::CheckpointNoAck(_) | Msg::MilestoneTimeout(_) | Msg::WithdrawFee(_) => {
                Verdict::Yes
            }
        }
    }

    /// Aggregate signed verdicts against the stored validator set.
    pub fn aggregate(&self, store: &dyn KvStore, votes: &[Vote]) -> Result<Verdict, TxError> {
        let set = self.staking.validator_set(store)?;
        Ok(self.aggregator.aggregate(votes, &set))
    }

    /// Apply `msg` under the aggregated `result`. Handler writes are buffered and only
    /// reach `store` when the handler succeeds, so an error leaves `store` unchanged.
    pub fn commit(
        &self,
        store: &mut dyn KvStore,
        ctx: &BlockContext,
        msg: &Msg,
        result: Verdict,
    ) -> Result<Vec<Event>, TxError> {
        let kind = msg.kind();
        if result != Verdict::Yes {
            tracing::debug!(%kind, %result, "skipping commit without yes majority");
            return Err(TxError::MinorityVote(result));
        }

        let (events, changes) = {
            let mut overlay = Overlay::new(&*store);
            let events = self.dispatch_commit(&mut overlay, ctx, msg);
            (events, overlay.into_changes())
        };
        match events {
            Ok(events) => {
                changes.apply(store);
                tracing::debug!(%kind, height = ctx.height, "committed");
                Ok(events)
            }
            Err(e) => {
                tracing::warn!(%kind, code = e.code(), reason = %e, "commit rejected");
                Err(e)
            }
        }
    }

    fn dispatch_commit(
        &self,
        store: &mut dyn KvStore,
        ctx: &BlockContext,
        msg: &Msg,
    ) -> Result<Vec<Event>, TxError> {
        let params = &self.params;
        match msg {
            Msg::Checkpoint(m) => checkpoint_handler::commit_checkpoint(
                &self.checkpoint,
                &self.staking,
                &self.topup,
                params,
                store,
                ctx,
                m,
            ),
            Msg::CheckpointAck(m) => {
                checkpoint_handler::commit_checkpoint_ack(&self.checkpoint, &self.staking, store, m)
            }
            Msg::CheckpointNoAck(m) => checkpoint_handler::commit_checkpoint_no_ack(
                &self.checkpoint,
                &self.staking,
                store,
                ctx,
                m,
            ),
            Msg::Milestone(m) => milestone_handler::commit_milestone(
                &self.checkpoint,
                &self.staking,
                params,
                store,
                ctx,
                m,
            ),
            Msg::MilestoneTimeout(m) => milestone_handler::commit_milestone_timeout(
                &self.checkpoint,
                &self.staking,
                store,
                ctx,
                m,
            ),
            Msg::ValidatorJoin(m) => staking_handler::commit_validator_join(&self.staking, store, m),
            Msg::StakeUpdate(m) => staking_handler::commit_stake_update(&self.staking, store, m),
            Msg::SignerUpdate(m) => staking_handler::commit_signer_update(
                &self.staking,
                &self.checkpoint,
                &self.topup,
                store,
                m,
            ),
            Msg::ValidatorExit(m) => staking_handler::commit_validator_exit(&self.staking, store, m),
            Msg::Topup(m) => topup_handler::commit_topup(&self.topup, store, m),
            Msg::WithdrawFee(m) => {
                topup_handler::commit_withdraw_fee(&self.topup, &self.staking, store, m)
            }
            Msg::ProposeSpan(m) => span_handler::commit_propose_span(
                &self.span,
                &self.staking,
                &self.checkpoint,
                params,
                store,
                m,
            ),
        }
    }

    /// Remember a milestone that failed to commit, either for lack of a yes majority or
    /// because [App::commit] rejected it.
    pub fn record_milestone_no_ack(&self, store: &mut dyn KvStore, msg: &MsgMilestone) {
        milestone_handler::record_milestone_no_ack(&self.checkpoint, store, msg);
    }

    /// End-of-block epoch step: fold validator changes into the set and rotate the
    /// proposer. Returns the applied validator updates.
    pub fn end_block(&self, store: &mut dyn KvStore) -> Result<Vec<Validator>, TxError> {
        let ack_count = self.checkpoint.ack_count(store)?;
        self.staking.apply_validator_updates(store, ack_count)
    }

    pub fn init_genesis(&self, store: &mut dyn KvStore, state: &GenesisState) -> Result<(), GenesisError> {
        if state.params != self.params {
            tracing::warn!("genesis params differ from the running params");
        }
        genesis::init_genesis(store, state)
    }

    pub fn export_genesis(&self, store: &dyn KvStore) -> Result<GenesisState, GenesisError> {
        genesis::export_genesis(store, &self.params)
    }

    /// Seed the next span proposal must carry.
    pub async fn next_span_seed(&self, store: &dyn KvStore) -> Option<B256> {
        match span_handler::next_span_seed(&self.verifier, &self.span, store).await {
            Ok(seed) => Some(seed),
            Err(reason) => {
                tracing::warn!(%reason, "next span seed unavailable");
                None
            }
        }
    }
}
