//! Integration test: verdicts, vote aggregation and commit gating.

mod common;

use alloy::primitives::{Address, B256, U256};
use common::{app, ctx, receipt_with, snapshot, test_key, tokens};
use sentinel::abi::TopUpFee;
use sentinel::{
    ErrorKind, Msg, MsgCheckpointNoAck, MsgKind, MsgTopup, TxError, ValidatorSet, Verdict, Vote,
    VoteAggregator,
};
use std::time::Duration;

fn topup(user: Address, fee: U256) -> MsgTopup {
    MsgTopup {
        from: Address::repeat_byte(0xf0),
        user,
        fee,
        tx_hash: B256::repeat_byte(0x61),
        log_index: 4,
        block_number: 40,
    }
}

fn votes(verdicts: &[Verdict]) -> Vec<Vote> {
    verdicts
        .iter()
        .enumerate()
        .map(|(i, v)| Vote::new(test_key(i as u8 + 1).1, *v))
        .collect()
}

#[tokio::test]
async fn majority_yes_commits() {
    let (app, mut store) = app();
    let user = Address::repeat_byte(0x99);
    let msg = topup(user, tokens(1));
    app.verifier().add_receipt(receipt_with(
        B256::repeat_byte(0x61),
        40,
        &TopUpFee { user, fee: tokens(1) },
        4,
    ));

    let local = app.local_verdict(&store, &msg.clone().into()).await;
    assert_eq!(local, Verdict::Yes);

    // powers 10, 20, 30: validators 2 and 3 hold 50 of 60
    let result = app
        .aggregate(&store, &votes(&[Verdict::No, Verdict::Yes, Verdict::Yes]))
        .unwrap();
    assert_eq!(result, Verdict::Yes);

    let events = app
        .commit(&mut store, &ctx(1, 1), &msg.clone().into(), result)
        .unwrap();
    assert_eq!(events[0].get("sequence"), Some("4000004"));
    assert_eq!(app.topup().fee_balance(&store, &user).unwrap(), tokens(1));
}

#[tokio::test]
async fn minority_vote_leaves_store_unchanged() {
    let (app, mut store) = app();
    let msg: Msg = topup(Address::repeat_byte(0x99), tokens(1)).into();
    let before = snapshot(&store);

    for verdicts in [
        [Verdict::Yes, Verdict::Yes, Verdict::No],
        [Verdict::No, Verdict::No, Verdict::No],
        [Verdict::Skip, Verdict::Skip, Verdict::Skip],
    ] {
        let result = app.aggregate(&store, &votes(&verdicts)).unwrap();
        assert_ne!(result, Verdict::Yes);
        let err = app.commit(&mut store, &ctx(1, 1), &msg, result).unwrap_err();
        assert_eq!(err, TxError::MinorityVote(result));
        assert_eq!(err.kind(), ErrorKind::MinorityVote);
    }
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn commit_only_writes_on_success() {
    let (app, mut store) = app();
    let user = Address::repeat_byte(0x99);
    let msg: Msg = topup(user, tokens(2)).into();

    app.commit(&mut store, &ctx(1, 1), &msg, Verdict::Yes).unwrap();
    assert_eq!(app.topup().fee_balance(&store, &user).unwrap(), tokens(2));

    let before = snapshot(&store);
    let err = app.commit(&mut store, &ctx(2, 2), &msg, Verdict::Yes).unwrap_err();
    assert!(matches!(err, TxError::OldTx(_)));
    assert_eq!(snapshot(&store), before);
}

#[tokio::test]
async fn slow_adapter_yields_skip() {
    let (app, store) = app();
    let msg: Msg = topup(Address::repeat_byte(0x99), tokens(1)).into();
    app.verifier().set_delay(Duration::from_millis(500));
    assert_eq!(app.local_verdict(&store, &msg).await, Verdict::Skip);
}

#[tokio::test]
async fn malformed_and_local_messages() {
    let (app, store) = app();
    let zero_fee: Msg = topup(Address::repeat_byte(0x99), U256::ZERO).into();
    assert_eq!(app.local_verdict(&store, &zero_fee).await, Verdict::No);

    let no_ack: Msg = MsgCheckpointNoAck {
        from: Address::repeat_byte(0x01),
    }
    .into();
    assert!(!no_ack.kind().is_side_tx());
    assert_eq!(app.local_verdict(&store, &no_ack).await, Verdict::Yes);
}

#[test]
fn messages_use_tagged_json() {
    let msg: Msg = MsgCheckpointNoAck {
        from: Address::repeat_byte(0x01),
    }
    .into();
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "checkpoint-no-ack");
    let back: Msg = serde_json::from_value(json).unwrap();
    assert_eq!(back, msg);

    for kind in MsgKind::ALL {
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind.as_str()));
    }
    assert!(serde_json::from_str::<Msg>(r#"{"type":"mint","value":{}}"#).is_err());
}

struct Unanimous;

impl VoteAggregator for Unanimous {
    fn aggregate(&self, votes: &[Vote], validators: &ValidatorSet) -> Verdict {
        let all_yes = votes.iter().all(|v| v.verdict == Verdict::Yes);
        if all_yes && votes.len() == validators.len() {
            Verdict::Yes
        } else {
            Verdict::No
        }
    }
}

#[tokio::test]
async fn aggregator_is_pluggable() {
    let (app, store) = app();
    let app = app.with_aggregator(Unanimous);
    let result = app
        .aggregate(&store, &votes(&[Verdict::Yes, Verdict::Yes, Verdict::No]))
        .unwrap();
    assert_eq!(result, Verdict::No);
    let result = app
        .aggregate(&store, &votes(&[Verdict::Yes, Verdict::Yes, Verdict::Yes]))
        .unwrap();
    assert_eq!(result, Verdict::Yes);
}
