//! Events emitted by successful commits.

use serde::Serialize;

/// One emitted event: a kind plus ordered string attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    pub kind: &'static str,
    pub attributes: Vec<(&'static str, String)>,
}

impl Event {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            attributes: Vec::new(),
        }
    }

    pub fn attr(mut self, key: &'static str, value: impl ToString) -> Self {
        self.attributes.push((key, value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub const EVENT_CHECKPOINT: &str = "checkpoint";
pub const EVENT_CHECKPOINT_ACK: &str = "checkpoint-ack";
pub const EVENT_CHECKPOINT_NO_ACK: &str = "checkpoint-noack";
pub const EVENT_VALIDATOR_JOIN: &str = "validator-join";
pub const EVENT_STAKE_UPDATE: &str = "stake-update";
pub const EVENT_SIGNER_UPDATE: &str = "signer-update";
pub const EVENT_VALIDATOR_EXIT: &str = "validator-exit";
pub const EVENT_TOPUP: &str = "topup";
pub const EVENT_FEE_WITHDRAW: &str = "fee-withdraw";
pub const EVENT_PROPOSE_SPAN: &str = "propose-span";
pub const EVENT_MILESTONE: &str = "milestone";
pub const EVENT_MILESTONE_TIMEOUT: &str = "milestone-timeout";
