//! JSON-RPC chain access for the sentinel core.
//!
//! [RpcVerifier] implements [sentinel::ChainVerifier] against a root-chain node and a
//! child-chain node over HTTP. See the `verify_checkpoint` demo for a standalone run.

pub mod config;
pub mod rpc;
pub mod verifier;

pub use config::{RetryConfig, RpcConfig};
pub use rpc::{BlockTag, RpcBlock, RpcClient, RpcError};
pub use verifier::{header_leaf, RpcVerifier};
