//! Example: judge a checkpoint proposal against live nodes.
//!
//! Usage: cargo run -p rootchain --example verify_checkpoint -- --main-url URL --child-url URL
//!        --start N --end M --root 0x... [--proposer 0x...]

use alloy::primitives::{Address, B256};
use rootchain::{RpcConfig, RpcVerifier};
use sentinel::checkpoint::handler::verdict_checkpoint;
use sentinel::{MsgCheckpoint, Params};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = RpcConfig::from_env();
    let mut start = None;
    let mut end = None;
    let mut root = None;
    let mut proposer = Address::repeat_byte(0x01);
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).cloned().unwrap_or_default();
        match args[i].as_str() {
            "--main-url" => config.main_chain_url = value,
            "--child-url" => config.child_chain_url = value,
            "--start" => start = value.parse::<u64>().ok(),
            "--end" => end = value.parse::<u64>().ok(),
            "--root" => root = value.parse::<B256>().ok(),
            "--proposer" => proposer = value.parse()?,
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    let (Some(start), Some(end), Some(root)) = (start, end, root) else {
        eprintln!("Usage: verify_checkpoint --main-url URL --child-url URL --start N --end M --root 0xROOT");
        std::process::exit(1);
    };

    let params = Params::default();
    let verifier = RpcVerifier::new(&config)?;
    let msg = MsgCheckpoint {
        proposer,
        start_block: start,
        end_block: end,
        root_hash: root,
        account_root_hash: B256::ZERO,
        chain_id: params.chain.child_chain_id.clone(),
    };
    let verdict = verdict_checkpoint(&verifier, &params, &msg).await;
    println!("checkpoint {}..={} root={} verdict={}", start, end, root, verdict);
    Ok(())
}
