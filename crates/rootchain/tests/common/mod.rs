//! Common helpers for integration tests.
#![allow(dead_code)]

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

type Handler = dyn Fn(&str, &Value) -> Result<Value, String> + Send + Sync;

/// Serve JSON-RPC over HTTP on a dynamic port with `handler` answering each call.
/// Returns the endpoint URL.
pub async fn spawn_stub<F>(handler: F) -> Result<String>
where
    F: Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind stub")?;
    let url = format!("http://{}", listener.local_addr()?);
    let handler: Arc<Handler> = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = serve(socket, handler).await {
                    tracing::debug!(reason = %e, "stub connection failed");
                }
            });
        }
    });
    Ok(url)
}

async fn serve(mut socket: TcpStream, handler: Arc<Handler>) -> Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before headers");
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let length: usize = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request: Value = serde_json::from_slice(&buf[header_end..])?;
    let method = request["method"].as_str().unwrap_or_default();
    let response = match handler(method, &request["params"]) {
        Ok(result) => json!({"jsonrpc": "2.0", "id": request["id"], "result": result}),
        Err(message) => json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": -32000, "message": message}
        }),
    };
    let body = serde_json::to_vec(&response)?;
    let head = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(&body).await?;
    socket.shutdown().await?;
    Ok(())
}

pub fn hex_quantity(n: u64) -> Value {
    Value::String(format!("0x{:x}", n))
}

pub fn hex_word(byte: u8) -> String {
    format!("0x{}", hex::encode([byte; 32]))
}

/// Block JSON as returned by `eth_getBlockByNumber`.
pub fn block_json(number: u64) -> Value {
    json!({
        "number": hex_quantity(number),
        "hash": hex_word(number as u8),
        "timestamp": hex_quantity(1_700_000_000 + number),
        "transactionsRoot": hex_word(0xaa),
        "receiptsRoot": hex_word(0xbb),
    })
}

pub fn block_param(params: &Value) -> Option<u64> {
    let s = params[0].as_str()?;
    u64::from_str_radix(s.strip_prefix("0x")?, 16).ok()
}

/// Spawn Anvil on a dynamic port and wait until ready.
pub async fn spawn_anvil() -> Result<(Child, String)> {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").context("bind for port")?;
        listener.local_addr()?.port()
    };
    let rpc_url = format!("http://127.0.0.1:{}", port);
    let mut cmd = Command::new("anvil");
    cmd.arg("--port").arg(port.to_string()).arg("--host").arg("127.0.0.1");
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let process = cmd.spawn().context("spawn anvil")?;
    wait_for_rpc(&rpc_url).await?;
    Ok((process, rpc_url))
}

async fn wait_for_rpc(url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    for _ in 0..30 {
        let ok = client
            .post(url)
            .json(&json!({"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}))
            .send()
            .await
            .is_ok();
        if ok {
            return Ok(());
        }
        sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("RPC not ready");
}

pub fn anvil_available() -> bool {
    Command::new("anvil")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
