//! Example: Reading a tag list in as few commands as possible
//!
//! Run with: cargo run --example batch_read -- 192.168.1.250
//!
//! This example demonstrates:
//! - Connecting with a custom session configuration
//! - Reading a mixed batch of words, floats, strings and bits
//! - Inspecting per-address failures and the block reports
//! - Logging through a tracing subscriber (set RUST_LOG=fins_driver=debug)

use fins_driver::{Client, DataType, OptimizerConfig, SessionConfig};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

fn main() -> fins_driver::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // =========================================================================
    // Connect to PLC
    // =========================================================================

    let ip: IpAddr = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 250)));

    let config = SessionConfig::new(ip)
        .with_connect_timeout(Duration::from_secs(3))
        .with_receive_timeout(Duration::from_millis(500));
    let client = Client::new(config)?
        .with_optimizer(OptimizerConfig::default().with_min_efficiency(0.6))?;
    client.connect()?;

    if let Some(nodes) = client.session().negotiated_nodes() {
        println!(
            "Connected as node {} to node {}",
            nodes.local_node, nodes.remote_node
        );
    }

    // =========================================================================
    // Batch Read
    // =========================================================================

    let batch = client.read_batch([
        ("D0", DataType::Int16),
        ("D1", DataType::Int16),
        ("D2", DataType::UInt32),
        ("D10", DataType::Float32),
        ("D20", DataType::String(8)),
        ("CIO0.00", DataType::Bool),
        ("CIO0.05", DataType::Bool),
        ("W3.15", DataType::Bool),
        ("T0", DataType::Bool),
        ("TIM0", DataType::UInt16),
        ("D70000", DataType::Int16),
    ]);

    println!("\n=== Values ===\n");
    for (address, value) in &batch.values {
        match value {
            Ok(v) => println!("{address:>10} = {v:?}"),
            Err(e) => println!("{address:>10} ! {e}"),
        }
    }

    println!("\n=== Blocks ===\n");
    for block in &batch.blocks {
        println!(
            "{}{}+{} members={:?} status={}",
            block.area,
            block.start_word,
            block.length_words,
            block.members,
            block
                .error
                .as_ref()
                .map_or_else(|| "ok".to_string(), |e| e.to_string()),
        );
    }

    client.disconnect();
    Ok(())
}
