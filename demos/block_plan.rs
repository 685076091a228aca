//! Example: Planning read blocks offline
//!
//! Run with: cargo run --example block_plan
//!
//! No PLC needed. Shows how the efficiency threshold changes the number of
//! read commands for the same tag list, and the frame sent for each block.

use fins_driver::command::build_read_frame;
use fins_driver::{optimize, parse_batch, DataType, FinsHeader, NodeAddress, OptimizerConfig};

fn main() -> fins_driver::Result<()> {
    let parsed = parse_batch([
        ("D0", DataType::Int16),
        ("D1", DataType::Int16),
        ("D3", DataType::Int32),
        ("D8", DataType::Int16),
        ("D40", DataType::Float64),
        ("H10.00", DataType::Bool),
        ("H10.07", DataType::Bool),
        ("H11", DataType::UInt16),
        ("C5", DataType::Bool),
        ("C6", DataType::Bool),
        ("bogus", DataType::Int16),
    ]);

    for (address, e) in &parsed.failures {
        println!("skipped {address}: {e}");
    }

    for min_efficiency in [1.0, 0.8, 0.5, 0.1] {
        let config = OptimizerConfig::default().with_min_efficiency(min_efficiency);
        let blocks = optimize(&parsed.refs, &config);

        println!("\n=== min_efficiency {min_efficiency:.1}: {} blocks ===\n", blocks.len());
        for (sid, block) in blocks.iter().enumerate() {
            let header = FinsHeader::new_command(
                NodeAddress::new(0, 0x0A, 0),
                NodeAddress::new(0, 0x01, 0),
                sid as u8,
            );
            let frame = build_read_frame(block, header)?;
            println!(
                "{}{:<5} len={:<3} eff={:.2} members={:<2} frame={}",
                block.area(),
                block.start_word_offset(),
                block.total_length_words(),
                block.efficiency_ratio(),
                block.members().len(),
                hex::encode_upper(&frame),
            );
        }
    }

    Ok(())
}
