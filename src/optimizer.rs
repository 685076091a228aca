//! Read-block optimizer.
//!
//! Coalesces scattered [`AddressRef`]s into the fewest contiguous
//! [`AddressBlock`]s that each fit one request, reading unrequested padding
//! words only while the block stays dense enough.
//!
//! Per memory area:
//!
//! 1. Bit addresses are grouped by word: one block of length 1 per distinct
//!    word, members ordered by bit.
//! 2. Word addresses are stably sorted by offset and swept once. A candidate
//!    joins the open block if the merged span stays within
//!    `max_block_words` and `(Σ member lengths + candidate length) / span`
//!    is at least `min_efficiency`; otherwise the open block is closed and
//!    the candidate opens a new one.
//!
//! # Example
//!
//! ```
//! use fins_driver::{optimize, parse_address, DataType, OptimizerConfig};
//!
//! let refs: Vec<_> = ["D0", "D1", "D2"]
//!     .iter()
//!     .map(|a| parse_address(a, DataType::Int16))
//!     .collect::<Result<_, _>>()?;
//!
//! let blocks = optimize(&refs, &OptimizerConfig::default());
//! assert_eq!(blocks.len(), 1);
//! assert_eq!(blocks[0].start_word_offset(), 0);
//! assert_eq!(blocks[0].total_length_words(), 3);
//! assert_eq!(blocks[0].efficiency_ratio(), 1.0);
//! # Ok::<(), fins_driver::FinsError>(())
//! ```

use std::collections::BTreeMap;

use tracing::debug;

use crate::address::{AddressRef, MemorySpan};
use crate::command::MAX_WORDS_PER_COMMAND;
use crate::error::{FinsError, Result};
use crate::memory::MemoryArea;

/// Default minimum share of requested words in a read block.
pub const DEFAULT_MIN_EFFICIENCY: f64 = 0.8;

/// Default maximum words per read block.
pub const DEFAULT_MAX_BLOCK_WORDS: u16 = 180;

/// Tuning for [`optimize`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OptimizerConfig {
    /// Minimum `(requested words / block words)` a merged block must keep.
    pub min_efficiency: f64,
    /// Largest span a merged block may cover.
    pub max_block_words: u16,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            min_efficiency: DEFAULT_MIN_EFFICIENCY,
            max_block_words: DEFAULT_MAX_BLOCK_WORDS,
        }
    }
}

impl OptimizerConfig {
    /// Sets the efficiency floor.
    pub fn with_min_efficiency(mut self, min_efficiency: f64) -> Self {
        self.min_efficiency = min_efficiency;
        self
    }

    /// Sets the block size cap.
    pub fn with_max_block_words(mut self, max_block_words: u16) -> Self {
        self.max_block_words = max_block_words;
        self
    }

    /// Checks that both settings are usable.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` if `min_efficiency` is outside
    /// `(0, 1]` or `max_block_words` is outside `1..=999`.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_efficiency > 0.0 && self.min_efficiency <= 1.0) {
            return Err(FinsError::invalid_parameter(
                "min_efficiency",
                format!("must be in (0, 1], got {}", self.min_efficiency),
            ));
        }
        if self.max_block_words == 0 || self.max_block_words > MAX_WORDS_PER_COMMAND {
            return Err(FinsError::invalid_parameter(
                "max_block_words",
                format!("must be 1-{MAX_WORDS_PER_COMMAND}"),
            ));
        }
        Ok(())
    }
}

/// A contiguous window of device memory read or written in one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressBlock {
    area: MemoryArea,
    start_word_offset: u16,
    total_length_words: u16,
    members: Vec<AddressRef>,
    efficiency_ratio: f64,
}

impl AddressBlock {
    fn open(first: AddressRef) -> Self {
        Self {
            area: first.area(),
            start_word_offset: first.word_offset(),
            total_length_words: first.length_words(),
            members: vec![first],
            efficiency_ratio: 1.0,
        }
    }

    fn end(&self) -> u32 {
        u32::from(self.start_word_offset) + u32::from(self.total_length_words)
    }

    fn requested_words(&self) -> u32 {
        self.members.iter().map(|m| u32::from(m.length_words())).sum()
    }

    fn absorb(&mut self, addr: AddressRef, start: u16, length: u16) {
        self.start_word_offset = start;
        self.total_length_words = length;
        self.members.push(addr);
    }

    fn close(mut self) -> Self {
        let ratio = f64::from(self.requested_words()) / f64::from(self.total_length_words);
        // duplicates and overlaps can push the raw sum above the span
        self.efficiency_ratio = ratio.min(1.0);
        self
    }

    /// Memory area of every member.
    pub fn area(&self) -> MemoryArea {
        self.area
    }

    /// First word covered.
    pub fn start_word_offset(&self) -> u16 {
        self.start_word_offset
    }

    /// Words covered.
    pub fn total_length_words(&self) -> u16 {
        self.total_length_words
    }

    /// Members in insertion order.
    pub fn members(&self) -> &[AddressRef] {
        &self.members
    }

    /// Requested words over covered words, in `(0, 1]`.
    pub fn efficiency_ratio(&self) -> f64 {
        self.efficiency_ratio
    }

    /// Whether every member is a bit address (the block then covers one word).
    pub fn is_bit_block(&self) -> bool {
        self.members.iter().all(AddressRef::is_bit)
    }

    /// Word distance of `member` from the block start.
    pub fn relative_offset(&self, member: &AddressRef) -> usize {
        usize::from(member.word_offset().saturating_sub(self.start_word_offset))
    }
}

impl MemorySpan for AddressBlock {
    fn area(&self) -> MemoryArea {
        self.area
    }

    fn start_word(&self) -> u16 {
        self.start_word_offset
    }

    // bit-only blocks fetch their whole word
    fn access_bit(&self) -> Option<u8> {
        None
    }

    fn length_words(&self) -> u16 {
        self.total_length_words
    }
}

/// Splits addresses by area, then into (bit, word) lists, keeping input order.
fn partition(addresses: &[AddressRef]) -> BTreeMap<MemoryArea, (Vec<AddressRef>, Vec<AddressRef>)> {
    let mut areas: BTreeMap<MemoryArea, (Vec<AddressRef>, Vec<AddressRef>)> = BTreeMap::new();
    for addr in addresses {
        let (bits, words) = areas.entry(addr.area()).or_default();
        if addr.is_bit() {
            bits.push(addr.clone());
        } else {
            words.push(addr.clone());
        }
    }
    areas
}

fn bit_blocks(bits: Vec<AddressRef>, out: &mut Vec<AddressBlock>) {
    let mut by_word: BTreeMap<u16, Vec<AddressRef>> = BTreeMap::new();
    for bit in bits {
        by_word.entry(bit.word_offset()).or_default().push(bit);
    }
    for (_, mut members) in by_word {
        members.sort_by_key(|m| m.bit_offset());
        let mut iter = members.into_iter();
        if let Some(first) = iter.next() {
            let mut block = AddressBlock::open(first);
            block.members.extend(iter);
            out.push(block.close());
        }
    }
}

fn word_blocks(mut words: Vec<AddressRef>, config: &OptimizerConfig, out: &mut Vec<AddressBlock>) {
    words.sort_by_key(AddressRef::word_offset);

    let mut open: Option<AddressBlock> = None;
    for addr in words {
        let Some(mut block) = open.take() else {
            open = Some(AddressBlock::open(addr));
            continue;
        };

        let new_start = block.start_word_offset.min(addr.word_offset());
        let new_end = block.end().max(addr.end_word());
        let new_length = new_end - u32::from(new_start);

        if new_length > u32::from(config.max_block_words) {
            out.push(block.close());
            open = Some(AddressBlock::open(addr));
            continue;
        }

        let candidate = f64::from(block.requested_words() + u32::from(addr.length_words()))
            / f64::from(new_length);
        if candidate >= config.min_efficiency {
            // new_length <= max_block_words <= u16::MAX
            block.absorb(addr, new_start, new_length as u16);
            open = Some(block);
        } else {
            out.push(block.close());
            open = Some(AddressBlock::open(addr));
        }
    }

    if let Some(block) = open {
        out.push(block.close());
    }
}

/// Groups addresses into read blocks.
///
/// Output is deterministic for a given input set: areas come out in
/// [`MemoryArea`] order, bit blocks before word blocks within an area, each
/// list ascending by offset.
pub fn optimize(addresses: &[AddressRef], config: &OptimizerConfig) -> Vec<AddressBlock> {
    let mut blocks = Vec::new();
    for (area, (bits, words)) in partition(addresses) {
        let before = blocks.len();
        bit_blocks(bits, &mut blocks);
        word_blocks(words, config, &mut blocks);
        debug!(
            %area,
            blocks = blocks.len() - before,
            "planned read blocks"
        );
    }
    blocks
}

/// Groups addresses into write blocks.
///
/// Writes cannot pad, so word members merge only when they abut exactly (the
/// candidate starts where the open block ends) and the span stays within
/// `max_block_words`. Every bit address becomes its own single-member block.
pub fn optimize_writes(addresses: &[AddressRef], max_block_words: u16) -> Vec<AddressBlock> {
    let mut blocks = Vec::new();
    for (_, (bits, mut words)) in partition(addresses) {
        blocks.extend(bits.into_iter().map(|b| AddressBlock::open(b).close()));

        words.sort_by_key(AddressRef::word_offset);
        let mut open: Option<AddressBlock> = None;
        for addr in words {
            match open.take() {
                Some(mut block)
                    if block.end() == u32::from(addr.word_offset())
                        && block.end() + u32::from(addr.length_words())
                            - u32::from(block.start_word_offset)
                            <= u32::from(max_block_words) =>
                {
                    let length = block.total_length_words + addr.length_words();
                    let start = block.start_word_offset;
                    block.absorb(addr, start, length);
                    open = Some(block);
                }
                Some(block) => {
                    blocks.push(block.close());
                    open = Some(AddressBlock::open(addr));
                }
                None => open = Some(AddressBlock::open(addr)),
            }
        }
        if let Some(block) = open {
            blocks.push(block.close());
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{parse_address, DataType};

    fn words(offsets: &[u16]) -> Vec<AddressRef> {
        offsets
            .iter()
            .map(|&o| AddressRef::word(MemoryArea::DM, o, DataType::Int16).unwrap())
            .collect()
    }

    fn offsets(block: &AddressBlock) -> Vec<u16> {
        block.members().iter().map(AddressRef::word_offset).collect()
    }

    #[test]
    fn test_contiguous_collapse() {
        let blocks = optimize(&words(&[0, 1, 2]), &OptimizerConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_word_offset(), 0);
        assert_eq!(blocks[0].total_length_words(), 3);
        assert_eq!(blocks[0].efficiency_ratio(), 1.0);
    }

    #[test]
    fn test_threshold_split() {
        let config = OptimizerConfig::default().with_min_efficiency(0.6);
        let blocks = optimize(&words(&[0, 1, 5]), &config);
        assert_eq!(blocks.len(), 2);
        assert_eq!(offsets(&blocks[0]), vec![0, 1]);
        assert_eq!(blocks[0].efficiency_ratio(), 1.0);
        assert_eq!(offsets(&blocks[1]), vec![5]);
        assert_eq!(blocks[1].efficiency_ratio(), 1.0);
    }

    #[test]
    fn test_threshold_boundary_accepts_equal_ratio() {
        let config = OptimizerConfig::default().with_min_efficiency(0.5);
        let blocks = optimize(&words(&[0, 1, 5]), &config);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].total_length_words(), 6);
        assert_eq!(blocks[0].efficiency_ratio(), 0.5);
    }

    #[test]
    fn test_single_address() {
        let addr = AddressRef::word(MemoryArea::DM, 40, DataType::Float64).unwrap();
        let blocks = optimize(&[addr], &OptimizerConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_word_offset(), 40);
        assert_eq!(blocks[0].total_length_words(), 4);
        assert_eq!(blocks[0].efficiency_ratio(), 1.0);
    }

    #[test]
    fn test_max_block_words_never_exceeded() {
        let config = OptimizerConfig::default()
            .with_min_efficiency(0.01)
            .with_max_block_words(10);
        let blocks = optimize(&words(&[0, 9, 10]), &config);
        assert_eq!(blocks.len(), 2);
        assert_eq!(offsets(&blocks[0]), vec![0, 9]);
        assert_eq!(offsets(&blocks[1]), vec![10]);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let config = OptimizerConfig::default();
        let a = optimize(&words(&[5, 0, 2, 1, 3]), &config);
        let b = optimize(&words(&[0, 1, 2, 3, 5]), &config);
        let spans = |blocks: &[AddressBlock]| {
            blocks
                .iter()
                .map(|b| (b.start_word_offset(), b.total_length_words()))
                .collect::<Vec<_>>()
        };
        assert_eq!(spans(&a), spans(&b));
    }

    #[test]
    fn test_duplicates_share_block() {
        let blocks = optimize(&words(&[7, 7]), &OptimizerConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].members().len(), 2);
        assert_eq!(blocks[0].total_length_words(), 1);
        assert_eq!(blocks[0].efficiency_ratio(), 1.0);
    }

    #[test]
    fn test_bits_grouped_by_word() {
        let refs: Vec<AddressRef> = ["CIO100.07", "CIO100.01", "CIO101.00", "CIO100.03"]
            .iter()
            .map(|a| parse_address(a, DataType::Bool).unwrap())
            .collect();
        let blocks = optimize(&refs, &OptimizerConfig::default());
        assert_eq!(blocks.len(), 2);

        assert!(blocks[0].is_bit_block());
        assert_eq!(blocks[0].start_word_offset(), 100);
        assert_eq!(blocks[0].total_length_words(), 1);
        let bits: Vec<Option<u8>> = blocks[0].members().iter().map(|m| m.bit_offset()).collect();
        assert_eq!(bits, vec![Some(1), Some(3), Some(7)]);

        assert_eq!(blocks[1].start_word_offset(), 101);
        assert_eq!(blocks[1].efficiency_ratio(), 1.0);
    }

    #[test]
    fn test_areas_never_mix() {
        let refs = vec![
            parse_address("D10", DataType::Int16).unwrap(),
            parse_address("W10", DataType::Int16).unwrap(),
            parse_address("D11", DataType::Int16).unwrap(),
        ];
        let blocks = optimize(&refs, &OptimizerConfig::default());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].area(), MemoryArea::WR);
        assert_eq!(blocks[1].area(), MemoryArea::DM);
        assert_eq!(blocks[1].total_length_words(), 2);
    }

    #[test]
    fn test_multiword_members_counted_by_length() {
        let refs = vec![
            AddressRef::word(MemoryArea::DM, 0, DataType::Float32).unwrap(),
            AddressRef::word(MemoryArea::DM, 3, DataType::Float32).unwrap(),
        ];
        // (2 + 2) / 5 = 0.8 passes the default floor
        let blocks = optimize(&refs, &OptimizerConfig::default());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].total_length_words(), 5);
        assert!((blocks[0].efficiency_ratio() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_members_inside_block_span() {
        let refs = words(&[3, 4, 8, 30, 31, 33, 90]);
        for block in optimize(&refs, &OptimizerConfig::default()) {
            for m in block.members() {
                assert!(m.word_offset() >= block.start_word_offset());
                assert!(
                    m.end_word()
                        <= u32::from(block.start_word_offset())
                            + u32::from(block.total_length_words())
                );
            }
        }
    }

    #[test]
    fn test_optimize_writes_only_merges_abutting() {
        let blocks = optimize_writes(&words(&[0, 1, 3, 4]), 180);
        assert_eq!(blocks.len(), 2);
        assert_eq!(offsets(&blocks[0]), vec![0, 1]);
        assert_eq!(offsets(&blocks[1]), vec![3, 4]);
        assert!(blocks.iter().all(|b| b.efficiency_ratio() == 1.0));
    }

    #[test]
    fn test_optimize_writes_splits_duplicates_and_bits() {
        let mut refs = words(&[5, 5]);
        refs.push(parse_address("D9.01", DataType::Bool).unwrap());
        refs.push(parse_address("D9.02", DataType::Bool).unwrap());
        let blocks = optimize_writes(&refs, 180);
        assert_eq!(blocks.len(), 4);
    }

    #[test]
    fn test_optimize_writes_respects_cap() {
        let blocks = optimize_writes(&words(&[0, 1, 2]), 2);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].total_length_words(), 2);
    }

    #[test]
    fn test_config_validate() {
        assert!(OptimizerConfig::default().validate().is_ok());
        assert!(OptimizerConfig::default().with_min_efficiency(0.0).validate().is_err());
        assert!(OptimizerConfig::default().with_min_efficiency(1.5).validate().is_err());
        assert!(OptimizerConfig::default().with_max_block_words(0).validate().is_err());
        assert!(OptimizerConfig::default().with_max_block_words(1000).validate().is_err());
    }
}
