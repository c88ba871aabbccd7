//! Appends typed DMA control blocks to a growing graph. See [`ControlBlockBuilder`] for more
//! information.
//!
//! The builder never inspects its own output; it is a pure appender driven entirely by
//! [`crate::compiler::compile`]. Every block it emits, except the end-sentinel, chains
//! to "the next block that will be appended" — compilation never branches except at the final
//! loop-close, so this sequential-`next` convention needs no backpatching.

use crate::bitstream::Event;
use crate::control_block::{ControlBlock, TransferInfo};
use crate::layout::PeripheralLayout;
use alloc::vec::Vec;

/// The byte size of one [`ControlBlock`], used to compute relative control-block offsets.
const CONTROL_BLOCK_BYTES: u32 = core::mem::size_of::<ControlBlock>() as u32;
/// The byte size of one data word.
const WORD_BYTES: u32 = core::mem::size_of::<u32>() as u32;

/// Data-vector index of the sentinel slot, written dynamically by the start/end sentinel blocks.
pub const SENTINEL_SLOT: usize = 0;
/// Data-vector index of the literal `1` word the start-sentinel block reads from.
const START_LITERAL_SLOT: usize = 1;
/// Data-vector index of the literal `-1` (as `u32::MAX`) word the end-sentinel block reads from.
const END_LITERAL_SLOT: usize = 2;

/// Appends control blocks and their accompanying data words to produce a [`crate::compiler`]
/// graph. See the module documentation for more information.
pub struct ControlBlockBuilder {
    blocks: Vec<ControlBlock>,
    data: Vec<u32>,
}

impl ControlBlockBuilder {
    /// Creates a builder with the sentinel slot and its two literal source words pre-populated.
    #[must_use]
    pub fn new() -> Self {
        // The bit pattern of -1i32 is the literal the end-sentinel block writes.
        let end_literal = u32::MAX;
        Self {
            blocks: Vec::new(),
            data: alloc::vec![0, 1, end_literal],
        }
    }

    /// The index the next appended block will receive.
    pub(crate) fn next_block_index(&self) -> usize {
        self.blocks.len()
    }

    /// The relative byte offset of control-block index `index`.
    fn control_block_offset(index: usize) -> u32 {
        #[expect(clippy::cast_possible_truncation, reason = "graphs never approach u32::MAX blocks")]
        let index = index as u32;
        index * CONTROL_BLOCK_BYTES
    }

    /// The relative byte offset of data-word index `index`.
    fn data_offset(index: usize) -> u32 {
        #[expect(clippy::cast_possible_truncation, reason = "graphs never approach u32::MAX words")]
        let index = index as u32;
        index * WORD_BYTES
    }

    /// Appends a start-sentinel block: writes the literal `1` to the sentinel slot, chaining to
    /// the block that will be appended next. Returns the new block's index (always 0, in
    /// practice, since this is always the first block emitted).
    pub fn start_sentinel(&mut self) -> usize {
        let index = self.next_block_index();
        let info = TransferInfo::new().with_wait_resp(true);
        let block = ControlBlock::new(
            info,
            Self::data_offset(START_LITERAL_SLOT),
            Self::data_offset(SENTINEL_SLOT),
            WORD_BYTES,
            0,
            Self::control_block_offset(index + 1),
        );
        self.blocks.push(block);
        index
    }

    /// Appends an end-sentinel block: writes the literal `-1` to the sentinel slot, chaining to
    /// `loop_target`. Returns the new block's index.
    pub fn end_sentinel(&mut self, loop_target: usize) -> usize {
        let index = self.next_block_index();
        let info = TransferInfo::new().with_wait_resp(true);
        let block = ControlBlock::new(
            info,
            Self::data_offset(END_LITERAL_SLOT),
            Self::data_offset(SENTINEL_SLOT),
            WORD_BYTES,
            0,
            Self::control_block_offset(loop_target),
        );
        self.blocks.push(block);
        index
    }

    /// Appends `words` to the data vector and a data-burst block writing them, in order, to the
    /// PWM FIFO register. Returns the new block's index.
    pub fn data_burst(&mut self, words: &[u32], layout: &PeripheralLayout) -> usize {
        debug_assert!(!words.is_empty(), "a data-burst block must carry at least one word");
        let data_index = self.data.len();
        self.data.extend_from_slice(words);

        let index = self.next_block_index();
        let info = TransferInfo::new()
            .with_wait_resp(true)
            .with_no_wide_bursts(true)
            .with_permap(layout.pwm_dreq_permap)
            .with_src_inc(true)
            .with_dest_dreq(true);
        #[expect(clippy::cast_possible_truncation, reason = "bursts never approach u32::MAX words")]
        let length = words.len() as u32 * WORD_BYTES;
        let block = ControlBlock::new(
            info,
            Self::data_offset(data_index),
            layout.pwm_fifo_address,
            length,
            0,
            Self::control_block_offset(index + 1),
        );
        self.blocks.push(block);
        index
    }

    /// Appends `size` to the data vector and a block writing it to the PWM channel-1 range
    /// register. Returns the new block's index.
    pub fn range_write(&mut self, size: u32, layout: &PeripheralLayout) -> usize {
        let data_index = self.data.len();
        self.data.push(size);

        let index = self.next_block_index();
        let info = TransferInfo::new().with_wait_resp(true);
        let block = ControlBlock::new(
            info,
            Self::data_offset(data_index),
            layout.pwm_range_address,
            WORD_BYTES,
            0,
            Self::control_block_offset(index + 1),
        );
        self.blocks.push(block);
        index
    }

    /// Appends a GPIO-edges block covering every event in `due`. `due` must be non-empty; an
    /// empty due list is a programmer error (there would be nothing to emit).
    ///
    /// # Panics
    ///
    /// Panics if `due` is empty.
    pub fn gpio_edges(&mut self, due: &[Event], layout: &PeripheralLayout) -> usize {
        assert!(!due.is_empty(), "gpio_edges requires a non-empty due list");
        debug_assert_eq!(
            layout.gpio_clear_address,
            layout.gpio_set_address + 3 * WORD_BYTES,
            "the clear-register pair must follow the set-register pair with one reserved word between them"
        );

        let (set, clear) = compute_masks(due, layout);
        let data_index = self.data.len();
        self.data.extend_from_slice(&[set[0], set[1], clear[0], clear[1]]);

        let index = self.next_block_index();
        let info = TransferInfo::new()
            .with_wait_resp(true)
            .with_tdmode(true)
            .with_dest_inc(true)
            .with_src_inc(true);
        // 2 rows of 2 words each; destination strides forward one word after each row to skip
        // the single reserved register between the set pair and the clear pair.
        let length = ControlBlock::td_mode_length(2, 2 * WORD_BYTES as u16);
        let stride = ControlBlock::td_mode_stride(WORD_BYTES as i16, 0);
        let block = ControlBlock::new(
            info,
            Self::data_offset(data_index),
            layout.gpio_set_address,
            length,
            stride,
            Self::control_block_offset(index + 1),
        );
        self.blocks.push(block);
        index
    }

    /// Consumes the builder, returning the finished control-block vector and data vector.
    #[must_use]
    pub fn finish(self) -> (Vec<ControlBlock>, Vec<u32>) {
        (self.blocks, self.data)
    }
}

impl Default for ControlBlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the `(set, clear)` GPIO masks, each a `[field0, field1]` pair, for a due list. Later
/// events for the same pin supersede earlier ones, and a pin set by the most recent event for it
/// is cleared from the opposite mask, so no pin ever appears in both.
fn compute_masks(due: &[Event], layout: &PeripheralLayout) -> ([u32; 2], [u32; 2]) {
    let mut set = [0_u32; 2];
    let mut clear = [0_u32; 2];

    for event in due {
        let (pin, drive_high) = match event {
            Event::RailComCutoutStart => (layout.railcom_pin, false),
            Event::RailComCutoutEnd => (layout.railcom_pin, true),
            Event::DebugStart => (layout.debug_pin, true),
            Event::DebugEnd => (layout.debug_pin, false),
            Event::Data { .. } | Event::LoopStart => {
                unreachable!("compute_masks is only called with GPIO edge events")
            }
        };
        let field = usize::from(pin.is_upper_field());
        let bit = 1_u32 << pin.bit_in_field();
        if drive_high {
            set[field] |= bit;
            clear[field] &= !bit;
        } else {
            clear[field] |= bit;
            set[field] &= !bit;
        }
    }

    (set, clear)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::GpioPin;

    fn test_layout() -> PeripheralLayout {
        PeripheralLayout {
            word_bits: 32,
            pwm_output_delay: 2,
            peripheral_base: 0x7E00_0000,
            pwm_fifo_address: 0x7E20_C018,
            pwm_range_address: 0x7E20_C014,
            gpio_set_address: 0x7E20_001C,
            gpio_clear_address: 0x7E20_001C + 3 * 4,
            pwm_dreq_permap: 5,
            railcom_pin: GpioPin { number: 17 },
            debug_pin: GpioPin { number: 27 },
        }
    }

    #[test]
    fn start_sentinel_writes_one_to_slot_zero() {
        let mut builder = ControlBlockBuilder::new();
        builder.start_sentinel();
        let (blocks, data) = builder.finish();
        assert_eq!(data[SENTINEL_SLOT], 0);
        assert_eq!(data[blocks[0].source_address as usize / 4], 1);
        assert_eq!(blocks[0].destination_address, 0);
    }

    #[test]
    fn end_sentinel_writes_negative_one_and_targets_loop() {
        let mut builder = ControlBlockBuilder::new();
        builder.start_sentinel();
        let end_index = builder.end_sentinel(0);
        let (blocks, data) = builder.finish();
        assert_eq!(data[blocks[end_index].source_address as usize / 4], u32::MAX);
        assert_eq!(blocks[end_index].next_control_block_address, 0);
    }

    #[test]
    fn data_burst_appends_words_and_chains_sequentially() {
        let layout = test_layout();
        let mut builder = ControlBlockBuilder::new();
        let index = builder.data_burst(&[0xAAAA_5555, 0x1234_5678], &layout);
        let (blocks, data) = builder.finish();
        assert_eq!(&data[3..5], &[0xAAAA_5555, 0x1234_5678]);
        assert_eq!(blocks[index].destination_address, layout.pwm_fifo_address);
        assert_eq!(blocks[index].transfer_length, 8);
        assert!(blocks[index].transfer_information.dest_dreq());
        assert!(blocks[index].transfer_information.src_inc());
        assert!(blocks[index].transfer_information.no_wide_bursts());
        assert_eq!(
            blocks[index].next_control_block_address,
            ControlBlockBuilder::control_block_offset(index + 1)
        );
    }

    #[test]
    fn range_write_targets_range_register() {
        let layout = test_layout();
        let mut builder = ControlBlockBuilder::new();
        let index = builder.range_write(24, &layout);
        let (blocks, data) = builder.finish();
        assert_eq!(data[blocks[index].source_address as usize / 4], 24);
        assert_eq!(blocks[index].destination_address, layout.pwm_range_address);
    }

    #[test]
    fn gpio_edges_sets_and_clears_distinct_pins() {
        let layout = test_layout();
        let mut builder = ControlBlockBuilder::new();
        let index = builder.gpio_edges(&[Event::RailComCutoutStart, Event::DebugStart], &layout);
        let (blocks, data) = builder.finish();
        let base = blocks[index].source_address as usize / 4;
        let (set0, set1, clear0, clear1) = (data[base], data[base + 1], data[base + 2], data[base + 3]);

        let railcom_bit = 1_u32 << layout.railcom_pin.bit_in_field();
        let debug_bit = 1_u32 << layout.debug_pin.bit_in_field();
        assert_eq!(clear0 & railcom_bit, railcom_bit, "RailCom start clears (drives low)");
        assert_eq!(set0 & debug_bit, debug_bit, "Debug start sets (drives high)");
        // No pin appears in both masks.
        assert_eq!((set0 | set1) & (clear0 | clear1), 0);
    }

    #[test]
    fn gpio_edges_later_event_supersedes_earlier_for_same_pin() {
        let layout = test_layout();
        let mut builder = ControlBlockBuilder::new();
        let index = builder.gpio_edges(
            &[Event::RailComCutoutStart, Event::RailComCutoutEnd],
            &layout,
        );
        let (blocks, data) = builder.finish();
        let base = blocks[index].source_address as usize / 4;
        let railcom_bit = 1_u32 << layout.railcom_pin.bit_in_field();
        assert_eq!(data[base] & railcom_bit, railcom_bit, "final state is set (end wins)");
        assert_eq!(data[base + 2] & railcom_bit, 0, "pin absent from clear mask");
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn gpio_edges_rejects_empty_due_list() {
        let layout = test_layout();
        let mut builder = ControlBlockBuilder::new();
        builder.gpio_edges(&[], &layout);
    }
}
