//! Consumes a bitstream and drives the control-block builder and delayed-event queue to produce a
//! coherent, self-looping graph. See [`compile`] for more information.
//!
//! This is the hard part of the crate: a data word just written to the PWM FIFO is not actually
//! shifted out for [`crate::layout::PeripheralLayout::pwm_output_delay`] more DREQ cycles, so a
//! GPIO edge that must coincide with a particular bit has to be scheduled that many data blocks
//! later than the event that logically precedes it. And the bitstream's repeating suffix may not
//! close cleanly on its first traversal if the set of not-yet-fired GPIO edges at the loop point
//! differs from the set seen the first time around — in which case the suffix is re-walked
//! (unrolled) until the pending-edges state repeats, which is guaranteed to happen in finite time
//! because the state space of (bitstream index, pending-edges queue) is itself finite.

use crate::bitstream::{Bitstream, Event};
use crate::builder::ControlBlockBuilder;
use crate::control_block::ControlBlock;
use crate::delayed_queue::DelayedEventQueue;
use crate::error::CompileError;
use crate::layout::PeripheralLayout;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

/// The output of compilation: a self-contained control-block graph plus its accompanying data,
/// ready for [`crate::committer::commit`].
#[derive(Debug)]
pub struct CompiledGraph {
    /// The control-block vector. Every address field still carries a byte offset relative to
    /// this vector or to `data`, disambiguated by comparison against the peripheral base address
    /// — nothing here is an absolute bus address yet.
    pub control_blocks: Vec<ControlBlock>,
    /// The data vector backing the control blocks' reads and writes. Index 0 is the sentinel
    /// slot, overwritten by the start- and end-sentinel control blocks as the graph runs.
    pub data: Vec<u32>,
    /// The control-block index the end-sentinel's `next` points at: the point at which the
    /// steady-state loop closes.
    pub loop_close_block: usize,
    /// The bitstream's nominal duration, copied verbatim.
    pub duration_micros: u32,
}

/// Compiles `bitstream` into a [`CompiledGraph`] using the addresses and constants in `layout`.
///
/// # Errors
///
/// Returns [`CompileError::BitstreamContainsNoData`] if any traversal pass — the initial one, or
/// any repetition of the suffix while searching for a loop-close point — would contain zero
/// `Data` events.
pub fn compile(bitstream: &Bitstream<'_>, layout: &PeripheralLayout) -> Result<CompiledGraph, CompileError> {
    #[cfg(feature = "log")]
    log::trace!("compiling bitstream of {} events", bitstream.len());

    let events = bitstream.events();
    let mut builder = ControlBlockBuilder::new();
    builder.start_sentinel();

    // The one-time prefix (everything before `LoopStart`) is only ever walked on pass 1; every
    // later pass resumes at `restart_from`, which is updated live as `LoopStart` is encountered.
    let mut pass_start: usize = 0;
    let mut restart_from: usize = 0;
    let mut range: u32 = 0;
    let mut pending_words: Vec<u32> = Vec::new();
    let mut pending_start_index: usize = 0;
    let mut events_for_index: BTreeMap<usize, DelayedEventQueue> = BTreeMap::new();
    let mut block_for_index: BTreeMap<usize, usize> = BTreeMap::new();
    let mut delayed = DelayedEventQueue::new();

    let mut loop_target: Option<usize> = None;
    let mut pass: u32 = 0;

    'passes: loop {
        pass += 1;
        #[cfg(feature = "log")]
        log::trace!("pass {pass} starting at bitstream index {pass_start}");
        let mut saw_data_this_pass = false;
        let mut index = pass_start;

        while index < events.len() {
            match events[index] {
                Event::Data { word, size } => {
                    if let Some(snapshot) = events_for_index.get(&index) {
                        if *snapshot == delayed {
                            if let Some(&block_index) = block_for_index.get(&index) {
                                loop_target = Some(block_index);
                                break 'passes;
                            } else if index == pending_start_index {
                                let closed_index = builder.data_burst(&pending_words, layout);
                                pending_words.clear();
                                loop_target = Some(closed_index);
                                break 'passes;
                            }
                        }
                    }

                    if pending_words.is_empty() {
                        pending_start_index = index;
                        events_for_index.insert(index, delayed.clone());
                    }
                    pending_words.push(word);
                    saw_data_this_pass = true;

                    let due_now = delayed.countdown();
                    if size == range && due_now.is_empty() {
                        // Keep accumulating; no block boundary needed yet.
                    } else {
                        block_for_index.insert(pending_start_index, builder.next_block_index());
                        builder.data_burst(&pending_words, layout);
                        pending_words.clear();
                        if size != range {
                            builder.range_write(size, layout);
                            range = size;
                        }
                        if !due_now.is_empty() {
                            builder.gpio_edges(&due_now, layout);
                        }
                    }
                }
                Event::LoopStart => {
                    restart_from = index + 1;
                    if !pending_words.is_empty() {
                        // Do not record `block_for_index` here: this prefix burst is before the
                        // loop point and will never be looked up again.
                        builder.data_burst(&pending_words, layout);
                        pending_words.clear();
                    }
                }
                gpio_event if gpio_event.is_gpio_edge() => {
                    delayed.add(gpio_event, layout.pwm_output_delay);
                }
                _ => unreachable!("Event has no other variants"),
            }
            index += 1;
        }

        if !saw_data_this_pass {
            #[cfg(feature = "log")]
            log::warn!("bitstream of {} events contains no Data in pass {pass}", bitstream.len());
            return Err(CompileError::BitstreamContainsNoData);
        }
        pass_start = restart_from;
    }

    if !pending_words.is_empty() {
        builder.data_burst(&pending_words, layout);
        pending_words.clear();
    }

    #[expect(clippy::expect_used, reason = "loop_target is always Some once the passes loop breaks")]
    let loop_close_block = loop_target.expect("traversal always sets loop_target before exiting");
    builder.end_sentinel(loop_close_block);

    let (control_blocks, data) = builder.finish();
    #[cfg(feature = "log")]
    log::debug!(
        "compiled {} control blocks, {} data words, loop-close at block {loop_close_block}",
        control_blocks.len(),
        data.len()
    );

    Ok(CompiledGraph {
        control_blocks,
        data,
        loop_close_block,
        duration_micros: bitstream.duration_micros,
    })
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
    fn empty_bitstream_fails() {
        let layout = test_layout();
        let bitstream = Bitstream::new(&[], 0);
        assert_eq!(
            compile(&bitstream, &layout).unwrap_err(),
            CompileError::BitstreamContainsNoData
        );
    }

    // S1 — single word, no GPIO, no loop.
    #[test]
    fn single_word_no_gpio_no_loop() {
        let layout = test_layout();
        let events = [Event::Data { word: 0xDEAD_BEEF, size: 32 }];
        let bitstream = Bitstream::new(&events, 1000);
        let graph = compile(&bitstream, &layout).unwrap();

        assert_eq!(graph.control_blocks.len(), 4);
        assert_eq!(graph.data[crate::builder::SENTINEL_SLOT], 0);
        // Block 0: start-sentinel.
        assert_eq!(graph.control_blocks[0].next_control_block_address as usize, core::mem::size_of::<ControlBlock>());
        // Block 1: data-burst of the single word.
        assert_eq!(graph.control_blocks[1].destination_address, layout.pwm_fifo_address);
        // Block 2: range-write of 32.
        assert_eq!(graph.control_blocks[2].destination_address, layout.pwm_range_address);
        // Block 3: end-sentinel, looping back to the data-burst block (index 1).
        assert_eq!(graph.loop_close_block, 1);
        assert_eq!(graph.duration_micros, 1000);
    }

    // S2 — two words of equal size, no GPIO: they coalesce within a single pass, but the word
    // that is still accumulating when the loop-close point is reached gets flushed into its own
    // closing block rather than retroactively merged into the first pass's burst.
    #[test]
    fn two_equal_size_words_coalesce_within_a_pass() {
        let layout = test_layout();
        let events = [
            Event::Data { word: 1, size: 32 },
            Event::Data { word: 2, size: 32 },
        ];
        let bitstream = Bitstream::new(&events, 0);
        let graph = compile(&bitstream, &layout).unwrap();

        // start, burst([1]), range-write, burst([2]), end => 5 blocks.
        assert_eq!(graph.control_blocks.len(), 5);
        assert_eq!(graph.control_blocks[1].transfer_length, 4);
        assert_eq!(graph.control_blocks[3].transfer_length, 4);
        assert_eq!(graph.loop_close_block, 1);
    }

    // S4 — LoopStart with no pending GPIO produces a clean, non-unrolled loop.
    #[test]
    fn loop_start_with_no_pending_gpio_closes_cleanly() {
        let layout = test_layout();
        let events = [
            Event::Data { word: 1, size: 32 },
            Event::LoopStart,
            Event::Data { word: 2, size: 32 },
        ];
        let bitstream = Bitstream::new(&events, 0);
        let graph = compile(&bitstream, &layout).unwrap();

        // start; burst([1]); range-write 32; burst([2]); end -> burst([2]).
        assert_eq!(graph.control_blocks.len(), 5);
        assert_eq!(graph.loop_close_block, 3);
    }

    // S5 — differing sizes force a range-write between bursts.
    #[test]
    fn differing_sizes_force_extra_range_write() {
        let layout = test_layout();
        let events = [
            Event::Data { word: 1, size: 32 },
            Event::Data { word: 2, size: 24 },
        ];
        let bitstream = Bitstream::new(&events, 0);
        let graph = compile(&bitstream, &layout).unwrap();

        // start; burst([1]); range-write 32; burst([2]); range-write 24; end.
        assert_eq!(graph.control_blocks.len(), 6);
        assert!(graph.data.contains(&32));
        assert!(graph.data.contains(&24));
    }

    // S3 — an unserviced RailCom edge forces at least one unrolled pass, but terminates.
    #[test]
    fn unserviced_gpio_edge_forces_unrolling_but_terminates() {
        let layout = test_layout();
        let events = [
            Event::Data { word: 1, size: 32 },
            Event::RailComCutoutStart,
            Event::Data { word: 2, size: 32 },
        ];
        let bitstream = Bitstream::new(&events, 0);
        let graph = compile(&bitstream, &layout).unwrap();

        let has_gpio_block = graph
            .control_blocks
            .iter()
            .any(|block| block.transfer_information.tdmode());
        assert!(has_gpio_block, "a GPIO-edges block must eventually be emitted");
    }

    // P1: first block is a start-sentinel, last is an end-sentinel.
    #[test]
    fn first_and_last_blocks_are_sentinels() {
        let layout = test_layout();
        let events = [Event::Data { word: 7, size: 32 }];
        let bitstream = Bitstream::new(&events, 0);
        let graph = compile(&bitstream, &layout).unwrap();

        let first = &graph.control_blocks[0];
        assert_eq!(graph.data[first.source_address as usize / 4], 1);
        assert_eq!(first.destination_address, 0);

        let last = graph.control_blocks.last().unwrap();
        assert_eq!(graph.data[last.source_address as usize / 4], u32::MAX);
        assert_eq!(last.destination_address, 0);
        assert_eq!(
            last.next_control_block_address as usize,
            graph.loop_close_block * core::mem::size_of::<ControlBlock>()
        );
    }

    // P7: GPIO events spaced >= 2 data words apart with an empty-delayed LoopStart produce no
    // unrolling (one bitstream Data index per block).
    #[test]
    fn well_spaced_gpio_with_clean_loop_start_does_not_unroll() {
        let layout = test_layout();
        let events = [
            Event::RailComCutoutStart,
            Event::Data { word: 1, size: 32 },
            Event::Data { word: 2, size: 32 },
            Event::RailComCutoutEnd,
            Event::Data { word: 3, size: 32 },
            Event::LoopStart,
            Event::Data { word: 4, size: 32 },
            Event::Data { word: 5, size: 32 },
        ];
        let bitstream = Bitstream::new(&events, 0);
        let graph = compile(&bitstream, &layout).unwrap();
        // Just confirm it terminates with a sensible shape: at least the start/end sentinels
        // plus one burst for the always-looping suffix.
        assert!(graph.control_blocks.len() >= 4);
    }
}
