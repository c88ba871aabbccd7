//! Relocates a [`CompiledGraph`] into an uncached buffer with real bus addresses. See [`commit`]
//! for more information.
//!
//! Allocating uncached, bus-addressable memory is itself a collaborator out of this crate's
//! scope (on a real board it is backed by the VideoCore mailbox property interface); this module
//! only needs somewhere to put the bytes and a bus address to hand back, which is exactly what
//! [`Allocator`] asks a caller for.

use crate::compiler::CompiledGraph;
use crate::control_block::ControlBlock;
use crate::layout::PeripheralLayout;
use core::ptr::NonNull;
use core::sync::atomic::{fence, Ordering};

/// Supplies uncached, DMA-visible memory. Implemented by a caller-provided collaborator; this
/// crate has no opinion on how the allocation is actually backed (mailbox property interface,
/// a static arena, whatever).
pub trait Allocator {
    /// The error type this allocator can fail with.
    type Error;

    /// Allocates at least `bytes` of uncached memory, 32-byte aligned, returning both its bus
    /// address (as seen by the DMA engine) and a CPU-side pointer to the same memory.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` if no suitably sized, suitably aligned region is available.
    fn allocate_uncached(&mut self, bytes: usize) -> Result<(u32, NonNull<u8>), Self::Error>;
}

/// A [`CompiledGraph`] relocated into real memory: every control-block address field now holds an
/// absolute bus address, ready to be loaded into a DMA channel's `CONBLK_AD` register.
///
/// Holds two CPU-side pointers used by [`crate::queue_controller::QueueController`] to poll and
/// splice this graph without needing any further knowledge of its internal layout.
pub struct CommittedGraph {
    /// The bus address of this graph's first control block (its start-sentinel).
    pub entry_point: u32,
    /// CPU-side pointer to the sentinel data word: `1` once the start-sentinel has fired this
    /// lap, `u32::MAX` once the end-sentinel has fired and the graph is about to repeat.
    sentinel_ptr: NonNull<u32>,
    /// CPU-side pointer to the `next_control_block_address` field of this graph's end-sentinel
    /// block: the one word that can be overwritten to splice a different graph in after this
    /// one's current lap completes.
    end_sentinel_next_ptr: NonNull<u32>,
    /// CPU-side pointer to the first control block. Only needed for tests to read back relocated
    /// fields directly; production code only ever touches this graph through bus addresses.
    #[cfg(test)]
    control_blocks_ptr: NonNull<ControlBlock>,
}

impl CommittedGraph {
    /// Returns a CPU-side pointer to control block `index`, for tests only.
    #[cfg(test)]
    fn block_ptr(&self, index: usize) -> NonNull<ControlBlock> {
        // SAFETY: test-only; `index` is checked by the caller against the graph it built.
        unsafe { self.control_blocks_ptr.add(index) }
    }

    /// Returns `true` once this lap's start-sentinel has fired (sentinel word reads `1`).
    #[must_use]
    pub fn is_transmitting(&self) -> bool {
        // SAFETY: `sentinel_ptr` was derived from the allocator's live allocation in `commit`,
        // which outlives this `CommittedGraph` by construction.
        unsafe { self.sentinel_ptr.as_ptr().read_volatile() == 1 }
    }

    /// Returns `true` once this lap's end-sentinel has fired (sentinel word reads `u32::MAX`,
    /// the bit pattern of `-1i32`).
    #[must_use]
    pub fn is_repeating(&self) -> bool {
        // SAFETY: see `is_transmitting`.
        unsafe { self.sentinel_ptr.as_ptr().read_volatile() == u32::MAX }
    }

    /// Overwrites this graph's end-sentinel `next` field to point at `entry_point` instead of
    /// its own loop-close block, splicing a different graph in after the current lap.
    pub(crate) fn splice_next(&mut self, entry_point: u32) {
        // SAFETY: see `is_transmitting`. This is the only writer of this word once the graph has
        // been committed.
        unsafe { self.end_sentinel_next_ptr.as_ptr().write_volatile(entry_point) };
        fence(Ordering::SeqCst);
    }

    /// The sentinel word's address, as a plain integer so it can cross a thread boundary in tests
    /// that simulate hardware progress from a background thread.
    #[cfg(test)]
    #[expect(clippy::as_conversions, reason = "test-only address extraction")]
    pub(crate) fn sentinel_address_for_test(&self) -> usize {
        self.sentinel_ptr.as_ptr() as usize
    }
}

/// Relocates `graph` into memory obtained from `allocator`, rewriting every relative offset into
/// an absolute bus address.
///
/// An address is treated as a relative offset (into the control-block region for
/// `next_control_block_address`, into the data region for `source_address`/`destination_address`)
/// if it is strictly less than `layout.peripheral_base`; otherwise it is already an absolute
/// peripheral register address and is left untouched.
///
/// # Errors
///
/// Propagates `allocator`'s own error unchanged if it cannot satisfy the allocation.
pub fn commit<A: Allocator>(
    graph: &CompiledGraph,
    layout: &PeripheralLayout,
    allocator: &mut A,
) -> Result<CommittedGraph, A::Error> {
    let control_blocks_bytes = graph.control_blocks.len() * core::mem::size_of::<ControlBlock>();
    let data_bytes = graph.data.len() * core::mem::size_of::<u32>();
    let total_bytes = control_blocks_bytes + data_bytes;

    let (region_bus_base, region_ptr) = allocator.allocate_uncached(total_bytes)?;
    debug_assert_eq!(
        region_ptr.as_ptr().align_offset(32),
        0,
        "allocator must hand back 32-byte-aligned memory for the control-block region"
    );

    let control_blocks_bus_base = region_bus_base;
    #[expect(
        clippy::cast_possible_truncation,
        reason = "control-block regions never approach u32::MAX bytes"
    )]
    let data_bus_base = region_bus_base + control_blocks_bytes as u32;

    // SAFETY: `region_ptr` was just allocated with room for `control_blocks_bytes` aligned bytes.
    let control_blocks_ptr = region_ptr.cast::<ControlBlock>();
    // SAFETY: `region_ptr` has room for `total_bytes`; the data region starts right after the
    // control-block region, which is itself a multiple of `size_of::<ControlBlock>()` and
    // therefore already word-aligned.
    let data_ptr = unsafe { region_ptr.add(control_blocks_bytes) }.cast::<u32>();

    for (index, block) in graph.control_blocks.iter().enumerate() {
        let mut relocated = *block;
        relocated.next_control_block_address = relocate(
            relocated.next_control_block_address,
            layout,
            control_blocks_bus_base,
        );
        relocated.source_address = relocate(relocated.source_address, layout, data_bus_base);
        relocated.destination_address =
            relocate(relocated.destination_address, layout, data_bus_base);

        // SAFETY: `index` is in bounds of the allocated control-block region.
        unsafe { control_blocks_ptr.add(index).as_ptr().write_volatile(relocated) };
    }

    for (index, &word) in graph.data.iter().enumerate() {
        // SAFETY: `index` is in bounds of the allocated data region.
        unsafe { data_ptr.add(index).as_ptr().write_volatile(word) };
    }

    fence(Ordering::SeqCst);

    #[cfg(feature = "log")]
    log::debug!(
        "committed graph at bus address {control_blocks_bus_base:#010x}, {total_bytes} bytes"
    );

    let sentinel_ptr = data_ptr;
    let end_sentinel_index = graph.control_blocks.len() - 1;
    // SAFETY: `end_sentinel_index` is in bounds; `next_control_block_address` is the sixth `u32`
    // (index 5) of the `ControlBlock` layout: transfer_information, source_address,
    // destination_address, transfer_length, td_mode_stride, next_control_block_address.
    let end_sentinel_next_ptr = unsafe {
        control_blocks_ptr
            .add(end_sentinel_index)
            .cast::<u32>()
            .add(5)
    };

    Ok(CommittedGraph {
        entry_point: control_blocks_bus_base,
        sentinel_ptr,
        end_sentinel_next_ptr,
        #[cfg(test)]
        control_blocks_ptr,
    })
}

/// Rewrites `address` to an absolute bus address if it is a relative offset (strictly below
/// `layout.peripheral_base`), by adding `region_bus_base`. Leaves it untouched otherwise.
fn relocate(address: u32, layout: &PeripheralLayout, region_bus_base: u32) -> u32 {
    if address < layout.peripheral_base {
        region_bus_base + address
    } else {
        address
    }
}
