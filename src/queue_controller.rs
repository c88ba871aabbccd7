//! Hands a newly committed graph off to a DMA channel that is already running a previous one,
//! without ever stopping the DMA engine. See [`QueueController`] for more information.
//!
//! Swapping the hardware `CONBLK_AD` register is out of scope here (and only relevant for the
//! very first graph, handled by the caller): once a chain of control blocks is running, the only
//! way to change what it does next is to overwrite the word its current end-sentinel will use as
//! its `next` pointer, and only while it is safe to do so.

use crate::committer::CommittedGraph;

/// Owns the graph a DMA channel is currently cycling through and splices in replacements.
///
/// # Handoff protocol
///
/// 1. Splice the new graph's entry point into the current graph's end-sentinel `next` field.
/// 2. (Implicit in the splice: a memory fence, so the DMA engine observes the write before it
///    next reaches the end-sentinel block.)
/// 3. Wait for the new graph's start-sentinel to have fired
///    ([`CommittedGraph::is_transmitting`]): the DMA engine has now actually reached the spliced
///    pointer and is executing the new graph, so the old graph is no longer referenced.
/// 4. Adopt the new graph as current.
/// 5. Wait for the new graph to complete a full lap and loop back around
///    ([`CommittedGraph::is_repeating`]), confirming the hand-off is fully settled.
pub struct QueueController {
    current: CommittedGraph,
}

impl QueueController {
    /// Takes ownership of the graph a DMA channel has already been started with.
    #[must_use]
    pub const fn new(initial: CommittedGraph) -> Self {
        Self { current: initial }
    }

    /// The bus address that should be loaded into the DMA channel's `CONBLK_AD` register to begin
    /// executing the graph this controller currently owns. Only meaningful before the channel has
    /// been started; once running, graphs are handed off via [`Self::enqueue`] instead.
    #[must_use]
    pub const fn entry_point(&self) -> u32 {
        self.current.entry_point
    }

    /// Splices `next` in after the current graph's end-sentinel, then adopts it as the current
    /// graph once the DMA engine is confirmed to be executing it. Blocks (busy-waiting) until the
    /// handoff is confirmed complete.
    ///
    /// The caller is responsible for the previous current graph's memory once this returns: it is
    /// no longer referenced by the DMA program and may be freed or reused.
    pub fn enqueue(&mut self, next: CommittedGraph) -> CommittedGraph {
        self.current.splice_next(next.entry_point);

        while !next.is_transmitting() {
            core::hint::spin_loop();
        }
        #[cfg(feature = "log")]
        log::trace!("hand-off rewired: new graph's start-sentinel has fired");

        let previous = core::mem::replace(&mut self.current, next);

        while !self.current.is_repeating() {
            core::hint::spin_loop();
        }
        #[cfg(feature = "log")]
        log::trace!("hand-off complete: new graph is now repeating");

        previous
    }
}
