//! The DMA control-block hardware ABI. See [`ControlBlock`] for more information.
//!
//! This mirrors the BCM283x DMA engine's control-block layout: six 32-bit fields followed by two
//! reserved words, naturally aligned. During compilation, `source_address`, `destination_address`
//! (when not a peripheral register), and `next_control_block_address` carry byte offsets
//! *relative* to the data vector or control-block vector; [`crate::committer`] rewrites these to
//! absolute bus addresses at commit time.

use bitfield_struct::bitfield;

/// Transfer-information flags for a normal (non-2D) or 2D-mode DMA transfer.
///
/// Field layout matches the BCM283x `TI` register bit-for-bit.
#[bitfield(u32)]
pub struct TransferInfo {
    /// Generate an interrupt when this control block's transfer completes. Unused by this crate;
    /// always `false`.
    pub inten: bool,
    /// Use 2D-mode (`tdmode`) addressing: `transfer_length` and `stride` are interpreted as
    /// row/column counts and strides rather than a flat byte count.
    pub tdmode: bool,
    #[bits(1)]
    _res0: u8,
    /// Wait for the AXI write response before proceeding to the next write.
    pub wait_resp: bool,
    /// Increment the destination address after each write.
    pub dest_inc: bool,
    /// Use a 128-bit (rather than 32-bit) destination write width. Always `false` here.
    pub dest_width: bool,
    /// Gate destination writes with the selected peripheral's DREQ.
    pub dest_dreq: bool,
    /// Suppress destination writes entirely. Always `false` here.
    pub dest_ignore: bool,
    /// Increment the source address after each read.
    pub src_inc: bool,
    /// Use a 128-bit (rather than 32-bit) source read width. Always `false` here.
    pub src_width: bool,
    /// Gate source reads with the selected peripheral's DREQ.
    pub src_dreq: bool,
    /// Suppress source reads entirely. Always `false` here.
    pub src_ignore: bool,
    /// Burst length for paced transfers. Always 0 (single-beat) here.
    #[bits(4)]
    pub burst_length: u8,
    /// The DREQ/peripheral-mapping selector (`PERMAP`).
    #[bits(5)]
    pub permap: u8,
    /// Extra wait cycles inserted after each read/write. Always 0 here.
    #[bits(5)]
    pub waits: u8,
    /// Forbid the DMA engine from issuing wide writes as 2-beat AXI bursts.
    pub no_wide_bursts: bool,
    #[bits(5)]
    _res1: u8,
}

/// One node of the DMA program: a fixed-layout record matching the hardware ABI, including the
/// `next` pointer that makes the control-block vector a linked graph.
///
/// `source_address`/`destination_address`/`next_control_block_address` are relative byte offsets
/// until [`crate::committer::commit`] relocates them to absolute bus addresses.
#[repr(C, align(32))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    /// Flags controlling how this transfer is performed.
    pub transfer_information: TransferInfo,
    /// Source address (or, before relocation, a byte offset into the data vector).
    pub source_address: u32,
    /// Destination address (or, before relocation, a byte offset into the data vector, if the
    /// destination is internal sentinel data rather than a peripheral register).
    pub destination_address: u32,
    /// In normal mode: the number of bytes to transfer. In 2D (`tdmode`) mode: `(y_count << 16) |
    /// x_byte_count`.
    pub transfer_length: u32,
    /// In 2D mode: `(dest_stride << 16) | src_stride`, both signed 16-bit halves. Unused (0) in
    /// normal mode.
    pub td_mode_stride: u32,
    /// Byte offset (pre-relocation) or absolute bus address (post-relocation) of the next control
    /// block to execute. A dangling/zero value would halt the DMA engine; every block this crate
    /// emits sets this to a real target.
    pub next_control_block_address: u32,
    _res: u32,
    _res2: u32,
}

impl ControlBlock {
    /// Constructs a control block. The two hardware-reserved trailing words are always zeroed.
    #[must_use]
    pub(crate) const fn new(
        transfer_information: TransferInfo,
        source_address: u32,
        destination_address: u32,
        transfer_length: u32,
        td_mode_stride: u32,
        next_control_block_address: u32,
    ) -> Self {
        Self {
            transfer_information,
            source_address,
            destination_address,
            transfer_length,
            td_mode_stride,
            next_control_block_address,
            _res: 0,
            _res2: 0,
        }
    }

    /// Builds a 2D-mode `(y_count << 16) | x_byte_count` transfer-length encoding.
    #[must_use]
    pub const fn td_mode_length(y_count: u16, x_byte_count: u16) -> u32 {
        ((y_count as u32) << 16) | x_byte_count as u32
    }

    /// Builds a 2D-mode `(dest_stride << 16) | src_stride` encoding. Strides are byte counts
    /// added *after* each row, interpreted as signed 16-bit values by the hardware.
    #[must_use]
    pub const fn td_mode_stride(dest_stride: i16, src_stride: i16) -> u32 {
        ((dest_stride as u16 as u32) << 16) | src_stride as u16 as u32
    }
}
