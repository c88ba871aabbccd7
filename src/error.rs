//! Error types surfaced at the core's boundary. See items for more information.

use core::fmt;

/// Errors that can occur while compiling a [`Bitstream`](crate::bitstream::Bitstream) into a
/// [`CompiledGraph`](crate::compiler::CompiledGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CompileError {
    /// Some traversal pass of the bitstream (the initial pass, or the repeating suffix) would
    /// contain zero `Data` events, so no waveform could ever be produced from it.
    BitstreamContainsNoData,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BitstreamContainsNoData => {
                write!(f, "bitstream contains no Data events in some traversal pass")
            }
        }
    }
}

#[cfg(test)]
impl std::error::Error for CompileError {}
