//! The logical DCC bitstream: the input to compilation. See [`Event`] and [`Bitstream`] for more
//! information.

/// One entry of a [`Bitstream`].
///
/// Packet encoding, preamble insertion, and address/command composition are all the job of the
/// bitstream producer collaborator; this crate only consumes the already-encoded sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `size` significant bits of `word`, serialized MSB-first. `size` must be between 1 and the
    /// configured word width, inclusive.
    Data {
        /// The word to serialize. Only the low `size` bits (from the MSB end) are significant.
        word: u32,
        /// The number of significant bits, 1..=word width.
        size: u32,
    },
    /// The GPIO edge that begins a RailCom cutout (pin driven low).
    RailComCutoutStart,
    /// The GPIO edge that ends a RailCom cutout (pin driven high).
    RailComCutoutEnd,
    /// The GPIO edge that begins a debug window (pin driven high).
    DebugStart,
    /// The GPIO edge that ends a debug window (pin driven low).
    DebugEnd,
    /// Marks the point after which traversal restarts on each subsequent cycle. At most one may
    /// appear in a bitstream.
    LoopStart,
}

impl Event {
    /// Returns `true` if this is a [`Event::Data`] event.
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    /// Returns `true` if this event represents a GPIO edge that must ride on a future data
    /// block's DREQ boundary (i.e. anything but `Data` and `LoopStart`).
    #[must_use]
    pub const fn is_gpio_edge(&self) -> bool {
        matches!(
            self,
            Self::RailComCutoutStart | Self::RailComCutoutEnd | Self::DebugStart | Self::DebugEnd
        )
    }
}

/// A finite, ordered sequence of [`Event`]s, borrowed read-only by the compiler, plus the
/// waveform's nominal duration.
///
/// The bitstream producer, out of scope for this crate, may build this however it likes; a
/// borrowed slice is sufficient here.
#[derive(Debug, Clone, Copy)]
pub struct Bitstream<'events> {
    events: &'events [Event],
    /// The waveform's nominal duration, copied verbatim into the compiled graph. Used by the
    /// watchdog collaborator, not by the core itself.
    pub duration_micros: u32,
}

impl<'events> Bitstream<'events> {
    /// Wraps a slice of events with a nominal duration.
    #[must_use]
    pub const fn new(events: &'events [Event], duration_micros: u32) -> Self {
        Self {
            events,
            duration_micros,
        }
    }

    /// The events of this bitstream, in traversal order.
    #[must_use]
    pub const fn events(&self) -> &'events [Event] {
        self.events
    }

    /// The number of events.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if this bitstream has no events at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The index one past a `LoopStart` event, or 0 if the bitstream has none (per the design
    /// note treating "no `LoopStart`" as "`LoopStart` implicit at index 0").
    #[must_use]
    pub fn initial_restart_from(&self) -> usize {
        self.events
            .iter()
            .position(|event| matches!(event, Event::LoopStart))
            .map_or(0, |index| index.saturating_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loop_start_restarts_at_zero() {
        let events = [Event::Data { word: 1, size: 1 }];
        let bitstream = Bitstream::new(&events, 0);
        assert_eq!(bitstream.initial_restart_from(), 0);
    }

    #[test]
    fn loop_start_restarts_after_itself() {
        let events = [
            Event::Data { word: 1, size: 1 },
            Event::LoopStart,
            Event::Data { word: 2, size: 1 },
        ];
        let bitstream = Bitstream::new(&events, 0);
        assert_eq!(bitstream.initial_restart_from(), 2);
    }

    #[test]
    fn is_gpio_edge_classification() {
        assert!(Event::RailComCutoutStart.is_gpio_edge());
        assert!(Event::DebugEnd.is_gpio_edge());
        assert!(!Event::LoopStart.is_gpio_edge());
        assert!(!Event::Data { word: 0, size: 1 }.is_gpio_edge());
    }
}
