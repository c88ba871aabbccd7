//! Compiles a DCC bitstream into a self-looping BCM283x DMA control-block graph.
//!
//! The pipeline is: a [`bitstream::Bitstream`] goes into [`compiler::compile`], producing a
//! [`compiler::CompiledGraph`] of relative offsets;
//! [`committer::commit`] relocates that graph into real, allocator-backed memory, producing a
//! [`committer::CommittedGraph`]; and [`queue_controller::QueueController`] hands committed graphs
//! off to a running DMA channel one after another, without ever stopping it.
//!
//! Driving the actual PWM, DMA, and GPIO peripheral registers, and backing uncached allocations
//! with real memory, are both collaborators outside this crate: it only ever describes what a DMA
//! channel should do, never pokes a register itself.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod bitstream;
pub mod committer;
pub mod compiler;
pub mod control_block;
pub mod error;
pub mod layout;
pub mod queue_controller;

pub(crate) mod builder;
pub(crate) mod delayed_queue;

pub use bitstream::{Bitstream, Event};
pub use committer::{commit, Allocator, CommittedGraph};
pub use compiler::{compile, CompiledGraph};
pub use error::CompileError;
pub use layout::{GpioPin, PeripheralLayout};
pub use queue_controller::QueueController;
