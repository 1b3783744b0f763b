#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Digital-control core for accelerator magnet power supplies.
//
// The crate avoids the standard library so the same code runs inside the
// firmware's control interrupt and in host-side tests and the emulator.

pub mod console;
pub mod control;
pub mod dsp;
pub mod event_manager;
pub mod io;
pub mod parameters;
pub mod ps_module;
pub mod sequencing;
pub mod siggen;
pub mod signals;
pub mod supervisor;
pub mod telemetry;
pub mod timeslicer;
pub mod topology;
pub mod wfmref;
