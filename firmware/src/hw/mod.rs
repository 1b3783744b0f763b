//! Board peripherals behind the `psu-core` I/O traits.
//!
//! [`gate`] builds on the host so the sharing rules between the control
//! interrupt and the supervisor are unit tested; [`board`] wraps the STM32
//! drivers and only exists for the target.

pub mod gate;

#[cfg(target_os = "none")]
pub mod board;
