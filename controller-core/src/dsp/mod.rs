//! Signal-processing blocks used by the control interrupt.
//!
//! Every block owns its coefficients and memory. `run` is a pure step from
//! (state, input) to (state, output); `reset` zeroes memory and keeps the
//! coefficients. All arithmetic is `f32` and saturation clamps, never wraps.

mod error;
mod iir;
mod pi;
mod srlim;

pub use error::ErrorCalc;
pub use iir::{Iir2p2z, Iir2p2zCoeffs};
pub use pi::{Pi, PiCoeffs};
pub use srlim::{SlewRateLimiter, SrlimMode};

/// Closed output range applied by a block.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Saturation {
    pub min: f32,
    pub max: f32,
}

impl Saturation {
    /// Range that never clips a finite value.
    pub const UNBOUNDED: Saturation = Saturation {
        min: f32::MIN,
        max: f32::MAX,
    };

    /// Builds a range, swapping the bounds if given in the wrong order.
    #[must_use]
    pub fn new(min: f32, max: f32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    #[must_use]
    pub fn apply(&self, value: f32) -> f32 {
        if value > self.max {
            self.max
        } else if value < self.min {
            self.min
        } else {
            value
        }
    }
}

impl Default for Saturation {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}
