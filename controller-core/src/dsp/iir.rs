//! Two-pole, two-zero recursive filter.
//!
//! `y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]`, with the
//! output clamped before it is fed back.

use super::Saturation;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Iir2p2zCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Iir2p2zCoeffs {
    /// Coefficients of a filter whose output equals its input.
    pub const PASS_THROUGH: Iir2p2zCoeffs = Iir2p2zCoeffs {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Notch at `notch_hz` with pole radius `radius` (0 < radius < 1, closer
    /// to one is narrower), normalised to unity gain at DC.
    ///
    /// Falls back to [`Iir2p2zCoeffs::PASS_THROUGH`] when the notch frequency
    /// is not strictly between zero and Nyquist.
    #[must_use]
    pub fn notch(radius: f32, notch_hz: f32, sampling_hz: f32) -> Self {
        if !(sampling_hz > 0.0 && notch_hz > 0.0 && notch_hz < 0.5 * sampling_hz) {
            return Self::PASS_THROUGH;
        }
        let cos_w = libm::cosf(2.0 * core::f32::consts::PI * notch_hz / sampling_hz);
        let a1 = -2.0 * radius * cos_w;
        let a2 = radius * radius;
        let gain = (1.0 + a1 + a2) / (2.0 - 2.0 * cos_w);
        Self {
            b0: gain,
            b1: -2.0 * cos_w * gain,
            b2: gain,
            a1,
            a2,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Iir2p2z {
    coeffs: Iir2p2zCoeffs,
    limits: Saturation,
    inputs: [f32; 2],
    outputs: [f32; 2],
}

impl Iir2p2z {
    #[must_use]
    pub const fn new(coeffs: Iir2p2zCoeffs, limits: Saturation) -> Self {
        Self {
            coeffs,
            limits,
            inputs: [0.0; 2],
            outputs: [0.0; 2],
        }
    }

    pub fn run(&mut self, input: f32) -> f32 {
        let c = &self.coeffs;
        let raw = c.b0 * input + c.b1 * self.inputs[0] + c.b2 * self.inputs[1]
            - c.a1 * self.outputs[0]
            - c.a2 * self.outputs[1];
        let output = self.limits.apply(raw);

        self.inputs = [input, self.inputs[0]];
        self.outputs = [output, self.outputs[0]];
        output
    }

    #[must_use]
    pub const fn output(&self) -> f32 {
        self.outputs[0]
    }

    #[must_use]
    pub const fn coeffs(&self) -> &Iir2p2zCoeffs {
        &self.coeffs
    }

    pub fn reset(&mut self) {
        self.inputs = [0.0; 2];
        self.outputs = [0.0; 2];
    }
}
