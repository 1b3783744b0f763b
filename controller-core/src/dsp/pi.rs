//! Proportional-integral controller.
//!
//! Anti-windup is the plain form: the integrator and the output are both
//! clamped to the output range. There is no back-calculation.

use super::Saturation;

/// Continuous-time gains plus the sampling rate they run at.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PiCoeffs {
    pub kp: f32,
    pub ki: f32,
    pub sampling_hz: f32,
    pub limits: Saturation,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pi {
    kp: f32,
    ki_discrete: f32,
    limits: Saturation,
    integral: f32,
    output: f32,
}

impl Pi {
    #[must_use]
    pub fn new(coeffs: PiCoeffs) -> Self {
        let ki_discrete = if coeffs.sampling_hz > 0.0 {
            coeffs.ki / coeffs.sampling_hz
        } else {
            0.0
        };
        Self {
            kp: coeffs.kp,
            ki_discrete,
            limits: coeffs.limits,
            integral: 0.0,
            output: 0.0,
        }
    }

    pub fn run(&mut self, error: f32) -> f32 {
        let proportional = self.kp * error;
        self.integral = self.limits.apply(self.integral + self.ki_discrete * error);
        self.output = self.limits.apply(proportional + self.integral);
        self.output
    }

    #[must_use]
    pub const fn output(&self) -> f32 {
        self.output
    }

    #[must_use]
    pub const fn integral(&self) -> f32 {
        self.integral
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.output = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pi(kp: f32, ki: f32) -> Pi {
        Pi::new(PiCoeffs {
            kp,
            ki,
            sampling_hz: 1_000.0,
            limits: Saturation::new(-1.0, 1.0),
        })
    }

    #[test]
    fn zero_ki_is_saturated_proportional_gain() {
        let mut controller = pi(0.5, 0.0);
        for error in [-10.0_f32, -1.0, -0.2, 0.0, 0.3, 1.5, 8.0] {
            let expected = (0.5 * error).clamp(-1.0, 1.0);
            assert!((controller.run(error) - expected).abs() < 1e-6, "{error}");
        }
        assert!(controller.integral().abs() < f32::EPSILON);
    }

    #[test]
    fn integrator_accumulates_scaled_error() {
        let mut controller = pi(0.0, 100.0);
        controller.run(0.5);
        controller.run(0.5);
        assert!((controller.output() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn integrator_is_clamped_to_output_range() {
        let mut controller = pi(0.0, 1_000.0);
        for _ in 0..1_000 {
            controller.run(10.0);
        }
        assert!((controller.integral() - 1.0).abs() < f32::EPSILON);

        // one step of negative error leaves saturation immediately
        let out = controller.run(-1.0);
        assert!(out < 1.0);

        controller.reset();
        assert!(controller.output().abs() < f32::EPSILON);
        assert!(controller.integral().abs() < f32::EPSILON);
    }
}
