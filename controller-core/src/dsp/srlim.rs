//! Slew-rate limiter for reference signals.

/// Whether the limiter shapes its input or passes it through unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SrlimMode {
    Use,
    Bypass,
}

/// Bounds the per-sample change of a signal to `max_slewrate / sampling_hz`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SlewRateLimiter {
    max_delta: f32,
    output: f32,
}

impl SlewRateLimiter {
    /// `max_slewrate` is in units per second. A non-positive sampling rate
    /// freezes the output.
    #[must_use]
    pub fn new(max_slewrate: f32, sampling_hz: f32) -> Self {
        let max_delta = if sampling_hz > 0.0 {
            max_slewrate.abs() / sampling_hz
        } else {
            0.0
        };
        Self {
            max_delta,
            output: 0.0,
        }
    }

    #[must_use]
    pub const fn max_delta(&self) -> f32 {
        self.max_delta
    }

    pub fn run(&mut self, input: f32, mode: SrlimMode) -> f32 {
        self.output = match mode {
            SrlimMode::Bypass => input,
            SrlimMode::Use => {
                let delta = input - self.output;
                if delta > self.max_delta {
                    self.output + self.max_delta
                } else if delta < -self.max_delta {
                    self.output - self.max_delta
                } else {
                    input
                }
            }
        };
        self.output
    }

    #[must_use]
    pub const fn output(&self) -> f32 {
        self.output
    }

    /// Starts the next ramp from `value`, e.g. the measured output.
    pub fn preset(&mut self, value: f32) {
        self.output = value;
    }

    pub fn reset(&mut self) {
        self.output = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_toward_step_at_configured_rate() {
        let mut srlim = SlewRateLimiter::new(1_000.0, 10_000.0);
        let mut last = 0.0;
        for _ in 0..9 {
            let out = srlim.run(1.0, SrlimMode::Use);
            assert!((out - last - 0.1).abs() < 1e-5);
            last = out;
        }
        assert!((srlim.run(1.0, SrlimMode::Use) - 1.0).abs() < 1e-5);
        assert!((srlim.run(1.0, SrlimMode::Use) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ramps_down_symmetrically() {
        let mut srlim = SlewRateLimiter::new(-5.0, 10.0);
        srlim.preset(2.0);
        assert!((srlim.run(0.0, SrlimMode::Use) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn bypass_tracks_input() {
        let mut srlim = SlewRateLimiter::new(1.0, 10_000.0);
        assert!((srlim.run(50.0, SrlimMode::Bypass) - 50.0).abs() < f32::EPSILON);
        srlim.reset();
        assert!(srlim.output().abs() < f32::EPSILON);
    }
}
