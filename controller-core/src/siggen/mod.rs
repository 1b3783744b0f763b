//! Parametric reference generator used by the `Cycle` operating mode.
//!
//! The generator is sampled once per control period. While enabled each call
//! to [`SigGen::run`] produces the next sample; a finished or disabled
//! generator holds its last output.

use core::f32::consts::PI;
use core::fmt;

/// Waveform families.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SigGenKind {
    /// `amplitude * sin(w*n + phase) + offset`.
    Sine,
    /// A sine multiplied by `exp(-n / (tau * fs))`.
    DampedSine,
    /// Rise, flat-top and fall ramps repeated `num_cycles` times.
    Trapezoidal,
}

impl SigGenKind {
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            SigGenKind::Sine => 0,
            SigGenKind::DampedSine => 1,
            SigGenKind::Trapezoidal => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(SigGenKind::Sine),
            1 => Some(SigGenKind::DampedSine),
            2 => Some(SigGenKind::Trapezoidal),
            _ => None,
        }
    }
}

/// Generator parameters.
///
/// `aux` meaning depends on the waveform:
/// - `Sine`: start phase and end phase in degrees.
/// - `DampedSine`: start phase, end phase (degrees) and decay time constant `tau` in seconds.
/// - `Trapezoidal`: rise, flat and fall durations in seconds.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SigGenConfig {
    pub kind: SigGenKind,
    pub num_cycles: u16,
    pub freq_hz: f32,
    pub amplitude: f32,
    pub offset: f32,
    pub aux: [f32; 3],
}

impl Default for SigGenConfig {
    fn default() -> Self {
        Self {
            kind: SigGenKind::Sine,
            num_cycles: 1,
            freq_hz: 1.0,
            amplitude: 1.0,
            offset: 0.0,
            aux: [0.0; 3],
        }
    }
}

/// Returned when reconfiguring a running generator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SigGenBusy;

impl fmt::Display for SigGenBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("signal generator running")
    }
}

/// Sample-index boundaries derived from the configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct Timeline {
    omega: f32,
    phase: f32,
    total_samples: f32,
    decay: f32,
    rise_end: f32,
    flat_end: f32,
    fall_end: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SigGen {
    sampling_hz: f32,
    config: SigGenConfig,
    timeline: Timeline,
    enabled: bool,
    n: f32,
    cycles_done: u16,
    output: f32,
}

impl SigGen {
    #[must_use]
    pub fn new(sampling_hz: f32) -> Self {
        let mut generator = Self {
            sampling_hz,
            config: SigGenConfig::default(),
            timeline: Timeline::default(),
            enabled: false,
            n: 0.0,
            cycles_done: 0,
            output: 0.0,
        };
        generator.rebuild_timeline();
        generator
    }

    /// Disabled generator holding `config`.
    #[must_use]
    pub fn with_config(sampling_hz: f32, config: SigGenConfig) -> Self {
        let mut generator = Self::new(sampling_hz);
        generator.config = config;
        generator.rebuild_timeline();
        generator
    }

    /// Applies a new configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SigGenBusy`] while the generator is enabled.
    pub fn configure(&mut self, config: SigGenConfig) -> Result<(), SigGenBusy> {
        if self.enabled {
            return Err(SigGenBusy);
        }
        self.config = config;
        self.n = 0.0;
        self.cycles_done = 0;
        self.rebuild_timeline();
        Ok(())
    }

    #[must_use]
    pub const fn config(&self) -> &SigGenConfig {
        &self.config
    }

    /// Updates amplitude and offset; allowed while running.
    pub fn scale(&mut self, amplitude: f32, offset: f32) {
        self.config.amplitude = amplitude;
        self.config.offset = offset;
    }

    /// Starts the waveform from sample zero. No-op if already enabled.
    pub fn enable(&mut self) {
        if !self.enabled {
            self.reset();
            self.rebuild_timeline();
            self.enabled = true;
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn reset(&mut self) {
        self.n = 0.0;
        self.cycles_done = 0;
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn output(&self) -> f32 {
        self.output
    }

    /// Produces the next sample, or holds the last one when disabled.
    pub fn run(&mut self) -> f32 {
        if self.enabled {
            match self.config.kind {
                SigGenKind::Sine => self.run_sine(),
                SigGenKind::DampedSine => self.run_damped_sine(),
                SigGenKind::Trapezoidal => self.run_trapezoidal(),
            }
        }
        self.output
    }

    fn rebuild_timeline(&mut self) {
        let fs = self.sampling_hz;
        let cfg = &mut self.config;
        let mut timeline = Timeline::default();

        match cfg.kind {
            SigGenKind::Sine | SigGenKind::DampedSine => {
                if cfg.num_cycles == 0 {
                    cfg.freq_hz = libm::fabsf(libm::roundf(cfg.freq_hz));
                }
                timeline.omega = if fs > 0.0 {
                    2.0 * PI * cfg.freq_hz / fs
                } else {
                    0.0
                };
                timeline.phase = PI * cfg.aux[0] / 180.0;

                let mut periods = f32::from(cfg.num_cycles) + (cfg.aux[1] - cfg.aux[0]) / 360.0;
                if cfg.aux[0] > cfg.aux[1] {
                    periods += 1.0;
                }
                timeline.total_samples = if cfg.freq_hz > 0.0 {
                    periods * fs / cfg.freq_hz
                } else {
                    0.0
                };

                if cfg.kind == SigGenKind::DampedSine && cfg.aux[2] > 0.0 && fs > 0.0 {
                    timeline.decay = -(1.0 / cfg.aux[2]) / fs;
                }
            }
            SigGenKind::Trapezoidal => {
                cfg.freq_hz = 0.0;
                timeline.rise_end = cfg.aux[0] * fs;
                timeline.flat_end = (cfg.aux[0] + cfg.aux[1]) * fs;
                timeline.fall_end = (cfg.aux[0] + cfg.aux[1] + cfg.aux[2]) * fs;
            }
        }

        self.timeline = timeline;
    }

    fn run_sine(&mut self) {
        let t = self.timeline;
        self.output = self.config.amplitude * libm::sinf(t.omega * self.n + t.phase)
            + self.config.offset;
        self.n += 1.0;

        if t.total_samples > 0.0 {
            if self.n >= t.total_samples {
                self.disable();
            }
        } else if self.n >= self.sampling_hz {
            self.n = 0.0;
        }
    }

    fn run_damped_sine(&mut self) {
        let t = self.timeline;
        if self.n < t.total_samples {
            self.output = self.config.amplitude
                * libm::expf(t.decay * self.n)
                * libm::sinf(t.omega * self.n + t.phase)
                + self.config.offset;
            self.n += 1.0;
        } else {
            self.disable();
        }
    }

    fn run_trapezoidal(&mut self) {
        let t = self.timeline;
        let amplitude = self.config.amplitude;
        let offset = self.config.offset;

        if self.cycles_done >= self.config.num_cycles {
            self.disable();
            self.cycles_done = 0;
            return;
        }

        if self.n < t.rise_end {
            self.output = amplitude * self.n / t.rise_end + offset;
        } else if self.n < t.flat_end {
            self.output = amplitude + offset;
        } else if self.n < t.fall_end {
            let fall_len = t.fall_end - t.flat_end;
            self.output = amplitude * (t.flat_end - self.n) / fall_len + amplitude + offset;
        } else {
            self.cycles_done += 1;
            self.n = 0.0;
        }
        self.n += 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f32 = 1_000.0;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn sine_produces_expected_samples_and_stops() {
        let mut generator = SigGen::new(FS);
        generator
            .configure(SigGenConfig {
                kind: SigGenKind::Sine,
                num_cycles: 2,
                freq_hz: 10.0,
                amplitude: 2.0,
                offset: 1.0,
                aux: [0.0; 3],
            })
            .expect("idle generator");
        generator.enable();

        assert!(close(generator.run(), 1.0));
        for _ in 0..24 {
            generator.run();
        }
        // 25 samples in: a quarter period has elapsed
        assert!(close(generator.run(), 3.0));

        let mut samples = 26;
        while generator.is_enabled() {
            generator.run();
            samples += 1;
            assert!(samples <= 200, "generator never stopped");
        }
        assert_eq!(samples, 200);
    }

    #[test]
    fn continuous_sine_rounds_frequency() {
        let mut generator = SigGen::new(FS);
        generator
            .configure(SigGenConfig {
                kind: SigGenKind::Sine,
                num_cycles: 0,
                freq_hz: -4.6,
                ..SigGenConfig::default()
            })
            .expect("idle generator");
        assert!(close(generator.config().freq_hz, 5.0));

        generator.enable();
        for _ in 0..5_000 {
            generator.run();
        }
        assert!(generator.is_enabled());
    }

    #[test]
    fn damped_sine_decays() {
        let mut generator = SigGen::new(FS);
        generator
            .configure(SigGenConfig {
                kind: SigGenKind::DampedSine,
                num_cycles: 5,
                freq_hz: 10.0,
                amplitude: 1.0,
                offset: 0.0,
                aux: [90.0, 90.0, 0.1],
            })
            .expect("idle generator");
        generator.enable();

        let first = generator.run();
        for _ in 0..99 {
            generator.run();
        }
        let after_one_period = generator.run();
        assert!(close(first, 1.0));
        assert!(close(after_one_period, libm::expf(-1.0)));
    }

    #[test]
    fn trapezoid_walks_through_phases() {
        let mut generator = SigGen::new(FS);
        generator
            .configure(SigGenConfig {
                kind: SigGenKind::Trapezoidal,
                num_cycles: 1,
                freq_hz: 0.0,
                amplitude: 4.0,
                offset: 1.0,
                aux: [0.004, 0.002, 0.004],
            })
            .expect("idle generator");
        generator.enable();

        let samples: heapless::Vec<f32, 16> = (0..11).map(|_| generator.run()).collect();
        let expected = [1.0, 2.0, 3.0, 4.0, 5.0, 5.0, 5.0, 4.0, 3.0, 2.0, 2.0];
        for (index, (got, want)) in samples.iter().zip(expected).enumerate() {
            assert!(close(*got, want), "sample {index}: {got} != {want}");
        }

        while generator.is_enabled() {
            generator.run();
        }
        assert!(!generator.is_enabled());
    }

    #[test]
    fn configure_rejected_while_running() {
        let mut generator = SigGen::new(FS);
        generator.enable();
        assert_eq!(
            generator.configure(SigGenConfig::default()),
            Err(SigGenBusy)
        );
        generator.disable();
        let held = generator.run();
        assert!(close(generator.run(), held));
    }
}
