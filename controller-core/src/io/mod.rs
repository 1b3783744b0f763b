//! Narrow interfaces to the peripherals the control core drives.
//!
//! Firmware implements these against real registers; the emulator and the
//! tests implement them against simulated state. No core logic depends on
//! pin numbers or peripheral layout, only on the named semantics below.

use heapless::Vec;

/// Upper bound on analog channels sampled per control period.
pub const MAX_ANALOG_CHANNELS: usize = 8;

/// PWM modulators feeding the power stage.
pub trait PwmOutput {
    /// Number of modulator channels.
    fn channel_count(&self) -> usize;

    /// Writes a duty cycle; callers saturate before calling.
    fn set_duty(&mut self, channel: usize, duty: f32);

    fn enable_output(&mut self, channel: usize);

    fn disable_output(&mut self, channel: usize);

    /// Enables every channel.
    fn enable_all(&mut self) {
        for channel in 0..self.channel_count() {
            self.enable_output(channel);
        }
    }

    /// Disables every channel.
    fn disable_all(&mut self) {
        for channel in 0..self.channel_count() {
            self.disable_output(channel);
        }
    }
}

/// Status inputs read by interlock checks and sequencing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StatusPin {
    /// DC-link contactor auxiliary contact reads closed.
    DcLinkContactorClosed,
    /// AC mains contactor auxiliary contact reads closed.
    AcMainsContactorClosed,
    /// Capacitor-bank precharge relay reads closed.
    PrechargeRelayClosed,
    /// Load DCCT 1 reports healthy.
    Dcct1Ok,
    /// Load DCCT 2 reports healthy.
    Dcct2Ok,
}

impl StatusPin {
    pub const ALL: [StatusPin; 5] = [
        StatusPin::DcLinkContactorClosed,
        StatusPin::AcMainsContactorClosed,
        StatusPin::PrechargeRelayClosed,
        StatusPin::Dcct1Ok,
        StatusPin::Dcct2Ok,
    ];

    const fn mask(self) -> u8 {
        match self {
            StatusPin::DcLinkContactorClosed => 1 << 0,
            StatusPin::AcMainsContactorClosed => 1 << 1,
            StatusPin::PrechargeRelayClosed => 1 << 2,
            StatusPin::Dcct1Ok => 1 << 3,
            StatusPin::Dcct2Ok => 1 << 4,
        }
    }
}

/// Driven outputs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputPin {
    DcLinkContactor,
    AcMainsContactor,
    PrechargeRelay,
}

/// Level-read of status pins and set/clear of output pins.
pub trait DigitalIo {
    fn is_high(&self, pin: StatusPin) -> bool;

    fn set_output(&mut self, pin: OutputPin, high: bool);
}

/// Consistent view of several status pins taken in one critical section.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PinSnapshot {
    levels: u8,
}

impl PinSnapshot {
    /// Reads `pins` with interrupts masked so the levels belong to one instant.
    #[must_use]
    pub fn capture<D: DigitalIo + ?Sized>(io: &D, pins: &[StatusPin]) -> Self {
        critical_section::with(|_| {
            let levels = pins
                .iter()
                .filter(|pin| io.is_high(**pin))
                .fold(0, |acc, pin| acc | pin.mask());
            Self { levels }
        })
    }

    #[must_use]
    pub const fn is_high(self, pin: StatusPin) -> bool {
        self.levels & pin.mask() != 0
    }
}

/// Hardware countdown used for bounded blocking waits.
pub trait CountdownTimer {
    /// Arms the timer for `micros` microseconds.
    fn start(&mut self, micros: u32);

    /// `true` once the armed interval has elapsed.
    fn expired(&mut self) -> bool;

    /// Spins until `micros` elapse.
    fn delay_us(&mut self, micros: u32) {
        self.start(micros);
        while !self.expired() {
            core::hint::spin_loop();
        }
    }
}

/// Polls `ready` until it returns `true` or `timeout_us` elapses.
///
/// The condition is evaluated once more after expiry, so a level that settles
/// exactly at the deadline still counts.
pub fn wait_until<T, F>(timer: &mut T, timeout_us: u32, mut ready: F) -> bool
where
    T: CountdownTimer + ?Sized,
    F: FnMut() -> bool,
{
    timer.start(timeout_us);
    loop {
        if ready() {
            return true;
        }
        if timer.expired() {
            return ready();
        }
        core::hint::spin_loop();
    }
}

/// Raw ADC words, one channel at a time.
pub trait SampleSource {
    /// Next buffered sample for `channel`.
    fn next_raw(&mut self, channel: usize) -> f32;
}

/// Calibration of one analog channel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AnalogChannel {
    pub gain: f32,
    pub offset: f32,
}

impl AnalogChannel {
    pub const IDENTITY: AnalogChannel = AnalogChannel {
        gain: 1.0,
        offset: 0.0,
    };
}

/// Averages `decimation` raw samples per channel and applies calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct Sampler {
    channels: Vec<AnalogChannel, MAX_ANALOG_CHANNELS>,
    decimation: u16,
    scale: f32,
}

impl Sampler {
    /// Extra channels beyond [`MAX_ANALOG_CHANNELS`] are ignored; a zero
    /// decimation factor is treated as one.
    #[must_use]
    pub fn new(channels: &[AnalogChannel], decimation: u16) -> Self {
        let decimation = decimation.max(1);
        Self {
            channels: channels
                .iter()
                .copied()
                .take(MAX_ANALOG_CHANNELS)
                .collect(),
            decimation,
            scale: 1.0 / f32::from(decimation),
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub const fn decimation(&self) -> u16 {
        self.decimation
    }

    /// Pulls one control period worth of samples.
    pub fn acquire<S: SampleSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Vec<f32, MAX_ANALOG_CHANNELS> {
        self.channels
            .iter()
            .enumerate()
            .map(|(index, calibration)| {
                let sum: f32 = (0..self.decimation)
                    .map(|_| source.next_raw(index))
                    .sum();
                sum * calibration.gain * self.scale + calibration.offset
            })
            .collect()
    }
}

/// Power-stage peripherals owned by one topology.
pub struct Hardware<P, D, T> {
    pub pwm: P,
    pub io: D,
    pub timer: T,
}

impl<P, D, T> Hardware<P, D, T> {
    #[must_use]
    pub const fn new(pwm: P, io: D, timer: T) -> Self {
        Self { pwm, io, timer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ramp {
        next: [f32; 2],
    }

    impl SampleSource for Ramp {
        fn next_raw(&mut self, channel: usize) -> f32 {
            let value = self.next[channel];
            self.next[channel] += 1.0;
            value
        }
    }

    struct Pins(u8);

    impl DigitalIo for Pins {
        fn is_high(&self, pin: StatusPin) -> bool {
            self.0 & pin.mask() != 0
        }

        fn set_output(&mut self, _: OutputPin, _: bool) {}
    }

    struct PollTimer {
        remaining: u32,
    }

    impl CountdownTimer for PollTimer {
        fn start(&mut self, micros: u32) {
            self.remaining = micros / 100;
        }

        fn expired(&mut self) -> bool {
            if self.remaining == 0 {
                return true;
            }
            self.remaining -= 1;
            false
        }
    }

    #[test]
    fn sampler_averages_and_calibrates() {
        let sampler = Sampler::new(
            &[
                AnalogChannel {
                    gain: 2.0,
                    offset: 1.0,
                },
                AnalogChannel::IDENTITY,
            ],
            4,
        );
        let mut source = Ramp { next: [0.0, 10.0] };

        let values = sampler.acquire(&mut source);
        // mean(0..4) = 1.5, mean(10..14) = 11.5
        assert!((values[0] - 4.0).abs() < f32::EPSILON);
        assert!((values[1] - 11.5).abs() < f32::EPSILON);
    }

    #[test]
    fn zero_decimation_reads_one_sample() {
        let sampler = Sampler::new(&[AnalogChannel::IDENTITY], 0);
        assert_eq!(sampler.decimation(), 1);
        let mut source = Ramp { next: [3.0, 0.0] };
        assert!((sampler.acquire(&mut source)[0] - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn snapshot_reports_only_requested_pins() {
        let pins = Pins(StatusPin::Dcct1Ok.mask() | StatusPin::DcLinkContactorClosed.mask());
        let snapshot = PinSnapshot::capture(&pins, &[StatusPin::Dcct1Ok, StatusPin::Dcct2Ok]);
        assert!(snapshot.is_high(StatusPin::Dcct1Ok));
        assert!(!snapshot.is_high(StatusPin::Dcct2Ok));
        assert!(!snapshot.is_high(StatusPin::DcLinkContactorClosed));
    }

    #[test]
    fn wait_until_times_out_or_returns_early() {
        let mut timer = PollTimer { remaining: 0 };
        assert!(!wait_until(&mut timer, 10_000, || false));

        let mut polls = 0;
        assert!(wait_until(&mut timer, 10_000, || {
            polls += 1;
            polls == 5
        }));
        assert_eq!(polls, 5);
    }
}
