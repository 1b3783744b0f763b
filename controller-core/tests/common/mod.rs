//! Simulated peripherals shared by the integration tests.
#![allow(dead_code)]

use psu_core::{
    event_manager::EventTimes,
    io::{CountdownTimer, DigitalIo, Hardware, OutputPin, PwmOutput, SampleSource, StatusPin},
    ps_module::{PsModel, PsModule, PsState, ShutdownHook},
};

/// Microseconds consumed by one `expired` poll of [`PollTimer`].
pub const POLL_US: u32 = 100;

#[derive(Debug, Default)]
pub struct MockPwm {
    pub duty: [f32; 2],
    pub enabled: [bool; 2],
}

impl MockPwm {
    pub fn any_enabled(&self) -> bool {
        self.enabled.iter().any(|enabled| *enabled)
    }
}

impl PwmOutput for MockPwm {
    fn channel_count(&self) -> usize {
        2
    }

    fn set_duty(&mut self, channel: usize, duty: f32) {
        self.duty[channel] = duty;
    }

    fn enable_output(&mut self, channel: usize) {
        self.enabled[channel] = true;
    }

    fn disable_output(&mut self, channel: usize) {
        self.enabled[channel] = false;
    }
}

/// Contacts mirror their drive unless stuck; DCCTs report healthy.
#[derive(Debug, Default)]
pub struct SimPins {
    pub driven: [bool; 3],
    pub drive_history: heapless::Vec<(OutputPin, bool), 32>,
    pub stuck_open: [bool; 3],
    pub stuck_closed: [bool; 3],
}

fn slot(pin: OutputPin) -> usize {
    match pin {
        OutputPin::DcLinkContactor => 0,
        OutputPin::AcMainsContactor => 1,
        OutputPin::PrechargeRelay => 2,
    }
}

impl SimPins {
    pub fn stuck_open(pin: OutputPin) -> Self {
        let mut pins = Self::default();
        pins.stuck_open[slot(pin)] = true;
        pins
    }

    pub fn is_driven(&self, pin: OutputPin) -> bool {
        self.driven[slot(pin)]
    }

    pub fn was_ever_driven(&self, pin: OutputPin) -> bool {
        self.drive_history
            .iter()
            .any(|(driven, high)| *driven == pin && *high)
    }

    fn contact(&self, pin: OutputPin) -> bool {
        let slot = slot(pin);
        self.stuck_closed[slot] || (self.driven[slot] && !self.stuck_open[slot])
    }
}

impl DigitalIo for SimPins {
    fn is_high(&self, pin: StatusPin) -> bool {
        match pin {
            StatusPin::DcLinkContactorClosed => self.contact(OutputPin::DcLinkContactor),
            StatusPin::AcMainsContactorClosed => self.contact(OutputPin::AcMainsContactor),
            StatusPin::PrechargeRelayClosed => self.contact(OutputPin::PrechargeRelay),
            StatusPin::Dcct1Ok | StatusPin::Dcct2Ok => true,
        }
    }

    fn set_output(&mut self, pin: OutputPin, high: bool) {
        self.driven[slot(pin)] = high;
        let _ = self.drive_history.push((pin, high));
    }
}

/// Countdown that advances [`POLL_US`] per poll and keeps the total.
#[derive(Debug, Default)]
pub struct PollTimer {
    remaining_us: u32,
    pub elapsed_us: u64,
}

impl CountdownTimer for PollTimer {
    fn start(&mut self, micros: u32) {
        self.remaining_us = micros;
    }

    fn expired(&mut self) -> bool {
        if self.remaining_us == 0 {
            return true;
        }
        let step = self.remaining_us.min(POLL_US);
        self.remaining_us -= step;
        self.elapsed_us += u64::from(step);
        false
    }
}

pub fn hardware(pins: SimPins) -> Hardware<MockPwm, SimPins, PollTimer> {
    Hardware::new(MockPwm::default(), pins, PollTimer::default())
}

/// Analog front-end returning one fixed raw value per channel.
#[derive(Debug, Default)]
pub struct FixedSource(pub [f32; 6]);

impl SampleSource for FixedSource {
    fn next_raw(&mut self, channel: usize) -> f32 {
        self.0.get(channel).copied().unwrap_or(0.0)
    }
}

/// Turn-off hook that only counts its invocations.
#[derive(Debug, Default)]
pub struct CountingHook {
    pub calls: u32,
}

impl ShutdownHook for CountingHook {
    fn turn_off(&mut self, _module: &PsModule) {
        self.calls += 1;
    }
}

/// FAP module at `timebase_hz` with every event on the same windows.
pub fn fap_module(timebase_hz: u32, times: EventTimes) -> PsModule {
    let module = PsModule::new();
    module.init(PsModel::Fap, timebase_hz, &[times; 8], &[times; 4]);
    module.cfg_operation_mode(PsState::Off);
    module
}

pub fn assert_close(actual: f32, expected: f32) {
    assert!((actual - expected).abs() < 1e-4, "{actual} != {expected}");
}
