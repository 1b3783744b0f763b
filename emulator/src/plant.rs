//! Simulated power stage: contactors with closing delay, DC link or
//! capacitor bank, and an RL magnet load.
//!
//! The core owns its peripherals through separate handles (the control loop
//! holds the modulator and ADC, the topology holds GPIO and the countdown),
//! so every handle here points at one shared [`Plant`].

use std::cell::RefCell;
use std::rc::Rc;

use psu_core::io::{CountdownTimer, DigitalIo, OutputPin, PwmOutput, SampleSource, StatusPin};
use psu_core::ps_module::PsModel;

/// Microseconds the plant advances per `expired` poll of [`PlantTimer`].
pub const TIMER_POLL_US: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlantParams {
    pub r_load: f32,
    pub l_load: f32,
    pub v_dclink: f32,
    pub dclink_tau_us: f32,
    pub v_ac_peak: f32,
    pub capbank_tau_us: f32,
    pub r_capbank_load: f32,
    pub contactor_delay_us: u64,
}

impl Default for PlantParams {
    fn default() -> Self {
        Self {
            r_load: 4.0,
            l_load: 0.01,
            v_dclink: 48.0,
            dclink_tau_us: 2_000.0,
            v_ac_peak: 220.0,
            capbank_tau_us: 20_000.0,
            r_capbank_load: 10.0,
            contactor_delay_us: 5_000,
        }
    }
}

/// Failures the operator can inject from the emulator prompt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    /// Contactors stay closed whatever the drive.
    pub welded: bool,
    /// Load resistance collapses.
    pub short: bool,
    /// DC link or mains supply lost.
    pub sag: bool,
    pub dcct_failed: [bool; 2],
}

#[derive(Clone, Copy, Debug, Default)]
struct Contact {
    driven: bool,
    closed: bool,
    since_us: u64,
}

#[derive(Debug)]
pub struct Plant {
    model: PsModel,
    params: PlantParams,
    faults: Faults,
    now_us: u64,
    contacts: [Contact; 3],
    duty: [f32; 2],
    enabled: [bool; 2],
    i_load: f32,
    v_dclink: f32,
    v_capbank: f32,
    i_rectifier: f32,
}

fn slot(pin: OutputPin) -> usize {
    match pin {
        OutputPin::DcLinkContactor => 0,
        OutputPin::AcMainsContactor => 1,
        OutputPin::PrechargeRelay => 2,
    }
}

impl Plant {
    pub fn new(model: PsModel, params: PlantParams) -> Self {
        Self {
            model,
            params,
            faults: Faults::default(),
            now_us: 0,
            contacts: [Contact::default(); 3],
            duty: [0.0; 2],
            enabled: [false; 2],
            i_load: 0.0,
            v_dclink: 0.0,
            v_capbank: 0.0,
            i_rectifier: 0.0,
        }
    }

    pub fn shared(model: PsModel, params: PlantParams) -> SharedPlant {
        Rc::new(RefCell::new(Self::new(model, params)))
    }

    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    pub fn faults(&self) -> Faults {
        self.faults
    }

    pub fn faults_mut(&mut self) -> &mut Faults {
        &mut self.faults
    }

    pub fn i_load(&self) -> f32 {
        self.i_load
    }

    pub fn v_dclink(&self) -> f32 {
        self.v_dclink
    }

    pub fn v_capbank(&self) -> f32 {
        self.v_capbank
    }

    pub fn output_enabled(&self) -> bool {
        self.enabled.iter().any(|enabled| *enabled)
    }

    pub fn contact_closed(&self, pin: OutputPin) -> bool {
        self.contacts[slot(pin)].closed
    }

    /// Effective duty applied to the load.
    fn applied_duty(&self) -> f32 {
        let mut total = 0.0;
        let mut count = 0.0;
        for (duty, enabled) in self.duty.iter().zip(self.enabled) {
            if enabled {
                total += duty;
                count += 1.0;
            }
        }
        if count > 0.0 { total / count } else { 0.0 }
    }

    /// Integrates the plant over `dt_us` microseconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn advance(&mut self, dt_us: u32) {
        self.now_us += u64::from(dt_us);
        let now = self.now_us;
        let delay = self.params.contactor_delay_us;
        let welded = self.faults.welded;
        for contact in &mut self.contacts {
            if contact.closed != contact.driven
                && now.saturating_sub(contact.since_us) >= delay
                && !(welded && contact.closed)
            {
                contact.closed = contact.driven;
            }
        }

        let dt = dt_us as f32;
        match self.model {
            PsModel::Fap => self.advance_fap(dt),
            PsModel::FacAcDc => self.advance_acdc(dt),
        }
    }

    fn advance_fap(&mut self, dt_us: f32) {
        let params = self.params;
        let source = if self.contacts[slot(OutputPin::DcLinkContactor)].closed && !self.faults.sag {
            params.v_dclink
        } else {
            0.0
        };
        self.v_dclink += (source - self.v_dclink) * (dt_us / params.dclink_tau_us).min(1.0);

        let r = if self.faults.short {
            params.r_load * 0.05
        } else {
            params.r_load
        };
        let v_load = self.applied_duty() * self.v_dclink;
        let dt = dt_us * 1e-6;
        self.i_load += dt * (v_load - r * self.i_load) / params.l_load;
    }

    fn advance_acdc(&mut self, dt_us: f32) {
        let params = self.params;
        let mains = self.contacts[slot(OutputPin::AcMainsContactor)].closed && !self.faults.sag;
        let precharge = self.contacts[slot(OutputPin::PrechargeRelay)].closed && !self.faults.sag;
        // an open-loop duty of zero still rectifies through the diodes
        let target = if mains {
            params.v_ac_peak * (0.5 + 0.5 * self.applied_duty())
        } else if precharge {
            0.2 * params.v_ac_peak
        } else {
            0.0
        };
        let previous = self.v_capbank;
        self.v_capbank += (target - self.v_capbank) * (dt_us / params.capbank_tau_us).min(1.0);
        let charging = (self.v_capbank - previous) / (dt_us * 1e-6) * 1e-3;
        self.i_rectifier = charging + self.v_capbank / params.r_capbank_load;
    }

    fn sample(&self, channel: usize) -> f32 {
        match self.model {
            PsModel::Fap => match channel {
                0 => self.dcct(0),
                1 => self.dcct(1),
                2 => self.applied_duty() * self.v_dclink,
                3 => self.v_dclink,
                4 | 5 => 0.5 * self.i_load,
                _ => 0.0,
            },
            PsModel::FacAcDc => match channel {
                0 => self.v_capbank,
                1 => self.i_rectifier,
                _ => 0.0,
            },
        }
    }

    fn dcct(&self, index: usize) -> f32 {
        if self.faults.dcct_failed[index] {
            0.0
        } else {
            self.i_load
        }
    }

    fn status(&self, pin: StatusPin) -> bool {
        match pin {
            StatusPin::DcLinkContactorClosed => self.contacts[0].closed,
            StatusPin::AcMainsContactorClosed => self.contacts[1].closed,
            StatusPin::PrechargeRelayClosed => self.contacts[2].closed,
            StatusPin::Dcct1Ok => !self.faults.dcct_failed[0],
            StatusPin::Dcct2Ok => !self.faults.dcct_failed[1],
        }
    }

    fn drive(&mut self, pin: OutputPin, high: bool) {
        let now = self.now_us;
        let contact = &mut self.contacts[slot(pin)];
        if contact.driven != high {
            contact.driven = high;
            contact.since_us = now;
        }
    }
}

pub type SharedPlant = Rc<RefCell<Plant>>;

/// Bridge modulator handle.
pub struct PlantPwm(pub SharedPlant);

impl PwmOutput for PlantPwm {
    fn channel_count(&self) -> usize {
        2
    }

    fn set_duty(&mut self, channel: usize, duty: f32) {
        if let Some(slot) = self.0.borrow_mut().duty.get_mut(channel) {
            *slot = duty;
        }
    }

    fn enable_output(&mut self, channel: usize) {
        if let Some(slot) = self.0.borrow_mut().enabled.get_mut(channel) {
            *slot = true;
        }
    }

    fn disable_output(&mut self, channel: usize) {
        if let Some(slot) = self.0.borrow_mut().enabled.get_mut(channel) {
            *slot = false;
        }
    }
}

/// Contactor drives and status contacts.
pub struct PlantIo(pub SharedPlant);

impl DigitalIo for PlantIo {
    fn is_high(&self, pin: StatusPin) -> bool {
        self.0.borrow().status(pin)
    }

    fn set_output(&mut self, pin: OutputPin, high: bool) {
        self.0.borrow_mut().drive(pin, high);
    }
}

/// Countdown whose polls move simulated time forward, so blocking waits in
/// the sequencing code see contactors settle.
pub struct PlantTimer {
    plant: SharedPlant,
    deadline_us: u64,
}

impl PlantTimer {
    pub fn new(plant: SharedPlant) -> Self {
        Self {
            plant,
            deadline_us: 0,
        }
    }
}

impl CountdownTimer for PlantTimer {
    fn start(&mut self, micros: u32) {
        self.deadline_us = self.plant.borrow().now_us + u64::from(micros);
    }

    fn expired(&mut self) -> bool {
        let mut plant = self.plant.borrow_mut();
        plant.advance(TIMER_POLL_US);
        plant.now_us >= self.deadline_us
    }
}

/// Noise-free ADC reading the plant state.
pub struct PlantAdc(pub SharedPlant);

impl SampleSource for PlantAdc {
    fn next_raw(&mut self, channel: usize) -> f32 {
        self.0.borrow().sample(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fap() -> SharedPlant {
        Plant::shared(PsModel::Fap, PlantParams::default())
    }

    #[test]
    fn contactor_closes_after_its_delay() {
        let plant = fap();
        let mut io = PlantIo(plant.clone());
        io.set_output(OutputPin::DcLinkContactor, true);

        plant.borrow_mut().advance(4_000);
        assert!(!io.is_high(StatusPin::DcLinkContactorClosed));
        plant.borrow_mut().advance(1_000);
        assert!(io.is_high(StatusPin::DcLinkContactorClosed));
    }

    #[test]
    fn welded_contactor_ignores_open_drive() {
        let plant = fap();
        let mut io = PlantIo(plant.clone());
        io.set_output(OutputPin::DcLinkContactor, true);
        plant.borrow_mut().advance(10_000);
        plant.borrow_mut().faults_mut().welded = true;

        io.set_output(OutputPin::DcLinkContactor, false);
        plant.borrow_mut().advance(50_000);
        assert!(io.is_high(StatusPin::DcLinkContactorClosed));
    }

    #[test]
    fn load_current_settles_at_ohmic_value() {
        let plant = fap();
        PlantIo(plant.clone()).set_output(OutputPin::DcLinkContactor, true);
        let mut pwm = PlantPwm(plant.clone());
        pwm.enable_all();
        pwm.set_duty(0, 0.5);
        pwm.set_duty(1, 0.5);

        for _ in 0..40_000 {
            plant.borrow_mut().advance(50);
        }
        let expected = 0.5 * 48.0 / 4.0;
        let i_load = plant.borrow().i_load();
        assert!((i_load - expected).abs() < 0.05, "{i_load}");
        assert!((PlantAdc(plant).next_raw(4) - expected / 2.0).abs() < 0.05);
    }

    #[test]
    fn timer_polls_advance_simulated_time() {
        let plant = fap();
        let mut timer = PlantTimer::new(plant.clone());
        timer.start(1_000);
        let polls = std::iter::repeat_with(|| timer.expired())
            .take_while(|expired| !expired)
            .count();
        assert_eq!(polls, 9);
        assert_eq!(plant.borrow().now_us(), 1_000);
    }
}
