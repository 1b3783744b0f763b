//! AC/DC front-end: AC mains contactor, optional precharge relay and a
//! regulated capacitor bank.

use heapless::Vec;

use crate::{
    dsp::{Iir2p2z, Iir2p2zCoeffs, Saturation},
    event_manager::InterlockKind,
    io::{CountdownTimer, DigitalIo, Hardware, OutputPin, PinSnapshot, PwmOutput, StatusPin},
    parameters::{ParamId, ParameterBank},
    ps_module::{PsModel, PsModule, PsState, ShutdownHook},
    sequencing::{self, ContactorStage, SequenceAbort},
    signals::{Signal, SignalBank},
};

use super::{AnyFeedback, FeedbackPath, Topology, analog_max, millis_to_micros, sample};

/// Hard interlocks, in bit order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FacAcDcHard {
    CapBankOvervoltage,
    RectifierOvercurrent,
    AcMainsContactorFault,
    PrechargeRelayFault,
}

impl FacAcDcHard {
    pub const NAMES: [&'static str; 4] = [
        "capbank_overvoltage",
        "rectifier_overcurrent",
        "ac_mains_contactor_fault",
        "precharge_relay_fault",
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Drive, auxiliary contact and welded-contact fault of every switched
/// element, checked open before a reset may return to `Off`.
const SWITCHED_CONTACTS: [(OutputPin, StatusPin, FacAcDcHard); 2] = [
    (
        OutputPin::AcMainsContactor,
        StatusPin::AcMainsContactorClosed,
        FacAcDcHard::AcMainsContactorFault,
    ),
    (
        OutputPin::PrechargeRelay,
        StatusPin::PrechargeRelayClosed,
        FacAcDcHard::PrechargeRelayFault,
    ),
];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FacAcDcConfig {
    pub max_v_capbank: f32,
    pub max_i_rectifier: f32,
    pub contactor_close_timeout_us: u32,
    pub contactor_open_timeout_us: u32,
    /// Precharge relay close timeout; `None` when the supply has no relay.
    pub precharge_timeout_us: Option<u32>,
    pub notch_hz: f32,
    pub notch_radius: f32,
}

impl Default for FacAcDcConfig {
    fn default() -> Self {
        Self {
            max_v_capbank: 250.0,
            max_i_rectifier: 200.0,
            contactor_close_timeout_us: 100_000,
            contactor_open_timeout_us: 50_000,
            precharge_timeout_us: None,
            notch_hz: 2.0,
            notch_radius: 0.999,
        }
    }
}

impl FacAcDcConfig {
    /// Analog table slots: 0 cap-bank voltage, 1 rectifier current,
    /// 2 close timeout (ms), 3 open timeout (ms), 4 precharge timeout (ms,
    /// zero disables the stage), 5 notch frequency (Hz).
    #[must_use]
    pub fn from_parameters(params: &ParameterBank) -> Self {
        let defaults = Self::default();
        let millis = |index: usize, fallback: u32| {
            params
                .get_f32(ParamId::AnalogVarMax, index)
                .map_or(fallback, millis_to_micros)
        };
        let precharge = match params.get_f32(ParamId::AnalogVarMax, 4) {
            Ok(ms) => Some(millis_to_micros(ms)).filter(|us| *us > 0),
            Err(_) => defaults.precharge_timeout_us,
        };

        Self {
            max_v_capbank: analog_max(params, 0, defaults.max_v_capbank),
            max_i_rectifier: analog_max(params, 1, defaults.max_i_rectifier),
            contactor_close_timeout_us: millis(2, defaults.contactor_close_timeout_us),
            contactor_open_timeout_us: millis(3, defaults.contactor_open_timeout_us),
            precharge_timeout_us: precharge,
            notch_hz: analog_max(params, 5, defaults.notch_hz),
            notch_radius: defaults.notch_radius,
        }
    }

    fn stages(&self) -> Vec<ContactorStage, 2> {
        let mut stages = Vec::new();
        if let Some(timeout_us) = self.precharge_timeout_us {
            let _ = stages.push(ContactorStage {
                drive: OutputPin::PrechargeRelay,
                status: StatusPin::PrechargeRelayClosed,
                timeout_us,
                fault: FacAcDcHard::PrechargeRelayFault.index(),
            });
        }
        let _ = stages.push(ContactorStage {
            drive: OutputPin::AcMainsContactor,
            status: StatusPin::AcMainsContactorClosed,
            timeout_us: self.contactor_close_timeout_us,
            fault: FacAcDcHard::AcMainsContactorFault.index(),
        });
        stages
    }
}

/// Channel order: cap-bank voltage, rectifier output current. The cap-bank
/// voltage is notch filtered before it reaches the controller.
#[derive(Clone, Debug, PartialEq)]
pub struct FacAcDcFeedback {
    max_i_rectifier: f32,
    notch: Iir2p2z,
}

impl FacAcDcFeedback {
    #[must_use]
    pub fn new(config: &FacAcDcConfig, control_hz: f32) -> Self {
        Self {
            max_i_rectifier: config.max_i_rectifier,
            notch: Iir2p2z::new(
                Iir2p2zCoeffs::notch(config.notch_radius, config.notch_hz, control_hz),
                Saturation::UNBOUNDED,
            ),
        }
    }
}

impl FeedbackPath for FacAcDcFeedback {
    fn channel_count(&self) -> usize {
        2
    }

    fn publish(&mut self, samples: &[f32], signals: &SignalBank) -> f32 {
        let v_capbank = sample(samples, 0);
        let filtered = self.notch.run(v_capbank);
        signals.publish(Signal::VCapBank, v_capbank);
        signals.publish(Signal::VCapBankFiltered, filtered);
        signals.publish(Signal::IRectifier, sample(samples, 1));
        filtered
    }

    fn overcurrent(&self, signals: &SignalBank) -> u32 {
        if signals.read(Signal::IRectifier).abs() > self.max_i_rectifier {
            1 << FacAcDcHard::RectifierOvercurrent.index()
        } else {
            0
        }
    }

    fn reset(&mut self) {
        self.notch.reset();
    }
}

pub struct FacAcDc<P, D, T> {
    config: FacAcDcConfig,
    hardware: Hardware<P, D, T>,
}

impl<P, D, T> FacAcDc<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    #[must_use]
    pub const fn new(config: FacAcDcConfig, hardware: Hardware<P, D, T>) -> Self {
        Self { config, hardware }
    }

    #[must_use]
    pub const fn config(&self) -> &FacAcDcConfig {
        &self.config
    }

    #[must_use]
    pub const fn hardware(&self) -> &Hardware<P, D, T> {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware<P, D, T> {
        &mut self.hardware
    }

    fn energize(&mut self, module: &PsModule) -> Result<(), SequenceAbort> {
        module.cfg_operation_mode(PsState::Initializing);
        sequencing::run_stages(
            module,
            &mut self.hardware.io,
            &mut self.hardware.timer,
            &self.config.stages(),
        )?;
        module.open_loop();
        module.cfg_operation_mode(PsState::SlowRef);
        self.hardware.pwm.enable_all();
        Ok(())
    }
}

impl<P, D, T> ShutdownHook for FacAcDc<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    fn turn_off(&mut self, module: &PsModule) {
        self.hardware.pwm.disable_all();
        self.hardware.io.set_output(OutputPin::PrechargeRelay, false);
        sequencing::open_contactor(
            &mut self.hardware.io,
            &mut self.hardware.timer,
            OutputPin::AcMainsContactor,
            self.config.contactor_open_timeout_us,
        );
        if module.state() != PsState::Interlock {
            module.cfg_operation_mode(PsState::Off);
        }
    }
}

impl<P, D, T> Topology for FacAcDc<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    fn model(&self) -> PsModel {
        PsModel::FacAcDc
    }

    fn hard_interlocks(&self) -> &'static [&'static str] {
        &FacAcDcHard::NAMES
    }

    fn soft_interlocks(&self) -> &'static [&'static str] {
        &[]
    }

    fn feedback(&self, control_hz: f32) -> AnyFeedback {
        AnyFeedback::FacAcDc(FacAcDcFeedback::new(&self.config, control_hz))
    }

    fn turn_on(&mut self, module: &PsModule, _signals: &SignalBank) -> Result<(), SequenceAbort> {
        if module.state() != PsState::Off {
            return Ok(());
        }
        let result = self.energize(module);
        if result.is_err() && module.take_shutdown_request() {
            self.turn_off(module);
        }
        result
    }

    fn check_interlocks(&mut self, module: &PsModule, signals: &SignalBank) {
        if signals.read(Signal::VCapBank).abs() > self.config.max_v_capbank {
            module.set_hard_interlock(FacAcDcHard::CapBankOvervoltage.index(), self);
        }

        let pins = PinSnapshot::capture(&self.hardware.io, &[StatusPin::AcMainsContactorClosed]);
        let closed = pins.is_high(StatusPin::AcMainsContactorClosed);
        let running = module.state() > PsState::Interlock;
        if closed != running {
            module.set_hard_interlock(FacAcDcHard::AcMainsContactorFault.index(), self);
        }
    }

    fn reset_interlocks(&mut self, module: &PsModule) {
        module.clear_interlocks();
        if module.state() >= PsState::Initializing {
            return;
        }

        let status = SWITCHED_CONTACTS.map(|(_, pin, _)| pin);
        let pins = PinSnapshot::capture(&self.hardware.io, &status);
        if SWITCHED_CONTACTS.iter().any(|(_, pin, _)| pins.is_high(*pin)) {
            for (drive, _, _) in SWITCHED_CONTACTS {
                self.hardware.io.set_output(drive, false);
            }
            self.hardware.timer.delay_us(self.config.contactor_open_timeout_us);
        }

        let pins = PinSnapshot::capture(&self.hardware.io, &status);
        let stuck = SWITCHED_CONTACTS.into_iter().find(|(_, pin, _)| pins.is_high(*pin));
        match stuck {
            None => module.cfg_operation_mode(PsState::Off),
            Some((_, _, fault)) => {
                module.force_interlock(InterlockKind::Hard, fault.index(), self);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{ParamType, ParamValue};

    #[test]
    fn precharge_stage_runs_first_when_configured() {
        let config = FacAcDcConfig {
            precharge_timeout_us: Some(20_000),
            ..FacAcDcConfig::default()
        };
        let stages = config.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].drive, OutputPin::PrechargeRelay);
        assert_eq!(stages[1].fault, FacAcDcHard::AcMainsContactorFault.index());

        assert_eq!(FacAcDcConfig::default().stages().len(), 1);
    }

    #[test]
    fn zero_precharge_timeout_disables_stage() {
        let mut params = ParameterBank::new();
        params
            .define(ParamId::AnalogVarMax, ParamType::F32, 6)
            .expect("valid length");
        params
            .set(ParamId::AnalogVarMax, 2, ParamValue::F32(10.0))
            .expect("in range");

        let config = FacAcDcConfig::from_parameters(&params);
        assert_eq!(config.precharge_timeout_us, None);
        assert_eq!(config.contactor_close_timeout_us, 10_000);
    }

    #[test]
    fn feedback_flags_rectifier_overcurrent() {
        let signals = SignalBank::new();
        let mut feedback = FacAcDcFeedback::new(&FacAcDcConfig::default(), 20_000.0);

        feedback.publish(&[100.0, 10.0], &signals);
        assert_eq!(feedback.overcurrent(&signals), 0);
        assert!((signals.read(Signal::VCapBank) - 100.0).abs() < f32::EPSILON);

        feedback.publish(&[100.0, -250.0], &signals);
        assert_eq!(
            feedback.overcurrent(&signals),
            1 << FacAcDcHard::RectifierOvercurrent.index()
        );
    }
}
