//! DC/DC stage fed from a DC link through one contactor, with two load
//! DCCTs and two parallel IGBTs.

use crate::{
    event_manager::InterlockKind,
    io::{CountdownTimer, DigitalIo, Hardware, OutputPin, PinSnapshot, PwmOutput, StatusPin},
    parameters::{ParamId, ParameterBank},
    ps_module::{PsModel, PsModule, PsState, ShutdownHook},
    sequencing::{self, ContactorStage, SequenceAbort},
    signals::{Signal, SignalBank},
};

use super::{
    AnyFeedback, FeedbackPath, Topology, analog_max, analog_min, millis_to_micros, sample,
};

/// Hard interlocks, in bit order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FapHard {
    LoadOvercurrent,
    LoadOvervoltage,
    Igbt1Overcurrent,
    Igbt2Overcurrent,
    DcLinkContactorFault,
    DcLinkContactorOpened,
    DcLinkOvervoltage,
    DcLinkUndervoltage,
}

impl FapHard {
    pub const NAMES: [&'static str; 8] = [
        "load_overcurrent",
        "load_overvoltage",
        "igbt_1_overcurrent",
        "igbt_2_overcurrent",
        "dclink_contactor_fault",
        "dclink_contactor_opened",
        "dclink_overvoltage",
        "dclink_undervoltage",
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Soft interlocks, in bit order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FapSoft {
    Dcct1Fault,
    Dcct2Fault,
    DcctHighDifference,
    IgbtsCurrentHighDifference,
}

impl FapSoft {
    pub const NAMES: [&'static str; 4] = [
        "dcct_1_fault",
        "dcct_2_fault",
        "dcct_high_difference",
        "igbts_current_high_difference",
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Alarms, in bit order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FapAlarm {
    HighSyncInputFrequency,
}

impl FapAlarm {
    pub const NAMES: [&'static str; 1] = ["high_sync_input_frequency"];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Limits and timings of a FAP supply.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FapConfig {
    pub max_i_load: f32,
    pub max_v_load: f32,
    pub max_dccts_diff: f32,
    pub max_i_igbt: f32,
    pub max_igbts_diff: f32,
    pub max_v_dclink: f32,
    pub min_v_dclink: f32,
    pub max_v_dclink_turn_on: f32,
    pub contactor_close_timeout_us: u32,
    pub contactor_open_timeout_us: u32,
    pub reset_pulse_us: u32,
    pub num_dccts: u8,
}

impl Default for FapConfig {
    fn default() -> Self {
        Self {
            max_i_load: 10.0,
            max_v_load: 50.0,
            max_dccts_diff: 1.0,
            max_i_igbt: 12.0,
            max_igbts_diff: 2.0,
            max_v_dclink: 100.0,
            min_v_dclink: 20.0,
            max_v_dclink_turn_on: 30.0,
            contactor_close_timeout_us: 100_000,
            contactor_open_timeout_us: 50_000,
            reset_pulse_us: 50_000,
            num_dccts: 2,
        }
    }
}

impl FapConfig {
    /// Reads the analog limit table:
    ///
    /// | slot | max                 | min          |
    /// |------|---------------------|--------------|
    /// | 0    | load current        |              |
    /// | 1    | load voltage        |              |
    /// | 2    | DCCT difference     |              |
    /// | 4    | IGBT current        |              |
    /// | 5    | IGBT difference     |              |
    /// | 7    | DC-link voltage     | DC-link volt |
    /// | 8    | close timeout (ms)  |              |
    /// | 9    | open timeout (ms)   |              |
    /// | 10   | reset pulse (ms)    |              |
    /// | 11   | number of DCCTs     |              |
    /// | 12   | turn-on DC-link max |              |
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_parameters(params: &ParameterBank) -> Self {
        let defaults = Self::default();
        let num_dccts = analog_max(params, 11, f32::from(defaults.num_dccts));
        Self {
            max_i_load: analog_max(params, 0, defaults.max_i_load),
            max_v_load: analog_max(params, 1, defaults.max_v_load),
            max_dccts_diff: analog_max(params, 2, defaults.max_dccts_diff),
            max_i_igbt: analog_max(params, 4, defaults.max_i_igbt),
            max_igbts_diff: analog_max(params, 5, defaults.max_igbts_diff),
            max_v_dclink: analog_max(params, 7, defaults.max_v_dclink),
            min_v_dclink: analog_min(params, 7, defaults.min_v_dclink),
            contactor_close_timeout_us: params
                .get_f32(ParamId::AnalogVarMax, 8)
                .map_or(defaults.contactor_close_timeout_us, millis_to_micros),
            contactor_open_timeout_us: params
                .get_f32(ParamId::AnalogVarMax, 9)
                .map_or(defaults.contactor_open_timeout_us, millis_to_micros),
            reset_pulse_us: params
                .get_f32(ParamId::AnalogVarMax, 10)
                .map_or(defaults.reset_pulse_us, millis_to_micros),
            num_dccts: if num_dccts >= 2.0 { 2 } else { num_dccts.max(1.0) as u8 },
            max_v_dclink_turn_on: analog_max(params, 12, defaults.max_v_dclink_turn_on),
        }
    }

    const fn contactor(&self) -> ContactorStage {
        ContactorStage {
            drive: OutputPin::DcLinkContactor,
            status: StatusPin::DcLinkContactorClosed,
            timeout_us: self.contactor_close_timeout_us,
            fault: FapHard::DcLinkContactorOpened.index(),
        }
    }
}

/// Channel order: load DCCT 1, load DCCT 2, load voltage, DC-link voltage,
/// IGBT 1 current, IGBT 2 current.
#[derive(Clone, Debug, PartialEq)]
pub struct FapFeedback {
    num_dccts: u8,
    max_i_load: f32,
    max_i_igbt: f32,
}

impl FapFeedback {
    #[must_use]
    pub const fn new(config: &FapConfig) -> Self {
        Self {
            num_dccts: config.num_dccts,
            max_i_load: config.max_i_load,
            max_i_igbt: config.max_i_igbt,
        }
    }
}

impl FeedbackPath for FapFeedback {
    fn channel_count(&self) -> usize {
        6
    }

    fn publish(&mut self, samples: &[f32], signals: &SignalBank) -> f32 {
        let i_load_1 = sample(samples, 0);
        let (i_load_2, mean, diff) = if self.num_dccts >= 2 {
            let i_load_2 = sample(samples, 1);
            (i_load_2, 0.5 * (i_load_1 + i_load_2), i_load_1 - i_load_2)
        } else {
            (0.0, i_load_1, 0.0)
        };

        signals.publish(Signal::ILoad1, i_load_1);
        signals.publish(Signal::ILoad2, i_load_2);
        signals.publish(Signal::VLoad, sample(samples, 2));
        signals.publish(Signal::VDcLink, sample(samples, 3));
        signals.publish(Signal::IIgbt1, sample(samples, 4));
        signals.publish(Signal::IIgbt2, sample(samples, 5));
        signals.publish(Signal::ILoadMean, mean);
        signals.publish(Signal::ILoadDiff, diff);
        mean
    }

    fn overcurrent(&self, signals: &SignalBank) -> u32 {
        let [mean, igbt_1, igbt_2] =
            [Signal::ILoadMean, Signal::IIgbt1, Signal::IIgbt2].map(|signal| signals.read(signal));
        [
            (mean.abs() > self.max_i_load, FapHard::LoadOvercurrent),
            (igbt_1.abs() > self.max_i_igbt, FapHard::Igbt1Overcurrent),
            (igbt_2.abs() > self.max_i_igbt, FapHard::Igbt2Overcurrent),
        ]
        .into_iter()
        .filter(|(tripped, _)| *tripped)
        .fold(0, |mask, (_, interlock)| mask | (1 << interlock.index()))
    }

    fn sync_alarm(&self) -> Option<usize> {
        Some(FapAlarm::HighSyncInputFrequency.index())
    }
}

/// FAP supply bound to its power-stage peripherals.
pub struct Fap<P, D, T> {
    config: FapConfig,
    hardware: Hardware<P, D, T>,
}

impl<P, D, T> Fap<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    #[must_use]
    pub const fn new(config: FapConfig, hardware: Hardware<P, D, T>) -> Self {
        Self { config, hardware }
    }

    #[must_use]
    pub const fn config(&self) -> &FapConfig {
        &self.config
    }

    #[must_use]
    pub const fn hardware(&self) -> &Hardware<P, D, T> {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware<P, D, T> {
        &mut self.hardware
    }

    fn energize(&mut self, module: &PsModule, signals: &SignalBank) -> Result<(), SequenceAbort> {
        if signals.read(Signal::VDcLink) > self.config.max_v_dclink_turn_on {
            return Err(sequencing::abort(module, FapHard::DcLinkOvervoltage.index()));
        }
        let stage = self.config.contactor();
        sequencing::close_contactor(module, &mut self.hardware.io, &mut self.hardware.timer, &stage)?;
        module.cfg_operation_mode(PsState::Initializing);
        Ok(())
    }
}

impl<P, D, T> ShutdownHook for Fap<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    fn turn_off(&mut self, module: &PsModule) {
        self.hardware.pwm.disable_all();
        sequencing::open_contactor(
            &mut self.hardware.io,
            &mut self.hardware.timer,
            OutputPin::DcLinkContactor,
            self.config.contactor_open_timeout_us,
        );
        if module.state() != PsState::Interlock {
            module.cfg_operation_mode(PsState::Off);
        }
    }
}

impl<P, D, T> Topology for Fap<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    fn model(&self) -> PsModel {
        PsModel::Fap
    }

    fn hard_interlocks(&self) -> &'static [&'static str] {
        &FapHard::NAMES
    }

    fn soft_interlocks(&self) -> &'static [&'static str] {
        &FapSoft::NAMES
    }

    fn alarms(&self) -> &'static [&'static str] {
        &FapAlarm::NAMES
    }

    fn feedback(&self, _control_hz: f32) -> AnyFeedback {
        AnyFeedback::Fap(FapFeedback::new(&self.config))
    }

    fn turn_on(&mut self, module: &PsModule, signals: &SignalBank) -> Result<(), SequenceAbort> {
        if module.state() != PsState::Off {
            return Ok(());
        }
        let result = self.energize(module, signals);
        if result.is_err() && module.take_shutdown_request() {
            self.turn_off(module);
        }
        result
    }

    fn check_interlocks(&mut self, module: &PsModule, signals: &SignalBank) {
        let config = self.config;
        let [i_load_diff, v_load, v_dclink, igbt_1, igbt_2] = signals.read_many([
            Signal::ILoadDiff,
            Signal::VLoad,
            Signal::VDcLink,
            Signal::IIgbt1,
            Signal::IIgbt2,
        ]);

        if i_load_diff.abs() > config.max_dccts_diff {
            module.set_soft_interlock(FapSoft::DcctHighDifference.index(), self);
        }
        if (igbt_1 - igbt_2).abs() > config.max_igbts_diff {
            module.set_soft_interlock(FapSoft::IgbtsCurrentHighDifference.index(), self);
        }
        if v_load.abs() > config.max_v_load {
            module.set_hard_interlock(FapHard::LoadOvervoltage.index(), self);
        }
        if v_dclink > config.max_v_dclink {
            module.set_hard_interlock(FapHard::DcLinkOvervoltage.index(), self);
        }

        let pins = PinSnapshot::capture(
            &self.hardware.io,
            &[
                StatusPin::Dcct1Ok,
                StatusPin::Dcct2Ok,
                StatusPin::DcLinkContactorClosed,
            ],
        );
        if !pins.is_high(StatusPin::Dcct1Ok) {
            module.set_soft_interlock(FapSoft::Dcct1Fault.index(), self);
        }
        if config.num_dccts >= 2 && !pins.is_high(StatusPin::Dcct2Ok) {
            module.set_soft_interlock(FapSoft::Dcct2Fault.index(), self);
        }

        let contactor_closed = pins.is_high(StatusPin::DcLinkContactorClosed);
        let state = module.state();
        if state <= PsState::Interlock {
            if contactor_closed {
                module.set_hard_interlock(FapHard::DcLinkContactorFault.index(), self);
            }
            return;
        }

        if !contactor_closed {
            module.set_hard_interlock(FapHard::DcLinkContactorOpened.index(), self);
        }
        if state == PsState::Initializing {
            // re-read: an opened contactor above has already forced Interlock
            if v_dclink > config.min_v_dclink && module.state() == PsState::Initializing {
                module.cfg_operation_mode(PsState::SlowRef);
                self.hardware.pwm.enable_all();
            }
        } else if v_dclink < config.min_v_dclink {
            module.set_hard_interlock(FapHard::DcLinkUndervoltage.index(), self);
        }
    }

    fn reset_interlocks(&mut self, module: &PsModule) {
        module.clear_interlocks();
        if module.state() >= PsState::Initializing {
            return;
        }

        let stage = self.config.contactor();
        let released = sequencing::pulse_open(
            &mut self.hardware.io,
            &mut self.hardware.timer,
            &stage,
            self.config.reset_pulse_us,
        );
        self.hardware.timer.delay_us(self.config.contactor_open_timeout_us);

        if released {
            module.cfg_operation_mode(PsState::Off);
        } else {
            // contact still welded: stay put so the next check re-latches it
            module.force_interlock(
                InterlockKind::Hard,
                FapHard::DcLinkContactorFault.index(),
                self,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_manager::EventTimes;

    #[test]
    fn config_reads_analog_table_with_fallbacks() {
        use crate::parameters::{ParamType, ParamValue};

        let mut params = ParameterBank::new();
        params
            .define(ParamId::AnalogVarMax, ParamType::F32, 13)
            .expect("valid length");
        params
            .set(ParamId::AnalogVarMax, 0, ParamValue::F32(25.0))
            .expect("in range");
        params
            .set(ParamId::AnalogVarMax, 8, ParamValue::F32(10.0))
            .expect("in range");
        params
            .set(ParamId::AnalogVarMax, 11, ParamValue::F32(1.0))
            .expect("in range");

        let config = FapConfig::from_parameters(&params);
        assert!((config.max_i_load - 25.0).abs() < f32::EPSILON);
        assert_eq!(config.contactor_close_timeout_us, 10_000);
        assert_eq!(config.num_dccts, 1);
        assert!((config.min_v_dclink - FapConfig::default().min_v_dclink).abs() < f32::EPSILON);

        assert_eq!(FapConfig::from_parameters(&ParameterBank::new()), FapConfig::default());
    }

    #[test]
    fn feedback_averages_dccts_and_flags_overcurrent() {
        let signals = SignalBank::new();
        let mut feedback = FapFeedback::new(&FapConfig::default());

        let mean = feedback.publish(&[4.0, 2.0, 1.0, 60.0, 1.0, 1.5], &signals);
        assert!((mean - 3.0).abs() < f32::EPSILON);
        assert!((signals.read(Signal::ILoadDiff) - 2.0).abs() < f32::EPSILON);
        assert_eq!(feedback.overcurrent(&signals), 0);

        feedback.publish(&[1.0, 1.0, 0.0, 60.0, 13.0, 0.0], &signals);
        assert_eq!(feedback.overcurrent(&signals), 1 << FapHard::Igbt1Overcurrent.index());

        feedback.publish(&[-11.0, -11.0, 0.0, 60.0, 13.0, 0.0], &signals);
        assert_eq!(
            feedback.overcurrent(&signals),
            (1 << FapHard::LoadOvercurrent.index()) | (1 << FapHard::Igbt1Overcurrent.index())
        );
    }

    #[test]
    fn single_dcct_ignores_second_channel() {
        let signals = SignalBank::new();
        let mut feedback = FapFeedback::new(&FapConfig {
            num_dccts: 1,
            ..FapConfig::default()
        });
        let mean = feedback.publish(&[5.0, 100.0], &signals);
        assert!((mean - 5.0).abs() < f32::EPSILON);
        assert!(signals.read(Signal::ILoad2).abs() < f32::EPSILON);
        assert!(signals.read(Signal::VDcLink).abs() < f32::EPSILON);
    }

    #[test]
    fn interlock_tables_fit_the_event_bank() {
        let module = PsModule::new();
        let times = [EventTimes::new(0, 1_000); 8];
        module.init(PsModel::Fap, 1_000, &times, &times[..4]);
        assert_eq!(module.events().len(InterlockKind::Hard), FapHard::NAMES.len());
        assert_eq!(module.events().len(InterlockKind::Soft), FapSoft::NAMES.len());
    }
}
