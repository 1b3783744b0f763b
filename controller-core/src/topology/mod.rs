//! Power-supply topologies.
//!
//! A topology owns its power-stage peripherals and implements the
//! model-specific pieces of the state machine: energisation, turn-off,
//! interlock predicates and interlock reset. Its interrupt-side half, the
//! [`FeedbackPath`], maps sampled channels onto named signals and performs
//! the instantaneous overcurrent checks.

use heapless::Vec;

use crate::{
    event_manager::{EventTimes, InterlockKind, NUM_MAX_EVENT_COUNTER},
    io::{CountdownTimer, DigitalIo, Hardware, PwmOutput},
    parameters::{ParamId, ParameterBank},
    ps_module::{ModuleId, ModuleRegistry, PsModel, PsModule, RegistryError, ShutdownHook},
    sequencing::SequenceAbort,
    signals::SignalBank,
};

mod fac_acdc;
mod fap;

pub use fac_acdc::{FacAcDc, FacAcDcConfig, FacAcDcFeedback, FacAcDcHard};
pub use fap::{Fap, FapAlarm, FapConfig, FapFeedback, FapHard, FapSoft};

/// Background-loop half of a topology.
pub trait Topology: ShutdownHook {
    fn model(&self) -> PsModel;

    /// Names of the hard interlocks, indexed by bit.
    fn hard_interlocks(&self) -> &'static [&'static str];

    /// Names of the soft interlocks, indexed by bit.
    fn soft_interlocks(&self) -> &'static [&'static str];

    /// Names of the alarms, indexed by bit.
    fn alarms(&self) -> &'static [&'static str] {
        &[]
    }

    /// Interrupt-side half matching this topology, sampled at `control_hz`.
    fn feedback(&self, control_hz: f32) -> AnyFeedback;

    /// Runs the energisation sequence from `Off`. Any other state is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns the [`SequenceAbort`] of the stage that failed; the fault is
    /// latched and the power stage is already off when this returns.
    fn turn_on(&mut self, module: &PsModule, signals: &SignalBank) -> Result<(), SequenceAbort>;

    /// Evaluates the slow fault predicates and drives the
    /// `Initializing` to running transition.
    fn check_interlocks(&mut self, module: &PsModule, signals: &SignalBank);

    /// Clears every latch and, when stopped, re-verifies the hardware before
    /// returning the module to `Off`.
    fn reset_interlocks(&mut self, module: &PsModule);

    /// Claims a slot in `registry` for this topology, with debounce times
    /// from `params`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] when no slot is left.
    fn register_module(
        &self,
        registry: &ModuleRegistry,
        timebase_hz: u32,
        params: &ParameterBank,
    ) -> Result<ModuleId, RegistryError> {
        let hard = event_times(params, InterlockKind::Hard, self.hard_interlocks().len());
        let soft = event_times(params, InterlockKind::Soft, self.soft_interlocks().len());
        registry.register(self.model(), timebase_hz, &hard, &soft)
    }
}

/// Interrupt-side half of a topology.
pub trait FeedbackPath {
    /// Analog channels consumed by [`FeedbackPath::publish`].
    fn channel_count(&self) -> usize;

    /// Publishes calibrated samples and returns the controlled variable.
    fn publish(&mut self, samples: &[f32], signals: &SignalBank) -> f32;

    /// Mask of the hard interlocks whose instantaneous limit is exceeded in
    /// this period, one bit per interlock index.
    fn overcurrent(&self, signals: &SignalBank) -> u32;

    /// Alarm raised when sync pulses arrive faster than the loop can follow.
    fn sync_alarm(&self) -> Option<usize> {
        None
    }

    /// Clears filter memory.
    fn reset(&mut self) {}
}

/// Feedback path of whichever topology is configured.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyFeedback {
    Fap(FapFeedback),
    FacAcDc(FacAcDcFeedback),
}

impl FeedbackPath for AnyFeedback {
    fn channel_count(&self) -> usize {
        match self {
            AnyFeedback::Fap(inner) => inner.channel_count(),
            AnyFeedback::FacAcDc(inner) => inner.channel_count(),
        }
    }

    fn publish(&mut self, samples: &[f32], signals: &SignalBank) -> f32 {
        match self {
            AnyFeedback::Fap(inner) => inner.publish(samples, signals),
            AnyFeedback::FacAcDc(inner) => inner.publish(samples, signals),
        }
    }

    fn overcurrent(&self, signals: &SignalBank) -> u32 {
        match self {
            AnyFeedback::Fap(inner) => inner.overcurrent(signals),
            AnyFeedback::FacAcDc(inner) => inner.overcurrent(signals),
        }
    }

    fn sync_alarm(&self) -> Option<usize> {
        match self {
            AnyFeedback::Fap(inner) => inner.sync_alarm(),
            AnyFeedback::FacAcDc(inner) => inner.sync_alarm(),
        }
    }

    fn reset(&mut self) {
        match self {
            AnyFeedback::Fap(inner) => inner.reset(),
            AnyFeedback::FacAcDc(inner) => inner.reset(),
        }
    }
}

/// Topology selected once at start-up.
pub enum AnyTopology<P, D, T> {
    Fap(Fap<P, D, T>),
    FacAcDc(FacAcDc<P, D, T>),
}

impl<P, D, T> AnyTopology<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    /// Builds the topology for `model`, configured from `params`.
    #[must_use]
    pub fn from_parameters(model: PsModel, hardware: Hardware<P, D, T>, params: &ParameterBank) -> Self {
        match model {
            PsModel::Fap => AnyTopology::Fap(Fap::new(FapConfig::from_parameters(params), hardware)),
            PsModel::FacAcDc => {
                AnyTopology::FacAcDc(FacAcDc::new(FacAcDcConfig::from_parameters(params), hardware))
            }
        }
    }

    #[must_use]
    pub fn hardware(&self) -> &Hardware<P, D, T> {
        match self {
            AnyTopology::Fap(inner) => inner.hardware(),
            AnyTopology::FacAcDc(inner) => inner.hardware(),
        }
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware<P, D, T> {
        match self {
            AnyTopology::Fap(inner) => inner.hardware_mut(),
            AnyTopology::FacAcDc(inner) => inner.hardware_mut(),
        }
    }
}

impl<P, D, T> ShutdownHook for AnyTopology<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    fn turn_off(&mut self, module: &PsModule) {
        match self {
            AnyTopology::Fap(inner) => inner.turn_off(module),
            AnyTopology::FacAcDc(inner) => inner.turn_off(module),
        }
    }
}

impl<P, D, T> Topology for AnyTopology<P, D, T>
where
    P: PwmOutput,
    D: DigitalIo,
    T: CountdownTimer,
{
    fn model(&self) -> PsModel {
        match self {
            AnyTopology::Fap(inner) => inner.model(),
            AnyTopology::FacAcDc(inner) => inner.model(),
        }
    }

    fn hard_interlocks(&self) -> &'static [&'static str] {
        match self {
            AnyTopology::Fap(inner) => inner.hard_interlocks(),
            AnyTopology::FacAcDc(inner) => inner.hard_interlocks(),
        }
    }

    fn soft_interlocks(&self) -> &'static [&'static str] {
        match self {
            AnyTopology::Fap(inner) => inner.soft_interlocks(),
            AnyTopology::FacAcDc(inner) => inner.soft_interlocks(),
        }
    }

    fn alarms(&self) -> &'static [&'static str] {
        match self {
            AnyTopology::Fap(inner) => inner.alarms(),
            AnyTopology::FacAcDc(inner) => inner.alarms(),
        }
    }

    fn feedback(&self, control_hz: f32) -> AnyFeedback {
        match self {
            AnyTopology::Fap(inner) => inner.feedback(control_hz),
            AnyTopology::FacAcDc(inner) => inner.feedback(control_hz),
        }
    }

    fn turn_on(&mut self, module: &PsModule, signals: &SignalBank) -> Result<(), SequenceAbort> {
        match self {
            AnyTopology::Fap(inner) => inner.turn_on(module, signals),
            AnyTopology::FacAcDc(inner) => inner.turn_on(module, signals),
        }
    }

    fn check_interlocks(&mut self, module: &PsModule, signals: &SignalBank) {
        match self {
            AnyTopology::Fap(inner) => inner.check_interlocks(module, signals),
            AnyTopology::FacAcDc(inner) => inner.check_interlocks(module, signals),
        }
    }

    fn reset_interlocks(&mut self, module: &PsModule) {
        match self {
            AnyTopology::Fap(inner) => inner.reset_interlocks(module),
            AnyTopology::FacAcDc(inner) => inner.reset_interlocks(module),
        }
    }
}

/// Debounce and reset times for the first `count` events of `kind`.
///
/// Missing or mistyped entries read as zero; the event manager clamps them
/// into a valid window.
#[must_use]
pub fn event_times(
    params: &ParameterBank,
    kind: InterlockKind,
    count: usize,
) -> Vec<EventTimes, NUM_MAX_EVENT_COUNTER> {
    let (debounce, reset) = match kind {
        InterlockKind::Hard => (ParamId::HardInterlockDebounceUs, ParamId::HardInterlockResetUs),
        InterlockKind::Soft => (ParamId::SoftInterlockDebounceUs, ParamId::SoftInterlockResetUs),
    };
    (0..count.min(NUM_MAX_EVENT_COUNTER))
        .map(|index| {
            EventTimes::new(
                params.get_u32(debounce, index).unwrap_or(0),
                params.get_u32(reset, index).unwrap_or(0),
            )
        })
        .collect()
}

/// `AnalogVarMax[index]`, or `fallback` when the bank does not define it.
fn analog_max(params: &ParameterBank, index: usize, fallback: f32) -> f32 {
    params.f32_or(ParamId::AnalogVarMax, index, fallback)
}

/// `AnalogVarMin[index]`, or `fallback` when the bank does not define it.
fn analog_min(params: &ParameterBank, index: usize, fallback: f32) -> f32 {
    params.f32_or(ParamId::AnalogVarMin, index, fallback)
}

/// Milliseconds stored as `f32` to whole microseconds, saturating.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn millis_to_micros(millis: f32) -> u32 {
    let micros = libm::roundf(millis * 1_000.0);
    if micros.is_nan() || micros <= 0.0 {
        0
    } else if micros >= u32::MAX as f32 {
        u32::MAX
    } else {
        micros as u32
    }
}

/// Reads sample `index`, treating a missing channel as zero.
fn sample(samples: &[f32], index: usize) -> f32 {
    samples.get(index).copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{ParamType, ParamValue};

    #[test]
    fn event_times_read_bank_and_default_to_zero() {
        let mut params = ParameterBank::new();
        params
            .define(ParamId::HardInterlockDebounceUs, ParamType::U32, 2)
            .expect("valid length");
        params
            .set(ParamId::HardInterlockDebounceUs, 1, ParamValue::U32(500))
            .expect("in range");

        let times = event_times(&params, InterlockKind::Hard, 3);
        assert_eq!(times.len(), 3);
        assert_eq!(times[1], EventTimes::new(500, 0));
        assert_eq!(times[2], EventTimes::new(0, 0));
        assert!(event_times(&params, InterlockKind::Soft, 0).is_empty());
    }

    #[test]
    fn millis_convert_with_saturation() {
        assert_eq!(millis_to_micros(12.5), 12_500);
        assert_eq!(millis_to_micros(-3.0), 0);
        assert_eq!(millis_to_micros(f32::NAN), 0);
        assert_eq!(millis_to_micros(1.0e12), u32::MAX);
    }
}
