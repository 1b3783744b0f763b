//! One control-interrupt period.
//!
//! [`ControlLoop::step`] runs once per PWM carrier period. In order it:
//!
//! 1. acquires and calibrates the analog samples,
//! 2. publishes them through the topology's [`FeedbackPath`],
//! 3. reports instantaneous overcurrents to the debounce engine, cutting the
//!    PWM on the spot once one latches,
//! 4. generates the reference for the current operating mode,
//! 5. runs the open- or closed-loop duty computation in the controller slice,
//! 6. writes the duty cycle,
//! 7. feeds the scope slice and signals the event-manager time base.
//!
//! Contactor and status-pin faults are not evaluated here; they belong to
//! the background supervisor.

use crate::{
    dsp::{ErrorCalc, Pi, PiCoeffs, Saturation, SlewRateLimiter, SrlimMode},
    io::{AnalogChannel, PwmOutput, SampleSource, Sampler},
    parameters::{NUM_SIGGEN_AUX, ParamId, ParameterBank},
    ps_module::{PsModule, PsState, ShutdownHook},
    siggen::{SigGen, SigGenBusy, SigGenConfig, SigGenKind},
    signals::{Signal, SignalBank},
    timeslicer::{TimeSliceError, TimeSlicer},
    topology::{AnyFeedback, FeedbackPath},
    wfmref::{Playback, WfmRef},
};

mod scope;

pub use scope::{SCOPE_CAPACITY, Scope};

/// Slice running the duty-cycle controller.
pub const SLICE_CONTROLLER: usize = 0;
/// Slice signalling the event-manager time base.
pub const SLICE_TIMEBASE: usize = 1;
/// Slice feeding the scope.
pub const SLICE_SCOPE: usize = 2;

/// Open-loop references are in percent of full duty.
const OPEN_LOOP_DUTY_PER_UNIT: f32 = 0.01;

/// Rates, limits and gains of the control interrupt.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ControlConfig {
    pub control_hz: f32,
    pub controller_hz: f32,
    pub timebase_hz: f32,
    pub scope_hz: f32,
    pub reference_limits: Saturation,
    pub open_loop_reference_limits: Saturation,
    pub duty_limits: Saturation,
    pub open_loop_duty_limits: Saturation,
    pub slowref_slewrate: f32,
    pub siggen_amplitude_slewrate: f32,
    pub siggen_offset_slewrate: f32,
    pub kp: f32,
    pub ki: f32,
    pub siggen: SigGenConfig,
    pub wfmref_gain: f32,
    pub wfmref_offset: f32,
    pub max_sync_hz: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            control_hz: 20_000.0,
            controller_hz: 10_000.0,
            timebase_hz: 10_000.0,
            scope_hz: 1_000.0,
            reference_limits: Saturation::new(-10.0, 10.0),
            open_loop_reference_limits: Saturation::new(-90.0, 90.0),
            duty_limits: Saturation::new(-0.9, 0.9),
            open_loop_duty_limits: Saturation::new(-0.9, 0.9),
            slowref_slewrate: 10.0,
            siggen_amplitude_slewrate: 10.0,
            siggen_offset_slewrate: 10.0,
            kp: 0.05,
            ki: 5.0,
            siggen: SigGenConfig::default(),
            wfmref_gain: 1.0,
            wfmref_offset: 0.0,
            max_sync_hz: 2_000.0,
        }
    }
}

impl ControlConfig {
    /// Reads the configuration from `params`, keeping the default for any
    /// entry the bank does not define.
    #[must_use]
    pub fn from_parameters(params: &ParameterBank) -> Self {
        let defaults = Self::default();
        let read = |id, index, fallback| params.f32_or(id, index, fallback);
        let limits = |max, min, fallback: Saturation| {
            Saturation::new(read(min, 0, fallback.min), read(max, 0, fallback.max))
        };

        let siggen_defaults = defaults.siggen;
        let mut aux = siggen_defaults.aux;
        for (index, value) in aux.iter_mut().enumerate().take(NUM_SIGGEN_AUX) {
            *value = read(ParamId::SigGenAux, index, *value);
        }
        let siggen = SigGenConfig {
            kind: params
                .get_u16(ParamId::SigGenKind, 0)
                .ok()
                .and_then(SigGenKind::from_raw)
                .unwrap_or(siggen_defaults.kind),
            num_cycles: params
                .get_u16(ParamId::SigGenNumCycles, 0)
                .unwrap_or(siggen_defaults.num_cycles),
            freq_hz: read(ParamId::SigGenFreq, 0, siggen_defaults.freq_hz),
            amplitude: read(ParamId::SigGenAmplitude, 0, siggen_defaults.amplitude),
            offset: read(ParamId::SigGenOffset, 0, siggen_defaults.offset),
            aux,
        };

        Self {
            control_hz: read(ParamId::ControlFreqHz, 0, defaults.control_hz),
            controller_hz: read(ParamId::TimeSlicerFreqHz, SLICE_CONTROLLER, defaults.controller_hz),
            timebase_hz: read(ParamId::TimeSlicerFreqHz, SLICE_TIMEBASE, defaults.timebase_hz),
            scope_hz: read(ParamId::ScopeFreqHz, 0, defaults.scope_hz),
            reference_limits: limits(ParamId::MaxRef, ParamId::MinRef, defaults.reference_limits),
            open_loop_reference_limits: limits(
                ParamId::MaxRefOpenLoop,
                ParamId::MinRefOpenLoop,
                defaults.open_loop_reference_limits,
            ),
            duty_limits: limits(ParamId::PwmMaxDuty, ParamId::PwmMinDuty, defaults.duty_limits),
            open_loop_duty_limits: limits(
                ParamId::PwmMaxDutyOpenLoop,
                ParamId::PwmMinDutyOpenLoop,
                defaults.open_loop_duty_limits,
            ),
            slowref_slewrate: read(ParamId::MaxSlewRateSlowRef, 0, defaults.slowref_slewrate),
            siggen_amplitude_slewrate: read(
                ParamId::MaxSlewRateSigGenAmp,
                0,
                defaults.siggen_amplitude_slewrate,
            ),
            siggen_offset_slewrate: read(
                ParamId::MaxSlewRateSigGenOffset,
                0,
                defaults.siggen_offset_slewrate,
            ),
            kp: read(ParamId::PiKp, 0, defaults.kp),
            ki: read(ParamId::PiKi, 0, defaults.ki),
            siggen,
            wfmref_gain: read(ParamId::WfmRefGain, 0, defaults.wfmref_gain),
            wfmref_offset: read(ParamId::WfmRefOffset, 0, defaults.wfmref_offset),
            max_sync_hz: read(ParamId::MaxSyncFreqHz, 0, defaults.max_sync_hz),
        }
    }

    /// Minimum number of control periods between two accepted sync pulses.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn min_sync_periods(&self) -> u32 {
        if self.max_sync_hz.is_nan() || self.max_sync_hz <= 0.0 {
            return 0;
        }
        let periods = libm::floorf(self.control_hz / self.max_sync_hz);
        if periods <= 0.0 {
            0
        } else if periods >= u32::MAX as f32 {
            u32::MAX
        } else {
            periods as u32
        }
    }
}

/// Hook used by the interrupt when it latches a fault on its own: the PWM is
/// cut immediately and the full topology turn-off is left to the
/// supervisor.
pub struct OutputCutoff<'a, P: ?Sized>(pub &'a mut P);

impl<P> ShutdownHook for OutputCutoff<'_, P>
where
    P: PwmOutput + ?Sized,
{
    fn turn_off(&mut self, module: &PsModule) {
        self.0.disable_all();
        module.request_shutdown();
    }
}

/// State of the control interrupt for one module.
pub struct ControlLoop<P, S> {
    pwm: P,
    source: S,
    sampler: Sampler,
    feedback: AnyFeedback,
    config: ControlConfig,
    slicer: TimeSlicer,
    srlim_reference: SlewRateLimiter,
    srlim_amplitude: SlewRateLimiter,
    srlim_offset: SlewRateLimiter,
    siggen: SigGen,
    cycle_amplitude: f32,
    cycle_offset: f32,
    wfmref: WfmRef,
    error: ErrorCalc,
    pi: Pi,
    scope: Scope,
    last_state: PsState,
    sync_target: f32,
    sync_pending: bool,
    periods_since_sync: u32,
    duty: f32,
}

impl<P, S> ControlLoop<P, S>
where
    P: PwmOutput,
    S: SampleSource,
{
    /// Builds the loop. `channels` calibrates the sampled inputs in the
    /// order the feedback path expects them.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSliceError::InvalidFrequency`] when a configured rate is
    /// not a positive finite number.
    pub fn new(
        config: ControlConfig,
        feedback: AnyFeedback,
        channels: &[AnalogChannel],
        decimation: u16,
        pwm: P,
        source: S,
    ) -> Result<Self, TimeSliceError> {
        let mut slicer = TimeSlicer::new();
        slicer.configure(SLICE_CONTROLLER, config.controller_hz, config.control_hz)?;
        slicer.configure(SLICE_TIMEBASE, config.timebase_hz, config.control_hz)?;
        slicer.configure(SLICE_SCOPE, config.scope_hz, config.control_hz)?;

        let mut wfmref = WfmRef::new();
        wfmref.set_scaling(config.wfmref_gain, config.wfmref_offset);

        Ok(Self {
            pwm,
            source,
            sampler: Sampler::new(channels, decimation),
            feedback,
            slicer,
            srlim_reference: SlewRateLimiter::new(config.slowref_slewrate, config.control_hz),
            srlim_amplitude: SlewRateLimiter::new(
                config.siggen_amplitude_slewrate,
                config.control_hz,
            ),
            srlim_offset: SlewRateLimiter::new(config.siggen_offset_slewrate, config.control_hz),
            siggen: SigGen::with_config(config.control_hz, config.siggen),
            cycle_amplitude: config.siggen.amplitude,
            cycle_offset: config.siggen.offset,
            wfmref,
            error: ErrorCalc::new(),
            pi: Pi::new(PiCoeffs {
                kp: config.kp,
                ki: config.ki,
                sampling_hz: config.controller_hz,
                limits: config.duty_limits,
            }),
            scope: Scope::new(Signal::ILoadMean),
            config,
            last_state: PsState::Off,
            sync_target: 0.0,
            sync_pending: false,
            periods_since_sync: u32::MAX,
            duty: 0.0,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Rate at which [`ControlLoop::step`] signals the event-manager time
    /// base, after rounding to a whole divisor of the control rate.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn timebase_hz(&self) -> u32 {
        let divisor = self.slicer.divisor(SLICE_TIMEBASE).unwrap_or(1).max(1);
        let hz = libm::roundf(self.config.control_hz / divisor as f32);
        if hz >= 1.0 { hz as u32 } else { 1 }
    }

    /// Last duty cycle written to the modulators.
    #[must_use]
    pub const fn duty(&self) -> f32 {
        self.duty
    }

    #[must_use]
    pub const fn feedback(&self) -> &AnyFeedback {
        &self.feedback
    }

    #[must_use]
    pub const fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    #[must_use]
    pub const fn siggen(&self) -> &SigGen {
        &self.siggen
    }

    /// Replaces the `Cycle` waveform.
    ///
    /// # Errors
    ///
    /// Returns [`SigGenBusy`] while a cycle is running.
    pub fn configure_siggen(&mut self, config: SigGenConfig) -> Result<(), SigGenBusy> {
        self.siggen.configure(config)?;
        self.cycle_amplitude = config.amplitude;
        self.cycle_offset = config.offset;
        Ok(())
    }

    /// Moves the `Cycle` amplitude and offset; the change is slew limited.
    pub fn set_cycle_scale(&mut self, amplitude: f32, offset: f32) {
        self.cycle_amplitude = amplitude;
        self.cycle_offset = offset;
    }

    pub fn wfmref_mut(&mut self) -> &mut WfmRef {
        &mut self.wfmref
    }

    #[must_use]
    pub const fn pwm(&self) -> &P {
        &self.pwm
    }

    pub fn pwm_mut(&mut self) -> &mut P {
        &mut self.pwm
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Runs one control period for `module`.
    pub fn step(&mut self, module: &PsModule, signals: &SignalBank) {
        self.periods_since_sync = self.periods_since_sync.saturating_add(1);

        let samples = self.sampler.acquire(&mut self.source);
        let feedback = self.feedback.publish(&samples, signals);

        let tripped = self.feedback.overcurrent(signals);
        for index in (0..u32::BITS as usize).filter(|bit| tripped & (1 << bit) != 0) {
            module.set_hard_interlock(index, &mut OutputCutoff(&mut self.pwm));
        }

        let state = module.state();
        if state > PsState::Interlock {
            self.enter(state, module);
            let reference = self.reference(state, module);
            module.set_reference(reference);

            let open_loop = module.is_open_loop();
            let config = &self.config;
            let error = &mut self.error;
            let pi = &mut self.pi;
            let duty = self.slicer.run_guarded(SLICE_CONTROLLER, || {
                if open_loop {
                    config
                        .open_loop_duty_limits
                        .apply(OPEN_LOOP_DUTY_PER_UNIT * reference)
                } else {
                    let err = error.run(reference, feedback);
                    config.duty_limits.apply(pi.run(err))
                }
            });
            if let Some(duty) = duty {
                self.duty = duty;
            }
        } else {
            self.reset_controllers();
            module.set_reference(0.0);
        }

        for channel in 0..self.pwm.channel_count() {
            self.pwm.set_duty(channel, self.duty);
        }

        signals.publish(Signal::Reference, module.reference());
        signals.publish(Signal::Error, self.error.output());
        signals.publish(Signal::Duty, self.duty);

        let scope = &mut self.scope;
        self.slicer.run_guarded(SLICE_SCOPE, || scope.capture(signals));
        self.slicer
            .run_guarded(SLICE_TIMEBASE, || module.events().signal_timebase());

        self.last_state = module.state();
    }

    /// Records an external synchronisation pulse.
    ///
    /// Pulses closer together than the configured maximum sync rate raise
    /// the topology's sync alarm and are otherwise ignored.
    pub fn on_sync_pulse(&mut self, module: &PsModule) {
        if self.periods_since_sync < self.config.min_sync_periods() {
            if let Some(alarm) = self.feedback.sync_alarm() {
                module.set_alarm(alarm);
            }
            return;
        }
        self.periods_since_sync = 0;
        self.sync_pending = true;
    }

    /// Entry actions on an operating-mode change.
    fn enter(&mut self, state: PsState, module: &PsModule) {
        if state == self.last_state {
            return;
        }
        if self.last_state == PsState::Cycle {
            self.siggen.disable();
        }

        let current = module.reference();
        match state {
            PsState::SlowRef => self.srlim_reference.preset(current),
            PsState::SlowRefSync => {
                self.srlim_reference.preset(current);
                self.sync_target = current;
                self.sync_pending = false;
            }
            PsState::Cycle => {
                self.srlim_amplitude.preset(0.0);
                self.srlim_offset.preset(current);
                self.siggen.scale(0.0, current);
                self.siggen.enable();
            }
            PsState::RmpWfm | PsState::MigWfm => self.wfmref.restart(),
            PsState::Off | PsState::Interlock | PsState::Initializing => {}
        }
    }

    fn reference(&mut self, state: PsState, module: &PsModule) -> f32 {
        let raw = match state {
            PsState::SlowRef => self
                .srlim_reference
                .run(module.setpoint(), SrlimMode::Use),
            PsState::SlowRefSync => {
                if self.sync_pending {
                    self.sync_target = module.setpoint();
                    self.sync_pending = false;
                }
                self.srlim_reference.run(self.sync_target, SrlimMode::Use)
            }
            PsState::Cycle => {
                let amplitude = self.srlim_amplitude.run(self.cycle_amplitude, SrlimMode::Use);
                let offset = self.srlim_offset.run(self.cycle_offset, SrlimMode::Use);
                self.siggen.scale(amplitude, offset);
                self.siggen.run()
            }
            PsState::RmpWfm => self.wfmref.run(Playback::Repeat),
            PsState::MigWfm => {
                let value = self.wfmref.run(Playback::Once);
                if self.wfmref.is_finished() {
                    module.set_setpoint(value);
                    self.srlim_reference.preset(value);
                    module.cfg_operation_mode(PsState::SlowRef);
                }
                value
            }
            PsState::Off | PsState::Interlock | PsState::Initializing => module.reference(),
        };

        if module.is_open_loop() {
            self.config.open_loop_reference_limits.apply(raw)
        } else {
            self.config.reference_limits.apply(raw)
        }
    }

    fn reset_controllers(&mut self) {
        self.duty = 0.0;
        self.error.reset();
        self.pi.reset();
        self.srlim_reference.reset();
        self.srlim_amplitude.reset();
        self.srlim_offset.reset();
        self.siggen.disable();
        self.wfmref.restart();
        self.feedback.reset();
    }
}
