//! Background loop of one power-supply module.
//!
//! Each [`Supervisor::run_once`] call performs, in order: the full topology
//! turn-off for latches requested from the control interrupt, the queued
//! operator commands, the slow interlock predicates, one debounce tick and
//! finally the telemetry diff of latched bits and state.

use core::fmt;

use heapless::Vec;

use crate::{
    event_manager::{InterlockKind, InterlockOutcome, LatchedInterlocks},
    ps_module::{PsModel, PsModule, PsState},
    sequencing::SequenceAbort,
    signals::SignalBank,
    telemetry::{TELEMETRY_RING_CAPACITY, TelemetryEventKind, TelemetryRecorder, TimestampMicros},
    topology::Topology,
};

mod queue;

pub use queue::{
    COMMAND_QUEUE_CAPACITY, CommandDeque, CommandDequeueError, CommandEnqueueError,
    CommandQueueConsumer, CommandQueueProducer, PsCommand,
};

/// Upper bound on commands executed per iteration, so a flooded queue cannot
/// starve the interlock checks.
pub const MAX_COMMANDS_PER_ITERATION: usize = 4;

/// Why a command was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandError {
    /// The energisation sequence stopped on a latched fault.
    Aborted(SequenceAbort),
    /// The command needs a state the module is not in.
    InvalidState(PsState),
    /// The requested mode is not an operating mode.
    InvalidMode(PsState),
    /// Setpoint is NaN or infinite.
    InvalidSetpoint,
    /// Interlock index is not configured for this topology.
    InterlockOutOfRange,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Aborted(abort) => write!(f, "{abort}"),
            CommandError::InvalidState(state) => write!(f, "not allowed in state {state}"),
            CommandError::InvalidMode(state) => write!(f, "{state} is not an operating mode"),
            CommandError::InvalidSetpoint => f.write_str("setpoint must be finite"),
            CommandError::InterlockOutOfRange => f.write_str("interlock index out of range"),
        }
    }
}

/// Copy of the module's externally visible state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ModuleSnapshot {
    pub model: Option<PsModel>,
    pub state: PsState,
    pub open_loop: bool,
    pub setpoint: f32,
    pub reference: f32,
    pub latched: LatchedInterlocks,
}

impl ModuleSnapshot {
    #[must_use]
    pub fn capture(module: &PsModule) -> Self {
        let status = module.status();
        Self {
            model: status.model,
            state: status.state,
            open_loop: status.open_loop,
            setpoint: module.setpoint(),
            reference: module.reference(),
            latched: module.latched(),
        }
    }
}

/// What one [`Supervisor::run_once`] call did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IterationReport {
    pub executed: usize,
    pub rejected: Vec<(PsCommand, CommandError), MAX_COMMANDS_PER_ITERATION>,
    pub shutdown_serviced: bool,
    pub ticked: bool,
    pub disconnected: bool,
}

/// Owns the topology on the background side and keeps the telemetry ring.
pub struct Supervisor<T, const TELEMETRY: usize = TELEMETRY_RING_CAPACITY> {
    topology: T,
    telemetry: TelemetryRecorder<TELEMETRY>,
    last_state: PsState,
    last_latched: LatchedInterlocks,
}

impl<T, const TELEMETRY: usize> Supervisor<T, TELEMETRY>
where
    T: Topology,
{
    /// Wraps `topology`, taking the module's current state as the baseline
    /// for telemetry.
    #[must_use]
    pub fn new(topology: T, module: &PsModule) -> Self {
        Self {
            topology,
            telemetry: TelemetryRecorder::new(),
            last_state: module.state(),
            last_latched: module.latched(),
        }
    }

    #[must_use]
    pub const fn topology(&self) -> &T {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut T {
        &mut self.topology
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder<TELEMETRY> {
        &self.telemetry
    }

    /// Applies one operator command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the command is refused in the current
    /// state or the energisation sequence aborted.
    pub fn execute(
        &mut self,
        command: PsCommand,
        module: &PsModule,
        signals: &SignalBank,
        now_us: TimestampMicros,
    ) -> Result<(), CommandError> {
        match command {
            PsCommand::TurnOn => {
                let state = module.state();
                if state != PsState::Off {
                    return Err(CommandError::InvalidState(state));
                }
                self.topology.turn_on(module, signals).map_err(|abort| {
                    #[allow(clippy::cast_possible_truncation)]
                    let index = abort.index as u8;
                    self.telemetry
                        .record(TelemetryEventKind::TurnOnAborted(abort.kind, index), now_us);
                    CommandError::Aborted(abort)
                })
            }
            PsCommand::TurnOff => {
                self.topology.turn_off(module);
                Ok(())
            }
            PsCommand::ResetInterlocks => {
                self.topology.reset_interlocks(module);
                self.telemetry
                    .record(TelemetryEventKind::InterlocksReset, now_us);
                // anything latched again during the reset is reported as new
                self.last_latched = LatchedInterlocks::default();
                Ok(())
            }
            PsCommand::SetSetpoint(value) => {
                if !value.is_finite() {
                    return Err(CommandError::InvalidSetpoint);
                }
                module.set_setpoint(value);
                Ok(())
            }
            PsCommand::SelectMode(target) => {
                if !target.is_operating() {
                    return Err(CommandError::InvalidMode(target));
                }
                let state = module.state();
                if !state.is_operating() {
                    return Err(CommandError::InvalidState(state));
                }
                module.cfg_operation_mode(target);
                Ok(())
            }
            PsCommand::OpenLoop => {
                module.open_loop();
                Ok(())
            }
            PsCommand::CloseLoop => {
                module.close_loop();
                Ok(())
            }
            PsCommand::SetInterlock(kind, index) => {
                let outcome = module.force_interlock(kind, usize::from(index), &mut self.topology);
                if outcome == InterlockOutcome::OutOfRange {
                    Err(CommandError::InterlockOutOfRange)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Runs one background iteration.
    pub fn run_once<Q>(
        &mut self,
        queue: &mut Q,
        module: &PsModule,
        signals: &SignalBank,
        now_us: TimestampMicros,
    ) -> IterationReport
    where
        Q: CommandQueueConsumer + ?Sized,
    {
        let mut report = IterationReport {
            shutdown_serviced: self.service_shutdown(module),
            ..IterationReport::default()
        };

        for _ in 0..MAX_COMMANDS_PER_ITERATION {
            match queue.try_dequeue() {
                Ok(Some(command)) => match self.execute(command, module, signals, now_us) {
                    Ok(()) => report.executed += 1,
                    Err(err) => {
                        // at most MAX_COMMANDS_PER_ITERATION entries can land here
                        let _ = report.rejected.push((command, err));
                    }
                },
                Ok(None) => break,
                Err(_) => {
                    report.disconnected = true;
                    break;
                }
            }
        }

        // a command may have latched through the deferred path
        report.shutdown_serviced |= self.service_shutdown(module);
        self.topology.check_interlocks(module, signals);
        report.ticked = module.run_interlocks_debouncing();
        self.record_changes(module, now_us);
        report
    }

    fn service_shutdown(&mut self, module: &PsModule) -> bool {
        if module.take_shutdown_request() {
            self.topology.turn_off(module);
            true
        } else {
            false
        }
    }

    fn record_changes(&mut self, module: &PsModule, now_us: TimestampMicros) {
        let latched = module.latched();
        self.telemetry
            .record_latch_changes(self.last_latched, latched, now_us);
        self.last_latched = latched;

        let state = module.state();
        if state != self.last_state {
            self.telemetry
                .record(TelemetryEventKind::StateChanged(state), now_us);
            self.last_state = state;
        }
    }

    /// Names of the bits set in `mask` for `kind`, in bit order.
    pub fn interlock_names(
        &self,
        kind: InterlockKind,
        mask: u32,
    ) -> impl Iterator<Item = &'static str> + '_ {
        let table = match kind {
            InterlockKind::Hard => self.topology.hard_interlocks(),
            InterlockKind::Soft => self.topology.soft_interlocks(),
        };
        named_bits(table, mask)
    }

    /// Names of the alarm bits set in `mask`, in bit order.
    pub fn alarm_names(&self, mask: u32) -> impl Iterator<Item = &'static str> + '_ {
        named_bits(self.topology.alarms(), mask)
    }
}

fn named_bits(table: &'static [&'static str], mask: u32) -> impl Iterator<Item = &'static str> {
    table
        .iter()
        .enumerate()
        .filter(move |(bit, _)| *bit < 32 && mask & (1 << bit) != 0)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event_manager::EventTimes,
        io::{CountdownTimer, DigitalIo, Hardware, OutputPin, PwmOutput, StatusPin},
        signals::Signal,
        topology::{Fap, FapConfig, FapHard},
    };

    #[derive(Default)]
    struct MockPwm {
        enabled: bool,
    }

    impl PwmOutput for MockPwm {
        fn channel_count(&self) -> usize {
            1
        }

        fn set_duty(&mut self, _: usize, _: f32) {}

        fn enable_output(&mut self, _: usize) {
            self.enabled = true;
        }

        fn disable_output(&mut self, _: usize) {
            self.enabled = false;
        }
    }

    /// DC-link contact follows its drive unless stuck open.
    #[derive(Default)]
    struct MockPins {
        contactor: bool,
        stuck_open: bool,
    }

    impl DigitalIo for MockPins {
        fn is_high(&self, pin: StatusPin) -> bool {
            match pin {
                StatusPin::DcLinkContactorClosed => self.contactor && !self.stuck_open,
                StatusPin::Dcct1Ok | StatusPin::Dcct2Ok => true,
                _ => false,
            }
        }

        fn set_output(&mut self, pin: OutputPin, high: bool) {
            if pin == OutputPin::DcLinkContactor {
                self.contactor = high;
            }
        }
    }

    struct MockTimer {
        remaining: u32,
    }

    impl CountdownTimer for MockTimer {
        fn start(&mut self, micros: u32) {
            self.remaining = micros / 1_000;
        }

        fn expired(&mut self) -> bool {
            if self.remaining == 0 {
                return true;
            }
            self.remaining -= 1;
            false
        }
    }

    type TestFap = Fap<MockPwm, MockPins, MockTimer>;

    fn fixture(stuck_open: bool) -> (Supervisor<TestFap, 16>, PsModule, SignalBank) {
        let fap = Fap::new(
            FapConfig::default(),
            Hardware::new(
                MockPwm::default(),
                MockPins {
                    contactor: false,
                    stuck_open,
                },
                MockTimer { remaining: 0 },
            ),
        );
        let module = PsModule::new();
        let times = [EventTimes::new(0, 1_000); 8];
        module.init(PsModel::Fap, 1_000, &times, &times[..4]);
        module.cfg_operation_mode(PsState::Off);
        let signals = SignalBank::new();
        signals.publish(Signal::VDcLink, 25.0);
        (Supervisor::new(fap, &module), module, signals)
    }

    #[test]
    fn turn_on_reaches_slowref_through_initializing() {
        let (mut supervisor, module, signals) = fixture(false);
        let mut queue: CommandDeque<4> = CommandDeque::new();
        queue.try_enqueue(PsCommand::TurnOn).expect("slot free");

        let report = supervisor.run_once(&mut queue, &module, &signals, 10);
        assert_eq!(report.executed, 1);
        assert!(report.rejected.is_empty());
        assert_eq!(module.state(), PsState::SlowRef);
        assert!(supervisor.topology().hardware().pwm.enabled);
        assert_eq!(
            supervisor.telemetry().latest().map(|record| record.event),
            Some(TelemetryEventKind::StateChanged(PsState::SlowRef))
        );
    }

    #[test]
    fn contactor_timeout_aborts_and_records() {
        let (mut supervisor, module, signals) = fixture(true);
        let err = supervisor
            .execute(PsCommand::TurnOn, &module, &signals, 5)
            .expect_err("contact never confirms");

        assert_eq!(
            err,
            CommandError::Aborted(SequenceAbort {
                kind: InterlockKind::Hard,
                index: FapHard::DcLinkContactorOpened.index(),
            })
        );
        assert_eq!(module.state(), PsState::Interlock);
        assert!(!supervisor.topology().hardware().pwm.enabled);
        assert!(!supervisor.topology().hardware().io.contactor);
        assert_eq!(
            supervisor.telemetry().latest().map(|record| record.event),
            Some(TelemetryEventKind::TurnOnAborted(InterlockKind::Hard, 5))
        );
    }

    #[test]
    fn mode_and_setpoint_commands_validate_input() {
        let (mut supervisor, module, signals) = fixture(false);

        assert_eq!(
            supervisor.execute(PsCommand::SelectMode(PsState::Cycle), &module, &signals, 0),
            Err(CommandError::InvalidState(PsState::Off))
        );
        let mut queue: CommandDeque<1> = CommandDeque::new();
        queue.try_enqueue(PsCommand::TurnOn).expect("slot free");
        supervisor.run_once(&mut queue, &module, &signals, 0);
        assert_eq!(
            supervisor.execute(PsCommand::SelectMode(PsState::Off), &module, &signals, 0),
            Err(CommandError::InvalidMode(PsState::Off))
        );
        supervisor
            .execute(PsCommand::SelectMode(PsState::Cycle), &module, &signals, 0)
            .expect("operating");
        assert_eq!(module.state(), PsState::Cycle);

        assert_eq!(
            supervisor.execute(PsCommand::SetSetpoint(f32::NAN), &module, &signals, 0),
            Err(CommandError::InvalidSetpoint)
        );
        supervisor
            .execute(PsCommand::SetSetpoint(2.5), &module, &signals, 0)
            .expect("finite");
        assert!((module.setpoint() - 2.5).abs() < f32::EPSILON);
        assert_eq!(
            supervisor.execute(PsCommand::TurnOn, &module, &signals, 0),
            Err(CommandError::InvalidState(PsState::Cycle))
        );
    }

    #[test]
    fn forced_interlock_turns_off_and_names_the_bit() {
        let (mut supervisor, module, signals) = fixture(false);
        let mut queue: CommandDeque<4> = CommandDeque::new();
        queue.try_enqueue(PsCommand::TurnOn).expect("slot free");
        supervisor.run_once(&mut queue, &module, &signals, 0);

        queue
            .try_enqueue(PsCommand::SetInterlock(InterlockKind::Hard, 1))
            .expect("slot free");
        queue
            .try_enqueue(PsCommand::SetInterlock(InterlockKind::Soft, 9))
            .expect("slot free");
        let report = supervisor.run_once(&mut queue, &module, &signals, 100);

        assert_eq!(report.executed, 1);
        assert_eq!(
            report.rejected.as_slice(),
            &[(
                PsCommand::SetInterlock(InterlockKind::Soft, 9),
                CommandError::InterlockOutOfRange
            )]
        );
        assert_eq!(module.state(), PsState::Interlock);
        assert!(!supervisor.topology().hardware().pwm.enabled);
        let latched = module.latched();
        assert!(
            supervisor
                .interlock_names(InterlockKind::Hard, latched.hard)
                .eq(["load_overvoltage"])
        );
        assert!(supervisor.telemetry().oldest_first().any(|record| {
            record.event == TelemetryEventKind::InterlockLatched(InterlockKind::Hard, 1)
        }));
    }

    #[test]
    fn interrupt_latch_is_serviced_on_next_iteration() {
        let (mut supervisor, module, signals) = fixture(false);
        supervisor
            .execute(PsCommand::TurnOn, &module, &signals, 0)
            .expect("turns on");
        assert!(supervisor.topology().hardware().io.contactor);

        // a latch taken where only the shutdown request can be raised
        module.force_interlock(
            InterlockKind::Hard,
            FapHard::LoadOvercurrent.index(),
            &mut crate::ps_module::DeferredShutdown,
        );
        let mut queue: CommandDeque<1> = CommandDeque::new();
        let report = supervisor.run_once(&mut queue, &module, &signals, 50);

        assert!(report.shutdown_serviced);
        assert!(!supervisor.topology().hardware().io.contactor);
        assert_eq!(module.state(), PsState::Interlock);
    }

    #[test]
    fn reset_returns_to_off_and_reports() {
        let (mut supervisor, module, signals) = fixture(false);
        supervisor
            .execute(
                PsCommand::SetInterlock(InterlockKind::Hard, 0),
                &module,
                &signals,
                0,
            )
            .expect("configured index");
        let mut queue: CommandDeque<2> = CommandDeque::new();
        supervisor.run_once(&mut queue, &module, &signals, 1);

        queue
            .try_enqueue(PsCommand::ResetInterlocks)
            .expect("slot free");
        supervisor.run_once(&mut queue, &module, &signals, 2);

        assert_eq!(module.state(), PsState::Off);
        assert!(module.latched().is_clear());
        assert!(supervisor.telemetry().oldest_first().any(|record| {
            record.event == TelemetryEventKind::InterlocksReset
        }));
        let snapshot = ModuleSnapshot::capture(&module);
        assert_eq!(snapshot.state, PsState::Off);
        assert_eq!(snapshot.model, Some(PsModel::Fap));
    }
}
