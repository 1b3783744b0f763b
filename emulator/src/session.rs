use std::fmt::{self, Write as _};
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use psu_core::console::status::{InterlockNames, StatusFormatter, write_help, write_record};
use psu_core::console::{CommandExecutor, CommandOutcome};
use psu_core::control::{ControlConfig, ControlLoop};
use psu_core::io::{AnalogChannel, Hardware, OutputPin};
use psu_core::parameters::{ParamId, ParamValue, ParameterBank};
use psu_core::ps_module::{ModuleId, ModuleRegistry, PsModel, PsModule};
use psu_core::signals::SignalBank;
use psu_core::supervisor::{COMMAND_QUEUE_CAPACITY, CommandDeque, ModuleSnapshot, Supervisor};
use psu_core::telemetry::EventId;
use psu_core::topology::{AnyTopology, FeedbackPath, Topology};

use crate::plant::{Faults, Plant, PlantAdc, PlantIo, PlantParams, PlantPwm, PlantTimer, SharedPlant};

/// Background iteration period of the simulated supervisor.
const SUPERVISOR_PERIOD_US: u32 = 1_000;

/// Simulated time that passes after each queued command.
const SETTLE_US: u64 = 20_000;

pub const SIM_HELP: &[&str] = &[
    "sim run <ms>                                     advance simulated time",
    "sim short|weld|sag                               inject a plant fault",
    "sim dcct <1|2>                                   fail one load DCCT",
    "sim sync <count>                                 fire back-to-back sync pulses",
    "sim clear                                        remove injected faults",
    "sim show                                         print plant readings",
];

type PlantTopology = AnyTopology<PlantPwm, PlantIo, PlantTimer>;

pub struct Session {
    plant: SharedPlant,
    registry: ModuleRegistry,
    module: ModuleId,
    signals: SignalBank,
    control: ControlLoop<PlantPwm, PlantAdc>,
    supervisor: Supervisor<PlantTopology>,
    executor: CommandExecutor<CommandDeque<COMMAND_QUEUE_CAPACITY>>,
    names: InterlockNames,
    next_record: EventId,
    period_us: u32,
    since_supervisor_us: u32,
    transcript: Option<TranscriptLogger>,
}

fn invalid_input<E: fmt::Display>(error: &E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, error.to_string())
}

fn lookup(registry: &ModuleRegistry, id: ModuleId) -> io::Result<&PsModule> {
    registry
        .get(id)
        .map_err(|err| io::Error::new(io::ErrorKind::NotFound, err.to_string()))
}

impl Session {
    pub fn new(model: PsModel, transcript: Option<&Path>) -> io::Result<Self> {
        let mut params = ParameterBank::with_defaults();
        params
            .set(ParamId::PsModel, 0, ParamValue::U16(u16::from(model.to_raw())))
            .map_err(|err| invalid_input(&err))?;
        let config = ControlConfig::from_parameters(&params);

        let plant = Plant::shared(model, PlantParams::default());
        let hardware = Hardware::new(
            PlantPwm(plant.clone()),
            PlantIo(plant.clone()),
            PlantTimer::new(plant.clone()),
        );
        let topology = AnyTopology::from_parameters(model, hardware, &params);
        let feedback = topology.feedback(config.control_hz);
        let calibration = vec![AnalogChannel::IDENTITY; feedback.channel_count()];
        let control = ControlLoop::new(
            config,
            feedback,
            &calibration,
            1,
            PlantPwm(plant.clone()),
            PlantAdc(plant.clone()),
        )
        .map_err(|err| invalid_input(&err))?;

        let registry = ModuleRegistry::new();
        let module = topology
            .register_module(&registry, control.timebase_hz(), &params)
            .map_err(|err| invalid_input(&err))?;
        let names = InterlockNames::of(&topology);
        let supervisor = Supervisor::new(topology, lookup(&registry, module)?);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let period_us = (1e6 / config.control_hz).round().max(1.0) as u32;

        let transcript = transcript
            .map(|path| TranscriptLogger::new(path, model))
            .transpose()?;

        Ok(Self {
            plant,
            registry,
            module,
            signals: SignalBank::new(),
            control,
            supervisor,
            executor: CommandExecutor::new(CommandDeque::new()),
            names,
            next_record: 0,
            period_us,
            since_supervisor_us: 0,
            transcript,
        })
    }

    #[cfg(test)]
    pub fn module(&self) -> &PsModule {
        lookup(&self.registry, self.module).expect("registered at construction")
    }

    #[cfg(test)]
    pub fn plant(&self) -> &SharedPlant {
        &self.plant
    }

    fn now_us(&self) -> u64 {
        self.plant.borrow().now_us()
    }

    /// Executes one operator line and returns the lines to print.
    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let at = self.now_us();
        self.log(at, TranscriptRole::Host, trimmed)?;

        let mut lines = Vec::new();
        if let Some(rest) = strip_keyword(trimmed, "sim") {
            self.handle_sim(rest, &mut lines)?;
        } else {
            self.handle_console(trimmed, &mut lines)?;
        }

        for line in &lines {
            self.log(at, TranscriptRole::Emulator, line)?;
        }
        Ok(lines)
    }

    fn handle_console(&mut self, line: &str, lines: &mut Vec<String>) -> io::Result<()> {
        match self.executor.execute(line) {
            Ok(CommandOutcome::Queued(command)) => {
                lines.push(format!("ok: {command}"));
                self.advance(SETTLE_US, lines)?;
            }
            Ok(CommandOutcome::Status) => self.write_status(lines)?,
            Ok(CommandOutcome::Help(help)) => {
                let mut text = String::new();
                let _ = write_help(&mut text, help.topic);
                lines.extend(text.lines().map(str::to_string));
                if help.topic.is_none() {
                    lines.extend(SIM_HELP.iter().map(|line| (*line).to_string()));
                }
            }
            Err(err) => lines.push(format!("error: {err}")),
        }
        Ok(())
    }

    fn handle_sim(&mut self, args: &str, lines: &mut Vec<String>) -> io::Result<()> {
        let mut words = args.split_whitespace();
        let verb = words.next().unwrap_or("");
        let argument = words.next();
        match (verb.to_ascii_lowercase().as_str(), argument) {
            ("run", Some(ms)) => match ms.parse::<u64>() {
                Ok(ms) => {
                    self.advance(ms.saturating_mul(1_000), lines)?;
                    lines.push(format!("ran {ms} ms"));
                }
                Err(_) => lines.push(format!("error: `{ms}` is not a duration in ms")),
            },
            ("short", None) => self.inject(lines, "load short", |faults| faults.short = true)?,
            ("weld", None) => self.inject(lines, "welded contactors", |faults| faults.welded = true)?,
            ("sag", None) => self.inject(lines, "supply sag", |faults| faults.sag = true)?,
            ("dcct", Some(which @ ("1" | "2"))) => {
                let index = usize::from(which == "2");
                self.inject(lines, "dcct failure", |faults| faults.dcct_failed[index] = true)?;
            }
            ("sync", Some(count)) => match count.parse::<u32>() {
                Ok(count) => {
                    for _ in 0..count {
                        self.control.on_sync_pulse(lookup(&self.registry, self.module)?);
                        self.step_control(lines)?;
                    }
                    lines.push(format!("fired {count} sync pulses"));
                    self.advance(u64::from(SUPERVISOR_PERIOD_US), lines)?;
                }
                Err(_) => lines.push(format!("error: `{count}` is not a pulse count")),
            },
            ("clear", None) => {
                *self.plant.borrow_mut().faults_mut() = Faults::default();
                lines.push("plant faults cleared".to_string());
            }
            ("show", None) => lines.push(self.plant_line()),
            _ => lines.push(format!("error: unknown sim command `{}`", args.trim())),
        }
        Ok(())
    }

    fn inject<F>(&mut self, lines: &mut Vec<String>, label: &str, apply: F) -> io::Result<()>
    where
        F: FnOnce(&mut Faults),
    {
        apply(self.plant.borrow_mut().faults_mut());
        lines.push(format!("injected {label}"));
        self.advance(SETTLE_US, lines)
    }

    /// Runs the control interrupt and the supervisor for `micros` of
    /// simulated time, collecting rejections and telemetry.
    ///
    /// # Errors
    ///
    /// Fails when the session's module is missing from its registry.
    pub fn advance(&mut self, micros: u64, lines: &mut Vec<String>) -> io::Result<()> {
        let end = self.now_us().saturating_add(micros);
        while self.now_us() < end {
            self.step_control(lines)?;
        }
        Ok(())
    }

    fn step_control(&mut self, lines: &mut Vec<String>) -> io::Result<()> {
        self.plant.borrow_mut().advance(self.period_us);
        self.control.step(lookup(&self.registry, self.module)?, &self.signals);
        self.since_supervisor_us += self.period_us;
        if self.since_supervisor_us >= SUPERVISOR_PERIOD_US {
            self.since_supervisor_us = 0;
            self.supervise(lines)?;
        }
        Ok(())
    }

    fn supervise(&mut self, lines: &mut Vec<String>) -> io::Result<()> {
        let now = self.now_us();
        let report = self.supervisor.run_once(
            self.executor.producer_mut(),
            lookup(&self.registry, self.module)?,
            &self.signals,
            now,
        );
        for (command, error) in &report.rejected {
            lines.push(format!("rejected: {command}: {error}"));
        }

        for record in self.supervisor.telemetry().since(self.next_record) {
            let mut text = String::new();
            let _ = write_record(&mut text, record, &self.names);
            lines.push(text);
            self.next_record = record.id.wrapping_add(1);
        }
        Ok(())
    }

    fn write_status(&self, lines: &mut Vec<String>) -> io::Result<()> {
        let snapshot = ModuleSnapshot::capture(lookup(&self.registry, self.module)?);
        let formatter = StatusFormatter::new(&snapshot, self.names);
        let mut text = String::new();
        let _ = formatter.write_state_line(&mut text);
        text.push('\n');
        let _ = formatter.write_reference_line(&mut text);
        text.push('\n');
        let _ = formatter.write_latched_line(&mut text);
        lines.extend(text.lines().map(str::to_string));
        lines.push(self.plant_line());
        Ok(())
    }

    fn plant_line(&self) -> String {
        let plant = self.plant.borrow();
        let mut line = format!(
            "plant t={}ms duty={:.3} i_load={:.3} v_dclink={:.2} v_capbank={:.2} output={}",
            plant.now_us() / 1_000,
            self.control.duty(),
            plant.i_load(),
            plant.v_dclink(),
            plant.v_capbank(),
            if plant.output_enabled() { "on" } else { "off" },
        );
        let contactors = [
            ("dclink", OutputPin::DcLinkContactor),
            ("mains", OutputPin::AcMainsContactor),
            ("precharge", OutputPin::PrechargeRelay),
        ];
        for (label, pin) in contactors {
            if plant.contact_closed(pin) {
                let _ = write!(line, " {label}=closed");
            }
        }
        let faults = plant.faults();
        if faults != Faults::default() {
            let _ = write!(line, " faults={faults:?}");
        }
        line
    }

    fn log(&mut self, at_us: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        match self.transcript.as_mut() {
            Some(transcript) => transcript.append_line(at_us, role, line),
            None => Ok(()),
        }
    }
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let head = line.get(..keyword.len())?;
    let rest = &line[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && (rest.is_empty() || rest.starts_with(' ')))
        .then_some(rest)
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, model: PsModel) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# psu-emulator transcript, model {}", model.label())?;
        writeln!(logger.writer, "# Timestamps are simulated milliseconds")?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, at_us: u64, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            at_us / 1_000,
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psu_core::ps_module::PsState;

    fn fap() -> Session {
        Session::new(PsModel::Fap, None).expect("session")
    }

    fn contains(lines: &[String], needle: &str) -> bool {
        lines.iter().any(|line| line.contains(needle))
    }

    #[test]
    fn turn_on_closes_the_contactor_and_reaches_slowref() {
        let mut session = fap();
        let lines = session.handle_command("turn-on").expect("io");

        assert_eq!(lines[0], "ok: turn-on");
        assert!(contains(&lines, "state-changed initializing"), "{lines:?}");
        assert!(contains(&lines, "state-changed slowref"), "{lines:?}");
        assert_eq!(session.module().state(), PsState::SlowRef);
        assert!(session.plant().borrow().contact_closed(OutputPin::DcLinkContactor));
        assert!(session.plant().borrow().output_enabled());
    }

    #[test]
    fn load_short_trips_overcurrent_and_reset_recovers() {
        let mut session = fap();
        session.handle_command("turn-on").expect("io");
        session.handle_command("setpoint 10").expect("io");
        // the open-loop reference slews at 10 %/s
        session.handle_command("sim run 1000").expect("io");

        session.handle_command("sim short").expect("io");
        let lines = session.handle_command("sim run 100").expect("io");
        assert!(
            contains(&lines, "hard interlock latched: load_overcurrent"),
            "{lines:?}"
        );
        assert_eq!(session.module().state(), PsState::Interlock);
        assert!(!session.plant().borrow().output_enabled());

        session.handle_command("sim clear").expect("io");
        let lines = session.handle_command("reset").expect("io");
        assert!(contains(&lines, "interlocks-reset"), "{lines:?}");
        assert_eq!(session.module().state(), PsState::Off);
    }

    #[test]
    fn status_includes_plant_readings() {
        let mut session = fap();
        let lines = session.handle_command("status").expect("io");
        assert_eq!(lines[0], "state off loop=open model=fap");
        assert!(lines.last().is_some_and(|line| line.starts_with("plant t=")));
    }

    #[test]
    fn sim_commands_are_validated() {
        let mut session = fap();
        let lines = session.handle_command("sim run soon").expect("io");
        assert_eq!(lines, ["error: `soon` is not a duration in ms"]);
        let lines = session.handle_command("sim explode").expect("io");
        assert_eq!(lines, ["error: unknown sim command `explode`"]);
        let lines = session.handle_command("simulate").expect("io");
        assert!(lines[0].starts_with("error: parse error"), "{lines:?}");
    }

    #[test]
    fn acdc_turn_on_runs_open_loop() {
        let mut session = Session::new(PsModel::FacAcDc, None).expect("session");
        session.handle_command("turn-on").expect("io");
        assert_eq!(session.module().state(), PsState::SlowRef);
        assert!(session.module().is_open_loop());
        assert!(session.plant().borrow().contact_closed(OutputPin::AcMainsContactor));
    }
}
