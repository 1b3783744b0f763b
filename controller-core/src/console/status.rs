//! Text rendering shared by the firmware console and the emulator.

use core::fmt;

use crate::{
    event_manager::InterlockKind,
    supervisor::ModuleSnapshot,
    telemetry::TelemetryRecord,
    topology::Topology,
};

use super::catalog::{self, CommandSpec};

/// Bit-name tables of one topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterlockNames {
    pub hard: &'static [&'static str],
    pub soft: &'static [&'static str],
    pub alarms: &'static [&'static str],
}

impl InterlockNames {
    #[must_use]
    pub fn of<T: Topology + ?Sized>(topology: &T) -> Self {
        Self {
            hard: topology.hard_interlocks(),
            soft: topology.soft_interlocks(),
            alarms: topology.alarms(),
        }
    }

    /// Name of bit `index`, if the table has one.
    #[must_use]
    pub fn name(&self, kind: InterlockKind, index: usize) -> Option<&'static str> {
        match kind {
            InterlockKind::Hard => self.hard.get(index).copied(),
            InterlockKind::Soft => self.soft.get(index).copied(),
        }
    }
}

/// Renders a [`ModuleSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a ModuleSnapshot,
    names: InterlockNames,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a ModuleSnapshot, names: InterlockNames) -> Self {
        Self { snapshot, names }
    }

    /// `state slowref loop=closed model=fap`
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_state_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "state {} loop={} model=",
            self.snapshot.state,
            if self.snapshot.open_loop { "open" } else { "closed" }
        )?;
        match self.snapshot.model {
            Some(model) => writer.write_str(model.label()),
            None => writer.write_str("unconfigured"),
        }
    }

    /// `ref setpoint=1.000 reference=0.500`
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_reference_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        write!(
            writer,
            "ref setpoint={:.3} reference={:.3}",
            self.snapshot.setpoint, self.snapshot.reference
        )
    }

    /// `hard=load_overcurrent,dclink_undervoltage`, or `hard=none`.
    ///
    /// # Errors
    ///
    /// Propagates writer failures.
    pub fn write_latched_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let latched = self.snapshot.latched;
        write_mask(writer, "hard", self.names.hard, latched.hard)?;
        writer.write_char(' ')?;
        write_mask(writer, "soft", self.names.soft, latched.soft)?;
        writer.write_char(' ')?;
        write_mask(writer, "alarms", self.names.alarms, latched.alarms)
    }
}

fn write_mask<W: fmt::Write>(
    writer: &mut W,
    label: &str,
    names: &[&str],
    mask: u32,
) -> fmt::Result {
    write!(writer, "{label}=")?;
    if mask == 0 {
        return writer.write_str("none");
    }
    let mut first = true;
    for bit in (0..32).filter(|bit| mask & (1 << bit) != 0) {
        if !first {
            writer.write_char(',')?;
        }
        first = false;
        match names.get(bit) {
            Some(name) => writer.write_str(name)?,
            None => write!(writer, "#{bit}")?,
        }
    }
    Ok(())
}

/// Writes one telemetry record, naming interlock bits where possible.
///
/// # Errors
///
/// Propagates writer failures.
pub fn write_record<W: fmt::Write>(
    writer: &mut W,
    record: &TelemetryRecord,
    names: &InterlockNames,
) -> fmt::Result {
    use crate::telemetry::TelemetryEventKind as Event;

    write!(writer, "[{:>10}us] ", record.timestamp_us)?;
    match record.event {
        Event::InterlockLatched(kind, index) => {
            match names.name(kind, usize::from(index)) {
                Some(name) => write!(writer, "{kind} interlock latched: {name}"),
                None => write!(writer, "{}", record.event),
            }
        }
        Event::TurnOnAborted(kind, index) => match names.name(kind, usize::from(index)) {
            Some(name) => write!(writer, "turn-on aborted: {name}"),
            None => write!(writer, "{}", record.event),
        },
        Event::AlarmRaised(index) => match names.alarms.get(usize::from(index)) {
            Some(name) => write!(writer, "alarm raised: {name}"),
            None => write!(writer, "{}", record.event),
        },
        other => write!(writer, "{other}"),
    }
}

/// Writes the command list, or the usage of `topic`.
///
/// # Errors
///
/// Propagates writer failures.
pub fn write_help<W: fmt::Write>(writer: &mut W, topic: Option<&str>) -> fmt::Result {
    match topic {
        Some(name) => match catalog::find(name) {
            Some(spec) => write_spec(writer, spec),
            None => writeln!(writer, "unknown command `{name}`"),
        },
        None => catalog::commands()
            .iter()
            .try_for_each(|spec| write_spec(writer, spec)),
    }
}

fn write_spec<W: fmt::Write>(writer: &mut W, spec: &CommandSpec) -> fmt::Result {
    writeln!(writer, "{:<48} {}", spec.usage, spec.summary)
}
