//! Line-oriented operator console on top of the `psu-core` command executor.
//!
//! Bytes arrive from the USB CDC interface one packet at a time; a CR or LF
//! completes the line, which is executed and answered with a text reply.

use core::fmt::{self, Write};
use core::str;

use heapless::{String, Vec};
use psu_core::{
    console::{
        CommandExecutor, CommandOutcome,
        status::{InterlockNames, StatusFormatter, write_help, write_record},
    },
    ps_module::PsModule,
    supervisor::{CommandQueueProducer, ModuleSnapshot},
};

use crate::status::StatusCells;

/// Maximum bytes accepted on one line, terminator excluded.
pub const MAX_LINE_LEN: usize = 96;

/// Room for the full `help` listing.
pub const REPLY_CAPACITY: usize = 1024;

pub type Reply = String<REPLY_CAPACITY>;

const PROMPT: &str = "psu> ";

/// Shared state the console reads to answer `status`.
#[derive(Clone, Copy)]
pub struct ConsoleView<'a> {
    pub module: &'a PsModule,
    pub cells: &'a StatusCells,
}

pub struct ConsoleSession<P> {
    executor: CommandExecutor<P>,
    names: InterlockNames,
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl<P> ConsoleSession<P>
where
    P: CommandQueueProducer,
    P::Error: fmt::Display,
{
    pub fn new(producer: P, names: InterlockNames) -> Self {
        Self {
            executor: CommandExecutor::new(producer),
            names,
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Text sent when a host opens the port.
    pub fn banner(&self, reply: &mut Reply) {
        reply.clear();
        let _ = writeln!(reply, "power-supply console, `help` lists commands");
        let _ = reply.push_str(PROMPT);
    }

    /// Drops any partial line, for example after the host disconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflowed = false;
    }

    /// Feeds one byte. Returns `true` when `reply` holds a response to send.
    pub fn ingest(&mut self, byte: u8, view: ConsoleView<'_>, reply: &mut Reply) -> bool {
        match byte {
            b'\r' | b'\n' => self.finish_line(view, reply),
            0x08 | 0x7f => {
                self.buffer.pop();
                false
            }
            value => {
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                false
            }
        }
    }

    fn finish_line(&mut self, view: ConsoleView<'_>, reply: &mut Reply) -> bool {
        reply.clear();
        if self.overflowed {
            let _ = writeln!(reply, "error: line longer than {MAX_LINE_LEN} bytes");
        } else if self.buffer.is_empty() {
            return false;
        } else {
            let line_bytes = self.buffer.clone();
            match str::from_utf8(&line_bytes) {
                Ok(line) => {
                    let _ = self.execute(line, view, reply);
                }
                Err(_) => {
                    let _ = writeln!(reply, "error: input is not valid UTF-8");
                }
            }
        }
        self.reset();
        let _ = reply.push_str(PROMPT);
        true
    }

    fn execute(&mut self, line: &str, view: ConsoleView<'_>, reply: &mut Reply) -> fmt::Result {
        match self.executor.execute(line) {
            Ok(CommandOutcome::Queued(command)) => writeln!(reply, "ok: {command}"),
            Ok(CommandOutcome::Status) => self.write_status(view, reply),
            Ok(CommandOutcome::Help(help)) => write_help(reply, help.topic),
            Err(err) => writeln!(reply, "error: {err}"),
        }
    }

    fn write_status(&self, view: ConsoleView<'_>, reply: &mut Reply) -> fmt::Result {
        let snapshot = ModuleSnapshot::capture(view.module);
        let formatter = StatusFormatter::new(&snapshot, self.names);
        formatter.write_state_line(reply)?;
        reply.write_char('\n')?;
        formatter.write_reference_line(reply)?;
        reply.write_char('\n')?;
        formatter.write_latched_line(reply)?;
        reply.write_char('\n')?;

        let counters = view.cells.counters();
        writeln!(
            reply,
            "supervisor iterations={} rejected={} shutdowns={}",
            counters.iterations, counters.rejected, counters.shutdowns
        )?;
        if let Some(record) = view.cells.last_event() {
            reply.write_str("last ")?;
            write_record(reply, &record, &self.names)?;
            reply.write_char('\n')?;
        }
        Ok(())
    }
}
