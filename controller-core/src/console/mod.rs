//! Operator console shared between firmware and emulator targets.
//!
//! A line is lexed and parsed by [`grammar`]; commands that act on the
//! module are turned into [`PsCommand`] values and enqueued for the
//! supervisor, while `status` and `help` are answered by the front-end
//! through [`status`].

use core::fmt;

use crate::supervisor::{CommandEnqueueError, CommandQueueProducer, PsCommand};

pub mod catalog;
pub mod grammar;
pub mod status;

use grammar::{Command, HelpCommand, LoopMode, ParseError};

/// What the front-end should do after a line was accepted.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome<'a> {
    /// Command handed to the supervisor.
    Queued(PsCommand),
    /// Print the module status.
    Status,
    /// Print the command list or one command's usage.
    Help(HelpCommand<'a>),
}

/// Errors surfaced while executing a line.
#[derive(Debug, PartialEq)]
pub enum ConsoleError<'a, E> {
    Parse(ParseError<'a>),
    Enqueue(CommandEnqueueError<E>),
}

impl<'a, E> From<ParseError<'a>> for ConsoleError<'a, E> {
    fn from(error: ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<E: fmt::Display> fmt::Display for ConsoleError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Parse(err) => write!(f, "parse error: {err}"),
            ConsoleError::Enqueue(err) => err.fmt(f),
        }
    }
}

/// Dispatches console lines into the supervisor queue.
pub struct CommandExecutor<P> {
    producer: P,
}

impl<P> CommandExecutor<P> {
    #[must_use]
    pub const fn new(producer: P) -> Self {
        Self { producer }
    }

    #[must_use]
    pub fn producer(&self) -> &P {
        &self.producer
    }

    pub fn producer_mut(&mut self) -> &mut P {
        &mut self.producer
    }

    #[must_use]
    pub fn into_inner(self) -> P {
        self.producer
    }
}

impl<P> CommandExecutor<P>
where
    P: CommandQueueProducer,
{
    /// Parses and executes one console line.
    ///
    /// # Errors
    ///
    /// Returns [`ConsoleError::Parse`] for malformed input and
    /// [`ConsoleError::Enqueue`] when the supervisor queue refuses the
    /// command.
    pub fn execute<'a>(
        &mut self,
        line: &'a str,
    ) -> Result<CommandOutcome<'a>, ConsoleError<'a, P::Error>> {
        let command = grammar::parse(line)?;
        let request = match command {
            Command::Status => return Ok(CommandOutcome::Status),
            Command::Help(help) => return Ok(CommandOutcome::Help(help)),
            Command::TurnOn => PsCommand::TurnOn,
            Command::TurnOff => PsCommand::TurnOff,
            Command::Reset => PsCommand::ResetInterlocks,
            Command::Setpoint(value) => PsCommand::SetSetpoint(value),
            Command::Mode(state) => PsCommand::SelectMode(state),
            Command::Loop(LoopMode::Open) => PsCommand::OpenLoop,
            Command::Loop(LoopMode::Closed) => PsCommand::CloseLoop,
            Command::Interlock { kind, index } => PsCommand::SetInterlock(kind, index),
        };

        self.producer
            .try_enqueue(request)
            .map_err(ConsoleError::Enqueue)?;
        Ok(CommandOutcome::Queued(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event_manager::InterlockKind,
        ps_module::PsState,
        supervisor::{CommandDeque, CommandQueueConsumer},
    };

    #[test]
    fn module_commands_are_queued_in_order() {
        let mut executor = CommandExecutor::new(CommandDeque::<4>::new());

        assert_eq!(
            executor.execute("turn-on"),
            Ok(CommandOutcome::Queued(PsCommand::TurnOn))
        );
        assert_eq!(
            executor.execute("mode cycle"),
            Ok(CommandOutcome::Queued(PsCommand::SelectMode(PsState::Cycle)))
        );
        assert_eq!(
            executor.execute("interlock hard 2"),
            Ok(CommandOutcome::Queued(PsCommand::SetInterlock(
                InterlockKind::Hard,
                2
            )))
        );

        let queue = executor.producer_mut();
        assert_eq!(queue.try_dequeue(), Ok(Some(PsCommand::TurnOn)));
        assert_eq!(
            queue.try_dequeue(),
            Ok(Some(PsCommand::SelectMode(PsState::Cycle)))
        );
    }

    #[test]
    fn status_and_help_stay_local() {
        let mut executor = CommandExecutor::new(CommandDeque::<1>::new());
        assert_eq!(executor.execute("status"), Ok(CommandOutcome::Status));
        assert_eq!(
            executor.execute("help reset"),
            Ok(CommandOutcome::Help(HelpCommand {
                topic: Some("reset"),
            }))
        );
        assert_eq!(executor.producer().len(), Some(0));
    }

    #[test]
    fn full_queue_and_bad_lines_are_reported() {
        let mut executor = CommandExecutor::new(CommandDeque::<1>::new());
        executor.execute("reset").expect("slot free");
        assert_eq!(
            executor.execute("turn-off"),
            Err(ConsoleError::Enqueue(CommandEnqueueError::QueueFull))
        );
        assert!(matches!(
            executor.execute("setpoint high"),
            Err(ConsoleError::Parse(_))
        ));
    }
}
