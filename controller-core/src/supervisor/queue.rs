//! Operator commands and the bounded queue that carries them from the
//! console to the background supervisor.

use core::{convert::Infallible, fmt};

use heapless::Deque;

use crate::{event_manager::InterlockKind, ps_module::PsState};

/// Commands drained by the supervisor once per iteration.
pub const COMMAND_QUEUE_CAPACITY: usize = 8;

/// Request addressed to the power-supply module.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PsCommand {
    TurnOn,
    TurnOff,
    ResetInterlocks,
    SetSetpoint(f32),
    SelectMode(PsState),
    OpenLoop,
    CloseLoop,
    /// Operator-forced latch, skipping debounce.
    SetInterlock(InterlockKind, u8),
}

impl fmt::Display for PsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PsCommand::TurnOn => f.write_str("turn-on"),
            PsCommand::TurnOff => f.write_str("turn-off"),
            PsCommand::ResetInterlocks => f.write_str("reset"),
            PsCommand::SetSetpoint(value) => write!(f, "setpoint {value}"),
            PsCommand::SelectMode(state) => write!(f, "mode {state}"),
            PsCommand::OpenLoop => f.write_str("loop open"),
            PsCommand::CloseLoop => f.write_str("loop closed"),
            PsCommand::SetInterlock(kind, index) => write!(f, "interlock {kind} {index}"),
        }
    }
}

/// Errors emitted when attempting to enqueue a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandEnqueueError<E = ()> {
    /// Queue has reached its maximum capacity.
    QueueFull,
    /// Queue has been disconnected from its consumer.
    Disconnected,
    /// Transport-specific failure.
    Other(E),
}

impl<E> CommandEnqueueError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> CommandEnqueueError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            CommandEnqueueError::QueueFull => CommandEnqueueError::QueueFull,
            CommandEnqueueError::Disconnected => CommandEnqueueError::Disconnected,
            CommandEnqueueError::Other(err) => CommandEnqueueError::Other(mapper(err)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for CommandEnqueueError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandEnqueueError::QueueFull => f.write_str("command queue full"),
            CommandEnqueueError::Disconnected => f.write_str("supervisor disconnected"),
            CommandEnqueueError::Other(err) => write!(f, "enqueue failed: {err}"),
        }
    }
}

/// Errors emitted when attempting to dequeue a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommandDequeueError<E = ()> {
    /// Queue has been disconnected from its producer.
    Disconnected,
    /// Transport-specific failure.
    Other(E),
}

impl<E> CommandDequeueError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> CommandDequeueError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            CommandDequeueError::Disconnected => CommandDequeueError::Disconnected,
            CommandDequeueError::Other(err) => CommandDequeueError::Other(mapper(err)),
        }
    }
}

/// Sending half used by the console.
pub trait CommandQueueProducer {
    /// Transport-specific error type.
    type Error;

    /// Attempts to enqueue a command without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`CommandEnqueueError::QueueFull`] when no slot is free, or a
    /// transport failure.
    fn try_enqueue(&mut self, command: PsCommand) -> Result<(), CommandEnqueueError<Self::Error>>;

    /// Returns the queue capacity if it is known.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Returns the current queue depth if it can be observed.
    fn len(&self) -> Option<usize> {
        None
    }

    fn is_empty(&self) -> Option<bool> {
        self.len().map(|current| current == 0)
    }

    /// Free slots, when both capacity and depth are observable.
    fn remaining(&self) -> Option<usize> {
        match (self.capacity(), self.len()) {
            (Some(capacity), Some(len)) => Some(capacity.saturating_sub(len)),
            _ => None,
        }
    }

    fn is_full(&self) -> Option<bool> {
        self.remaining().map(|slot_count| slot_count == 0)
    }
}

/// Receiving half drained by the supervisor.
pub trait CommandQueueConsumer {
    /// Transport-specific error type.
    type Error;

    /// Attempts to dequeue a command without blocking.
    ///
    /// Returns `Ok(None)` when the queue is currently empty.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport has been disconnected or failed.
    fn try_dequeue(&mut self) -> Result<Option<PsCommand>, CommandDequeueError<Self::Error>>;
}

/// In-memory queue serving as both halves, for single-context callers.
pub struct CommandDeque<const N: usize = COMMAND_QUEUE_CAPACITY> {
    inner: Deque<PsCommand, N>,
}

impl<const N: usize> CommandDeque<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Deque::new(),
        }
    }
}

impl<const N: usize> Default for CommandDeque<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CommandQueueProducer for CommandDeque<N> {
    type Error = Infallible;

    fn try_enqueue(&mut self, command: PsCommand) -> Result<(), CommandEnqueueError<Infallible>> {
        self.inner
            .push_back(command)
            .map_err(|_| CommandEnqueueError::QueueFull)
    }

    fn capacity(&self) -> Option<usize> {
        Some(N)
    }

    fn len(&self) -> Option<usize> {
        Some(self.inner.len())
    }
}

impl<const N: usize> CommandQueueConsumer for CommandDeque<N> {
    type Error = Infallible;

    fn try_dequeue(&mut self) -> Result<Option<PsCommand>, CommandDequeueError<Infallible>> {
        Ok(self.inner.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deque_is_fifo_and_bounded() {
        let mut queue: CommandDeque<2> = CommandDeque::new();
        assert_eq!(queue.is_empty(), Some(true));

        queue.try_enqueue(PsCommand::TurnOn).expect("slot free");
        queue.try_enqueue(PsCommand::ResetInterlocks).expect("slot free");
        assert_eq!(queue.is_full(), Some(true));
        assert_eq!(
            queue.try_enqueue(PsCommand::TurnOff),
            Err(CommandEnqueueError::QueueFull)
        );

        assert_eq!(queue.try_dequeue(), Ok(Some(PsCommand::TurnOn)));
        assert_eq!(queue.remaining(), Some(1));
        assert_eq!(queue.try_dequeue(), Ok(Some(PsCommand::ResetInterlocks)));
        assert_eq!(queue.try_dequeue(), Ok(None));
    }

    #[test]
    fn map_other_preserves_variant() {
        let err: CommandEnqueueError<u8> = CommandEnqueueError::Other(7);
        assert_eq!(err.map_other(u16::from), CommandEnqueueError::Other(7u16));

        let full: CommandEnqueueError<u8> = CommandEnqueueError::QueueFull;
        assert_eq!(full.map_other(u16::from), CommandEnqueueError::QueueFull);

        let gone: CommandDequeueError<u8> = CommandDequeueError::Disconnected;
        assert_eq!(gone.map_other(u16::from), CommandDequeueError::Disconnected);
    }
}
