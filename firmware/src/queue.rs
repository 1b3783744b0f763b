//! Embassy channel carrying operator commands from the console task to the
//! supervisor task, wrapped so both ends satisfy the `psu-core` queue traits.

use core::convert::Infallible;

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TryReceiveError, TrySendError};
use psu_core::supervisor::{
    COMMAND_QUEUE_CAPACITY, CommandDequeueError, CommandEnqueueError, CommandQueueConsumer,
    CommandQueueProducer, PsCommand,
};

#[cfg(target_os = "none")]
type QueueMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
type QueueMutex = NoopRawMutex;

pub type CommandQueue = Channel<QueueMutex, PsCommand, COMMAND_QUEUE_CAPACITY>;
pub type CommandSender<'a> = Sender<'a, QueueMutex, PsCommand, COMMAND_QUEUE_CAPACITY>;
pub type CommandReceiver<'a> = Receiver<'a, QueueMutex, PsCommand, COMMAND_QUEUE_CAPACITY>;

/// Console side of the command channel.
pub struct CommandProducer<'a> {
    sender: CommandSender<'a>,
}

impl<'a> CommandProducer<'a> {
    pub fn new(sender: CommandSender<'a>) -> Self {
        Self { sender }
    }
}

impl CommandQueueProducer for CommandProducer<'_> {
    type Error = Infallible;

    fn try_enqueue(&mut self, command: PsCommand) -> Result<(), CommandEnqueueError<Infallible>> {
        match self.sender.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CommandEnqueueError::QueueFull),
        }
    }

    fn capacity(&self) -> Option<usize> {
        Some(COMMAND_QUEUE_CAPACITY)
    }
}

/// Supervisor side of the command channel.
pub struct CommandConsumer<'a> {
    receiver: CommandReceiver<'a>,
}

impl<'a> CommandConsumer<'a> {
    pub fn new(receiver: CommandReceiver<'a>) -> Self {
        Self { receiver }
    }

    /// Waits until a command is queued, without removing it.
    pub async fn ready(&mut self) {
        self.receiver.ready_to_receive().await;
    }
}

impl CommandQueueConsumer for CommandConsumer<'_> {
    type Error = Infallible;

    fn try_dequeue(&mut self) -> Result<Option<PsCommand>, CommandDequeueError<Infallible>> {
        match self.receiver.try_receive() {
            Ok(command) => Ok(Some(command)),
            Err(TryReceiveError::Empty) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_halves_round_trip_in_order() {
        let queue = CommandQueue::new();
        let mut producer = CommandProducer::new(queue.sender());
        let mut consumer = CommandConsumer::new(queue.receiver());

        producer.try_enqueue(PsCommand::TurnOn).expect("slot");
        producer
            .try_enqueue(PsCommand::SetSetpoint(2.0))
            .expect("slot");

        assert_eq!(consumer.try_dequeue(), Ok(Some(PsCommand::TurnOn)));
        assert_eq!(
            consumer.try_dequeue(),
            Ok(Some(PsCommand::SetSetpoint(2.0)))
        );
        assert_eq!(consumer.try_dequeue(), Ok(None));
    }

    #[test]
    fn full_channel_reports_queue_full() {
        let queue = CommandQueue::new();
        let mut producer = CommandProducer::new(queue.sender());
        for _ in 0..COMMAND_QUEUE_CAPACITY {
            producer.try_enqueue(PsCommand::TurnOff).expect("slot");
        }
        assert_eq!(
            producer.try_enqueue(PsCommand::TurnOff),
            Err(CommandEnqueueError::QueueFull)
        );
    }
}
