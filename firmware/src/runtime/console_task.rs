use psu_core::ps_module::ModuleId;

use super::{CONSOLE_RX, CONSOLE_TX, ConsoleEvent, ConsoleFrame, STATUS, registered_module};
use crate::console::{ConsoleSession, ConsoleView, Reply};
use crate::queue::CommandProducer;
use crate::usb;

#[embassy_executor::task]
pub async fn run(mut session: ConsoleSession<CommandProducer<'static>>, id: ModuleId) -> ! {
    let view = ConsoleView {
        module: registered_module(id),
        cells: &STATUS,
    };
    let mut reply = Reply::new();

    loop {
        match CONSOLE_RX.receive().await {
            ConsoleEvent::Connected => {
                session.reset();
                session.banner(&mut reply);
                send(&reply).await;
            }
            ConsoleEvent::Data(frame) => {
                for byte in frame {
                    if session.ingest(byte, view, &mut reply) {
                        send(&reply).await;
                    }
                }
            }
        }
    }
}

async fn send(reply: &Reply) {
    for chunk in reply.as_bytes().chunks(usb::MAX_PACKET_SIZE as usize) {
        if let Ok(frame) = ConsoleFrame::from_slice(chunk) {
            CONSOLE_TX.send(frame).await;
        }
    }
}
