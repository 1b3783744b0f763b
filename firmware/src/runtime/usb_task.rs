use embassy_futures::join::join;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Sender};
use embassy_usb::driver::{Driver, EndpointError};

use super::{CONSOLE_RX, CONSOLE_TX, ConsoleEvent, ConsoleFrame, USB_STORAGE};
use crate::usb::{self, ConsolePort, UsbDeviceStrings};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let (mut device, port) = usb::build(driver, storage, UsbDeviceStrings::default());

    join(device.run(), run_console(port)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_console<D: Driver<'static>>(port: ConsolePort<D>) -> ! {
    let ConsolePort {
        mut sender,
        mut receiver,
        control,
    } = port;
    let mut ingress = [0u8; usb::MAX_PACKET_SIZE as usize];
    let mut pending_tx: Option<ConsoleFrame> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        // replies queued for a previous host are stale
        pending_tx = None;
        while CONSOLE_TX.try_receive().is_ok() {}
        CONSOLE_RX.send(ConsoleEvent::Connected).await;
        defmt::info!("usb: console connected");

        loop {
            match select3(
                receiver.read_packet(&mut ingress),
                async {
                    let frame = match pending_tx.take() {
                        Some(frame) => frame,
                        None => CONSOLE_TX.receive().await,
                    };
                    let result = sender.write_packet(&frame).await;
                    if result.is_err() {
                        pending_tx = Some(frame);
                    }
                    result
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(0)) => {}
                Either3::First(Ok(count)) => {
                    let Ok(frame) = ConsoleFrame::from_slice(&ingress[..count]) else {
                        defmt::warn!("usb: dropping console packet len={}", count);
                        continue;
                    };
                    CONSOLE_RX.send(ConsoleEvent::Data(frame)).await;
                }
                Either3::First(Err(EndpointError::Disabled))
                | Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console endpoint disabled");
                    break;
                }
                Either3::First(Err(_)) => defmt::warn!("usb: console read error"),
                Either3::Second(Err(_)) => defmt::warn!("usb: console write error"),
                Either3::Second(Ok(())) => {}
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: host dropped DTR");
                        break;
                    }
                }
            }
        }
    }
}

async fn wait_for_dtr<D: Driver<'static>>(control: &ControlChanged<'static>, sender: &Sender<'static, D>) {
    while !sender.dtr() {
        control.control_changed().await;
    }
}
