//! Control interrupt body, run on the high-priority executor.

use embassy_futures::select::{Either, select};
use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Ticker};
use psu_core::ps_module::ModuleId;

use super::{ControlLoopImpl, SIGNALS, registered_module};

#[embassy_executor::task]
pub async fn run(mut control: ControlLoopImpl, mut sync: ExtiInput<'static>, id: ModuleId) -> ! {
    let module = registered_module(id);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let hz = control.config().control_hz.max(1.0) as u64;
    let mut ticker = Ticker::every(Duration::from_hz(hz));

    loop {
        match select(ticker.next(), sync.wait_for_rising_edge()).await {
            Either::First(()) => control.step(module, &SIGNALS),
            Either::Second(()) => control.on_sync_pulse(module),
        }
    }
}
