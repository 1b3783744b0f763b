use defmt::Display2Format;
use embassy_futures::select::select;
use embassy_time::{Duration, Instant, Timer};
use psu_core::ps_module::ModuleId;

use super::{SIGNALS, STATUS, SupervisorImpl, registered_module};
use crate::queue::CommandConsumer;
use crate::telemetry::TelemetryPublisher;

/// Longest wait between background iterations when no command arrives.
const ITERATION_PERIOD: Duration = Duration::from_millis(1);

#[embassy_executor::task]
pub async fn run(
    mut supervisor: SupervisorImpl,
    id: ModuleId,
    mut consumer: CommandConsumer<'static>,
    mut publisher: TelemetryPublisher,
) -> ! {
    let module = registered_module(id);
    loop {
        select(consumer.ready(), Timer::after(ITERATION_PERIOD)).await;

        let now = Instant::now().as_micros();
        let report = supervisor.run_once(&mut consumer, module, &SIGNALS, now);
        STATUS.record_iteration(&report);
        for (command, error) in &report.rejected {
            defmt::warn!(
                "supervisor: `{}` rejected: {}",
                Display2Format(command),
                Display2Format(error)
            );
        }
        if report.shutdown_serviced {
            defmt::warn!("supervisor: output shut down after interlock");
        }

        publisher.publish(supervisor.telemetry(), &STATUS);
    }
}
