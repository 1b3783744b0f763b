//! Mirrors supervisor telemetry to the log and the status cells.
//!
//! Records are rendered with the console formatter so bring-up logs and the
//! operator `status` output name interlocks the same way. On the target the
//! line goes to defmt; host builds print to stdout.

use heapless::String;
use psu_core::{
    console::status::{InterlockNames, write_record},
    telemetry::{EventId, TelemetryRecorder},
};

use crate::status::StatusCells;

const LOG_LINE_CAPACITY: usize = 96;

/// Remembers which records have already been published.
pub struct TelemetryPublisher {
    names: InterlockNames,
    next: EventId,
}

impl TelemetryPublisher {
    pub const fn new(names: InterlockNames) -> Self {
        Self { names, next: 0 }
    }

    /// Publishes every record emitted since the previous call and returns
    /// how many were new. Records the ring already overwrote are skipped.
    pub fn publish<const N: usize>(
        &mut self,
        recorder: &TelemetryRecorder<N>,
        cells: &StatusCells,
    ) -> usize {
        let mut published = 0;
        for record in recorder.since(self.next) {
            let mut line = String::<LOG_LINE_CAPACITY>::new();
            // a record that does not fit is logged truncated
            let _ = write_record(&mut line, record, &self.names);
            emit_log(line.as_str());
            cells.record_event(record);
            self.next = record.id.wrapping_add(1);
            published += 1;
        }
        published
    }
}

#[cfg(target_os = "none")]
fn emit_log(line: &str) {
    defmt::info!("telemetry: {}", line);
}

#[cfg(not(target_os = "none"))]
fn emit_log(line: &str) {
    println!("telemetry: {line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use psu_core::{ps_module::PsState, telemetry::TelemetryEventKind};

    const NAMES: InterlockNames = InterlockNames {
        hard: &["overcurrent"],
        soft: &[],
        alarms: &[],
    };

    #[test]
    fn publishes_each_record_once() {
        let cells = StatusCells::new();
        let mut recorder: TelemetryRecorder<8> = TelemetryRecorder::new();
        let mut publisher = TelemetryPublisher::new(NAMES);

        recorder.record(TelemetryEventKind::StateChanged(PsState::SlowRef), 10);
        recorder.record(TelemetryEventKind::InterlocksReset, 20);
        assert_eq!(publisher.publish(&recorder, &cells), 2);
        assert_eq!(publisher.publish(&recorder, &cells), 0);

        recorder.record(TelemetryEventKind::StateChanged(PsState::Off), 30);
        assert_eq!(publisher.publish(&recorder, &cells), 1);
        assert_eq!(
            cells.last_event().map(|record| record.event),
            Some(TelemetryEventKind::StateChanged(PsState::Off))
        );
    }
}
