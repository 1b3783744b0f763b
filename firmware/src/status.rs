//! Cross-task status cells.
//!
//! The supervisor task publishes its latest telemetry record and iteration
//! counters here so the console can answer `status` without touching the
//! supervisor's state. Each cell is an independent atomic; a reader may see
//! counters from two neighbouring iterations, which is fine for display.

use portable_atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use psu_core::{
    supervisor::IterationReport,
    telemetry::{TelemetryEventKind, TelemetryRecord},
};

/// Raw event code stored with an offset so zero means "nothing yet".
const NO_EVENT: u16 = 0;

pub struct StatusCells {
    last_event_code: AtomicU16,
    last_event_id: AtomicU32,
    last_event_micros: AtomicU64,
    iterations: AtomicU32,
    rejected: AtomicU32,
    shutdowns: AtomicU32,
}

/// Counters read back by the console.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SupervisorCounters {
    pub iterations: u32,
    pub rejected: u32,
    pub shutdowns: u32,
}

impl StatusCells {
    pub const fn new() -> Self {
        Self {
            last_event_code: AtomicU16::new(NO_EVENT),
            last_event_id: AtomicU32::new(0),
            last_event_micros: AtomicU64::new(0),
            iterations: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            shutdowns: AtomicU32::new(0),
        }
    }

    pub fn record_event(&self, record: &TelemetryRecord) {
        self.last_event_id.store(record.id, Ordering::Relaxed);
        self.last_event_micros
            .store(record.timestamp_us, Ordering::Relaxed);
        self.last_event_code.store(
            record.event.to_raw().wrapping_add(1),
            Ordering::Release,
        );
    }

    pub fn last_event(&self) -> Option<TelemetryRecord> {
        match self.last_event_code.load(Ordering::Acquire) {
            NO_EVENT => None,
            code => Some(TelemetryRecord {
                id: self.last_event_id.load(Ordering::Relaxed),
                timestamp_us: self.last_event_micros.load(Ordering::Relaxed),
                event: TelemetryEventKind::from_raw(code.wrapping_sub(1)),
            }),
        }
    }

    pub fn record_iteration(&self, report: &IterationReport) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        #[allow(clippy::cast_possible_truncation)]
        self.rejected
            .fetch_add(report.rejected.len() as u32, Ordering::Relaxed);
        if report.shutdown_serviced {
            self.shutdowns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn counters(&self) -> SupervisorCounters {
        SupervisorCounters {
            iterations: self.iterations.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            shutdowns: self.shutdowns.load(Ordering::Relaxed),
        }
    }
}

impl Default for StatusCells {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psu_core::{
        event_manager::InterlockKind,
        ps_module::PsState,
        supervisor::{CommandError, PsCommand},
    };

    #[test]
    fn last_event_starts_empty_and_tracks_the_newest() {
        let cells = StatusCells::new();
        assert_eq!(cells.last_event(), None);

        let record = TelemetryRecord {
            id: 7,
            timestamp_us: 1_234,
            event: TelemetryEventKind::InterlockLatched(InterlockKind::Soft, 2),
        };
        cells.record_event(&record);
        assert_eq!(cells.last_event(), Some(record));
    }

    #[test]
    fn counters_accumulate_rejections_and_shutdowns() {
        let cells = StatusCells::new();
        let mut report = IterationReport {
            shutdown_serviced: true,
            ..IterationReport::default()
        };
        report
            .rejected
            .push((
                PsCommand::SelectMode(PsState::Cycle),
                CommandError::InvalidState(PsState::Off),
            ))
            .expect("capacity");

        cells.record_iteration(&report);
        cells.record_iteration(&IterationReport::default());
        assert_eq!(
            cells.counters(),
            SupervisorCounters {
                iterations: 2,
                rejected: 1,
                shutdowns: 1,
            }
        );
    }
}
