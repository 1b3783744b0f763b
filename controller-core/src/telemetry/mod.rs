//! Telemetry event catalog and ring buffer shared by firmware and host targets.
//!
//! The supervisor records every interlock latch, alarm, state change, reset
//! and aborted energisation here. Events serialise to compact numeric codes
//! for transport over the host channel; the firmware and the emulator decide
//! how to print them.

use core::fmt;

use heapless::HistoryBuf;

use crate::event_manager::{InterlockKind, LatchedInterlocks};
use crate::ps_module::PsState;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Identifier assigned to each record in emission order.
pub type EventId = u32;

/// Canonical timestamp units for telemetry records (microseconds).
pub type TimestampMicros = u64;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    InterlockLatched(InterlockKind, u8),
    AlarmRaised(u8),
    StateChanged(PsState),
    InterlocksReset,
    TurnOnAborted(InterlockKind, u8),
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::InterlockLatched(kind, index) => {
                write!(f, "interlock-latched {kind} {index}")
            }
            TelemetryEventKind::AlarmRaised(index) => write!(f, "alarm-raised {index}"),
            TelemetryEventKind::StateChanged(state) => write!(f, "state-changed {state}"),
            TelemetryEventKind::InterlocksReset => f.write_str("interlocks-reset"),
            TelemetryEventKind::TurnOnAborted(kind, index) => {
                write!(f, "turn-on-aborted {kind} {index}")
            }
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const HARD_LATCH_BASE: u16 = 0x0000;
    const SOFT_LATCH_BASE: u16 = 0x0020;
    const ALARM_BASE: u16 = 0x0040;
    const STATE_BASE: u16 = 0x0060;
    const INTERLOCKS_RESET_CODE: u16 = 0x0070;
    const HARD_ABORT_BASE: u16 = 0x0080;
    const SOFT_ABORT_BASE: u16 = 0x00A0;
    const ABORT_END: u16 = 0x00C0;
    const INDEX_MASK: u16 = 0x001F;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::InterlockLatched(kind, index) => {
                Self::latch_base(kind) + (index as u16 & Self::INDEX_MASK)
            }
            TelemetryEventKind::AlarmRaised(index) => {
                Self::ALARM_BASE + (index as u16 & Self::INDEX_MASK)
            }
            TelemetryEventKind::StateChanged(state) => Self::STATE_BASE + state.to_raw() as u16,
            TelemetryEventKind::InterlocksReset => Self::INTERLOCKS_RESET_CODE,
            TelemetryEventKind::TurnOnAborted(kind, index) => {
                Self::abort_base(kind) + (index as u16 & Self::INDEX_MASK)
            }
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_raw(code: u16) -> Self {
        let index = (code & Self::INDEX_MASK) as u8;
        match code {
            Self::INTERLOCKS_RESET_CODE => TelemetryEventKind::InterlocksReset,
            value if value < Self::SOFT_LATCH_BASE => {
                TelemetryEventKind::InterlockLatched(InterlockKind::Hard, index)
            }
            value if value < Self::ALARM_BASE => {
                TelemetryEventKind::InterlockLatched(InterlockKind::Soft, index)
            }
            value if value < Self::STATE_BASE => TelemetryEventKind::AlarmRaised(index),
            value if value < Self::INTERLOCKS_RESET_CODE => {
                PsState::from_raw((value - Self::STATE_BASE) as u8)
                    .map_or(TelemetryEventKind::Custom(value), TelemetryEventKind::StateChanged)
            }
            value if (Self::HARD_ABORT_BASE..Self::SOFT_ABORT_BASE).contains(&value) => {
                TelemetryEventKind::TurnOnAborted(InterlockKind::Hard, index)
            }
            value if (Self::SOFT_ABORT_BASE..Self::ABORT_END).contains(&value) => {
                TelemetryEventKind::TurnOnAborted(InterlockKind::Soft, index)
            }
            other => TelemetryEventKind::Custom(other),
        }
    }

    const fn latch_base(kind: InterlockKind) -> u16 {
        match kind {
            InterlockKind::Hard => Self::HARD_LATCH_BASE,
            InterlockKind::Soft => Self::SOFT_LATCH_BASE,
        }
    }

    const fn abort_base(kind: InterlockKind) -> u16 {
        match kind {
            InterlockKind::Hard => Self::HARD_ABORT_BASE,
            InterlockKind::Soft => Self::SOFT_ABORT_BASE,
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp_us: TimestampMicros,
    pub event: TelemetryEventKind,
}

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.ring.oldest_ordered()
    }

    /// Records emitted at or after `id`, oldest first.
    pub fn since(&self, id: EventId) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.oldest_first().filter(move |record| record.id >= id)
    }

    /// Id the next record will receive.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the most recent telemetry record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an event.
    pub fn record(&mut self, event: TelemetryEventKind, timestamp_us: TimestampMicros) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            timestamp_us,
            event,
        });
        id
    }

    /// Records one event per bit newly set between two latch snapshots, hard
    /// bits first. Returns how many events were written.
    pub fn record_latch_changes(
        &mut self,
        previous: LatchedInterlocks,
        current: LatchedInterlocks,
        timestamp_us: TimestampMicros,
    ) -> usize {
        let mut written = 0;
        for index in new_bits(previous.hard, current.hard) {
            self.record(
                TelemetryEventKind::InterlockLatched(InterlockKind::Hard, index),
                timestamp_us,
            );
            written += 1;
        }
        for index in new_bits(previous.soft, current.soft) {
            self.record(
                TelemetryEventKind::InterlockLatched(InterlockKind::Soft, index),
                timestamp_us,
            );
            written += 1;
        }
        for index in new_bits(previous.alarms, current.alarms) {
            self.record(TelemetryEventKind::AlarmRaised(index), timestamp_us);
            written += 1;
        }
        written
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

fn new_bits(previous: u32, current: u32) -> impl Iterator<Item = u8> {
    let added = current & !previous;
    (0u8..32).filter(move |bit| added & (1 << bit) != 0)
}
