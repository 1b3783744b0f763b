//! Debounced interlock detection.
//!
//! Each power-supply module owns one [`EventManager`] holding a bank of hard
//! and a bank of soft [`DebounceEvent`]s. A fault condition is reported with
//! [`EventManager::set`]; it must keep being reported for `debounce_count`
//! time-base ticks before it latches into the module's [`InterlockRegister`].
//! A report that stops early is forgotten once `reset_count` ticks elapse.
//!
//! Debounce state and latch state are kept apart: a pending event
//! counts on its own and only the latch is visible to the state machine.
//!
//! The banks sit behind a `critical_section::Mutex` so the control interrupt
//! and the background loop may both report faults. Every operation performs a
//! bounded amount of work inside the critical section.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;
use portable_atomic::{AtomicBool, Ordering};

mod register;

pub use register::{InterlockKind, InterlockRegister, LatchedInterlocks};

/// Maximum number of events in a hard or soft bank.
pub const NUM_MAX_EVENT_COUNTER: usize = 32;

/// Ceiling applied to every configured debounce time.
pub const MAX_DEBOUNCE_TIME_US: u32 = 5_000_000;

/// Ceiling applied to every configured reset time.
pub const MAX_RESET_TIME_US: u32 = 10_000_000;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Converts a microsecond duration into time-base ticks, rounding to nearest.
#[must_use]
pub fn micros_to_ticks(timebase_hz: u32, micros: u32) -> u32 {
    let scaled = u64::from(timebase_hz) * u64::from(micros) + MICROS_PER_SECOND / 2;
    u32::try_from(scaled / MICROS_PER_SECOND).unwrap_or(u32::MAX)
}

/// Requested debounce and reset windows for one event, in microseconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EventTimes {
    pub debounce_us: u32,
    pub reset_us: u32,
}

impl EventTimes {
    #[must_use]
    pub const fn new(debounce_us: u32, reset_us: u32) -> Self {
        Self {
            debounce_us,
            reset_us,
        }
    }
}

/// Debounce state for one named fault condition.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DebounceEvent {
    pub flag: bool,
    pub counter: u32,
    pub debounce_count: u32,
    pub reset_count: u32,
}

impl DebounceEvent {
    /// Builds an idle event, clamping the requested windows.
    ///
    /// The debounce time is limited to [`MAX_DEBOUNCE_TIME_US`]; the reset
    /// count always ends up strictly above the debounce count and no higher
    /// than the tick equivalent of [`MAX_RESET_TIME_US`].
    #[must_use]
    pub fn configured(timebase_hz: u32, times: EventTimes) -> Self {
        let timebase_hz = timebase_hz.max(1);
        let max_reset_count = micros_to_ticks(timebase_hz, MAX_RESET_TIME_US);

        let debounce_us = times.debounce_us.min(MAX_DEBOUNCE_TIME_US);
        let debounce_count = micros_to_ticks(timebase_hz, debounce_us);
        let reset_count = micros_to_ticks(timebase_hz, times.reset_us)
            .min(max_reset_count)
            .max(debounce_count + 1);

        Self {
            flag: false,
            counter: 0,
            debounce_count,
            reset_count,
        }
    }

    fn tick(&mut self) {
        if self.flag {
            self.counter = self.counter.saturating_add(1);
            if self.counter >= self.reset_count {
                self.clear();
            }
        }
    }

    const fn threshold_met(&self) -> bool {
        self.counter >= self.debounce_count
    }

    fn clear(&mut self) {
        self.flag = false;
        self.counter = 0;
    }
}

type EventBank = Vec<DebounceEvent, NUM_MAX_EVENT_COUNTER>;

struct Banks {
    hard: EventBank,
    soft: EventBank,
}

impl Banks {
    const fn new() -> Self {
        Self {
            hard: Vec::new(),
            soft: Vec::new(),
        }
    }

    fn bank_mut(&mut self, kind: InterlockKind) -> &mut EventBank {
        match kind {
            InterlockKind::Hard => &mut self.hard,
            InterlockKind::Soft => &mut self.soft,
        }
    }

    fn bank(&self, kind: InterlockKind) -> &EventBank {
        match kind {
            InterlockKind::Hard => &self.hard,
            InterlockKind::Soft => &self.soft,
        }
    }
}

/// Result of reporting a fault condition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InterlockOutcome {
    /// Index not configured for this bank; nothing changed.
    OutOfRange,
    /// Condition recorded and still counting toward the debounce threshold.
    Pending,
    /// Threshold met and this call latched the bit.
    Latched,
    /// Threshold met but the bit was latched earlier.
    AlreadyLatched,
}

/// Per-module debounce engine plus its one-shot time-base flag.
pub struct EventManager {
    banks: Mutex<RefCell<Banks>>,
    timebase: AtomicBool,
}

impl EventManager {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            banks: Mutex::new(RefCell::new(Banks::new())),
            timebase: AtomicBool::new(false),
        }
    }

    /// (Re)configures both banks.
    ///
    /// Entries past [`NUM_MAX_EVENT_COUNTER`] are dropped; every kept entry is
    /// clamped by [`DebounceEvent::configured`]. Reconfiguring discards any
    /// pending debounce state but leaves latched bits alone.
    pub fn configure(&self, timebase_hz: u32, hard: &[EventTimes], soft: &[EventTimes]) {
        critical_section::with(|cs| {
            let mut guard = self.banks.borrow_ref_mut(cs);
            let banks = &mut *guard;
            fill_bank(&mut banks.hard, timebase_hz, hard);
            fill_bank(&mut banks.soft, timebase_hz, soft);
        });
    }

    /// Number of configured events in the bank.
    #[must_use]
    pub fn len(&self, kind: InterlockKind) -> usize {
        critical_section::with(|cs| self.banks.borrow_ref(cs).bank(kind).len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len(InterlockKind::Hard) == 0 && self.len(InterlockKind::Soft) == 0
    }

    /// Returns a copy of one event's debounce state.
    #[must_use]
    pub fn event(&self, kind: InterlockKind, index: usize) -> Option<DebounceEvent> {
        critical_section::with(|cs| self.banks.borrow_ref(cs).bank(kind).get(index).copied())
    }

    /// Marks the start of a new time-base period. Called from the control
    /// interrupt; repeated calls within one period collapse into one tick.
    pub fn signal_timebase(&self) {
        self.timebase.store(true, Ordering::Release);
    }

    /// Advances every pending event by one tick if a time-base period elapsed
    /// since the previous call. Returns whether a tick was consumed.
    pub fn tick(&self) -> bool {
        if !self.timebase.swap(false, Ordering::AcqRel) {
            return false;
        }

        critical_section::with(|cs| {
            let mut guard = self.banks.borrow_ref_mut(cs);
            let banks = &mut *guard;
            for event in banks.hard.iter_mut().chain(banks.soft.iter_mut()) {
                event.tick();
            }
        });
        true
    }

    /// Reports a fault condition.
    ///
    /// Sets the pending flag. Once the event has counted past its debounce
    /// threshold the bit is latched into `latches` (if not already) and the
    /// event's flag and counter are cleared, whatever the latch outcome.
    pub fn set(
        &self,
        kind: InterlockKind,
        index: usize,
        latches: &InterlockRegister,
    ) -> InterlockOutcome {
        self.set_then(kind, index, latches, || {})
    }

    /// Like [`EventManager::set`], running `before_latch` inside the same
    /// critical section just before a clear bit is latched. Readers of the
    /// register never see the new bit without what `before_latch` wrote.
    pub fn set_then<F>(
        &self,
        kind: InterlockKind,
        index: usize,
        latches: &InterlockRegister,
        before_latch: F,
    ) -> InterlockOutcome
    where
        F: FnOnce(),
    {
        critical_section::with(|cs| {
            let mut banks = self.banks.borrow_ref_mut(cs);
            let Some(event) = banks.bank_mut(kind).get_mut(index) else {
                return InterlockOutcome::OutOfRange;
            };

            event.flag = true;
            if !event.threshold_met() {
                return InterlockOutcome::Pending;
            }

            event.clear();
            if latches.is_latched(kind, index) {
                return InterlockOutcome::AlreadyLatched;
            }
            before_latch();
            latches.latch(kind, index);
            InterlockOutcome::Latched
        })
    }

    /// Preloads an event's counter so its next report latches immediately.
    pub fn bypass_debounce(&self, kind: InterlockKind, index: usize) {
        critical_section::with(|cs| {
            let mut banks = self.banks.borrow_ref_mut(cs);
            if let Some(event) = banks.bank_mut(kind).get_mut(index) {
                event.counter = event.debounce_count;
            }
        });
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_bank(bank: &mut EventBank, timebase_hz: u32, times: &[EventTimes]) {
    bank.clear();
    for entry in times.iter().take(NUM_MAX_EVENT_COUNTER) {
        // Capacity is guaranteed by `take` above.
        let _ = bank.push(DebounceEvent::configured(timebase_hz, *entry));
    }
}
