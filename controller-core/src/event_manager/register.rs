//! Latched interlock bitmasks shared between the control interrupt and the
//! background loop.
//!
//! Every bit names one fault of a topology's hard or soft interlock table. A
//! latch is a single `fetch_or`, so a request racing in from the other
//! execution context observes the bit it lost to and never repeats the
//! shutdown side effects.

use core::fmt;

use portable_atomic::{AtomicU32, Ordering};

use super::NUM_MAX_EVENT_COUNTER;

/// Severity class of a latched fault.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InterlockKind {
    Hard,
    Soft,
}

impl InterlockKind {
    /// Short lowercase label used by logs and the operator console.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            InterlockKind::Hard => "hard",
            InterlockKind::Soft => "soft",
        }
    }
}

impl fmt::Display for InterlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Copy of the three bitmasks taken at one instant.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LatchedInterlocks {
    pub hard: u32,
    pub soft: u32,
    pub alarms: u32,
}

impl LatchedInterlocks {
    /// Returns `true` when neither a hard nor a soft interlock is latched.
    #[must_use]
    pub const fn is_clear(&self) -> bool {
        self.hard == 0 && self.soft == 0
    }
}

/// Hard, soft and alarm bitmasks for one power-supply module.
pub struct InterlockRegister {
    hard: AtomicU32,
    soft: AtomicU32,
    alarms: AtomicU32,
}

impl InterlockRegister {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hard: AtomicU32::new(0),
            soft: AtomicU32::new(0),
            alarms: AtomicU32::new(0),
        }
    }

    const fn mask_for(kind: InterlockKind, register: &Self) -> &AtomicU32 {
        match kind {
            InterlockKind::Hard => &register.hard,
            InterlockKind::Soft => &register.soft,
        }
    }

    /// Latches `index`, returning `true` only for the call that set the bit.
    ///
    /// Indices outside the 32-bit mask are ignored and report `false`.
    pub fn latch(&self, kind: InterlockKind, index: usize) -> bool {
        let Some(bit) = bit_for(index) else {
            return false;
        };
        let previous = Self::mask_for(kind, self).fetch_or(bit, Ordering::AcqRel);
        previous & bit == 0
    }

    #[must_use]
    pub fn is_latched(&self, kind: InterlockKind, index: usize) -> bool {
        bit_for(index).is_some_and(|bit| Self::mask_for(kind, self).load(Ordering::Acquire) & bit != 0)
    }

    /// Raises a non-latching advisory bit. Returns `true` when it was clear.
    pub fn raise_alarm(&self, index: usize) -> bool {
        let Some(bit) = bit_for(index) else {
            return false;
        };
        self.alarms.fetch_or(bit, Ordering::AcqRel) & bit == 0
    }

    /// Drops an advisory bit once its condition has gone away.
    pub fn clear_alarm(&self, index: usize) {
        if let Some(bit) = bit_for(index) {
            self.alarms.fetch_and(!bit, Ordering::AcqRel);
        }
    }

    #[must_use]
    pub fn hard(&self) -> u32 {
        self.hard.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn soft(&self) -> u32 {
        self.soft.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn alarms(&self) -> u32 {
        self.alarms.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> LatchedInterlocks {
        LatchedInterlocks {
            hard: self.hard(),
            soft: self.soft(),
            alarms: self.alarms(),
        }
    }

    /// Clears every mask. Only the explicit operator reset path calls this.
    pub fn clear_all(&self) {
        self.hard.store(0, Ordering::Release);
        self.soft.store(0, Ordering::Release);
        self.alarms.store(0, Ordering::Release);
    }
}

impl Default for InterlockRegister {
    fn default() -> Self {
        Self::new()
    }
}

fn bit_for(index: usize) -> Option<u32> {
    if index < NUM_MAX_EVENT_COUNTER {
        Some(1u32 << index)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_reports_only_first_setter() {
        let register = InterlockRegister::new();
        assert!(register.latch(InterlockKind::Hard, 3));
        assert!(!register.latch(InterlockKind::Hard, 3));
        assert!(register.is_latched(InterlockKind::Hard, 3));
        assert!(!register.is_latched(InterlockKind::Soft, 3));
        assert_eq!(register.hard(), 0b1000);
    }

    #[test]
    fn out_of_range_bits_are_ignored() {
        let register = InterlockRegister::new();
        assert!(!register.latch(InterlockKind::Soft, NUM_MAX_EVENT_COUNTER));
        assert!(!register.raise_alarm(40));
        assert_eq!(register.snapshot(), LatchedInterlocks::default());
    }

    #[test]
    fn clear_all_drops_alarms_and_latches() {
        let register = InterlockRegister::new();
        register.latch(InterlockKind::Hard, 0);
        register.latch(InterlockKind::Soft, 31);
        assert!(register.raise_alarm(1));
        assert!(!register.raise_alarm(1));

        register.clear_all();
        assert!(register.snapshot().is_clear());
        assert_eq!(register.alarms(), 0);
    }
}
