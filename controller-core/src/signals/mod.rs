//! Named measurement slots written by the control interrupt.
//!
//! Each slot is a single `f32` atomic, so a reader in the background loop
//! always sees a value the interrupt wrote in full. Slots are independent;
//! readers that need several values from one period take them in one
//! critical section with [`SignalBank::read_many`].

use core::fmt;

use portable_atomic::{AtomicF32, Ordering};

/// Published signals.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Signal {
    ILoad1,
    ILoad2,
    VLoad,
    ILoadMean,
    ILoadDiff,
    IIgbt1,
    IIgbt2,
    VDcLink,
    VCapBank,
    VCapBankFiltered,
    IRectifier,
    Reference,
    Error,
    Duty,
}

/// Number of [`Signal`] slots.
pub const NUM_SIGNALS: usize = 14;

impl Signal {
    pub const ALL: [Signal; NUM_SIGNALS] = [
        Signal::ILoad1,
        Signal::ILoad2,
        Signal::VLoad,
        Signal::ILoadMean,
        Signal::ILoadDiff,
        Signal::IIgbt1,
        Signal::IIgbt2,
        Signal::VDcLink,
        Signal::VCapBank,
        Signal::VCapBankFiltered,
        Signal::IRectifier,
        Signal::Reference,
        Signal::Error,
        Signal::Duty,
    ];

    const fn slot(self) -> usize {
        match self {
            Signal::ILoad1 => 0,
            Signal::ILoad2 => 1,
            Signal::VLoad => 2,
            Signal::ILoadMean => 3,
            Signal::ILoadDiff => 4,
            Signal::IIgbt1 => 5,
            Signal::IIgbt2 => 6,
            Signal::VDcLink => 7,
            Signal::VCapBank => 8,
            Signal::VCapBankFiltered => 9,
            Signal::IRectifier => 10,
            Signal::Reference => 11,
            Signal::Error => 12,
            Signal::Duty => 13,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Signal::ILoad1 => "i_load_1",
            Signal::ILoad2 => "i_load_2",
            Signal::VLoad => "v_load",
            Signal::ILoadMean => "i_load_mean",
            Signal::ILoadDiff => "i_load_diff",
            Signal::IIgbt1 => "i_igbt_1",
            Signal::IIgbt2 => "i_igbt_2",
            Signal::VDcLink => "v_dclink",
            Signal::VCapBank => "v_capbank",
            Signal::VCapBankFiltered => "v_capbank_filt",
            Signal::IRectifier => "i_rectifier",
            Signal::Reference => "reference",
            Signal::Error => "error",
            Signal::Duty => "duty",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared slots, one per [`Signal`].
pub struct SignalBank {
    slots: [AtomicF32; NUM_SIGNALS],
}

impl SignalBank {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicF32::new(0.0) }; NUM_SIGNALS],
        }
    }

    pub fn publish(&self, signal: Signal, value: f32) {
        self.slots[signal.slot()].store(value, Ordering::Release);
    }

    #[must_use]
    pub fn read(&self, signal: Signal) -> f32 {
        self.slots[signal.slot()].load(Ordering::Acquire)
    }

    /// Reads several signals without the interrupt running in between.
    #[must_use]
    pub fn read_many<const N: usize>(&self, signals: [Signal; N]) -> [f32; N] {
        critical_section::with(|_| signals.map(|signal| self.read(signal)))
    }

    /// Zeroes every slot.
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.store(0.0, Ordering::Release);
        }
    }
}

impl Default for SignalBank {
    fn default() -> Self {
        Self::new()
    }
}
