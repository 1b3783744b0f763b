//! Decimated capture of one published signal.

use heapless::HistoryBuf;

use crate::signals::{Signal, SignalBank};

/// Samples retained by the scope.
pub const SCOPE_CAPACITY: usize = 256;

/// Ring of the most recent samples of one signal. When full, the oldest
/// sample is overwritten.
pub struct Scope<const N: usize = SCOPE_CAPACITY> {
    signal: Signal,
    samples: HistoryBuf<f32, N>,
    frozen: bool,
}

impl<const N: usize> Scope<N> {
    #[must_use]
    pub const fn new(signal: Signal) -> Self {
        Self {
            signal,
            samples: HistoryBuf::new(),
            frozen: false,
        }
    }

    #[must_use]
    pub const fn signal(&self) -> Signal {
        self.signal
    }

    /// Switches the captured signal and drops the old samples.
    pub fn select(&mut self, signal: Signal) {
        self.signal = signal;
        self.samples.clear();
    }

    /// Stops capturing, keeping the buffer for readout.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn resume(&mut self) {
        self.frozen = false;
    }

    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Appends the current value of the selected signal.
    pub fn capture(&mut self, signals: &SignalBank) {
        if !self.frozen {
            self.samples.write(signals.read(self.signal));
        }
    }

    /// Samples from oldest to newest.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.oldest_ordered().copied()
    }

    #[must_use]
    pub fn latest(&self) -> Option<f32> {
        self.samples.recent().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
