//! Sample-table reference playback for the `RmpWfm` and `MigWfm` modes.

use core::fmt;

use heapless::Vec;

/// Samples one waveform table can hold.
pub const WFMREF_CAPACITY: usize = 512;

/// How playback behaves when the end of the table is reached.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Playback {
    /// Restart from the first sample (ramp mode).
    Repeat,
    /// Hold the last sample and report completion (migration mode).
    Once,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WfmRefError {
    /// The table does not fit in [`WFMREF_CAPACITY`] samples.
    TooLong { len: usize },
}

impl fmt::Display for WfmRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WfmRefError::TooLong { len } => {
                write!(f, "waveform of {len} samples exceeds {WFMREF_CAPACITY}")
            }
        }
    }
}

/// Waveform table with output scaling.
///
/// Each call to [`WfmRef::run`] emits `gain * table[i] + offset` and advances
/// by one sample.
#[derive(Clone, Debug)]
pub struct WfmRef<const N: usize = WFMREF_CAPACITY> {
    table: Vec<f32, N>,
    gain: f32,
    offset: f32,
    cursor: usize,
    finished: bool,
    output: f32,
}

impl<const N: usize> WfmRef<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: Vec::new(),
            gain: 1.0,
            offset: 0.0,
            cursor: 0,
            finished: false,
            output: 0.0,
        }
    }

    /// Replaces the table and rewinds playback.
    ///
    /// # Errors
    ///
    /// Returns [`WfmRefError::TooLong`] when `samples` exceeds the capacity;
    /// the previous table is kept in that case.
    pub fn load(&mut self, samples: &[f32]) -> Result<(), WfmRefError> {
        let table =
            Vec::from_slice(samples).map_err(|_| WfmRefError::TooLong { len: samples.len() })?;
        self.table = table;
        self.restart();
        Ok(())
    }

    pub fn set_scaling(&mut self, gain: f32, offset: f32) {
        self.gain = gain;
        self.offset = offset;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn restart(&mut self) {
        self.cursor = 0;
        self.finished = false;
    }

    /// `true` once a [`Playback::Once`] run has emitted its last sample.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub const fn output(&self) -> f32 {
        self.output
    }

    /// Emits the next sample. An empty table outputs `offset`.
    pub fn run(&mut self, playback: Playback) -> f32 {
        if self.finished {
            return self.output;
        }

        let Some(sample) = self.table.get(self.cursor).copied() else {
            self.output = self.offset;
            return self.output;
        };
        self.output = self.gain * sample + self.offset;
        self.cursor += 1;

        if self.cursor >= self.table.len() {
            match playback {
                Playback::Repeat => self.cursor = 0,
                Playback::Once => self.finished = true,
            }
        }
        self.output
    }
}

impl<const N: usize> Default for WfmRef<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(got: f32, want: f32) {
        assert!((got - want).abs() < 1e-6, "{got} != {want}");
    }

    #[test]
    fn repeat_wraps_and_applies_scaling() {
        let mut wfm: WfmRef<4> = WfmRef::new();
        wfm.load(&[0.0, 1.0, 2.0]).expect("fits");
        wfm.set_scaling(2.0, 0.5);

        for want in [0.5, 2.5, 4.5, 0.5, 2.5] {
            assert_close(wfm.run(Playback::Repeat), want);
        }
        assert!(!wfm.is_finished());
    }

    #[test]
    fn once_holds_last_sample() {
        let mut wfm: WfmRef<4> = WfmRef::new();
        wfm.load(&[1.0, 3.0]).expect("fits");

        assert_close(wfm.run(Playback::Once), 1.0);
        assert!(!wfm.is_finished());
        assert_close(wfm.run(Playback::Once), 3.0);
        assert!(wfm.is_finished());
        assert_close(wfm.run(Playback::Once), 3.0);

        wfm.restart();
        assert_close(wfm.run(Playback::Once), 1.0);
    }

    #[test]
    fn oversized_table_is_rejected_and_previous_kept() {
        let mut wfm: WfmRef<2> = WfmRef::new();
        wfm.load(&[7.0]).expect("fits");
        assert_eq!(
            wfm.load(&[1.0, 2.0, 3.0]),
            Err(WfmRefError::TooLong { len: 3 })
        );
        assert_eq!(wfm.len(), 1);
        assert_close(wfm.run(Playback::Repeat), 7.0);
    }

    #[test]
    fn empty_table_outputs_offset() {
        let mut wfm: WfmRef<2> = WfmRef::new();
        wfm.set_scaling(1.0, -2.0);
        assert!(wfm.is_empty());
        assert_close(wfm.run(Playback::Repeat), -2.0);
    }
}
