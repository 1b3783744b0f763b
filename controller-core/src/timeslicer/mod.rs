//! Decimating scheduler for work nested inside the control interrupt.
//!
//! Each slice divides the master interrupt rate by an integer. A slice fires
//! on the `divisor`-th call and restarts its counter, so the firing pattern is
//! exactly periodic and never accumulates phase error.

use core::fmt;

/// Number of independent slices a [`TimeSlicer`] can hold by default.
pub const NUM_MAX_TIMESLICERS: usize = 4;

/// Errors returned when configuring a slice.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimeSliceError {
    /// Slice index outside the scheduler.
    UnknownSlice(usize),
    /// Target or master frequency not strictly positive and finite.
    InvalidFrequency,
}

impl fmt::Display for TimeSliceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSliceError::UnknownSlice(index) => write!(f, "unknown time slice {index}"),
            TimeSliceError::InvalidFrequency => f.write_str("invalid time slice frequency"),
        }
    }
}

/// Divisor and running counter for one slice.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TimeSlice {
    divisor: u32,
    counter: u32,
}

impl TimeSlice {
    /// A slice that fires on every call.
    #[must_use]
    pub const fn every_call() -> Self {
        Self {
            divisor: 1,
            counter: 0,
        }
    }

    /// Builds a slice firing at `target_hz` inside an interrupt at `master_hz`.
    ///
    /// The divisor is `round(master_hz / target_hz)`, never less than one.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSliceError::InvalidFrequency`] when either frequency is
    /// not a finite positive number.
    pub fn new(target_hz: f32, master_hz: f32) -> Result<Self, TimeSliceError> {
        Ok(Self {
            divisor: divisor_for(target_hz, master_hz)?,
            counter: 0,
        })
    }

    #[must_use]
    pub const fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Counts one master interrupt; `true` when the guarded block is due.
    pub fn poll(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.divisor {
            self.counter = 0;
            true
        } else {
            false
        }
    }

    /// Runs `block` when the slice is due.
    pub fn run_guarded<R>(&mut self, block: impl FnOnce() -> R) -> Option<R> {
        if self.poll() { Some(block()) } else { None }
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }
}

impl Default for TimeSlice {
    fn default() -> Self {
        Self::every_call()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn divisor_for(target_hz: f32, master_hz: f32) -> Result<u32, TimeSliceError> {
    let valid = |value: f32| value.is_finite() && value > 0.0;
    if !valid(target_hz) || !valid(master_hz) {
        return Err(TimeSliceError::InvalidFrequency);
    }

    let ratio = libm::roundf(master_hz / target_hz);
    if ratio < 1.0 {
        Ok(1)
    } else if ratio >= u32::MAX as f32 {
        Ok(u32::MAX)
    } else {
        Ok(ratio as u32)
    }
}

/// Set of independent slices driven by one master interrupt.
#[derive(Clone, Debug)]
pub struct TimeSlicer<const N: usize = NUM_MAX_TIMESLICERS> {
    slices: [TimeSlice; N],
}

impl<const N: usize> TimeSlicer<N> {
    /// Creates a scheduler whose slices fire on every call until configured.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slices: [TimeSlice::every_call(); N],
        }
    }

    /// Configures one slice and restarts its counter.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSliceError::UnknownSlice`] for an index past `N` and
    /// [`TimeSliceError::InvalidFrequency`] for non-positive frequencies.
    pub fn configure(
        &mut self,
        slice: usize,
        target_hz: f32,
        master_hz: f32,
    ) -> Result<(), TimeSliceError> {
        let entry = self
            .slices
            .get_mut(slice)
            .ok_or(TimeSliceError::UnknownSlice(slice))?;
        *entry = TimeSlice::new(target_hz, master_hz)?;
        Ok(())
    }

    /// Counts one master interrupt for `slice` and runs `block` when due.
    /// Unknown slices never fire.
    pub fn run_guarded<R>(&mut self, slice: usize, block: impl FnOnce() -> R) -> Option<R> {
        self.slices
            .get_mut(slice)
            .and_then(|entry| entry.run_guarded(block))
    }

    #[must_use]
    pub fn divisor(&self, slice: usize) -> Option<u32> {
        self.slices.get(slice).map(TimeSlice::divisor)
    }

    pub fn reset(&mut self) {
        for slice in &mut self.slices {
            slice.reset();
        }
    }
}

impl<const N: usize> Default for TimeSlicer<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_rounds_and_never_drops_below_one() {
        assert_eq!(TimeSlice::new(1_000.0, 20_000.0).map(|s| s.divisor()), Ok(20));
        assert_eq!(TimeSlice::new(3_000.0, 20_000.0).map(|s| s.divisor()), Ok(7));
        assert_eq!(TimeSlice::new(50_000.0, 20_000.0).map(|s| s.divisor()), Ok(1));
        assert_eq!(
            TimeSlice::new(0.0, 20_000.0),
            Err(TimeSliceError::InvalidFrequency)
        );
        assert_eq!(
            TimeSlice::new(1_000.0, f32::NAN),
            Err(TimeSliceError::InvalidFrequency)
        );
    }

    #[test]
    fn fires_every_twentieth_call_without_drift() {
        let mut slicer: TimeSlicer = TimeSlicer::new();
        slicer.configure(0, 1_000.0, 20_000.0).expect("valid slice");

        let mut fired = 0;
        for call in 1..=10_000u32 {
            let ran = slicer.run_guarded(0, || ()).is_some();
            assert_eq!(ran, call % 20 == 0, "call {call}");
            if ran {
                fired += 1;
            }
        }
        assert_eq!(fired, 500);
    }

    #[test]
    fn slices_keep_independent_counters() {
        let mut slicer: TimeSlicer<2> = TimeSlicer::new();
        slicer.configure(0, 10_000.0, 20_000.0).expect("valid slice");
        slicer.configure(1, 4_000.0, 20_000.0).expect("valid slice");

        let mut fast = 0;
        let mut slow = 0;
        for _ in 0..100 {
            slicer.run_guarded(0, || fast += 1);
            slicer.run_guarded(1, || slow += 1);
        }
        assert_eq!(fast, 50);
        assert_eq!(slow, 20);
    }

    #[test]
    fn unknown_slice_is_rejected_and_never_fires() {
        let mut slicer: TimeSlicer<1> = TimeSlicer::new();
        assert_eq!(
            slicer.configure(3, 1.0, 2.0),
            Err(TimeSliceError::UnknownSlice(3))
        );
        assert_eq!(slicer.run_guarded(3, || 1), None);
        assert_eq!(slicer.divisor(0), Some(1));
    }
}
