//! Timeout-guarded contactor stages used by topology turn-on and reset.
//!
//! A stage drives a contactor, then polls its auxiliary contact against a
//! countdown. On timeout the stage's hard interlock latches without debounce
//! and the sequence returns immediately; later stages never run.

use core::fmt;

use crate::{
    event_manager::InterlockKind,
    io::{CountdownTimer, DigitalIo, OutputPin, StatusPin, wait_until},
    ps_module::{DeferredShutdown, PsModule},
};

/// One contactor to close and verify.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ContactorStage {
    pub drive: OutputPin,
    pub status: StatusPin,
    pub timeout_us: u32,
    /// Hard interlock latched when the contact does not confirm in time.
    pub fault: usize,
}

/// Why an energisation sequence stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SequenceAbort {
    pub kind: InterlockKind,
    pub index: usize,
}

impl fmt::Display for SequenceAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sequence aborted on {} interlock {}", self.kind.label(), self.index)
    }
}

/// Latches hard interlock `index` immediately and returns the abort value.
///
/// The power-stage turn-off is requested, not performed, so callers that
/// own the hardware must follow up with their own turn-off.
pub fn abort(module: &PsModule, index: usize) -> SequenceAbort {
    module.force_interlock(InterlockKind::Hard, index, &mut DeferredShutdown);
    SequenceAbort {
        kind: InterlockKind::Hard,
        index,
    }
}

/// Closes one contactor and waits for its status pin.
///
/// # Errors
///
/// Returns [`SequenceAbort`] for `stage.fault` when the pin does not read
/// closed within `stage.timeout_us`.
pub fn close_contactor<D, T>(
    module: &PsModule,
    io: &mut D,
    timer: &mut T,
    stage: &ContactorStage,
) -> Result<(), SequenceAbort>
where
    D: DigitalIo + ?Sized,
    T: CountdownTimer + ?Sized,
{
    io.set_output(stage.drive, true);
    if wait_until(timer, stage.timeout_us, || io.is_high(stage.status)) {
        Ok(())
    } else {
        Err(abort(module, stage.fault))
    }
}

/// Runs `stages` in order, stopping at the first failure.
///
/// # Errors
///
/// Returns the [`SequenceAbort`] of the first stage that timed out.
pub fn run_stages<D, T>(
    module: &PsModule,
    io: &mut D,
    timer: &mut T,
    stages: &[ContactorStage],
) -> Result<(), SequenceAbort>
where
    D: DigitalIo + ?Sized,
    T: CountdownTimer + ?Sized,
{
    stages
        .iter()
        .try_for_each(|stage| close_contactor(module, io, timer, stage))
}

/// Releases a contactor and waits the configured opening time.
pub fn open_contactor<D, T>(io: &mut D, timer: &mut T, drive: OutputPin, settle_us: u32)
where
    D: DigitalIo + ?Sized,
    T: CountdownTimer + ?Sized,
{
    io.set_output(drive, false);
    timer.delay_us(settle_us);
}

/// Pulses a contactor that still reads closed so its latch releases.
///
/// Returns `true` when the status pin reads open afterwards.
pub fn pulse_open<D, T>(io: &mut D, timer: &mut T, stage: &ContactorStage, pulse_us: u32) -> bool
where
    D: DigitalIo + ?Sized,
    T: CountdownTimer + ?Sized,
{
    if io.is_high(stage.status) {
        io.set_output(stage.drive, true);
        timer.delay_us(pulse_us);
        io.set_output(stage.drive, false);
        timer.delay_us(pulse_us);
    }
    !io.is_high(stage.status)
}
