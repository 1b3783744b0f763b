//! Output-enable gate shared by the two owners of the modulators.
//!
//! The control interrupt owns the timer and writes duty cycles; the
//! supervisor's topology decides when the power stage may switch. The
//! topology only flips bits in the gate and the interrupt applies them on
//! its next duty write, while an interrupt-side cutoff disables the
//! hardware at once.

use portable_atomic::{AtomicU8, Ordering};
use psu_core::io::PwmOutput;

/// Modulator channels driven by the board.
pub const PWM_CHANNELS: usize = 2;

/// Raw modulator access below the gate.
pub trait Modulator {
    /// Writes a bipolar duty in `[-1, 1]`.
    fn write(&mut self, channel: usize, duty: f32);

    fn set_enabled(&mut self, channel: usize, enabled: bool);
}

pub struct OutputGate {
    mask: AtomicU8,
}

impl OutputGate {
    pub const fn new() -> Self {
        Self {
            mask: AtomicU8::new(0),
        }
    }

    pub fn is_enabled(&self, channel: usize) -> bool {
        bit(channel).is_some_and(|bit| self.mask.load(Ordering::Acquire) & bit != 0)
    }

    fn set(&self, channel: usize, enabled: bool) {
        if let Some(bit) = bit(channel) {
            if enabled {
                self.mask.fetch_or(bit, Ordering::AcqRel);
            } else {
                self.mask.fetch_and(!bit, Ordering::AcqRel);
            }
        }
    }
}

impl Default for OutputGate {
    fn default() -> Self {
        Self::new()
    }
}

fn bit(channel: usize) -> Option<u8> {
    (channel < PWM_CHANNELS).then(|| 1 << channel)
}

/// Interrupt-side handle: owns the modulator and honours the gate.
pub struct GatedModulator<M> {
    modulator: M,
    gate: &'static OutputGate,
    applied: [bool; PWM_CHANNELS],
}

impl<M: Modulator> GatedModulator<M> {
    pub fn new(mut modulator: M, gate: &'static OutputGate) -> Self {
        for channel in 0..PWM_CHANNELS {
            modulator.write(channel, 0.0);
            modulator.set_enabled(channel, false);
        }
        Self {
            modulator,
            gate,
            applied: [false; PWM_CHANNELS],
        }
    }

    fn apply(&mut self, channel: usize, enabled: bool) {
        if self.applied[channel] != enabled {
            self.modulator.set_enabled(channel, enabled);
            self.applied[channel] = enabled;
        }
    }
}

impl<M: Modulator> PwmOutput for GatedModulator<M> {
    fn channel_count(&self) -> usize {
        PWM_CHANNELS
    }

    fn set_duty(&mut self, channel: usize, duty: f32) {
        if channel >= PWM_CHANNELS {
            return;
        }
        let enabled = self.gate.is_enabled(channel);
        self.modulator
            .write(channel, if enabled { duty } else { 0.0 });
        self.apply(channel, enabled);
    }

    fn enable_output(&mut self, channel: usize) {
        if channel < PWM_CHANNELS {
            self.gate.set(channel, true);
            self.apply(channel, true);
        }
    }

    fn disable_output(&mut self, channel: usize) {
        if channel < PWM_CHANNELS {
            self.gate.set(channel, false);
            self.apply(channel, false);
        }
    }
}

/// Supervisor-side handle: only changes the gate.
#[derive(Clone, Copy)]
pub struct GateHandle {
    gate: &'static OutputGate,
}

impl GateHandle {
    pub const fn new(gate: &'static OutputGate) -> Self {
        Self { gate }
    }
}

impl PwmOutput for GateHandle {
    fn channel_count(&self) -> usize {
        PWM_CHANNELS
    }

    fn set_duty(&mut self, _channel: usize, _duty: f32) {}

    fn enable_output(&mut self, channel: usize) {
        self.gate.set(channel, true);
    }

    fn disable_output(&mut self, channel: usize) {
        self.gate.set(channel, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeTimer {
        duty: [f32; PWM_CHANNELS],
        enabled: [bool; PWM_CHANNELS],
        toggles: u32,
    }

    impl Modulator for FakeTimer {
        fn write(&mut self, channel: usize, duty: f32) {
            self.duty[channel] = duty;
        }

        fn set_enabled(&mut self, channel: usize, enabled: bool) {
            self.enabled[channel] = enabled;
            self.toggles += 1;
        }
    }

    fn leak_gate() -> &'static OutputGate {
        Box::leak(Box::new(OutputGate::new()))
    }

    #[test]
    fn topology_enable_takes_effect_on_next_duty_write() {
        let gate = leak_gate();
        let mut interrupt = GatedModulator::new(FakeTimer::default(), gate);
        let mut topology = GateHandle::new(gate);

        interrupt.set_duty(0, 0.4);
        assert!(!interrupt.modulator.enabled[0]);
        assert!(interrupt.modulator.duty[0].abs() < f32::EPSILON);

        topology.enable_all();
        interrupt.set_duty(0, 0.4);
        assert!(interrupt.modulator.enabled[0]);
        assert!((interrupt.modulator.duty[0] - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn interrupt_cutoff_is_immediate_and_visible_to_topology() {
        let gate = leak_gate();
        let mut interrupt = GatedModulator::new(FakeTimer::default(), gate);
        GateHandle::new(gate).enable_all();
        interrupt.set_duty(1, 0.2);
        assert!(interrupt.modulator.enabled[1]);

        interrupt.disable_all();
        assert_eq!(interrupt.modulator.enabled, [false; PWM_CHANNELS]);
        assert!(!gate.is_enabled(0) && !gate.is_enabled(1));
    }

    #[test]
    fn hardware_enable_is_only_touched_on_change() {
        let gate = leak_gate();
        let mut interrupt = GatedModulator::new(FakeTimer::default(), gate);
        let initial = interrupt.modulator.toggles;
        for _ in 0..5 {
            interrupt.set_duty(0, 0.1);
        }
        assert_eq!(interrupt.modulator.toggles, initial);
    }
}
