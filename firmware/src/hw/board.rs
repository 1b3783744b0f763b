use embassy_stm32::adc::{Adc, AnyAdcChannel};
use embassy_stm32::gpio::{Input, Output};
use embassy_stm32::peripherals::{ADC1, TIM3};
use embassy_stm32::timer::Channel;
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_time::{Duration, Instant};
use heapless::Vec;
use psu_core::io::{CountdownTimer, DigitalIo, OutputPin, SampleSource, StatusPin};

use super::gate::{Modulator, PWM_CHANNELS};

const CHANNELS: [Channel; PWM_CHANNELS] = [Channel::Ch1, Channel::Ch2];

/// Centre-aligned bridge legs on TIM3. Duty `d` maps to `0.5 + 0.5 * d`.
pub struct TimerModulator {
    pwm: SimplePwm<'static, TIM3>,
}

impl TimerModulator {
    pub fn new(pwm: SimplePwm<'static, TIM3>) -> Self {
        Self { pwm }
    }
}

impl Modulator for TimerModulator {
    fn write(&mut self, channel: usize, duty: f32) {
        let Some(&channel) = CHANNELS.get(channel) else {
            return;
        };
        let mut output = self.pwm.channel(channel);
        let max = f32::from(output.max_duty_cycle());
        let fraction = 0.5 + 0.5 * duty.clamp(-1.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        output.set_duty_cycle((fraction * max) as u16);
    }

    fn set_enabled(&mut self, channel: usize, enabled: bool) {
        let Some(&channel) = CHANNELS.get(channel) else {
            return;
        };
        let mut output = self.pwm.channel(channel);
        if enabled {
            output.enable();
        } else {
            output.disable();
        }
    }
}

/// Contactor drivers and auxiliary status contacts.
pub struct BoardPins {
    pub dclink_contactor: Output<'static>,
    pub ac_mains_contactor: Output<'static>,
    pub precharge_relay: Output<'static>,
    pub dclink_closed: Input<'static>,
    pub ac_mains_closed: Input<'static>,
    pub precharge_closed: Input<'static>,
    pub dcct1_ok: Input<'static>,
    pub dcct2_ok: Input<'static>,
}

impl DigitalIo for BoardPins {
    fn is_high(&self, pin: StatusPin) -> bool {
        match pin {
            StatusPin::DcLinkContactorClosed => self.dclink_closed.is_high(),
            StatusPin::AcMainsContactorClosed => self.ac_mains_closed.is_high(),
            StatusPin::PrechargeRelayClosed => self.precharge_closed.is_high(),
            StatusPin::Dcct1Ok => self.dcct1_ok.is_high(),
            StatusPin::Dcct2Ok => self.dcct2_ok.is_high(),
        }
    }

    fn set_output(&mut self, pin: OutputPin, high: bool) {
        let output = match pin {
            OutputPin::DcLinkContactor => &mut self.dclink_contactor,
            OutputPin::AcMainsContactor => &mut self.ac_mains_contactor,
            OutputPin::PrechargeRelay => &mut self.precharge_relay,
        };
        if high {
            output.set_high();
        } else {
            output.set_low();
        }
    }
}

/// Maximum number of converted inputs.
pub const ADC_CHANNELS: usize = 6;

/// Blocking conversions on ADC1, one call per sample.
pub struct BoardAdc {
    adc: Adc<'static, ADC1>,
    channels: Vec<AnyAdcChannel<ADC1>, ADC_CHANNELS>,
}

impl BoardAdc {
    pub fn new(adc: Adc<'static, ADC1>, channels: Vec<AnyAdcChannel<ADC1>, ADC_CHANNELS>) -> Self {
        Self { adc, channels }
    }
}

impl SampleSource for BoardAdc {
    fn next_raw(&mut self, channel: usize) -> f32 {
        match self.channels.get_mut(channel) {
            Some(input) => f32::from(self.adc.blocking_read(input)),
            None => 0.0,
        }
    }
}

/// Countdown backed by the embassy time driver.
pub struct DeadlineTimer {
    deadline: Instant,
}

impl DeadlineTimer {
    pub fn new() -> Self {
        Self {
            deadline: Instant::now(),
        }
    }
}

impl CountdownTimer for DeadlineTimer {
    fn start(&mut self, micros: u32) {
        self.deadline = Instant::now() + Duration::from_micros(u64::from(micros));
    }

    fn expired(&mut self) -> bool {
        Instant::now() >= self.deadline
    }

    fn delay_us(&mut self, micros: u32) {
        embassy_time::block_for(Duration::from_micros(u64::from(micros)));
    }
}
