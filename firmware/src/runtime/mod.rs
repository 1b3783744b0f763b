use cortex_m::interrupt as cortex_interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt::Display2Format;
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Level, Output, OutputType, Pull, Speed};
use embassy_stm32::interrupt::{self, InterruptExt, Priority};
use embassy_stm32::time::khz;
use embassy_stm32::timer::low_level::CountingMode;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;
use psu_core::{
    console::status::InterlockNames,
    control::{ControlConfig, ControlLoop},
    io::{AnalogChannel, Hardware},
    parameters::{ParamId, ParameterBank},
    ps_module::{ModuleId, ModuleRegistry, PsModel, PsModule},
    signals::SignalBank,
    supervisor::Supervisor,
    topology::{AnyTopology, Topology},
};
use static_cell::StaticCell;

use crate::console::ConsoleSession;
use crate::hw::board::{ADC_CHANNELS, BoardAdc, BoardPins, DeadlineTimer, TimerModulator};
use crate::hw::gate::{GateHandle, GatedModulator, OutputGate};
use crate::queue::{CommandConsumer, CommandProducer, CommandQueue};
use crate::status::StatusCells;
use crate::telemetry::TelemetryPublisher;
use crate::usb;

mod console_task;
mod control_task;
mod supervisor_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        cortex_interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                cortex_interrupt::enable();
            }
        }
    }
}

/// Bytes moved per USB packet.
pub(super) type ConsoleFrame = Vec<u8, { usb::MAX_PACKET_SIZE as usize }>;

/// Traffic from the USB task to the console task.
pub(super) enum ConsoleEvent {
    Connected,
    Data(ConsoleFrame),
}

pub(super) type ControlLoopImpl = ControlLoop<GatedModulator<TimerModulator>, BoardAdc>;
pub(super) type SupervisorImpl = Supervisor<AnyTopology<GateHandle, BoardPins, DeadlineTimer>>;

static REGISTRY: ModuleRegistry = ModuleRegistry::new();
pub(super) static SIGNALS: SignalBank = SignalBank::new();
pub(super) static STATUS: StatusCells = StatusCells::new();
static GATE: OutputGate = OutputGate::new();
static COMMAND_QUEUE: CommandQueue = Channel::new();
pub(super) static CONSOLE_RX: Channel<ThreadModeRawMutex, ConsoleEvent, 4> = Channel::new();
pub(super) static CONSOLE_TX: Channel<ThreadModeRawMutex, ConsoleFrame, 8> = Channel::new();
pub(super) static USB_STORAGE: StaticCell<usb::UsbDeviceStorage> = StaticCell::new();

static CONTROL_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn USART3_4_5_6_LPUART1() {
    unsafe { CONTROL_EXECUTOR.on_interrupt() }
}

/// Samples averaged per channel and control period.
const ADC_DECIMATION: u16 = 1;

/// 12-bit conversions centred on mid-scale, +-10 units full range.
const ADC_CALIBRATION: AnalogChannel = AnalogChannel {
    gain: 20.0 / 4095.0,
    offset: -10.0,
};

/// Module bound to `id` during start-up.
pub(super) fn registered_module(id: ModuleId) -> &'static PsModule {
    match REGISTRY.get(id) {
        Ok(module) => module,
        Err(err) => defmt::panic!("runtime: {}", Display2Format(&err)),
    }
}

fn configured_model(params: &ParameterBank) -> PsModel {
    params
        .get_u16(ParamId::PsModel, 0)
        .ok()
        .and_then(|raw| u8::try_from(raw).ok())
        .and_then(PsModel::from_raw)
        .unwrap_or(PsModel::Fap)
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let p = hal::init(hal::Config::default());

    let params = ParameterBank::with_defaults();
    let model = configured_model(&params);
    let config = ControlConfig::from_parameters(&params);

    let pins = BoardPins {
        dclink_contactor: Output::new(p.PB3, Level::Low, Speed::Low),
        ac_mains_contactor: Output::new(p.PB4, Level::Low, Speed::Low),
        precharge_relay: Output::new(p.PB5, Level::Low, Speed::Low),
        dclink_closed: Input::new(p.PB6, Pull::Down),
        ac_mains_closed: Input::new(p.PB7, Pull::Down),
        precharge_closed: Input::new(p.PB8, Pull::Down),
        dcct1_ok: Input::new(p.PB9, Pull::Down),
        dcct2_ok: Input::new(p.PB10, Pull::Down),
    };
    let topology = AnyTopology::from_parameters(
        model,
        Hardware::new(GateHandle::new(&GATE), pins, DeadlineTimer::new()),
        &params,
    );

    let pwm = SimplePwm::new(
        p.TIM3,
        Some(PwmPin::new(p.PA6, OutputType::PushPull)),
        Some(PwmPin::new(p.PA7, OutputType::PushPull)),
        None,
        None,
        khz(20),
        CountingMode::CenterAlignedBothInterrupts,
    );
    let mut inputs = Vec::new();
    for channel in [
        p.PA0.degrade_adc(),
        p.PA1.degrade_adc(),
        p.PA4.degrade_adc(),
        p.PA5.degrade_adc(),
    ] {
        let _ = inputs.push(channel);
    }
    let adc = BoardAdc::new(Adc::new(p.ADC1), inputs);

    let feedback = topology.feedback(config.control_hz);
    let calibration = [ADC_CALIBRATION; ADC_CHANNELS];
    let control = match ControlLoop::new(
        config,
        feedback,
        &calibration,
        ADC_DECIMATION,
        GatedModulator::new(TimerModulator::new(pwm), &GATE),
        adc,
    ) {
        Ok(control) => control,
        Err(err) => defmt::panic!("control rates rejected: {}", Display2Format(&err)),
    };

    let id = match topology.register_module(&REGISTRY, control.timebase_hz(), &params) {
        Ok(id) => id,
        Err(err) => defmt::panic!("module registration failed: {}", Display2Format(&err)),
    };
    let names = InterlockNames::of(&topology);
    defmt::info!(
        "psu: {} model={} control={}Hz timebase={}Hz",
        Display2Format(&id),
        model.label(),
        control.config().control_hz,
        control.timebase_hz()
    );

    let supervisor = Supervisor::new(topology, registered_module(id));
    let sync = ExtiInput::new(p.PC13, p.EXTI13, Pull::None);

    interrupt::USART3_4_5_6_LPUART1.set_priority(Priority::P1);
    let control_spawner = CONTROL_EXECUTOR.start(interrupt::USART3_4_5_6_LPUART1);
    control_spawner
        .spawn(control_task::run(control, sync, id))
        .expect("failed to spawn control task");

    spawner
        .spawn(supervisor_task::run(
            supervisor,
            id,
            CommandConsumer::new(COMMAND_QUEUE.receiver()),
            TelemetryPublisher::new(names),
        ))
        .expect("failed to spawn supervisor task");

    spawner
        .spawn(console_task::run(
            ConsoleSession::new(CommandProducer::new(COMMAND_QUEUE.sender()), names),
            id,
        ))
        .expect("failed to spawn console task");

    spawner
        .spawn(usb_task::run(p.USB, p.PA12, p.PA11))
        .expect("failed to spawn USB task");

    core::future::pending::<()>().await;
}
