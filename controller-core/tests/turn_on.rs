mod common;

use common::{MockPwm, PollTimer, SimPins, hardware};
use psu_core::{
    event_manager::{EventTimes, InterlockKind},
    io::OutputPin,
    parameters::ParameterBank,
    ps_module::{ModuleRegistry, PsModel, PsModule, PsState},
    sequencing::SequenceAbort,
    signals::{Signal, SignalBank},
    topology::{FacAcDc, FacAcDcConfig, FacAcDcHard, Fap, FapConfig, FapHard, Topology},
};

fn acdc_module() -> PsModule {
    let module = PsModule::new();
    let times = [EventTimes::new(0, 1_000); 4];
    module.init(PsModel::FacAcDc, 1_000, &times, &[]);
    module.cfg_operation_mode(PsState::Off);
    module
}

fn acdc(pins: SimPins, precharge_timeout_us: Option<u32>) -> FacAcDc<MockPwm, SimPins, PollTimer> {
    FacAcDc::new(
        FacAcDcConfig {
            contactor_close_timeout_us: 10_000,
            precharge_timeout_us,
            ..FacAcDcConfig::default()
        },
        hardware(pins),
    )
}

#[test]
fn contactor_timeout_latches_fault_and_keeps_output_off() {
    let module = acdc_module();
    let signals = SignalBank::new();
    let mut topology = acdc(SimPins::stuck_open(OutputPin::AcMainsContactor), None);

    let abort = topology
        .turn_on(&module, &signals)
        .expect_err("status pin never asserts");

    let fault = FacAcDcHard::AcMainsContactorFault.index();
    assert_eq!(
        abort,
        SequenceAbort {
            kind: InterlockKind::Hard,
            index: fault,
        }
    );
    assert_eq!(module.latched().hard, 1 << fault);
    assert_eq!(module.state(), PsState::Interlock);

    let hw = topology.hardware();
    assert!(!hw.pwm.any_enabled());
    assert!(!hw.io.is_driven(OutputPin::AcMainsContactor));
    // the wait covers the close timeout before the open settle time starts
    assert!(hw.timer.elapsed_us >= 10_000);
}

#[test]
fn failed_precharge_never_reaches_the_mains_contactor() {
    let module = acdc_module();
    let signals = SignalBank::new();
    let mut topology = acdc(SimPins::stuck_open(OutputPin::PrechargeRelay), Some(5_000));

    let abort = topology
        .turn_on(&module, &signals)
        .expect_err("precharge relay never closes");

    assert_eq!(abort.index, FacAcDcHard::PrechargeRelayFault.index());
    let io = &topology.hardware().io;
    assert!(io.was_ever_driven(OutputPin::PrechargeRelay));
    assert!(!io.was_ever_driven(OutputPin::AcMainsContactor));
    assert!(!io.is_driven(OutputPin::PrechargeRelay));
}

#[test]
fn healthy_acdc_starts_in_open_loop_slowref() {
    let module = acdc_module();
    let signals = SignalBank::new();
    let mut topology = acdc(SimPins::default(), Some(5_000));

    topology.turn_on(&module, &signals).expect("contacts close");

    assert_eq!(module.state(), PsState::SlowRef);
    assert!(module.is_open_loop());
    assert!(topology.hardware().pwm.any_enabled());
    assert!(module.latched().is_clear());

    topology.check_interlocks(&module, &signals);
    assert!(module.latched().is_clear());
}

#[test]
fn turn_on_outside_off_is_ignored() {
    let module = acdc_module();
    module.cfg_operation_mode(PsState::Interlock);
    let signals = SignalBank::new();
    let mut topology = acdc(SimPins::default(), None);

    topology.turn_on(&module, &signals).expect("no-op");
    assert_eq!(module.state(), PsState::Interlock);
    assert!(topology.hardware().io.drive_history.is_empty());
}

#[test]
fn fap_refuses_to_close_onto_a_charged_dclink() {
    let module = PsModule::new();
    let times = [EventTimes::new(0, 1_000); 8];
    module.init(PsModel::Fap, 1_000, &times, &times[..4]);
    module.cfg_operation_mode(PsState::Off);
    let signals = SignalBank::new();
    signals.publish(Signal::VDcLink, 45.0);
    let mut topology = Fap::new(FapConfig::default(), hardware(SimPins::default()));

    let abort = topology.turn_on(&module, &signals).expect_err("dc link too high");

    assert_eq!(abort.index, FapHard::DcLinkOvervoltage.index());
    assert!(!topology.hardware().io.was_ever_driven(OutputPin::DcLinkContactor));
    assert_eq!(module.state(), PsState::Interlock);
}

static REGISTRY: ModuleRegistry = ModuleRegistry::new();

#[test]
fn registered_module_is_driven_through_its_id() {
    let signals = SignalBank::new();
    let mut topology = acdc(SimPins::default(), Some(10_000));
    let id = topology
        .register_module(&REGISTRY, 1_000, &ParameterBank::with_defaults())
        .expect("free slot");

    let module = REGISTRY.get(id).expect("registered above");
    assert_eq!(module.model(), Some(PsModel::FacAcDc));
    assert_eq!(module.state(), PsState::Off);

    topology.turn_on(module, &signals).expect("contacts follow their drive");
    assert_eq!(REGISTRY.get(id).expect("still registered").state(), PsState::SlowRef);
}
