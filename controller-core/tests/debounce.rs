mod common;

use common::{CountingHook, fap_module};
use psu_core::{
    event_manager::{EventTimes, InterlockKind, InterlockOutcome},
    ps_module::{PsModule, PsState},
    topology::FapHard,
};

const TIMEBASE_HZ: u32 = 1_000;
/// 10 ticks to latch, 20 ticks to forget.
const TIMES: EventTimes = EventTimes::new(10_000, 20_000);
const FAULT: usize = FapHard::LoadOvervoltage as usize;

fn running_module() -> PsModule {
    let module = fap_module(TIMEBASE_HZ, TIMES);
    module.cfg_operation_mode(PsState::SlowRef);
    module
}

/// One time-base period as the control interrupt and background loop see it.
fn period(module: &PsModule) {
    module.events().signal_timebase();
    assert!(module.run_interlocks_debouncing());
}

#[test]
fn short_lived_condition_never_latches() {
    let module = running_module();
    let mut hook = CountingHook::default();

    assert_eq!(
        module.set_hard_interlock(FAULT, &mut hook),
        InterlockOutcome::Pending
    );
    for _ in 1..10 {
        period(&module);
        assert_eq!(
            module.set_hard_interlock(FAULT, &mut hook),
            InterlockOutcome::Pending
        );
    }
    for _ in 10..30 {
        period(&module);
    }

    let event = module
        .events()
        .event(InterlockKind::Hard, FAULT)
        .expect("configured");
    assert!(!event.flag);
    assert_eq!(event.counter, 0);
    assert_eq!(hook.calls, 0);
    assert!(module.latched().is_clear());
    assert_eq!(module.state(), PsState::SlowRef);
}

#[test]
fn persistent_condition_latches_once_at_threshold() {
    let module = running_module();
    let mut hook = CountingHook::default();

    module.set_hard_interlock(FAULT, &mut hook);
    let mut latched_at = None;
    for tick in 1..=30 {
        period(&module);
        let outcome = module.set_hard_interlock(FAULT, &mut hook);
        if outcome == InterlockOutcome::Latched {
            assert!(latched_at.is_none(), "latched twice");
            latched_at = Some(tick);
        }
    }

    assert_eq!(latched_at, Some(10));
    assert_eq!(hook.calls, 1);
    assert_eq!(module.latched().hard, 1 << FAULT);
    assert_eq!(module.state(), PsState::Interlock);
}

#[test]
fn polling_faster_than_the_timebase_consumes_one_tick() {
    let module = running_module();
    let mut hook = CountingHook::default();
    module.set_hard_interlock(FAULT, &mut hook);

    module.events().signal_timebase();
    assert!(module.run_interlocks_debouncing());
    assert!(!module.run_interlocks_debouncing());
    assert!(!module.run_interlocks_debouncing());

    let event = module
        .events()
        .event(InterlockKind::Hard, FAULT)
        .expect("configured");
    assert_eq!(event.counter, 1);
}

#[test]
fn oversized_windows_are_clamped_not_disabled() {
    let module = fap_module(TIMEBASE_HZ, EventTimes::new(u32::MAX, 0));
    let event = module
        .events()
        .event(InterlockKind::Soft, 0)
        .expect("configured");

    assert_eq!(event.debounce_count, 5_000);
    assert_eq!(event.reset_count, 5_001);
}

#[test]
fn out_of_range_index_is_ignored() {
    let module = running_module();
    let mut hook = CountingHook::default();

    assert_eq!(
        module.force_interlock(InterlockKind::Soft, 12, &mut hook),
        InterlockOutcome::OutOfRange
    );
    assert_eq!(hook.calls, 0);
    assert_eq!(module.state(), PsState::SlowRef);
}
