//! Operational state of one logical power-supply module.
//!
//! [`PsModule`] is shared by the control interrupt and the background loop,
//! so every field is either atomic or owns its own critical section. The
//! topology-specific behaviour (how to switch the hardware off) is supplied
//! by the caller through [`ShutdownHook`].

use portable_atomic::{AtomicBool, AtomicF32, AtomicU16, Ordering};

use crate::event_manager::{
    EventManager, EventTimes, InterlockKind, InterlockOutcome, InterlockRegister,
    LatchedInterlocks,
};

mod registry;
mod status;

pub use registry::{ModuleId, ModuleRegistry, NUM_MAX_PS_MODULES, RegistryError};
pub use status::{PsInterface, PsModel, PsState, PsStatus};

/// Switches a module's power stage off.
///
/// Invoked exactly once for every newly latched interlock, from whichever
/// context reported it.
pub trait ShutdownHook {
    fn turn_off(&mut self, module: &PsModule);
}

/// Hook that only records the request for the background loop, used where
/// the caller has no access to the power stage.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeferredShutdown;

impl ShutdownHook for DeferredShutdown {
    fn turn_off(&mut self, module: &PsModule) {
        module.request_shutdown();
    }
}

/// State container for one logical module.
pub struct PsModule {
    status: AtomicU16,
    setpoint: AtomicF32,
    reference: AtomicF32,
    interlocks: InterlockRegister,
    events: EventManager,
    shutdown_requested: AtomicBool,
}

impl PsModule {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: AtomicU16::new(PsStatus::UNCONFIGURED.to_raw()),
            setpoint: AtomicF32::new(0.0),
            reference: AtomicF32::new(0.0),
            interlocks: InterlockRegister::new(),
            events: EventManager::new(),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Binds the module to a topology and configures its debounce banks.
    pub fn init(
        &self,
        model: PsModel,
        timebase_hz: u32,
        hard: &[EventTimes],
        soft: &[EventTimes],
    ) {
        self.status
            .store(PsStatus::initial(model).to_raw(), Ordering::Release);
        self.setpoint.store(0.0, Ordering::Release);
        self.reference.store(0.0, Ordering::Release);
        self.interlocks.clear_all();
        self.shutdown_requested.store(false, Ordering::Release);
        self.events.configure(timebase_hz, hard, soft);
    }

    #[must_use]
    pub fn status(&self) -> PsStatus {
        PsStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn raw_status(&self) -> u16 {
        self.status.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> PsState {
        self.status().state
    }

    fn update_status(&self, mut apply: impl FnMut(&mut PsStatus)) {
        let _ = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let mut status = PsStatus::from_raw(raw);
                apply(&mut status);
                Some(status.to_raw())
            });
    }

    /// Sets the operating state.
    pub fn cfg_operation_mode(&self, state: PsState) {
        self.update_status(|status| status.state = state);
    }

    pub fn open_loop(&self) {
        self.update_status(|status| status.open_loop = true);
    }

    pub fn close_loop(&self) {
        self.update_status(|status| status.open_loop = false);
    }

    #[must_use]
    pub fn is_open_loop(&self) -> bool {
        self.status().open_loop
    }

    pub fn cfg_interface(&self, interface: PsInterface) {
        self.update_status(|status| status.interface = interface);
    }

    pub fn activate(&self) {
        self.update_status(|status| status.active = true);
    }

    pub fn deactivate(&self) {
        self.update_status(|status| status.active = false);
    }

    pub fn lock(&self) {
        self.update_status(|status| status.unlocked = false);
    }

    pub fn unlock(&self) {
        self.update_status(|status| status.unlocked = true);
    }

    #[must_use]
    pub fn model(&self) -> Option<PsModel> {
        self.status().model
    }

    #[must_use]
    pub fn setpoint(&self) -> f32 {
        self.setpoint.load(Ordering::Acquire)
    }

    pub fn set_setpoint(&self, value: f32) {
        self.setpoint.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn reference(&self) -> f32 {
        self.reference.load(Ordering::Acquire)
    }

    pub fn set_reference(&self, value: f32) {
        self.reference.store(value, Ordering::Release);
    }

    #[must_use]
    pub fn interlocks(&self) -> &InterlockRegister {
        &self.interlocks
    }

    #[must_use]
    pub fn latched(&self) -> LatchedInterlocks {
        self.interlocks.snapshot()
    }

    #[must_use]
    pub fn events(&self) -> &EventManager {
        &self.events
    }

    /// Reports a hard fault condition; see [`PsModule::set_interlock`].
    pub fn set_hard_interlock<H>(&self, index: usize, hook: &mut H) -> InterlockOutcome
    where
        H: ShutdownHook + ?Sized,
    {
        self.set_interlock(InterlockKind::Hard, index, hook)
    }

    /// Reports a soft fault condition; see [`PsModule::set_interlock`].
    pub fn set_soft_interlock<H>(&self, index: usize, hook: &mut H) -> InterlockOutcome
    where
        H: ShutdownHook + ?Sized,
    {
        self.set_interlock(InterlockKind::Soft, index, hook)
    }

    /// Reports a fault condition to the debounce engine.
    ///
    /// When this call latches the bit, the state is forced to
    /// [`PsState::Interlock`] together with the latch and the power stage is
    /// then switched off through `hook`. A bit that was already latched
    /// causes no further side effects.
    pub fn set_interlock<H>(&self, kind: InterlockKind, index: usize, hook: &mut H) -> InterlockOutcome
    where
        H: ShutdownHook + ?Sized,
    {
        let outcome = self.events.set_then(kind, index, &self.interlocks, || {
            self.cfg_operation_mode(PsState::Interlock);
        });
        if outcome == InterlockOutcome::Latched {
            hook.turn_off(self);
        }
        outcome
    }

    /// Reports a fault that must latch without waiting for debounce.
    pub fn force_interlock<H>(&self, kind: InterlockKind, index: usize, hook: &mut H) -> InterlockOutcome
    where
        H: ShutdownHook + ?Sized,
    {
        self.events.bypass_debounce(kind, index);
        self.set_interlock(kind, index, hook)
    }

    /// Preloads a hard event so its next report latches immediately.
    pub fn bypass_hard_debounce(&self, index: usize) {
        self.events.bypass_debounce(InterlockKind::Hard, index);
    }

    /// Preloads a soft event so its next report latches immediately.
    pub fn bypass_soft_debounce(&self, index: usize) {
        self.events.bypass_debounce(InterlockKind::Soft, index);
    }

    /// Raises an advisory alarm bit. Alarms never change the state.
    ///
    /// Returns `true` when the bit was not already set.
    pub fn set_alarm(&self, index: usize) -> bool {
        self.interlocks.raise_alarm(index)
    }

    /// Consumes one time-base period of debounce counting, if one elapsed.
    pub fn run_interlocks_debouncing(&self) -> bool {
        self.events.tick()
    }

    /// Clears every latched bit and alarm. State transitions are left to
    /// the topology, which must re-verify its hardware first.
    pub fn clear_interlocks(&self) {
        self.interlocks.clear_all();
    }

    /// Asks the background loop to run the full topology turn-off.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn take_shutdown_request(&self) -> bool {
        self.shutdown_requested.swap(false, Ordering::AcqRel)
    }
}

impl Default for PsModule {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingShutdown {
        calls: usize,
        state_seen: Option<PsState>,
        latched_seen: bool,
    }

    impl ShutdownHook for CountingShutdown {
        fn turn_off(&mut self, module: &PsModule) {
            self.calls += 1;
            self.state_seen = Some(module.state());
            self.latched_seen = !module.latched().is_clear();
            if module.state() != PsState::Interlock {
                module.cfg_operation_mode(PsState::Off);
            }
        }
    }

    fn running_module() -> PsModule {
        let module = PsModule::new();
        module.init(
            PsModel::Fap,
            1_000,
            &[EventTimes::new(10_000, 20_000)],
            &[EventTimes::new(0, 1_000)],
        );
        module.cfg_operation_mode(PsState::SlowRef);
        module
    }

    #[test]
    fn init_resets_status_and_latches() {
        let module = PsModule::new();
        assert_eq!(module.status(), PsStatus::UNCONFIGURED);
        module.interlocks().latch(InterlockKind::Hard, 1);

        module.init(PsModel::FacAcDc, 1_000, &[], &[]);
        assert_eq!(module.status(), PsStatus::initial(PsModel::FacAcDc));
        assert!(module.latched().is_clear());
    }

    #[test]
    fn status_operations_touch_only_their_field() {
        let module = running_module();
        module.close_loop();
        module.unlock();
        module.cfg_interface(PsInterface::Local);
        module.deactivate();

        let status = module.status();
        assert_eq!(status.state, PsState::SlowRef);
        assert!(!status.open_loop);
        assert!(status.unlocked);
        assert!(!status.active);
        assert_eq!(status.interface, PsInterface::Local);
        assert_eq!(module.model(), Some(PsModel::Fap));

        module.open_loop();
        module.lock();
        module.activate();
        assert!(module.is_open_loop());
        assert!(!module.status().unlocked);
        assert!(module.status().active);
    }

    #[test]
    fn latch_turns_off_once_and_forces_interlock() {
        let module = running_module();
        let mut hook = CountingShutdown::default();

        assert_eq!(
            module.set_soft_interlock(0, &mut hook),
            InterlockOutcome::Latched
        );
        assert_eq!(hook.calls, 1);
        // the turn-off already runs with the latch and state published
        assert_eq!(hook.state_seen, Some(PsState::Interlock));
        assert!(hook.latched_seen);
        assert_eq!(module.state(), PsState::Interlock);

        assert_eq!(
            module.set_soft_interlock(0, &mut hook),
            InterlockOutcome::AlreadyLatched
        );
        assert_eq!(hook.calls, 1);
    }

    #[test]
    fn forced_interlock_skips_debounce() {
        let module = running_module();
        let mut hook = CountingShutdown::default();

        assert_eq!(
            module.set_hard_interlock(0, &mut hook),
            InterlockOutcome::Pending
        );
        assert_eq!(
            module.force_interlock(InterlockKind::Hard, 0, &mut hook),
            InterlockOutcome::Latched
        );
        assert!(module.interlocks().is_latched(InterlockKind::Hard, 0));
        assert_eq!(hook.calls, 1);
    }

    #[test]
    fn deferred_shutdown_sets_request_flag() {
        let module = running_module();
        let mut hook = DeferredShutdown;

        module.force_interlock(InterlockKind::Hard, 0, &mut hook);
        assert_eq!(module.state(), PsState::Interlock);
        assert!(module.take_shutdown_request());
        assert!(!module.take_shutdown_request());
    }

    #[test]
    fn alarms_do_not_touch_state() {
        let module = running_module();
        assert!(module.set_alarm(0));
        assert!(!module.set_alarm(0));
        assert_eq!(module.state(), PsState::SlowRef);
        assert_eq!(module.latched().alarms, 1);

        module.bypass_soft_debounce(0);
        module.clear_interlocks();
        assert!(module.latched().is_clear());
    }

    #[test]
    fn setpoint_and_reference_round_trip() {
        let module = running_module();
        module.set_setpoint(12.5);
        module.set_reference(-3.25);
        assert!((module.setpoint() - 12.5).abs() < f32::EPSILON);
        assert!((module.reference() + 3.25).abs() < f32::EPSILON);
    }
}
