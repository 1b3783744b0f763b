//! Fixed-capacity registry mapping module ids to their state containers.

use core::fmt;

use portable_atomic::{AtomicUsize, Ordering};

use crate::event_manager::EventTimes;

use super::{PsModel, PsModule};

/// Maximum number of logical modules one controller drives.
pub const NUM_MAX_PS_MODULES: usize = 4;

/// Index of a registered module.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ModuleId(u8);

impl ModuleId {
    #[must_use]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ps{}", self.0)
    }
}

/// Errors returned by [`ModuleRegistry`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    /// Every slot is already bound.
    Full,
    /// No module registered under the id.
    UnknownModule(ModuleId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Full => f.write_str("module registry full"),
            RegistryError::UnknownModule(id) => write!(f, "unknown module {id}"),
        }
    }
}

/// Statically sized set of modules, filled once during start-up.
///
/// Registration takes `&self` so the registry can live in a `static` that
/// the control interrupt and the background loop both reach by id.
pub struct ModuleRegistry<const CAPACITY: usize = NUM_MAX_PS_MODULES> {
    modules: [PsModule; CAPACITY],
    registered: AtomicUsize,
}

impl<const CAPACITY: usize> ModuleRegistry<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            modules: [const { PsModule::new() }; CAPACITY],
            registered: AtomicUsize::new(0),
        }
    }

    /// Initialises the next free slot and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] once every slot is bound.
    pub fn register(
        &self,
        model: PsModel,
        timebase_hz: u32,
        hard: &[EventTimes],
        soft: &[EventTimes],
    ) -> Result<ModuleId, RegistryError> {
        critical_section::with(|_| {
            let index = self.registered.load(Ordering::Acquire);
            let module = self.modules.get(index).ok_or(RegistryError::Full)?;
            let raw = u8::try_from(index).map_err(|_| RegistryError::Full)?;

            module.init(model, timebase_hz, hard, soft);
            self.registered.store(index + 1, Ordering::Release);
            Ok(ModuleId::new(raw))
        })
    }

    /// Looks up a registered module.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownModule`] for ids that were never
    /// handed out by [`ModuleRegistry::register`].
    pub fn get(&self, id: ModuleId) -> Result<&PsModule, RegistryError> {
        if self.contains(id) {
            Ok(&self.modules[id.as_index()])
        } else {
            Err(RegistryError::UnknownModule(id))
        }
    }

    #[must_use]
    pub fn contains(&self, id: ModuleId) -> bool {
        id.as_index() < self.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates registered modules in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleId, &PsModule)> {
        self.modules[..self.len()]
            .iter()
            .zip(0u8..)
            .map(|(module, raw)| (ModuleId::new(raw), module))
    }
}

impl<const CAPACITY: usize> Default for ModuleRegistry<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_manager::InterlockKind;
    use crate::ps_module::PsState;

    static SHARED: ModuleRegistry<1> = ModuleRegistry::new();

    #[test]
    fn register_assigns_sequential_ids_until_full() {
        let registry: ModuleRegistry<2> = ModuleRegistry::new();

        let first = registry
            .register(PsModel::FacAcDc, 1_000, &[], &[])
            .expect("first slot");
        let second = registry
            .register(PsModel::Fap, 1_000, &[], &[])
            .expect("second slot");
        assert_eq!(first, ModuleId::new(0));
        assert_eq!(second, ModuleId::new(1));
        assert_eq!(
            registry.register(PsModel::Fap, 1_000, &[], &[]),
            Err(RegistryError::Full)
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn get_rejects_unregistered_ids() {
        let registry: ModuleRegistry = ModuleRegistry::new();
        let id = registry
            .register(PsModel::Fap, 1_000, &[], &[])
            .expect("slot available");

        let module = registry.get(id).expect("registered module");
        assert_eq!(module.state(), PsState::Off);
        assert!(matches!(
            registry.get(ModuleId::new(1)),
            Err(RegistryError::UnknownModule(_))
        ));
        assert!(matches!(
            registry.get(ModuleId::new(200)),
            Err(RegistryError::UnknownModule(_))
        ));
        assert!(!registry.contains(ModuleId::new(3)));
    }

    #[test]
    fn iter_yields_only_registered_modules() {
        let registry: ModuleRegistry = ModuleRegistry::new();
        assert!(registry.is_empty());
        registry
            .register(PsModel::Fap, 1_000, &[], &[])
            .expect("slot available");

        let ids: heapless::Vec<ModuleId, NUM_MAX_PS_MODULES> =
            registry.iter().map(|(id, _)| id).collect();
        assert_eq!(ids.as_slice(), &[ModuleId::new(0)]);
    }

    #[test]
    fn static_registry_binds_through_a_shared_reference() {
        let times = [EventTimes::new(0, 1_000)];
        let id = SHARED
            .register(PsModel::Fap, 1_000, &times, &[])
            .expect("single slot");

        let module = SHARED.get(id).expect("registered module");
        assert_eq!(module.model(), Some(PsModel::Fap));
        assert!(module.events().event(InterlockKind::Hard, 0).is_some());
        assert_eq!(SHARED.register(PsModel::Fap, 1_000, &[], &[]), Err(RegistryError::Full));
    }
}
