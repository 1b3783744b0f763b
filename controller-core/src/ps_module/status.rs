//! Packed power-supply status word.
//!
//! Layout of the 16-bit word (LSB first):
//!
//! | bits  | field      |
//! |-------|------------|
//! | 3:0   | state      |
//! | 4     | open loop  |
//! | 6:5   | interface  |
//! | 7     | active     |
//! | 12:8  | model      |
//! | 13    | unlocked   |
//! | 15:14 | reserved   |

use core::fmt;

const STATE_MASK: u16 = 0x000F;
const OPEN_LOOP_BIT: u16 = 1 << 4;
const INTERFACE_SHIFT: u16 = 5;
const INTERFACE_MASK: u16 = 0b11 << INTERFACE_SHIFT;
const ACTIVE_BIT: u16 = 1 << 7;
const MODEL_SHIFT: u16 = 8;
const MODEL_MASK: u16 = 0b1_1111 << MODEL_SHIFT;
const UNLOCKED_BIT: u16 = 1 << 13;

/// Operating state. Ordering matters: anything above [`PsState::Interlock`]
/// is energised or energising.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum PsState {
    Off,
    Interlock,
    Initializing,
    SlowRef,
    SlowRefSync,
    Cycle,
    RmpWfm,
    MigWfm,
}

impl PsState {
    pub const ALL: [PsState; 8] = [
        PsState::Off,
        PsState::Interlock,
        PsState::Initializing,
        PsState::SlowRef,
        PsState::SlowRefSync,
        PsState::Cycle,
        PsState::RmpWfm,
        PsState::MigWfm,
    ];

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            PsState::Off => 0,
            PsState::Interlock => 1,
            PsState::Initializing => 2,
            PsState::SlowRef => 3,
            PsState::SlowRefSync => 4,
            PsState::Cycle => 5,
            PsState::RmpWfm => 6,
            PsState::MigWfm => 7,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(PsState::Off),
            1 => Some(PsState::Interlock),
            2 => Some(PsState::Initializing),
            3 => Some(PsState::SlowRef),
            4 => Some(PsState::SlowRefSync),
            5 => Some(PsState::Cycle),
            6 => Some(PsState::RmpWfm),
            7 => Some(PsState::MigWfm),
            _ => None,
        }
    }

    /// `true` for the operating modes that produce a reference.
    #[must_use]
    pub const fn is_operating(self) -> bool {
        self.to_raw() > PsState::Initializing.to_raw()
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            PsState::Off => "off",
            PsState::Interlock => "interlock",
            PsState::Initializing => "initializing",
            PsState::SlowRef => "slowref",
            PsState::SlowRefSync => "slowrefsync",
            PsState::Cycle => "cycle",
            PsState::RmpWfm => "rmpwfm",
            PsState::MigWfm => "migwfm",
        }
    }
}

impl fmt::Display for PsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which command interface currently owns the module.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PsInterface {
    Remote,
    Local,
    PcHost,
}

impl PsInterface {
    const fn to_raw(self) -> u16 {
        match self {
            PsInterface::Remote => 0,
            PsInterface::Local => 1,
            PsInterface::PcHost => 2,
        }
    }

    const fn from_raw(raw: u16) -> Self {
        match raw {
            1 => PsInterface::Local,
            2 => PsInterface::PcHost,
            _ => PsInterface::Remote,
        }
    }
}

/// Power-supply topology the controller is configured for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PsModel {
    FacAcDc,
    Fap,
}

impl PsModel {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            PsModel::FacAcDc => 1,
            PsModel::Fap => 2,
        }
    }

    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(PsModel::FacAcDc),
            2 => Some(PsModel::Fap),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            PsModel::FacAcDc => "fac-acdc",
            PsModel::Fap => "fap",
        }
    }
}

/// Decoded status word.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PsStatus {
    pub state: PsState,
    pub open_loop: bool,
    pub interface: PsInterface,
    pub active: bool,
    pub model: Option<PsModel>,
    pub unlocked: bool,
}

impl PsStatus {
    /// Status of a module that has not been configured yet.
    pub const UNCONFIGURED: PsStatus = PsStatus {
        state: PsState::Off,
        open_loop: true,
        interface: PsInterface::Remote,
        active: false,
        model: None,
        unlocked: false,
    };

    /// Status right after `init`: off, open loop, remote, active, locked.
    #[must_use]
    pub const fn initial(model: PsModel) -> Self {
        Self {
            state: PsState::Off,
            open_loop: true,
            interface: PsInterface::Remote,
            active: true,
            model: Some(model),
            unlocked: false,
        }
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn to_raw(self) -> u16 {
        let mut raw = self.state.to_raw() as u16;
        if self.open_loop {
            raw |= OPEN_LOOP_BIT;
        }
        raw |= self.interface.to_raw() << INTERFACE_SHIFT;
        if self.active {
            raw |= ACTIVE_BIT;
        }
        if let Some(model) = self.model {
            raw |= (model.to_raw() as u16) << MODEL_SHIFT;
        }
        if self.unlocked {
            raw |= UNLOCKED_BIT;
        }
        raw
    }

    /// Decodes a raw word. An unknown state code decodes as
    /// [`PsState::Interlock`] so a corrupted word never reads as running.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_raw(raw: u16) -> Self {
        let state = match PsState::from_raw((raw & STATE_MASK) as u8) {
            Some(state) => state,
            None => PsState::Interlock,
        };
        Self {
            state,
            open_loop: raw & OPEN_LOOP_BIT != 0,
            interface: PsInterface::from_raw((raw & INTERFACE_MASK) >> INTERFACE_SHIFT),
            active: raw & ACTIVE_BIT != 0,
            model: PsModel::from_raw(((raw & MODEL_MASK) >> MODEL_SHIFT) as u8),
            unlocked: raw & UNLOCKED_BIT != 0,
        }
    }
}
