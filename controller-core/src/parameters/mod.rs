//! Typed table of persisted configuration values.
//!
//! Every entry is declared with a [`ParamType`] and an element count.
//! Reads and writes are bounds- and type-checked; nothing here panics on
//! malformed input.

use core::fmt;

/// Upper bound on distinct parameter ids.
pub const NUM_MAX_PARAMETERS: usize = 64;

/// Upper bound on elements stored under one id.
pub const MAX_PARAM_ELEMENTS: usize = 32;

/// Number of analog limit slots (`AnalogVarMax` / `AnalogVarMin`).
pub const NUM_ANALOG_VARS: usize = 16;

/// Number of signal-generator auxiliary parameters.
pub const NUM_SIGGEN_AUX: usize = 3;

macro_rules! param_ids {
    ($($name:ident = $raw:literal => $label:literal,)+) => {
        /// Symbolic parameter identifiers.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum ParamId {
            $($name,)+
        }

        impl ParamId {
            pub const ALL: &'static [ParamId] = &[$(ParamId::$name,)+];

            #[must_use]
            pub const fn to_raw(self) -> u8 {
                match self {
                    $(ParamId::$name => $raw,)+
                }
            }

            #[must_use]
            pub const fn from_raw(raw: u8) -> Option<Self> {
                match raw {
                    $($raw => Some(ParamId::$name),)+
                    _ => None,
                }
            }

            #[must_use]
            pub const fn label(self) -> &'static str {
                match self {
                    $(ParamId::$name => $label,)+
                }
            }
        }
    };
}

param_ids! {
    PsModel = 0 => "ps_model",
    ControlFreqHz = 1 => "control_freq_hz",
    TimeSlicerFreqHz = 2 => "timeslicer_freq_hz",
    HardInterlockDebounceUs = 3 => "hard_itlk_debounce_us",
    HardInterlockResetUs = 4 => "hard_itlk_reset_us",
    SoftInterlockDebounceUs = 5 => "soft_itlk_debounce_us",
    SoftInterlockResetUs = 6 => "soft_itlk_reset_us",
    AnalogVarMax = 7 => "analog_var_max",
    AnalogVarMin = 8 => "analog_var_min",
    MaxRef = 9 => "max_ref",
    MinRef = 10 => "min_ref",
    MaxRefOpenLoop = 11 => "max_ref_openloop",
    MinRefOpenLoop = 12 => "min_ref_openloop",
    PwmMaxDuty = 13 => "pwm_max_duty",
    PwmMinDuty = 14 => "pwm_min_duty",
    PwmMaxDutyOpenLoop = 15 => "pwm_max_duty_openloop",
    PwmMinDutyOpenLoop = 16 => "pwm_min_duty_openloop",
    MaxSlewRateSlowRef = 17 => "max_slewrate_slowref",
    MaxSlewRateSigGenAmp = 18 => "max_slewrate_siggen_amp",
    MaxSlewRateSigGenOffset = 19 => "max_slewrate_siggen_offset",
    PiKp = 20 => "pi_kp",
    PiKi = 21 => "pi_ki",
    SigGenKind = 22 => "siggen_type",
    SigGenNumCycles = 23 => "siggen_num_cycles",
    SigGenFreq = 24 => "siggen_freq",
    SigGenAmplitude = 25 => "siggen_amplitude",
    SigGenOffset = 26 => "siggen_offset",
    SigGenAux = 27 => "siggen_aux_param",
    WfmRefGain = 28 => "wfmref_gain",
    WfmRefOffset = 29 => "wfmref_offset",
    ScopeFreqHz = 30 => "scope_freq_hz",
    MaxSyncFreqHz = 31 => "max_sync_freq_hz",
}

impl ParamId {
    #[allow(clippy::cast_lossless)]
    const fn slot(self) -> usize {
        self.to_raw() as usize
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Storage type of an entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParamType {
    U16,
    U32,
    F32,
}

/// One typed element.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ParamValue {
    U16(u16),
    U32(u32),
    F32(f32),
}

impl ParamValue {
    #[must_use]
    pub const fn param_type(self) -> ParamType {
        match self {
            ParamValue::U16(_) => ParamType::U16,
            ParamValue::U32(_) => ParamType::U32,
            ParamValue::F32(_) => ParamType::F32,
        }
    }

    /// Widens the value to `f32`, the way generic readers consume it.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f32(self) -> f32 {
        match self {
            ParamValue::U16(value) => f32::from(value),
            ParamValue::U32(value) => value as f32,
            ParamValue::F32(value) => value,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            ParamValue::U16(value) => u32::from(value),
            ParamValue::U32(value) => value,
            ParamValue::F32(value) => value.to_bits(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_bits(ty: ParamType, bits: u32) -> Self {
        match ty {
            ParamType::U16 => ParamValue::U16(bits as u16),
            ParamType::U32 => ParamValue::U32(bits),
            ParamType::F32 => ParamValue::F32(f32::from_bits(bits)),
        }
    }
}

/// Errors returned by [`ParameterBank`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ParameterError {
    /// The id was never declared in this bank.
    Undefined(ParamId),
    /// Element index past the declared element count.
    ElementOutOfRange { id: ParamId, index: usize },
    /// Value type differs from the declared type.
    TypeMismatch { id: ParamId, expected: ParamType },
    /// Declared element count is zero or above [`MAX_PARAM_ELEMENTS`].
    InvalidLength { id: ParamId, len: usize },
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterError::Undefined(id) => write!(f, "parameter {id} not defined"),
            ParameterError::ElementOutOfRange { id, index } => {
                write!(f, "parameter {id} has no element {index}")
            }
            ParameterError::TypeMismatch { id, expected } => {
                write!(f, "parameter {id} holds {expected:?}")
            }
            ParameterError::InvalidLength { id, len } => {
                write!(f, "parameter {id} cannot hold {len} elements")
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
struct Entry {
    ty: ParamType,
    len: usize,
    data: [u32; MAX_PARAM_ELEMENTS],
}

/// Fixed-capacity parameter table.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterBank {
    entries: [Option<Entry>; NUM_MAX_PARAMETERS],
}

impl ParameterBank {
    /// Creates an empty bank; every id reads as [`ParameterError::Undefined`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [None; NUM_MAX_PARAMETERS],
        }
    }

    /// Declares `id` with `len` zeroed elements of type `ty`.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::InvalidLength`] when `len` is zero or above
    /// [`MAX_PARAM_ELEMENTS`].
    pub fn define(&mut self, id: ParamId, ty: ParamType, len: usize) -> Result<(), ParameterError> {
        if len == 0 || len > MAX_PARAM_ELEMENTS {
            return Err(ParameterError::InvalidLength { id, len });
        }
        let zero = match ty {
            ParamType::F32 => 0.0f32.to_bits(),
            ParamType::U16 | ParamType::U32 => 0,
        };
        self.entries[id.slot()] = Some(Entry {
            ty,
            len,
            data: [zero; MAX_PARAM_ELEMENTS],
        });
        Ok(())
    }

    /// Declares `id` and fills it from `values`, all of one type.
    ///
    /// # Errors
    ///
    /// Fails like [`ParameterBank::define`] and [`ParameterBank::set`].
    pub fn define_with(&mut self, id: ParamId, values: &[ParamValue]) -> Result<(), ParameterError> {
        let ty = values
            .first()
            .map(|value| value.param_type())
            .ok_or(ParameterError::InvalidLength { id, len: 0 })?;
        self.define(id, ty, values.len())?;
        for (index, value) in values.iter().enumerate() {
            self.set(id, index, *value)?;
        }
        Ok(())
    }

    fn entry(&self, id: ParamId) -> Result<&Entry, ParameterError> {
        self.entries[id.slot()]
            .as_ref()
            .ok_or(ParameterError::Undefined(id))
    }

    #[must_use]
    pub fn is_defined(&self, id: ParamId) -> bool {
        self.entries[id.slot()].is_some()
    }

    /// Declared element count.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::Undefined`] for undeclared ids.
    pub fn num_elements(&self, id: ParamId) -> Result<usize, ParameterError> {
        self.entry(id).map(|entry| entry.len)
    }

    /// Reads element `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::Undefined`] or
    /// [`ParameterError::ElementOutOfRange`].
    pub fn get(&self, id: ParamId, index: usize) -> Result<ParamValue, ParameterError> {
        let entry = self.entry(id)?;
        if index >= entry.len {
            return Err(ParameterError::ElementOutOfRange { id, index });
        }
        Ok(ParamValue::from_bits(entry.ty, entry.data[index]))
    }

    /// # Errors
    ///
    /// As [`ParameterBank::get`], plus [`ParameterError::TypeMismatch`].
    pub fn get_u16(&self, id: ParamId, index: usize) -> Result<u16, ParameterError> {
        match self.get(id, index)? {
            ParamValue::U16(value) => Ok(value),
            _ => Err(ParameterError::TypeMismatch {
                id,
                expected: ParamType::U16,
            }),
        }
    }

    /// # Errors
    ///
    /// As [`ParameterBank::get`], plus [`ParameterError::TypeMismatch`].
    pub fn get_u32(&self, id: ParamId, index: usize) -> Result<u32, ParameterError> {
        match self.get(id, index)? {
            ParamValue::U32(value) => Ok(value),
            _ => Err(ParameterError::TypeMismatch {
                id,
                expected: ParamType::U32,
            }),
        }
    }

    /// # Errors
    ///
    /// As [`ParameterBank::get`], plus [`ParameterError::TypeMismatch`].
    pub fn get_f32(&self, id: ParamId, index: usize) -> Result<f32, ParameterError> {
        match self.get(id, index)? {
            ParamValue::F32(value) => Ok(value),
            _ => Err(ParameterError::TypeMismatch {
                id,
                expected: ParamType::F32,
            }),
        }
    }

    /// Reads `id[index]` as `f32`, or `fallback` if it cannot be read.
    #[must_use]
    pub fn f32_or(&self, id: ParamId, index: usize, fallback: f32) -> f32 {
        self.get(id, index).map_or(fallback, ParamValue::as_f32)
    }

    /// Writes element `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::Undefined`],
    /// [`ParameterError::ElementOutOfRange`] or
    /// [`ParameterError::TypeMismatch`]; the entry is unchanged on error.
    pub fn set(&mut self, id: ParamId, index: usize, value: ParamValue) -> Result<(), ParameterError> {
        let entry = self.entries[id.slot()]
            .as_mut()
            .ok_or(ParameterError::Undefined(id))?;
        if index >= entry.len {
            return Err(ParameterError::ElementOutOfRange { id, index });
        }
        if value.param_type() != entry.ty {
            return Err(ParameterError::TypeMismatch {
                id,
                expected: entry.ty,
            });
        }
        entry.data[index] = value.to_bits();
        Ok(())
    }

    /// A bank with every generic id declared and set to a conservative default.
    ///
    /// `AnalogVarMax` and `AnalogVarMin` stay undefined: their meaning is
    /// topology specific and topology configs fall back to their own defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut bank = Self::new();
        for &(id, ty, len, value) in DEFAULTS {
            // DEFAULTS only holds lengths within MAX_PARAM_ELEMENTS
            let _ = bank.define(id, ty, len);
            for index in 0..len {
                let _ = bank.set(id, index, value);
            }
        }
        bank
    }
}

impl Default for ParameterBank {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULTS: &[(ParamId, ParamType, usize, ParamValue)] = &[
    (ParamId::PsModel, ParamType::U16, 1, ParamValue::U16(2)),
    (ParamId::ControlFreqHz, ParamType::F32, 1, ParamValue::F32(20_000.0)),
    (ParamId::TimeSlicerFreqHz, ParamType::F32, 4, ParamValue::F32(10_000.0)),
    (ParamId::HardInterlockDebounceUs, ParamType::U32, 32, ParamValue::U32(0)),
    (ParamId::HardInterlockResetUs, ParamType::U32, 32, ParamValue::U32(1_000)),
    (ParamId::SoftInterlockDebounceUs, ParamType::U32, 32, ParamValue::U32(0)),
    (ParamId::SoftInterlockResetUs, ParamType::U32, 32, ParamValue::U32(1_000)),
    (ParamId::MaxRef, ParamType::F32, 1, ParamValue::F32(10.0)),
    (ParamId::MinRef, ParamType::F32, 1, ParamValue::F32(-10.0)),
    (ParamId::MaxRefOpenLoop, ParamType::F32, 1, ParamValue::F32(90.0)),
    (ParamId::MinRefOpenLoop, ParamType::F32, 1, ParamValue::F32(-90.0)),
    (ParamId::PwmMaxDuty, ParamType::F32, 1, ParamValue::F32(0.9)),
    (ParamId::PwmMinDuty, ParamType::F32, 1, ParamValue::F32(-0.9)),
    (ParamId::PwmMaxDutyOpenLoop, ParamType::F32, 1, ParamValue::F32(0.9)),
    (ParamId::PwmMinDutyOpenLoop, ParamType::F32, 1, ParamValue::F32(-0.9)),
    (ParamId::MaxSlewRateSlowRef, ParamType::F32, 1, ParamValue::F32(10.0)),
    (ParamId::MaxSlewRateSigGenAmp, ParamType::F32, 1, ParamValue::F32(10.0)),
    (ParamId::MaxSlewRateSigGenOffset, ParamType::F32, 1, ParamValue::F32(10.0)),
    (ParamId::PiKp, ParamType::F32, 1, ParamValue::F32(0.05)),
    (ParamId::PiKi, ParamType::F32, 1, ParamValue::F32(5.0)),
    (ParamId::SigGenKind, ParamType::U16, 1, ParamValue::U16(0)),
    (ParamId::SigGenNumCycles, ParamType::U16, 1, ParamValue::U16(1)),
    (ParamId::SigGenFreq, ParamType::F32, 1, ParamValue::F32(1.0)),
    (ParamId::SigGenAmplitude, ParamType::F32, 1, ParamValue::F32(0.0)),
    (ParamId::SigGenOffset, ParamType::F32, 1, ParamValue::F32(0.0)),
    (ParamId::SigGenAux, ParamType::F32, NUM_SIGGEN_AUX, ParamValue::F32(0.0)),
    (ParamId::WfmRefGain, ParamType::F32, 1, ParamValue::F32(1.0)),
    (ParamId::WfmRefOffset, ParamType::F32, 1, ParamValue::F32(0.0)),
    (ParamId::ScopeFreqHz, ParamType::F32, 1, ParamValue::F32(1_000.0)),
    (ParamId::MaxSyncFreqHz, ParamType::F32, 1, ParamValue::F32(2_000.0)),
];
