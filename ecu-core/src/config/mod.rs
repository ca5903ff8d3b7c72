//! Typed engine configuration consumed at (re)configuration time.
//!
//! Raw values coming from a configuration store are decoded through the
//! `TryFrom` impls here; once an [`EngineConfig`] exists every combination is
//! representable, and the assignment layer turns unsupported combinations
//! into documented fallbacks instead of errors.

use core::convert::TryFrom;
use core::fmt;

use crate::output::{DriverKind, MAX_OUTPUTS, OutputError, Polarity};
use crate::tacho::TachoConfig;

/// Errors raised while decoding raw configuration values.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    UnsupportedCylinders(u8),
    UnsupportedStrokes(u8),
    OutputOutOfRange(u8),
    /// Board cannot expose more than eight outputs per class.
    TooManyOutputs(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnsupportedCylinders(count) => {
                write!(f, "{count} cylinders not supported (1-6 or 8)")
            }
            ConfigError::UnsupportedStrokes(strokes) => {
                write!(f, "{strokes}-stroke cycle not supported (2 or 4)")
            }
            ConfigError::OutputOutOfRange(raw) => {
                write!(f, "output {raw} outside 1-{MAX_OUTPUTS}")
            }
            ConfigError::TooManyOutputs(count) => {
                write!(f, "{count} outputs exceed the {MAX_OUTPUTS} per class")
            }
        }
    }
}

impl From<OutputError> for ConfigError {
    fn from(err: OutputError) -> Self {
        match err {
            OutputError::OutOfRange(raw) => ConfigError::OutputOutOfRange(raw),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cylinders {
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Eight,
}

impl Cylinders {
    pub const fn count(self) -> u8 {
        match self {
            Cylinders::One => 1,
            Cylinders::Two => 2,
            Cylinders::Three => 3,
            Cylinders::Four => 4,
            Cylinders::Five => 5,
            Cylinders::Six => 6,
            Cylinders::Eight => 8,
        }
    }

    pub const fn is_even(self) -> bool {
        self.count() % 2 == 0
    }
}

impl TryFrom<u8> for Cylinders {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Cylinders::One),
            2 => Ok(Cylinders::Two),
            3 => Ok(Cylinders::Three),
            4 => Ok(Cylinders::Four),
            5 => Ok(Cylinders::Five),
            6 => Ok(Cylinders::Six),
            8 => Ok(Cylinders::Eight),
            other => Err(ConfigError::UnsupportedCylinders(other)),
        }
    }
}

impl fmt::Display for Cylinders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}cyl", self.count())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Strokes {
    Two,
    Four,
}

impl Strokes {
    /// Crank degrees in one full engine cycle.
    pub const fn cycle_degrees(self) -> u16 {
        match self {
            Strokes::Two => 360,
            Strokes::Four => 720,
        }
    }
}

impl TryFrom<u8> for Strokes {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Strokes::Two),
            4 => Ok(Strokes::Four),
            other => Err(ConfigError::UnsupportedStrokes(other)),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum EngineType {
    #[default]
    EvenFire,
    /// Firing offsets of cylinders 2, 3 and 4 relative to cylinder 1.
    OddFire { angles: [u16; 3] },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RotaryType {
    Fc,
    Fd,
    Rx8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum SparkMode {
    #[default]
    Wasted,
    Single,
    WastedCop,
    Sequential,
    Rotary(RotaryType),
}

impl SparkMode {
    pub const fn label(self) -> &'static str {
        match self {
            SparkMode::Wasted => "wasted",
            SparkMode::Single => "single",
            SparkMode::WastedCop => "wasted-cop",
            SparkMode::Sequential => "sequential",
            SparkMode::Rotary(RotaryType::Fc) => "rotary-fc",
            SparkMode::Rotary(RotaryType::Fd) => "rotary-fd",
            SparkMode::Rotary(RotaryType::Rx8) => "rotary-rx8",
        }
    }
}

impl fmt::Display for SparkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum InjectionLayout {
    #[default]
    Paired,
    SemiSequential,
    Sequential,
}

impl InjectionLayout {
    pub const fn label(self) -> &'static str {
        match self {
            InjectionLayout::Paired => "paired",
            InjectionLayout::SemiSequential => "semi-sequential",
            InjectionLayout::Sequential => "sequential",
        }
    }
}

impl fmt::Display for InjectionLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum InjectorType {
    #[default]
    Port,
    ThrottleBody,
}

/// Which injectors share a channel on a 4-cylinder semi-sequential layout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum InjectorPairing {
    /// 1 with 3, 2 with 4.
    #[default]
    Cyl13Cyl24,
    /// 1 with 4, 2 with 3.
    Cyl14Cyl23,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum InjectionTiming {
    /// Each non-sequential channel squirts at its own angle.
    #[default]
    Alternating,
    /// Every non-sequential channel squirts at angle 0.
    Simultaneous,
}

/// Outputs a board physically exposes per class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BoardCapabilities {
    pub fuel_outputs: u8,
    pub ignition_outputs: u8,
}

impl BoardCapabilities {
    pub const FULL: Self = Self {
        fuel_outputs: 8,
        ignition_outputs: 8,
    };

    pub fn new(fuel_outputs: u8, ignition_outputs: u8) -> Result<Self, ConfigError> {
        for count in [fuel_outputs, ignition_outputs] {
            if usize::from(count) > MAX_OUTPUTS {
                return Err(ConfigError::TooManyOutputs(count));
            }
        }
        Ok(Self {
            fuel_outputs,
            ignition_outputs,
        })
    }
}

impl Default for BoardCapabilities {
    fn default() -> Self {
        Self::FULL
    }
}

/// Everything the actuation core reads from the configuration store.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    pub cylinders: Cylinders,
    pub strokes: Strokes,
    pub engine_type: EngineType,
    pub spark_mode: SparkMode,
    pub injection_layout: InjectionLayout,
    pub injector_type: InjectorType,
    pub injector_pairing: InjectorPairing,
    pub injection_timing: InjectionTiming,
    /// Squirts per engine cycle requested for non-sequential layouts.
    pub squirts_per_cycle: u8,
    pub staging_enabled: bool,
    /// Base pulse width the correction pipeline scales from.
    pub req_fuel_us: u32,
    pub fuel_driver: DriverKind,
    pub ignition_driver: DriverKind,
    pub injector_polarity: Polarity,
    pub ignition_polarity: Polarity,
    pub tacho: TachoConfig,
    /// Longest coil charge tolerated before overdwell protection fires.
    pub dwell_limit_us: u32,
}

impl EngineConfig {
    pub const DEFAULT_REQ_FUEL_US: u32 = 8_000;
    pub const DEFAULT_DWELL_LIMIT_US: u32 = 10_000;

    #[must_use]
    pub const fn new(cylinders: Cylinders, strokes: Strokes) -> Self {
        Self {
            cylinders,
            strokes,
            engine_type: EngineType::EvenFire,
            spark_mode: SparkMode::Wasted,
            injection_layout: InjectionLayout::Paired,
            injector_type: InjectorType::Port,
            injector_pairing: InjectorPairing::Cyl13Cyl24,
            injection_timing: InjectionTiming::Alternating,
            squirts_per_cycle: 2,
            staging_enabled: false,
            req_fuel_us: Self::DEFAULT_REQ_FUEL_US,
            fuel_driver: DriverKind::Direct,
            ignition_driver: DriverKind::Direct,
            injector_polarity: Polarity::ActiveHigh,
            ignition_polarity: Polarity::ActiveHigh,
            tacho: TachoConfig::new(crate::tacho::TachoMode::PulsePin),
            dwell_limit_us: Self::DEFAULT_DWELL_LIMIT_US,
        }
    }

    #[must_use]
    pub const fn with_engine_type(mut self, engine_type: EngineType) -> Self {
        self.engine_type = engine_type;
        self
    }

    #[must_use]
    pub const fn with_spark_mode(mut self, spark_mode: SparkMode) -> Self {
        self.spark_mode = spark_mode;
        self
    }

    #[must_use]
    pub const fn with_injection_layout(mut self, layout: InjectionLayout) -> Self {
        self.injection_layout = layout;
        self
    }

    #[must_use]
    pub const fn with_injector_type(mut self, injector_type: InjectorType) -> Self {
        self.injector_type = injector_type;
        self
    }

    #[must_use]
    pub const fn with_injector_pairing(mut self, pairing: InjectorPairing) -> Self {
        self.injector_pairing = pairing;
        self
    }

    #[must_use]
    pub const fn with_injection_timing(mut self, timing: InjectionTiming) -> Self {
        self.injection_timing = timing;
        self
    }

    #[must_use]
    pub const fn with_squirts_per_cycle(mut self, squirts: u8) -> Self {
        self.squirts_per_cycle = squirts;
        self
    }

    #[must_use]
    pub const fn with_staging(mut self, enabled: bool) -> Self {
        self.staging_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_req_fuel_us(mut self, req_fuel_us: u32) -> Self {
        self.req_fuel_us = req_fuel_us;
        self
    }

    #[must_use]
    pub const fn with_drivers(mut self, fuel: DriverKind, ignition: DriverKind) -> Self {
        self.fuel_driver = fuel;
        self.ignition_driver = ignition;
        self
    }

    #[must_use]
    pub const fn with_polarities(mut self, injector: Polarity, ignition: Polarity) -> Self {
        self.injector_polarity = injector;
        self.ignition_polarity = ignition;
        self
    }

    #[must_use]
    pub const fn with_tacho(mut self, tacho: TachoConfig) -> Self {
        self.tacho = tacho;
        self
    }

    #[must_use]
    pub const fn with_dwell_limit_us(mut self, dwell_limit_us: u32) -> Self {
        self.dwell_limit_us = dwell_limit_us;
        self
    }

    /// Decodes the raw cylinder and stroke counts a configuration store keeps.
    pub fn from_raw(cylinders: u8, strokes: u8) -> Result<Self, ConfigError> {
        Ok(Self::new(
            Cylinders::try_from(cylinders)?,
            Strokes::try_from(strokes)?,
        ))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(Cylinders::Four, Strokes::Four)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_decode_or_error() {
        assert_eq!(Cylinders::try_from(6), Ok(Cylinders::Six));
        assert_eq!(
            Cylinders::try_from(7),
            Err(ConfigError::UnsupportedCylinders(7))
        );
        assert_eq!(Strokes::try_from(3), Err(ConfigError::UnsupportedStrokes(3)));
        assert!(EngineConfig::from_raw(8, 4).is_ok());
        assert_eq!(
            BoardCapabilities::new(9, 4),
            Err(ConfigError::TooManyOutputs(9))
        );
    }

    #[test]
    fn output_errors_convert() {
        let err: ConfigError = OutputError::OutOfRange(0).into();
        assert_eq!(err, ConfigError::OutputOutOfRange(0));
    }
}
