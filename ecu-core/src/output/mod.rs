//! Physical outputs and the strategies that drive them.
//!
//! A logical channel never touches a pin directly. Channel assignment resolves
//! every channel edge into an [`OutputCall`], and the active
//! [`OutputBackend`] for the output class turns that call into GPIO or
//! smart-switch traffic. Everything here is `no_std` and allocation free so the
//! same types serve the firmware interrupt handlers and host tests.

use core::fmt;

pub mod backend;
pub mod bank;
pub mod direct;
pub mod serial_switch;

pub use backend::{Backend, BoundBackend, DriverKind, OutputBackend};
pub use bank::OutputBank;
pub use direct::{DirectBackend, DirectOutput};
pub use serial_switch::{
    SerialSwitchBackend, SwitchChain, SwitchDevice, SwitchError, SwitchLocation, SwitchMap,
};

/// Number of physical outputs per class and logical channels per class.
pub const MAX_OUTPUTS: usize = 8;

/// Errors raised while decoding raw output configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputError {
    /// Output numbers are 1-based and stop at [`MAX_OUTPUTS`].
    OutOfRange(u8),
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::OutOfRange(raw) => {
                write!(f, "output {raw} outside 1-{MAX_OUTPUTS}")
            }
        }
    }
}

/// Stable identifier of a physical output within its class (1..=8).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OutputId(u8);

impl OutputId {
    pub const O1: Self = Self(0);
    pub const O2: Self = Self(1);
    pub const O3: Self = Self(2);
    pub const O4: Self = Self(3);
    pub const O5: Self = Self(4);
    pub const O6: Self = Self(5);
    pub const O7: Self = Self(6);
    pub const O8: Self = Self(7);

    /// Every output in ascending order.
    pub const ALL: [Self; MAX_OUTPUTS] = [
        Self::O1,
        Self::O2,
        Self::O3,
        Self::O4,
        Self::O5,
        Self::O6,
        Self::O7,
        Self::O8,
    ];

    /// Builds an identifier from the 1-based number printed on the board.
    pub const fn new(number: u8) -> Result<Self, OutputError> {
        if number >= 1 && number as usize <= MAX_OUTPUTS {
            Ok(Self(number - 1))
        } else {
            Err(OutputError::OutOfRange(number))
        }
    }

    /// Builds an identifier from a zero-based table index.
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < MAX_OUTPUTS {
            #[allow(clippy::cast_possible_truncation)]
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// Zero-based index for table lookups.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// 1-based number as printed on the board.
    pub const fn number(self) -> u8 {
        self.0 + 1
    }

    const fn bit(self) -> u8 {
        1 << self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Output class; each class has its own backend and its own channel table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputClass {
    Fuel,
    Ignition,
}

impl OutputClass {
    pub const fn label(self) -> &'static str {
        match self {
            OutputClass::Fuel => "fuel",
            OutputClass::Ignition => "ignition",
        }
    }
}

impl fmt::Display for OutputClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Electrical level that energizes an output.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum Polarity {
    /// Driving the line high opens the injector / charges the coil.
    #[default]
    ActiveHigh,
    /// Driving the line low opens the injector / charges the coil.
    ActiveLow,
}

impl Polarity {
    /// Pin level (`true` == high) that produces the requested energized state.
    pub const fn level_for(self, energized: bool) -> bool {
        match self {
            Polarity::ActiveHigh => energized,
            Polarity::ActiveLow => !energized,
        }
    }
}

/// Which edge of a channel event is being executed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Edge {
    /// Injector open / coil charge start.
    Begin,
    /// Injector close / coil discharge (spark).
    End,
}

/// Coil driven by the rotary trailing composite operations.
pub const TRAILING_COIL: OutputId = OutputId::O2;
/// Output that selects the trailing plug on rotary FC ignition.
pub const TRAILING_SELECT: OutputId = OutputId::O3;

/// Resolved action for one edge of one logical channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum OutputCall {
    /// Channel is not wired to anything.
    #[default]
    Inhibit,
    /// Drive a single output.
    Single(OutputId),
    /// Drive two outputs, first then second.
    Pair(OutputId, OutputId),
    /// Rotary trailing charge start (coil 2).
    TrailingBegin,
    /// Rotary trailing spark, raising trailing select afterwards.
    TrailingEnd1,
    /// Rotary trailing spark, dropping trailing select afterwards.
    TrailingEnd2,
}

impl OutputCall {
    const TAG_INHIBIT: u16 = 0;
    const TAG_SINGLE: u16 = 1;
    const TAG_PAIR: u16 = 2;
    const TAG_TRAILING_BEGIN: u16 = 3;
    const TAG_TRAILING_END1: u16 = 4;
    const TAG_TRAILING_END2: u16 = 5;

    /// Packs the call into a single word so it can live in an atomic slot.
    pub const fn to_raw(self) -> u16 {
        match self {
            OutputCall::Inhibit => Self::TAG_INHIBIT << 8,
            OutputCall::Single(a) => (Self::TAG_SINGLE << 8) | ((a.0 as u16) << 4),
            OutputCall::Pair(a, b) => {
                (Self::TAG_PAIR << 8) | ((a.0 as u16) << 4) | (b.0 as u16)
            }
            OutputCall::TrailingBegin => Self::TAG_TRAILING_BEGIN << 8,
            OutputCall::TrailingEnd1 => Self::TAG_TRAILING_END1 << 8,
            OutputCall::TrailingEnd2 => Self::TAG_TRAILING_END2 << 8,
        }
    }

    /// Unpacks a word written by [`OutputCall::to_raw`]; unknown words inhibit.
    pub const fn from_raw(raw: u16) -> Self {
        let first = OutputId(((raw >> 4) & 0x7) as u8);
        let second = OutputId((raw & 0x7) as u8);
        match raw >> 8 {
            Self::TAG_SINGLE => OutputCall::Single(first),
            Self::TAG_PAIR => OutputCall::Pair(first, second),
            Self::TAG_TRAILING_BEGIN => OutputCall::TrailingBegin,
            Self::TAG_TRAILING_END1 => OutputCall::TrailingEnd1,
            Self::TAG_TRAILING_END2 => OutputCall::TrailingEnd2,
            _ => OutputCall::Inhibit,
        }
    }

    /// Returns `true` when executing the call has no effect.
    pub const fn is_inhibited(self) -> bool {
        matches!(self, OutputCall::Inhibit)
    }

    /// Bitmask of the outputs this call touches.
    pub const fn output_mask(self) -> u8 {
        match self {
            OutputCall::Inhibit => 0,
            OutputCall::Single(a) => a.bit(),
            OutputCall::Pair(a, b) => a.bit() | b.bit(),
            OutputCall::TrailingBegin => TRAILING_COIL.bit(),
            OutputCall::TrailingEnd1 | OutputCall::TrailingEnd2 => {
                TRAILING_COIL.bit() | TRAILING_SELECT.bit()
            }
        }
    }
}

/// Begin/end pair bound to one logical channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct ChannelCallbacks {
    pub begin: OutputCall,
    pub end: OutputCall,
}

impl ChannelCallbacks {
    /// Callbacks that never touch hardware.
    pub const INHIBITED: Self = Self {
        begin: OutputCall::Inhibit,
        end: OutputCall::Inhibit,
    };

    /// Begin and end drive the same single output.
    pub const fn single(id: OutputId) -> Self {
        Self {
            begin: OutputCall::Single(id),
            end: OutputCall::Single(id),
        }
    }

    /// Begin and end drive the same two outputs.
    pub const fn pair(first: OutputId, second: OutputId) -> Self {
        Self {
            begin: OutputCall::Pair(first, second),
            end: OutputCall::Pair(first, second),
        }
    }

    pub const fn new(begin: OutputCall, end: OutputCall) -> Self {
        Self { begin, end }
    }

    /// Returns the call for the requested edge.
    pub const fn for_edge(&self, edge: Edge) -> OutputCall {
        match edge {
            Edge::Begin => self.begin,
            Edge::End => self.end,
        }
    }

    pub const fn is_inhibited(&self) -> bool {
        self.begin.is_inhibited() && self.end.is_inhibited()
    }
}
