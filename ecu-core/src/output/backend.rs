//! Driver backend contract and the tagged backend selected per output class.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;

use super::serial_switch::{SwitchChain, SwitchMap};
use super::{DirectBackend, OutputId, Polarity, SerialSwitchBackend};

/// Begin/end/toggle contract shared by every way of wiring an output.
///
/// Implementations must treat unconfigured outputs as no-ops.
pub trait OutputBackend {
    /// Drives every configured output to its de-energized state.
    fn init(&mut self);

    /// Opens the injector / starts charging the coil.
    fn begin(&mut self, id: OutputId);

    /// Closes the injector / fires the coil.
    fn end(&mut self, id: OutputId);

    fn toggle(&mut self, id: OutputId);

    /// Last commanded energized state of the output.
    fn is_energized(&self, id: OutputId) -> bool;

    /// Returns `true` when the output address has been resolved.
    fn is_configured(&self, id: OutputId) -> bool;

    /// Applies a new energize polarity to every output.
    fn set_polarity(&mut self, polarity: Polarity);

    /// Begins two outputs, `first` then `second`.
    fn begin_pair(&mut self, first: OutputId, second: OutputId) {
        self.begin(first);
        self.begin(second);
    }

    /// Ends two outputs, `first` then `second`.
    fn end_pair(&mut self, first: OutputId, second: OutputId) {
        self.end(first);
        self.end(second);
    }

    /// Bitmask of outputs currently energized.
    fn energized_mask(&self) -> u8 {
        OutputId::ALL
            .iter()
            .filter(|id| self.is_energized(**id))
            .fold(0, |mask, id| mask | (1 << id.index()))
    }
}

/// Backend chosen once per output class at (re)configuration time.
///
/// Serial-switch outputs only carry their routing here; the request bytes
/// belong to the [`SwitchChain`] shared by both classes, so the backend is
/// [`bound`](Backend::bind) to that chain for each operation.
#[derive(Debug)]
pub enum Backend<P> {
    Direct(DirectBackend<P>),
    SerialSwitch(SwitchMap),
}

impl<P> Backend<P> {
    pub const fn kind(&self) -> DriverKind {
        match self {
            Backend::Direct(_) => DriverKind::Direct,
            Backend::SerialSwitch(_) => DriverKind::SerialSwitch,
        }
    }

    /// Pairs the backend with the switch chain for one operation.
    pub fn bind<'a, D>(&'a mut self, chain: &'a mut SwitchChain<D>) -> BoundBackend<'a, P, D> {
        match self {
            Backend::Direct(inner) => BoundBackend::Direct(inner),
            Backend::SerialSwitch(map) => {
                BoundBackend::SerialSwitch(SerialSwitchBackend::new(map, chain))
            }
        }
    }
}

/// How the outputs of one class are wired.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum DriverKind {
    #[default]
    Direct,
    SerialSwitch,
}

/// A [`Backend`] bound to the switch chain; valid for one locked operation.
pub enum BoundBackend<'a, P, D> {
    Direct(&'a mut DirectBackend<P>),
    SerialSwitch(SerialSwitchBackend<'a, D>),
}

impl<P: OutputPin, D: SpiDevice> OutputBackend for BoundBackend<'_, P, D> {
    fn init(&mut self) {
        match self {
            BoundBackend::Direct(inner) => inner.init(),
            BoundBackend::SerialSwitch(inner) => inner.init(),
        }
    }

    fn begin(&mut self, id: OutputId) {
        match self {
            BoundBackend::Direct(inner) => inner.begin(id),
            BoundBackend::SerialSwitch(inner) => inner.begin(id),
        }
    }

    fn end(&mut self, id: OutputId) {
        match self {
            BoundBackend::Direct(inner) => inner.end(id),
            BoundBackend::SerialSwitch(inner) => inner.end(id),
        }
    }

    fn toggle(&mut self, id: OutputId) {
        match self {
            BoundBackend::Direct(inner) => inner.toggle(id),
            BoundBackend::SerialSwitch(inner) => inner.toggle(id),
        }
    }

    fn is_energized(&self, id: OutputId) -> bool {
        match self {
            BoundBackend::Direct(inner) => inner.is_energized(id),
            BoundBackend::SerialSwitch(inner) => inner.is_energized(id),
        }
    }

    fn is_configured(&self, id: OutputId) -> bool {
        match self {
            BoundBackend::Direct(inner) => inner.is_configured(id),
            BoundBackend::SerialSwitch(inner) => inner.is_configured(id),
        }
    }

    fn set_polarity(&mut self, polarity: Polarity) {
        match self {
            BoundBackend::Direct(inner) => inner.set_polarity(polarity),
            BoundBackend::SerialSwitch(inner) => inner.set_polarity(polarity),
        }
    }
}
