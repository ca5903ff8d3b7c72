//! The actuator: every output backend plus the tacho behind one lock.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;

use super::{
    Backend, BoundBackend, DriverKind, Edge, OutputBackend, OutputCall, OutputClass, OutputId,
    Polarity, SwitchChain, TRAILING_COIL, TRAILING_SELECT,
};
use crate::tacho::{Tacho, TachoConfig};

/// Diagnostic view of one serial switch device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchDiagnostics {
    pub requested: u8,
    pub last_status: Option<u16>,
    pub transfer_failures: u16,
}

#[derive(Debug)]
struct Drivers<P, D> {
    fuel: Backend<P>,
    ignition: Backend<P>,
    switches: SwitchChain<D>,
    tacho: Tacho<P>,
}

impl<P, D> Drivers<P, D> {
    fn backend(&mut self, class: OutputClass) -> (&mut Backend<P>, &mut SwitchChain<D>) {
        match class {
            OutputClass::Fuel => (&mut self.fuel, &mut self.switches),
            OutputClass::Ignition => (&mut self.ignition, &mut self.switches),
        }
    }
}

/// Owns the fuel and ignition backends, the shared switch chain and the tacho.
///
/// Every mutation runs inside one critical section, so a serial-switch
/// request byte update and its bus transfer can never interleave with
/// another context touching the same device.
pub struct OutputBank<P, D> {
    drivers: Mutex<RefCell<Drivers<P, D>>>,
}

impl<P: OutputPin, D: SpiDevice> OutputBank<P, D> {
    pub const fn new(
        fuel: Backend<P>,
        ignition: Backend<P>,
        switches: SwitchChain<D>,
        tacho: Tacho<P>,
    ) -> Self {
        Self {
            drivers: Mutex::new(RefCell::new(Drivers {
                fuel,
                ignition,
                switches,
                tacho,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Drivers<P, D>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.drivers.borrow_ref_mut(cs)))
    }

    fn with_backend<R>(
        &self,
        class: OutputClass,
        f: impl FnOnce(&mut BoundBackend<'_, P, D>, &mut Tacho<P>) -> R,
    ) -> R {
        self.with(|drivers| {
            let Drivers {
                fuel,
                ignition,
                switches,
                tacho,
            } = drivers;
            let backend = match class {
                OutputClass::Fuel => fuel,
                OutputClass::Ignition => ignition,
            };
            f(&mut backend.bind(switches), tacho)
        })
    }

    /// Initialises the switch chain and drives every output off.
    pub fn init(&self) {
        self.with(|drivers| {
            drivers.switches.init();
            for class in [OutputClass::Fuel, OutputClass::Ignition] {
                let (backend, switches) = drivers.backend(class);
                backend.bind(switches).init();
            }
            drivers.tacho.pulse_off();
        });
    }

    /// Executes one edge of a channel's resolved call.
    ///
    /// Ignition edges also drive the tacho exactly once per call.
    pub fn execute(&self, class: OutputClass, edge: Edge, call: OutputCall) {
        if call.is_inhibited() {
            return;
        }

        self.with_backend(class, |backend, tacho| {
            match (edge, call) {
                (_, OutputCall::Inhibit) => {}
                (Edge::Begin, OutputCall::Single(id)) => backend.begin(id),
                (Edge::End, OutputCall::Single(id)) => backend.end(id),
                (Edge::Begin, OutputCall::Pair(a, b)) => backend.begin_pair(a, b),
                (Edge::End, OutputCall::Pair(a, b)) => backend.end_pair(a, b),
                (_, OutputCall::TrailingBegin) => backend.begin(TRAILING_COIL),
                (_, OutputCall::TrailingEnd1) => {
                    backend.end(TRAILING_COIL);
                    backend.begin(TRAILING_SELECT);
                }
                (_, OutputCall::TrailingEnd2) => {
                    backend.end(TRAILING_COIL);
                    backend.end(TRAILING_SELECT);
                }
            }

            if class == OutputClass::Ignition {
                match edge {
                    Edge::Begin => tacho.pulse_on(),
                    Edge::End => tacho.pulse_off(),
                }
            }
        });
    }

    pub fn open_injector(&self, id: OutputId) {
        self.with_backend(OutputClass::Fuel, |backend, _| backend.begin(id));
    }

    pub fn close_injector(&self, id: OutputId) {
        self.with_backend(OutputClass::Fuel, |backend, _| backend.end(id));
    }

    pub fn toggle_injector(&self, id: OutputId) {
        self.with_backend(OutputClass::Fuel, |backend, _| backend.toggle(id));
    }

    pub fn begin_coil_charge(&self, id: OutputId) {
        self.with_backend(OutputClass::Ignition, |backend, tacho| {
            backend.begin(id);
            tacho.pulse_on();
        });
    }

    pub fn end_coil_charge(&self, id: OutputId) {
        self.with_backend(OutputClass::Ignition, |backend, tacho| {
            backend.end(id);
            tacho.pulse_off();
        });
    }

    pub fn toggle_coil(&self, id: OutputId) {
        self.with_backend(OutputClass::Ignition, |backend, _| backend.toggle(id));
    }

    /// Closes every injector and ends every coil charge.
    pub fn all_off(&self) {
        self.with(|drivers| {
            for class in [OutputClass::Fuel, OutputClass::Ignition] {
                let (backend, switches) = drivers.backend(class);
                let mut bound = backend.bind(switches);
                for id in OutputId::ALL {
                    bound.end(id);
                }
            }
            drivers.tacho.pulse_off();
        });
    }

    pub fn is_energized(&self, class: OutputClass, id: OutputId) -> bool {
        self.with_backend(class, |backend, _| backend.is_energized(id))
    }

    pub fn is_configured(&self, class: OutputClass, id: OutputId) -> bool {
        self.with_backend(class, |backend, _| backend.is_configured(id))
    }

    /// Bitmask (bit 0 = output 1) of energized outputs in `class`.
    pub fn energized_mask(&self, class: OutputClass) -> u8 {
        self.with_backend(class, |backend, _| backend.energized_mask())
    }

    pub fn driver_kind(&self, class: OutputClass) -> DriverKind {
        self.with(|drivers| drivers.backend(class).0.kind())
    }

    pub fn set_polarity(&self, class: OutputClass, polarity: Polarity) {
        self.with_backend(class, |backend, _| backend.set_polarity(polarity));
    }

    /// Swaps the backend for `class`, ending every output of the old one first.
    pub fn replace_backend(&self, class: OutputClass, backend: Backend<P>) -> Backend<P> {
        self.with(|drivers| {
            let (current, switches) = drivers.backend(class);
            current.bind(switches).init();
            let previous = core::mem::replace(current, backend);
            current.bind(switches).init();
            previous
        })
    }

    pub fn set_tacho_config(&self, config: TachoConfig) {
        self.with(|drivers| drivers.tacho.set_config(config));
    }

    /// Sweep timer entry point.
    pub fn service_tacho(&self, now_ms: u32) {
        self.with(|drivers| drivers.tacho.service_sweep(now_ms));
    }

    pub fn tacho_pulses(&self) -> u32 {
        self.with(|drivers| drivers.tacho.pulses())
    }

    pub fn switch_diagnostics(&self, device: usize) -> Option<SwitchDiagnostics> {
        self.with(|drivers| {
            drivers
                .switches
                .device(device)
                .map(|device| SwitchDiagnostics {
                    requested: device.requested(),
                    last_status: device.last_status(),
                    transfer_failures: device.transfer_failures(),
                })
        })
    }
}
