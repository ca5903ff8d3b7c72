#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use ecu_core::config::{BoardCapabilities, EngineConfig};
use ecu_core::engine::Engine;
use ecu_core::output::{
    Backend, DirectBackend, MAX_OUTPUTS, OutputBank, OutputClass, OutputId, Polarity,
    SwitchChain, SwitchMap,
};
use ecu_core::schedule::{CompareTimer, MatchOutcome};
use ecu_core::tacho::{Tacho, TachoConfig};
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, Operation, SpiDevice};

/// Compare unit on a free-running counter shared by every channel.
pub struct MockTimer<'c> {
    clock: &'c Cell<u32>,
    compare: Cell<u32>,
    enabled: Cell<bool>,
}

impl<'c> MockTimer<'c> {
    pub fn new(clock: &'c Cell<u32>) -> Self {
        Self {
            clock,
            compare: Cell::new(0),
            enabled: Cell::new(false),
        }
    }

    pub fn compare(&self) -> u32 {
        self.compare.get()
    }
}

impl CompareTimer for MockTimer<'_> {
    fn counter(&self) -> u32 {
        self.clock.get()
    }

    fn set_compare(&self, ticks: u32) {
        self.compare.set(ticks);
    }

    fn enable(&self) {
        self.enabled.set(true);
    }

    fn disable(&self) {
        self.enabled.set(false);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }
}

/// Output pin whose level stays observable after the bank takes ownership.
#[derive(Clone, Default)]
pub struct SharedPin {
    high: Rc<Cell<bool>>,
    writes: Rc<Cell<u32>>,
}

impl SharedPin {
    pub fn is_high(&self) -> bool {
        self.high.get()
    }

    pub fn writes(&self) -> u32 {
        self.writes.get()
    }
}

impl digital::ErrorType for SharedPin {
    type Error = Infallible;
}

impl OutputPin for SharedPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high.set(false);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high.set(true);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

/// Records every 16-bit word clocked out to a switch IC.
#[derive(Clone, Default)]
pub struct SharedSpi {
    words: Rc<RefCell<Vec<u16>>>,
}

impl SharedSpi {
    pub fn words(&self) -> Vec<u16> {
        self.words.borrow().clone()
    }
}

impl spi::ErrorType for SharedSpi {
    type Error = Infallible;
}

impl SpiDevice for SharedSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        for operation in operations {
            if let Operation::TransferInPlace(buffer) = operation {
                self.words
                    .borrow_mut()
                    .push(u16::from_be_bytes([buffer[0], buffer[1]]));
                buffer.fill(0);
            }
        }
        Ok(())
    }
}

pub type TestEngine<'c> = Engine<MockTimer<'c>, SharedPin, SharedSpi>;

/// Pins and the shared counter behind a test engine.
pub struct Rig {
    pub clock: Cell<u32>,
    pub injectors: [SharedPin; MAX_OUTPUTS],
    pub coils: [SharedPin; MAX_OUTPUTS],
    pub tacho: SharedPin,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            clock: Cell::new(0),
            injectors: Default::default(),
            coils: Default::default(),
            tacho: SharedPin::default(),
        }
    }

    fn direct(pins: &[SharedPin; MAX_OUTPUTS]) -> Backend<SharedPin> {
        let backend = OutputId::ALL
            .iter()
            .zip(pins)
            .fold(DirectBackend::new(Polarity::ActiveHigh), |backend, (id, pin)| {
                backend.with_output(*id, pin.clone())
            });
        Backend::Direct(backend)
    }

    /// Bank with every injector and coil on its own GPIO.
    pub fn direct_bank(&self) -> OutputBank<SharedPin, SharedSpi> {
        OutputBank::new(
            Self::direct(&self.injectors),
            Self::direct(&self.coils),
            SwitchChain::empty(),
            Tacho::new(self.tacho.clone(), TachoConfig::default()),
        )
    }

    /// Bank with both classes routed through one switch IC per four outputs.
    pub fn switch_bank(&self, spi: &SharedSpi) -> OutputBank<SharedPin, SharedSpi> {
        OutputBank::new(
            Backend::SerialSwitch(SwitchMap::standard(OutputClass::Fuel)),
            Backend::SerialSwitch(SwitchMap::standard(OutputClass::Ignition)),
            SwitchChain::empty().with_device(0, spi.clone()),
            Tacho::new(self.tacho.clone(), TachoConfig::default()),
        )
    }

    pub fn engine(&self) -> TestEngine<'_> {
        Engine::new(
            self.direct_bank(),
            core::array::from_fn(|_| MockTimer::new(&self.clock)),
            core::array::from_fn(|_| MockTimer::new(&self.clock)),
        )
    }

    pub fn configured(&self, config: &EngineConfig) -> TestEngine<'_> {
        let engine = self.engine();
        engine.configure_channels(config, BoardCapabilities::FULL);
        engine
    }

    pub fn set_clock(&self, ticks: u32) {
        self.clock.set(ticks);
    }
}

/// Moves the counter to the channel's compare value and runs its handler.
pub fn fire(rig: &Rig, engine: &TestEngine<'_>, class: OutputClass, channel: usize) -> MatchOutcome {
    let schedule = engine
        .schedule(class, channel)
        .expect("channel index in range");
    rig.set_clock(schedule.timer().compare());
    engine
        .on_compare_match(class, channel)
        .expect("channel index in range")
}
