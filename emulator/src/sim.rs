//! Host stand-ins for the board: a shared 1 MHz counter, one compare unit
//! per channel, GPIO lines and the switch IC's SPI device.

use std::cell::Cell;
use std::convert::Infallible;
use std::rc::Rc;

use ecu_core::output::{
    Backend, DirectBackend, DriverKind, MAX_OUTPUTS, OutputClass, OutputId, Polarity, SwitchMap,
};
use ecu_core::schedule::CompareTimer;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::spi::{self, Operation, SpiDevice};

/// Free-running counter every simulated compare unit reads.
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    ticks: Rc<Cell<u32>>,
}

impl SimClock {
    pub fn ticks(&self) -> u32 {
        self.ticks.get()
    }

    pub fn advance(&self, ticks: u32) {
        self.ticks.set(self.ticks.get().wrapping_add(ticks));
    }
}

#[derive(Debug)]
pub struct SimTimer {
    clock: SimClock,
    compare: Cell<u32>,
    enabled: Cell<bool>,
}

impl SimTimer {
    pub fn new(clock: &SimClock) -> Self {
        Self {
            clock: clock.clone(),
            compare: Cell::new(0),
            enabled: Cell::new(false),
        }
    }

    /// One timer per channel, all on `clock`.
    pub fn bank(clock: &SimClock) -> [Self; MAX_OUTPUTS] {
        core::array::from_fn(|_| Self::new(clock))
    }

    pub fn compare(&self) -> u32 {
        self.compare.get()
    }

    /// Ticks until the compare fires, or `None` while masked.
    ///
    /// A compare at or behind the counter reports zero.
    pub fn due_in(&self) -> Option<u32> {
        if !self.enabled.get() {
            return None;
        }
        let delta = self.compare.get().wrapping_sub(self.clock.ticks());
        Some(u32::try_from(delta.cast_signed()).unwrap_or(0))
    }
}

impl CompareTimer for SimTimer {
    fn counter(&self) -> u32 {
        self.clock.ticks()
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

/// GPIO line whose level stays visible after the bank owns a clone.
#[derive(Clone, Debug, Default)]
pub struct SimPin {
    high: Rc<Cell<bool>>,
}

impl SimPin {
    pub fn is_high(&self) -> bool {
        self.high.get()
    }
}

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high.set(true);
        Ok(())
    }
}

/// Switch IC that answers every frame with an all-clear status word.
#[derive(Clone, Debug, Default)]
pub struct SimSpi {
    transfers: Rc<Cell<u32>>,
    last_word: Rc<Cell<Option<u16>>>,
}

impl SimSpi {
    pub fn transfers(&self) -> u32 {
        self.transfers.get()
    }

    /// Last 16-bit frame clocked out, command byte first.
    pub fn last_word(&self) -> Option<u16> {
        self.last_word.get()
    }
}

impl spi::ErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiDevice for SimSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
        for operation in operations {
            if let Operation::TransferInPlace(frame) = operation {
                if let Some(&[high, low]) = frame.first_chunk::<2>() {
                    self.last_word.set(Some(u16::from_be_bytes([high, low])));
                }
                self.transfers.set(self.transfers.get() + 1);
                frame.fill(0);
            }
        }
        Ok(())
    }
}

/// Every line the emulated board exposes.
#[derive(Clone, Debug, Default)]
pub struct Harness {
    pub injectors: [SimPin; MAX_OUTPUTS],
    pub coils: [SimPin; MAX_OUTPUTS],
    pub tacho: SimPin,
    pub switch: SimSpi,
}

impl Harness {
    pub fn pins(&self, class: OutputClass) -> &[SimPin; MAX_OUTPUTS] {
        match class {
            OutputClass::Fuel => &self.injectors,
            OutputClass::Ignition => &self.coils,
        }
    }

    /// Backend for `class`, wired straight to GPIO or through the switch IC.
    pub fn backend(&self, kind: DriverKind, class: OutputClass) -> Backend<SimPin> {
        match kind {
            DriverKind::Direct => Backend::Direct(
                OutputId::ALL
                    .into_iter()
                    .zip(self.pins(class))
                    .fold(DirectBackend::new(Polarity::ActiveHigh), |backend, (id, pin)| {
                        backend.with_output(id, pin.clone())
                    }),
            ),
            DriverKind::SerialSwitch => Backend::SerialSwitch(SwitchMap::standard(class)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_in_saturates_behind_the_counter() {
        let clock = SimClock::default();
        let timer = SimTimer::new(&clock);
        assert_eq!(timer.due_in(), None);

        timer.set_compare(100);
        timer.enable();
        assert_eq!(timer.due_in(), Some(100));

        clock.advance(150);
        assert_eq!(timer.due_in(), Some(0));

        timer.disable();
        assert_eq!(timer.due_in(), None);
    }

    #[test]
    fn due_in_follows_the_counter_across_wrap() {
        let clock = SimClock::default();
        clock.advance(u32::MAX - 9);
        let timer = SimTimer::new(&clock);
        timer.set_compare(20);
        timer.enable();
        assert_eq!(timer.due_in(), Some(30));
    }
}
