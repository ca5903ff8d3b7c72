//! Direct GPIO output backend.
//!
//! Each physical output owns a dedicated pin. Outputs start unconfigured and
//! every operation on an unconfigured slot is a no-op, which lets boards with
//! fewer drivers than logical channels leave the upper slots empty.

use embedded_hal::digital::OutputPin;

use super::{MAX_OUTPUTS, OutputBackend, OutputId, Polarity};

/// One GPIO-driven output with its polarity and last commanded state.
#[derive(Debug)]
pub struct DirectOutput<P> {
    pin: Option<P>,
    polarity: Polarity,
    energized: bool,
}

impl<P> DirectOutput<P> {
    /// Placeholder output with no pin resolved yet.
    pub const fn unconfigured() -> Self {
        Self {
            pin: None,
            polarity: Polarity::ActiveHigh,
            energized: false,
        }
    }

    /// Returns `true` once a pin has been bound.
    pub const fn is_configured(&self) -> bool {
        self.pin.is_some()
    }

    /// Last commanded energized state.
    pub const fn is_energized(&self) -> bool {
        self.energized
    }

    pub const fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Releases the bound pin, returning the slot to the unconfigured state.
    pub fn take_pin(&mut self) -> Option<P> {
        self.energized = false;
        self.pin.take()
    }
}

impl<P: OutputPin> DirectOutput<P> {
    /// Binds a pin and drives it to the de-energized level.
    pub fn configure(&mut self, pin: P, polarity: Polarity) {
        self.pin = Some(pin);
        self.polarity = polarity;
        self.drive(false);
    }

    /// Changes polarity and re-applies the current state at the new level.
    pub fn set_polarity(&mut self, polarity: Polarity) {
        self.polarity = polarity;
        let energized = self.energized;
        self.drive(energized);
    }

    pub fn on(&mut self) {
        self.drive(true);
    }

    pub fn off(&mut self) {
        self.drive(false);
    }

    pub fn toggle(&mut self) {
        let next = !self.energized;
        self.drive(next);
    }

    fn drive(&mut self, energized: bool) {
        let Some(pin) = self.pin.as_mut() else {
            return;
        };

        let result = if self.polarity.level_for(energized) {
            pin.set_high()
        } else {
            pin.set_low()
        };

        // A pin that refuses the write keeps its previous logical level.
        if result.is_ok() {
            self.energized = energized;
        }
    }
}

impl<P> Default for DirectOutput<P> {
    fn default() -> Self {
        Self::unconfigured()
    }
}

/// Fixed table of direct outputs indexed by [`OutputId`].
#[derive(Debug)]
pub struct DirectBackend<P> {
    outputs: [DirectOutput<P>; MAX_OUTPUTS],
    polarity: Polarity,
}

impl<P> DirectBackend<P> {
    /// Backend with every slot unconfigured.
    pub const fn new(polarity: Polarity) -> Self {
        Self {
            outputs: [
                DirectOutput::unconfigured(),
                DirectOutput::unconfigured(),
                DirectOutput::unconfigured(),
                DirectOutput::unconfigured(),
                DirectOutput::unconfigured(),
                DirectOutput::unconfigured(),
                DirectOutput::unconfigured(),
                DirectOutput::unconfigured(),
            ],
            polarity,
        }
    }

    pub fn output(&self, id: OutputId) -> &DirectOutput<P> {
        &self.outputs[id.index()]
    }

    pub const fn polarity(&self) -> Polarity {
        self.polarity
    }
}

impl<P: OutputPin> DirectBackend<P> {
    /// Resolves the pin for `id` using the backend polarity.
    pub fn configure(&mut self, id: OutputId, pin: P) {
        let polarity = self.polarity;
        self.outputs[id.index()].configure(pin, polarity);
    }

    /// Builder-style variant of [`DirectBackend::configure`].
    #[must_use]
    pub fn with_output(mut self, id: OutputId, pin: P) -> Self {
        self.configure(id, pin);
        self
    }
}

impl<P: OutputPin> OutputBackend for DirectBackend<P> {
    fn init(&mut self) {
        for output in &mut self.outputs {
            output.off();
        }
    }

    fn begin(&mut self, id: OutputId) {
        self.outputs[id.index()].on();
    }

    fn end(&mut self, id: OutputId) {
        self.outputs[id.index()].off();
    }

    fn toggle(&mut self, id: OutputId) {
        self.outputs[id.index()].toggle();
    }

    fn is_energized(&self, id: OutputId) -> bool {
        self.outputs[id.index()].is_energized()
    }

    fn is_configured(&self, id: OutputId) -> bool {
        self.outputs[id.index()].is_configured()
    }

    fn set_polarity(&mut self, polarity: Polarity) {
        self.polarity = polarity;
        for output in &mut self.outputs {
            output.set_polarity(polarity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    #[derive(Debug, Default)]
    struct LevelPin {
        high: bool,
        writes: u8,
    }

    impl ErrorType for LevelPin {
        type Error = Infallible;
    }

    impl OutputPin for LevelPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.high = false;
            self.writes += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.high = true;
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn unconfigured_outputs_ignore_commands() {
        let mut backend: DirectBackend<LevelPin> = DirectBackend::new(Polarity::ActiveHigh);
        backend.begin(OutputId::O5);
        backend.toggle(OutputId::O5);
        assert!(!backend.is_energized(OutputId::O5));
        assert!(!backend.is_configured(OutputId::O5));
    }

    #[test]
    fn active_low_outputs_energize_by_pulling_low() {
        let mut backend = DirectBackend::new(Polarity::ActiveLow)
            .with_output(OutputId::O1, LevelPin::default());
        assert!(backend.output(OutputId::O1).pin.as_ref().unwrap().high);

        backend.begin(OutputId::O1);
        assert!(backend.is_energized(OutputId::O1));
        assert!(!backend.output(OutputId::O1).pin.as_ref().unwrap().high);

        backend.toggle(OutputId::O1);
        assert!(!backend.is_energized(OutputId::O1));
        assert!(backend.output(OutputId::O1).pin.as_ref().unwrap().high);
    }

    #[test]
    fn polarity_change_preserves_logical_state() {
        let mut backend = DirectBackend::new(Polarity::ActiveHigh)
            .with_output(OutputId::O2, LevelPin::default());
        backend.begin(OutputId::O2);
        backend.set_polarity(Polarity::ActiveLow);
        assert!(backend.is_energized(OutputId::O2));
        assert!(!backend.output(OutputId::O2).pin.as_ref().unwrap().high);
    }
}
