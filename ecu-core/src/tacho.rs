//! Tachometer pulse side effect of ignition events.
//!
//! Every coil begin turns the pulse on and every coil end turns it off,
//! once per event no matter how many coils a composite call touches. The
//! pulse line is active low.

use embedded_hal::digital::OutputPin;

/// How the pulse width is produced.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum TachoMode {
    /// Pin follows the dwell: low at coil begin, high at coil end.
    #[default]
    PulsePin,
    /// Coil begin only flags the pulse as ready; a sweep timer emits a
    /// fixed-width pulse through [`Tacho::service_sweep`].
    Sweep,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TachoConfig {
    pub mode: TachoMode,
    /// Emit a pulse on every other ignition event.
    pub divide_by_two: bool,
    /// Pulse width used in [`TachoMode::Sweep`].
    pub pulse_ms: u8,
}

impl TachoConfig {
    pub const DEFAULT_PULSE_MS: u8 = 3;

    pub const fn new(mode: TachoMode) -> Self {
        Self {
            mode,
            divide_by_two: false,
            pulse_ms: Self::DEFAULT_PULSE_MS,
        }
    }

    #[must_use]
    pub const fn with_divide_by_two(mut self, divide: bool) -> Self {
        self.divide_by_two = divide;
        self
    }

    #[must_use]
    pub const fn with_pulse_ms(mut self, pulse_ms: u8) -> Self {
        self.pulse_ms = pulse_ms;
        self
    }
}

impl Default for TachoConfig {
    fn default() -> Self {
        Self::new(TachoMode::PulsePin)
    }
}

#[derive(Debug)]
pub struct Tacho<P> {
    pin: Option<P>,
    config: TachoConfig,
    ready: bool,
    alternate: bool,
    low: bool,
    sweep_release_ms: Option<u32>,
    pulses: u32,
}

impl<P> Tacho<P> {
    /// Tacho with no output pin; events are still counted.
    pub const fn disabled() -> Self {
        Self {
            pin: None,
            config: TachoConfig::new(TachoMode::PulsePin),
            ready: false,
            alternate: false,
            low: false,
            sweep_release_ms: None,
            pulses: 0,
        }
    }

    pub const fn config(&self) -> TachoConfig {
        self.config
    }

    /// Number of pulses emitted (after division).
    pub const fn pulses(&self) -> u32 {
        self.pulses
    }

    /// Returns `true` while the pulse line is held low.
    pub const fn is_low(&self) -> bool {
        self.low
    }

    /// Consumes the sweep ready flag.
    pub fn take_ready(&mut self) -> bool {
        core::mem::take(&mut self.ready)
    }
}

impl<P: OutputPin> Tacho<P> {
    pub fn new(pin: P, config: TachoConfig) -> Self {
        let mut tacho = Self {
            pin: Some(pin),
            config,
            ..Self::disabled()
        };
        tacho.drive(false);
        tacho
    }

    pub fn set_config(&mut self, config: TachoConfig) {
        self.config = config;
        self.ready = false;
        self.alternate = false;
        self.sweep_release_ms = None;
        self.drive(false);
    }

    /// Coil begin side effect.
    pub fn pulse_on(&mut self) {
        if self.config.divide_by_two {
            self.alternate = !self.alternate;
            if !self.alternate {
                return;
            }
        }

        self.pulses = self.pulses.wrapping_add(1);
        match self.config.mode {
            TachoMode::PulsePin => self.drive(true),
            TachoMode::Sweep => self.ready = true,
        }
    }

    /// Coil end side effect.
    pub fn pulse_off(&mut self) {
        if self.config.mode == TachoMode::PulsePin {
            self.drive(false);
        }
    }

    /// Sweep timer tick: starts a pending pulse or releases an expired one.
    pub fn service_sweep(&mut self, now_ms: u32) {
        if self.config.mode != TachoMode::Sweep {
            return;
        }

        if let Some(release) = self.sweep_release_ms {
            #[allow(clippy::cast_possible_wrap)]
            let elapsed = now_ms.wrapping_sub(release) as i32;
            if elapsed >= 0 {
                self.drive(false);
                self.sweep_release_ms = None;
            }
        } else if self.take_ready() {
            self.drive(true);
            self.sweep_release_ms = Some(now_ms.wrapping_add(u32::from(self.config.pulse_ms)));
        }
    }

    fn drive(&mut self, low: bool) {
        let Some(pin) = self.pin.as_mut() else {
            return;
        };
        let result = if low { pin.set_low() } else { pin.set_high() };
        if result.is_ok() {
            self.low = low;
        }
    }
}

impl<P> Default for Tacho<P> {
    fn default() -> Self {
        Self::disabled()
    }
}
