//! Smart power switch backend over a synchronous serial bus.
//!
//! Each switch IC exposes eight low-side drivers controlled by one request
//! byte. Turning a driver on or off rewrites the whole byte and shifts it out
//! as a 16-bit on/off command under the device's chip select; the IC answers
//! with a 16-bit status word. Fuel and ignition drivers share the same ICs, so
//! the request bytes live in one [`SwitchChain`] and every class reaches them
//! through a [`SwitchMap`] resolved at configuration time.

use core::fmt;

use embedded_hal::spi::SpiDevice;

use super::{MAX_OUTPUTS, OutputBackend, OutputClass, OutputId, Polarity};

/// Number of switch ICs on the bus.
pub const MAX_SWITCH_DEVICES: usize = 2;

/// Command nibble pair selecting the on/off register.
pub const ONOFF_CMD: u8 = 0x30;

/// Mode-select word sent once at init: all gate drivers to GPGD mode.
pub const MODE_SELECT_CMD: u16 = 0x1F00;

/// Failure reported by a switch transfer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwitchError<E> {
    /// No device has been attached at the requested position.
    NotAttached,
    /// Underlying SPI device reported an error.
    Bus(E),
}

impl<E: fmt::Debug> fmt::Display for SwitchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchError::NotAttached => f.write_str("switch device not attached"),
            SwitchError::Bus(err) => write!(f, "switch bus error: {err:?}"),
        }
    }
}

/// Position of one driver inside the switch chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchLocation {
    pub device: u8,
    pub bit: u8,
}

impl SwitchLocation {
    pub const fn new(device: u8, bit: u8) -> Self {
        Self { device, bit }
    }

    const fn mask(self) -> u8 {
        1 << (self.bit & 0x7)
    }
}

/// One switch IC and the request byte mirrored on it.
#[derive(Debug)]
pub struct SwitchDevice<D> {
    spi: D,
    requested: u8,
    last_status: Option<u16>,
    transfer_failures: u16,
}

impl<D: SpiDevice> SwitchDevice<D> {
    pub const fn new(spi: D) -> Self {
        Self {
            spi,
            requested: 0,
            last_status: None,
            transfer_failures: 0,
        }
    }

    /// Sends the mode-select word and clears every driver.
    pub fn init(&mut self) -> Result<u16, SwitchError<D::Error>> {
        self.transfer(MODE_SELECT_CMD)?;
        self.requested = 0;
        self.push_request()
    }

    /// Sets or clears one bit and transfers the full request byte.
    pub fn write_bit(&mut self, mask: u8, on: bool) -> Result<u16, SwitchError<D::Error>> {
        if on {
            self.requested |= mask;
        } else {
            self.requested &= !mask;
        }
        self.push_request()
    }

    pub const fn requested(&self) -> u8 {
        self.requested
    }

    /// Status word returned by the last successful transfer.
    pub const fn last_status(&self) -> Option<u16> {
        self.last_status
    }

    pub const fn transfer_failures(&self) -> u16 {
        self.transfer_failures
    }

    fn push_request(&mut self) -> Result<u16, SwitchError<D::Error>> {
        let word = (u16::from(ONOFF_CMD) << 8) | u16::from(self.requested);
        self.transfer(word)
    }

    fn transfer(&mut self, word: u16) -> Result<u16, SwitchError<D::Error>> {
        let mut frame = word.to_be_bytes();
        match self.spi.transfer_in_place(&mut frame) {
            Ok(()) => {
                let status = u16::from_be_bytes(frame);
                self.last_status = Some(status);
                Ok(status)
            }
            Err(err) => {
                self.transfer_failures = self.transfer_failures.saturating_add(1);
                Err(SwitchError::Bus(err))
            }
        }
    }
}

/// Every switch IC on the bus, shared by the fuel and ignition classes.
#[derive(Debug)]
pub struct SwitchChain<D> {
    devices: [Option<SwitchDevice<D>>; MAX_SWITCH_DEVICES],
}

impl<D> SwitchChain<D> {
    /// Chain with no devices attached; every access is a no-op.
    pub const fn empty() -> Self {
        Self {
            devices: [None, None],
        }
    }

    pub fn device(&self, index: usize) -> Option<&SwitchDevice<D>> {
        self.devices.get(index).and_then(Option::as_ref)
    }

    fn request_bit(&self, location: SwitchLocation) -> bool {
        self.device(usize::from(location.device))
            .is_some_and(|device| device.requested & location.mask() != 0)
    }
}

impl<D: SpiDevice> SwitchChain<D> {
    /// Attaches a device at `index` (0 or 1); out-of-range indices are ignored.
    pub fn attach(&mut self, index: usize, spi: D) {
        if let Some(slot) = self.devices.get_mut(index) {
            *slot = Some(SwitchDevice::new(spi));
        }
    }

    #[must_use]
    pub fn with_device(mut self, index: usize, spi: D) -> Self {
        self.attach(index, spi);
        self
    }

    /// Sends the mode-select command to every attached device.
    pub fn init(&mut self) {
        for device in self.devices.iter_mut().flatten() {
            // Failures are counted on the device; the chain keeps going.
            let _ = device.init();
        }
    }

    /// Re-sends the current request byte of one device and returns its status.
    pub fn refresh(&mut self, index: usize) -> Result<u16, SwitchError<D::Error>> {
        match self.devices.get_mut(index) {
            Some(Some(device)) => device.push_request(),
            _ => Err(SwitchError::NotAttached),
        }
    }

    fn write(&mut self, location: SwitchLocation, on: bool) {
        if let Some(Some(device)) = self.devices.get_mut(usize::from(location.device)) {
            let _ = device.write_bit(location.mask(), on);
        }
    }
}

impl<D> Default for SwitchChain<D> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Output-to-driver mapping for one class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchMap {
    locations: [Option<SwitchLocation>; MAX_OUTPUTS],
}

impl SwitchMap {
    /// Map with no outputs routed.
    pub const fn empty() -> Self {
        Self {
            locations: [None; MAX_OUTPUTS],
        }
    }

    /// Standard two-IC wiring: outputs 1-4 on IC 0, 5-8 on IC 1, injectors on
    /// bits 0-3 and coils on bits 4-7 of each IC.
    pub const fn standard(class: OutputClass) -> Self {
        let bit_base = match class {
            OutputClass::Fuel => 0,
            OutputClass::Ignition => 4,
        };
        let mut locations = [None; MAX_OUTPUTS];
        let mut index = 0;
        while index < MAX_OUTPUTS {
            #[allow(clippy::cast_possible_truncation)]
            let slot = index as u8;
            locations[index] = Some(SwitchLocation::new(slot / 4, bit_base + slot % 4));
            index += 1;
        }
        Self { locations }
    }

    #[must_use]
    pub const fn with_location(mut self, id: OutputId, location: SwitchLocation) -> Self {
        self.locations[id.index()] = Some(location);
        self
    }

    pub const fn location(&self, id: OutputId) -> Option<SwitchLocation> {
        self.locations[id.index()]
    }
}

impl Default for SwitchMap {
    fn default() -> Self {
        Self::empty()
    }
}

/// Borrowed view binding a class map to the shared chain for one operation.
pub struct SerialSwitchBackend<'c, D> {
    map: &'c SwitchMap,
    chain: &'c mut SwitchChain<D>,
}

impl<'c, D> SerialSwitchBackend<'c, D> {
    pub fn new(map: &'c SwitchMap, chain: &'c mut SwitchChain<D>) -> Self {
        Self { map, chain }
    }
}

impl<D: SpiDevice> OutputBackend for SerialSwitchBackend<'_, D> {
    fn init(&mut self) {
        for id in OutputId::ALL {
            self.end(id);
        }
    }

    fn begin(&mut self, id: OutputId) {
        if let Some(location) = self.map.location(id) {
            self.chain.write(location, true);
        }
    }

    fn end(&mut self, id: OutputId) {
        if let Some(location) = self.map.location(id) {
            self.chain.write(location, false);
        }
    }

    fn toggle(&mut self, id: OutputId) {
        if let Some(location) = self.map.location(id) {
            let next = !self.chain.request_bit(location);
            self.chain.write(location, next);
        }
    }

    fn is_energized(&self, id: OutputId) -> bool {
        self.map
            .location(id)
            .is_some_and(|location| self.chain.request_bit(location))
    }

    fn is_configured(&self, id: OutputId) -> bool {
        self.map
            .location(id)
            .is_some_and(|location| self.chain.device(usize::from(location.device)).is_some())
    }

    // The IC drives its outputs low-side; energize polarity is fixed in silicon.
    fn set_polarity(&mut self, _polarity: Polarity) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embedded_hal::spi::{ErrorType, Operation};
    use heapless::Vec;

    #[derive(Default)]
    struct RecordingSpi {
        words: Vec<u16, 16>,
    }

    impl ErrorType for RecordingSpi {
        type Error = Infallible;
    }

    impl SpiDevice for RecordingSpi {
        fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Infallible> {
            for operation in operations {
                if let Operation::TransferInPlace(buffer) = operation {
                    let word = u16::from_be_bytes([buffer[0], buffer[1]]);
                    let _ = self.words.push(word);
                    buffer[0] = 0xA5;
                    buffer[1] = 0x5A;
                }
            }
            Ok(())
        }
    }

    #[test]
    fn init_sends_mode_select_then_clears_request() {
        let mut chain = SwitchChain::empty().with_device(0, RecordingSpi::default());
        chain.init();
        let device = chain.device(0).unwrap();
        assert_eq!(device.spi.words.as_slice(), &[MODE_SELECT_CMD, 0x3000]);
        assert_eq!(device.last_status(), Some(0xA55A));
    }

    #[test]
    fn classes_share_one_request_byte() {
        let mut chain = SwitchChain::empty().with_device(0, RecordingSpi::default());
        let fuel = SwitchMap::standard(OutputClass::Fuel);
        let ignition = SwitchMap::standard(OutputClass::Ignition);

        SerialSwitchBackend::new(&fuel, &mut chain).begin(OutputId::O1);
        SerialSwitchBackend::new(&ignition, &mut chain).begin(OutputId::O2);
        SerialSwitchBackend::new(&fuel, &mut chain).end(OutputId::O1);

        let device = chain.device(0).unwrap();
        assert_eq!(device.requested(), 0b0010_0000);
        assert_eq!(device.spi.words.as_slice(), &[0x3001, 0x3021, 0x3020]);
        assert!(SerialSwitchBackend::new(&ignition, &mut chain).is_energized(OutputId::O2));
    }

    #[test]
    fn outputs_on_missing_device_are_noops() {
        let mut chain = SwitchChain::empty().with_device(0, RecordingSpi::default());
        let fuel = SwitchMap::standard(OutputClass::Fuel);
        let mut backend = SerialSwitchBackend::new(&fuel, &mut chain);
        backend.begin(OutputId::O6);
        assert!(!backend.is_energized(OutputId::O6));
        assert!(!backend.is_configured(OutputId::O6));
        assert!(backend.is_configured(OutputId::O4));
        assert!(matches!(chain.refresh(1), Err(SwitchError::NotAttached)));
    }
}
