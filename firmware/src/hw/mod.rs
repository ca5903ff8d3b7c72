//! Board wiring for the STM32G0B1 target.
//!
//! | Signal            | Pins                 |
//! |-------------------|----------------------|
//! | Injectors 1-4     | PA0, PA1, PA4, PA5   |
//! | Coils 1-4         | PA6, PA7, PA8, PA9   |
//! | Tacho (open low)  | PA10                 |
//! | Switch SPI1       | PB3 SCK, PB4 MISO, PB5 MOSI, PB6 CS |
//! | Console USART5    | PB0 TX, PB1 RX       |

pub mod timer;

use core::cell::RefCell;

use ecu_core::output::{
    Backend, DirectBackend, DriverKind, OutputClass, OutputId, Polarity, SwitchMap,
};
use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::spi::Spi;
use embedded_hal_bus::spi::{CriticalSectionDevice, NoDelay};

pub type BoardPin = Output<'static>;
pub type SwitchBus = Spi<'static, Blocking>;
pub type SwitchSpi = CriticalSectionDevice<'static, SwitchBus, BoardPin, NoDelay>;
pub type SharedSwitchBus = critical_section::Mutex<RefCell<SwitchBus>>;

/// Backend for one class as the board profile wires it.
///
/// Direct classes take ownership of `pins`; switched classes release them.
pub fn backend<const N: usize>(
    kind: DriverKind,
    class: OutputClass,
    pins: [BoardPin; N],
) -> Backend<BoardPin> {
    match kind {
        DriverKind::Direct => Backend::Direct(
            OutputId::ALL
                .into_iter()
                .zip(pins)
                .fold(DirectBackend::new(Polarity::ActiveHigh), |backend, (id, pin)| {
                    backend.with_output(id, pin)
                }),
        ),
        DriverKind::SerialSwitch => Backend::SerialSwitch(SwitchMap::standard(class)),
    }
}
