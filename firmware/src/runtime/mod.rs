use core::cell::{Cell, RefCell};

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, Mutex, RawRestoreState};
use defmt_rtt as _;
use ecu_core::assignment::SyncWidth;
use ecu_core::engine::Engine;
use ecu_core::output::{OutputBank, OutputClass, SwitchChain};
use ecu_core::tacho::Tacho;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::gpio::{Level, Output, Speed};
use embassy_stm32::spi::{self, Spi};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal_bus::spi::CriticalSectionDevice;
use static_cell::StaticCell;

use crate::board;
use crate::hw::timer::{self, SlotTimer};
use crate::hw::{self, BoardPin, SharedSwitchBus, SwitchSpi};
use crate::status;
use crate::telemetry::{FirmwareInstant, SharedTelemetry};

mod console_task;
mod housekeeping_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type FirmwareEngine = Engine<SlotTimer, BoardPin, SwitchSpi>;

const SWITCH_SPI_HZ: u32 = 1_000_000;

static ENGINE: StaticCell<FirmwareEngine> = StaticCell::new();
static SWITCH_BUS: StaticCell<SharedSwitchBus> = StaticCell::new();
/// Engine as seen from the compare interrupt; `None` until boot finishes.
static ENGINE_HANDLE: Mutex<Cell<Option<&'static FirmwareEngine>>> = Mutex::new(Cell::new(None));

pub(super) static TELEMETRY: SharedTelemetry = SharedTelemetry::new();
/// Latest sync width a deferred change is still waiting to apply.
pub(super) static RESYNC_REQUESTS: Signal<CriticalSectionRawMutex, SyncWidth> = Signal::new();

/// Runs every due channel; called from the TIM2 handler.
pub(crate) fn dispatch_due(due: u16) {
    let Some(engine) = critical_section::with(|cs| ENGINE_HANDLE.borrow(cs).get()) else {
        return;
    };

    let now = FirmwareInstant::now();
    for slot in (0..timer::SLOT_COUNT).filter(|slot| due & (1 << slot) != 0) {
        let (class, channel) = timer::slot_channel(slot);
        if let Some(outcome) = engine.on_compare_match(class, channel) {
            status::record_match(class, outcome);
            TELEMETRY.record_match(class, channel, outcome, now);
        }
    }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA4,
        PA5,
        PA6,
        PA7,
        PA8,
        PA9,
        PA10,
        PB0,
        PB1,
        PB3,
        PB4,
        PB5,
        PB6,
        SPI1,
        TIM2,
        USART5,
        ..
    } = hal::init(config);

    let profile = board::ACTIVE;
    let engine_config = profile.engine_config();
    defmt::info!("ecu: board {}", profile.name);

    let _timebase = timer::init(TIM2);

    let injectors = [
        Output::new(PA0, Level::Low, Speed::VeryHigh),
        Output::new(PA1, Level::Low, Speed::VeryHigh),
        Output::new(PA4, Level::Low, Speed::VeryHigh),
        Output::new(PA5, Level::Low, Speed::VeryHigh),
    ];
    let coils = [
        Output::new(PA6, Level::Low, Speed::VeryHigh),
        Output::new(PA7, Level::Low, Speed::VeryHigh),
        Output::new(PA8, Level::Low, Speed::VeryHigh),
        Output::new(PA9, Level::Low, Speed::VeryHigh),
    ];
    let tacho = Tacho::new(Output::new(PA10, Level::High, Speed::Low), engine_config.tacho);

    let mut switches = SwitchChain::empty();
    if profile.uses_switch() {
        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(SWITCH_SPI_HZ);
        spi_config.mode = spi::MODE_1;
        let bus = SWITCH_BUS.init(Mutex::new(RefCell::new(Spi::new_blocking(
            SPI1, PB3, PB5, PB4, spi_config,
        ))));
        let Ok(device) =
            CriticalSectionDevice::new_no_delay(bus, Output::new(PB6, Level::High, Speed::High));
        switches.attach(0, device);
    }

    let bank = OutputBank::new(
        hw::backend(engine_config.fuel_driver, OutputClass::Fuel, injectors),
        hw::backend(engine_config.ignition_driver, OutputClass::Ignition, coils),
        switches,
        tacho,
    );
    let engine: &'static FirmwareEngine = ENGINE.init(Engine::new(
        bank,
        SlotTimer::class(OutputClass::Fuel),
        SlotTimer::class(OutputClass::Ignition),
    ));
    engine.bank().init();

    let assignment = engine.configure_channels(&engine_config, profile.caps);
    TELEMETRY.record_configured(&assignment, FirmwareInstant::now());
    critical_section::with(|cs| ENGINE_HANDLE.borrow(cs).set(Some(engine)));

    let dwell_limit = board::us_to_ticks(engine_config.dwell_limit_us);
    spawner
        .spawn(housekeeping_task::run(engine, dwell_limit))
        .expect("failed to spawn housekeeping task");
    spawner
        .spawn(console_task::run(engine, USART5, PB0, PB1))
        .expect("failed to spawn console task");

    core::future::pending::<()>().await;
}
