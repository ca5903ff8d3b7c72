//! TIM2 compare multiplexer.
//!
//! The G0B1 has a single 32-bit timer, so every schedule owns a virtual
//! compare slot and CC1 is always programmed with the nearest enabled one.
//! Slots 0-7 are fuel channels, 8-15 ignition channels.

use ecu_core::output::{MAX_OUTPUTS, OutputClass};
use ecu_core::schedule::{CompareTimer, ticks_before};
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::InterruptExt;
use embassy_stm32::pac;
use embassy_stm32::peripherals::TIM2;
use embassy_stm32::timer::low_level::Timer;
use embassy_stm32::Peri;
use portable_atomic::{AtomicU16, AtomicU32, Ordering};

use crate::board::TIMER_TICK_HZ;

pub const SLOT_COUNT: usize = 2 * MAX_OUTPUTS;

const CC1: usize = 0;

static COMPARES: [AtomicU32; SLOT_COUNT] = [const { AtomicU32::new(0) }; SLOT_COUNT];
static ENABLED: AtomicU16 = AtomicU16::new(0);

/// One schedule's view of the shared counter.
#[derive(Debug)]
pub struct SlotTimer {
    slot: usize,
}

impl SlotTimer {
    pub const fn new(class: OutputClass, channel: usize) -> Self {
        let base = match class {
            OutputClass::Fuel => 0,
            OutputClass::Ignition => MAX_OUTPUTS,
        };
        Self {
            slot: base + channel % MAX_OUTPUTS,
        }
    }

    /// Timers for every channel of `class`, in channel order.
    pub fn class(class: OutputClass) -> [Self; MAX_OUTPUTS] {
        core::array::from_fn(|channel| Self::new(class, channel))
    }

    const fn bit(&self) -> u16 {
        1 << self.slot
    }
}

/// Maps a slot back to the channel it serves.
pub const fn slot_channel(slot: usize) -> (OutputClass, usize) {
    if slot < MAX_OUTPUTS {
        (OutputClass::Fuel, slot)
    } else {
        (OutputClass::Ignition, slot - MAX_OUTPUTS)
    }
}

impl CompareTimer for SlotTimer {
    fn counter(&self) -> u32 {
        counter()
    }

    fn set_compare(&self, ticks: u32) {
        COMPARES[self.slot].store(ticks, Ordering::Release);
        reprogram();
    }

    fn enable(&self) {
        ENABLED.fetch_or(self.bit(), Ordering::AcqRel);
        reprogram();
    }

    fn disable(&self) {
        ENABLED.fetch_and(!self.bit(), Ordering::AcqRel);
        reprogram();
    }

    fn is_enabled(&self) -> bool {
        ENABLED.load(Ordering::Acquire) & self.bit() != 0
    }
}

/// Free-running schedule counter.
pub fn counter() -> u32 {
    pac::TIM2.cnt().read()
}

/// Starts TIM2 at [`TIMER_TICK_HZ`] over the full 32-bit range.
///
/// The returned driver keeps the peripheral clocked; hold it for the
/// lifetime of the firmware.
pub fn init(tim: Peri<'static, TIM2>) -> Timer<'static, TIM2> {
    let timer = Timer::new(tim);
    let prescaler = (timer.get_clock_frequency().0 / TIMER_TICK_HZ).saturating_sub(1);
    let regs = pac::TIM2;
    regs.psc().write_value(u16::try_from(prescaler).unwrap_or(u16::MAX));
    regs.arr().write_value(u32::MAX);
    regs.dier().modify(|w| w.set_ccie(CC1, false));
    regs.egr().write(|w| w.set_ug(true));
    regs.sr().modify(|w| w.set_uif(false));
    timer.start();

    interrupt::TIM2.unpend();
    // SAFETY: the handler only touches atomics and the engine's own locks.
    unsafe { interrupt::TIM2.enable() };
    timer
}

/// Points CC1 at the nearest enabled slot, or masks it when none is.
fn reprogram() {
    critical_section::with(|_| {
        let regs = pac::TIM2;
        let now = counter();
        let enabled = ENABLED.load(Ordering::Acquire);
        let nearest = (0..SLOT_COUNT)
            .filter(|slot| enabled & (1 << slot) != 0)
            .map(|slot| COMPARES[slot].load(Ordering::Acquire))
            .min_by_key(|compare| compare.wrapping_sub(now).cast_signed());

        let Some(compare) = nearest else {
            regs.dier().modify(|w| w.set_ccie(CC1, false));
            return;
        };
        regs.ccr(CC1).write_value(compare);
        regs.dier().modify(|w| w.set_ccie(CC1, true));
        // Already behind the counter: the hardware match will not come.
        if !ticks_before(counter(), compare) {
            interrupt::TIM2.pend();
        }
    });
}

#[interrupt]
fn TIM2() {
    crate::runtime::dispatch_due(take_due());
}

/// Acknowledges CC1 and returns a mask of the slots that are due.
pub fn take_due() -> u16 {
    let regs = pac::TIM2;
    regs.sr().modify(|w| w.set_ccif(CC1, false));
    let now = counter();
    let enabled = ENABLED.load(Ordering::Acquire);
    (0..SLOT_COUNT)
        .filter(|slot| enabled & (1 << slot) != 0)
        .filter(|slot| !ticks_before(now, COMPARES[*slot].load(Ordering::Acquire)))
        .fold(0, |due, slot| due | 1 << slot)
}
