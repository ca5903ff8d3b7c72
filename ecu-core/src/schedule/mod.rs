//! Per-channel event state machine bound to one hardware compare unit.
//!
//! A schedule walks `Off -> Pending -> Running -> Off`. Arming from `Off`
//! programs the compare register for the start; the start match runs the
//! begin callback and reprograms for the end; the end match runs the end
//! callback. Arming while `Running` queues the next period instead of
//! touching the live compare, and the end match hands over to it without a
//! gap when the queued start coincides with the current end.
//!
//! Multi-field state lives in a `critical_section::Mutex<Cell<_>>`; the
//! resolved callbacks are packed into atomics so the assignment layer can
//! rebind them without taking the same lock.

use core::cell::Cell;
use core::fmt;

use critical_section::Mutex;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use portable_atomic::{AtomicU16, Ordering};

use crate::output::{ChannelCallbacks, Edge, OutputBank, OutputCall, OutputClass};

/// Longest lead time accepted by [`Schedule::arm_after`], in timer ticks.
///
/// Kept below half the counter range so wrapped ordering stays unambiguous.
pub const MAX_TIMER_PERIOD: u32 = 0x3FFF_FFFF;

/// Returns `true` when tick `a` falls strictly before tick `b` on the
/// wrapping counter.
#[must_use]
pub const fn ticks_before(a: u32, b: u32) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let delta = a.wrapping_sub(b) as i32;
    delta < 0
}

/// Register-style access to one compare unit of a free-running timer.
pub trait CompareTimer {
    /// Current counter value.
    fn counter(&self) -> u32;
    /// Programs the compare register.
    fn set_compare(&self, ticks: u32);
    /// Unmasks the compare-match interrupt.
    fn enable(&self);
    /// Masks the compare-match interrupt.
    fn disable(&self);
    fn is_enabled(&self) -> bool;
}

impl<T: CompareTimer + ?Sized> CompareTimer for &T {
    fn counter(&self) -> u32 {
        (**self).counter()
    }

    fn set_compare(&self, ticks: u32) {
        (**self).set_compare(ticks);
    }

    fn enable(&self) {
        (**self).enable();
    }

    fn disable(&self) {
        (**self).disable();
    }

    fn is_enabled(&self) -> bool {
        (**self).is_enabled()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ScheduleStatus {
    /// No compare armed; outputs de-energized.
    #[default]
    Off,
    /// Compare armed for a future start.
    Pending,
    /// Reserved; never produced by the state machine.
    Staged,
    /// Outputs energized; compare armed for the end.
    Running,
}

impl ScheduleStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ScheduleStatus::Off => "off",
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Staged => "staged",
            ScheduleStatus::Running => "running",
        }
    }

    /// Single-character form used by the status lines.
    pub const fn symbol(self) -> char {
        match self {
            ScheduleStatus::Off => '.',
            ScheduleStatus::Pending => 'p',
            ScheduleStatus::Staged => 's',
            ScheduleStatus::Running => 'R',
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of an [`Schedule::arm`] request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArmOutcome {
    /// Schedule was off; the start compare is now armed.
    Armed,
    /// Schedule was running; the period is queued behind the current end.
    Queued,
    /// A start is already armed; reset first.
    RejectedPending,
    /// Queued start would precede the running period's end.
    RejectedOverlap,
}

impl ArmOutcome {
    pub const fn is_accepted(self) -> bool {
        matches!(self, ArmOutcome::Armed | ArmOutcome::Queued)
    }
}

/// What a compare match did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MatchOutcome {
    /// Start match: begin callback ran, schedule is running.
    Began,
    /// End match with nothing queued: schedule is off.
    Ended,
    /// End match immediately followed by the queued begin.
    Chained,
    /// End match; the queued period starts later and is now pending.
    EndedQueuedPending,
    /// Match arrived while off; the compare was disabled.
    Spurious,
}

/// Copy of a schedule's fields at one instant.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct ScheduleSnapshot {
    pub status: ScheduleStatus,
    pub duration: u32,
    pub start_compare: u32,
    pub end_compare: u32,
    pub next_start_compare: u32,
    pub next_end_compare: u32,
    pub next_duration: u32,
    pub has_next: bool,
    /// Counter value captured when the begin callback last ran.
    pub start_time: u32,
    pub end_set_by_decoder: bool,
}

/// One logical channel's event schedule.
pub struct Schedule<T> {
    class: OutputClass,
    timer: T,
    state: Mutex<Cell<ScheduleSnapshot>>,
    begin: AtomicU16,
    end: AtomicU16,
}

impl<T: CompareTimer> Schedule<T> {
    pub const fn new(class: OutputClass, timer: T) -> Self {
        Self {
            class,
            timer,
            state: Mutex::new(Cell::new(ScheduleSnapshot {
                status: ScheduleStatus::Off,
                duration: 0,
                start_compare: 0,
                end_compare: 0,
                next_start_compare: 0,
                next_end_compare: 0,
                next_duration: 0,
                has_next: false,
                start_time: 0,
                end_set_by_decoder: false,
            })),
            begin: AtomicU16::new(OutputCall::Inhibit.to_raw()),
            end: AtomicU16::new(OutputCall::Inhibit.to_raw()),
        }
    }

    pub const fn class(&self) -> OutputClass {
        self.class
    }

    pub const fn timer(&self) -> &T {
        &self.timer
    }

    fn update<R>(&self, f: impl FnOnce(&mut ScheduleSnapshot) -> R) -> R {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            let result = f(&mut state);
            cell.set(state);
            result
        })
    }

    pub fn snapshot(&self) -> ScheduleSnapshot {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    pub fn status(&self) -> ScheduleStatus {
        self.snapshot().status
    }

    /// Counter value at the last begin, while running.
    pub fn start_time(&self) -> Option<u32> {
        let state = self.snapshot();
        (state.status == ScheduleStatus::Running).then_some(state.start_time)
    }

    pub fn callbacks(&self) -> ChannelCallbacks {
        ChannelCallbacks::new(
            OutputCall::from_raw(self.begin.load(Ordering::Acquire)),
            OutputCall::from_raw(self.end.load(Ordering::Acquire)),
        )
    }

    /// Rebinds the callbacks; refused while the outputs are energized.
    pub fn set_callbacks(&self, callbacks: ChannelCallbacks) -> bool {
        critical_section::with(|cs| {
            if self.state.borrow(cs).get().status == ScheduleStatus::Running {
                return false;
            }
            self.store_callbacks(callbacks);
            true
        })
    }

    fn store_callbacks(&self, callbacks: ChannelCallbacks) {
        self.begin.store(callbacks.begin.to_raw(), Ordering::Release);
        self.end.store(callbacks.end.to_raw(), Ordering::Release);
    }

    fn call(&self, edge: Edge) -> OutputCall {
        let raw = match edge {
            Edge::Begin => self.begin.load(Ordering::Acquire),
            Edge::End => self.end.load(Ordering::Acquire),
        };
        OutputCall::from_raw(raw)
    }

    /// Arms a period at absolute compare values.
    pub fn arm(&self, start: u32, end: u32, duration: u32) -> ArmOutcome {
        self.update(|state| match state.status {
            ScheduleStatus::Off => {
                state.status = ScheduleStatus::Pending;
                state.start_compare = start;
                state.end_compare = end;
                state.duration = duration;
                state.has_next = false;
                state.end_set_by_decoder = false;
                self.timer.set_compare(start);
                self.timer.enable();
                ArmOutcome::Armed
            }
            ScheduleStatus::Running => {
                if ticks_before(start, state.end_compare) {
                    return ArmOutcome::RejectedOverlap;
                }
                state.next_start_compare = start;
                state.next_end_compare = end;
                state.next_duration = duration;
                state.has_next = true;
                ArmOutcome::Queued
            }
            ScheduleStatus::Pending | ScheduleStatus::Staged => ArmOutcome::RejectedPending,
        })
    }

    /// Arms a period starting `timeout` ticks from now.
    ///
    /// When running, the period is queued behind the current end if it does
    /// not overlap it.
    pub fn arm_after(&self, timeout: u32, duration: u32) -> ArmOutcome {
        let start = self
            .timer
            .counter()
            .wrapping_add(timeout.min(MAX_TIMER_PERIOD));
        self.arm(start, start.wrapping_add(duration), duration)
    }

    /// Forces `Off`, inhibits both callbacks and disables the compare.
    ///
    /// Does not drive outputs; callers that interrupt a running period must
    /// end it first.
    pub fn reset(&self) {
        self.update(|state| {
            state.status = ScheduleStatus::Off;
            state.has_next = false;
            state.end_set_by_decoder = false;
            self.store_callbacks(ChannelCallbacks::INHIBITED);
            self.timer.disable();
        });
    }

    /// Compare-match handler.
    pub fn on_compare_match<P, D>(&self, bank: &OutputBank<P, D>) -> MatchOutcome
    where
        P: OutputPin,
        D: SpiDevice,
    {
        self.update(|state| match state.status {
            ScheduleStatus::Pending => {
                bank.execute(self.class, Edge::Begin, self.call(Edge::Begin));
                state.status = ScheduleStatus::Running;
                state.start_time = self.timer.counter();
                self.timer.set_compare(state.end_compare);
                MatchOutcome::Began
            }
            ScheduleStatus::Running => {
                bank.execute(self.class, Edge::End, self.call(Edge::End));
                state.end_set_by_decoder = false;
                if !state.has_next {
                    state.status = ScheduleStatus::Off;
                    self.timer.disable();
                    return MatchOutcome::Ended;
                }

                let previous_end = state.end_compare;
                state.has_next = false;
                state.start_compare = state.next_start_compare;
                state.end_compare = state.next_end_compare;
                state.duration = state.next_duration;

                if ticks_before(previous_end, state.start_compare) {
                    state.status = ScheduleStatus::Pending;
                    self.timer.set_compare(state.start_compare);
                    MatchOutcome::EndedQueuedPending
                } else {
                    bank.execute(self.class, Edge::Begin, self.call(Edge::Begin));
                    state.start_time = self.timer.counter();
                    self.timer.set_compare(state.end_compare);
                    MatchOutcome::Chained
                }
            }
            ScheduleStatus::Off | ScheduleStatus::Staged => {
                self.timer.disable();
                MatchOutcome::Spurious
            }
        })
    }

    /// Moves the end compare of a pending or running period.
    ///
    /// Used by decoders that know the spark angle more precisely once the
    /// coil is charging.
    pub fn refresh_end(&self, end: u32) -> bool {
        self.update(|state| match state.status {
            ScheduleStatus::Running => {
                // Never past a queued start; the handover stays a chain.
                let end = if state.has_next && ticks_before(state.next_start_compare, end) {
                    state.next_start_compare
                } else {
                    end
                };
                state.end_compare = end;
                state.end_set_by_decoder = true;
                self.timer.set_compare(end);
                true
            }
            ScheduleStatus::Pending => {
                state.end_compare = end;
                state.end_set_by_decoder = true;
                true
            }
            ScheduleStatus::Off | ScheduleStatus::Staged => false,
        })
    }

    /// Ends a running period now and drops anything queued behind it.
    pub fn force_end<P, D>(&self, bank: &OutputBank<P, D>) -> bool
    where
        P: OutputPin,
        D: SpiDevice,
    {
        self.update(|state| self.end_now(state, bank))
    }

    /// Ends the running period if it has been energized for more than
    /// `limit` ticks at `now`.
    ///
    /// The check and the release share one critical section, so a period
    /// chained in by a compare match is measured from its own begin.
    pub fn force_end_if_over<P, D>(&self, now: u32, limit: u32, bank: &OutputBank<P, D>) -> bool
    where
        P: OutputPin,
        D: SpiDevice,
    {
        self.update(|state| {
            let over = dwell(state, now).is_some_and(|elapsed| elapsed > limit);
            over && self.end_now(state, bank)
        })
    }

    fn end_now<P, D>(&self, state: &mut ScheduleSnapshot, bank: &OutputBank<P, D>) -> bool
    where
        P: OutputPin,
        D: SpiDevice,
    {
        if state.status != ScheduleStatus::Running {
            return false;
        }
        bank.execute(self.class, Edge::End, self.call(Edge::End));
        state.status = ScheduleStatus::Off;
        state.has_next = false;
        state.end_set_by_decoder = false;
        self.timer.disable();
        true
    }

    /// Ticks the current period has been energized, if running.
    pub fn energized_for(&self, now: u32) -> Option<u32> {
        dwell(&self.snapshot(), now)
    }
}

fn dwell(state: &ScheduleSnapshot, now: u32) -> Option<u32> {
    (state.status == ScheduleStatus::Running).then(|| now.wrapping_sub(state.start_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_ordering() {
        assert!(ticks_before(10, 20));
        assert!(!ticks_before(20, 20));
        assert!(ticks_before(u32::MAX - 5, 3));
        assert!(!ticks_before(3, u32::MAX - 5));
    }

    #[test]
    fn only_running_and_queued_periods_are_accepted() {
        assert!(ArmOutcome::Armed.is_accepted());
        assert!(ArmOutcome::Queued.is_accepted());
        assert!(!ArmOutcome::RejectedPending.is_accepted());
        assert!(!ArmOutcome::RejectedOverlap.is_accepted());
    }
}
