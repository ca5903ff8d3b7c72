//! Scheduler core: sixteen event schedules, the output bank and the live
//! channel tables they share with the crank-angle decoder.
//!
//! The fuel table (angles, domain, channel mask, pulse width, squirt count)
//! is published as one value inside a critical section. The ignition table
//! is a set of independent atomics written without masking interrupts;
//! readers tolerate seeing a mix of old and new angles for one event.
//! Ignition callbacks are still rebound under the lock, together with the
//! check that no coil is charging.
//!
//! Outputs driven through [`Engine::bench`] belong to no schedule. The first
//! arm afterwards releases them, and the dwell limit times bench-charged
//! coils from when it first sees them energized.

use core::cell::Cell;
use core::fmt;

use critical_section::{CriticalSection, Mutex};
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use portable_atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};

use crate::assignment::{ChannelAssignment, ClassTable, SyncWidth, resolve};
use crate::config::{BoardCapabilities, EngineConfig};
use crate::output::{MAX_OUTPUTS, OutputBank, OutputClass, OutputId};
use crate::schedule::{ArmOutcome, CompareTimer, MatchOutcome, Schedule, ScheduleStatus};
use crate::status::{ClassStatus, StatusSnapshot};

/// Result of one class's half/full synchronisation change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResyncOutcome {
    /// The class now runs on the requested width.
    Applied,
    /// A schedule of the class was running; retry on a later call.
    Deferred,
    /// The class layout does not depend on the sync width, or already matches.
    NotApplicable,
}

impl ResyncOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            ResyncOutcome::Applied => "applied",
            ResyncOutcome::Deferred => "deferred",
            ResyncOutcome::NotApplicable => "n/a",
        }
    }
}

impl fmt::Display for ResyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ResyncReport {
    pub fuel: ResyncOutcome,
    pub ignition: ResyncOutcome,
}

impl ResyncReport {
    /// Returns `true` when either class still has to be retried.
    #[must_use]
    pub const fn is_deferred(&self) -> bool {
        matches!(self.fuel, ResyncOutcome::Deferred)
            || matches!(self.ignition, ResyncOutcome::Deferred)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct FuelTable {
    angles: [u16; MAX_OUTPUTS],
    enabled: u8,
    domain: u16,
    req_fuel_us: u32,
    n_squirts: u8,
    sync: SyncWidth,
}

impl FuelTable {
    const EMPTY: Self = Self {
        angles: [0; MAX_OUTPUTS],
        enabled: 0,
        domain: 0,
        req_fuel_us: 0,
        n_squirts: 0,
        sync: SyncWidth::Full,
    };

    fn from_assignment(assignment: &ChannelAssignment) -> Self {
        let table = &assignment.fuel;
        Self {
            angles: table.slots().map(|slot| slot.angle),
            enabled: table.enabled_mask(),
            domain: table.domain(),
            req_fuel_us: assignment.req_fuel_us(),
            n_squirts: assignment.n_squirts,
            sync: table.sync(),
        }
    }
}

const SYNC_HALF: u8 = 0;
const SYNC_FULL: u8 = 1;

pub struct Engine<T, P, D> {
    bank: OutputBank<P, D>,
    fuel: [Schedule<T>; MAX_OUTPUTS],
    ignition: [Schedule<T>; MAX_OUTPUTS],
    fuel_table: Mutex<Cell<FuelTable>>,
    ignition_angles: [AtomicU16; MAX_OUTPUTS],
    ignition_domain: AtomicU16,
    ignition_enabled: AtomicU8,
    ignition_sync: AtomicU8,
    assignment: Mutex<Cell<Option<ChannelAssignment>>>,
    bench_used: AtomicBool,
    /// Counter value at which each coil was first seen charging with no
    /// schedule behind it.
    stray_coils: Mutex<Cell<[Option<u32>; MAX_OUTPUTS]>>,
}

impl<T, P, D> Engine<T, P, D>
where
    T: CompareTimer,
    P: OutputPin,
    D: SpiDevice,
{
    /// Binds one compare unit to each fuel and ignition channel.
    pub fn new(
        bank: OutputBank<P, D>,
        fuel_timers: [T; MAX_OUTPUTS],
        ignition_timers: [T; MAX_OUTPUTS],
    ) -> Self {
        Self {
            bank,
            fuel: fuel_timers.map(|timer| Schedule::new(OutputClass::Fuel, timer)),
            ignition: ignition_timers.map(|timer| Schedule::new(OutputClass::Ignition, timer)),
            fuel_table: Mutex::new(Cell::new(FuelTable::EMPTY)),
            ignition_angles: [const { AtomicU16::new(0) }; MAX_OUTPUTS],
            ignition_domain: AtomicU16::new(0),
            ignition_enabled: AtomicU8::new(0),
            ignition_sync: AtomicU8::new(SYNC_FULL),
            assignment: Mutex::new(Cell::new(None)),
            bench_used: AtomicBool::new(false),
            stray_coils: Mutex::new(Cell::new([None; MAX_OUTPUTS])),
        }
    }

    pub const fn bank(&self) -> &OutputBank<P, D> {
        &self.bank
    }

    fn schedules(&self, class: OutputClass) -> &[Schedule<T>; MAX_OUTPUTS] {
        match class {
            OutputClass::Fuel => &self.fuel,
            OutputClass::Ignition => &self.ignition,
        }
    }

    pub fn schedule(&self, class: OutputClass, channel: usize) -> Option<&Schedule<T>> {
        self.schedules(class).get(channel)
    }

    /// Assignment currently installed, if any.
    pub fn assignment(&self) -> Option<ChannelAssignment> {
        critical_section::with(|cs| self.assignment.borrow(cs).get())
    }

    /// De-energizes everything, resolves `config` and installs the result.
    pub fn configure_channels(
        &self,
        config: &EngineConfig,
        caps: BoardCapabilities,
    ) -> ChannelAssignment {
        let assignment = resolve(config, caps);

        critical_section::with(|cs| {
            self.bank.all_off();
            for schedule in self.fuel.iter().chain(&self.ignition) {
                schedule.reset();
            }

            self.bank
                .set_polarity(OutputClass::Fuel, assignment.effective.injector_polarity);
            self.bank
                .set_polarity(OutputClass::Ignition, assignment.ignition_polarity);
            self.bank.set_tacho_config(assignment.effective.tacho);

            self.install(OutputClass::Fuel, &assignment.fuel);
            self.install(OutputClass::Ignition, &assignment.ignition);
            self.publish_fuel(cs, &assignment);
            self.publish_ignition(&assignment.ignition);
            self.assignment.borrow(cs).set(Some(assignment));
        });

        assignment
    }

    /// Binds each schedule of `class` to its table slot; `false` if any
    /// schedule was running and kept its old callbacks.
    fn install(&self, class: OutputClass, table: &ClassTable) -> bool {
        self.schedules(class)
            .iter()
            .zip(table.slots())
            .fold(true, |installed, (schedule, slot)| {
                schedule.set_callbacks(slot.callbacks) && installed
            })
    }

    fn publish_fuel(&self, cs: CriticalSection<'_>, assignment: &ChannelAssignment) {
        self.fuel_table
            .borrow(cs)
            .set(FuelTable::from_assignment(assignment));
    }

    fn publish_ignition(&self, table: &ClassTable) {
        for (angle, slot) in self.ignition_angles.iter().zip(table.slots()) {
            angle.store(slot.angle, Ordering::Release);
        }
        self.ignition_domain.store(table.domain(), Ordering::Release);
        self.ignition_enabled
            .store(table.enabled_mask(), Ordering::Release);
        let sync = match table.sync() {
            SyncWidth::Half => SYNC_HALF,
            SyncWidth::Full => SYNC_FULL,
        };
        self.ignition_sync.store(sync, Ordering::Release);
    }

    /// Cam sync acquired: move sequential classes to the 720 degree layout.
    pub fn change_half_to_full_sync(&self) -> ResyncReport {
        self.resync(SyncWidth::Full)
    }

    /// Cam sync lost: pair sequential channels over 360 degrees.
    pub fn change_full_to_half_sync(&self) -> ResyncReport {
        self.resync(SyncWidth::Half)
    }

    fn resync(&self, width: SyncWidth) -> ResyncReport {
        ResyncReport {
            fuel: self.resync_fuel(width),
            ignition: self.resync_ignition(width),
        }
    }

    fn resync_fuel(&self, width: SyncWidth) -> ResyncOutcome {
        critical_section::with(|cs| {
            let cell = self.assignment.borrow(cs);
            let Some(next) = cell
                .get()
                .and_then(|current| current.resync(OutputClass::Fuel, width))
            else {
                return ResyncOutcome::NotApplicable;
            };
            if self.any_running(OutputClass::Fuel) {
                return ResyncOutcome::Deferred;
            }

            self.install(OutputClass::Fuel, &next.fuel);
            self.publish_fuel(cs, &next);
            cell.set(Some(next));
            ResyncOutcome::Applied
        })
    }

    fn resync_ignition(&self, width: SyncWidth) -> ResyncOutcome {
        let next = critical_section::with(|cs| {
            self.assignment
                .borrow(cs)
                .get()
                .and_then(|current| current.resync(OutputClass::Ignition, width))
        });
        let Some(next) = next else {
            return ResyncOutcome::NotApplicable;
        };
        // No coil can begin charging between the check and the rebind, so
        // either every channel moves to the new wiring or none does.
        let installed = critical_section::with(|_| {
            !self.any_running(OutputClass::Ignition)
                && self.install(OutputClass::Ignition, &next.ignition)
        });
        if !installed {
            return ResyncOutcome::Deferred;
        }
        self.publish_ignition(&next.ignition);

        critical_section::with(|cs| {
            let cell = self.assignment.borrow(cs);
            if let Some(mut current) = cell.get() {
                current.ignition = next.ignition;
                cell.set(Some(current));
            }
        });
        ResyncOutcome::Applied
    }

    /// Returns `true` while any schedule of `class` has its outputs energized.
    pub fn any_running(&self, class: OutputClass) -> bool {
        self.schedules(class)
            .iter()
            .any(|schedule| schedule.status() == ScheduleStatus::Running)
    }

    pub fn is_enabled(&self, class: OutputClass, channel: usize) -> bool {
        channel < MAX_OUTPUTS && self.enabled_mask(class) & (1 << channel) != 0
    }

    /// Bitmask (bit 0 = channel 1) of enabled channels.
    pub fn enabled_mask(&self, class: OutputClass) -> u8 {
        match class {
            OutputClass::Fuel => self.fuel_table().enabled,
            OutputClass::Ignition => self.ignition_enabled.load(Ordering::Acquire),
        }
    }

    fn fuel_table(&self) -> FuelTable {
        critical_section::with(|cs| self.fuel_table.borrow(cs).get())
    }

    /// Crank angle offset of an enabled channel.
    pub fn angle(&self, class: OutputClass, channel: usize) -> Option<u16> {
        if !self.is_enabled(class, channel) {
            return None;
        }
        match class {
            OutputClass::Fuel => self.fuel_table().angles.get(channel).copied(),
            OutputClass::Ignition => self
                .ignition_angles
                .get(channel)
                .map(|angle| angle.load(Ordering::Acquire)),
        }
    }

    pub fn domain(&self, class: OutputClass) -> u16 {
        match class {
            OutputClass::Fuel => self.fuel_table().domain,
            OutputClass::Ignition => self.ignition_domain.load(Ordering::Acquire),
        }
    }

    pub fn sync(&self, class: OutputClass) -> SyncWidth {
        match class {
            OutputClass::Fuel => self.fuel_table().sync,
            OutputClass::Ignition => {
                if self.ignition_sync.load(Ordering::Acquire) == SYNC_HALF {
                    SyncWidth::Half
                } else {
                    SyncWidth::Full
                }
            }
        }
    }

    /// Scaled base pulse width for the current fuel layout.
    pub fn req_fuel_us(&self) -> u32 {
        self.fuel_table().req_fuel_us
    }

    pub fn n_squirts(&self) -> u8 {
        self.fuel_table().n_squirts
    }

    /// Arms an enabled channel at absolute compare values.
    pub fn arm(
        &self,
        class: OutputClass,
        channel: usize,
        start: u32,
        end: u32,
        duration: u32,
    ) -> Option<ArmOutcome> {
        if !self.is_enabled(class, channel) {
            return None;
        }
        self.release_bench_outputs();
        self.schedule(class, channel)
            .map(|schedule| schedule.arm(start, end, duration))
    }

    /// Arms an enabled channel `timeout` ticks from now.
    pub fn arm_after(
        &self,
        class: OutputClass,
        channel: usize,
        timeout: u32,
        duration: u32,
    ) -> Option<ArmOutcome> {
        if !self.is_enabled(class, channel) {
            return None;
        }
        self.release_bench_outputs();
        self.schedule(class, channel)
            .map(|schedule| schedule.arm_after(timeout, duration))
    }

    /// Ends whatever the bench primitives left energized, once per bench
    /// session, before a schedule takes the outputs over.
    fn release_bench_outputs(&self) {
        critical_section::with(|cs| {
            if !self.bench_used.swap(false, Ordering::AcqRel) {
                return;
            }
            if !self.any_running(OutputClass::Fuel) && !self.any_running(OutputClass::Ignition) {
                self.bank.all_off();
            }
            self.stray_coils.borrow(cs).set([None; MAX_OUTPUTS]);
        });
    }

    /// Cancels one channel, ending a running period first.
    pub fn reset(&self, class: OutputClass, channel: usize) -> bool {
        let Some(schedule) = self.schedule(class, channel) else {
            return false;
        };
        critical_section::with(|_| {
            schedule.force_end(&self.bank);
            let callbacks = schedule.callbacks();
            schedule.reset();
            // Reset inhibits the channel; keep it wired for the next arm.
            schedule.set_callbacks(callbacks);
        });
        true
    }

    pub fn status(&self, class: OutputClass, channel: usize) -> Option<ScheduleStatus> {
        self.schedule(class, channel).map(Schedule::status)
    }

    /// Timer interrupt entry point for one channel.
    pub fn on_compare_match(&self, class: OutputClass, channel: usize) -> Option<MatchOutcome> {
        self.schedule(class, channel)
            .map(|schedule| schedule.on_compare_match(&self.bank))
    }

    /// Decoder-provided spark compare for a charging or pending coil.
    pub fn refresh_ignition_end(&self, channel: usize, end: u32) -> bool {
        self.schedule(OutputClass::Ignition, channel)
            .is_some_and(|schedule| schedule.refresh_end(end))
    }

    /// Ends every coil charging for longer than `limit` ticks at `now`.
    ///
    /// Returns a mask (bit 0 = channel 1) of the coils forced off. Coils
    /// charged from the bench have no channel and report by output number.
    pub fn enforce_dwell_limit(&self, now: u32, limit: u32) -> u8 {
        let mut forced = 0;
        for (index, schedule) in self.ignition.iter().enumerate() {
            if schedule.force_end_if_over(now, limit, &self.bank) {
                forced |= 1 << index;
            }
        }
        forced | self.release_stray_coils(now, limit)
    }

    fn release_stray_coils(&self, now: u32, limit: u32) -> u8 {
        critical_section::with(|cs| {
            let cell = self.stray_coils.borrow(cs);
            if !self.bench_used.load(Ordering::Acquire) {
                cell.set([None; MAX_OUTPUTS]);
                return 0;
            }

            let energized = self.bank.energized_mask(OutputClass::Ignition);
            let mut since = cell.get();
            let mut forced = 0;
            for (id, seen) in OutputId::ALL.into_iter().zip(since.iter_mut()) {
                let bit = 1 << id.index();
                if energized & bit == 0 {
                    *seen = None;
                    continue;
                }
                let first = *seen.get_or_insert(now);
                if now.wrapping_sub(first) > limit {
                    self.bank.end_coil_charge(id);
                    *seen = None;
                    forced |= bit;
                }
            }
            cell.set(since);
            forced
        })
    }

    /// Engine stop: de-energize every output, then cancel every schedule.
    pub fn stop(&self) {
        critical_section::with(|_| {
            self.bank.all_off();
            for class in [OutputClass::Fuel, OutputClass::Ignition] {
                for schedule in self.schedules(class) {
                    let callbacks = schedule.callbacks();
                    schedule.reset();
                    schedule.set_callbacks(callbacks);
                }
            }
        });
    }

    /// Output primitives for bench testing; only while nothing is scheduled.
    pub fn bench(&self) -> Option<&OutputBank<P, D>> {
        let quiet = self
            .fuel
            .iter()
            .chain(&self.ignition)
            .all(|schedule| matches!(schedule.status(), ScheduleStatus::Off));
        if quiet {
            self.bench_used.store(true, Ordering::Release);
        }
        quiet.then_some(&self.bank)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let Some(assignment) = self.assignment() else {
            return StatusSnapshot::unconfigured();
        };
        StatusSnapshot {
            configured: true,
            fuel: self.class_status(OutputClass::Fuel),
            ignition: self.class_status(OutputClass::Ignition),
            fallbacks: assignment.fallbacks,
            n_squirts: self.n_squirts(),
            req_fuel_us: self.req_fuel_us(),
            tacho_pulses: self.bank.tacho_pulses(),
        }
    }

    fn class_status(&self, class: OutputClass) -> ClassStatus {
        let schedules = self.schedules(class);
        ClassStatus {
            schedules: core::array::from_fn(|index| schedules[index].status()),
            energized: self.bank.energized_mask(class),
            enabled: self.enabled_mask(class),
            domain: self.domain(class),
            sync: self.sync(class),
        }
    }
}
