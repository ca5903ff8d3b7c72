//! Shared status surface for the bench console and firmware logs.
//!
//! [`Engine::snapshot`](crate::engine::Engine::snapshot) captures a
//! [`StatusSnapshot`]; [`StatusFormatter`] keeps the textual rendering
//! consistent across the emulator console and the firmware's periodic log.

use core::fmt;

use crate::assignment::{Fallbacks, SyncWidth};
use crate::output::{MAX_OUTPUTS, OutputClass};
use crate::schedule::ScheduleStatus;

/// Sampled state for one output class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassStatus {
    pub schedules: [ScheduleStatus; MAX_OUTPUTS],
    /// Bit 0 = output 1.
    pub energized: u8,
    /// Bit 0 = channel 1.
    pub enabled: u8,
    pub domain: u16,
    pub sync: SyncWidth,
}

impl ClassStatus {
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            schedules: [ScheduleStatus::Off; MAX_OUTPUTS],
            energized: 0,
            enabled: 0,
            domain: 0,
            sync: SyncWidth::Full,
        }
    }

    /// Returns `true` when no schedule of the class is pending or running.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.schedules
            .iter()
            .all(|status| matches!(status, ScheduleStatus::Off | ScheduleStatus::Staged))
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.schedules
            .iter()
            .filter(|status| **status == ScheduleStatus::Running)
            .count()
    }
}

/// Snapshot of the actuation core surfaced by the `status` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub configured: bool,
    pub fuel: ClassStatus,
    pub ignition: ClassStatus,
    pub fallbacks: Fallbacks,
    pub n_squirts: u8,
    pub req_fuel_us: u32,
    pub tacho_pulses: u32,
}

impl StatusSnapshot {
    /// Snapshot of an engine that has never been configured.
    #[must_use]
    pub const fn unconfigured() -> Self {
        Self {
            configured: false,
            fuel: ClassStatus::idle(),
            ignition: ClassStatus::idle(),
            fallbacks: Fallbacks::empty(),
            n_squirts: 0,
            req_fuel_us: 0,
            tacho_pulses: 0,
        }
    }

    #[must_use]
    pub const fn class(&self, class: OutputClass) -> &ClassStatus {
        match class {
            OutputClass::Fuel => &self.fuel,
            OutputClass::Ignition => &self.ignition,
        }
    }
}

/// Renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes one class line (e.g. `fuel sync=full domain=720 ch=1234.... sched=Rp...... out=1.......`).
    pub fn write_class_line<W: fmt::Write>(
        &self,
        writer: &mut W,
        class: OutputClass,
    ) -> fmt::Result {
        let status = self.snapshot.class(class);
        write!(
            writer,
            "{class} sync={} domain={}",
            status.sync, status.domain
        )?;

        writer.write_str(" ch=")?;
        write_mask(writer, status.enabled, |index| {
            char::from_digit(u32::from(index) + 1, 10).unwrap_or('?')
        })?;

        writer.write_str(" sched=")?;
        for schedule in status.schedules {
            writer.write_char(schedule.symbol())?;
        }

        writer.write_str(" out=")?;
        write_mask(writer, status.energized, |_| '1')
    }

    /// Writes the configuration line (e.g. `config squirts=2 req=8000us fallbacks=none tacho=12`).
    pub fn write_config_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        if !self.snapshot.configured {
            return writer.write_str("config unconfigured");
        }
        write!(
            writer,
            "config squirts={} req={}us fallbacks={} tacho={}",
            self.snapshot.n_squirts,
            self.snapshot.req_fuel_us,
            self.snapshot.fallbacks,
            self.snapshot.tacho_pulses
        )
    }
}

fn write_mask<W: fmt::Write>(
    writer: &mut W,
    mask: u8,
    set: impl Fn(u8) -> char,
) -> fmt::Result {
    for index in 0..8u8 {
        let symbol = if mask & (1 << index) != 0 {
            set(index)
        } else {
            '.'
        };
        writer.write_char(symbol)?;
    }
    Ok(())
}
