//! Firmware telemetry: one recorder shared by the compare interrupt and the
//! async tasks, plus defmt / host console hooks.
//!
//! Compare matches go into the ring silently; everything rarer (resync,
//! overdwell, configuration, bench actions) is mirrored to the log.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::cell::RefCell;
use core::time::Duration;

use ecu_core::assignment::{ChannelAssignment, SyncWidth};
use ecu_core::engine::{ResyncOutcome, ResyncReport};
use ecu_core::output::OutputClass;
use ecu_core::schedule::MatchOutcome;
use ecu_core::telemetry::{
    BenchTelemetry, TelemetryInstant, TelemetryRecorder, channel_ref,
};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

/// Embassy instant adapted to the core recorder.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

pub type FirmwareRecorder = TelemetryRecorder<FirmwareInstant>;

/// Recorder behind a critical-section mutex so the interrupt can write too.
pub struct SharedTelemetry {
    recorder: Mutex<CriticalSectionRawMutex, RefCell<FirmwareRecorder>>,
}

impl SharedTelemetry {
    pub const fn new() -> Self {
        Self {
            recorder: Mutex::new(RefCell::new(TelemetryRecorder::new())),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut FirmwareRecorder) -> R) -> R {
        self.recorder.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn len(&self) -> usize {
        self.with(|recorder| recorder.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interrupt path: no log output.
    pub fn record_match(
        &self,
        class: OutputClass,
        channel: usize,
        outcome: MatchOutcome,
        timestamp: FirmwareInstant,
    ) {
        self.with(|recorder| {
            recorder.record_match(channel_ref(class, channel), outcome, timestamp);
        });
    }

    pub fn record_resync(&self, width: SyncWidth, report: ResyncReport, timestamp: FirmwareInstant) {
        self.with(|recorder| recorder.record_resync(report, width, timestamp));
        for (class, outcome) in [
            (OutputClass::Fuel, report.fuel),
            (OutputClass::Ignition, report.ignition),
        ] {
            if outcome != ResyncOutcome::NotApplicable {
                emit_log(
                    resync_label(width),
                    class.label(),
                    Detail::Label(outcome.label()),
                    timestamp.as_micros(),
                );
            }
        }
    }

    pub fn record_overdwell(&self, forced: u8, timestamp: FirmwareInstant) {
        if forced == 0 {
            return;
        }
        self.with(|recorder| recorder.record_overdwell(forced, timestamp));
        emit_log(
            "overdwell",
            "ignition",
            Detail::Value(u32::from(forced)),
            timestamp.as_micros(),
        );
    }

    pub fn record_configured(&self, assignment: &ChannelAssignment, timestamp: FirmwareInstant) {
        self.with(|recorder| recorder.record_configured(assignment, timestamp));
        emit_log(
            "configured",
            assignment.effective.spark_mode.label(),
            Detail::Value(u32::from(assignment.fallbacks.bits())),
            timestamp.as_micros(),
        );
    }

    pub fn record_stop(&self, timestamp: FirmwareInstant) {
        self.with(|recorder| recorder.record_stop(timestamp));
        emit_log("stopped", "engine", Detail::None, timestamp.as_micros());
    }

    pub fn record_bench(&self, bench: BenchTelemetry, timestamp: FirmwareInstant) {
        self.with(|recorder| recorder.record_bench(bench, timestamp));
        emit_log(
            if bench.energized { "bench-on" } else { "bench-off" },
            bench.class.label(),
            Detail::Value(u32::from(bench.output.number())),
            timestamp.as_micros(),
        );
    }
}

impl Default for SharedTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

const fn resync_label(width: SyncWidth) -> &'static str {
    match width {
        SyncWidth::Half => "resync-half",
        SyncWidth::Full => "resync-full",
    }
}

#[derive(Copy, Clone, Debug)]
enum Detail {
    None,
    Value(u32),
    Label(&'static str),
}

#[cfg(target_os = "none")]
fn emit_log(event: &'static str, subject: &'static str, detail: Detail, timestamp_us: u64) {
    match detail {
        Detail::None => defmt::info!("telemetry:engine {} {} t={}us", event, subject, timestamp_us),
        Detail::Value(value) => defmt::info!(
            "telemetry:engine {} {} v={=u32:#x} t={}us",
            event,
            subject,
            value,
            timestamp_us
        ),
        Detail::Label(label) => defmt::info!(
            "telemetry:engine {} {} {} t={}us",
            event,
            subject,
            label,
            timestamp_us
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(event: &'static str, subject: &'static str, detail: Detail, timestamp_us: u64) {
    match detail {
        Detail::None => println!("telemetry:engine {event} {subject} t={timestamp_us}us"),
        Detail::Value(value) => {
            println!("telemetry:engine {event} {subject} v={value:#x} t={timestamp_us}us");
        }
        Detail::Label(label) => {
            println!("telemetry:engine {event} {subject} {label} t={timestamp_us}us");
        }
    }
}
