#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Counters shared between the compare interrupt and the async tasks.
//!
//! The interrupt only bumps atomics; the console folds them into its
//! `status` output and housekeeping logs them periodically.

use ecu_core::output::OutputClass;
use ecu_core::schedule::MatchOutcome;
use portable_atomic::{AtomicU32, Ordering};

static FUEL_EDGES: AtomicU32 = AtomicU32::new(0);
static IGNITION_EDGES: AtomicU32 = AtomicU32::new(0);
/// Compare matches that found nothing armed.
static SPURIOUS: AtomicU32 = AtomicU32::new(0);
/// Coils forced off by the dwell limit.
static OVERDWELL: AtomicU32 = AtomicU32::new(0);
/// Resync attempts that had to be retried.
static DEFERRED_RESYNCS: AtomicU32 = AtomicU32::new(0);

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Counters {
    pub fuel_edges: u32,
    pub ignition_edges: u32,
    pub spurious: u32,
    pub overdwell: u32,
    pub deferred_resyncs: u32,
}

/// Counts the output edges one compare match produced.
pub fn record_match(class: OutputClass, outcome: MatchOutcome) {
    let edges = match outcome {
        MatchOutcome::Began | MatchOutcome::Ended | MatchOutcome::EndedQueuedPending => 1,
        MatchOutcome::Chained => 2,
        MatchOutcome::Spurious => {
            SPURIOUS.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    let counter = match class {
        OutputClass::Fuel => &FUEL_EDGES,
        OutputClass::Ignition => &IGNITION_EDGES,
    };
    counter.fetch_add(edges, Ordering::Relaxed);
}

/// Adds every coil set in `forced` (bit 0 = channel 1).
pub fn record_overdwell(forced: u8) {
    OVERDWELL.fetch_add(forced.count_ones(), Ordering::Relaxed);
}

pub fn record_deferred_resync() {
    DEFERRED_RESYNCS.fetch_add(1, Ordering::Relaxed);
}

pub fn counters() -> Counters {
    Counters {
        fuel_edges: FUEL_EDGES.load(Ordering::Relaxed),
        ignition_edges: IGNITION_EDGES.load(Ordering::Relaxed),
        spurious: SPURIOUS.load(Ordering::Relaxed),
        overdwell: OVERDWELL.load(Ordering::Relaxed),
        deferred_resyncs: DEFERRED_RESYNCS.load(Ordering::Relaxed),
    }
}

impl Counters {
    /// Appends the counter line to a console response.
    pub fn write_line<W: core::fmt::Write>(&self, writer: &mut W) -> core::fmt::Result {
        writeln!(
            writer,
            "counters fuel={} ignition={} spurious={} overdwell={} deferred={}",
            self.fuel_edges,
            self.ignition_edges,
            self.spurious,
            self.overdwell,
            self.deferred_resyncs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_matches_count_both_edges() {
        let before = counters();
        record_match(OutputClass::Ignition, MatchOutcome::Chained);
        record_match(OutputClass::Ignition, MatchOutcome::Spurious);
        record_overdwell(0b0000_0110);
        let after = counters();

        assert_eq!(after.ignition_edges - before.ignition_edges, 2);
        assert_eq!(after.spurious - before.spurious, 1);
        assert_eq!(after.overdwell - before.overdwell, 2);
    }

    #[test]
    fn counter_line_lists_every_field() {
        let mut line = heapless::String::<96>::new();
        Counters {
            fuel_edges: 4,
            ..Counters::default()
        }
        .write_line(&mut line)
        .unwrap();
        assert_eq!(
            line.as_str(),
            "counters fuel=4 ignition=0 spurious=0 overdwell=0 deferred=0\n"
        );
    }
}
