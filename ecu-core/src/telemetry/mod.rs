//! Telemetry event catalog and the fixed-size ring front-ends record into.
//!
//! The engine never logs by itself. Interrupt glue and consoles translate
//! what the engine returns ([`MatchOutcome`], [`ResyncReport`], the resolved
//! assignment) into [`TelemetryEventKind`]s, which encode to compact numeric
//! codes for transport over diagnostics channels.

use core::{convert::TryFrom, fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::assignment::{ChannelAssignment, Fallbacks, SyncWidth};
use crate::engine::{ResyncOutcome, ResyncReport};
use crate::output::{MAX_OUTPUTS, OutputClass, OutputId};
use crate::schedule::MatchOutcome;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Logical channel within a class, 0-based.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelRef {
    pub class: OutputClass,
    pub channel: u8,
}

impl ChannelRef {
    #[must_use]
    pub const fn new(class: OutputClass, channel: u8) -> Self {
        Self { class, channel }
    }

    const fn code(self) -> u16 {
        let base = match self.class {
            OutputClass::Fuel => 0,
            OutputClass::Ignition => MAX_OUTPUTS as u16,
        };
        base + (self.channel as u16 & 0x7)
    }

    const fn from_code(code: u16) -> Self {
        let class = if code >= MAX_OUTPUTS as u16 {
            OutputClass::Ignition
        } else {
            OutputClass::Fuel
        };
        #[allow(clippy::cast_possible_truncation)]
        let channel = (code & 0x7) as u8;
        Self { class, channel }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class, self.channel + 1)
    }
}

/// Discriminated telemetry events shared across all targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    ChannelBegan(ChannelRef),
    ChannelEnded(ChannelRef),
    /// End and the queued begin ran in the same handler.
    ChannelChained(ChannelRef),
    ArmRejected(ChannelRef),
    Overdwell(u8),
    ResyncApplied(OutputClass),
    ResyncDeferred(OutputClass),
    Configured,
    EngineStopped,
    BenchAction,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::ChannelBegan(channel) => write!(f, "began {channel}"),
            TelemetryEventKind::ChannelEnded(channel) => write!(f, "ended {channel}"),
            TelemetryEventKind::ChannelChained(channel) => write!(f, "chained {channel}"),
            TelemetryEventKind::ArmRejected(channel) => write!(f, "arm-rejected {channel}"),
            TelemetryEventKind::Overdwell(channel) => write!(f, "overdwell ignition{}", channel + 1),
            TelemetryEventKind::ResyncApplied(class) => write!(f, "resync-applied {class}"),
            TelemetryEventKind::ResyncDeferred(class) => write!(f, "resync-deferred {class}"),
            TelemetryEventKind::Configured => f.write_str("configured"),
            TelemetryEventKind::EngineStopped => f.write_str("engine-stopped"),
            TelemetryEventKind::BenchAction => f.write_str("bench-action"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const BEGAN_BASE: u16 = 0x0000;
    const ENDED_BASE: u16 = 0x0010;
    const CHAINED_BASE: u16 = 0x0020;
    const ARM_REJECTED_BASE: u16 = 0x0030;
    const OVERDWELL_BASE: u16 = 0x0040;
    const RESYNC_APPLIED_BASE: u16 = 0x0048;
    const RESYNC_DEFERRED_BASE: u16 = 0x004A;
    const CONFIGURED_CODE: u16 = 0x0050;
    const ENGINE_STOPPED_CODE: u16 = 0x0051;
    const BENCH_ACTION_CODE: u16 = 0x0052;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::ChannelBegan(channel) => Self::BEGAN_BASE + channel.code(),
            TelemetryEventKind::ChannelEnded(channel) => Self::ENDED_BASE + channel.code(),
            TelemetryEventKind::ChannelChained(channel) => Self::CHAINED_BASE + channel.code(),
            TelemetryEventKind::ArmRejected(channel) => Self::ARM_REJECTED_BASE + channel.code(),
            TelemetryEventKind::Overdwell(channel) => Self::OVERDWELL_BASE + (channel as u16 & 0x7),
            TelemetryEventKind::ResyncApplied(class) => Self::RESYNC_APPLIED_BASE + class_index(class),
            TelemetryEventKind::ResyncDeferred(class) => {
                Self::RESYNC_DEFERRED_BASE + class_index(class)
            }
            TelemetryEventKind::Configured => Self::CONFIGURED_CODE,
            TelemetryEventKind::EngineStopped => Self::ENGINE_STOPPED_CODE,
            TelemetryEventKind::BenchAction => Self::BENCH_ACTION_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub const fn from_raw(code: u16) -> Self {
        match code {
            Self::CONFIGURED_CODE => TelemetryEventKind::Configured,
            Self::ENGINE_STOPPED_CODE => TelemetryEventKind::EngineStopped,
            Self::BENCH_ACTION_CODE => TelemetryEventKind::BenchAction,
            value if value < Self::ENDED_BASE => {
                TelemetryEventKind::ChannelBegan(ChannelRef::from_code(value - Self::BEGAN_BASE))
            }
            value if value < Self::CHAINED_BASE => {
                TelemetryEventKind::ChannelEnded(ChannelRef::from_code(value - Self::ENDED_BASE))
            }
            value if value < Self::ARM_REJECTED_BASE => TelemetryEventKind::ChannelChained(
                ChannelRef::from_code(value - Self::CHAINED_BASE),
            ),
            value if value < Self::OVERDWELL_BASE => TelemetryEventKind::ArmRejected(
                ChannelRef::from_code(value - Self::ARM_REJECTED_BASE),
            ),
            value if value < Self::RESYNC_APPLIED_BASE => {
                #[allow(clippy::cast_possible_truncation)]
                let channel = (value - Self::OVERDWELL_BASE) as u8;
                TelemetryEventKind::Overdwell(channel)
            }
            value if value < Self::RESYNC_DEFERRED_BASE => {
                TelemetryEventKind::ResyncApplied(class_from_index(value - Self::RESYNC_APPLIED_BASE))
            }
            value if value < Self::RESYNC_DEFERRED_BASE + 2 => TelemetryEventKind::ResyncDeferred(
                class_from_index(value - Self::RESYNC_DEFERRED_BASE),
            ),
            other => TelemetryEventKind::Custom(other),
        }
    }
}

const fn class_index(class: OutputClass) -> u16 {
    match class {
        OutputClass::Fuel => 0,
        OutputClass::Ignition => 1,
    }
}

const fn class_from_index(index: u16) -> OutputClass {
    if index == 0 {
        OutputClass::Fuel
    } else {
        OutputClass::Ignition
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    None,
    /// Time the channel stayed energized, when its begin was recorded.
    Energized(Option<Duration>),
    Resync(SyncWidth),
    Config(ConfigTelemetry),
    Bench(BenchTelemetry),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Summary of an installed assignment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConfigTelemetry {
    pub fallbacks: Fallbacks,
    pub fuel_channels: u8,
    pub ignition_channels: u8,
}

/// Output touched by a bench command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BenchTelemetry {
    pub class: OutputClass,
    pub output: OutputId,
    pub energized: bool,
}

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Monotonic instants the recorder can measure between.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    began_at: [Option<TInstant>; 2 * MAX_OUTPUTS],
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            began_at: [None; 2 * MAX_OUTPUTS],
            next_event_id: 0,
        }
    }

    /// Iterates the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records a compare match, measuring energized time across begin/end.
    ///
    /// Spurious matches are not recorded.
    pub fn record_match(
        &mut self,
        channel: ChannelRef,
        outcome: MatchOutcome,
        timestamp: TInstant,
    ) -> Option<EventId> {
        let slot = usize::from(channel.code());
        let energized = self
            .began_at
            .get(slot)
            .copied()
            .flatten()
            .map(|began| timestamp.saturating_duration_since(began));

        let (event, payload) = match outcome {
            MatchOutcome::Began => {
                self.mark_began(slot, Some(timestamp));
                (TelemetryEventKind::ChannelBegan(channel), TelemetryPayload::None)
            }
            MatchOutcome::Ended | MatchOutcome::EndedQueuedPending => {
                self.mark_began(slot, None);
                (
                    TelemetryEventKind::ChannelEnded(channel),
                    TelemetryPayload::Energized(energized),
                )
            }
            MatchOutcome::Chained => {
                self.mark_began(slot, Some(timestamp));
                (
                    TelemetryEventKind::ChannelChained(channel),
                    TelemetryPayload::Energized(energized),
                )
            }
            MatchOutcome::Spurious => return None,
        };

        Some(self.record(event, payload, timestamp))
    }

    fn mark_began(&mut self, slot: usize, at: Option<TInstant>) {
        if let Some(entry) = self.began_at.get_mut(slot) {
            *entry = at;
        }
    }

    /// Records the applied or deferred halves of a resynchronisation.
    pub fn record_resync(
        &mut self,
        report: ResyncReport,
        width: SyncWidth,
        timestamp: TInstant,
    ) -> usize {
        let mut recorded = 0;
        for (class, outcome) in [
            (OutputClass::Fuel, report.fuel),
            (OutputClass::Ignition, report.ignition),
        ] {
            let event = match outcome {
                ResyncOutcome::Applied => TelemetryEventKind::ResyncApplied(class),
                ResyncOutcome::Deferred => TelemetryEventKind::ResyncDeferred(class),
                ResyncOutcome::NotApplicable => continue,
            };
            self.record(event, TelemetryPayload::Resync(width), timestamp);
            recorded += 1;
        }
        recorded
    }

    pub fn record_configured(
        &mut self,
        assignment: &ChannelAssignment,
        timestamp: TInstant,
    ) -> EventId {
        self.began_at = [None; 2 * MAX_OUTPUTS];
        let payload = TelemetryPayload::Config(ConfigTelemetry {
            fallbacks: assignment.fallbacks,
            fuel_channels: assignment.fuel.enabled_count(),
            ignition_channels: assignment.ignition.enabled_count(),
        });
        self.record(TelemetryEventKind::Configured, payload, timestamp)
    }

    /// Records one overdwell event per coil in `forced` (bit 0 = channel 1).
    pub fn record_overdwell(&mut self, forced: u8, timestamp: TInstant) -> usize {
        let mut recorded = 0;
        for channel in (0..MAX_OUTPUTS).filter(|channel| forced & (1 << channel) != 0) {
            let slot = usize::from(channel_ref(OutputClass::Ignition, channel).code());
            self.mark_began(slot, None);
            #[allow(clippy::cast_possible_truncation)]
            let event = TelemetryEventKind::Overdwell(channel as u8);
            self.record(event, TelemetryPayload::None, timestamp);
            recorded += 1;
        }
        recorded
    }

    pub fn record_stop(&mut self, timestamp: TInstant) -> EventId {
        self.began_at = [None; 2 * MAX_OUTPUTS];
        self.record(
            TelemetryEventKind::EngineStopped,
            TelemetryPayload::None,
            timestamp,
        )
    }

    pub fn record_bench(&mut self, bench: BenchTelemetry, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::BenchAction,
            TelemetryPayload::Bench(bench),
            timestamp,
        )
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clamps a channel index into the `u8` carried by [`ChannelRef`].
#[must_use]
pub fn channel_ref(class: OutputClass, channel: usize) -> ChannelRef {
    ChannelRef::new(class, u8::try_from(channel).unwrap_or(u8::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct Ticks(u64);

    impl TelemetryInstant for Ticks {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn event_codes_decode_to_the_same_event() {
        let events = [
            TelemetryEventKind::ChannelBegan(ChannelRef::new(OutputClass::Ignition, 7)),
            TelemetryEventKind::ChannelEnded(ChannelRef::new(OutputClass::Fuel, 0)),
            TelemetryEventKind::ChannelChained(ChannelRef::new(OutputClass::Fuel, 3)),
            TelemetryEventKind::ArmRejected(ChannelRef::new(OutputClass::Ignition, 1)),
            TelemetryEventKind::Overdwell(5),
            TelemetryEventKind::ResyncApplied(OutputClass::Ignition),
            TelemetryEventKind::ResyncDeferred(OutputClass::Fuel),
            TelemetryEventKind::Configured,
            TelemetryEventKind::EngineStopped,
            TelemetryEventKind::BenchAction,
        ];
        for event in events {
            assert_eq!(TelemetryEventKind::from_raw(event.to_raw()), event);
        }
        assert_eq!(
            TelemetryEventKind::from_raw(0x0400),
            TelemetryEventKind::Custom(0x0400)
        );
    }

    #[test]
    fn end_records_energized_time() {
        let mut recorder: TelemetryRecorder<Ticks, 8> = TelemetryRecorder::new();
        let channel = ChannelRef::new(OutputClass::Fuel, 2);
        recorder.record_match(channel, MatchOutcome::Began, Ticks(100));
        recorder.record_match(channel, MatchOutcome::Ended, Ticks(2_600));
        assert_eq!(
            recorder.record_match(channel, MatchOutcome::Spurious, Ticks(2_700)),
            None
        );

        let latest = recorder.latest().unwrap();
        assert_eq!(latest.event, TelemetryEventKind::ChannelEnded(channel));
        assert_eq!(
            latest.details,
            TelemetryPayload::Energized(Some(Duration::from_micros(2_500)))
        );
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn overdwell_mask_records_each_coil() {
        let mut recorder: TelemetryRecorder<Ticks, 8> = TelemetryRecorder::new();
        assert_eq!(recorder.record_overdwell(0b0000_0101, Ticks(10)), 2);
        assert_eq!(recorder.record_overdwell(0, Ticks(20)), 0);

        let events: heapless::Vec<TelemetryEventKind, 4> =
            recorder.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[
                TelemetryEventKind::Overdwell(0),
                TelemetryEventKind::Overdwell(2)
            ]
        );
    }
}
