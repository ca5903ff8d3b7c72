//! Channel assignment: which physical outputs each logical channel drives,
//! at which crank angle, and over which domain.
//!
//! [`resolve`] is deterministic. Combinations the board or the engine cannot
//! support degrade to the nearest supported mode and raise a flag in
//! [`Fallbacks`] so diagnostics can report what actually runs. The half/full
//! synchronisation transforms are pure functions of the resolved assignment;
//! applying one and then the other restores the original tables exactly.

mod angles;

use core::fmt;

pub use angles::{ROTARY_ANGLES, apply_engine_type, even_angle, half_cycle_channels};

use crate::config::{
    BoardCapabilities, Cylinders, EngineConfig, InjectionLayout, InjectionTiming, InjectorPairing,
    InjectorType, RotaryType, SparkMode, Strokes,
};
use crate::output::{
    ChannelCallbacks, MAX_OUTPUTS, OutputCall, OutputClass, OutputId, Polarity,
};

/// Mode degradations applied while resolving a configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct Fallbacks(u8);

impl Fallbacks {
    pub const SEQUENTIAL_IGNITION_TO_WASTED: Self = Self(1 << 0);
    pub const SEQUENTIAL_FUEL_TO_SEMI: Self = Self(1 << 1);
    pub const WASTED_COP_TO_WASTED: Self = Self(1 << 2);
    pub const SEMI_SEQUENTIAL_TO_PAIRED: Self = Self(1 << 3);
    pub const STAGING_DISABLED: Self = Self(1 << 4);
    pub const ROTARY_TO_WASTED: Self = Self(1 << 5);

    const LABELS: [(Self, &'static str); 6] = [
        (Self::SEQUENTIAL_IGNITION_TO_WASTED, "seq-ign->wasted"),
        (Self::SEQUENTIAL_FUEL_TO_SEMI, "seq-fuel->semi"),
        (Self::WASTED_COP_TO_WASTED, "cop->wasted"),
        (Self::SEMI_SEQUENTIAL_TO_PAIRED, "semi->paired"),
        (Self::STAGING_DISABLED, "staging-off"),
        (Self::ROTARY_TO_WASTED, "rotary->wasted"),
    ];

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Short labels of every raised flag, in bit order.
    pub fn labels(self) -> impl Iterator<Item = &'static str> {
        Self::LABELS
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, label)| label)
    }
}

impl fmt::Display for Fallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        for (index, label) in self.labels().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            f.write_str(label)?;
        }
        Ok(())
    }
}

/// Crank-angle synchronisation width the decoder currently provides.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum SyncWidth {
    /// Strokes cannot be told apart; events repeat every 360 degrees.
    Half,
    /// Cam sync available; events can be placed anywhere in 720 degrees.
    #[default]
    Full,
}

impl SyncWidth {
    pub const fn label(self) -> &'static str {
        match self {
            SyncWidth::Half => "half",
            SyncWidth::Full => "full",
        }
    }
}

impl fmt::Display for SyncWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rescaling applied to the base pulse width for the resolved channel count.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum DurationScale {
    #[default]
    Unchanged,
    /// One squirt over the full cycle instead of two.
    Doubled,
    /// Squirt count forced up to two.
    Halved,
}

impl DurationScale {
    #[must_use]
    pub const fn apply(self, base_us: u32) -> u32 {
        match self {
            DurationScale::Unchanged => base_us,
            DurationScale::Doubled => base_us.saturating_mul(2),
            DurationScale::Halved => base_us / 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct ChannelSlot {
    pub enabled: bool,
    /// Offset within the class domain, in crank degrees.
    pub angle: u16,
    pub callbacks: ChannelCallbacks,
}

impl ChannelSlot {
    pub const DISABLED: Self = Self {
        enabled: false,
        angle: 0,
        callbacks: ChannelCallbacks::INHIBITED,
    };

    pub const fn new(angle: u16, callbacks: ChannelCallbacks) -> Self {
        Self {
            enabled: true,
            angle,
            callbacks,
        }
    }
}

/// Channel table for one output class.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClassTable {
    slots: [ChannelSlot; MAX_OUTPUTS],
    domain: u16,
    sync: SyncWidth,
}

impl ClassTable {
    const fn empty(domain: u16, sync: SyncWidth) -> Self {
        Self {
            slots: [ChannelSlot::DISABLED; MAX_OUTPUTS],
            domain,
            sync,
        }
    }

    fn set(&mut self, index: usize, slot: ChannelSlot) {
        if let Some(entry) = self.slots.get_mut(index) {
            *entry = slot;
        }
    }

    pub fn slots(&self) -> &[ChannelSlot; MAX_OUTPUTS] {
        &self.slots
    }

    pub fn slot(&self, channel: usize) -> Option<&ChannelSlot> {
        self.slots.get(channel)
    }

    /// Degrees after which the channel's events repeat.
    pub const fn domain(&self) -> u16 {
        self.domain
    }

    pub const fn sync(&self) -> SyncWidth {
        self.sync
    }

    pub fn enabled_count(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.slots.iter().filter(|slot| slot.enabled).count() as u8;
        count
    }

    /// Bitmask (bit 0 = channel 1) of enabled channels.
    pub fn enabled_mask(&self) -> u8 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.enabled)
            .fold(0, |mask, (index, _)| mask | (1 << index))
    }

    /// Angles of the enabled channels in channel order.
    pub fn angles(&self) -> heapless::Vec<u16, MAX_OUTPUTS> {
        self.slots
            .iter()
            .filter(|slot| slot.enabled)
            .map(|slot| slot.angle)
            .collect()
    }
}

/// Fuel side of a resolved configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct FuelLayout {
    table: ClassTable,
    n_squirts: u8,
    scale: DurationScale,
    /// Outputs used by primary injectors; secondaries start after them.
    primary_outputs: u8,
}

/// Outcome of resolving an [`EngineConfig`] against a board.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelAssignment {
    pub fuel: ClassTable,
    pub ignition: ClassTable,
    /// Squirts per engine cycle on the fuel side.
    pub n_squirts: u8,
    pub duration_scale: DurationScale,
    /// Coil polarity to apply; rotary layouts force active high.
    pub ignition_polarity: Polarity,
    pub fallbacks: Fallbacks,
    /// Configuration after fallbacks were applied.
    pub effective: EngineConfig,
}

impl ChannelAssignment {
    pub const fn table(&self, class: OutputClass) -> &ClassTable {
        match class {
            OutputClass::Fuel => &self.fuel,
            OutputClass::Ignition => &self.ignition,
        }
    }

    /// Scaled pulse width handed to the fuel schedules.
    pub const fn req_fuel_us(&self) -> u32 {
        self.duration_scale.apply(self.effective.req_fuel_us)
    }

    /// Returns `true` when `class` has a layout that depends on the sync width.
    pub const fn supports_resync(&self, class: OutputClass) -> bool {
        let paired_cylinders = self.effective.cylinders.is_even();
        match class {
            OutputClass::Fuel => {
                paired_cylinders
                    && matches!(self.effective.injection_layout, InjectionLayout::Sequential)
            }
            OutputClass::Ignition => {
                paired_cylinders && matches!(self.effective.spark_mode, SparkMode::Sequential)
            }
        }
    }

    /// Rebuilds one class for `width`; `None` when nothing would change.
    #[must_use]
    pub fn resync(&self, class: OutputClass, width: SyncWidth) -> Option<Self> {
        if !self.supports_resync(class) || self.table(class).sync == width {
            return None;
        }

        let mut next = *self;
        match class {
            OutputClass::Fuel => {
                let layout = fuel_layout(&self.effective, width);
                next.fuel = layout.table;
                next.n_squirts = layout.n_squirts;
                next.duration_scale = layout.scale;
            }
            OutputClass::Ignition => next.ignition = ignition_table(&self.effective, width),
        }
        Some(next)
    }

    /// Both classes moved to the 360 degree domain where applicable.
    #[must_use]
    pub fn to_half_sync(&self) -> Self {
        self.resync_all(SyncWidth::Half)
    }

    /// Both classes moved back to the 720 degree domain where applicable.
    #[must_use]
    pub fn to_full_sync(&self) -> Self {
        self.resync_all(SyncWidth::Full)
    }

    fn resync_all(&self, width: SyncWidth) -> Self {
        let fuel = self.resync(OutputClass::Fuel, width).unwrap_or(*self);
        fuel.resync(OutputClass::Ignition, width).unwrap_or(fuel)
    }
}

/// Resolves channel tables for `config` on a board with `caps` outputs.
#[must_use]
pub fn resolve(config: &EngineConfig, caps: BoardCapabilities) -> ChannelAssignment {
    let mut fallbacks = Fallbacks::empty();
    let effective = effective_config(config, caps, &mut fallbacks);

    let fuel = fuel_layout(&effective, SyncWidth::Full);
    let ignition = ignition_table(&effective, SyncWidth::Full);
    let ignition_polarity = match effective.spark_mode {
        SparkMode::Rotary(_) => Polarity::ActiveHigh,
        _ => effective.ignition_polarity,
    };

    ChannelAssignment {
        fuel: fuel.table,
        ignition,
        n_squirts: fuel.n_squirts,
        duration_scale: fuel.scale,
        ignition_polarity,
        fallbacks,
        effective,
    }
}

fn effective_config(
    config: &EngineConfig,
    caps: BoardCapabilities,
    fallbacks: &mut Fallbacks,
) -> EngineConfig {
    let mut effective = *config;
    let cylinders = config.cylinders.count();
    let four_stroke = config.strokes == Strokes::Four;

    effective.spark_mode = match config.spark_mode {
        SparkMode::Sequential if !four_stroke || cylinders > caps.ignition_outputs => {
            fallbacks.insert(Fallbacks::SEQUENTIAL_IGNITION_TO_WASTED);
            SparkMode::Wasted
        }
        SparkMode::WastedCop
            if !config.cylinders.is_even() || !four_stroke || cylinders > caps.ignition_outputs =>
        {
            fallbacks.insert(Fallbacks::WASTED_COP_TO_WASTED);
            SparkMode::Wasted
        }
        SparkMode::Rotary(_) if config.cylinders != Cylinders::Four || caps.ignition_outputs < 4 => {
            fallbacks.insert(Fallbacks::ROTARY_TO_WASTED);
            SparkMode::Wasted
        }
        other => other,
    };

    if effective.injection_layout == InjectionLayout::Sequential
        && (!four_stroke || cylinders > caps.fuel_outputs)
    {
        fallbacks.insert(Fallbacks::SEQUENTIAL_FUEL_TO_SEMI);
        effective.injection_layout = InjectionLayout::SemiSequential;
    }

    if effective.injection_layout == InjectionLayout::SemiSequential
        && (cylinders < 4
            || !config.cylinders.is_even()
            || !four_stroke
            || cylinders > caps.fuel_outputs)
    {
        fallbacks.insert(Fallbacks::SEMI_SEQUENTIAL_TO_PAIRED);
        effective.injection_layout = InjectionLayout::Paired;
    }

    if effective.staging_enabled {
        let unstaged = EngineConfig {
            staging_enabled: false,
            ..effective
        };
        let primaries = fuel_layout(&unstaged, SyncWidth::Full).primary_outputs;
        if primaries.saturating_mul(2) > caps.fuel_outputs.min(MAX_OUTPUTS_U8) {
            fallbacks.insert(Fallbacks::STAGING_DISABLED);
            effective.staging_enabled = false;
        }
    }

    effective
}

#[allow(clippy::cast_possible_truncation)]
const MAX_OUTPUTS_U8: u8 = MAX_OUTPUTS as u8;

fn output(index: u8) -> OutputId {
    OutputId::from_index(usize::from(index)).unwrap_or(OutputId::O1)
}

/// Secondary injector mirroring `primary` once `offset` primaries are wired.
fn secondary(offset: u8, primary: OutputId) -> OutputId {
    OutputId::from_index(usize::from(offset) + primary.index()).unwrap_or(OutputId::O1)
}

/// Second output of a semi-sequential injector pair on the same channel.
fn fuel_partner(config: &EngineConfig, index: u8, channels: u8) -> OutputId {
    if config.cylinders == Cylinders::Four
        && config.injector_pairing == InjectorPairing::Cyl14Cyl23
    {
        // 1 with 4, 2 with 3
        return output(3 - index);
    }
    output(index + channels)
}

fn fuel_layout(config: &EngineConfig, width: SyncWidth) -> FuelLayout {
    let cylinders = config.cylinders.count();
    let cycle = config.strokes.cycle_degrees();

    let (mut table, n_squirts, scale, primaries) =
        if config.injection_layout == InjectionLayout::Sequential && width == SyncWidth::Full {
            let mut table = ClassTable::empty(cycle, SyncWidth::Full);
            for index in 0..cylinders {
                let angle = apply_engine_type(
                    even_angle(index, cylinders, cycle),
                    index,
                    config.engine_type,
                    cycle,
                );
                let callbacks = ChannelCallbacks::single(output(index));
                table.set(usize::from(index), ChannelSlot::new(angle, callbacks));
            }
            (table, 1, DurationScale::Doubled, cylinders)
        } else if config.injection_layout == InjectionLayout::Sequential {
            // Lost cam sync: cylinders 360 degrees apart share one squirt.
            let channels = cylinders / 2;
            let mut table = ClassTable::empty(360, SyncWidth::Half);
            for index in 0..channels {
                let angle = apply_engine_type(
                    even_angle(index, cylinders, cycle),
                    index,
                    config.engine_type,
                    360,
                );
                let callbacks =
                    ChannelCallbacks::pair(output(index), fuel_partner(config, index, channels));
                table.set(usize::from(index), ChannelSlot::new(angle, callbacks));
            }
            (table, 2, DurationScale::Unchanged, cylinders)
        } else {
            non_sequential_fuel(config)
        };

    if config.staging_enabled {
        let primary_table = table;
        for (index, slot) in primary_table.slots.iter().enumerate() {
            if !slot.enabled {
                continue;
            }
            let callbacks = match slot.callbacks.begin {
                OutputCall::Pair(first, partner) => ChannelCallbacks::pair(
                    secondary(primaries, first),
                    secondary(primaries, partner),
                ),
                OutputCall::Single(first) => ChannelCallbacks::single(secondary(primaries, first)),
                _ => continue,
            };
            table.set(
                usize::from(primaries) + index,
                ChannelSlot::new(slot.angle, callbacks),
            );
        }
    }

    FuelLayout {
        table,
        n_squirts,
        scale,
        primary_outputs: primaries,
    }
}

fn non_sequential_fuel(config: &EngineConfig) -> (ClassTable, u8, DurationScale, u8) {
    let cycle = config.strokes.cycle_degrees();
    let channels = half_cycle_channels(config.cylinders, config.strokes);

    let mut squirts = config.squirts_per_cycle.max(1);
    let mut scale = DurationScale::Unchanged;
    if config.cylinders == Cylinders::Three && config.injector_type == InjectorType::Port {
        // Individual port injectors on a triple always squirt twice per cycle.
        squirts = 2;
        scale = DurationScale::Halved;
    }
    let domain = cycle / u16::from(squirts);

    let mut table = ClassTable::empty(domain, SyncWidth::Full);
    for index in 0..channels {
        let mut angle = even_angle(index, channels, 360);
        if squirts > 2 {
            angle = angle * 2 / u16::from(squirts);
        }
        angle = apply_engine_type(angle, index, config.engine_type, domain);
        if config.injection_timing == InjectionTiming::Simultaneous {
            angle = 0;
        }

        let callbacks = if config.injection_layout == InjectionLayout::SemiSequential {
            ChannelCallbacks::pair(output(index), fuel_partner(config, index, channels))
        } else {
            ChannelCallbacks::single(output(index))
        };
        table.set(usize::from(index), ChannelSlot::new(angle, callbacks));
    }

    let primaries = if config.injection_layout == InjectionLayout::SemiSequential {
        config.cylinders.count()
    } else {
        channels
    };
    (table, squirts, scale, primaries)
}

fn ignition_table(config: &EngineConfig, width: SyncWidth) -> ClassTable {
    let cylinders = config.cylinders.count();
    let cycle = config.strokes.cycle_degrees();

    match config.spark_mode {
        SparkMode::Sequential if width == SyncWidth::Full => {
            let mut table = ClassTable::empty(cycle, SyncWidth::Full);
            for index in 0..cylinders {
                let angle = apply_engine_type(
                    even_angle(index, cylinders, cycle),
                    index,
                    config.engine_type,
                    cycle,
                );
                table.set(
                    usize::from(index),
                    ChannelSlot::new(angle, ChannelCallbacks::single(output(index))),
                );
            }
            table
        }
        SparkMode::Sequential | SparkMode::WastedCop => {
            let channels = cylinders / 2;
            let sync = if config.spark_mode == SparkMode::Sequential {
                SyncWidth::Half
            } else {
                SyncWidth::Full
            };
            let mut table = ClassTable::empty(360, sync);
            for index in 0..channels {
                let angle = apply_engine_type(
                    even_angle(index, channels, 360),
                    index,
                    config.engine_type,
                    360,
                );
                let callbacks = ChannelCallbacks::pair(output(index), output(index + channels));
                table.set(usize::from(index), ChannelSlot::new(angle, callbacks));
            }
            table
        }
        SparkMode::Wasted | SparkMode::Single => {
            let channels = half_cycle_channels(config.cylinders, config.strokes);
            let mut table = ClassTable::empty(360, SyncWidth::Full);
            for index in 0..channels {
                let angle = apply_engine_type(
                    even_angle(index, channels, 360),
                    index,
                    config.engine_type,
                    360,
                );
                // A single distributor coil fires for every channel.
                let coil = if config.spark_mode == SparkMode::Single {
                    OutputId::O1
                } else {
                    output(index)
                };
                table.set(
                    usize::from(index),
                    ChannelSlot::new(angle, ChannelCallbacks::single(coil)),
                );
            }
            table
        }
        SparkMode::Rotary(rotary) => rotary_table(rotary),
    }
}

fn rotary_table(rotary: RotaryType) -> ClassTable {
    let leading = ChannelCallbacks::single(OutputId::O1);
    let trailing = match rotary {
        RotaryType::Fc => [
            ChannelCallbacks::new(OutputCall::TrailingBegin, OutputCall::TrailingEnd1),
            ChannelCallbacks::new(OutputCall::TrailingBegin, OutputCall::TrailingEnd2),
        ],
        RotaryType::Fd => [
            ChannelCallbacks::single(OutputId::O2),
            ChannelCallbacks::single(OutputId::O3),
        ],
        RotaryType::Rx8 => [
            ChannelCallbacks::single(OutputId::O3),
            ChannelCallbacks::single(OutputId::O4),
        ],
    };
    let second_leading = match rotary {
        RotaryType::Rx8 => ChannelCallbacks::single(OutputId::O2),
        RotaryType::Fc | RotaryType::Fd => leading,
    };

    let mut table = ClassTable::empty(360, SyncWidth::Full);
    let callbacks = [leading, second_leading, trailing[0], trailing[1]];
    for (index, (angle, callbacks)) in ROTARY_ANGLES.into_iter().zip(callbacks).enumerate() {
        table.set(index, ChannelSlot::new(angle, callbacks));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Strokes;

    #[test]
    fn fallback_labels_render_in_bit_order() {
        let mut flags = Fallbacks::empty();
        assert_eq!(flags.labels().count(), 0);
        flags.insert(Fallbacks::STAGING_DISABLED);
        flags.insert(Fallbacks::SEQUENTIAL_IGNITION_TO_WASTED);
        let labels: heapless::Vec<&str, 6> = flags.labels().collect();
        assert_eq!(labels.as_slice(), &["seq-ign->wasted", "staging-off"]);
    }

    #[test]
    fn duration_scaling() {
        assert_eq!(DurationScale::Doubled.apply(4_000), 8_000);
        assert_eq!(DurationScale::Halved.apply(4_001), 2_000);
        assert_eq!(DurationScale::Unchanged.apply(4_000), 4_000);
    }

    #[test]
    fn rotary_fc_uses_trailing_composites() {
        let config = EngineConfig::new(Cylinders::Four, Strokes::Four)
            .with_spark_mode(SparkMode::Rotary(RotaryType::Fc))
            .with_polarities(Polarity::ActiveHigh, Polarity::ActiveLow);
        let assignment = resolve(&config, BoardCapabilities::FULL);
        assert_eq!(assignment.ignition.angles().as_slice(), &[0, 180, 0, 180]);
        assert_eq!(
            assignment.ignition.slots()[3].callbacks,
            ChannelCallbacks::new(OutputCall::TrailingBegin, OutputCall::TrailingEnd2)
        );
        assert_eq!(assignment.ignition_polarity, Polarity::ActiveHigh);
    }

    #[test]
    fn semi_sequential_pairing_follows_configuration() {
        let config = EngineConfig::new(Cylinders::Four, Strokes::Four)
            .with_injection_layout(InjectionLayout::SemiSequential)
            .with_injector_pairing(InjectorPairing::Cyl14Cyl23);
        let assignment = resolve(&config, BoardCapabilities::FULL);
        assert_eq!(
            assignment.fuel.slots()[0].callbacks,
            ChannelCallbacks::pair(OutputId::O1, OutputId::O4)
        );
        assert_eq!(
            assignment.fuel.slots()[1].callbacks,
            ChannelCallbacks::pair(OutputId::O2, OutputId::O3)
        );
    }
}
