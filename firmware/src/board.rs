#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Board profiles: how many outputs a PCB exposes and how each class is
//! driven, plus the timebase the compare multiplexer runs at.

use ecu_core::config::{
    BoardCapabilities, Cylinders, EngineConfig, InjectionLayout, SparkMode, Strokes,
};
use ecu_core::output::DriverKind;
use ecu_core::schedule::MAX_TIMER_PERIOD;

/// Rate of the free-running schedule counter.
pub const TIMER_TICK_HZ: u32 = 1_000_000;

/// Housekeeping period for overdwell, tacho sweep and deferred resync.
pub const HOUSEKEEPING_PERIOD_MS: u64 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BoardProfile {
    pub name: &'static str,
    pub caps: BoardCapabilities,
    pub fuel_driver: DriverKind,
    pub ignition_driver: DriverKind,
    /// Serial switch ICs populated on the SPI chain.
    pub switch_devices: u8,
}

impl BoardProfile {
    /// Four injectors and four coils on low-side GPIO drivers.
    pub const DIRECT_4X4: Self = Self {
        name: "direct-4x4",
        caps: BoardCapabilities {
            fuel_outputs: 4,
            ignition_outputs: 4,
        },
        fuel_driver: DriverKind::Direct,
        ignition_driver: DriverKind::Direct,
        switch_devices: 0,
    };

    /// One serial switch IC carrying four injectors and four coils.
    pub const SWITCHED_4X4: Self = Self {
        name: "switched-4x4",
        caps: BoardCapabilities {
            fuel_outputs: 4,
            ignition_outputs: 4,
        },
        fuel_driver: DriverKind::SerialSwitch,
        ignition_driver: DriverKind::SerialSwitch,
        switch_devices: 1,
    };

    /// Injectors on the switch IC, coils on GPIO.
    pub const MIXED_4X4: Self = Self {
        name: "mixed-4x4",
        caps: BoardCapabilities {
            fuel_outputs: 4,
            ignition_outputs: 4,
        },
        fuel_driver: DriverKind::SerialSwitch,
        ignition_driver: DriverKind::Direct,
        switch_devices: 1,
    };

    pub const CATALOG: [Self; 3] = [Self::DIRECT_4X4, Self::SWITCHED_4X4, Self::MIXED_4X4];

    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        Self::CATALOG
            .into_iter()
            .find(|profile| profile.name.eq_ignore_ascii_case(name))
    }

    /// Boot configuration: a sequential four cylinder on wasted-COP coils.
    #[must_use]
    pub const fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(Cylinders::Four, Strokes::Four)
            .with_injection_layout(InjectionLayout::Sequential)
            .with_spark_mode(SparkMode::WastedCop)
            .with_drivers(self.fuel_driver, self.ignition_driver)
    }

    /// Returns `true` when either class drives the SPI switch chain.
    #[must_use]
    pub const fn uses_switch(&self) -> bool {
        matches!(self.fuel_driver, DriverKind::SerialSwitch)
            || matches!(self.ignition_driver, DriverKind::SerialSwitch)
    }
}

/// Profile flashed into this build.
pub const ACTIVE: BoardProfile = BoardProfile::DIRECT_4X4;

/// Converts microseconds into schedule ticks, clamped to the longest
/// period a schedule accepts.
#[must_use]
pub fn us_to_ticks(micros: u32) -> u32 {
    let ticks = u64::from(micros) * u64::from(TIMER_TICK_HZ) / 1_000_000;
    u32::try_from(ticks).map_or(MAX_TIMER_PERIOD, |ticks| ticks.min(MAX_TIMER_PERIOD))
}

/// Milliseconds since boot folded into the `u32` the tacho sweep expects.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn wrapping_millis(millis: u64) -> u32 {
    millis as u32
}
