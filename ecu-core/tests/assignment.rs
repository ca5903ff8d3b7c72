use ecu_core::assignment::{DurationScale, Fallbacks, SyncWidth, resolve};
use ecu_core::config::{
    BoardCapabilities, Cylinders, EngineConfig, EngineType, InjectionLayout, InjectionTiming,
    InjectorType, SparkMode, Strokes,
};
use ecu_core::output::{ChannelCallbacks, OutputClass, OutputId};

fn four_cylinder() -> EngineConfig {
    EngineConfig::new(Cylinders::Four, Strokes::Four)
}

#[test]
fn sequential_four_cylinder_spans_the_full_cycle() {
    let config = four_cylinder()
        .with_injection_layout(InjectionLayout::Sequential)
        .with_req_fuel_us(8_000);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.fuel.angles().as_slice(), &[0, 180, 360, 540]);
    assert_eq!(assignment.fuel.domain(), 720);
    assert_eq!(assignment.fuel.sync(), SyncWidth::Full);
    assert_eq!(assignment.duration_scale, DurationScale::Doubled);
    assert_eq!(assignment.req_fuel_us(), 16_000);
    assert_eq!(assignment.n_squirts, 1);
    assert!(assignment.fallbacks.is_empty());
    for (index, slot) in assignment.fuel.slots().iter().take(4).enumerate() {
        assert_eq!(
            slot.callbacks,
            ChannelCallbacks::single(OutputId::from_index(index).unwrap())
        );
    }
}

#[test]
fn staged_single_cylinder_adds_a_secondary_at_the_same_angle() {
    let config = EngineConfig::new(Cylinders::One, Strokes::Four)
        .with_injection_layout(InjectionLayout::Sequential)
        .with_staging(true);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.fuel.enabled_mask(), 0b0000_0011);
    assert_eq!(assignment.fuel.angles().as_slice(), &[0, 0]);
    assert_eq!(assignment.fuel.domain(), 720);
    assert_eq!(
        assignment.fuel.slots()[1].callbacks,
        ChannelCallbacks::single(OutputId::O2)
    );
    assert_eq!(assignment.duration_scale, DurationScale::Doubled);
    assert!(!assignment.fallbacks.contains(Fallbacks::STAGING_DISABLED));
}

#[test]
fn three_cylinder_semi_sequential_port_falls_back_to_paired() {
    let config = EngineConfig::new(Cylinders::Three, Strokes::Four)
        .with_injection_layout(InjectionLayout::SemiSequential)
        .with_injector_type(InjectorType::Port)
        .with_squirts_per_cycle(1);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert!(assignment
        .fallbacks
        .contains(Fallbacks::SEMI_SEQUENTIAL_TO_PAIRED));
    assert_eq!(assignment.effective.injection_layout, InjectionLayout::Paired);
    assert_eq!(assignment.fuel.angles().as_slice(), &[0, 120, 240]);
    assert_eq!(assignment.fuel.domain(), 360);
    assert_eq!(assignment.n_squirts, 2);
    assert_eq!(assignment.duration_scale, DurationScale::Halved);
}

#[test]
fn three_cylinder_throttle_body_keeps_requested_squirts() {
    let config = EngineConfig::new(Cylinders::Three, Strokes::Four)
        .with_injector_type(InjectorType::ThrottleBody)
        .with_squirts_per_cycle(1);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.n_squirts, 1);
    assert_eq!(assignment.fuel.domain(), 720);
    assert_eq!(assignment.duration_scale, DurationScale::Unchanged);
}

#[test]
fn wasted_spark_four_cylinder_uses_two_coils() {
    let assignment = resolve(&four_cylinder(), BoardCapabilities::FULL);

    assert_eq!(assignment.ignition.angles().as_slice(), &[0, 180]);
    assert_eq!(assignment.ignition.domain(), 360);
    assert_eq!(
        assignment.ignition.slots()[1].callbacks,
        ChannelCallbacks::single(OutputId::O2)
    );
}

#[test]
fn single_coil_fires_every_channel_on_output_one() {
    let config = EngineConfig::new(Cylinders::Six, Strokes::Four).with_spark_mode(SparkMode::Single);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.ignition.angles().as_slice(), &[0, 120, 240]);
    for slot in assignment.ignition.slots().iter().filter(|slot| slot.enabled) {
        assert_eq!(slot.callbacks, ChannelCallbacks::single(OutputId::O1));
    }
}

#[test]
fn wasted_cop_pairs_opposite_cylinders() {
    let config = four_cylinder().with_spark_mode(SparkMode::WastedCop);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.ignition.angles().as_slice(), &[0, 180]);
    assert_eq!(
        assignment.ignition.slots()[0].callbacks,
        ChannelCallbacks::pair(OutputId::O1, OutputId::O3)
    );
    assert_eq!(
        assignment.ignition.slots()[1].callbacks,
        ChannelCallbacks::pair(OutputId::O2, OutputId::O4)
    );
}

#[test]
fn unsupported_modes_degrade_and_are_flagged() {
    let caps = BoardCapabilities::new(8, 2).unwrap();
    let sequential_spark = four_cylinder().with_spark_mode(SparkMode::Sequential);
    let assignment = resolve(&sequential_spark, caps);
    assert!(assignment
        .fallbacks
        .contains(Fallbacks::SEQUENTIAL_IGNITION_TO_WASTED));
    assert_eq!(assignment.effective.spark_mode, SparkMode::Wasted);

    let odd_cop = EngineConfig::new(Cylinders::Five, Strokes::Four)
        .with_spark_mode(SparkMode::WastedCop);
    let assignment = resolve(&odd_cop, BoardCapabilities::FULL);
    assert!(assignment.fallbacks.contains(Fallbacks::WASTED_COP_TO_WASTED));
    assert_eq!(assignment.ignition.angles().as_slice(), &[0, 72, 144, 216, 288]);

    let two_stroke = EngineConfig::new(Cylinders::Four, Strokes::Two)
        .with_injection_layout(InjectionLayout::Sequential);
    let assignment = resolve(&two_stroke, BoardCapabilities::FULL);
    assert!(assignment.fallbacks.contains(Fallbacks::SEQUENTIAL_FUEL_TO_SEMI));
    assert!(assignment
        .fallbacks
        .contains(Fallbacks::SEMI_SEQUENTIAL_TO_PAIRED));
    assert_eq!(assignment.effective.injection_layout, InjectionLayout::Paired);

    let rotary = EngineConfig::new(Cylinders::Six, Strokes::Four)
        .with_spark_mode(SparkMode::Rotary(ecu_core::config::RotaryType::Rx8));
    let assignment = resolve(&rotary, BoardCapabilities::FULL);
    assert!(assignment.fallbacks.contains(Fallbacks::ROTARY_TO_WASTED));
}

#[test]
fn staging_is_dropped_when_secondaries_do_not_fit() {
    let config = EngineConfig::new(Cylinders::Eight, Strokes::Four)
        .with_injection_layout(InjectionLayout::Sequential)
        .with_staging(true);
    let assignment = resolve(&config, BoardCapabilities::FULL);
    assert!(assignment.fallbacks.contains(Fallbacks::STAGING_DISABLED));
    assert!(!assignment.effective.staging_enabled);
    assert_eq!(assignment.fuel.enabled_count(), 8);

    let paired = EngineConfig::new(Cylinders::Eight, Strokes::Four).with_staging(true);
    let assignment = resolve(&paired, BoardCapabilities::FULL);
    assert!(assignment.fallbacks.is_empty());
    assert_eq!(assignment.fuel.enabled_count(), 8);
    assert_eq!(
        assignment.fuel.slots()[4].callbacks,
        ChannelCallbacks::single(OutputId::O5)
    );
}

#[test]
fn extra_squirts_compress_the_angles() {
    let config = four_cylinder().with_squirts_per_cycle(4);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.fuel.domain(), 180);
    assert_eq!(assignment.fuel.angles().as_slice(), &[0, 90]);
    assert_eq!(assignment.n_squirts, 4);
}

#[test]
fn simultaneous_timing_fires_every_channel_together() {
    let config = EngineConfig::new(Cylinders::Six, Strokes::Four)
        .with_injection_timing(InjectionTiming::Simultaneous);
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.fuel.angles().as_slice(), &[0, 0, 0]);
}

#[test]
fn odd_fire_offsets_replace_even_angles() {
    let config = four_cylinder()
        .with_injection_layout(InjectionLayout::Sequential)
        .with_engine_type(EngineType::OddFire {
            angles: [270, 450, 630],
        });
    let assignment = resolve(&config, BoardCapabilities::FULL);

    assert_eq!(assignment.fuel.angles().as_slice(), &[0, 270, 450, 630]);
}

#[test]
fn half_sync_pairs_sequential_channels_and_round_trips() {
    let config = four_cylinder()
        .with_injection_layout(InjectionLayout::Sequential)
        .with_spark_mode(SparkMode::Sequential);
    let full = resolve(&config, BoardCapabilities::FULL);
    let half = full.to_half_sync();

    assert_eq!(half.fuel.angles().as_slice(), &[0, 180]);
    assert_eq!(half.fuel.domain(), 360);
    assert_eq!(half.fuel.sync(), SyncWidth::Half);
    assert_eq!(
        half.fuel.slots()[0].callbacks,
        ChannelCallbacks::pair(OutputId::O1, OutputId::O3)
    );
    assert_eq!(half.req_fuel_us(), 8_000);
    assert_eq!(half.n_squirts, 2);

    assert_eq!(half.ignition.angles().as_slice(), &[0, 180]);
    assert_eq!(
        half.ignition.slots()[1].callbacks,
        ChannelCallbacks::pair(OutputId::O2, OutputId::O4)
    );

    assert_eq!(half.to_full_sync(), full);
    assert_eq!(full.to_full_sync(), full);
}

#[test]
fn resync_does_not_apply_to_paired_or_odd_layouts() {
    let paired = resolve(&four_cylinder(), BoardCapabilities::FULL);
    assert!(!paired.supports_resync(OutputClass::Fuel));
    assert_eq!(paired.to_half_sync(), paired);

    let odd = EngineConfig::new(Cylinders::Five, Strokes::Four)
        .with_injection_layout(InjectionLayout::Sequential)
        .with_spark_mode(SparkMode::Sequential);
    let assignment = resolve(&odd, BoardCapabilities::FULL);
    assert!(!assignment.supports_resync(OutputClass::Ignition));
    assert!(assignment.resync(OutputClass::Fuel, SyncWidth::Half).is_none());
}

#[test]
fn resolution_is_deterministic() {
    let config = EngineConfig::new(Cylinders::Six, Strokes::Four)
        .with_injection_layout(InjectionLayout::SemiSequential)
        .with_spark_mode(SparkMode::WastedCop);
    assert_eq!(
        resolve(&config, BoardCapabilities::FULL),
        resolve(&config, BoardCapabilities::FULL)
    );
}
