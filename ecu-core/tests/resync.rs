mod support;

use ecu_core::assignment::SyncWidth;
use ecu_core::config::{Cylinders, EngineConfig, InjectionLayout, SparkMode, Strokes};
use ecu_core::engine::ResyncOutcome;
use ecu_core::output::{OutputClass, OutputId};
use support::{Rig, fire};

const FUEL: OutputClass = OutputClass::Fuel;
const IGNITION: OutputClass = OutputClass::Ignition;

fn sequential() -> EngineConfig {
    EngineConfig::new(Cylinders::Four, Strokes::Four)
        .with_injection_layout(InjectionLayout::Sequential)
        .with_spark_mode(SparkMode::Sequential)
        .with_req_fuel_us(6_000)
}

#[test]
fn losing_cam_sync_moves_both_classes_to_360_degrees() {
    let rig = Rig::new();
    let engine = rig.configured(&sequential());
    assert_eq!(engine.req_fuel_us(), 12_000);

    let report = engine.change_full_to_half_sync();
    assert_eq!(report.fuel, ResyncOutcome::Applied);
    assert_eq!(report.ignition, ResyncOutcome::Applied);
    assert!(!report.is_deferred());

    for class in [FUEL, IGNITION] {
        assert_eq!(engine.domain(class), 360);
        assert_eq!(engine.sync(class), SyncWidth::Half);
        assert_eq!(engine.enabled_mask(class), 0b0000_0011);
    }
    assert_eq!(engine.angle(FUEL, 1), Some(180));
    assert_eq!(engine.angle(FUEL, 2), None);
    assert_eq!(engine.req_fuel_us(), 6_000);
    assert_eq!(engine.n_squirts(), 2);

    // A half-sync fuel channel drives its opposite cylinder too.
    engine.arm(FUEL, 0, 100, 600, 500);
    fire(&rig, &engine, FUEL, 0);
    assert!(rig.injectors[0].is_high());
    assert!(rig.injectors[2].is_high());
    assert!(!rig.injectors[1].is_high());
}

#[test]
fn running_channels_defer_the_change() {
    let rig = Rig::new();
    let engine = rig.configured(&sequential());

    engine.arm(FUEL, 3, 100, 600, 500);
    fire(&rig, &engine, FUEL, 3);

    let report = engine.change_full_to_half_sync();
    assert_eq!(report.fuel, ResyncOutcome::Deferred);
    assert_eq!(report.ignition, ResyncOutcome::Applied);
    assert!(report.is_deferred());
    assert_eq!(engine.domain(FUEL), 720);
    assert_eq!(engine.sync(FUEL), SyncWidth::Full);

    // The in-flight period still closes the injector it opened.
    fire(&rig, &engine, FUEL, 3);
    assert!(!rig.injectors[3].is_high());

    let retry = engine.change_full_to_half_sync();
    assert_eq!(retry.fuel, ResyncOutcome::Applied);
    assert_eq!(retry.ignition, ResyncOutcome::NotApplicable);
    assert_eq!(engine.domain(FUEL), 360);
}

#[test]
fn charging_coil_defers_ignition_only() {
    let rig = Rig::new();
    let engine = rig.configured(&sequential());

    engine.arm(IGNITION, 0, 100, 600, 500);
    fire(&rig, &engine, IGNITION, 0);
    let wiring: Vec<_> = (0..8)
        .map(|channel| engine.schedule(IGNITION, channel).unwrap().callbacks())
        .collect();

    let report = engine.change_full_to_half_sync();
    assert_eq!(report.fuel, ResyncOutcome::Applied);
    assert_eq!(report.ignition, ResyncOutcome::Deferred);
    assert_eq!(engine.sync(IGNITION), SyncWidth::Full);
    assert_eq!(engine.domain(IGNITION), 720);

    // Idle coils keep their old wiring too, matching the published angles.
    for (channel, callbacks) in wiring.iter().enumerate() {
        assert_eq!(
            engine.schedule(IGNITION, channel).unwrap().callbacks(),
            *callbacks,
            "channel {channel}"
        );
    }

    fire(&rig, &engine, IGNITION, 0);
    assert_eq!(engine.change_full_to_half_sync().ignition, ResyncOutcome::Applied);
    assert_eq!(engine.domain(IGNITION), 360);
}

#[test]
fn half_then_full_restores_the_installed_assignment() {
    let rig = Rig::new();
    let engine = rig.configured(&sequential());
    let original = engine.assignment().unwrap();

    engine.change_full_to_half_sync();
    assert_ne!(engine.assignment(), Some(original));
    let report = engine.change_half_to_full_sync();
    assert_eq!(report.fuel, ResyncOutcome::Applied);
    assert_eq!(report.ignition, ResyncOutcome::Applied);

    assert_eq!(engine.assignment(), Some(original));
    assert_eq!(engine.req_fuel_us(), 12_000);
    assert_eq!(engine.n_squirts(), 1);
    assert_eq!(engine.angle(IGNITION, 3), Some(540));

    engine.arm(FUEL, 0, 100, 600, 500);
    fire(&rig, &engine, FUEL, 0);
    assert!(rig.injectors[0].is_high());
    assert!(!rig.injectors[2].is_high());
}

#[test]
fn non_sequential_layouts_ignore_sync_changes() {
    let rig = Rig::new();
    let engine = rig.configured(&EngineConfig::new(Cylinders::Four, Strokes::Four));

    let report = engine.change_full_to_half_sync();
    assert_eq!(report.fuel, ResyncOutcome::NotApplicable);
    assert_eq!(report.ignition, ResyncOutcome::NotApplicable);

    let unconfigured = rig.engine();
    let report = unconfigured.change_half_to_full_sync();
    assert_eq!(report.fuel, ResyncOutcome::NotApplicable);
    assert!(!unconfigured.bank().is_energized(FUEL, OutputId::O1));
}
