mod support;

use ecu_core::bench::{BenchError, BenchExecutor, BenchOutcome, ParseError};
use ecu_core::config::{Cylinders, EngineConfig, InjectionLayout, RotaryType, SparkMode, Strokes};
use ecu_core::engine::Engine;
use ecu_core::output::{
    Backend, DirectBackend, DriverKind, Edge, OutputCall, OutputClass, OutputId, Polarity,
};
use ecu_core::schedule::ScheduleStatus;
use ecu_core::tacho::{TachoConfig, TachoMode};
use support::{MockTimer, Rig, SharedSpi, fire};

const FUEL: OutputClass = OutputClass::Fuel;
const IGNITION: OutputClass = OutputClass::Ignition;

#[test]
fn pair_calls_drive_both_outputs() {
    let rig = Rig::new();
    let bank = rig.direct_bank();

    bank.execute(FUEL, Edge::Begin, OutputCall::Pair(OutputId::O1, OutputId::O4));
    assert!(rig.injectors[0].is_high());
    assert!(rig.injectors[3].is_high());
    assert_eq!(bank.energized_mask(FUEL), 0b0000_1001);

    bank.execute(FUEL, Edge::End, OutputCall::Pair(OutputId::O1, OutputId::O4));
    assert_eq!(bank.energized_mask(FUEL), 0);
    assert_eq!(bank.tacho_pulses(), 0);
}

#[test]
fn inhibited_calls_touch_nothing() {
    let rig = Rig::new();
    let bank = rig.direct_bank();
    let writes = rig.coils[0].writes();

    bank.execute(IGNITION, Edge::Begin, OutputCall::Inhibit);
    assert_eq!(rig.coils[0].writes(), writes);
    assert_eq!(bank.tacho_pulses(), 0);
}

#[test]
fn trailing_composites_route_through_the_select_line() {
    let rig = Rig::new();
    let bank = rig.direct_bank();

    bank.execute(IGNITION, Edge::Begin, OutputCall::TrailingBegin);
    assert_eq!(bank.energized_mask(IGNITION), 0b0000_0010);
    assert_eq!(bank.tacho_pulses(), 1);
    assert!(!rig.tacho.is_high());

    bank.execute(IGNITION, Edge::End, OutputCall::TrailingEnd1);
    assert_eq!(bank.energized_mask(IGNITION), 0b0000_0100);
    assert!(rig.tacho.is_high());

    bank.execute(IGNITION, Edge::Begin, OutputCall::TrailingBegin);
    bank.execute(IGNITION, Edge::End, OutputCall::TrailingEnd2);
    assert_eq!(bank.energized_mask(IGNITION), 0);
    assert_eq!(bank.tacho_pulses(), 2);
}

#[test]
fn rotary_fc_engine_fires_trailing_channels() {
    let rig = Rig::new();
    let config = EngineConfig::new(Cylinders::Four, Strokes::Four)
        .with_spark_mode(SparkMode::Rotary(RotaryType::Fc))
        .with_polarities(Polarity::ActiveHigh, Polarity::ActiveLow);
    let engine = rig.configured(&config);

    // Rotary coils are always driven active high.
    assert!(!rig.coils[0].is_high());

    engine.arm(IGNITION, 2, 100, 400, 300);
    fire(&rig, &engine, IGNITION, 2);
    assert!(rig.coils[1].is_high());
    fire(&rig, &engine, IGNITION, 2);
    assert!(!rig.coils[1].is_high());
    assert!(rig.coils[2].is_high());
    assert_eq!(engine.bank().tacho_pulses(), 1);
}

#[test]
fn serial_switch_classes_share_the_request_byte() {
    let rig = Rig::new();
    let spi = SharedSpi::default();
    let bank = rig.switch_bank(&spi);
    bank.init();

    assert_eq!(bank.driver_kind(FUEL), DriverKind::SerialSwitch);
    assert!(bank.is_configured(FUEL, OutputId::O4));
    assert!(!bank.is_configured(IGNITION, OutputId::O5));

    bank.open_injector(OutputId::O1);
    bank.begin_coil_charge(OutputId::O2);
    let diagnostics = bank.switch_diagnostics(0).unwrap();
    assert_eq!(diagnostics.requested, 0b0010_0001);
    assert_eq!(diagnostics.last_status, Some(0));
    assert_eq!(spi.words().last(), Some(&0x3021));
    assert_eq!(bank.tacho_pulses(), 1);

    // Unattached second IC: outputs 5-8 do nothing.
    bank.open_injector(OutputId::O6);
    assert!(!bank.is_energized(FUEL, OutputId::O6));
    assert!(bank.switch_diagnostics(1).is_none());

    bank.all_off();
    assert_eq!(bank.switch_diagnostics(0).unwrap().requested, 0);
}

#[test]
fn serial_switch_ignores_polarity() {
    let rig = Rig::new();
    let spi = SharedSpi::default();
    let bank = rig.switch_bank(&spi);

    bank.set_polarity(FUEL, Polarity::ActiveLow);
    bank.open_injector(OutputId::O3);
    assert_eq!(bank.switch_diagnostics(0).unwrap().requested, 0b0000_0100);
}

#[test]
fn backends_can_be_swapped_at_runtime() {
    let rig = Rig::new();
    let bank = rig.direct_bank();
    bank.open_injector(OutputId::O2);
    assert!(rig.injectors[1].is_high());

    let previous = bank.replace_backend(FUEL, Backend::Direct(DirectBackend::new(Polarity::ActiveHigh)));
    assert_eq!(previous.kind(), DriverKind::Direct);
    assert!(!rig.injectors[1].is_high());
    assert!(!bank.is_configured(FUEL, OutputId::O2));
}

#[test]
fn configuration_applies_polarity_and_tacho() {
    let rig = Rig::new();
    let config = EngineConfig::new(Cylinders::Four, Strokes::Four)
        .with_polarities(Polarity::ActiveLow, Polarity::ActiveHigh)
        .with_tacho(TachoConfig::new(TachoMode::PulsePin).with_divide_by_two(true));
    let engine = rig.configured(&config);

    assert!(rig.injectors[0].is_high());
    engine.arm(FUEL, 0, 100, 600, 500);
    fire(&rig, &engine, FUEL, 0);
    assert!(!rig.injectors[0].is_high());

    for _ in 0..4 {
        engine.bank().begin_coil_charge(OutputId::O1);
        engine.bank().end_coil_charge(OutputId::O1);
    }
    assert_eq!(engine.bank().tacho_pulses(), 2);
}

#[test]
fn bench_commands_drive_outputs_while_stopped() {
    let rig = Rig::new();
    let engine = rig.configured(&EngineConfig::default());
    let mut bench = BenchExecutor::new(&engine);
    let mut out = String::new();

    let outcome = bench.execute("inj 2 open", &mut out).unwrap();
    assert!(matches!(outcome, BenchOutcome::Actuated(action) if action.energized));
    assert!(rig.injectors[1].is_high());
    assert_eq!(out, "inj 2 on\n");

    out.clear();
    bench.execute("coil 3 charge", &mut out).unwrap();
    bench.execute("coil 3 release", &mut out).unwrap();
    assert_eq!(out, "coil 3 on\ncoil 3 off\n");
    assert_eq!(engine.bank().tacho_pulses(), 1);

    bench.execute("coil 4 toggle", &mut out).unwrap();
    assert!(rig.coils[3].is_high());
    assert_eq!(engine.bank().tacho_pulses(), 1);

    assert_eq!(
        bench.execute("inj 9 open", &mut out),
        Err(BenchError::Parse(ParseError::UnknownOutput(9)))
    );
}

#[test]
fn bench_refuses_outputs_while_scheduled() {
    let rig = Rig::new();
    let engine = rig.configured(&EngineConfig::default());
    engine.arm(FUEL, 0, 100, 600, 500);

    let mut bench = BenchExecutor::new(&engine);
    let mut out = String::new();
    assert_eq!(
        bench.execute("inj 1 open", &mut out),
        Err(BenchError::EngineRunning)
    );
    assert!(out.is_empty());

    assert_eq!(bench.execute("stop", &mut out), Ok(BenchOutcome::Stopped));
    assert_eq!(engine.status(FUEL, 0), Some(ScheduleStatus::Off));
    assert!(bench.execute("inj 1 open", &mut out).is_ok());
}

#[test]
fn bench_status_and_sync() {
    let rig = Rig::new();
    let config = EngineConfig::new(Cylinders::Four, Strokes::Four)
        .with_injection_layout(InjectionLayout::Sequential);
    let engine = rig.configured(&config);
    let mut bench = BenchExecutor::new(&engine);
    let mut out = String::new();

    bench.execute("status", &mut out).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "config squirts=1 req=16000us fallbacks=none tacho=0",
            "fuel sync=full domain=720 ch=1234.... sched=........ out=........",
            "ignition sync=full domain=360 ch=12...... sched=........ out=........",
        ]
    );

    out.clear();
    bench.execute("sync half", &mut out).unwrap();
    assert_eq!(out, "sync half: fuel applied ignition n/a\n");
    assert_eq!(engine.domain(FUEL), 360);

    out.clear();
    bench.execute("help sync", &mut out).unwrap();
    assert!(out.starts_with("sync half|full"));
    assert_eq!(out.lines().count(), 1);
}

#[test]
fn unconfigured_engine_reports_status() {
    let rig = Rig::new();
    let engine: Engine<MockTimer<'_>, _, _> = rig.engine();
    let mut bench = BenchExecutor::new(&engine);
    let mut out = String::new();

    bench.execute("status", &mut out).unwrap();
    assert!(out.starts_with("config unconfigured\n"));
}
