use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use ecu_core::assignment::SyncWidth;
use ecu_core::bench::{BenchExecutor, BenchOutcome};
use ecu_core::config::{
    BoardCapabilities, Cylinders, EngineConfig, InjectionLayout, SparkMode, Strokes,
};
use ecu_core::engine::Engine;
use ecu_core::output::{
    DriverKind, MAX_OUTPUTS, OutputBank, OutputClass, OutputId, SwitchChain,
};
use ecu_core::schedule::{ArmOutcome, MAX_TIMER_PERIOD};
use ecu_core::tacho::{Tacho, TachoConfig, TachoMode};
use ecu_core::telemetry::{
    TelemetryEventKind, TelemetryInstant, TelemetryPayload, TelemetryRecord, TelemetryRecorder,
    channel_ref,
};

use crate::sim::{Harness, SimClock, SimPin, SimSpi, SimTimer};

pub type SimEngine = Engine<SimTimer, SimPin, SimSpi>;

/// Ticks per millisecond on the 1 MHz simulated counter.
const TICKS_PER_MS: u64 = 1_000;
/// Compare passes per instant before the scheduler gives up on a channel.
const MAX_DISPATCH_PASSES: usize = 4;
const DEFAULT_EVENT_COUNT: usize = 10;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "arm",
        "arm fuel|ign <1-8> <delay-us> <width-us>  schedule one period",
    ),
    (
        "advance",
        "advance <us>                      run the simulated clock",
    ),
    (
        "pins",
        "pins                              print output and switch levels",
    ),
    (
        "events",
        "events [count]                    print recent telemetry",
    ),
];

/// Board wiring the emulator boots with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Profile {
    Direct,
    Switched,
    Mixed,
}

impl Profile {
    pub const ALL: [Self; 3] = [Self::Direct, Self::Switched, Self::Mixed];

    pub const fn tag(self) -> &'static str {
        match self {
            Profile::Direct => "direct",
            Profile::Switched => "switched",
            Profile::Mixed => "mixed",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.tag().eq_ignore_ascii_case(tag))
            .ok_or_else(|| format!("Unknown board profile `{tag}`"))
    }

    pub fn log_path(self) -> String {
        format!("transcripts/emulator-{}.log", self.tag())
    }

    pub fn header(self) -> String {
        format!("ECU emulator {} board transcript", self.tag())
    }

    const fn drivers(self) -> (DriverKind, DriverKind) {
        match self {
            Profile::Direct => (DriverKind::Direct, DriverKind::Direct),
            Profile::Switched => (DriverKind::SerialSwitch, DriverKind::SerialSwitch),
            Profile::Mixed => (DriverKind::SerialSwitch, DriverKind::Direct),
        }
    }

    pub const fn caps(self) -> BoardCapabilities {
        BoardCapabilities {
            fuel_outputs: 4,
            ignition_outputs: 4,
        }
    }

    /// Sequential four cylinder on wasted-COP coils. The mixed board runs
    /// its tacho from the sweep timer.
    pub const fn engine_config(self) -> EngineConfig {
        let (fuel, ignition) = self.drivers();
        let tacho = match self {
            Profile::Mixed => TachoConfig::new(TachoMode::Sweep),
            Profile::Direct | Profile::Switched => TachoConfig::new(TachoMode::PulsePin),
        };
        EngineConfig::new(Cylinders::Four, Strokes::Four)
            .with_injection_layout(InjectionLayout::Sequential)
            .with_spark_mode(SparkMode::WastedCop)
            .with_drivers(fuel, ignition)
            .with_tacho(tacho)
    }

    const fn uses_switch(self) -> bool {
        !matches!(self, Profile::Direct)
    }
}

/// Simulated time since the session started, in microseconds.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(u64);

impl SimInstant {
    pub const fn as_micros(self) -> u64 {
        self.0
    }
}

impl TelemetryInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

pub struct Session {
    profile: Profile,
    harness: Harness,
    clock: SimClock,
    elapsed_us: u64,
    engine: SimEngine,
    telemetry: TelemetryRecorder<SimInstant>,
    transcript: TranscriptLogger,
    dwell_limit: u32,
    pending_resync: Option<SyncWidth>,
}

impl Session {
    pub fn new(profile: Profile) -> io::Result<Self> {
        let transcript = TranscriptLogger::create(profile)?;
        Ok(Self::with_transcript(profile, transcript))
    }

    /// Session whose transcript goes to `writer` instead of the log file.
    pub fn with_writer(profile: Profile, writer: impl Write + 'static) -> io::Result<Self> {
        let mut transcript = TranscriptLogger::new(Box::new(writer));
        transcript.write_header(profile)?;
        Ok(Self::with_transcript(profile, transcript))
    }

    fn with_transcript(profile: Profile, transcript: TranscriptLogger) -> Self {
        let config = profile.engine_config();
        let harness = Harness::default();
        let clock = SimClock::default();

        let mut switches = SwitchChain::empty();
        if profile.uses_switch() {
            switches.attach(0, harness.switch.clone());
        }
        let bank = OutputBank::new(
            harness.backend(config.fuel_driver, OutputClass::Fuel),
            harness.backend(config.ignition_driver, OutputClass::Ignition),
            switches,
            Tacho::new(harness.tacho.clone(), config.tacho),
        );
        let engine = Engine::new(bank, SimTimer::bank(&clock), SimTimer::bank(&clock));
        engine.bank().init();

        let mut telemetry = TelemetryRecorder::new();
        let assignment = engine.configure_channels(&config, profile.caps());
        telemetry.record_configured(&assignment, SimInstant::default());

        Self {
            profile,
            harness,
            clock,
            elapsed_us: 0,
            engine,
            telemetry,
            transcript,
            dwell_limit: config.dwell_limit_us.min(MAX_TIMER_PERIOD),
            pending_resync: None,
        }
    }

    pub const fn profile(&self) -> Profile {
        self.profile
    }

    pub const fn now(&self) -> SimInstant {
        SimInstant(self.elapsed_us)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let at = self.now();
        self.transcript.append_line(at, TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let keyword = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let lines = match keyword.as_str() {
            "arm" => self.handle_arm(&args),
            "advance" => self.handle_advance(&args),
            "pins" => self.describe_pins(),
            "events" => self.handle_events(&args),
            "help" => match args.first().and_then(|topic| help_topic(topic)) {
                Some(detail) => vec![detail.to_string()],
                None => self.handle_bench(trimmed, args.is_empty()),
            },
            _ => self.handle_bench(trimmed, false),
        };

        self.record_output(at, &lines)?;
        Ok(lines)
    }

    fn handle_bench(&mut self, line: &str, append_help: bool) -> Vec<String> {
        let mut response = String::new();
        let mut bench = BenchExecutor::new(&self.engine);
        let outcome = bench.execute(line, &mut response);
        let mut lines: Vec<String> = response.lines().map(str::to_string).collect();

        match outcome {
            Ok(outcome) => self.record_bench(outcome),
            Err(err) => lines.push(format!("error: {err}")),
        }
        if append_help {
            lines.extend(HELP_TOPICS.iter().map(|(_, detail)| (*detail).to_string()));
        }
        lines
    }

    fn record_bench(&mut self, outcome: BenchOutcome) {
        let now = self.now();
        match outcome {
            BenchOutcome::Actuated(bench) => {
                self.telemetry.record_bench(bench, now);
            }
            BenchOutcome::Resync(width, report) => {
                self.telemetry.record_resync(report, width, now);
                self.pending_resync = report.is_deferred().then_some(width);
            }
            BenchOutcome::Stopped => {
                self.telemetry.record_stop(now);
                self.pending_resync = None;
            }
            BenchOutcome::Status | BenchOutcome::Help => {}
        }
    }

    fn handle_arm(&mut self, args: &[&str]) -> Vec<String> {
        let Some((class, id, delay, width)) = parse_arm(args) else {
            return vec![format!("error: usage: {}", HELP_TOPICS[0].1)];
        };
        let channel = id.index();
        let label = channel_ref(class, channel);

        let Some(outcome) = self.engine.arm_after(class, channel, delay, width) else {
            return vec![format!("arm {label} disabled")];
        };
        if !outcome.is_accepted() {
            self.telemetry.record(
                TelemetryEventKind::ArmRejected(label),
                TelemetryPayload::none(),
                self.now(),
            );
        }
        vec![format!("arm {label} {}", arm_label(outcome))]
    }

    fn handle_advance(&mut self, args: &[&str]) -> Vec<String> {
        let Some(micros) = args.first().and_then(|value| value.parse::<u64>().ok()) else {
            return vec![format!("error: usage: {}", HELP_TOPICS[1].1)];
        };
        self.advance(micros)
    }

    /// Runs the clock forward, firing compares in time order and servicing
    /// housekeeping on every millisecond boundary.
    pub fn advance(&mut self, micros: u64) -> Vec<String> {
        let mut lines = Vec::new();
        let mut remaining = micros;
        loop {
            self.dispatch_due(&mut lines);
            if remaining == 0 {
                break;
            }

            let to_boundary = TICKS_PER_MS - self.elapsed_us % TICKS_PER_MS;
            let step = self
                .next_compare()
                .map_or(to_boundary, |due| u64::from(due).max(1))
                .min(to_boundary)
                .min(remaining);

            self.clock
                .advance(u32::try_from(step).unwrap_or(u32::MAX));
            self.elapsed_us += step;
            remaining -= step;

            if self.elapsed_us % TICKS_PER_MS == 0 {
                self.dispatch_due(&mut lines);
                self.housekeeping(&mut lines);
            }
        }
        lines.push(format!("t=+{}us", self.elapsed_us));
        lines
    }

    fn next_compare(&self) -> Option<u32> {
        self.timers().filter_map(|(_, _, timer)| timer.due_in()).min()
    }

    fn timers(&self) -> impl Iterator<Item = (OutputClass, usize, &SimTimer)> {
        [OutputClass::Fuel, OutputClass::Ignition]
            .into_iter()
            .flat_map(move |class| {
                (0..MAX_OUTPUTS).filter_map(move |channel| {
                    self.engine
                        .schedule(class, channel)
                        .map(|schedule| (class, channel, schedule.timer()))
                })
            })
    }

    fn dispatch_due(&mut self, lines: &mut Vec<String>) {
        for _ in 0..MAX_DISPATCH_PASSES {
            let due: Vec<(OutputClass, usize)> = self
                .timers()
                .filter(|(_, _, timer)| timer.due_in() == Some(0))
                .map(|(class, channel, _)| (class, channel))
                .collect();
            if due.is_empty() {
                return;
            }

            let now = self.now();
            for (class, channel) in due {
                let Some(outcome) = self.engine.on_compare_match(class, channel) else {
                    continue;
                };
                if self
                    .telemetry
                    .record_match(channel_ref(class, channel), outcome, now)
                    .is_some()
                {
                    lines.extend(self.telemetry.latest().map(describe_record));
                }
            }
        }
    }

    fn housekeeping(&mut self, lines: &mut Vec<String>) {
        let now = self.now();
        let forced = self.engine.enforce_dwell_limit(self.clock.ticks(), self.dwell_limit);
        let recorded = self.telemetry.record_overdwell(forced, now);
        let records: Vec<_> = self.telemetry.oldest_first().collect();
        lines.extend(
            records[records.len() - recorded..]
                .iter()
                .map(|record| describe_record(record)),
        );

        #[allow(clippy::cast_possible_truncation)]
        let now_ms = (self.elapsed_us / TICKS_PER_MS) as u32;
        self.engine.bank().service_tacho(now_ms);

        if let Some(width) = self.pending_resync {
            let report = match width {
                SyncWidth::Half => self.engine.change_full_to_half_sync(),
                SyncWidth::Full => self.engine.change_half_to_full_sync(),
            };
            if !report.is_deferred() {
                self.telemetry.record_resync(report, width, now);
                lines.push(format!(
                    "sync {width}: fuel {} ignition {}",
                    report.fuel, report.ignition
                ));
                self.pending_resync = None;
            }
        }
    }

    fn describe_pins(&self) -> Vec<String> {
        let bank = self.engine.bank();
        let caps = self.profile.caps();
        let mut lines = Vec::new();
        for (class, count) in [
            (OutputClass::Fuel, caps.fuel_outputs),
            (OutputClass::Ignition, caps.ignition_outputs),
        ] {
            let mut line = format!("{:<9}", class.label());
            for id in OutputId::ALL.into_iter().take(usize::from(count)) {
                let level = if bank.is_energized(class, id) { "on" } else { "off" };
                let _ = write!(line, " {}:{level}", id.number());
            }
            let _ = write!(line, " ({:?})", bank.driver_kind(class));
            lines.push(line);
        }

        lines.push(format!(
            "tacho     {} pulses={}",
            if self.harness.tacho.is_high() { "high" } else { "low" },
            bank.tacho_pulses()
        ));
        if let Some(switch) = bank.switch_diagnostics(0) {
            let mut line = format!(
                "switch0   requested={:#04x} failures={} transfers={}",
                switch.requested,
                switch.transfer_failures,
                self.harness.switch.transfers()
            );
            if let Some(word) = self.harness.switch.last_word() {
                let _ = write!(line, " last={word:#06x}");
            }
            lines.push(line);
        }
        lines
    }

    fn handle_events(&mut self, args: &[&str]) -> Vec<String> {
        let count = args
            .first()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_EVENT_COUNT);
        let skip = self.telemetry.len().saturating_sub(count);
        let lines: Vec<String> = self
            .telemetry
            .oldest_first()
            .skip(skip)
            .map(describe_record)
            .collect();
        if lines.is_empty() {
            vec!["no events".to_string()]
        } else {
            lines
        }
    }

    fn record_output(&mut self, at: SimInstant, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript.append_line(at, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn help_topic(topic: &str) -> Option<&'static str> {
    HELP_TOPICS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(topic))
        .map(|(_, detail)| *detail)
}

fn parse_arm(args: &[&str]) -> Option<(OutputClass, OutputId, u32, u32)> {
    let [class, number, delay, width] = args else {
        return None;
    };
    let class = match class.to_ascii_lowercase().as_str() {
        "fuel" | "inj" => OutputClass::Fuel,
        "ign" | "ignition" | "coil" => OutputClass::Ignition,
        _ => return None,
    };
    let id = OutputId::new(number.parse().ok()?).ok()?;
    Some((class, id, delay.parse().ok()?, width.parse().ok()?))
}

const fn arm_label(outcome: ArmOutcome) -> &'static str {
    match outcome {
        ArmOutcome::Armed => "armed",
        ArmOutcome::Queued => "queued",
        ArmOutcome::RejectedPending => "rejected: start already pending",
        ArmOutcome::RejectedOverlap => "rejected: overlaps running period",
    }
}

fn describe_record(record: &TelemetryRecord<SimInstant>) -> String {
    let mut line = format!(
        "#{:<4} +{:>8}us {}",
        record.id,
        record.timestamp.as_micros(),
        record.event
    );
    let _ = match record.details {
        TelemetryPayload::None | TelemetryPayload::Energized(None) => Ok(()),
        TelemetryPayload::Energized(Some(energized)) => {
            write!(line, " energized={}us", energized.as_micros())
        }
        TelemetryPayload::Resync(width) => write!(line, " width={width}"),
        TelemetryPayload::Config(config) => write!(
            line,
            " fuel={} ignition={} fallbacks={}",
            config.fuel_channels, config.ignition_channels, config.fallbacks
        ),
        TelemetryPayload::Bench(bench) => write!(
            line,
            " {}{} {}",
            bench.class,
            bench.output.number(),
            if bench.energized { "on" } else { "off" }
        ),
    };
    line
}

struct TranscriptLogger {
    writer: Box<dyn Write>,
}

impl TranscriptLogger {
    fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }

    fn create(profile: Profile) -> io::Result<Self> {
        let path = profile.log_path();
        let path = Path::new(&path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self::new(Box::new(BufWriter::new(file)));
        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: Profile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(self.writer, "# Timestamps are simulated microseconds since boot")?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, at: SimInstant, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>9} us] {} {}",
            at.as_micros(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
