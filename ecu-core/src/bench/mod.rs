//! Bench console: drives single outputs by hand while the engine is stopped.
//!
//! Output commands go through [`Engine::bench`], so they are refused while
//! any schedule is pending, staged or running. `status`, `stop`, `sync` and
//! `help` are always available.

pub mod grammar;

use core::fmt;

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;

pub use grammar::{BenchCommand, CoilAction, InjectorAction, ParseError, Topic, parse};

use crate::assignment::SyncWidth;
use crate::engine::{Engine, ResyncReport};
use crate::output::{OutputClass, OutputId};
use crate::schedule::CompareTimer;
use crate::status::StatusFormatter;
use crate::telemetry::BenchTelemetry;

/// Usage line and summary for each command, in `help` order.
pub const COMMANDS: [(Topic, &str, &str); 5] = [
    (
        Topic::Injector,
        "inj <1-8> open|close|toggle",
        "drive one injector output",
    ),
    (
        Topic::Coil,
        "coil <1-8> charge|release|toggle",
        "drive one coil output (release fires the tacho)",
    ),
    (
        Topic::Sync,
        "sync half|full",
        "move sequential channels to 360 or 720 degrees",
    ),
    (Topic::Status, "status", "print channel tables and outputs"),
    (
        Topic::Stop,
        "stop",
        "de-energize every output and cancel every schedule",
    ),
];

/// Errors surfaced while executing a console line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BenchError {
    Parse(ParseError),
    /// Output commands need every schedule idle.
    EngineRunning,
    /// Writing the response failed.
    Output,
}

impl From<ParseError> for BenchError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<fmt::Error> for BenchError {
    fn from(_: fmt::Error) -> Self {
        Self::Output
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::Parse(error) => error.fmt(f),
            BenchError::EngineRunning => f.write_str("engine running; stop it first"),
            BenchError::Output => f.write_str("console write failed"),
        }
    }
}

/// What an executed line did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BenchOutcome {
    Actuated(BenchTelemetry),
    Resync(SyncWidth, ResyncReport),
    Stopped,
    Status,
    Help,
}

/// Parses console lines and applies them to an [`Engine`].
pub struct BenchExecutor<'e, T, P, D> {
    engine: &'e Engine<T, P, D>,
}

impl<'e, T, P, D> BenchExecutor<'e, T, P, D>
where
    T: CompareTimer,
    P: OutputPin,
    D: SpiDevice,
{
    pub const fn new(engine: &'e Engine<T, P, D>) -> Self {
        Self { engine }
    }

    /// Parses and executes one line, writing any response to `out`.
    pub fn execute<W: fmt::Write>(
        &mut self,
        line: &str,
        out: &mut W,
    ) -> Result<BenchOutcome, BenchError> {
        let command = parse(line)?;
        self.dispatch(command, out)
    }

    pub fn dispatch<W: fmt::Write>(
        &mut self,
        command: BenchCommand,
        out: &mut W,
    ) -> Result<BenchOutcome, BenchError> {
        match command {
            BenchCommand::Injector(id, action) => self.injector(id, action, out),
            BenchCommand::Coil(id, action) => self.coil(id, action, out),
            BenchCommand::Sync(width) => {
                let report = match width {
                    SyncWidth::Full => self.engine.change_half_to_full_sync(),
                    SyncWidth::Half => self.engine.change_full_to_half_sync(),
                };
                writeln!(
                    out,
                    "sync {width}: fuel {} ignition {}",
                    report.fuel, report.ignition
                )?;
                Ok(BenchOutcome::Resync(width, report))
            }
            BenchCommand::Status => {
                let snapshot = self.engine.snapshot();
                let formatter = StatusFormatter::new(&snapshot);
                formatter.write_config_line(out)?;
                out.write_char('\n')?;
                for class in [OutputClass::Fuel, OutputClass::Ignition] {
                    formatter.write_class_line(out, class)?;
                    out.write_char('\n')?;
                }
                Ok(BenchOutcome::Status)
            }
            BenchCommand::Stop => {
                self.engine.stop();
                writeln!(out, "stopped")?;
                Ok(BenchOutcome::Stopped)
            }
            BenchCommand::Help(topic) => {
                write_help(out, topic)?;
                Ok(BenchOutcome::Help)
            }
        }
    }

    fn injector<W: fmt::Write>(
        &mut self,
        id: OutputId,
        action: InjectorAction,
        out: &mut W,
    ) -> Result<BenchOutcome, BenchError> {
        let bank = self.engine.bench().ok_or(BenchError::EngineRunning)?;
        match action {
            InjectorAction::Open => bank.open_injector(id),
            InjectorAction::Close => bank.close_injector(id),
            InjectorAction::Toggle => bank.toggle_injector(id),
        }
        let energized = bank.is_energized(OutputClass::Fuel, id);
        writeln!(out, "inj {} {}", id.number(), on_off(energized))?;
        Ok(BenchOutcome::Actuated(BenchTelemetry {
            class: OutputClass::Fuel,
            output: id,
            energized,
        }))
    }

    fn coil<W: fmt::Write>(
        &mut self,
        id: OutputId,
        action: CoilAction,
        out: &mut W,
    ) -> Result<BenchOutcome, BenchError> {
        let bank = self.engine.bench().ok_or(BenchError::EngineRunning)?;
        match action {
            CoilAction::Charge => bank.begin_coil_charge(id),
            CoilAction::Release => bank.end_coil_charge(id),
            CoilAction::Toggle => bank.toggle_coil(id),
        }
        let energized = bank.is_energized(OutputClass::Ignition, id);
        writeln!(out, "coil {} {}", id.number(), on_off(energized))?;
        Ok(BenchOutcome::Actuated(BenchTelemetry {
            class: OutputClass::Ignition,
            output: id,
            energized,
        }))
    }
}

const fn on_off(energized: bool) -> &'static str {
    if energized { "on" } else { "off" }
}

fn write_help<W: fmt::Write>(out: &mut W, topic: Option<Topic>) -> fmt::Result {
    for (entry, usage, summary) in COMMANDS {
        if topic.is_none_or(|wanted| wanted == entry) {
            writeln!(out, "{usage:<34}{summary}")?;
        }
    }
    Ok(())
}
