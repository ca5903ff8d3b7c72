//! Line grammar for the bench console.
//!
//! Keywords are case-insensitive and separated by inline whitespace:
//!
//! ```text
//! inj <1-8> open|close|toggle
//! coil <1-8> charge|release|toggle
//! sync half|full
//! status
//! stop
//! help [inj|coil|sync|status|stop]
//! ```

use core::fmt;

use winnow::ascii::{Caseless, digit1, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::prelude::*;

use crate::assignment::SyncWidth;
use crate::output::OutputId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InjectorAction {
    Open,
    Close,
    Toggle,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoilAction {
    Charge,
    Release,
    Toggle,
}

/// Command keywords, also used as help topics.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Topic {
    Injector,
    Coil,
    Sync,
    Status,
    Stop,
}

/// Structured commands produced by [`parse`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BenchCommand {
    Injector(OutputId, InjectorAction),
    Coil(OutputId, CoilAction),
    Sync(SyncWidth),
    Status,
    Stop,
    Help(Option<Topic>),
}

/// Grammar errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    /// Input could not be matched from this byte offset on.
    Unexpected { offset: usize },
    /// Output number outside 1-8.
    UnknownOutput(u8),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => f.write_str("empty command"),
            ParseError::Unexpected { offset } => write!(f, "unexpected input at column {offset}"),
            ParseError::UnknownOutput(number) => write!(f, "no output {number} (expected 1-8)"),
        }
    }
}

#[derive(Copy, Clone)]
enum Parsed {
    Injector(u8, InjectorAction),
    Coil(u8, CoilAction),
    Sync(SyncWidth),
    Status,
    Stop,
    Help(Option<Topic>),
}

/// Parse one console line.
pub fn parse(line: &str) -> Result<BenchCommand, ParseError> {
    let leading = line.len() - line.trim_start().len();
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut input = trimmed;
    let parsed = terminated(command, eof)
        .parse_next(&mut input)
        .map_err(|_| ParseError::Unexpected {
            offset: leading + trimmed.len() - input.len(),
        })?;

    let output = |number: u8| OutputId::new(number).map_err(|_| ParseError::UnknownOutput(number));
    Ok(match parsed {
        Parsed::Injector(number, action) => BenchCommand::Injector(output(number)?, action),
        Parsed::Coil(number, action) => BenchCommand::Coil(output(number)?, action),
        Parsed::Sync(width) => BenchCommand::Sync(width),
        Parsed::Status => BenchCommand::Status,
        Parsed::Stop => BenchCommand::Stop,
        Parsed::Help(topic) => BenchCommand::Help(topic),
    })
}

fn command(input: &mut &str) -> ModalResult<Parsed> {
    alt((
        injector,
        coil,
        sync,
        Caseless("status").value(Parsed::Status),
        Caseless("stop").value(Parsed::Stop),
        help,
    ))
    .parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<u8> {
    preceded(space1, digit1.try_map(str::parse::<u8>)).parse_next(input)
}

fn injector(input: &mut &str) -> ModalResult<Parsed> {
    let _ = alt((Caseless("injector"), Caseless("inj"))).parse_next(input)?;
    let number = number.parse_next(input)?;
    let action = preceded(
        space1,
        alt((
            Caseless("open").value(InjectorAction::Open),
            Caseless("close").value(InjectorAction::Close),
            Caseless("toggle").value(InjectorAction::Toggle),
        )),
    )
    .parse_next(input)?;
    Ok(Parsed::Injector(number, action))
}

fn coil(input: &mut &str) -> ModalResult<Parsed> {
    let _ = Caseless("coil").parse_next(input)?;
    let number = number.parse_next(input)?;
    let action = preceded(
        space1,
        alt((
            Caseless("charge").value(CoilAction::Charge),
            Caseless("release").value(CoilAction::Release),
            Caseless("toggle").value(CoilAction::Toggle),
        )),
    )
    .parse_next(input)?;
    Ok(Parsed::Coil(number, action))
}

fn sync(input: &mut &str) -> ModalResult<Parsed> {
    let _ = Caseless("sync").parse_next(input)?;
    preceded(
        space1,
        alt((
            Caseless("half").value(SyncWidth::Half),
            Caseless("full").value(SyncWidth::Full),
        )),
    )
    .map(Parsed::Sync)
    .parse_next(input)
}

fn help(input: &mut &str) -> ModalResult<Parsed> {
    let _ = alt((Caseless("help"), "?")).parse_next(input)?;
    opt(preceded(space1, topic))
        .map(Parsed::Help)
        .parse_next(input)
}

fn topic(input: &mut &str) -> ModalResult<Topic> {
    alt((
        alt((Caseless("injector"), Caseless("inj"))).value(Topic::Injector),
        Caseless("coil").value(Topic::Coil),
        Caseless("sync").value(Topic::Sync),
        Caseless("status").value(Topic::Status),
        Caseless("stop").value(Topic::Stop),
    ))
    .parse_next(input)
}
