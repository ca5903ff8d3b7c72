#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Line assembly and response glue for the UART bench console.

use core::fmt::Write;
use core::str;

use ecu_core::bench::{BenchError, BenchExecutor, BenchOutcome};
use ecu_core::schedule::CompareTimer;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use heapless::Vec;

use crate::status;

/// Maximum number of bytes accepted on a single line (excluding terminator).
pub const MAX_LINE_LEN: usize = 96;

/// Room for the longest response (`help` with every topic).
pub const RESPONSE_CAPACITY: usize = 768;

pub const PROMPT: &str = "> ";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineError {
    /// Input exceeded [`MAX_LINE_LEN`]; the rest of the line is discarded.
    Overflow,
    InvalidUtf8,
}

/// Collects console bytes into lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    overflowed: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            overflowed: false,
        }
    }

    /// Feeds one byte; CR or LF hands the finished line to `on_line`.
    ///
    /// Empty lines are skipped, so CRLF terminators produce one call.
    pub fn ingest<R>(
        &mut self,
        byte: u8,
        on_line: impl FnOnce(Result<&str, LineError>) -> R,
    ) -> Option<R> {
        match byte {
            b'\r' | b'\n' => {
                let result = if core::mem::take(&mut self.overflowed) {
                    Some(on_line(Err(LineError::Overflow)))
                } else if self.buffer.is_empty() {
                    None
                } else {
                    let line = str::from_utf8(&self.buffer).map_err(|_| LineError::InvalidUtf8);
                    Some(on_line(line))
                };
                self.buffer.clear();
                result
            }
            0x08 | 0x7f => {
                self.buffer.pop();
                None
            }
            value => {
                if self.buffer.push(value).is_err() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
}

/// Executes one assembled line and renders the reply, prompt included.
///
/// `status` is followed by the interrupt counters.
pub fn respond<T, P, D, W>(
    bench: &mut BenchExecutor<'_, T, P, D>,
    line: Result<&str, LineError>,
    out: &mut W,
) -> Option<BenchOutcome>
where
    T: CompareTimer,
    P: OutputPin,
    D: SpiDevice,
    W: Write,
{
    let outcome = match line {
        Ok(line) => match bench.execute(line, out) {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                write_error(out, error);
                None
            }
        },
        Err(LineError::Overflow) => {
            let _ = writeln!(out, "error: line longer than {MAX_LINE_LEN} bytes");
            None
        }
        Err(LineError::InvalidUtf8) => {
            let _ = writeln!(out, "error: input is not UTF-8");
            None
        }
    };

    if outcome == Some(BenchOutcome::Status) {
        let _ = status::counters().write_line(out);
    }
    let _ = out.write_str(PROMPT);
    outcome
}

fn write_error<W: Write>(out: &mut W, error: BenchError) {
    let _ = writeln!(out, "error: {error}");
}

#[cfg(test)]
mod tests {
    use super::*;

    type Line = Result<std::string::String, LineError>;

    fn feed(assembler: &mut LineAssembler, input: &[u8]) -> std::vec::Vec<Line> {
        input
            .iter()
            .filter_map(|byte| assembler.ingest(*byte, |line| line.map(std::string::String::from)))
            .collect()
    }

    fn ok(line: &str) -> Line {
        Ok(line.to_owned())
    }

    #[test]
    fn crlf_terminates_one_line() {
        let mut assembler = LineAssembler::new();
        let lines = feed(&mut assembler, b"inj 1 open\r\nstatus\n");
        assert_eq!(lines, [ok("inj 1 open"), ok("status")]);
    }

    #[test]
    fn backspace_edits_the_line() {
        let mut assembler = LineAssembler::new();
        let lines = feed(&mut assembler, b"stoq\x08p\r");
        assert_eq!(lines, [ok("stop")]);
    }

    #[test]
    fn overflow_discards_the_whole_line() {
        let mut assembler = LineAssembler::new();
        let mut input = [b'x'; MAX_LINE_LEN + 4].to_vec();
        input.extend_from_slice(b"\rhelp\r");
        let lines = feed(&mut assembler, &input);
        assert_eq!(lines, [Err(LineError::Overflow), ok("help")]);
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let mut assembler = LineAssembler::new();
        let lines = feed(&mut assembler, &[0xff, 0xfe, b'\n']);
        assert_eq!(lines, [Line::Err(LineError::InvalidUtf8)]);
    }
}
