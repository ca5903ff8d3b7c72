mod session;
mod sim;

use std::env;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::process;

use session::{Profile, Session};

const USAGE: &str = "Usage: ecu-emulator [--profile <direct|switched|mixed>] [--script <file>]";

/// Command-line options.
#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    profile: Option<Profile>,
    /// Replay commands from a file instead of stdin.
    script: Option<String>,
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
                None => (arg, None),
            };
            let mut value = || {
                inline
                    .clone()
                    .or_else(|| args.next())
                    .ok_or_else(|| format!("Expected value after {flag}"))
            };
            match flag.as_str() {
                "--profile" => options.profile = Some(Profile::from_tag(&value()?)?),
                "--script" => options.script = Some(value()?),
                positional if !positional.starts_with('-') && options.profile.is_none() => {
                    options.profile = Some(Profile::from_tag(positional)?);
                }
                other => return Err(format!("Unknown argument `{other}`")),
            }
        }
        Ok(options)
    }
}

fn main() -> io::Result<()> {
    let options = Options::parse(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });
    let profile = options.profile.unwrap_or(Profile::Direct);
    let mut session = Session::new(profile)?;

    let stdout = io::stdout();
    let mut writer = stdout.lock();
    writeln!(
        writer,
        "ECU emulator on the {} board; transcript in {}. Type `help` or `exit`.",
        profile.tag(),
        profile.log_path()
    )?;

    match options.script {
        Some(path) => {
            let script = BufReader::new(File::open(&path)?);
            run(&mut session, script, &mut writer, false)
        }
        None => run(&mut session, io::stdin().lock(), &mut writer, true),
    }
}

/// Feeds every line of `input` to the session until EOF or `exit`.
fn run(
    session: &mut Session,
    input: impl BufRead,
    writer: &mut impl Write,
    interactive: bool,
) -> io::Result<()> {
    let mut lines = input.lines();
    loop {
        if interactive {
            write!(writer, "> ")?;
            writer.flush()?;
        }
        let Some(line) = lines.next().transpose()? else {
            break;
        };

        let command = line.trim();
        if command.is_empty() || command.starts_with('#') {
            continue;
        }
        if !interactive {
            writeln!(writer, "> {command}")?;
        }
        if ["exit", "quit"]
            .iter()
            .any(|word| command.eq_ignore_ascii_case(word))
        {
            writeln!(writer, "Session closed.")?;
            return Ok(());
        }

        for response in session.handle_command(command)? {
            writeln!(writer, "{response}")?;
        }
    }
    writeln!(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, String> {
        Options::parse(args.iter().map(|arg| (*arg).to_string()))
    }

    #[test]
    fn profile_accepts_flag_inline_and_positional_forms() {
        let expected = Options {
            profile: Some(Profile::Mixed),
            script: None,
        };
        assert_eq!(parse(&["--profile", "mixed"]), Ok(expected));
        assert_eq!(parse(&["--profile=MIXED"]).map(|o| o.profile), Ok(Some(Profile::Mixed)));
        assert_eq!(parse(&["switched"]).map(|o| o.profile), Ok(Some(Profile::Switched)));
    }

    #[test]
    fn script_and_bad_arguments() {
        let options = parse(&["--script", "bench.txt"]).expect("valid");
        assert_eq!(options.script.as_deref(), Some("bench.txt"));
        assert!(parse(&["--profile"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }

    #[test]
    fn scripted_run_echoes_commands_and_stops_at_exit() {
        let mut session = Session::with_writer(Profile::Direct, io::sink()).expect("sink");
        let script = "# warm up\ninj 1 open\nexit\ninj 2 open\n";
        let mut out = Vec::new();
        run(&mut session, script.as_bytes(), &mut out, false).expect("in-memory io");

        let out = String::from_utf8(out).expect("utf8");
        assert!(out.contains("> inj 1 open\ninj 1 on\n"), "{out}");
        assert!(out.ends_with("Session closed.\n"), "{out}");
        assert!(!out.contains("inj 2"), "{out}");
    }
}
