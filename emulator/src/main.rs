mod plant;
mod session;

use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process;

use crossterm::style::Stylize;
use psu_core::ps_module::PsModel;

use session::Session;

struct Options {
    model: PsModel,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: psu-emulator [--model <fap|fac-acdc>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let colored = stdout.is_terminal();
    let mut writer = stdout.lock();
    let mut session = Session::new(options.model, options.transcript.as_deref())?;
    let mut line = String::new();

    writeln!(
        writer,
        "Power-supply emulator ({}). Type `help` for commands or `exit` to quit.",
        options.model.label()
    )?;

    loop {
        line.clear();
        write!(writer, "psu> ")?;
        writer.flush()?;

        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            if colored {
                print_styled(&mut writer, &response)?;
            } else {
                writeln!(writer, "{response}")?;
            }
        }
    }

    Ok(())
}

fn print_styled(writer: &mut impl Write, line: &str) -> io::Result<()> {
    if line.starts_with("error") || line.starts_with("rejected") {
        writeln!(writer, "{}", line.red())
    } else if line.contains("interlock latched") || line.contains("aborted") {
        writeln!(writer, "{}", line.yellow())
    } else if line.contains("alarm raised") {
        writeln!(writer, "{}", line.magenta())
    } else {
        writeln!(writer, "{line}")
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_model(tag: &str) -> Result<PsModel, String> {
    if tag.eq_ignore_ascii_case("fap") {
        Ok(PsModel::Fap)
    } else if tag.eq_ignore_ascii_case("fac-acdc") || tag.eq_ignore_ascii_case("fac_acdc") {
        Ok(PsModel::FacAcDc)
    } else {
        Err(format!("Unknown model `{tag}`"))
    }
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        model: PsModel::Fap,
        transcript: None,
    };
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
            "--model" => options.model = parse_model(&value()?)?,
            "--transcript" => options.transcript = Some(PathBuf::from(value()?)),
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }
    Ok(options)
}
