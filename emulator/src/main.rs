mod script;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use env_logger::Builder;
use log::LevelFilter;

use session::Session;

const DEFAULT_TRANSCRIPT: &str = "transcripts/interactive.log";

fn main() -> io::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .init();

    let transcript = parse_transcript_path().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: fproc-emulator [--transcript <path>] [--no-transcript]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(transcript.as_deref(), "fproc emulator session")?;
    let mut line = String::new();

    writeln!(
        writer,
        "fproc emulator: build an access with `begin`, then inject radio events. `help` lists commands."
    )?;

    loop {
        write!(writer, "fproc> ")?;
        writer.flush()?;

        line.clear();
        if reader.read_line(&mut line)? == 0 {
            writeln!(writer)?;
            break;
        }

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        for response in session.handle_command(command)? {
            writeln!(writer, "{response}")?;
        }
        if is_exit(command) {
            break;
        }
    }

    Ok(())
}

fn is_exit(command: &str) -> bool {
    command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit")
}

fn parse_transcript_path() -> Result<Option<PathBuf>, String> {
    let mut path = Some(PathBuf::from(DEFAULT_TRANSCRIPT));
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--transcript=") {
            path = Some(PathBuf::from(value));
        } else if arg == "--transcript" {
            let Some(value) = args.next() else {
                return Err("Expected value after --transcript".to_string());
            };
            path = Some(PathBuf::from(value));
        } else if arg == "--no-transcript" {
            path = None;
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }

    Ok(path)
}
