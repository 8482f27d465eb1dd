//! Command language understood by the emulator.
//!
//! Lines are matched case-insensitively. See `HELP_TOPICS` in the session
//! module for the user-facing summary of each command.

use std::fmt;

use fproc_core::access::RxError;
use fproc_core::fproc::RadioEvent;
use fproc_core::llhw::{LlhwError, RxTimeout};
use fproc_core::sim::LlhwOp;
use winnow::Parser;
use winnow::ascii::{dec_uint, hex_uint, space1};
use winnow::combinator::{alt, opt, preceded, repeat, separated};
use winnow::error::ModalResult;
use winnow::token::{rest, take_while};

/// One frame of a `begin` command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameSpec {
    Rx {
        timeout: RxTimeout,
        sts: bool,
        aack: bool,
    },
    Tx {
        sts: bool,
        rx_after: bool,
    },
}

/// Parsed `begin` command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BeginSpec {
    pub frames: Vec<FrameSpec>,
    pub at: Option<u32>,
    pub duration: Option<u32>,
    pub channel: Option<u8>,
    pub pan: Option<u16>,
    pub short: Option<u16>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Begin(BeginSpec),
    Event(RadioEvent),
    Fail(LlhwOp, LlhwError),
    Status,
    Telemetry,
    Help(Option<String>),
    Exit,
}

/// Rejected command line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyntaxError {
    pub message: String,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Parses one command line.
pub fn parse_command(line: &str) -> Result<Command, SyntaxError> {
    let normalized = line.trim().to_ascii_lowercase();
    command.parse(normalized.as_str()).map_err(|err| {
        let detail = err.inner().to_string();
        let detail = if detail.is_empty() {
            "unexpected input"
        } else {
            detail.as_str()
        };
        SyntaxError {
            message: format!("at column {}: {detail}", err.offset() + 1),
        }
    })
}

#[derive(Clone, Copy)]
enum BeginOption {
    At(u32),
    Duration(u32),
    Channel(u8),
    Pan(u16),
    Short(u16),
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((
        begin.map(Command::Begin),
        event.map(Command::Event),
        fail,
        "status".value(Command::Status),
        "telemetry".value(Command::Telemetry),
        help,
        alt(("exit", "quit")).value(Command::Exit),
    ))
    .parse_next(input)
}

fn begin(input: &mut &str) -> ModalResult<BeginSpec> {
    let frames: Vec<FrameSpec> =
        preceded(("begin", space1), separated(1.., frame, ',')).parse_next(input)?;
    let options: Vec<BeginOption> =
        repeat(0.., preceded(space1, begin_option)).parse_next(input)?;

    let mut spec = BeginSpec {
        frames,
        ..BeginSpec::default()
    };
    for option in options {
        match option {
            BeginOption::At(dtu) => spec.at = Some(dtu),
            BeginOption::Duration(dtu) => spec.duration = Some(dtu),
            BeginOption::Channel(channel) => spec.channel = Some(channel),
            BeginOption::Pan(pan) => spec.pan = Some(pan),
            BeginOption::Short(short) => spec.short = Some(short),
        }
    }
    Ok(spec)
}

fn frame(input: &mut &str) -> ModalResult<FrameSpec> {
    alt((rx_frame, tx_frame)).parse_next(input)
}

fn rx_frame(input: &mut &str) -> ModalResult<FrameSpec> {
    let timeout = preceded("rx", opt(preceded(':', rx_timeout))).parse_next(input)?;
    let modifiers: Vec<&str> =
        repeat(0.., preceded('+', alt(("sts", "aack")))).parse_next(input)?;

    Ok(FrameSpec::Rx {
        timeout: timeout.unwrap_or(RxTimeout::Dtu(0)),
        sts: modifiers.contains(&"sts"),
        aack: modifiers.contains(&"aack"),
    })
}

fn rx_timeout(input: &mut &str) -> ModalResult<RxTimeout> {
    alt((
        "inf".value(RxTimeout::Infinite),
        dec_uint::<_, u32, _>.map(RxTimeout::Dtu),
    ))
    .parse_next(input)
}

fn tx_frame(input: &mut &str) -> ModalResult<FrameSpec> {
    "tx".parse_next(input)?;
    let modifiers: Vec<&str> =
        repeat(0.., preceded('+', alt(("sts", "rxafter")))).parse_next(input)?;

    Ok(FrameSpec::Tx {
        sts: modifiers.contains(&"sts"),
        rx_after: modifiers.contains(&"rxafter"),
    })
}

fn begin_option(input: &mut &str) -> ModalResult<BeginOption> {
    alt((
        preceded("at=", dec_uint::<_, u32, _>).map(BeginOption::At),
        preceded("duration=", dec_uint::<_, u32, _>).map(BeginOption::Duration),
        preceded("channel=", dec_uint::<_, u8, _>).map(BeginOption::Channel),
        preceded("pan=", address).map(BeginOption::Pan),
        preceded("short=", address).map(BeginOption::Short),
    ))
    .parse_next(input)
}

fn address(input: &mut &str) -> ModalResult<u16> {
    alt((preceded("0x", hex_uint::<_, u16, _>), dec_uint::<_, u16, _>)).parse_next(input)
}

fn event(input: &mut &str) -> ModalResult<RadioEvent> {
    alt((
        "rx-frame".value(RadioEvent::RxFrame),
        preceded(("rx-error", space1), rx_error_kind).map(RadioEvent::RxError),
        "timeout".value(RadioEvent::RxTimeout),
        "tx-done".value(RadioEvent::TxDone),
        "schedule-change".value(RadioEvent::ScheduleChange),
    ))
    .parse_next(input)
}

fn rx_error_kind(input: &mut &str) -> ModalResult<RxError> {
    alt((
        "bad-cksum".value(RxError::BadCksum),
        "unrecoverable".value(RxError::Unrecoverable),
        "filtered-out".value(RxError::FilteredOut),
        "sfd-timeout".value(RxError::SfdTimeout),
        "timeout".value(RxError::Timeout),
        "other".value(RxError::Other),
    ))
    .parse_next(input)
}

fn fail(input: &mut &str) -> ModalResult<Command> {
    let op = preceded(
        ("fail", space1),
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-')
            .verify_map(LlhwOp::from_name),
    )
    .parse_next(input)?;
    let error = preceded(space1, llhw_error).parse_next(input)?;
    Ok(Command::Fail(op, error))
}

fn llhw_error(input: &mut &str) -> ModalResult<LlhwError> {
    alt((
        "busy".value(LlhwError::Busy),
        "bus".value(LlhwError::Bus),
        "late".value(LlhwError::Late),
        "inval".value(LlhwError::InvalidArgument),
        preceded("hw", dec_uint::<_, u16, _>).map(LlhwError::Hardware),
    ))
    .parse_next(input)
}

fn help(input: &mut &str) -> ModalResult<Command> {
    preceded("help", opt(preceded(space1, rest)))
        .map(|topic: Option<&str>| Command::Help(topic.map(str::to_owned)))
        .parse_next(input)
}
