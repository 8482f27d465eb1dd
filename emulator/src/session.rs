use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use fproc_core::access::{Access, AccessFrame};
use fproc_core::fproc::{AccessEnd, FrameSequencer, SequencerError};
use fproc_core::llhw::{
    ChannelConfig, FilterChanges, RxAfterTx, RxFrameInfoFlags, RxInfo, RxInfoFlags,
    RxTimeout, StsParams, TxFrameInfo,
};
use fproc_core::pib::MacPib;
use fproc_core::sim::{RecordingAccess, RecordingScheduler, SimRadio};

use crate::script::{BeginSpec, Command, FrameSpec, parse_command};

/// Placeholder STS material; only its presence matters to the sequencer.
const EMULATED_STS: StsParams = StsParams {
    v: [0; 16],
    key: [0; 16],
    n_segs: 1,
    seg_len_ins: 64,
};

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "begin",
        "begin <rx[:dtu|:inf][+sts][+aack]|tx[+sts][+rxafter]>,... [at=] [duration=] [channel=] [pan=] [short=]  - admit an access",
    ),
    (
        "events",
        "rx-frame | timeout | rx-error <kind> | tx-done | schedule-change  - inject a radio event",
    ),
    (
        "fail",
        "fail <set-channel|set-filter|set-sts|rx-enable|rx-disable|rx-get-frame|tx-frame> <busy|late|inval|bus|hwN>  - fail the next call",
    ),
    (
        "status",
        "status                          - display sequencer and radio state",
    ),
    (
        "telemetry",
        "telemetry                       - dump the telemetry ring",
    ),
    (
        "help",
        "help [topic]                    - show help for a command",
    ),
];

type Sequencer = FrameSequencer<SimRadio, RecordingScheduler>;

pub struct Session {
    sequencer: Sequencer,
    access: Option<Access<RecordingAccess>>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    /// Creates a session, recording a transcript to `transcript` when given.
    pub fn new(transcript: Option<&Path>, header: &str) -> io::Result<Self> {
        let transcript = match transcript {
            Some(path) => Some(TranscriptLogger::new(path, header)?),
            None => None,
        };
        let pib = MacPib::default();

        Ok(Self {
            sequencer: FrameSequencer::new(SimRadio::new(&pib), RecordingScheduler::new(), pib),
            access: None,
            transcript,
            started_at: HostInstant::now(),
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Command, trimmed)?;
        }

        let lines = match parse_command(trimmed) {
            Ok(Command::Begin(spec)) => self.handle_begin(&spec),
            Ok(Command::Event(event)) => match self.access.as_mut() {
                Some(access) => {
                    self.sequencer.handle_event(access, event);
                    self.drain(vec![format!("OK {event}")])
                }
                None => vec!["ERR no access admitted".to_string()],
            },
            Ok(Command::Fail(op, error)) => {
                if self.sequencer.llhw_mut().fail_next(op, error) {
                    vec![format!("OK next {op} fails with {error}")]
                } else {
                    vec!["ERR too many pending failures".to_string()]
                }
            }
            Ok(Command::Status) => self.status(),
            Ok(Command::Telemetry) => self.telemetry(),
            Ok(Command::Help(topic)) => help(topic.as_deref()),
            Ok(Command::Exit) => vec!["Session closed.".to_string()],
            Err(err) => vec![format!("ERR syntax {err}")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn handle_begin(&mut self, spec: &BeginSpec) -> Vec<String> {
        let mut access = match build_access(spec, self.sequencer.pib()) {
            Ok(access) => access,
            Err(message) => return vec![format!("ERR {message}")],
        };

        let head = match self.sequencer.begin(&mut access) {
            Ok(()) => format!("OK begin {} frames", access.len()),
            Err(SequencerError::AccessInProgress) => {
                return vec![format!("ERR {}", SequencerError::AccessInProgress)];
            }
            Err(error) => format!("ERR begin {error}"),
        };

        self.access = Some(access);
        self.drain(vec![head])
    }

    /// Appends everything the last step caused, then the resulting state.
    fn drain(&mut self, mut lines: Vec<String>) -> Vec<String> {
        for record in self.sequencer.llhw_mut().take_calls() {
            lines.push(format!("  llhw: {record}"));
        }
        if let Some(access) = self.access.as_mut() {
            for callback in access.ops_mut().take_callbacks() {
                lines.push(format!("  access: {callback}"));
            }
        }
        for notice in self.sequencer.scheduler_mut().take_notices() {
            lines.push(format!("  scheduler: {notice}"));
        }
        lines.push(format!("  state: {}", describe_state(&self.sequencer)));
        lines
    }

    fn status(&self) -> Vec<String> {
        let radio = self.sequencer.llhw();
        let filt = radio.hw_addr_filt();
        let mut lines = vec![
            format!("state: {}", describe_state(&self.sequencer)),
            format!("radio channel: {}", radio.channel()),
            format!(
                "radio filter: pan={:#06x} short={:#06x} coord={}",
                filt.pan_id, filt.short_addr, filt.pan_coord
            ),
            format!("rx armed: {}", radio.is_rx_armed()),
            format!(
                "pib channel: {}",
                self.sequencer.pib().phy_current_channel
            ),
        ];
        if let Some(access) = self.access.as_ref() {
            lines.push(format!(
                "access: {} frames, {} tx buffers outstanding",
                access.len(),
                access.ops().outstanding_tx()
            ));
            let window = match access.duration_dtu() {
                Some(duration) => format!("{duration}"),
                None => "open".to_string(),
            };
            lines.push(format!(
                "access window: at={} duration={window}",
                access.timestamp_dtu()
            ));
        }
        lines
    }

    fn telemetry(&self) -> Vec<String> {
        let telemetry = self.sequencer.telemetry();
        if telemetry.is_empty() {
            return vec!["telemetry: empty".to_string()];
        }

        let mut lines = vec![format!(
            "telemetry ({} records, current access {})",
            telemetry.len(),
            telemetry.current_access()
        )];
        for record in telemetry.oldest_first() {
            let marker = if record.event.is_fault() { '!' } else { ' ' };
            lines.push(format!(
                " {marker}#{:<4} access {:<3} {}",
                record.id, record.access, record.event
            ));
        }
        lines
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Sequencer, line)?;
            }
        }
        Ok(())
    }
}

fn build_access(spec: &BeginSpec, pib: &MacPib) -> Result<Access<RecordingAccess>, String> {
    let at = spec.at.unwrap_or(0);
    let mut access = Access::new(RecordingAccess::new()).with_timing(at, spec.duration);

    for frame in &spec.frames {
        let frame = match *frame {
            FrameSpec::Rx { timeout, sts, aack } => {
                let mut info = if at == 0 {
                    RxInfo::immediate(timeout)
                } else {
                    RxInfo::at(at, timeout)
                };
                if aack {
                    info.flags = info.flags | RxInfoFlags::AACK;
                }
                with_sts(AccessFrame::rx(info, RxFrameInfoFlags::TIMESTAMP_DTU), sts)
            }
            FrameSpec::Tx { sts, rx_after } => {
                let mut info = if at == 0 {
                    TxFrameInfo::immediate()
                } else {
                    TxFrameInfo::at(at)
                };
                if rx_after {
                    info.rx_after_tx = Some(RxAfterTx {
                        delay_dtu: 0,
                        timeout: RxTimeout::Dtu(0),
                    });
                }
                with_sts(AccessFrame::tx(info), sts)
            }
        };
        if access.push_frame(frame).is_err() {
            return Err(format!("at most {} frames per access", access.len()));
        }
    }

    if let Some(channel) = spec.channel {
        let current = pib.phy_current_channel;
        access = access.with_channel(ChannelConfig::new(
            current.page,
            channel,
            current.preamble_code,
        ));
    }

    let mut changed = FilterChanges::NONE;
    let mut filt = pib.hw_addr_filt();
    if let Some(pan) = spec.pan {
        filt.pan_id = pan;
        changed = changed | FilterChanges::PAN_ID;
    }
    if let Some(short) = spec.short {
        filt.short_addr = short;
        changed = changed | FilterChanges::SHORT_ADDR;
    }
    if !changed.is_empty() {
        access = access.with_hw_addr_filt(filt, changed);
    }

    Ok(access)
}

fn with_sts(frame: AccessFrame, sts: bool) -> AccessFrame {
    if sts {
        frame.with_sts(EMULATED_STS)
    } else {
        frame
    }
}

fn describe_state(sequencer: &Sequencer) -> String {
    let state = sequencer.state();
    match (state.frame_idx(), sequencer.access_end()) {
        (Some(frame_idx), _) => format!("{} #{frame_idx}", state.name()),
        (None, Some(AccessEnd::Aborted(error))) => format!("{} ({error})", state.name()),
        (None, _) => state.name().to_string(),
    }
}

fn help(topic: Option<&str>) -> Vec<String> {
    match topic {
        None => {
            let mut lines = vec!["Available commands:".to_string()];
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines
        }
        Some(target) => match HELP_TOPICS.iter().find(|(name, _)| *name == target) {
            Some((_, detail)) => vec![format!("  {detail}")],
            None => vec![
                format!("No help available for `{target}`."),
                format!("Available topics: {}", help_topic_list()),
            ],
        },
    }
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(header)?;
        Ok(logger)
    }

    fn write_header(&mut self, header: &str) -> io::Result<()> {
        writeln!(self.writer, "# fproc scenario: {header}")?;
        writeln!(
            self.writer,
            "# cmd> lines are injected commands, seq< lines the radio calls, callbacks and notices they caused"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "{:>8.3}s {} {line}",
            elapsed.as_secs_f64(),
            role.prefix()
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Command,
    Sequencer,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Command => "cmd>",
            TranscriptRole::Sequencer => "seq<",
        }
    }
}
