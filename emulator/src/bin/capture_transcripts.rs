use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../script.rs"]
mod script;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::Session;

/// Scenario name, transcript header and the commands replayed.
const SCENARIOS: &[(&str, &str, &[&str])] = &[
    (
        "rx-tx-exchange",
        "receive then transmit, access completes",
        &["begin rx:5000,tx", "rx-frame", "tx-done", "status"],
    ),
    (
        "unbounded-listen",
        "unbounded receive pre-empted by the scheduler",
        &[
            "begin rx:inf",
            "fail rx-disable busy",
            "schedule-change",
            "rx-frame",
            "begin rx:inf",
            "schedule-change",
        ],
    ),
    (
        "invalid-access",
        "second unbounded receive rejected before any radio call",
        &["begin rx:inf,rx:inf", "begin rx:inf"],
    ),
    (
        "tx-not-preempted",
        "schedule change while transmitting is ignored",
        &["begin tx,rx:100 at=1000 duration=500", "schedule-change", "tx-done", "timeout"],
    ),
    (
        "dispatch-failure",
        "radio failure on the second frame breaks the access",
        &["begin rx:100,tx", "fail tx-frame bus", "timeout", "tx-done", "telemetry"],
    ),
    (
        "config-restore",
        "channel and filter overrides restored from the PIB",
        &["begin tx channel=9 pan=0xbeef short=0x0001", "tx-done", "status"],
    ),
];

fn main() -> io::Result<()> {
    for (name, header, commands) in SCENARIOS {
        record_scenario(name, header, commands)?;
    }
    Ok(())
}

fn record_scenario(name: &str, header: &str, commands: &[&str]) -> io::Result<()> {
    let path = Path::new("transcripts").join(format!("{name}.log"));
    let mut session = Session::new(Some(path.as_path()), header)?;
    for command in commands {
        let _ = session.handle_command(command)?;
    }
    Ok(())
}
