//! Telemetry catalog for the frame sequencer.
//!
//! Every step the sequencer takes (admission, frame dispatch, deliveries,
//! configuration restore, termination) lands in a fixed-size ring so that
//! firmware diagnostics and the emulator can replay what happened to the
//! last few accesses without any allocation.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::access::RxError;
use crate::fproc::{RadioEvent, SequencerError};
use crate::llhw::LlhwError;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Identifier assigned to every recorded event.
pub type EventId = u32;

/// Identifier assigned to every admitted access.
pub type AccessId = u32;

/// Discriminated sequencer events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    AccessAdmitted { frames: u8 },
    RxArmed(u8),
    TxIssued(u8),
    FrameReceived(u8),
    /// A receive ended without a frame (timeout or reception error).
    RxFailed(u8, RxError),
    /// The received frame was not readable yet.
    RxBusy(u8),
    TxConsumed(u8),
    TxCancelled(u8),
    ScheduleChangeDeferred(u8),
    ScheduleChangeHonored(u8),
    ConfigRestored,
    AccessDone,
    /// The next frame missed its start time; the access ended cleanly.
    AccessEndedEarly(LlhwError),
    AccessBroken(SequencerError),
    UnexpectedEvent(RadioEvent),
}

impl TelemetryEventKind {
    /// Returns `true` for events describing a failure.
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::TxCancelled(_)
                | TelemetryEventKind::AccessBroken(_)
                | TelemetryEventKind::UnexpectedEvent(_)
        )
    }
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::AccessAdmitted { frames } => {
                write!(f, "access-admitted frames={frames}")
            }
            TelemetryEventKind::RxArmed(idx) => write!(f, "rx-armed #{idx}"),
            TelemetryEventKind::TxIssued(idx) => write!(f, "tx-issued #{idx}"),
            TelemetryEventKind::FrameReceived(idx) => write!(f, "frame-received #{idx}"),
            TelemetryEventKind::RxFailed(idx, error) => write!(f, "rx-failed #{idx} {error}"),
            TelemetryEventKind::RxBusy(idx) => write!(f, "rx-busy #{idx}"),
            TelemetryEventKind::TxConsumed(idx) => write!(f, "tx-consumed #{idx}"),
            TelemetryEventKind::TxCancelled(idx) => write!(f, "tx-cancelled #{idx}"),
            TelemetryEventKind::ScheduleChangeDeferred(idx) => {
                write!(f, "schedule-change-deferred #{idx}")
            }
            TelemetryEventKind::ScheduleChangeHonored(idx) => {
                write!(f, "schedule-change-honored #{idx}")
            }
            TelemetryEventKind::ConfigRestored => f.write_str("config-restored"),
            TelemetryEventKind::AccessDone => f.write_str("access-done"),
            TelemetryEventKind::AccessEndedEarly(error) => {
                write!(f, "access-ended-early {error}")
            }
            TelemetryEventKind::AccessBroken(error) => write!(f, "access-broken {error}"),
            TelemetryEventKind::UnexpectedEvent(event) => write!(f, "unexpected-event {event}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryRecord {
    pub id: EventId,
    /// Access the event belongs to; zero before the first admission.
    pub access: AccessId,
    pub event: TelemetryEventKind,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
    current_access: AccessId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
            current_access: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier of the most recently admitted access.
    pub const fn current_access(&self) -> AccessId {
        self.current_access
    }

    /// Opens a new access and records its admission.
    pub fn record_admission(&mut self, frames: usize) -> EventId {
        self.current_access = self.current_access.wrapping_add(1);
        self.record(TelemetryEventKind::AccessAdmitted {
            frames: truncate_index(frames),
        })
    }

    /// Records an arbitrary event against the current access.
    pub fn record(&mut self, event: TelemetryEventKind) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            access: self.current_access,
            event,
        });

        id
    }

    /// Iterates the events of the current access, oldest first.
    pub fn current_access_events(&self) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        let access = self.current_access;
        self.oldest_first()
            .filter(move |record| record.access == access)
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

/// Narrows a frame index for storage; accesses never exceed `u8` frames.
pub(crate) fn truncate_index(index: usize) -> u8 {
    match u8::try_from(index) {
        Ok(value) => value,
        Err(_) => u8::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_and_records_carry_access() {
        let mut recorder = TelemetryRecorder::<8>::new();

        let before = recorder.record(TelemetryEventKind::UnexpectedEvent(RadioEvent::TxDone));
        let admitted = recorder.record_admission(2);
        let armed = recorder.record(TelemetryEventKind::RxArmed(0));

        assert_eq!((before, admitted, armed), (0, 1, 2));

        let records: heapless::Vec<TelemetryRecord, 8> =
            recorder.oldest_first().copied().collect();
        assert_eq!(records[0].access, 0);
        assert_eq!(records[1].access, 1);
        assert_eq!(
            records[1].event,
            TelemetryEventKind::AccessAdmitted { frames: 2 }
        );
        assert_eq!(records[2].access, 1);
    }

    #[test]
    fn ring_keeps_most_recent_entries() {
        let mut recorder = TelemetryRecorder::<4>::new();
        recorder.record_admission(1);
        for idx in 0..6 {
            recorder.record(TelemetryEventKind::RxArmed(idx));
        }

        assert_eq!(recorder.len(), 4);
        let first = recorder.oldest_first().next().copied().expect("record");
        assert_eq!(first.event, TelemetryEventKind::RxArmed(2));
        assert_eq!(
            recorder.latest().map(|record| record.event),
            Some(TelemetryEventKind::RxArmed(5))
        );
    }

    #[test]
    fn current_access_events_skip_earlier_accesses() {
        let mut recorder = TelemetryRecorder::<16>::new();
        recorder.record_admission(1);
        recorder.record(TelemetryEventKind::AccessDone);
        recorder.record_admission(3);
        recorder.record(TelemetryEventKind::TxIssued(0));

        let events: heapless::Vec<TelemetryEventKind, 16> = recorder
            .current_access_events()
            .map(|record| record.event)
            .collect();

        assert_eq!(
            events.as_slice(),
            &[
                TelemetryEventKind::AccessAdmitted { frames: 3 },
                TelemetryEventKind::TxIssued(0),
            ]
        );
    }

    #[test]
    fn display_labels_are_stable() {
        let mut out: heapless::String<48> = heapless::String::new();
        core::fmt::write(
            &mut out,
            format_args!("{}", TelemetryEventKind::RxFailed(1, RxError::Timeout)),
        )
        .expect("fits");
        assert_eq!(out.as_str(), "rx-failed #1 timeout");
        assert!(TelemetryEventKind::AccessBroken(SequencerError::Llhw(LlhwError::Bus)).is_fault());
    }
}
