//! Event plumbing between the radio interrupt layer and the sequencer.
//!
//! Interrupt handlers post [`RadioEvent`]s into an [`EventQueue`]; a single
//! task owns the sequencer and the running access and consumes the queue one
//! event at a time.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender, TrySendError};

use crate::access::{Access, AccessOps};
use crate::fproc::{AccessEnd, AccessScheduler, FrameSequencer, RadioEvent, SequencerError};
use crate::llhw::Llhw;

/// Depth of the queue between the interrupt layer and the sequencer task.
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Queue carrying radio completions.
pub type EventQueue<M, const N: usize = EVENT_QUEUE_DEPTH> = Channel<M, RadioEvent, N>;

/// Convenience sender type alias for the event queue.
pub type EventSender<'a, M, const N: usize = EVENT_QUEUE_DEPTH> = Sender<'a, M, RadioEvent, N>;

/// Convenience receiver type alias for the event queue.
pub type EventReceiver<'a, M, const N: usize = EVENT_QUEUE_DEPTH> =
    Receiver<'a, M, RadioEvent, N>;

/// Failure to hand an event to the sequencer task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PostError {
    /// The queue is full; the event is handed back.
    QueueFull(RadioEvent),
}

impl fmt::Display for PostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostError::QueueFull(event) => write!(f, "event queue full, dropped {event}"),
        }
    }
}

/// Posts an event without waiting; safe to call from interrupt context.
pub fn post_event<M, const N: usize>(
    sender: &EventSender<'_, M, N>,
    event: RadioEvent,
) -> Result<(), PostError>
where
    M: RawMutex,
{
    match sender.try_send(event) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(event)) => {
            warn!("runtime: {} dropped, queue full", event);
            Err(PostError::QueueFull(event))
        }
    }
}

/// Admits `access` and feeds it queued events until it ends.
///
/// An `Err` means `begin` failed; see [`FrameSequencer::begin`] for when the
/// access has been told.
pub async fn drive_access<H, S, O, M, const N: usize>(
    sequencer: &mut FrameSequencer<H, S>,
    access: &mut Access<O>,
    events: &EventReceiver<'_, M, N>,
) -> Result<AccessEnd, SequencerError>
where
    H: Llhw,
    S: AccessScheduler,
    O: AccessOps<Frame = H::Frame>,
    M: RawMutex,
{
    sequencer.begin(access)?;

    loop {
        if let Some(end) = sequencer.access_end() {
            return Ok(end);
        }
        let event = events.receive().await;
        sequencer.handle_event(access, event);
    }
}

/// Handles every event already queued, without waiting. Returns how many
/// were consumed.
pub fn process_pending<H, S, O, M, const N: usize>(
    sequencer: &mut FrameSequencer<H, S>,
    access: &mut Access<O>,
    events: &EventReceiver<'_, M, N>,
) -> usize
where
    H: Llhw,
    S: AccessScheduler,
    O: AccessOps<Frame = H::Frame>,
    M: RawMutex,
{
    let mut handled = 0;
    while let Ok(event) = events.try_receive() {
        sequencer.handle_event(access, event);
        handled += 1;
    }
    handled
}
