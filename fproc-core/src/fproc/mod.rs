//! Frame processing state machine.
//!
//! The [`FrameSequencer`] owns the radio driver, the scheduler notifier and
//! the MAC PIB, and walks one [`Access`](crate::access::Access) at a time.
//! Accesses are admitted with [`FrameSequencer::begin`]; afterwards every
//! completion reported by the radio is fed back through
//! [`FrameSequencer::handle_event`] until the access finishes or breaks.

mod multi;

use core::fmt;

use crate::access::{InvalidAccessReason, RxError};
use crate::llhw::{Llhw, LlhwError};
use crate::pib::MacPib;
use crate::telemetry::TelemetryRecorder;

/// Completion reported by the radio while an access is running.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent {
    /// A frame is ready to be read.
    RxFrame,
    RxTimeout,
    /// Reception ended with an error.
    RxError(RxError),
    TxDone,
    /// The scheduler wants the medium back.
    ScheduleChange,
}

impl fmt::Display for RadioEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioEvent::RxFrame => f.write_str("rx-frame"),
            RadioEvent::RxTimeout => f.write_str("rx-timeout"),
            RadioEvent::RxError(kind) => write!(f, "rx-error {kind}"),
            RadioEvent::TxDone => f.write_str("tx-done"),
            RadioEvent::ScheduleChange => f.write_str("schedule-change"),
        }
    }
}

/// Error detail reported when an access cannot run or stops early.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SequencerError {
    InvalidAccess(InvalidAccessReason),
    Llhw(LlhwError),
    /// Another access still has a frame in flight.
    AccessInProgress,
}

impl fmt::Display for SequencerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequencerError::InvalidAccess(reason) => write!(f, "invalid access: {reason}"),
            SequencerError::Llhw(error) => write!(f, "llhw: {error}"),
            SequencerError::AccessInProgress => f.write_str("access in progress"),
        }
    }
}

impl From<LlhwError> for SequencerError {
    fn from(error: LlhwError) -> Self {
        SequencerError::Llhw(error)
    }
}

impl From<InvalidAccessReason> for SequencerError {
    fn from(reason: InvalidAccessReason) -> Self {
        SequencerError::InvalidAccess(reason)
    }
}

/// Sequencer phases. The in-flight frame and the transmit buffer lent to
/// the driver live inside the state that needs them.
#[derive(Debug, Eq, PartialEq)]
pub enum SequencerState<F> {
    Idle,
    Receiving { frame_idx: usize },
    Transmitting { frame_idx: usize, pending: F },
    Finished,
    Broken(SequencerError),
}

impl<F> SequencerState<F> {
    /// Returns `true` while a frame is in flight.
    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            SequencerState::Receiving { .. } | SequencerState::Transmitting { .. }
        )
    }

    /// Returns `true` when the last access has ended.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SequencerState::Finished | SequencerState::Broken(_))
    }

    /// Index of the frame in flight.
    pub const fn frame_idx(&self) -> Option<usize> {
        match self {
            SequencerState::Receiving { frame_idx }
            | SequencerState::Transmitting { frame_idx, .. } => Some(*frame_idx),
            SequencerState::Idle | SequencerState::Finished | SequencerState::Broken(_) => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            SequencerState::Idle => "idle",
            SequencerState::Receiving { .. } => "receiving",
            SequencerState::Transmitting { .. } => "transmitting",
            SequencerState::Finished => "finished",
            SequencerState::Broken(_) => "broken",
        }
    }
}

/// Terminal outcome of an access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessEnd {
    Completed,
    Aborted(SequencerError),
}

/// Notifications sent to the access scheduler.
pub trait AccessScheduler {
    /// The access has reported done.
    fn access_finished(&mut self);

    /// A transmit is in flight and must not be pre-empted.
    fn hold_access(&mut self);

    /// Start the next access as soon as possible.
    fn run_next_access_now(&mut self);

    /// Start the next access at `timestamp_dtu`.
    fn run_next_access_at(&mut self, timestamp_dtu: u32);

    /// The radio is in an unknown state and needs recovery.
    fn recover_broken_access(&mut self);
}

/// Drives accesses through the radio driver.
pub struct FrameSequencer<H, S>
where
    H: Llhw,
{
    llhw: H,
    scheduler: S,
    pib: MacPib,
    state: SequencerState<H::Frame>,
    telemetry: TelemetryRecorder,
}

impl<H, S> FrameSequencer<H, S>
where
    H: Llhw,
    S: AccessScheduler,
{
    /// Creates an idle sequencer.
    pub const fn new(llhw: H, scheduler: S, pib: MacPib) -> Self {
        Self {
            llhw,
            scheduler,
            pib,
            state: SequencerState::Idle,
            telemetry: TelemetryRecorder::new(),
        }
    }

    pub const fn state(&self) -> &SequencerState<H::Frame> {
        &self.state
    }

    pub const fn llhw(&self) -> &H {
        &self.llhw
    }

    pub fn llhw_mut(&mut self) -> &mut H {
        &mut self.llhw
    }

    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub const fn pib(&self) -> &MacPib {
        &self.pib
    }

    /// Updates the values restored after each access.
    pub fn pib_mut(&mut self) -> &mut MacPib {
        &mut self.pib
    }

    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Terminal outcome of the last access, once it has ended.
    pub const fn access_end(&self) -> Option<AccessEnd> {
        match self.state {
            SequencerState::Finished => Some(AccessEnd::Completed),
            SequencerState::Broken(error) => Some(AccessEnd::Aborted(error)),
            SequencerState::Idle
            | SequencerState::Receiving { .. }
            | SequencerState::Transmitting { .. } => None,
        }
    }

    /// Returns to [`SequencerState::Idle`] after an access has ended.
    /// Has no effect while a frame is in flight.
    pub fn reset(&mut self) -> bool {
        if self.state.is_active() {
            return false;
        }
        self.state = SequencerState::Idle;
        true
    }
}
