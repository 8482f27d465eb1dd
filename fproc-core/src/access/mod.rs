//! Access descriptors handed to the frame sequencer.
//!
//! An [`Access`] is one scheduled use of the medium: an ordered list of
//! transmit and receive frames plus optional channel and address-filter
//! overrides that hold for the duration of the access. The owner of the
//! access (normally the scheduler) keeps it alive while the sequencer walks
//! it and lends it to every sequencer entry point.

use core::fmt;

use heapless::Vec;

use crate::fproc::SequencerError;
use crate::llhw::{
    ChannelConfig, FilterChanges, HwAddrFilt, RxFrameInfo, RxFrameInfoFlags, RxInfo, StsParams,
    TxFrameInfo,
};

/// Maximum number of frames in one access.
pub const MAX_ACCESS_FRAMES: usize = 16;

/// Receive half of a frame entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxFrame {
    pub info: RxInfo,
    /// Metadata the access wants back with the received frame.
    pub frame_info_flags_request: RxFrameInfoFlags,
}

/// Direction-specific parameters of a frame entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    /// Payload is pulled from [`AccessOps::tx_get_frame`] at dispatch time.
    Tx(TxFrameInfo),
    Rx(RxFrame),
}

/// One step of an access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccessFrame {
    pub kind: FrameKind,
    /// Pushed to the hardware right before the frame runs.
    pub sts_params: Option<StsParams>,
}

impl AccessFrame {
    pub const fn tx(info: TxFrameInfo) -> Self {
        Self {
            kind: FrameKind::Tx(info),
            sts_params: None,
        }
    }

    pub const fn rx(info: RxInfo, frame_info_flags_request: RxFrameInfoFlags) -> Self {
        Self {
            kind: FrameKind::Rx(RxFrame {
                info,
                frame_info_flags_request,
            }),
            sts_params: None,
        }
    }

    #[must_use]
    pub const fn with_sts(mut self, params: StsParams) -> Self {
        self.sts_params = Some(params);
        self
    }

    /// Returns `true` for a receive frame without timeout.
    pub const fn is_unbounded_rx(&self) -> bool {
        match self.kind {
            FrameKind::Rx(rx) => rx.info.timeout.is_infinite(),
            FrameKind::Tx(_) => false,
        }
    }
}

/// Address-filter override applied for the duration of an access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwAddrFiltChange {
    pub filt: HwAddrFilt,
    pub changed: FilterChanges,
}

/// Why a transmit buffer is handed back to the access.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxReturnReason {
    /// The frame went out.
    Consumed,
    /// The frame was never sent.
    Cancel,
}

impl fmt::Display for TxReturnReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxReturnReason::Consumed => f.write_str("consumed"),
            TxReturnReason::Cancel => f.write_str("cancel"),
        }
    }
}

/// Outcome attached to a receive-frame delivery.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    #[default]
    None,
    Timeout,
    BadCksum,
    Unrecoverable,
    FilteredOut,
    SfdTimeout,
    Other,
}

impl fmt::Display for RxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RxError::None => "none",
            RxError::Timeout => "timeout",
            RxError::BadCksum => "bad-cksum",
            RxError::Unrecoverable => "unrecoverable",
            RxError::FilteredOut => "filtered-out",
            RxError::SfdTimeout => "sfd-timeout",
            RxError::Other => "other",
        };
        f.write_str(label)
    }
}

/// Why an access was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InvalidAccessReason {
    NoFrames,
    /// Only the first frame may receive without timeout.
    UnboundedReceive { frame_idx: usize },
    /// Automatic acknowledgement is not handled by the sequencer.
    AutoAckRequested { frame_idx: usize },
    /// Receiving right after a transmit is not handled by the sequencer.
    RxAfterTxRequested { frame_idx: usize },
}

impl fmt::Display for InvalidAccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidAccessReason::NoFrames => f.write_str("no frames"),
            InvalidAccessReason::UnboundedReceive { frame_idx } => {
                write!(f, "frame {frame_idx}: receive without timeout")
            }
            InvalidAccessReason::AutoAckRequested { frame_idx } => {
                write!(f, "frame {frame_idx}: auto-ack requested")
            }
            InvalidAccessReason::RxAfterTxRequested { frame_idx } => {
                write!(f, "frame {frame_idx}: rx after tx requested")
            }
        }
    }
}

/// Callbacks through which the sequencer talks back to the access owner.
pub trait AccessOps {
    /// Frame buffer type, shared with the hardware driver.
    type Frame;

    /// Provides the payload for transmit frame `frame_idx`.
    fn tx_get_frame(&mut self, frame_idx: usize) -> Self::Frame;

    /// Hands back a buffer obtained through [`AccessOps::tx_get_frame`].
    fn tx_return(&mut self, frame_idx: usize, frame: Self::Frame, reason: TxReturnReason);

    /// Delivers the outcome of receive frame `frame_idx`.
    fn rx_frame(
        &mut self,
        frame_idx: usize,
        frame: Option<Self::Frame>,
        info: Option<&RxFrameInfo>,
        error: RxError,
    );

    /// Reports the end of the access.
    fn access_done(&mut self, result: Result<(), SequencerError>);
}

/// One scheduled radio access.
pub struct Access<O> {
    frames: Vec<AccessFrame, MAX_ACCESS_FRAMES>,
    channel: Option<ChannelConfig>,
    hw_addr_filt: Option<HwAddrFiltChange>,
    timestamp_dtu: u32,
    duration_dtu: Option<u32>,
    ops: O,
}

impl<O> Access<O> {
    /// Creates an empty access starting at time zero.
    pub const fn new(ops: O) -> Self {
        Self {
            frames: Vec::new(),
            channel: None,
            hw_addr_filt: None,
            timestamp_dtu: 0,
            duration_dtu: None,
            ops,
        }
    }

    /// Appends a frame, giving it back when the access is full.
    pub fn push_frame(&mut self, frame: AccessFrame) -> Result<(), AccessFrame> {
        self.frames.push(frame)
    }

    /// Requests a channel for the duration of the access.
    #[must_use]
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Requests an address-filter override for the duration of the access.
    #[must_use]
    pub fn with_hw_addr_filt(mut self, filt: HwAddrFilt, changed: FilterChanges) -> Self {
        self.hw_addr_filt = Some(HwAddrFiltChange { filt, changed });
        self
    }

    /// Sets the scheduled start and the optional duration, both in DTU.
    #[must_use]
    pub fn with_timing(mut self, timestamp_dtu: u32, duration_dtu: Option<u32>) -> Self {
        self.timestamp_dtu = timestamp_dtu;
        self.duration_dtu = duration_dtu;
        self
    }

    pub fn frame(&self, frame_idx: usize) -> Option<&AccessFrame> {
        self.frames.get(frame_idx)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub const fn channel(&self) -> Option<&ChannelConfig> {
        self.channel.as_ref()
    }

    /// Returns the filter override, skipping one that selects no field.
    pub fn hw_addr_filt(&self) -> Option<&HwAddrFiltChange> {
        self.hw_addr_filt
            .as_ref()
            .filter(|change| !change.changed.is_empty())
    }

    pub const fn timestamp_dtu(&self) -> u32 {
        self.timestamp_dtu
    }

    pub const fn duration_dtu(&self) -> Option<u32> {
        self.duration_dtu
    }

    /// Start time of the following access, when this one has a duration.
    pub fn next_access_dtu(&self) -> Option<u32> {
        self.duration_dtu
            .map(|duration| self.timestamp_dtu.wrapping_add(duration))
    }

    pub const fn ops(&self) -> &O {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut O {
        &mut self.ops
    }

    /// Checks the admission rules: at least one frame, and only frame 0 may
    /// receive without timeout.
    pub fn validate(&self) -> Result<(), InvalidAccessReason> {
        if self.frames.is_empty() {
            return Err(InvalidAccessReason::NoFrames);
        }

        match self
            .frames
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, frame)| frame.is_unbounded_rx())
        {
            Some((frame_idx, _)) => Err(InvalidAccessReason::UnboundedReceive { frame_idx }),
            None => Ok(()),
        }
    }
}

impl<O: fmt::Debug> fmt::Debug for Access<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Access")
            .field("frames", &self.frames)
            .field("channel", &self.channel)
            .field("hw_addr_filt", &self.hw_addr_filt)
            .field("timestamp_dtu", &self.timestamp_dtu)
            .field("duration_dtu", &self.duration_dtu)
            .field("ops", &self.ops)
            .finish()
    }
}
