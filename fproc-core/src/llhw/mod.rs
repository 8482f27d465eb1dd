//! Low-level hardware contract consumed by the frame sequencer.
//!
//! The physical-layer driver (register I/O, bus transactions, timestamp
//! capture) lives outside this crate. The sequencer only sees the operations
//! listed on [`Llhw`] plus the parameter types they carry. Each call returns
//! synchronously; completion of an armed receive or an issued transmit is
//! reported later as a [`RadioEvent`](crate::fproc::RadioEvent).

use core::fmt;
use core::ops::BitOr;

/// Declares a bitmask newtype with named flags.
macro_rules! radio_flags {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($repr:ty) {
            $(
                $(#[$flag_meta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        $vis struct $name($repr);

        impl $name {
            /// No flag set.
            pub const NONE: Self = Self(0);
            $(
                $(#[$flag_meta])*
                pub const $flag: Self = Self($value);
            )*

            /// Builds a mask from raw bits.
            pub const fn from_bits(bits: $repr) -> Self {
                Self(bits)
            }

            /// Returns the raw bits.
            pub const fn bits(self) -> $repr {
                self.0
            }

            /// Returns `true` when every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns `true` when no bit is set.
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Returns the union of both masks.
            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self::Output {
                self.union(rhs)
            }
        }
    };
}

radio_flags! {
    /// Options attached to a receive request.
    pub struct RxInfoFlags(u16) {
        /// Start receiving at [`RxInfo::timestamp_dtu`] instead of immediately.
        const TIMESTAMP_DTU = 1 << 0;
        /// Let the hardware acknowledge received frames on its own.
        const AACK = 1 << 1;
        /// Ranging frame, timestamps must be captured.
        const RANGING = 1 << 2;
        /// Keep the ranging clock running after the frame.
        const KEEP_RANGING_CLOCK = 1 << 3;
        /// STS packet configuration 1 (STS after SFD).
        const SP1 = 1 << 4;
        /// STS packet configuration 2 (STS after payload).
        const SP2 = 1 << 5;
        /// STS packet configuration 3 (STS only, no payload).
        const SP3 = 1 << 6;
    }
}

radio_flags! {
    /// Options attached to a transmit request.
    pub struct TxFlags(u16) {
        /// Transmit at [`TxFrameInfo::timestamp_dtu`] instead of immediately.
        const TIMESTAMP_DTU = 1 << 0;
    }
}

radio_flags! {
    /// Metadata requested from (and reported by) a frame read.
    pub struct RxFrameInfoFlags(u16) {
        const TIMESTAMP_DTU = 1 << 0;
        const TIMESTAMP_RCTU = 1 << 1;
        const LQI = 1 << 2;
        const RANGING_STS_FOM = 1 << 3;
        /// Set by the driver when an acknowledgement was sent automatically.
        const AACK = 1 << 4;
    }
}

radio_flags! {
    /// Address-filter fields touched by a filter update.
    pub struct FilterChanges(u8) {
        const PAN_ID = 1 << 0;
        const SHORT_ADDR = 1 << 1;
        const IEEE_ADDR = 1 << 2;
        const PAN_COORD = 1 << 3;
    }
}

/// Channel selection, as programmed into the PHY.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub page: u8,
    pub channel: u8,
    pub preamble_code: u8,
}

impl ChannelConfig {
    pub const fn new(page: u8, channel: u8, preamble_code: u8) -> Self {
        Self {
            page,
            channel,
            preamble_code,
        }
    }
}

impl fmt::Display for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page={} channel={} code={}",
            self.page, self.channel, self.preamble_code
        )
    }
}

/// Hardware address filter values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwAddrFilt {
    pub pan_id: u16,
    pub short_addr: u16,
    pub extended_addr: u64,
    pub pan_coord: bool,
}

impl HwAddrFilt {
    /// Copies the fields selected by `changed` from `other`.
    #[must_use]
    pub const fn merged(mut self, other: &HwAddrFilt, changed: FilterChanges) -> Self {
        if changed.contains(FilterChanges::PAN_ID) {
            self.pan_id = other.pan_id;
        }
        if changed.contains(FilterChanges::SHORT_ADDR) {
            self.short_addr = other.short_addr;
        }
        if changed.contains(FilterChanges::IEEE_ADDR) {
            self.extended_addr = other.extended_addr;
        }
        if changed.contains(FilterChanges::PAN_COORD) {
            self.pan_coord = other.pan_coord;
        }
        self
    }
}

/// Scrambled timestamp sequence parameters for one frame.
///
/// Only their presence matters to the sequencer; the values are computed by
/// the security layer and forwarded verbatim.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StsParams {
    pub v: [u8; 16],
    pub key: [u8; 16],
    pub n_segs: u8,
    pub seg_len_ins: u16,
}

/// Receive timeout.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxTimeout {
    /// Wait until a frame arrives or reception is disabled.
    Infinite,
    /// Give up after the given number of device time units. Zero selects the
    /// driver default.
    Dtu(u32),
}

impl RxTimeout {
    pub const fn is_infinite(self) -> bool {
        matches!(self, RxTimeout::Infinite)
    }
}

impl fmt::Display for RxTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxTimeout::Infinite => f.write_str("inf"),
            RxTimeout::Dtu(dtu) => write!(f, "{dtu}"),
        }
    }
}

/// Receive request parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxInfo {
    pub timestamp_dtu: u32,
    pub timeout: RxTimeout,
    pub flags: RxInfoFlags,
    pub ant_set_id: u8,
}

impl RxInfo {
    /// Immediate receive with the given timeout.
    pub const fn immediate(timeout: RxTimeout) -> Self {
        Self {
            timestamp_dtu: 0,
            timeout,
            flags: RxInfoFlags::NONE,
            ant_set_id: 0,
        }
    }

    /// Receive starting at `timestamp_dtu`.
    pub const fn at(timestamp_dtu: u32, timeout: RxTimeout) -> Self {
        Self {
            timestamp_dtu,
            timeout,
            flags: RxInfoFlags::TIMESTAMP_DTU,
            ant_set_id: 0,
        }
    }
}

/// Receive window opened automatically after a transmit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxAfterTx {
    pub delay_dtu: u32,
    pub timeout: RxTimeout,
}

/// Transmit request parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxFrameInfo {
    pub timestamp_dtu: u32,
    /// Receive window armed by the driver once the frame is sent.
    pub rx_after_tx: Option<RxAfterTx>,
    pub flags: TxFlags,
    pub ant_set_id: u8,
}

impl TxFrameInfo {
    /// Immediate transmit.
    pub const fn immediate() -> Self {
        Self {
            timestamp_dtu: 0,
            rx_after_tx: None,
            flags: TxFlags::NONE,
            ant_set_id: 0,
        }
    }

    /// Transmit at `timestamp_dtu`.
    pub const fn at(timestamp_dtu: u32) -> Self {
        Self {
            timestamp_dtu,
            rx_after_tx: None,
            flags: TxFlags::TIMESTAMP_DTU,
            ant_set_id: 0,
        }
    }
}

/// Metadata attached to a received (or failed) frame.
///
/// `flags` is filled in by the caller with the requested fields and updated
/// by the driver with the fields it could actually provide.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxFrameInfo {
    pub timestamp_dtu: u32,
    pub timestamp_rctu: u64,
    pub frame_duration_dtu: u32,
    pub ranging_sts_fom: u8,
    pub lqi: u8,
    pub flags: RxFrameInfoFlags,
}

impl RxFrameInfo {
    /// Empty metadata carrying the requested fields.
    pub const fn requesting(flags: RxFrameInfoFlags) -> Self {
        Self {
            timestamp_dtu: 0,
            timestamp_rctu: 0,
            frame_duration_dtu: 0,
            ranging_sts_fom: 0,
            lqi: 0,
            flags,
        }
    }
}

/// Failure reported by the hardware driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LlhwError {
    /// The operation cannot be done now; a completion event is already on
    /// its way.
    Busy,
    /// The requested start time has already passed.
    Late,
    /// The driver rejected the parameters.
    InvalidArgument,
    /// Bus transaction with the transceiver failed.
    Bus,
    /// Driver-specific failure code.
    Hardware(u16),
}

impl LlhwError {
    /// Returns `true` for conditions that resolve on their own.
    pub const fn is_transient(self) -> bool {
        matches!(self, LlhwError::Busy)
    }
}

impl fmt::Display for LlhwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlhwError::Busy => f.write_str("busy"),
            LlhwError::Late => f.write_str("late"),
            LlhwError::InvalidArgument => f.write_str("invalid-argument"),
            LlhwError::Bus => f.write_str("bus"),
            LlhwError::Hardware(code) => write!(f, "hw({code})"),
        }
    }
}

/// Radio primitives used by the sequencer.
///
/// Implementations are expected to return quickly: arming a receive or
/// starting a transmit only schedules the operation, and its outcome is
/// delivered later as a radio event.
pub trait Llhw {
    /// Frame buffer handed between the access and the driver.
    type Frame;

    /// Programs page, channel and preamble code.
    fn set_channel(&mut self, channel: &ChannelConfig) -> Result<(), LlhwError>;

    /// Updates the fields of the address filter selected by `changed`.
    fn set_hw_addr_filt(
        &mut self,
        filt: &HwAddrFilt,
        changed: FilterChanges,
    ) -> Result<(), LlhwError>;

    /// Loads STS parameters used by the next frame.
    fn set_sts_params(&mut self, params: &StsParams) -> Result<(), LlhwError>;

    /// Arms the receiver. `next_delay_dtu` is the delay to the frame after
    /// this one, or zero when unknown.
    fn rx_enable(
        &mut self,
        info: &RxInfo,
        frame_idx: usize,
        next_delay_dtu: u32,
    ) -> Result<(), LlhwError>;

    /// Disables the receiver. Reports [`LlhwError::Busy`] when a reception is
    /// already being processed.
    fn rx_disable(&mut self) -> Result<(), LlhwError>;

    /// Reads the received frame. Reports [`LlhwError::Busy`] when the frame
    /// is not available yet.
    fn rx_get_frame(&mut self, info: &mut RxFrameInfo) -> Result<Self::Frame, LlhwError>;

    /// Reads metadata of a frame received with an error.
    fn rx_get_error_frame(&mut self, info: &mut RxFrameInfo);

    /// Starts a transmission. The buffer stays owned by the caller until the
    /// transmit-done event.
    fn tx_frame(
        &mut self,
        frame: &Self::Frame,
        info: &TxFrameInfo,
        frame_idx: usize,
        next_delay_dtu: u32,
    ) -> Result<(), LlhwError>;
}
