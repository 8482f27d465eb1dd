//! MAC PAN information base values the sequencer restores after an access.

use crate::llhw::{ChannelConfig, HwAddrFilt};

/// Broadcast PAN identifier and short address.
pub const BROADCAST_ADDR: u16 = 0xffff;

/// Default UWB channel (page 4, channel 5, preamble code 9).
pub const DEFAULT_CHANNEL: ChannelConfig = ChannelConfig::new(4, 5, 9);

/// Currently active PHY and MAC attributes.
///
/// An access may temporarily override the channel and the address filter;
/// these values are what the hardware goes back to once it ends.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacPib {
    pub phy_current_channel: ChannelConfig,
    pub mac_pan_id: u16,
    pub mac_short_addr: u16,
    pub mac_extended_addr: u64,
    pub mac_pan_coord: bool,
}

impl MacPib {
    /// Unassociated device on the default channel.
    pub const fn new() -> Self {
        Self {
            phy_current_channel: DEFAULT_CHANNEL,
            mac_pan_id: BROADCAST_ADDR,
            mac_short_addr: BROADCAST_ADDR,
            mac_extended_addr: 0,
            mac_pan_coord: false,
        }
    }

    /// Address filter matching the current attributes.
    pub const fn hw_addr_filt(&self) -> HwAddrFilt {
        HwAddrFilt {
            pan_id: self.mac_pan_id,
            short_addr: self.mac_short_addr,
            extended_addr: self.mac_extended_addr,
            pan_coord: self.mac_pan_coord,
        }
    }
}

impl Default for MacPib {
    fn default() -> Self {
        Self::new()
    }
}
