#![no_std]

// Frame processing core for an IEEE 802.15.4 / UWB MAC.
//
// The crate drives one scheduled radio access (an ordered list of TX and RX
// frames) through a low-level hardware driver. It avoids the Rust standard
// library so the same sequencer runs inside MCU firmware and host tooling.

#[macro_use]
mod fmt;

pub mod access;
pub mod fproc;
pub mod llhw;
pub mod pib;
pub mod runtime;
pub mod sim;
pub mod telemetry;
