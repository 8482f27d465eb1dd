//! In-memory collaborators for host tooling and tests.
//!
//! [`SimRadio`] implements [`Llhw`] by logging every call and failing on
//! request; [`RecordingAccess`] and [`RecordingScheduler`] log what the
//! sequencer reports to them. Logs are bounded `heapless` vectors so the
//! module stays usable without an allocator.

use core::{fmt, mem};

use heapless::Vec;

use crate::access::{AccessOps, RxError, TxReturnReason};
use crate::fproc::{AccessScheduler, SequencerError};
use crate::llhw::{
    ChannelConfig, FilterChanges, HwAddrFilt, Llhw, LlhwError, RxFrameInfo, RxFrameInfoFlags,
    RxInfo, RxTimeout, StsParams, TxFrameInfo,
};
use crate::pib::MacPib;

/// Maximum number of entries kept by each simulation log.
pub const SIM_LOG_CAPACITY: usize = 64;

/// Maximum number of armed one-shot failures.
pub const MAX_PENDING_FAULTS: usize = 8;

const FIRST_TX_PAYLOAD: u32 = 1;
const FIRST_RX_PAYLOAD: u32 = 0x100;
const SIM_LQI: u8 = 200;
const SIM_STS_FOM: u8 = 0x7f;

/// Frame buffer exchanged by the simulated collaborators. Not `Copy`, so
/// buffer hand-offs behave like real owned buffers.
#[derive(Debug, Eq, PartialEq, Hash)]
pub struct SimFrame(pub u32);

impl fmt::Display for SimFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Operations of [`SimRadio`] that can be told to fail.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LlhwOp {
    SetChannel,
    SetHwAddrFilt,
    SetStsParams,
    RxEnable,
    RxDisable,
    RxGetFrame,
    TxFrame,
}

impl LlhwOp {
    pub const ALL: [LlhwOp; 7] = [
        LlhwOp::SetChannel,
        LlhwOp::SetHwAddrFilt,
        LlhwOp::SetStsParams,
        LlhwOp::RxEnable,
        LlhwOp::RxDisable,
        LlhwOp::RxGetFrame,
        LlhwOp::TxFrame,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            LlhwOp::SetChannel => "set-channel",
            LlhwOp::SetHwAddrFilt => "set-filter",
            LlhwOp::SetStsParams => "set-sts",
            LlhwOp::RxEnable => "rx-enable",
            LlhwOp::RxDisable => "rx-disable",
            LlhwOp::RxGetFrame => "rx-get-frame",
            LlhwOp::TxFrame => "tx-frame",
        }
    }

    /// Looks an operation up by its [`LlhwOp::name`].
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }
}

impl fmt::Display for LlhwOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A call received by [`SimRadio`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LlhwCall {
    SetChannel(ChannelConfig),
    SetHwAddrFilt(HwAddrFilt, FilterChanges),
    SetStsParams,
    RxEnable {
        frame_idx: usize,
        timestamp_dtu: u32,
        timeout: RxTimeout,
    },
    RxDisable,
    RxGetFrame,
    RxGetErrorFrame,
    TxFrame { frame_idx: usize, payload: u32 },
}

impl LlhwCall {
    /// Returns `true` for calls that start a frame.
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, LlhwCall::RxEnable { .. } | LlhwCall::TxFrame { .. })
    }
}

impl fmt::Display for LlhwCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlhwCall::SetChannel(channel) => write!(f, "set-channel {channel}"),
            LlhwCall::SetHwAddrFilt(filt, changed) => write!(
                f,
                "set-filter pan={:#06x} short={:#06x} mask={:#04x}",
                filt.pan_id,
                filt.short_addr,
                changed.bits()
            ),
            LlhwCall::SetStsParams => f.write_str("set-sts"),
            LlhwCall::RxEnable {
                frame_idx,
                timestamp_dtu,
                timeout,
            } => write!(
                f,
                "rx-enable #{frame_idx} at={timestamp_dtu} timeout={timeout}"
            ),
            LlhwCall::RxDisable => f.write_str("rx-disable"),
            LlhwCall::RxGetFrame => f.write_str("rx-get-frame"),
            LlhwCall::RxGetErrorFrame => f.write_str("rx-get-error-frame"),
            LlhwCall::TxFrame { frame_idx, payload } => {
                write!(f, "tx-frame #{frame_idx} P{payload}")
            }
        }
    }
}

/// Logged call together with the result handed back.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CallRecord {
    pub call: LlhwCall,
    pub result: Result<(), LlhwError>,
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result {
            Ok(()) => write!(f, "{}", self.call),
            Err(error) => write!(f, "{} -> {error}", self.call),
        }
    }
}

/// Scripted radio.
#[derive(Debug)]
pub struct SimRadio {
    calls: Vec<CallRecord, SIM_LOG_CAPACITY>,
    faults: Vec<(LlhwOp, LlhwError), MAX_PENDING_FAULTS>,
    channel: ChannelConfig,
    filt: HwAddrFilt,
    rx_armed: Option<RxInfo>,
    next_rx_payload: u32,
    dropped: usize,
}

impl SimRadio {
    /// Radio programmed with the values of `pib`.
    pub const fn new(pib: &MacPib) -> Self {
        Self {
            calls: Vec::new(),
            faults: Vec::new(),
            channel: pib.phy_current_channel,
            filt: pib.hw_addr_filt(),
            rx_armed: None,
            next_rx_payload: FIRST_RX_PAYLOAD,
            dropped: 0,
        }
    }

    /// Makes the next call of `op` fail with `error`. Returns `false` when
    /// too many failures are already armed.
    pub fn fail_next(&mut self, op: LlhwOp, error: LlhwError) -> bool {
        self.faults.push((op, error)).is_ok()
    }

    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// Drains the call log.
    pub fn take_calls(&mut self) -> Vec<CallRecord, SIM_LOG_CAPACITY> {
        mem::take(&mut self.calls)
    }

    /// Number of calls that started a frame.
    pub fn dispatch_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|record| record.call.is_dispatch())
            .count()
    }

    /// Calls not logged because the log was full.
    pub const fn dropped(&self) -> usize {
        self.dropped
    }

    /// Channel currently programmed.
    pub const fn channel(&self) -> ChannelConfig {
        self.channel
    }

    /// Address filter currently programmed.
    pub const fn hw_addr_filt(&self) -> HwAddrFilt {
        self.filt
    }

    pub const fn is_rx_armed(&self) -> bool {
        self.rx_armed.is_some()
    }

    fn take_fault(&mut self, op: LlhwOp) -> Result<(), LlhwError> {
        match self.faults.iter().position(|(armed, _)| *armed == op) {
            Some(index) => Err(self.faults.remove(index).1),
            None => Ok(()),
        }
    }

    fn log(&mut self, call: LlhwCall, result: Result<(), LlhwError>) -> Result<(), LlhwError> {
        if self.calls.push(CallRecord { call, result }).is_err() {
            self.dropped += 1;
        }
        result
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new(&MacPib::new())
    }
}

impl Llhw for SimRadio {
    type Frame = SimFrame;

    fn set_channel(&mut self, channel: &ChannelConfig) -> Result<(), LlhwError> {
        let result = self.take_fault(LlhwOp::SetChannel);
        if result.is_ok() {
            self.channel = *channel;
        }
        self.log(LlhwCall::SetChannel(*channel), result)
    }

    fn set_hw_addr_filt(
        &mut self,
        filt: &HwAddrFilt,
        changed: FilterChanges,
    ) -> Result<(), LlhwError> {
        let result = self.take_fault(LlhwOp::SetHwAddrFilt);
        if result.is_ok() {
            self.filt = self.filt.merged(filt, changed);
        }
        self.log(LlhwCall::SetHwAddrFilt(*filt, changed), result)
    }

    fn set_sts_params(&mut self, _params: &StsParams) -> Result<(), LlhwError> {
        let result = self.take_fault(LlhwOp::SetStsParams);
        self.log(LlhwCall::SetStsParams, result)
    }

    fn rx_enable(
        &mut self,
        info: &RxInfo,
        frame_idx: usize,
        _next_delay_dtu: u32,
    ) -> Result<(), LlhwError> {
        let result = self.take_fault(LlhwOp::RxEnable);
        if result.is_ok() {
            self.rx_armed = Some(*info);
        }
        self.log(
            LlhwCall::RxEnable {
                frame_idx,
                timestamp_dtu: info.timestamp_dtu,
                timeout: info.timeout,
            },
            result,
        )
    }

    fn rx_disable(&mut self) -> Result<(), LlhwError> {
        let result = self.take_fault(LlhwOp::RxDisable);
        if result.is_ok() {
            self.rx_armed = None;
        }
        self.log(LlhwCall::RxDisable, result)
    }

    fn rx_get_frame(&mut self, info: &mut RxFrameInfo) -> Result<SimFrame, LlhwError> {
        let result = self.take_fault(LlhwOp::RxGetFrame);
        self.log(LlhwCall::RxGetFrame, result)?;

        let started_at = self.rx_armed.take().map_or(0, |armed| armed.timestamp_dtu);
        let requested = info.flags;
        let mut provided = RxFrameInfoFlags::NONE;
        if requested.contains(RxFrameInfoFlags::TIMESTAMP_DTU) {
            info.timestamp_dtu = started_at;
            provided = provided | RxFrameInfoFlags::TIMESTAMP_DTU;
        }
        if requested.contains(RxFrameInfoFlags::TIMESTAMP_RCTU) {
            info.timestamp_rctu = u64::from(started_at) << 4;
            provided = provided | RxFrameInfoFlags::TIMESTAMP_RCTU;
        }
        if requested.contains(RxFrameInfoFlags::LQI) {
            info.lqi = SIM_LQI;
            provided = provided | RxFrameInfoFlags::LQI;
        }
        if requested.contains(RxFrameInfoFlags::RANGING_STS_FOM) {
            info.ranging_sts_fom = SIM_STS_FOM;
            provided = provided | RxFrameInfoFlags::RANGING_STS_FOM;
        }
        info.flags = provided;

        let payload = self.next_rx_payload;
        self.next_rx_payload = self.next_rx_payload.wrapping_add(1);
        Ok(SimFrame(payload))
    }

    fn rx_get_error_frame(&mut self, info: &mut RxFrameInfo) {
        let started_at = self.rx_armed.take().map_or(0, |armed| armed.timestamp_dtu);
        if info.flags.contains(RxFrameInfoFlags::TIMESTAMP_DTU) {
            info.timestamp_dtu = started_at;
        }
        let _ = self.log(LlhwCall::RxGetErrorFrame, Ok(()));
    }

    fn tx_frame(
        &mut self,
        frame: &SimFrame,
        _info: &TxFrameInfo,
        frame_idx: usize,
        _next_delay_dtu: u32,
    ) -> Result<(), LlhwError> {
        let result = self.take_fault(LlhwOp::TxFrame);
        self.log(
            LlhwCall::TxFrame {
                frame_idx,
                payload: frame.0,
            },
            result,
        )
    }
}

/// Callback received by [`RecordingAccess`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessCallback {
    TxGetFrame {
        frame_idx: usize,
        payload: u32,
    },
    TxReturn {
        frame_idx: usize,
        payload: u32,
        reason: TxReturnReason,
    },
    RxFrame {
        frame_idx: usize,
        payload: Option<u32>,
        info: Option<RxFrameInfo>,
        error: RxError,
    },
    AccessDone(Result<(), SequencerError>),
}

impl fmt::Display for AccessCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessCallback::TxGetFrame { frame_idx, payload } => {
                write!(f, "tx_get_frame #{frame_idx} -> P{payload}")
            }
            AccessCallback::TxReturn {
                frame_idx,
                payload,
                reason,
            } => write!(f, "tx_return #{frame_idx} P{payload} {reason}"),
            AccessCallback::RxFrame {
                frame_idx,
                payload,
                info,
                error,
            } => {
                write!(f, "rx_frame #{frame_idx}")?;
                match payload {
                    Some(payload) => write!(f, " P{payload}")?,
                    None => f.write_str(" -")?,
                }
                if let Some(info) = info {
                    write!(f, " ts={}", info.timestamp_dtu)?;
                }
                write!(f, " {error}")
            }
            AccessCallback::AccessDone(Ok(())) => f.write_str("access_done ok"),
            AccessCallback::AccessDone(Err(error)) => write!(f, "access_done err: {error}"),
        }
    }
}

/// Access callbacks that hand out numbered payloads and log everything.
#[derive(Debug)]
pub struct RecordingAccess {
    log: Vec<AccessCallback, SIM_LOG_CAPACITY>,
    next_payload: u32,
    outstanding: usize,
}

impl RecordingAccess {
    pub const fn new() -> Self {
        Self {
            log: Vec::new(),
            next_payload: FIRST_TX_PAYLOAD,
            outstanding: 0,
        }
    }

    pub fn callbacks(&self) -> &[AccessCallback] {
        &self.log
    }

    /// Drains the callback log.
    pub fn take_callbacks(&mut self) -> Vec<AccessCallback, SIM_LOG_CAPACITY> {
        mem::take(&mut self.log)
    }

    /// Transmit buffers handed out and not returned yet.
    pub const fn outstanding_tx(&self) -> usize {
        self.outstanding
    }

    /// Number of `access_done` callbacks received.
    pub fn done_count(&self) -> usize {
        self.log
            .iter()
            .filter(|callback| matches!(callback, AccessCallback::AccessDone(_)))
            .count()
    }

    fn push(&mut self, callback: AccessCallback) {
        // A full log keeps its oldest entries.
        let _ = self.log.push(callback);
    }
}

impl Default for RecordingAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessOps for RecordingAccess {
    type Frame = SimFrame;

    fn tx_get_frame(&mut self, frame_idx: usize) -> SimFrame {
        let payload = self.next_payload;
        self.next_payload = self.next_payload.wrapping_add(1);
        self.outstanding += 1;
        self.push(AccessCallback::TxGetFrame { frame_idx, payload });
        SimFrame(payload)
    }

    fn tx_return(&mut self, frame_idx: usize, frame: SimFrame, reason: TxReturnReason) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.push(AccessCallback::TxReturn {
            frame_idx,
            payload: frame.0,
            reason,
        });
    }

    fn rx_frame(
        &mut self,
        frame_idx: usize,
        frame: Option<SimFrame>,
        info: Option<&RxFrameInfo>,
        error: RxError,
    ) {
        self.push(AccessCallback::RxFrame {
            frame_idx,
            payload: frame.map(|frame| frame.0),
            info: info.copied(),
            error,
        });
    }

    fn access_done(&mut self, result: Result<(), SequencerError>) {
        self.push(AccessCallback::AccessDone(result));
    }
}

/// Notification received by [`RecordingScheduler`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerNotice {
    AccessFinished,
    HoldAccess,
    RunNextAccessNow,
    RunNextAccessAt(u32),
    RecoverBrokenAccess,
}

impl fmt::Display for SchedulerNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerNotice::AccessFinished => f.write_str("access_finished"),
            SchedulerNotice::HoldAccess => f.write_str("hold_access"),
            SchedulerNotice::RunNextAccessNow => f.write_str("run_next_access_now"),
            SchedulerNotice::RunNextAccessAt(dtu) => write!(f, "run_next_access_at {dtu}"),
            SchedulerNotice::RecoverBrokenAccess => f.write_str("recover_broken_access"),
        }
    }
}

/// Scheduler notifier that only logs.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    log: Vec<SchedulerNotice, SIM_LOG_CAPACITY>,
}

impl RecordingScheduler {
    pub const fn new() -> Self {
        Self { log: Vec::new() }
    }

    pub fn notices(&self) -> &[SchedulerNotice] {
        &self.log
    }

    /// Drains the notice log.
    pub fn take_notices(&mut self) -> Vec<SchedulerNotice, SIM_LOG_CAPACITY> {
        mem::take(&mut self.log)
    }

    /// Number of times `notice` was received.
    pub fn count(&self, notice: SchedulerNotice) -> usize {
        self.log.iter().filter(|logged| **logged == notice).count()
    }

    fn push(&mut self, notice: SchedulerNotice) {
        let _ = self.log.push(notice);
    }
}

impl AccessScheduler for RecordingScheduler {
    fn access_finished(&mut self) {
        self.push(SchedulerNotice::AccessFinished);
    }

    fn hold_access(&mut self) {
        self.push(SchedulerNotice::HoldAccess);
    }

    fn run_next_access_now(&mut self) {
        self.push(SchedulerNotice::RunNextAccessNow);
    }

    fn run_next_access_at(&mut self, timestamp_dtu: u32) {
        self.push(SchedulerNotice::RunNextAccessAt(timestamp_dtu));
    }

    fn recover_broken_access(&mut self) {
        self.push(SchedulerNotice::RecoverBrokenAccess);
    }
}
