//! Multi-frame access handling.
//!
//! Frames run strictly in list order. Each frame is dispatched only after
//! the completion event of the previous one, so at most one radio
//! operation is outstanding at any time.

use core::mem;

use super::{AccessScheduler, FrameSequencer, RadioEvent, SequencerError, SequencerState};
use crate::access::{Access, AccessOps, FrameKind, InvalidAccessReason, RxError, TxReturnReason};
use crate::llhw::{Llhw, LlhwError, RxFrameInfo, RxFrameInfoFlags, RxInfoFlags};
use crate::telemetry::{TelemetryEventKind, truncate_index};

impl<H, S> FrameSequencer<H, S>
where
    H: Llhw,
    S: AccessScheduler,
{
    /// Admits `access` and starts its first frame.
    ///
    /// Nothing is reported to the access when admission itself fails
    /// (invalid frame list, another access in flight, channel or filter
    /// rejected). Once the overrides are applied the access is admitted, and
    /// a failure to start frame 0 is both returned and reported as done. A
    /// frame 0 refused as invalid also rolls the overrides back.
    pub fn begin<O>(&mut self, access: &mut Access<O>) -> Result<(), SequencerError>
    where
        O: AccessOps<Frame = H::Frame>,
    {
        if self.state.is_active() {
            warn!("fproc:multi begin refused, {} in flight", self.state.name());
            return Err(SequencerError::AccessInProgress);
        }

        access.validate()?;

        let filt_change = access.hw_addr_filt().copied();
        if let Some(change) = filt_change {
            self.llhw.set_hw_addr_filt(&change.filt, change.changed)?;
        }

        if let Some(channel) = access.channel().copied() {
            if let Err(error) = self.llhw.set_channel(&channel) {
                warn!("fproc:multi channel change failed: {}", error);
                self.rollback_overrides(access, false);
                return Err(error.into());
            }
        }

        self.telemetry.record_admission(access.len());
        info!("fproc:multi access admitted, {} frames", access.len());

        if let Err(error) = self.dispatch(access, 0) {
            if let SequencerError::InvalidAccess(_) = error {
                // Nothing reached the air; put the PIB configuration back.
                self.rollback_overrides(access, access.channel().is_some());
            }
            self.abort(access, error);
            return Err(error);
        }
        Ok(())
    }

    /// Best-effort return to the PIB channel and filter. The error that
    /// caused the rollback is the one reported, so failures here are only
    /// logged.
    fn rollback_overrides<O>(&mut self, access: &Access<O>, channel_applied: bool) {
        let channel_restored = if channel_applied {
            self.llhw.set_channel(&self.pib.phy_current_channel)
        } else {
            Ok(())
        };
        if let Err(error) = channel_restored {
            warn!("fproc:multi channel restore failed: {}", error);
        }

        let Some(change) = access.hw_addr_filt() else {
            return;
        };
        if let Err(error) = self
            .llhw
            .set_hw_addr_filt(&self.pib.hw_addr_filt(), change.changed)
        {
            warn!("fproc:multi filter restore failed: {}", error);
        }
    }

    /// Feeds one radio completion to the running access.
    pub fn handle_event<O>(&mut self, access: &mut Access<O>, event: RadioEvent)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        trace!("fproc:multi event {} in {}", event, self.state.name());
        match event {
            RadioEvent::RxFrame => self.rx_frame(access),
            RadioEvent::RxTimeout => self.rx_timeout(access),
            RadioEvent::RxError(kind) => self.rx_error(access, kind),
            RadioEvent::TxDone => self.tx_done(access),
            RadioEvent::ScheduleChange => self.schedule_change(access),
        }
    }

    fn dispatch<O>(&mut self, access: &mut Access<O>, frame_idx: usize) -> Result<(), SequencerError>
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let Some(frame) = access.frame(frame_idx).copied() else {
            return Err(InvalidAccessReason::NoFrames.into());
        };

        match frame.kind {
            FrameKind::Rx(rx) => {
                if rx.info.flags.contains(RxInfoFlags::AACK) {
                    return Err(InvalidAccessReason::AutoAckRequested { frame_idx }.into());
                }
                if let Some(sts) = frame.sts_params.as_ref() {
                    self.llhw.set_sts_params(sts)?;
                }
                self.llhw.rx_enable(&rx.info, frame_idx, 0)?;

                self.state = SequencerState::Receiving { frame_idx };
                self.telemetry
                    .record(TelemetryEventKind::RxArmed(truncate_index(frame_idx)));
                debug!("fproc:multi rx #{} armed, timeout {}", frame_idx, rx.info.timeout);
            }
            FrameKind::Tx(info) => {
                if info.rx_after_tx.is_some() {
                    return Err(InvalidAccessReason::RxAfterTxRequested { frame_idx }.into());
                }

                let payload = access.ops_mut().tx_get_frame(frame_idx);
                let issued = match frame.sts_params.as_ref() {
                    Some(sts) => self.llhw.set_sts_params(sts),
                    None => Ok(()),
                }
                .and_then(|()| self.llhw.tx_frame(&payload, &info, frame_idx, 0));

                if let Err(error) = issued {
                    access
                        .ops_mut()
                        .tx_return(frame_idx, payload, TxReturnReason::Cancel);
                    self.telemetry
                        .record(TelemetryEventKind::TxCancelled(truncate_index(frame_idx)));
                    return Err(error.into());
                }

                self.scheduler.hold_access();
                self.state = SequencerState::Transmitting {
                    frame_idx,
                    pending: payload,
                };
                self.telemetry
                    .record(TelemetryEventKind::TxIssued(truncate_index(frame_idx)));
                debug!("fproc:multi tx #{} issued", frame_idx);
            }
        }

        Ok(())
    }

    fn rx_frame<O>(&mut self, access: &mut Access<O>)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let frame_idx = match self.state {
            SequencerState::Receiving { frame_idx } => frame_idx,
            SequencerState::Idle
            | SequencerState::Transmitting { .. }
            | SequencerState::Finished
            | SequencerState::Broken(_) => return self.unexpected(RadioEvent::RxFrame),
        };

        let requested = match access.frame(frame_idx).map(|frame| frame.kind) {
            Some(FrameKind::Rx(rx)) => rx.frame_info_flags_request,
            Some(FrameKind::Tx(_)) | None => RxFrameInfoFlags::NONE,
        };
        let mut info = RxFrameInfo::requesting(requested);

        match self.llhw.rx_get_frame(&mut info) {
            Ok(frame) => {
                self.telemetry
                    .record(TelemetryEventKind::FrameReceived(truncate_index(frame_idx)));
                access
                    .ops_mut()
                    .rx_frame(frame_idx, Some(frame), Some(&info), RxError::None);
                self.advance(access, frame_idx);
            }
            Err(error) if error.is_transient() => {
                // The driver raises the event again once the frame is readable.
                self.telemetry
                    .record(TelemetryEventKind::RxBusy(truncate_index(frame_idx)));
                debug!("fproc:multi rx #{} not readable yet", frame_idx);
            }
            Err(error) => self.abort(access, error.into()),
        }
    }

    fn rx_timeout<O>(&mut self, access: &mut Access<O>)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let frame_idx = match self.state {
            SequencerState::Receiving { frame_idx } => frame_idx,
            SequencerState::Idle
            | SequencerState::Transmitting { .. }
            | SequencerState::Finished
            | SequencerState::Broken(_) => return self.unexpected(RadioEvent::RxTimeout),
        };

        self.telemetry.record(TelemetryEventKind::RxFailed(
            truncate_index(frame_idx),
            RxError::Timeout,
        ));
        access
            .ops_mut()
            .rx_frame(frame_idx, None, None, RxError::Timeout);
        self.advance(access, frame_idx);
    }

    fn rx_error<O>(&mut self, access: &mut Access<O>, kind: RxError)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let frame_idx = match self.state {
            SequencerState::Receiving { frame_idx } => frame_idx,
            SequencerState::Idle
            | SequencerState::Transmitting { .. }
            | SequencerState::Finished
            | SequencerState::Broken(_) => return self.unexpected(RadioEvent::RxError(kind)),
        };

        let mut info = RxFrameInfo::requesting(RxFrameInfoFlags::TIMESTAMP_DTU);
        self.llhw.rx_get_error_frame(&mut info);

        self.telemetry
            .record(TelemetryEventKind::RxFailed(truncate_index(frame_idx), kind));
        access.ops_mut().rx_frame(frame_idx, None, Some(&info), kind);
        self.advance(access, frame_idx);
    }

    fn tx_done<O>(&mut self, access: &mut Access<O>)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let state = mem::replace(&mut self.state, SequencerState::Idle);
        let (frame_idx, pending) = match state {
            SequencerState::Transmitting { frame_idx, pending } => (frame_idx, pending),
            other @ (SequencerState::Idle
            | SequencerState::Receiving { .. }
            | SequencerState::Finished
            | SequencerState::Broken(_)) => {
                self.state = other;
                return self.unexpected(RadioEvent::TxDone);
            }
        };

        access
            .ops_mut()
            .tx_return(frame_idx, pending, TxReturnReason::Consumed);
        self.telemetry
            .record(TelemetryEventKind::TxConsumed(truncate_index(frame_idx)));
        self.advance(access, frame_idx);
    }

    fn schedule_change<O>(&mut self, access: &mut Access<O>)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let frame_idx = match self.state {
            SequencerState::Receiving { frame_idx } => frame_idx,
            SequencerState::Transmitting { frame_idx, .. } => {
                trace!("fproc:multi tx #{} holds the access", frame_idx);
                return;
            }
            SequencerState::Idle | SequencerState::Finished | SequencerState::Broken(_) => {
                return self.unexpected(RadioEvent::ScheduleChange);
            }
        };

        let unbounded = access
            .frame(frame_idx)
            .is_some_and(|frame| frame.is_unbounded_rx());
        if !unbounded {
            // A bounded receive ends on its own timeout.
            self.telemetry
                .record(TelemetryEventKind::ScheduleChangeDeferred(truncate_index(
                    frame_idx,
                )));
            return;
        }

        let disabled = self.llhw.rx_disable();
        if disabled.is_err_and(LlhwError::is_transient) {
            // A reception is being processed; its own event follows.
            self.telemetry
                .record(TelemetryEventKind::ScheduleChangeDeferred(truncate_index(
                    frame_idx,
                )));
            debug!("fproc:multi rx #{} busy, schedule change deferred", frame_idx);
            return;
        }

        self.telemetry
            .record(TelemetryEventKind::ScheduleChangeHonored(truncate_index(
                frame_idx,
            )));
        access
            .ops_mut()
            .rx_frame(frame_idx, None, None, RxError::Timeout);

        match disabled {
            Ok(()) => self.advance(access, frame_idx),
            Err(error) => self.abort(access, error.into()),
        }
    }

    fn advance<O>(&mut self, access: &mut Access<O>, frame_idx: usize)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let next = frame_idx + 1;
        if next >= access.len() {
            self.finish(access);
            return;
        }

        match self.dispatch(access, next) {
            Ok(()) => {}
            Err(SequencerError::Llhw(LlhwError::Late)) => {
                info!("fproc:multi frame #{} too late, ending access", next);
                self.state = SequencerState::Finished;
                self.telemetry
                    .record(TelemetryEventKind::AccessEndedEarly(LlhwError::Late));
                self.report_done(access, Ok(()));
                self.scheduler.run_next_access_now();
            }
            Err(error) => self.abort(access, error),
        }
    }

    /// Puts back the PIB channel and filter, then reports completion.
    fn finish<O>(&mut self, access: &mut Access<O>)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        let channel_changed = access.channel().is_some();
        if channel_changed {
            let current = self.pib.phy_current_channel;
            if let Err(error) = self.llhw.set_channel(&current) {
                return self.abort(access, error.into());
            }
        }

        let filt_change = access.hw_addr_filt().copied();
        if let Some(change) = filt_change {
            let filt = self.pib.hw_addr_filt();
            if let Err(error) = self.llhw.set_hw_addr_filt(&filt, change.changed) {
                return self.abort(access, error.into());
            }
        }

        if channel_changed || filt_change.is_some() {
            self.telemetry.record(TelemetryEventKind::ConfigRestored);
        }

        self.state = SequencerState::Finished;
        self.telemetry.record(TelemetryEventKind::AccessDone);
        info!("fproc:multi access done");
        self.report_done(access, Ok(()));

        match access.next_access_dtu() {
            Some(timestamp_dtu) => self.scheduler.run_next_access_at(timestamp_dtu),
            None => self.scheduler.run_next_access_now(),
        }
    }

    /// Stops the access after an unrecoverable error.
    fn abort<O>(&mut self, access: &mut Access<O>, error: SequencerError)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        error!("fproc:multi access broken: {}", error);
        self.state = SequencerState::Broken(error);
        self.telemetry.record(TelemetryEventKind::AccessBroken(error));
        self.report_done(access, Err(error));
        self.scheduler.recover_broken_access();
    }

    fn report_done<O>(&mut self, access: &mut Access<O>, result: Result<(), SequencerError>)
    where
        O: AccessOps<Frame = H::Frame>,
    {
        access.ops_mut().access_done(result);
        self.scheduler.access_finished();
    }

    fn unexpected(&mut self, event: RadioEvent) {
        warn!(
            "fproc:multi ignoring {} in {}",
            event,
            self.state.name()
        );
        self.telemetry
            .record(TelemetryEventKind::UnexpectedEvent(event));
    }
}
