use fproc_core::access::{Access, AccessFrame, RxError, TxReturnReason};
use fproc_core::fproc::{AccessEnd, FrameSequencer, RadioEvent, SequencerError, SequencerState};
use fproc_core::llhw::{
    ChannelConfig, FilterChanges, HwAddrFilt, RxFrameInfoFlags, RxInfo, RxTimeout, TxFrameInfo,
};
use fproc_core::pib::{BROADCAST_ADDR, DEFAULT_CHANNEL, MacPib};
use fproc_core::sim::{
    AccessCallback, LlhwCall, RecordingAccess, RecordingScheduler, SchedulerNotice, SimFrame,
    SimRadio,
};
use fproc_core::telemetry::TelemetryEventKind;
use heapless::Vec as HeaplessVec;

type Sequencer = FrameSequencer<SimRadio, RecordingScheduler>;

fn sequencer() -> Sequencer {
    let pib = MacPib::default();
    FrameSequencer::new(SimRadio::new(&pib), RecordingScheduler::new(), pib)
}

fn rx(timeout: RxTimeout) -> AccessFrame {
    AccessFrame::rx(
        RxInfo::immediate(timeout),
        RxFrameInfoFlags::TIMESTAMP_DTU,
    )
}

fn tx() -> AccessFrame {
    AccessFrame::tx(TxFrameInfo::immediate())
}

fn build_access(frames: &[AccessFrame]) -> Access<RecordingAccess> {
    let mut access = Access::new(RecordingAccess::new());
    for frame in frames {
        access.push_frame(*frame).expect("access has room");
    }
    access
}

fn calls(seq: &Sequencer) -> HeaplessVec<LlhwCall, 64> {
    seq.llhw().calls().iter().map(|record| record.call).collect()
}

#[test]
fn receive_then_transmit_runs_to_completion() {
    let mut seq = sequencer();
    let mut access = build_access(&[rx(RxTimeout::Dtu(5_000)), tx()]);

    seq.begin(&mut access).expect("access admitted");
    assert_eq!(*seq.state(), SequencerState::Receiving { frame_idx: 0 });

    seq.handle_event(&mut access, RadioEvent::RxFrame);
    assert_eq!(
        *seq.state(),
        SequencerState::Transmitting {
            frame_idx: 1,
            pending: SimFrame(1),
        }
    );

    seq.handle_event(&mut access, RadioEvent::TxDone);
    assert_eq!(seq.access_end(), Some(AccessEnd::Completed));

    assert_eq!(
        calls(&seq).as_slice(),
        &[
            LlhwCall::RxEnable {
                frame_idx: 0,
                timestamp_dtu: 0,
                timeout: RxTimeout::Dtu(5_000),
            },
            LlhwCall::RxGetFrame,
            LlhwCall::TxFrame {
                frame_idx: 1,
                payload: 1,
            },
        ]
    );

    let callbacks = access.ops().callbacks();
    assert_eq!(callbacks.len(), 4, "unexpected callbacks: {callbacks:?}");
    match callbacks[0] {
        AccessCallback::RxFrame {
            frame_idx: 0,
            payload: Some(_),
            info: Some(info),
            error: RxError::None,
        } => assert!(info.flags.contains(RxFrameInfoFlags::TIMESTAMP_DTU)),
        other => panic!("expected frame delivery, got {other:?}"),
    }
    assert_eq!(
        callbacks[1],
        AccessCallback::TxGetFrame {
            frame_idx: 1,
            payload: 1,
        }
    );
    assert_eq!(
        callbacks[2],
        AccessCallback::TxReturn {
            frame_idx: 1,
            payload: 1,
            reason: TxReturnReason::Consumed,
        }
    );
    assert_eq!(callbacks[3], AccessCallback::AccessDone(Ok(())));

    assert_eq!(
        seq.scheduler().notices(),
        &[
            SchedulerNotice::HoldAccess,
            SchedulerNotice::AccessFinished,
            SchedulerNotice::RunNextAccessNow,
        ]
    );
}

#[test]
fn unbounded_first_receive_is_admitted() {
    let mut seq = sequencer();
    let mut access = build_access(&[rx(RxTimeout::Infinite)]);

    seq.begin(&mut access).expect("unbounded first frame is allowed");

    assert_eq!(*seq.state(), SequencerState::Receiving { frame_idx: 0 });
    assert_eq!(seq.llhw().dispatch_count(), 1);
}

#[test]
fn admission_always_starts_with_frame_zero() {
    let shapes: [&[AccessFrame]; 3] = [
        &[tx(), rx(RxTimeout::Dtu(10))],
        &[rx(RxTimeout::Infinite), tx(), tx()],
        &[rx(RxTimeout::Dtu(1)), rx(RxTimeout::Dtu(2)), rx(RxTimeout::Dtu(3))],
    ];

    for frames in shapes {
        let mut seq = sequencer();
        let mut access = build_access(frames);

        assert_eq!(seq.begin(&mut access), Ok(()));

        let first = seq.llhw().calls().first().map(|record| record.call);
        match first {
            Some(LlhwCall::RxEnable { frame_idx, .. } | LlhwCall::TxFrame { frame_idx, .. }) => {
                assert_eq!(frame_idx, 0);
            }
            other => panic!("first call should start a frame, got {other:?}"),
        }
        assert_eq!(seq.llhw().dispatch_count(), 1, "only one frame in flight");
    }
}

#[test]
fn last_frame_reports_done_once_and_runs_next_access_now() {
    let mut seq = sequencer();
    let mut access = build_access(&[rx(RxTimeout::Dtu(100)), rx(RxTimeout::Dtu(100))]);

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::RxTimeout);
    seq.handle_event(&mut access, RadioEvent::RxTimeout);

    assert_eq!(access.ops().done_count(), 1);
    assert_eq!(seq.scheduler().count(SchedulerNotice::RunNextAccessNow), 1);
    assert_eq!(seq.scheduler().count(SchedulerNotice::AccessFinished), 1);
    assert!(
        seq.scheduler()
            .notices()
            .iter()
            .all(|notice| !matches!(notice, SchedulerNotice::RunNextAccessAt(_)))
    );
}

#[test]
fn access_with_duration_schedules_next_at_its_end() {
    let mut seq = sequencer();
    let mut access = build_access(&[tx()]).with_timing(10_000, Some(2_500));

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::TxDone);

    assert_eq!(
        seq.scheduler().notices(),
        &[
            SchedulerNotice::HoldAccess,
            SchedulerNotice::AccessFinished,
            SchedulerNotice::RunNextAccessAt(12_500),
        ]
    );
    assert_eq!(seq.scheduler().count(SchedulerNotice::RunNextAccessNow), 0);
}

#[test]
fn every_transmit_buffer_comes_back_consumed() {
    let mut seq = sequencer();
    let mut access = build_access(&[tx(), tx(), tx()]);

    seq.begin(&mut access).expect("access admitted");
    for _ in 0..3 {
        assert_eq!(access.ops().outstanding_tx(), 1);
        seq.handle_event(&mut access, RadioEvent::TxDone);
    }

    assert_eq!(access.ops().outstanding_tx(), 0);
    let returned: HeaplessVec<(usize, u32), 8> = access
        .ops()
        .callbacks()
        .iter()
        .filter_map(|callback| match callback {
            AccessCallback::TxReturn {
                frame_idx,
                payload,
                reason: TxReturnReason::Consumed,
            } => Some((*frame_idx, *payload)),
            _ => None,
        })
        .collect();
    assert_eq!(returned.as_slice(), &[(0, 1), (1, 2), (2, 3)]);
    assert_eq!(seq.scheduler().count(SchedulerNotice::HoldAccess), 3);
}

#[test]
fn receive_error_reports_error_frame_metadata() {
    let mut seq = sequencer();
    let mut access = build_access(&[rx(RxTimeout::Dtu(100))]);

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::RxError(RxError::BadCksum));

    assert!(calls(&seq).contains(&LlhwCall::RxGetErrorFrame));
    match access.ops().callbacks()[0] {
        AccessCallback::RxFrame {
            frame_idx: 0,
            payload: None,
            info: Some(info),
            error: RxError::BadCksum,
        } => assert!(info.flags.contains(RxFrameInfoFlags::TIMESTAMP_DTU)),
        other => panic!("expected error delivery, got {other:?}"),
    }
    assert_eq!(seq.access_end(), Some(AccessEnd::Completed));
}

#[test]
fn timeout_is_delivered_without_frame_or_info() {
    let mut seq = sequencer();
    let mut access = build_access(&[rx(RxTimeout::Dtu(100)), tx()]);

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::RxTimeout);

    assert_eq!(
        access.ops().callbacks()[0],
        AccessCallback::RxFrame {
            frame_idx: 0,
            payload: None,
            info: None,
            error: RxError::Timeout,
        }
    );
    assert_eq!(seq.state().frame_idx(), Some(1));
}

#[test]
fn channel_and_filter_are_restored_from_pib() {
    let mut seq = sequencer();
    let override_filt = HwAddrFilt {
        pan_id: 0xbeef,
        short_addr: 0x0042,
        extended_addr: 0,
        pan_coord: false,
    };
    let mut access = build_access(&[rx(RxTimeout::Dtu(100))])
        .with_channel(ChannelConfig::new(4, 9, 10))
        .with_hw_addr_filt(override_filt, FilterChanges::PAN_ID);

    seq.begin(&mut access).expect("access admitted");
    assert_eq!(seq.llhw().channel(), ChannelConfig::new(4, 9, 10));
    assert_eq!(seq.llhw().hw_addr_filt().pan_id, 0xbeef);
    assert_eq!(seq.llhw().hw_addr_filt().short_addr, BROADCAST_ADDR);

    seq.handle_event(&mut access, RadioEvent::RxTimeout);

    let pib_filt = MacPib::default().hw_addr_filt();
    assert_eq!(
        calls(&seq).as_slice(),
        &[
            LlhwCall::SetHwAddrFilt(override_filt, FilterChanges::PAN_ID),
            LlhwCall::SetChannel(ChannelConfig::new(4, 9, 10)),
            LlhwCall::RxEnable {
                frame_idx: 0,
                timestamp_dtu: 0,
                timeout: RxTimeout::Dtu(100),
            },
            LlhwCall::SetChannel(DEFAULT_CHANNEL),
            LlhwCall::SetHwAddrFilt(pib_filt, FilterChanges::PAN_ID),
        ]
    );
    assert_eq!(seq.llhw().channel(), DEFAULT_CHANNEL);
    assert_eq!(seq.llhw().hw_addr_filt(), pib_filt);
    assert_eq!(access.ops().callbacks().last(), Some(&AccessCallback::AccessDone(Ok(()))));
}

#[test]
fn restore_uses_updated_pib_values() {
    let mut seq = sequencer();
    let associated = ChannelConfig::new(4, 9, 11);
    seq.pib_mut().phy_current_channel = associated;
    let mut access =
        build_access(&[tx()]).with_channel(ChannelConfig::new(4, 5, 9));

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::TxDone);

    assert_eq!(seq.llhw().channel(), associated);
}

#[test]
fn next_access_may_begin_after_finish() {
    let mut seq = sequencer();
    let mut first = build_access(&[tx()]);
    seq.begin(&mut first).expect("first access admitted");
    seq.handle_event(&mut first, RadioEvent::TxDone);
    assert_eq!(seq.access_end(), Some(AccessEnd::Completed));

    let mut second = build_access(&[rx(RxTimeout::Dtu(100))]);
    seq.begin(&mut second).expect("second access admitted");
    assert_eq!(*seq.state(), SequencerState::Receiving { frame_idx: 0 });
    assert_eq!(seq.access_end(), None);
}

#[test]
fn begin_is_refused_while_a_frame_is_in_flight() {
    let mut seq = sequencer();
    let mut running = build_access(&[rx(RxTimeout::Dtu(100))]);
    seq.begin(&mut running).expect("access admitted");

    let mut intruder = build_access(&[tx()]);
    assert_eq!(
        seq.begin(&mut intruder),
        Err(SequencerError::AccessInProgress)
    );

    assert_eq!(seq.llhw().calls().len(), 1);
    assert!(intruder.ops().callbacks().is_empty());
    assert_eq!(*seq.state(), SequencerState::Receiving { frame_idx: 0 });
}

#[test]
fn telemetry_traces_the_access() {
    let mut seq = sequencer();
    let mut access = build_access(&[rx(RxTimeout::Dtu(5_000)), tx()]);

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::RxFrame);
    seq.handle_event(&mut access, RadioEvent::TxDone);

    let events: HeaplessVec<TelemetryEventKind, 16> = seq
        .telemetry()
        .current_access_events()
        .map(|record| record.event)
        .collect();
    assert_eq!(
        events.as_slice(),
        &[
            TelemetryEventKind::AccessAdmitted { frames: 2 },
            TelemetryEventKind::RxArmed(0),
            TelemetryEventKind::FrameReceived(0),
            TelemetryEventKind::TxIssued(1),
            TelemetryEventKind::TxConsumed(1),
            TelemetryEventKind::AccessDone,
        ]
    );
}

#[test]
fn reset_returns_to_idle_only_after_the_access_ended() {
    let mut seq = sequencer();
    let mut access = build_access(&[tx()]);

    seq.begin(&mut access).expect("access admitted");
    assert!(!seq.reset(), "reset must not drop an in-flight frame");

    seq.handle_event(&mut access, RadioEvent::TxDone);
    assert!(seq.reset());
    assert_eq!(*seq.state(), SequencerState::Idle);
}
