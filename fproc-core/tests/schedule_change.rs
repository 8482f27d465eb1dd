use fproc_core::access::{Access, AccessFrame, RxError};
use fproc_core::fproc::{AccessEnd, FrameSequencer, RadioEvent, SequencerError, SequencerState};
use fproc_core::llhw::{LlhwError, RxFrameInfoFlags, RxInfo, RxTimeout, TxFrameInfo};
use fproc_core::pib::MacPib;
use fproc_core::sim::{
    AccessCallback, LlhwCall, LlhwOp, RecordingAccess, RecordingScheduler, SchedulerNotice,
    SimFrame, SimRadio,
};
use fproc_core::telemetry::TelemetryEventKind;

type Sequencer = FrameSequencer<SimRadio, RecordingScheduler>;

fn sequencer() -> Sequencer {
    let pib = MacPib::default();
    FrameSequencer::new(SimRadio::new(&pib), RecordingScheduler::new(), pib)
}

fn build_access(frames: &[AccessFrame]) -> Access<RecordingAccess> {
    let mut access = Access::new(RecordingAccess::new());
    for frame in frames {
        access.push_frame(*frame).expect("access has room");
    }
    access
}

fn listen() -> AccessFrame {
    AccessFrame::rx(
        RxInfo::immediate(RxTimeout::Infinite),
        RxFrameInfoFlags::NONE,
    )
}

fn rx(timeout_dtu: u32) -> AccessFrame {
    AccessFrame::rx(
        RxInfo::immediate(RxTimeout::Dtu(timeout_dtu)),
        RxFrameInfoFlags::NONE,
    )
}

fn tx() -> AccessFrame {
    AccessFrame::tx(TxFrameInfo::immediate())
}

#[test]
fn unbounded_receive_yields_immediately() {
    let mut seq = sequencer();
    let mut access = build_access(&[listen(), tx()]);

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::ScheduleChange);

    assert!(seq.llhw().calls().iter().any(|record| record.call == LlhwCall::RxDisable));
    assert_eq!(
        access.ops().callbacks()[0],
        AccessCallback::RxFrame {
            frame_idx: 0,
            payload: None,
            info: None,
            error: RxError::Timeout,
        }
    );
    assert_eq!(
        *seq.state(),
        SequencerState::Transmitting {
            frame_idx: 1,
            pending: SimFrame(1),
        }
    );
}

#[test]
fn unbounded_single_receive_finishes_access() {
    let mut seq = sequencer();
    let mut access = build_access(&[listen()]);

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::ScheduleChange);

    assert_eq!(seq.access_end(), Some(AccessEnd::Completed));
    assert_eq!(
        seq.scheduler().notices(),
        &[
            SchedulerNotice::AccessFinished,
            SchedulerNotice::RunNextAccessNow,
        ]
    );
    assert!(!seq.llhw().is_rx_armed());
}

#[test]
fn busy_receiver_defers_the_change() {
    let mut seq = sequencer();
    let mut access = build_access(&[listen(), tx()]);

    seq.begin(&mut access).expect("access admitted");
    seq.llhw_mut().fail_next(LlhwOp::RxDisable, LlhwError::Busy);
    seq.handle_event(&mut access, RadioEvent::ScheduleChange);

    assert_eq!(*seq.state(), SequencerState::Receiving { frame_idx: 0 });
    assert!(access.ops().callbacks().is_empty());
    assert!(seq.scheduler().notices().is_empty());
    assert_eq!(
        seq.telemetry().latest().map(|record| record.event),
        Some(TelemetryEventKind::ScheduleChangeDeferred(0))
    );

    // The reception that kept the receiver busy completes normally.
    seq.handle_event(&mut access, RadioEvent::RxFrame);
    assert!(matches!(
        access.ops().callbacks()[0],
        AccessCallback::RxFrame {
            frame_idx: 0,
            payload: Some(_),
            error: RxError::None,
            ..
        }
    ));
    assert_eq!(seq.state().frame_idx(), Some(1));
}

#[test]
fn failed_disable_reports_timeout_then_breaks() {
    let mut seq = sequencer();
    let mut access = build_access(&[listen(), tx()]);

    seq.begin(&mut access).expect("access admitted");
    seq.llhw_mut().fail_next(LlhwOp::RxDisable, LlhwError::Bus);
    seq.handle_event(&mut access, RadioEvent::ScheduleChange);

    let error = SequencerError::Llhw(LlhwError::Bus);
    assert_eq!(
        access.ops().callbacks(),
        &[
            AccessCallback::RxFrame {
                frame_idx: 0,
                payload: None,
                info: None,
                error: RxError::Timeout,
            },
            AccessCallback::AccessDone(Err(error)),
        ]
    );
    assert_eq!(seq.access_end(), Some(AccessEnd::Aborted(error)));
    assert_eq!(seq.llhw().dispatch_count(), 1);
}

#[test]
fn bounded_receive_ignores_the_change() {
    let mut seq = sequencer();
    let mut access = build_access(&[rx(1_000), tx()]);

    seq.begin(&mut access).expect("access admitted");
    seq.handle_event(&mut access, RadioEvent::ScheduleChange);

    assert_eq!(seq.llhw().calls().len(), 1, "receiver left armed");
    assert!(access.ops().callbacks().is_empty());
    assert_eq!(*seq.state(), SequencerState::Receiving { frame_idx: 0 });
}

#[test]
fn transmit_is_never_preempted() {
    let mut seq = sequencer();
    let mut access = build_access(&[tx(), rx(100)]);

    seq.begin(&mut access).expect("access admitted");
    let callbacks_before = access.ops().callbacks().len();
    let calls_before = seq.llhw().calls().len();

    seq.handle_event(&mut access, RadioEvent::ScheduleChange);

    assert_eq!(
        *seq.state(),
        SequencerState::Transmitting {
            frame_idx: 0,
            pending: SimFrame(1),
        }
    );
    assert_eq!(access.ops().callbacks().len(), callbacks_before);
    assert_eq!(seq.llhw().calls().len(), calls_before);
    assert_eq!(seq.scheduler().notices(), &[SchedulerNotice::HoldAccess]);
}
