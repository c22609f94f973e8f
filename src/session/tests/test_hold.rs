use super::{activate, breathe, harness, harness_with};
use crate::config::DeviceTemplate;
use crate::session::SessionState;
use crate::useragent::{CallDirection, CallEvent, StackError, StackErrorKind, TerminateCause, TerminatedInfo};
use crate::Error;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_hold_resolves_on_reinvite_accepted() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    let hold = h.session.hold();
    let drive = async {
        breathe().await;
        assert_eq!(h.control.reinvites.load(Ordering::SeqCst), 1);
        h.events.send(CallEvent::ReinviteAccepted).ok();
    };
    let (held, _) = tokio::join!(hold, drive);
    assert!(held.unwrap());
    assert!(h.session.hold_state());
    assert_eq!(h.session.state(), SessionState::OnHold);
}

#[tokio::test]
async fn test_back_to_back_holds_share_one_reinvite() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    let first = h.session.hold();
    let second = h.session.hold();
    let drive = async {
        breathe().await;
        // One re-INVITE on the wire, both callers wait on it.
        assert_eq!(h.control.reinvites.load(Ordering::SeqCst), 1);
        h.events.send(CallEvent::ReinviteAccepted).ok();
    };
    let (a, b, _) = tokio::join!(first, second, drive);
    assert!(a.unwrap());
    assert!(b.unwrap());
    assert!(h.session.hold_state());

    // A third hold is already satisfied and does not renegotiate.
    assert!(h.session.hold().await.unwrap());
    assert_eq!(h.control.reinvites.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hold_failure_keeps_prior_state() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    let hold = h.session.hold();
    let drive = async {
        breathe().await;
        h.events
            .send(CallEvent::ReinviteFailed(StackError::with_code(
                StackErrorKind::Reinvite,
                "refused",
                rsip::StatusCode::NotAcceptableHere,
            )))
            .ok();
    };
    let (held, _) = tokio::join!(hold, drive);
    assert!(matches!(held.unwrap_err(), Error::ReinviteFailed(_)));
    assert!(!h.session.hold_state());
    assert_eq!(h.session.state(), SessionState::Active);
}

#[tokio::test]
async fn test_unhold_round_trip() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    let hold = h.session.hold();
    let drive = async {
        breathe().await;
        h.events.send(CallEvent::ReinviteAccepted).ok();
    };
    let (held, _) = tokio::join!(hold, drive);
    assert!(held.unwrap());

    let unhold = h.session.unhold();
    let drive = async {
        breathe().await;
        h.events.send(CallEvent::ReinviteAccepted).ok();
    };
    let (resumed, _) = tokio::join!(unhold, drive);
    assert!(resumed.unwrap());
    assert!(!h.session.hold_state());
    assert_eq!(h.session.state(), SessionState::Active);
    assert_eq!(h.control.reinvites.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_terminate_aborts_pending_hold() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    let hold = h.session.hold();
    let drive = async {
        breathe().await;
        h.events
            .send(CallEvent::Terminated(TerminatedInfo {
                cause: TerminateCause::Bye,
                by_remote: true,
                hangup_cause_code: None,
            }))
            .ok();
    };
    let (held, _) = tokio::join!(hold, drive);
    assert!(matches!(held.unwrap_err(), Error::SessionAborted));
}

#[tokio::test]
async fn test_hold_requires_an_active_session() {
    let h = harness(CallDirection::Inbound);
    let err = h.session.hold().await.unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
}

#[tokio::test]
async fn test_rebuild_media_renegotiates_with_a_fresh_session() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;
    assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);

    let rebuild = h.session.rebuild_media();
    let drive = async {
        breathe().await;
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(h.control.reinvites.load(Ordering::SeqCst), 1);
        h.events.send(CallEvent::ReinviteAccepted).ok();
    };
    let (rebuilt, _) = tokio::join!(rebuild, drive);
    assert!(rebuilt.unwrap());
    // Still not on hold; the rebuild keeps the negotiated state.
    assert!(!h.session.hold_state());
}

#[tokio::test]
async fn test_device_replacement_falls_back_to_rebuild() {
    let h = harness_with(CallDirection::Outbound, true);
    activate(&h).await;

    let select = h.session.select_input_device(DeviceTemplate {
        id: Some("headset".to_string()),
        ..DeviceTemplate::default()
    });
    let drive = async {
        breathe().await;
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 2);
        h.events.send(CallEvent::ReinviteAccepted).ok();
    };
    let (selected, _) = tokio::join!(select, drive);
    selected.unwrap();
    assert_eq!(h.session.media().input_device().as_deref(), Some("headset"));
}

#[tokio::test]
async fn test_mute_flags_are_independent() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    h.session.set_input_muted(true);
    assert!(h.session.media().input_muted());
    assert!(!h.session.media().output_muted());

    h.session.set_output_muted(true);
    h.session.set_input_muted(false);
    assert!(!h.session.media().input_muted());
    assert!(h.session.media().output_muted());

    // Mute never renegotiates.
    assert_eq!(h.control.reinvites.load(Ordering::SeqCst), 0);
    let media = h.factory.last();
    assert!(media.output_muted.load(Ordering::SeqCst));
}
