use super::{activate, breathe, harness};
use crate::session::SessionState;
use crate::useragent::{CallDirection, CallEvent, StackError, StackErrorKind, TerminateCause, TerminatedInfo};
use crate::Error;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_inbound_accept() {
    let h = harness(CallDirection::Inbound);
    assert_eq!(h.session.state(), SessionState::Ringing);

    h.session.accept().await.unwrap();
    assert_eq!(h.session.state(), SessionState::Active);
    assert_eq!(h.control.accepts.load(Ordering::SeqCst), 1);
    assert!(h.session.accepted().await);
}

#[tokio::test]
async fn test_inbound_reject() {
    let h = harness(CallDirection::Inbound);
    h.session.reject().await.unwrap();
    breathe().await;
    assert_eq!(h.session.state(), SessionState::Terminated);
    assert!(!h.session.accepted().await);
}

#[tokio::test]
async fn test_accept_after_reject_is_invalid() {
    let h = harness(CallDirection::Inbound);
    h.session.reject().await.unwrap();
    let err = h.session.accept().await.unwrap_err();
    assert_eq!(err.to_string(), "invalid operation: session is rejected");
    assert_eq!(h.control.accepts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reject_after_accept_is_invalid() {
    let h = harness(CallDirection::Inbound);
    h.session.accept().await.unwrap();
    let err = h.session.reject().await.unwrap_err();
    assert_eq!(err.to_string(), "invalid operation: session is accepted");
    assert_eq!(h.control.rejects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_outbound_ringing_then_active() {
    let h = harness(CallDirection::Outbound);
    assert_eq!(h.session.state(), SessionState::Initial);

    h.events.send(CallEvent::Ringing).ok();
    breathe().await;
    assert_eq!(h.session.state(), SessionState::Ringing);

    h.events.send(CallEvent::Accepted(Some(b"v=0 answer".to_vec()))).ok();
    breathe().await;
    assert_eq!(h.session.state(), SessionState::Active);
    assert!(h.session.accepted().await);

    // The remote answer reached the media session.
    let media = h.factory.last();
    assert_eq!(
        media.remote.lock().unwrap().as_deref(),
        Some(b"v=0 answer".as_slice())
    );
}

#[tokio::test]
async fn test_outbound_rejected_resolves_accepted_false() {
    let h = harness(CallDirection::Outbound);
    h.events
        .send(CallEvent::Rejected(StackError::with_code(
            StackErrorKind::Invite,
            "busy",
            rsip::StatusCode::BusyHere,
        )))
        .ok();
    h.events
        .send(CallEvent::Terminated(TerminatedInfo {
            cause: TerminateCause::Rejected,
            by_remote: true,
            hangup_cause_code: None,
        }))
        .ok();
    assert!(!h.session.accepted().await);
    let info = h.session.terminated().await.unwrap();
    assert_eq!(info.cause, TerminateCause::Rejected);
}

#[tokio::test]
async fn test_remote_bye_records_said_bye_and_closes_media() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    h.events.send(CallEvent::Bye).ok();
    h.events
        .send(CallEvent::Terminated(TerminatedInfo {
            cause: TerminateCause::Bye,
            by_remote: true,
            hangup_cause_code: None,
        }))
        .ok();

    let info = h.session.terminated().await.unwrap();
    assert!(info.by_remote);
    assert!(h.session.said_bye());
    assert_eq!(h.session.state(), SessionState::Terminated);
    breathe().await;
    assert!(h.factory.last().closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_misconfigured_account_hangup_cause() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;

    h.events.send(CallEvent::Bye).ok();
    h.events
        .send(CallEvent::Terminated(TerminatedInfo {
            cause: TerminateCause::Bye,
            by_remote: true,
            hangup_cause_code: Some(58),
        }))
        .ok();

    let err = h.session.terminated().await.unwrap_err();
    assert!(matches!(err, Error::MisconfiguredAccount));
}

#[tokio::test]
async fn test_terminated_is_final() {
    let mut h = harness(CallDirection::Outbound);
    activate(&h).await;
    h.events
        .send(CallEvent::Terminated(TerminatedInfo {
            cause: TerminateCause::Bye,
            by_remote: true,
            hangup_cause_code: None,
        }))
        .ok();
    h.session.terminated().await.unwrap();

    // Nothing mutates the session after the terminal event.
    h.events.send(CallEvent::Ringing).ok();
    h.events.send(CallEvent::Accepted(None)).ok();
    h.events.send(CallEvent::ReinviteAccepted).ok();
    breathe().await;
    assert_eq!(h.session.state(), SessionState::Terminated);
    assert!(!h.session.hold_state());

    // The owner was told to forget the call.
    assert_eq!(h.reaped.recv().await.as_deref(), Some("mock-call"));
}

#[tokio::test]
async fn test_terminate_on_active_call_sends_bye() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;
    let info = h.session.terminate().await.unwrap();
    assert_eq!(info.cause, TerminateCause::Bye);
    assert_eq!(h.control.byes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_terminate_on_unanswered_outbound_cancels() {
    let h = harness(CallDirection::Outbound);
    h.events.send(CallEvent::Ringing).ok();
    breathe().await;
    let info = h.session.terminate().await.unwrap();
    assert_eq!(info.cause, TerminateCause::Cancel);
    assert_eq!(h.control.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_terminate_on_ringing_inbound_rejects() {
    let h = harness(CallDirection::Inbound);
    let info = h.session.terminate().await.unwrap();
    assert_eq!(info.cause, TerminateCause::Rejected);
    assert_eq!(h.control.rejects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_abandon_terminates_with_recovery_cause() {
    let h = harness(CallDirection::Outbound);
    activate(&h).await;
    h.session.abandon().await;
    let info = h.session.terminated().await.unwrap();
    assert_eq!(info.cause, TerminateCause::RecoveryAbandoned);
    assert!(h.factory.last().closed.load(Ordering::SeqCst));
}
