//! Session state machine tests, driven by a scriptable call control and
//! a stub media plane.

use crate::config::{DeviceTemplate, MediaConfig};
use crate::session::media::{
    MediaDirection, MediaSession, MediaSessionFactory, RtpSample, SessionMedia,
};
use crate::session::Session;
use crate::useragent::{
    CallControl, CallDirection, CallEvent, CallEventSender, CallHandle, DialogRef, ReferTarget,
    RemoteIdentity, StackError, StackErrorKind, TerminateCause, TerminatedInfo,
};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

mod test_session_states;
mod test_hold;

pub(super) struct MockMedia {
    pub alive: AtomicBool,
    pub closed: AtomicBool,
    pub input_muted: AtomicBool,
    pub output_muted: AtomicBool,
    pub fail_replace: bool,
    pub remote: Mutex<Option<Vec<u8>>>,
}

impl MockMedia {
    fn new(fail_replace: bool) -> Arc<MockMedia> {
        Arc::new(MockMedia {
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            input_muted: AtomicBool::new(false),
            output_muted: AtomicBool::new(false),
            fail_replace,
            remote: Mutex::new(None),
        })
    }
}

#[async_trait]
impl MediaSession for MockMedia {
    async fn description(&self, direction: MediaDirection) -> Result<Vec<u8>> {
        Ok(format!("v=0 offer {:?}", direction).into_bytes())
    }

    async fn answer(&self, _remote_offer: &[u8], direction: MediaDirection) -> Result<Vec<u8>> {
        Ok(format!("v=0 answer {:?}", direction).into_bytes())
    }

    async fn set_remote_description(&self, sdp: &[u8]) -> Result<()> {
        *self.remote.lock().unwrap() = Some(sdp.to_vec());
        Ok(())
    }

    fn set_input_muted(&self, muted: bool) {
        self.input_muted.store(muted, Ordering::SeqCst);
    }

    fn set_output_muted(&self, muted: bool) {
        self.output_muted.store(muted, Ordering::SeqCst);
    }

    async fn replace_input(&self, _device: &DeviceTemplate) -> Result<()> {
        if self.fail_replace {
            return Err(Error::Error("replace refused by script".to_string()));
        }
        Ok(())
    }

    async fn replace_output(&self, _device: &DeviceTemplate) -> Result<()> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn stats(&self) -> Result<RtpSample> {
        Ok(RtpSample {
            jitter_ms: 5.0,
            packet_loss: 0.01,
            rtt_ms: 40.0,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(super) struct MockMediaFactory {
    pub created: AtomicUsize,
    pub fail_replace: bool,
    pub sessions: Mutex<Vec<Arc<MockMedia>>>,
}

impl MockMediaFactory {
    pub fn new(fail_replace: bool) -> Arc<MockMediaFactory> {
        Arc::new(MockMediaFactory {
            created: AtomicUsize::new(0),
            fail_replace,
            sessions: Mutex::new(vec![]),
        })
    }

    pub fn last(&self) -> Arc<MockMedia> {
        self.sessions.lock().unwrap().last().unwrap().clone()
    }
}

impl MediaSessionFactory for MockMediaFactory {
    fn create(
        &self,
        _template: &MediaConfig,
        _ice_servers: &[String],
    ) -> Result<Arc<dyn MediaSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let media = MockMedia::new(self.fail_replace);
        self.sessions.lock().unwrap().push(media.clone());
        Ok(media)
    }
}

/// Records operations; accept/reject/cancel/bye answer themselves the
/// way the real stack does, renegotiation and transfers stay pending
/// until the test fires the event.
pub(super) struct MockControl {
    events: CallEventSender,
    pub accepts: AtomicUsize,
    pub rejects: AtomicUsize,
    pub cancels: AtomicUsize,
    pub byes: AtomicUsize,
    pub reinvites: AtomicUsize,
    pub refers: Mutex<Vec<ReferTarget>>,
    pub tones: Mutex<String>,
}

impl MockControl {
    fn new(events: CallEventSender) -> Arc<MockControl> {
        Arc::new(MockControl {
            events,
            accepts: AtomicUsize::new(0),
            rejects: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            byes: AtomicUsize::new(0),
            reinvites: AtomicUsize::new(0),
            refers: Mutex::new(vec![]),
            tones: Mutex::new(String::new()),
        })
    }
}

#[async_trait]
impl CallControl for MockControl {
    async fn accept(&self, _answer: Vec<u8>) -> Result<()> {
        self.accepts.fetch_add(1, Ordering::SeqCst);
        self.events.send(CallEvent::Accepted(None)).ok();
        Ok(())
    }

    async fn reject(&self, _busy: bool) -> Result<()> {
        self.rejects.fetch_add(1, Ordering::SeqCst);
        self.events
            .send(CallEvent::Rejected(StackError::with_code(
                StackErrorKind::Invite,
                "rejected locally",
                rsip::StatusCode::BusyHere,
            )))
            .ok();
        self.events
            .send(CallEvent::Terminated(TerminatedInfo {
                cause: TerminateCause::Rejected,
                by_remote: false,
                hangup_cause_code: None,
            }))
            .ok();
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.events
            .send(CallEvent::Terminated(TerminatedInfo {
                cause: TerminateCause::Cancel,
                by_remote: false,
                hangup_cause_code: None,
            }))
            .ok();
        Ok(())
    }

    async fn bye(&self) -> Result<()> {
        self.byes.fetch_add(1, Ordering::SeqCst);
        self.events.send(CallEvent::Bye).ok();
        self.events
            .send(CallEvent::Terminated(TerminatedInfo {
                cause: TerminateCause::Bye,
                by_remote: false,
                hangup_cause_code: None,
            }))
            .ok();
        Ok(())
    }

    async fn reinvite(&self, _offer: Vec<u8>) -> Result<()> {
        self.reinvites.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn refer(&self, target: &ReferTarget) -> Result<()> {
        self.refers.lock().unwrap().push(target.clone());
        Ok(())
    }

    async fn dtmf(&self, tone: char) -> Result<()> {
        self.tones.lock().unwrap().push(tone);
        Ok(())
    }

    fn dialog_ref(&self) -> DialogRef {
        DialogRef {
            call_id: "consulted-call".to_string(),
            local_tag: "local-tag".to_string(),
            remote_tag: "remote-tag".to_string(),
            remote_uri: rsip::Uri::try_from("sip:carol@example.com").unwrap(),
        }
    }
}

pub(super) struct Harness {
    pub session: Session,
    pub events: CallEventSender,
    pub control: Arc<MockControl>,
    pub factory: Arc<MockMediaFactory>,
    pub reaped: UnboundedReceiver<String>,
}

pub(super) fn harness(direction: CallDirection) -> Harness {
    harness_with(direction, false)
}

pub(super) fn harness_with(direction: CallDirection, fail_replace: bool) -> Harness {
    let (events, call_rx) = unbounded_channel();
    let control = MockControl::new(events.clone());
    let factory = MockMediaFactory::new(fail_replace);
    let media = SessionMedia::new(factory.clone(), MediaConfig::default(), vec![]).unwrap();
    let (reap_tx, reaped) = unbounded_channel();

    let handle = CallHandle {
        call_id: "mock-call".to_string(),
        direction,
        remote_identity: RemoteIdentity {
            display_name: Some("Alice".to_string()),
            user: Some("alice".to_string()),
        },
        remote_offer: Some(b"v=0 remote offer".to_vec()),
        control: control.clone(),
        events: call_rx,
    };
    let session = Session::new(handle, media, reap_tx);

    Harness {
        session,
        events,
        control,
        factory,
        reaped,
    }
}

/// Make the session active the way an answered outbound call would be.
pub(super) async fn activate(h: &Harness) {
    h.events.send(CallEvent::Accepted(None)).ok();
    breathe().await;
}

pub(super) async fn breathe() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
