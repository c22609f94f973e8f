use crate::config::DeviceTemplate;
use crate::useragent::{
    CallDirection, CallEvent, CallEventReceiver, CallHandle, CallControl, ReferTarget,
    RemoteIdentity, StackError, TerminateCause, TerminatedInfo,
};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub mod media;
pub mod stats;

#[cfg(test)]
mod tests;

pub use media::{MediaDirection, MediaSession, MediaSessionFactory, RtpSample, SessionMedia};
pub use stats::{QualityStats, SessionStats};

/// Per-call state. Inbound sessions start in `Ringing`, outbound in
/// `Initial`; the only loop is `Active ↔ OnHold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Ringing,
    Active,
    OnHold,
    Terminating,
    Terminated,
}

/// Where to send a transfer: a plain URI, or another live session for an
/// attended transfer via REFER-with-Replaces.
pub enum TransferTarget {
    Blind(String),
    Attended(Session),
}

/// Cloneable failure for settled single-flight operations; every waiter
/// on the same flight observes the same outcome.
#[derive(Debug, Clone)]
enum SessionOpError {
    InviteFailed {
        code: Option<rsip::StatusCode>,
        reason: String,
    },
    Reinvite(String),
    Refer(String),
    Aborted,
}

impl SessionOpError {
    fn from_stack(kind: OpKind, e: &StackError) -> SessionOpError {
        match kind {
            OpKind::Invite => SessionOpError::InviteFailed {
                code: e.sip_code.clone(),
                reason: e.cause.clone(),
            },
            OpKind::Reinvite => SessionOpError::Reinvite(e.to_string()),
            OpKind::Refer => SessionOpError::Refer(e.to_string()),
        }
    }

    fn into_error(self) -> Error {
        match self {
            SessionOpError::InviteFailed { code, reason } => Error::InviteFailed { code, reason },
            SessionOpError::Reinvite(cause) => Error::ReinviteFailed(cause),
            SessionOpError::Refer(cause) => Error::TransferFailed(cause),
            SessionOpError::Aborted => Error::SessionAborted,
        }
    }
}

#[derive(Clone, Copy)]
enum OpKind {
    Invite,
    Reinvite,
    Refer,
}

type OpOutcome = Option<std::result::Result<bool, SessionOpError>>;
type OpSignal = watch::Receiver<OpOutcome>;

/// One in-flight operation: the pump settles the sender, every repeated
/// caller awaits a clone of the receiver.
struct Flight {
    tx: watch::Sender<OpOutcome>,
    rx: OpSignal,
}

impl Flight {
    fn new() -> Flight {
        let (tx, rx) = watch::channel(None);
        Flight { tx, rx }
    }

    fn settle(&self, outcome: std::result::Result<bool, SessionOpError>) {
        self.tx.send_replace(Some(outcome));
    }
}

enum AcceptSlot {
    Idle,
    Accepting(Flight),
    Rejecting(Flight),
}

struct HoldState {
    /// Externally observable value; flips only on a successful re-INVITE.
    current: bool,
    pending: Option<PendingReinvite>,
}

struct PendingReinvite {
    target: bool,
    flight: Flight,
}

#[derive(Debug, Clone)]
enum TerminalOutcome {
    Normal(TerminatedInfo),
    /// BYE carrying `X-Asterisk-Hangupcausecode: 58`.
    Misconfigured,
}

struct SessionInner {
    id: String,
    direction: CallDirection,
    control: Arc<dyn CallControl>,
    media: SessionMedia,
    stats: SessionStats,
    remote_identity: Mutex<RemoteIdentity>,
    remote_offer: Option<Vec<u8>>,
    state: Mutex<SessionState>,
    hold: Mutex<HoldState>,
    accept: Mutex<AcceptSlot>,
    transfer: Mutex<Option<Flight>>,
    accepted_tx: watch::Sender<Option<bool>>,
    terminated_tx: watch::Sender<Option<TerminalOutcome>>,
    said_bye: AtomicBool,
}

/// One call: a state machine layered over the UA adapter's per-call
/// event stream. Owned by the client that created it; cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        handle: CallHandle,
        media: SessionMedia,
        reaper: UnboundedSender<String>,
    ) -> Session {
        let CallHandle {
            call_id,
            direction,
            remote_identity,
            remote_offer,
            control,
            events,
        } = handle;

        let state = match direction {
            CallDirection::Inbound => SessionState::Ringing,
            CallDirection::Outbound => SessionState::Initial,
        };

        let stats = SessionStats::new();
        stats.arm(media.current());

        let (accepted_tx, _) = watch::channel(None);
        let (terminated_tx, _) = watch::channel(None);

        let inner = Arc::new(SessionInner {
            id: call_id,
            direction,
            control,
            media,
            stats,
            remote_identity: Mutex::new(remote_identity),
            remote_offer,
            state: Mutex::new(state),
            hold: Mutex::new(HoldState {
                current: false,
                pending: None,
            }),
            accept: Mutex::new(AcceptSlot::Idle),
            transfer: Mutex::new(None),
            accepted_tx,
            terminated_tx,
            said_bye: AtomicBool::new(false),
        });

        SessionInner::spawn_pump(inner.clone(), events, reaper);
        Session { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn direction(&self) -> CallDirection {
        self.inner.direction
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn remote_identity(&self) -> RemoteIdentity {
        self.inner.remote_identity.lock().unwrap().clone()
    }

    pub fn media(&self) -> SessionMedia {
        self.inner.media.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.stats.clone()
    }

    /// The most recently acknowledged hold state, not the pending one.
    pub fn hold_state(&self) -> bool {
        self.inner.hold.lock().unwrap().current
    }

    pub fn said_bye(&self) -> bool {
        self.inner.said_bye.load(Ordering::Relaxed)
    }

    /// Answer a ringing inbound call. Resolves once the acceptance went
    /// out and the stack confirmed it; repeated calls share the same
    /// in-flight result.
    pub async fn accept(&self) -> Result<()> {
        if self.inner.direction != CallDirection::Inbound {
            return Err(Error::InvalidOperation(
                "only inbound sessions can be accepted",
            ));
        }
        match *self.inner.accepted_tx.borrow() {
            Some(true) => return Ok(()),
            Some(false) => return Err(Error::InvalidOperation("session is rejected")),
            None => {}
        }

        enum Plan {
            Join(OpSignal),
            Start(OpSignal),
        }

        let plan = {
            let mut slot = self.inner.accept.lock().unwrap();
            let joined = match &*slot {
                AcceptSlot::Rejecting(_) => {
                    return Err(Error::InvalidOperation("session is rejected"))
                }
                AcceptSlot::Accepting(flight) => Some(flight.rx.clone()),
                AcceptSlot::Idle => None,
            };
            match joined {
                Some(rx) => Plan::Join(rx),
                None => {
                    if *self.inner.state.lock().unwrap() != SessionState::Ringing {
                        return Err(Error::InvalidOperation("session is not ringing"));
                    }
                    let flight = Flight::new();
                    let rx = flight.rx.clone();
                    *slot = AcceptSlot::Accepting(flight);
                    Plan::Start(rx)
                }
            }
        };

        match plan {
            Plan::Join(rx) => await_op(rx).await.map(|_| ()),
            Plan::Start(rx) => {
                let answer = match self.build_answer().await {
                    Ok(answer) => answer,
                    Err(e) => {
                        *self.inner.accept.lock().unwrap() = AcceptSlot::Idle;
                        return Err(e);
                    }
                };
                if let Err(e) = self.inner.control.accept(answer).await {
                    *self.inner.accept.lock().unwrap() = AcceptSlot::Idle;
                    return Err(e);
                }
                await_op(rx).await.map(|_| ())
            }
        }
    }

    /// Decline a ringing inbound call with 486 Busy Here.
    pub async fn reject(&self) -> Result<()> {
        if self.inner.direction != CallDirection::Inbound {
            return Err(Error::InvalidOperation(
                "only inbound sessions can be rejected",
            ));
        }
        match *self.inner.accepted_tx.borrow() {
            Some(false) => return Ok(()),
            Some(true) => return Err(Error::InvalidOperation("session is accepted")),
            None => {}
        }

        enum Plan {
            Join(OpSignal),
            Start(OpSignal),
        }

        let plan = {
            let mut slot = self.inner.accept.lock().unwrap();
            let joined = match &*slot {
                AcceptSlot::Accepting(_) => {
                    return Err(Error::InvalidOperation("session is accepted"))
                }
                AcceptSlot::Rejecting(flight) => Some(flight.rx.clone()),
                AcceptSlot::Idle => None,
            };
            match joined {
                Some(rx) => Plan::Join(rx),
                None => {
                    if *self.inner.state.lock().unwrap() != SessionState::Ringing {
                        return Err(Error::InvalidOperation("session is not ringing"));
                    }
                    let flight = Flight::new();
                    let rx = flight.rx.clone();
                    *slot = AcceptSlot::Rejecting(flight);
                    Plan::Start(rx)
                }
            }
        };

        let rx = match plan {
            Plan::Join(rx) => rx,
            Plan::Start(rx) => {
                if let Err(e) = self.inner.control.reject(true).await {
                    *self.inner.accept.lock().unwrap() = AcceptSlot::Idle;
                    return Err(e);
                }
                rx
            }
        };
        await_op(rx).await.map(|_| ())
    }

    /// One-shot answer signal: `true` once accepted, `false` once
    /// rejected (or terminated unanswered).
    pub async fn accepted(&self) -> bool {
        let mut rx = self.inner.accepted_tx.subscribe();
        loop {
            if let Some(answered) = *rx.borrow() {
                return answered;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Resolves on the terminal event. Rejects with
    /// [`Error::MisconfiguredAccount`] when the far end hung up with
    /// Asterisk hangup cause 58 so the UI can prompt for reconfiguration.
    pub async fn terminated(&self) -> Result<TerminatedInfo> {
        let mut rx = self.inner.terminated_tx.subscribe();
        loop {
            let settled = rx.borrow().clone();
            if let Some(outcome) = settled {
                return match outcome {
                    TerminalOutcome::Normal(info) => Ok(info),
                    TerminalOutcome::Misconfigured => Err(Error::MisconfiguredAccount),
                };
            }
            if rx.changed().await.is_err() {
                return Err(Error::SessionAborted);
            }
        }
    }

    /// End the call whatever its state: reject when ringing inbound,
    /// cancel when outbound and unanswered, BYE when established.
    pub async fn terminate(&self) -> Result<TerminatedInfo> {
        let state = self.state();
        match state {
            SessionState::Terminated | SessionState::Terminating => {}
            SessionState::Ringing if self.inner.direction == CallDirection::Inbound => {
                self.transition(SessionState::Terminating);
                if let Err(e) = self.inner.control.reject(false).await {
                    info!(id = %self.inner.id, "reject on terminate failed: {}", e);
                }
            }
            SessionState::Initial | SessionState::Ringing => {
                self.transition(SessionState::Terminating);
                if let Err(e) = self.inner.control.cancel().await {
                    info!(id = %self.inner.id, "cancel on terminate failed: {}", e);
                }
            }
            SessionState::Active | SessionState::OnHold => {
                self.transition(SessionState::Terminating);
                if let Err(e) = self.inner.control.bye().await {
                    info!(id = %self.inner.id, "bye on terminate failed: {}", e);
                }
            }
        }
        self.terminated().await
    }

    /// Fire-and-forget BYE; the terminal event follows on the stream.
    pub fn bye(&self) -> Result<()> {
        if !matches!(
            self.state(),
            SessionState::Active | SessionState::OnHold
        ) {
            return Err(Error::InvalidOperation("session is not active"));
        }
        self.transition(SessionState::Terminating);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.control.bye().await {
                info!(id = %inner.id, "bye failed: {}", e);
            }
        });
        Ok(())
    }

    pub async fn hold(&self) -> Result<bool> {
        self.set_hold_state(true).await
    }

    pub async fn unhold(&self) -> Result<bool> {
        self.set_hold_state(false).await
    }

    /// Idempotent hold toggle. A repeated call for the same target joins
    /// the in-flight re-INVITE; asking for the already-acknowledged state
    /// resolves immediately.
    async fn set_hold_state(&self, target: bool) -> Result<bool> {
        enum Plan {
            Already,
            Join(OpSignal),
            Start(OpSignal),
        }

        let plan = {
            if !matches!(
                self.state(),
                SessionState::Active | SessionState::OnHold
            ) {
                return Err(Error::InvalidOperation("session is not active"));
            }
            let mut hold = self.inner.hold.lock().unwrap();
            if let Some(pending) = &hold.pending {
                if pending.target == target {
                    Plan::Join(pending.flight.rx.clone())
                } else {
                    return Err(Error::ReinviteFailed(
                        "a hold change is already in flight".to_string(),
                    ));
                }
            } else if hold.current == target {
                Plan::Already
            } else {
                let flight = Flight::new();
                let rx = flight.rx.clone();
                hold.pending = Some(PendingReinvite { target, flight });
                Plan::Start(rx)
            }
        };

        match plan {
            Plan::Already => Ok(true),
            Plan::Join(rx) => await_op(rx).await,
            Plan::Start(rx) => {
                let direction = if target {
                    MediaDirection::SendOnly
                } else {
                    MediaDirection::SendRecv
                };
                let offer = match self.inner.media.current().description(direction).await {
                    Ok(offer) => offer,
                    Err(e) => {
                        self.inner.hold.lock().unwrap().pending = None;
                        return Err(e);
                    }
                };
                if let Err(e) = self.inner.control.reinvite(offer).await {
                    self.inner.hold.lock().unwrap().pending = None;
                    return Err(e);
                }
                await_op(rx).await
            }
        }
    }

    /// Send DTMF tones via SIP INFO. `,` inserts a two second pause.
    /// The whole string is validated before the first tone goes out.
    pub fn dtmf(&self, tones: &str) -> Result<()> {
        for tone in tones.chars() {
            if !matches!(tone, '0'..='9' | 'A'..='D' | '#' | '*' | ',') {
                return Err(Error::InvalidDtmf(tone));
            }
        }
        if self.state() != SessionState::Active {
            return Err(Error::InvalidOperation("session is not active"));
        }
        let inner = self.inner.clone();
        let tones = tones.to_string();
        tokio::spawn(async move {
            for tone in tones.chars() {
                if tone == ',' {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
                if let Err(e) = inner.control.dtmf(tone).await {
                    info!(id = %inner.id, "dtmf send failed: {}", e);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });
        Ok(())
    }

    /// Blind transfer to a URI, or attended transfer replacing the
    /// consulted session's dialog. Resolves `true` when the REFER is
    /// accepted.
    pub async fn transfer(&self, target: TransferTarget) -> Result<bool> {
        if self.state() != SessionState::Active {
            return Err(Error::InvalidOperation("session is not active"));
        }

        let refer_target = match target {
            TransferTarget::Blind(uri) => ReferTarget::Blind(parse_target_uri(&uri)?),
            TransferTarget::Attended(consulted) => {
                ReferTarget::Attended(consulted.inner.control.dialog_ref())
            }
        };

        let (rx, fresh) = {
            let mut slot = self.inner.transfer.lock().unwrap();
            if let Some(flight) = slot.as_ref() {
                (flight.rx.clone(), false)
            } else {
                let flight = Flight::new();
                let rx = flight.rx.clone();
                *slot = Some(flight);
                (rx, true)
            }
        };
        if fresh {
            if let Err(e) = self.inner.control.refer(&refer_target).await {
                *self.inner.transfer.lock().unwrap() = None;
                return Err(e);
            }
        }
        await_op(rx).await
    }

    /// Swap the media session (the session description handler) and
    /// renegotiate. The call keeps its hold state.
    pub async fn rebuild_media(&self) -> Result<bool> {
        if !matches!(
            self.state(),
            SessionState::Active | SessionState::OnHold
        ) {
            return Err(Error::InvalidOperation("session is not active"));
        }

        let (current_hold, rx) = {
            let mut hold = self.inner.hold.lock().unwrap();
            if hold.pending.is_some() {
                return Err(Error::ReinviteFailed(
                    "a hold change is already in flight".to_string(),
                ));
            }
            let flight = Flight::new();
            let rx = flight.rx.clone();
            hold.pending = Some(PendingReinvite {
                target: hold.current,
                flight,
            });
            (hold.current, rx)
        };

        let fresh = match self.inner.media.rebuild() {
            Ok(fresh) => fresh,
            Err(e) => {
                self.inner.hold.lock().unwrap().pending = None;
                return Err(e);
            }
        };
        self.inner.stats.arm(fresh.clone());

        let direction = if current_hold {
            MediaDirection::SendOnly
        } else {
            MediaDirection::SendRecv
        };
        let offer = match fresh.description(direction).await {
            Ok(offer) => offer,
            Err(e) => {
                self.inner.hold.lock().unwrap().pending = None;
                return Err(e);
            }
        };
        if let Err(e) = self.inner.control.reinvite(offer).await {
            self.inner.hold.lock().unwrap().pending = None;
            return Err(e);
        }
        await_op(rx).await
    }

    /// Re-point capture at another device; falls back to a full media
    /// rebuild when in-place replacement is not possible.
    pub async fn select_input_device(&self, device: DeviceTemplate) -> Result<()> {
        match self.inner.media.try_replace_input(device.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(id = %self.inner.id, "input replace failed, rebuilding: {}", e);
                self.inner.media.remember_input(device);
                self.rebuild_media().await.map(|_| ())
            }
        }
    }

    pub async fn select_output_device(&self, device: DeviceTemplate) -> Result<()> {
        self.inner.media.try_replace_output(device).await
    }

    pub fn set_input_muted(&self, muted: bool) {
        self.inner.media.set_input_muted(muted);
    }

    pub fn set_output_muted(&self, muted: bool) {
        self.inner.media.set_output_muted(muted);
    }

    /// Terminate locally because recovery could not carry the call over.
    pub(crate) async fn abandon(&self) {
        self.inner
            .on_terminated(TerminatedInfo {
                cause: TerminateCause::RecoveryAbandoned,
                by_remote: false,
                hangup_cause_code: None,
            })
            .await;
    }

    async fn build_answer(&self) -> Result<Vec<u8>> {
        let media = self.inner.media.current();
        match &self.inner.remote_offer {
            Some(offer) => media.answer(offer, MediaDirection::SendRecv).await,
            None => media.description(MediaDirection::SendRecv).await,
        }
    }

    fn transition(&self, state: SessionState) {
        self.inner.transition(state);
    }
}

impl SessionInner {
    fn spawn_pump(
        inner: Arc<SessionInner>,
        mut events: CallEventReceiver,
        reaper: UnboundedSender<String>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let terminal = matches!(event, CallEvent::Terminated(_));
                inner.apply(event).await;
                if terminal {
                    break;
                }
            }
            // A closed stream without a terminal event still terminates
            // the session, with media cleanup on this path too.
            if *inner.state.lock().unwrap() != SessionState::Terminated {
                inner
                    .on_terminated(TerminatedInfo {
                        cause: TerminateCause::Failure,
                        by_remote: false,
                        hangup_cause_code: None,
                    })
                    .await;
            }
            reaper.send(inner.id.clone()).ok();
        });
    }

    async fn apply(&self, event: CallEvent) {
        match event {
            CallEvent::Trying => {}
            CallEvent::Ringing => {
                let mut state = self.state.lock().unwrap();
                if *state == SessionState::Initial {
                    *state = SessionState::Ringing;
                }
            }
            CallEvent::Accepted(answer) => self.on_accepted(answer).await,
            CallEvent::Rejected(e) => self.on_rejected(&e),
            CallEvent::Failed(e) => self.on_failed(&e),
            CallEvent::Bye => {
                self.said_bye.store(true, Ordering::Relaxed);
            }
            CallEvent::Terminated(info) => self.on_terminated(info).await,
            CallEvent::ReinviteAccepted => self.on_reinvite_result(Ok(())),
            CallEvent::ReinviteFailed(e) => self.on_reinvite_result(Err(e)),
            CallEvent::ReferAccepted => self.on_refer_result(Ok(())),
            CallEvent::ReferFailed(e) => self.on_refer_result(Err(e)),
            CallEvent::MediaCreated => self.stats.arm(self.media.current()),
        }
    }

    async fn on_accepted(&self, answer: Option<Vec<u8>>) {
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, SessionState::Initial | SessionState::Ringing) {
                return;
            }
            debug!(id = %self.id, "session active");
            *state = SessionState::Active;
        }
        if self.accepted_tx.borrow().is_none() {
            self.accepted_tx.send_replace(Some(true));
        }
        {
            let mut slot = self.accept.lock().unwrap();
            if let AcceptSlot::Accepting(flight) = &*slot {
                flight.settle(Ok(true));
                *slot = AcceptSlot::Idle;
            }
        }
        if let Some(answer) = answer {
            if let Err(e) = self.media.current().set_remote_description(&answer).await {
                warn!(id = %self.id, "error applying remote description: {}", e);
            }
        }
    }

    fn on_rejected(&self, e: &StackError) {
        if self.accepted_tx.borrow().is_none() {
            self.accepted_tx.send_replace(Some(false));
        }
        let mut slot = self.accept.lock().unwrap();
        match std::mem::replace(&mut *slot, AcceptSlot::Idle) {
            AcceptSlot::Rejecting(flight) => flight.settle(Ok(true)),
            AcceptSlot::Accepting(flight) => {
                flight.settle(Err(SessionOpError::from_stack(OpKind::Invite, e)))
            }
            AcceptSlot::Idle => {}
        }
    }

    fn on_failed(&self, e: &StackError) {
        let mut slot = self.accept.lock().unwrap();
        if let AcceptSlot::Accepting(flight) =
            std::mem::replace(&mut *slot, AcceptSlot::Idle)
        {
            flight.settle(Err(SessionOpError::from_stack(OpKind::Invite, e)));
        }
    }

    fn on_reinvite_result(&self, result: std::result::Result<(), StackError>) {
        let mut hold = self.hold.lock().unwrap();
        let Some(pending) = hold.pending.take() else {
            return;
        };
        match result {
            Ok(()) => {
                hold.current = pending.target;
                let next = if hold.current {
                    SessionState::OnHold
                } else {
                    SessionState::Active
                };
                drop(hold);
                {
                    let mut state = self.state.lock().unwrap();
                    if matches!(*state, SessionState::Active | SessionState::OnHold) {
                        *state = next;
                    }
                }
                pending.flight.settle(Ok(true));
            }
            Err(e) => {
                drop(hold);
                pending
                    .flight
                    .settle(Err(SessionOpError::from_stack(OpKind::Reinvite, &e)));
            }
        }
    }

    fn on_refer_result(&self, result: std::result::Result<(), StackError>) {
        let Some(flight) = self.transfer.lock().unwrap().take() else {
            return;
        };
        match result {
            Ok(()) => flight.settle(Ok(true)),
            Err(e) => flight.settle(Err(SessionOpError::from_stack(OpKind::Refer, &e))),
        }
    }

    /// The single terminal sink: resolves everything still pending,
    /// cancels the stats timer and closes media on every exit path.
    async fn on_terminated(&self, info: TerminatedInfo) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Terminated {
                return;
            }
            info!(id = %self.id, cause = ?info.cause, "session terminated");
            *state = SessionState::Terminated;
        }

        if self.accepted_tx.borrow().is_none() {
            self.accepted_tx.send_replace(Some(false));
        }
        {
            let mut slot = self.accept.lock().unwrap();
            if let AcceptSlot::Accepting(flight) | AcceptSlot::Rejecting(flight) =
                std::mem::replace(&mut *slot, AcceptSlot::Idle)
            {
                flight.settle(Err(SessionOpError::Aborted));
            }
        }
        if let Some(pending) = self.hold.lock().unwrap().pending.take() {
            pending.flight.settle(Err(SessionOpError::Aborted));
        }
        if let Some(flight) = self.transfer.lock().unwrap().take() {
            flight.settle(Err(SessionOpError::Aborted));
        }

        let outcome = if info.cause == TerminateCause::Bye && info.hangup_cause_code == Some(58) {
            TerminalOutcome::Misconfigured
        } else {
            TerminalOutcome::Normal(info)
        };
        self.terminated_tx.send_replace(Some(outcome));

        self.stats.cancel();
        self.media.close().await;
    }

    fn transition(&self, state: SessionState) {
        let mut current = self.state.lock().unwrap();
        if *current == SessionState::Terminated {
            return;
        }
        *current = state;
    }
}

async fn await_op(mut rx: OpSignal) -> Result<bool> {
    loop {
        let settled = rx.borrow().clone();
        if let Some(outcome) = settled {
            return outcome.map_err(SessionOpError::into_error);
        }
        if rx.changed().await.is_err() {
            return Err(Error::SessionAborted);
        }
    }
}

pub(crate) fn parse_target_uri(target: &str) -> Result<rsip::Uri> {
    if target.starts_with("sip:") || target.starts_with("sips:") {
        Ok(rsip::Uri::try_from(target)?)
    } else {
        Ok(rsip::Uri::try_from(format!("sip:{}", target))?)
    }
}
