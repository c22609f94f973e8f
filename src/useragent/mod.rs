use crate::{config::ClientOptions, Result};
use async_trait::async_trait;
use rsip::StatusCode;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub mod identity;

pub use identity::RemoteIdentity;

pub type UaEventSender = UnboundedSender<UserAgentEvent>;
pub type UaEventReceiver = UnboundedReceiver<UserAgentEvent>;
pub type CallEventSender = UnboundedSender<CallEvent>;
pub type CallEventReceiver = UnboundedReceiver<CallEvent>;

/// Error record surfaced from the underlying SIP stack.
///
/// The adapter never interprets these; classifying them (recoverable
/// transport loss vs. terminal auth rejection) is the lifecycle engine's
/// job.
#[derive(Debug, Clone)]
pub struct StackError {
    pub kind: StackErrorKind,
    pub cause: String,
    pub sip_code: Option<StatusCode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackErrorKind {
    Transport,
    Registration,
    Invite,
    Reinvite,
    Refer,
    Other,
}

impl StackError {
    pub fn new(kind: StackErrorKind, cause: impl Into<String>) -> Self {
        StackError {
            kind,
            cause: cause.into(),
            sip_code: None,
        }
    }

    pub fn with_code(kind: StackErrorKind, cause: impl Into<String>, code: StatusCode) -> Self {
        StackError {
            kind,
            cause: cause.into(),
            sip_code: Some(code),
        }
    }

    /// Authentication rejections are terminal for recovery purposes.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self.sip_code,
            Some(StatusCode::Unauthorized)
                | Some(StatusCode::Forbidden)
                | Some(StatusCode::ProxyAuthenticationRequired)
        )
    }
}

impl std::fmt::Display for StackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sip_code {
            Some(code) => write!(f, "{:?}: {} ({})", self.kind, self.cause, code),
            None => write!(f, "{:?}: {}", self.kind, self.cause),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Outbound,
    Inbound,
}

/// Why a call reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateCause {
    Bye,
    Cancel,
    Rejected,
    Failure,
    RecoveryAbandoned,
}

#[derive(Debug, Clone)]
pub struct TerminatedInfo {
    pub cause: TerminateCause,
    pub by_remote: bool,
    /// Value of the `X-Asterisk-Hangupcausecode` header when the peer
    /// attached one to its BYE.
    pub hangup_cause_code: Option<u16>,
}

/// Events for one UA instance. The sender is injected at construction,
/// so the consumer observes every instance from its very first event.
#[derive(Debug)]
pub enum UserAgentEvent {
    /// The signaling transport is up.
    TransportCreated,
    Registered,
    RegistrationFailed(StackError),
    Unregistered,
    /// An inbound INVITE arrived; the handle is ringing.
    Invite(CallHandle),
    /// The signaling transport dropped.
    Disconnected(StackError),
}

/// Per-call event sub-stream.
#[derive(Debug)]
pub enum CallEvent {
    Trying,
    Ringing,
    /// Final 2xx seen (outbound) or our 2xx sent (inbound). Carries the
    /// remote answer SDP for outbound calls.
    Accepted(Option<Vec<u8>>),
    Rejected(StackError),
    Failed(StackError),
    /// A BYE was exchanged; a `Terminated` event follows.
    Bye,
    Terminated(TerminatedInfo),
    ReinviteAccepted,
    ReinviteFailed(StackError),
    ReferAccepted,
    ReferFailed(StackError),
    /// The media description handler was (re)created.
    MediaCreated,
}

/// Dialog coordinates needed to point a REFER-with-Replaces at a call.
#[derive(Debug, Clone)]
pub struct DialogRef {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
    pub remote_uri: rsip::Uri,
}

#[derive(Debug, Clone)]
pub enum ReferTarget {
    Blind(rsip::Uri),
    Attended(DialogRef),
}

/// Control half of one call, implemented by the stack binding.
///
/// All results that depend on the remote side arrive on the call's event
/// stream; these methods only fail on local/transport errors.
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Answer a ringing inbound call with the given SDP answer.
    async fn accept(&self, answer: Vec<u8>) -> Result<()>;
    /// Decline a ringing inbound call. `busy` selects 486 over 603.
    async fn reject(&self, busy: bool) -> Result<()>;
    /// Abort an unanswered outbound call.
    async fn cancel(&self) -> Result<()>;
    async fn bye(&self) -> Result<()>;
    /// Renegotiate the session with a fresh offer; the outcome arrives as
    /// `ReinviteAccepted` / `ReinviteFailed`.
    async fn reinvite(&self, offer: Vec<u8>) -> Result<()>;
    async fn refer(&self, target: &ReferTarget) -> Result<()>;
    /// Send one DTMF tone. Tone validation happens above this seam.
    async fn dtmf(&self, tone: char) -> Result<()>;
    fn dialog_ref(&self) -> DialogRef;
}

/// One call as handed across the adapter boundary: identifiers, the
/// control half and the event sub-stream.
pub struct CallHandle {
    pub call_id: String,
    pub direction: CallDirection,
    pub remote_identity: RemoteIdentity,
    /// Remote offer SDP for inbound calls.
    pub remote_offer: Option<Vec<u8>>,
    pub control: Arc<dyn CallControl>,
    pub events: CallEventReceiver,
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("call_id", &self.call_id)
            .field("direction", &self.direction)
            .field("remote_identity", &self.remote_identity)
            .finish()
    }
}

/// Thin capability facade over a SIP stack.
///
/// One instance maps to one websocket + registration; the lifecycle
/// engine discards the whole instance and builds a fresh one for every
/// recovery attempt.
#[async_trait]
pub trait UserAgent: Send + Sync {
    /// Bring up the signaling transport.
    async fn start(&self) -> Result<()>;
    /// Force the transport down. Safe to call at any point.
    async fn stop(&self);
    async fn register(&self) -> Result<()>;
    async fn unregister(&self) -> Result<()>;
    /// Issue an outbound INVITE carrying `offer`.
    async fn invite(&self, target: rsip::Uri, offer: Vec<u8>) -> Result<CallHandle>;
}

pub trait UserAgentFactory: Send + Sync {
    fn create(
        &self,
        options: Arc<ClientOptions>,
        events: UaEventSender,
    ) -> Result<Arc<dyn UserAgent>>;
}
