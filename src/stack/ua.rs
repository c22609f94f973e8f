use super::authenticate::{answer_challenge, Credential};
use super::dialog::DialogCore;
use super::registration::Registration;
use super::ws::{WireEvent, WsConnection};
use super::{make_call_id, make_via, random_text, TAG_LEN};
use crate::config::ClientOptions;
use crate::useragent::{
    identity, CallControl, CallDirection, CallEvent, CallEventSender, CallHandle, DialogRef,
    ReferTarget, RemoteIdentity, StackError, StackErrorKind, TerminateCause, TerminatedInfo,
    UaEventSender, UserAgent, UserAgentEvent, UserAgentFactory,
};
use crate::{Error, Result};
use async_trait::async_trait;
use rsip::prelude::{HasHeaders, HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::{Header, Method, Param, Request, Response, StatusCode, StatusCodeKind};
use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Factory for the real stack-backed user agent.
pub struct SipUserAgentFactory;

impl UserAgentFactory for SipUserAgentFactory {
    fn create(
        &self,
        options: Arc<ClientOptions>,
        events: UaEventSender,
    ) -> Result<Arc<dyn UserAgent>> {
        Ok(Arc::new(SipUserAgent::new(options, events)?))
    }
}

/// Responses are matched to requests on Call-ID + CSeq over the reliable
/// websocket; there are no retransmission timers to run.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TxKey {
    call_id: String,
    seq: u32,
    method: Method,
}

impl std::hash::Hash for TxKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.call_id.hash(state);
        self.seq.hash(state);
        self.method.to_string().hash(state);
    }
}

impl TxKey {
    fn for_request(request: &Request) -> Result<TxKey> {
        Ok(TxKey {
            call_id: request.call_id_header()?.value().to_string(),
            seq: request.cseq_header()?.seq()?,
            method: request.method.clone(),
        })
    }

    fn for_response(resp: &Response) -> Result<TxKey> {
        let cseq = resp.cseq_header()?;
        Ok(TxKey {
            call_id: resp.call_id_header()?.value().to_string(),
            seq: cseq.seq()?,
            method: cseq.method()?,
        })
    }
}

struct PendingGuard {
    inner: Arc<UaInner>,
    key: TxKey,
    rx: UnboundedReceiver<Response>,
}

impl PendingGuard {
    async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.lock().unwrap().remove(&self.key);
    }
}

struct ActiveCall {
    dialog: DialogCore,
    events: CallEventSender,
    /// Latest INVITE of the call: replied to on the callee side, aborted
    /// by CANCEL on the caller side.
    invite_request: Mutex<Request>,
}

struct UaInner {
    options: Arc<ClientOptions>,
    events: UaEventSender,
    credential: Credential,
    account_uri: rsip::Uri,
    contact: rsip::Uri,
    connection: Mutex<Option<WsConnection>>,
    registration: Registration,
    calls: Mutex<HashMap<String, Arc<ActiveCall>>>,
    pending: Mutex<HashMap<TxKey, UnboundedSender<Response>>>,
    token: CancellationToken,
}

/// Stack-backed [`UserAgent`]: one websocket, one registration binding,
/// any number of call dialogs.
pub struct SipUserAgent {
    inner: Arc<UaInner>,
}

impl SipUserAgent {
    pub fn new(options: Arc<ClientOptions>, events: UaEventSender) -> Result<SipUserAgent> {
        let account_uri = parse_account_uri(&options.account.uri)?;
        let registrar = rsip::Uri::try_from(format!("sip:{}", account_uri.host_with_port))?;
        let contact = rsip::Uri::try_from(format!(
            "sip:{}@{}.invalid;transport=ws",
            options.account.user,
            random_text(12).to_lowercase()
        ))?;
        let credential = Credential {
            username: options.account.user.clone(),
            password: options.account.password.clone(),
        };
        let registration = Registration::new(
            account_uri.clone(),
            registrar.clone(),
            contact.clone(),
            options.user_agent.clone(),
        );
        Ok(SipUserAgent {
            inner: Arc::new(UaInner {
                options,
                events,
                credential,
                account_uri,
                contact,
                connection: Mutex::new(None),
                registration,
                calls: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                token: CancellationToken::new(),
            }),
        })
    }
}

fn parse_account_uri(uri: &str) -> Result<rsip::Uri> {
    if uri.starts_with("sip:") || uri.starts_with("sips:") {
        Ok(rsip::Uri::try_from(uri)?)
    } else {
        Ok(rsip::Uri::try_from(format!("sip:{}", uri))?)
    }
}

#[async_trait]
impl UserAgent for SipUserAgent {
    async fn start(&self) -> Result<()> {
        let (wire_tx, wire_rx) = unbounded_channel();
        let conn = WsConnection::open(
            &self.inner.options.transport.ws_servers,
            wire_tx,
            self.inner.token.child_token(),
        )
        .await?;
        *self.inner.connection.lock().unwrap() = Some(conn);
        self.inner.events.send(UserAgentEvent::TransportCreated).ok();

        let inner = self.inner.clone();
        tokio::spawn(async move { UaInner::pump(inner, wire_rx).await });
        Ok(())
    }

    async fn stop(&self) {
        self.inner.token.cancel();
        if let Some(conn) = self.inner.connection.lock().unwrap().take() {
            conn.close();
        }
        self.inner.calls.lock().unwrap().clear();
        self.inner.pending.lock().unwrap().clear();
    }

    async fn register(&self) -> Result<()> {
        let expires = self.inner.options.transport.registration_expires;
        let request = self.inner.registration.make_request(expires)?;
        let seq = self.inner.registration.seq();
        match self.inner.request_with_auth(request, seq).await {
            Ok(resp) if resp.status_code == StatusCode::OK => {
                self.inner.registration.absorb(&resp);
                info!(
                    expires = self.inner.registration.granted_expires(expires),
                    "registration accepted"
                );
                self.inner.events.send(UserAgentEvent::Registered).ok();
                Ok(())
            }
            Ok(resp) => {
                info!("registration refused: {}", resp.status_code);
                self.inner
                    .events
                    .send(UserAgentEvent::RegistrationFailed(StackError::with_code(
                        StackErrorKind::Registration,
                        "registrar refused registration",
                        resp.status_code,
                    )))
                    .ok();
                Ok(())
            }
            Err(e) => {
                self.inner
                    .events
                    .send(UserAgentEvent::RegistrationFailed(StackError::new(
                        StackErrorKind::Registration,
                        e.to_string(),
                    )))
                    .ok();
                Err(e)
            }
        }
    }

    async fn unregister(&self) -> Result<()> {
        let request = self.inner.registration.make_request(0)?;
        let seq = self.inner.registration.seq();
        let resp = self.inner.request_with_auth(request, seq).await?;
        if resp.status_code == StatusCode::OK {
            self.inner.events.send(UserAgentEvent::Unregistered).ok();
        } else {
            info!("unregister refused: {}", resp.status_code);
        }
        Ok(())
    }

    async fn invite(&self, target: rsip::Uri, offer: Vec<u8>) -> Result<CallHandle> {
        let inner = &self.inner;
        let call_id = make_call_id(&inner.account_uri.host_with_port.to_string());
        let dialog = DialogCore::caller(
            call_id.clone(),
            inner.account_uri.clone(),
            target.clone(),
            inner.contact.clone(),
            inner.options.user_agent.clone(),
        );
        let request = dialog.make_invite(offer)?;

        let (call_tx, call_rx) = unbounded_channel();
        let call = Arc::new(ActiveCall {
            dialog,
            events: call_tx,
            invite_request: Mutex::new(request.clone()),
        });
        inner
            .calls
            .lock()
            .unwrap()
            .insert(call_id.clone(), call.clone());

        let remote_identity = RemoteIdentity {
            display_name: None,
            user: target.auth.as_ref().map(|a| a.user.clone()),
        };

        tokio::spawn(UaInner::drive_invite(inner.clone(), call.clone(), request));

        Ok(CallHandle {
            call_id,
            direction: CallDirection::Outbound,
            remote_identity,
            remote_offer: None,
            control: Arc::new(SipCallControl {
                inner: inner.clone(),
                call,
            }),
            events: call_rx,
        })
    }
}

impl UaInner {
    fn connection(&self) -> Result<WsConnection> {
        self.connection
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::TransportLost("websocket is not open".to_string()))
    }

    fn arm(self: &Arc<Self>, request: &Request) -> Result<PendingGuard> {
        let key = TxKey::for_request(request)?;
        let (tx, rx) = unbounded_channel();
        self.pending.lock().unwrap().insert(key.clone(), tx);
        Ok(PendingGuard {
            inner: self.clone(),
            key,
            rx,
        })
    }

    fn remove_call(&self, call_id: &str) {
        self.calls.lock().unwrap().remove(call_id);
    }

    async fn pump(inner: Arc<UaInner>, mut wire_rx: UnboundedReceiver<WireEvent>) {
        loop {
            let event = tokio::select! {
                _ = inner.token.cancelled() => return,
                event = wire_rx.recv() => event,
            };
            match event {
                Some(WireEvent::Incoming(rsip::SipMessage::Response(resp))) => {
                    inner.route_response(resp);
                }
                Some(WireEvent::Incoming(rsip::SipMessage::Request(req))) => {
                    if let Err(e) = inner.handle_request(req).await {
                        info!("error handling incoming request: {}", e);
                    }
                }
                Some(WireEvent::Closed(reason)) => {
                    inner
                        .events
                        .send(UserAgentEvent::Disconnected(StackError::new(
                            StackErrorKind::Transport,
                            reason,
                        )))
                        .ok();
                    return;
                }
                None => return,
            }
        }
    }

    fn route_response(&self, resp: Response) {
        match TxKey::for_response(&resp) {
            Ok(key) => {
                let sender = self.pending.lock().unwrap().get(&key).cloned();
                match sender {
                    Some(tx) => {
                        tx.send(resp).ok();
                    }
                    None => debug!(
                        call_id = key.call_id,
                        "dropping response without a waiting transaction"
                    ),
                }
            }
            Err(e) => info!("dropping response without a transaction key: {}", e),
        }
    }

    /// Drive one non-INVITE transaction to its final response, answering
    /// a single authentication challenge along the way.
    async fn request_with_auth(
        self: &Arc<Self>,
        mut request: Request,
        seq: Arc<AtomicU32>,
    ) -> Result<Response> {
        let conn = self.connection()?;
        let mut guard = self.arm(&request)?;
        conn.send(request.clone().into()).await?;
        let mut auth_sent = false;
        loop {
            let resp = tokio::select! {
                _ = self.token.cancelled() => {
                    return Err(Error::TransportLost("user agent stopped".to_string()))
                }
                resp = guard.recv() => resp,
            };
            let resp = match resp {
                Some(resp) => resp,
                None => {
                    return Err(Error::TransportLost(
                        "transaction channel closed".to_string(),
                    ))
                }
            };
            match resp.status_code {
                StatusCode::Trying => continue,
                StatusCode::Unauthorized | StatusCode::ProxyAuthenticationRequired => {
                    if auth_sent {
                        info!(
                            "received {} response after credentials were sent",
                            resp.status_code
                        );
                        return Ok(resp);
                    }
                    auth_sent = true;
                    let new_seq = seq.fetch_add(1, Ordering::Relaxed) + 1;
                    request = answer_challenge(
                        &request,
                        &resp,
                        &self.credential,
                        new_seq,
                        make_via(&self.contact),
                    )?;
                    drop(guard);
                    guard = self.arm(&request)?;
                    conn.send(request.clone().into()).await?;
                }
                _ if resp.status_code.kind() == StatusCodeKind::Provisional => continue,
                _ => return Ok(resp),
            }
        }
    }

    /// Drive an outbound INVITE, mapping responses onto the call's event
    /// stream.
    async fn drive_invite(inner: Arc<UaInner>, call: Arc<ActiveCall>, mut request: Request) {
        let events = call.events.clone();
        let call_id = call.dialog.call_id.clone();

        let fail = |events: &CallEventSender, error: StackError, cause: TerminateCause| {
            events.send(CallEvent::Failed(error)).ok();
            events
                .send(CallEvent::Terminated(TerminatedInfo {
                    cause,
                    by_remote: false,
                    hangup_cause_code: None,
                }))
                .ok();
        };

        let conn = match inner.connection() {
            Ok(conn) => conn,
            Err(e) => {
                fail(
                    &events,
                    StackError::new(StackErrorKind::Invite, e.to_string()),
                    TerminateCause::Failure,
                );
                inner.remove_call(&call_id);
                return;
            }
        };

        let mut guard = match inner.arm(&request) {
            Ok(guard) => guard,
            Err(e) => {
                fail(
                    &events,
                    StackError::new(StackErrorKind::Invite, e.to_string()),
                    TerminateCause::Failure,
                );
                inner.remove_call(&call_id);
                return;
            }
        };
        if let Err(e) = conn.send(request.clone().into()).await {
            fail(
                &events,
                StackError::new(StackErrorKind::Invite, e.to_string()),
                TerminateCause::Failure,
            );
            inner.remove_call(&call_id);
            return;
        }

        let mut auth_sent = false;
        loop {
            let resp = tokio::select! {
                _ = inner.token.cancelled() => return,
                resp = guard.recv() => resp,
            };
            let resp = match resp {
                Some(resp) => resp,
                None => {
                    fail(
                        &events,
                        StackError::new(StackErrorKind::Invite, "transaction channel closed"),
                        TerminateCause::Failure,
                    );
                    inner.remove_call(&call_id);
                    return;
                }
            };
            match resp.status_code {
                StatusCode::Trying => {
                    events.send(CallEvent::Trying).ok();
                }
                StatusCode::Ringing | StatusCode::SessionProgress => {
                    if let Ok(header) = resp.to_header() {
                        if let Ok(Some(tag)) = header.tag() {
                            call.dialog.update_remote_tag(tag.value());
                        }
                    }
                    events.send(CallEvent::Ringing).ok();
                }
                StatusCode::Unauthorized | StatusCode::ProxyAuthenticationRequired => {
                    if auth_sent {
                        fail(
                            &events,
                            StackError::with_code(
                                StackErrorKind::Invite,
                                "authentication loop on invite",
                                resp.status_code,
                            ),
                            TerminateCause::Failure,
                        );
                        inner.remove_call(&call_id);
                        return;
                    }
                    auth_sent = true;
                    // The challenged INVITE is ACKed implicitly by the
                    // transport; retry with credentials and a fresh branch.
                    let new_seq = call.dialog.next_seq();
                    request = match answer_challenge(
                        &request,
                        &resp,
                        &inner.credential,
                        new_seq,
                        make_via(&inner.contact),
                    ) {
                        Ok(request) => request,
                        Err(e) => {
                            fail(
                                &events,
                                StackError::new(StackErrorKind::Invite, e.to_string()),
                                TerminateCause::Failure,
                            );
                            inner.remove_call(&call_id);
                            return;
                        }
                    };
                    call.dialog.reset_remote_tag();
                    *call.invite_request.lock().unwrap() = request.clone();
                    drop(guard);
                    guard = match inner.arm(&request) {
                        Ok(guard) => guard,
                        Err(e) => {
                            fail(
                                &events,
                                StackError::new(StackErrorKind::Invite, e.to_string()),
                                TerminateCause::Failure,
                            );
                            inner.remove_call(&call_id);
                            return;
                        }
                    };
                    if let Err(e) = conn.send(request.clone().into()).await {
                        fail(
                            &events,
                            StackError::new(StackErrorKind::Invite, e.to_string()),
                            TerminateCause::Failure,
                        );
                        inner.remove_call(&call_id);
                        return;
                    }
                }
                StatusCode::OK => {
                    if let Err(e) = call.dialog.absorb_success(&resp) {
                        warn!(call_id = %call_id, "error absorbing 200 response: {}", e);
                    }
                    let invite_seq = request
                        .cseq_header()
                        .and_then(|c| c.seq())
                        .unwrap_or_else(|_| call.dialog.next_seq());
                    match call.dialog.make_ack(invite_seq) {
                        Ok(ack) => {
                            conn.send(ack.into()).await.ok();
                        }
                        Err(e) => warn!(call_id = %call_id, "error building ACK: {}", e),
                    }
                    let answer = if resp.body.is_empty() {
                        None
                    } else {
                        Some(resp.body.clone())
                    };
                    events.send(CallEvent::Accepted(answer)).ok();
                    return;
                }
                StatusCode::BusyHere | StatusCode::Decline => {
                    events
                        .send(CallEvent::Rejected(StackError::with_code(
                            StackErrorKind::Invite,
                            "call rejected",
                            resp.status_code.clone(),
                        )))
                        .ok();
                    events
                        .send(CallEvent::Terminated(TerminatedInfo {
                            cause: TerminateCause::Rejected,
                            by_remote: true,
                            hangup_cause_code: None,
                        }))
                        .ok();
                    inner.remove_call(&call_id);
                    return;
                }
                StatusCode::RequestTerminated => {
                    // Our CANCEL landed.
                    events
                        .send(CallEvent::Terminated(TerminatedInfo {
                            cause: TerminateCause::Cancel,
                            by_remote: false,
                            hangup_cause_code: None,
                        }))
                        .ok();
                    inner.remove_call(&call_id);
                    return;
                }
                _ if resp.status_code.kind() == StatusCodeKind::Provisional => {}
                _ => {
                    fail(
                        &events,
                        StackError::with_code(
                            StackErrorKind::Invite,
                            "invite rejected",
                            resp.status_code.clone(),
                        ),
                        TerminateCause::Failure,
                    );
                    inner.remove_call(&call_id);
                    return;
                }
            }
        }
    }

    async fn handle_request(self: &Arc<Self>, req: Request) -> Result<()> {
        match req.method {
            Method::Invite => self.handle_invite(req).await,
            Method::Ack => Ok(()),
            Method::Bye => self.handle_bye(req).await,
            Method::Cancel => self.handle_cancel(req).await,
            Method::Notify => self.handle_notify(req).await,
            Method::Info | Method::Options => {
                self.send_response(self.make_response(&req, StatusCode::OK, None, vec![], None))
                    .await
            }
            _ => {
                info!("refusing {} request", req.method);
                self.send_response(self.make_response(
                    &req,
                    StatusCode::MethodNotAllowed,
                    None,
                    vec![],
                    None,
                ))
                .await
            }
        }
    }

    async fn handle_invite(self: &Arc<Self>, req: Request) -> Result<()> {
        if let Ok(Some(_)) = req.to_header()?.tag() {
            // Re-INVITEs from the peer are not renegotiated here.
            info!("refusing in-dialog invite");
            return self
                .send_response(self.make_response(
                    &req,
                    StatusCode::NotAcceptableHere,
                    None,
                    vec![],
                    None,
                ))
                .await;
        }

        let call_id = req.call_id_header()?.value().to_string();
        if self.calls.lock().unwrap().contains_key(&call_id) {
            return Ok(());
        }

        let to_tag = random_text(TAG_LEN);
        let dialog = DialogCore::callee(
            &req,
            to_tag.clone(),
            self.contact.clone(),
            self.options.user_agent.clone(),
        )?;

        self.send_response(self.make_response(
            &req,
            StatusCode::Ringing,
            Some(&to_tag),
            vec![],
            None,
        ))
        .await?;

        let remote_identity = identity::from_request_headers(req.headers());
        let remote_offer = if req.body.is_empty() {
            None
        } else {
            Some(req.body.clone())
        };

        let (call_tx, call_rx) = unbounded_channel();
        let call = Arc::new(ActiveCall {
            dialog,
            events: call_tx,
            invite_request: Mutex::new(req),
        });
        self.calls.lock().unwrap().insert(call_id.clone(), call.clone());

        info!(call_id = %call_id, caller = %remote_identity, "incoming invite");
        self.events
            .send(UserAgentEvent::Invite(CallHandle {
                call_id,
                direction: CallDirection::Inbound,
                remote_identity,
                remote_offer,
                control: Arc::new(SipCallControl {
                    inner: self.clone(),
                    call,
                }),
                events: call_rx,
            }))
            .ok();
        Ok(())
    }

    async fn handle_bye(self: &Arc<Self>, req: Request) -> Result<()> {
        let call_id = req.call_id_header()?.value().to_string();
        let call = self.calls.lock().unwrap().get(&call_id).cloned();
        let Some(call) = call else {
            return self
                .send_response(self.make_response(
                    &req,
                    StatusCode::CallTransactionDoesNotExist,
                    None,
                    vec![],
                    None,
                ))
                .await;
        };

        if let Ok(seq) = req.cseq_header().and_then(|c| c.seq()) {
            call.dialog.record_remote_seq(seq);
        }
        self.send_response(self.make_response(&req, StatusCode::OK, None, vec![], None))
            .await?;

        info!(call_id = %call_id, "received bye");
        call.events.send(CallEvent::Bye).ok();
        call.events
            .send(CallEvent::Terminated(TerminatedInfo {
                cause: TerminateCause::Bye,
                by_remote: true,
                hangup_cause_code: hangup_cause_code(&req),
            }))
            .ok();
        self.remove_call(&call_id);
        Ok(())
    }

    async fn handle_cancel(self: &Arc<Self>, req: Request) -> Result<()> {
        let call_id = req.call_id_header()?.value().to_string();
        let call = self.calls.lock().unwrap().get(&call_id).cloned();
        self.send_response(self.make_response(&req, StatusCode::OK, None, vec![], None))
            .await?;

        if let Some(call) = call {
            // Answer the aborted INVITE with 487 before reporting the
            // terminal event.
            let invite = call.invite_request.lock().unwrap().clone();
            let to_tag = call.dialog.local_tag();
            self.send_response(self.make_response(
                &invite,
                StatusCode::RequestTerminated,
                Some(&to_tag),
                vec![],
                None,
            ))
            .await
            .ok();
            info!(call_id = %call_id, "invite cancelled by peer");
            call.events
                .send(CallEvent::Terminated(TerminatedInfo {
                    cause: TerminateCause::Cancel,
                    by_remote: true,
                    hangup_cause_code: None,
                }))
                .ok();
            self.remove_call(&call_id);
        }
        Ok(())
    }

    async fn handle_notify(self: &Arc<Self>, req: Request) -> Result<()> {
        self.send_response(self.make_response(&req, StatusCode::OK, None, vec![], None))
            .await?;

        // A refer NOTIFY carries a sipfrag status line for the transfer.
        let body = String::from_utf8_lossy(&req.body);
        if let Some(status) = sipfrag_status(&body) {
            if status >= 300 {
                let call_id = req.call_id_header()?.value().to_string();
                if let Some(call) = self.calls.lock().unwrap().get(&call_id) {
                    call.events
                        .send(CallEvent::ReferFailed(StackError::new(
                            StackErrorKind::Refer,
                            format!("transfer target answered {}", status),
                        )))
                        .ok();
                }
            }
        }
        Ok(())
    }

    async fn send_response(&self, resp: Response) -> Result<()> {
        self.connection()?.send(resp.into()).await
    }

    fn make_response(
        &self,
        req: &Request,
        status: StatusCode,
        to_tag: Option<&str>,
        extra_headers: Vec<Header>,
        body: Option<Vec<u8>>,
    ) -> Response {
        let mut headers = rsip::Headers::default();
        for header in req.headers.iter() {
            match header {
                Header::Via(via) => headers.push(Header::Via(via.clone())),
                Header::From(from) => headers.push(Header::From(from.clone())),
                Header::To(to) => {
                    let tagged = match (to_tag, to.clone().typed()) {
                        (Some(tag), Ok(typed))
                            if status != StatusCode::Trying
                                && !typed.params.iter().any(|p| matches!(p, Param::Tag(_))) =>
                        {
                            Header::To(typed.with_tag(tag.into()).into())
                        }
                        _ => Header::To(to.clone()),
                    };
                    headers.push(tagged);
                }
                Header::CSeq(cseq) => headers.push(Header::CSeq(cseq.clone())),
                Header::CallId(call_id) => headers.push(Header::CallId(call_id.clone())),
                Header::RecordRoute(rr) => headers.push(Header::RecordRoute(rr.clone())),
                _ => {}
            }
        }
        headers.push(rsip::typed::Contact::from(self.contact.clone()).into());
        headers.push(Header::UserAgent(self.options.user_agent.clone().into()));
        for header in extra_headers {
            headers.unique_push(header);
        }
        headers.push(Header::ContentLength(
            body.as_ref().map_or(0u32, |b| b.len() as u32).into(),
        ));
        Response {
            status_code: status,
            headers,
            body: body.unwrap_or_default(),
            version: req.version().clone(),
        }
    }
}

pub(crate) fn hangup_cause_code(req: &Request) -> Option<u16> {
    for header in req.headers.iter() {
        if let Header::Other(name, value) = header {
            if name.eq_ignore_ascii_case("X-Asterisk-Hangupcausecode") {
                return value.trim().parse::<u16>().ok();
            }
        }
    }
    None
}

/// First status code of a `message/sipfrag` body, e.g. `SIP/2.0 200 OK`.
pub(crate) fn sipfrag_status(body: &str) -> Option<u16> {
    let line = body.lines().next()?.trim();
    let rest = line.strip_prefix("SIP/2.0")?.trim_start();
    rest.split_whitespace().next()?.parse::<u16>().ok()
}

struct SipCallControl {
    inner: Arc<UaInner>,
    call: Arc<ActiveCall>,
}

#[async_trait]
impl CallControl for SipCallControl {
    async fn accept(&self, answer: Vec<u8>) -> Result<()> {
        let invite = self.call.invite_request.lock().unwrap().clone();
        let to_tag = self.call.dialog.local_tag();
        self.inner
            .send_response(self.inner.make_response(
                &invite,
                StatusCode::OK,
                Some(&to_tag),
                vec![Header::ContentType("application/sdp".into())],
                Some(answer),
            ))
            .await?;
        self.call.events.send(CallEvent::Accepted(None)).ok();
        Ok(())
    }

    async fn reject(&self, busy: bool) -> Result<()> {
        let status = if busy {
            StatusCode::BusyHere
        } else {
            StatusCode::Decline
        };
        let invite = self.call.invite_request.lock().unwrap().clone();
        let to_tag = self.call.dialog.local_tag();
        self.inner
            .send_response(self.inner.make_response(
                &invite,
                status.clone(),
                Some(&to_tag),
                vec![],
                None,
            ))
            .await?;
        self.call
            .events
            .send(CallEvent::Rejected(StackError::with_code(
                StackErrorKind::Invite,
                "rejected locally",
                status,
            )))
            .ok();
        self.call
            .events
            .send(CallEvent::Terminated(TerminatedInfo {
                cause: TerminateCause::Rejected,
                by_remote: false,
                hangup_cause_code: None,
            }))
            .ok();
        self.inner.remove_call(&self.call.dialog.call_id);
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        let invite = self.call.invite_request.lock().unwrap().clone();
        let cancel = self.call.dialog.make_cancel(&invite)?;
        // The 487 answering the INVITE carries the terminal event; the
        // CANCEL's own 200 is uninteresting.
        self.inner.connection()?.send(cancel.into()).await
    }

    async fn bye(&self) -> Result<()> {
        let request = self.call.dialog.make_request(Method::Bye, vec![], None)?;
        self.call.events.send(CallEvent::Bye).ok();
        if let Err(e) = self
            .inner
            .request_with_auth(request, self.call.dialog.seq())
            .await
        {
            info!(call_id = %self.call.dialog.call_id, "bye error: {}", e);
        }
        self.call
            .events
            .send(CallEvent::Terminated(TerminatedInfo {
                cause: TerminateCause::Bye,
                by_remote: false,
                hangup_cause_code: None,
            }))
            .ok();
        self.inner.remove_call(&self.call.dialog.call_id);
        Ok(())
    }

    async fn reinvite(&self, offer: Vec<u8>) -> Result<()> {
        let request = self.call.dialog.make_request(
            Method::Invite,
            vec![Header::ContentType("application/sdp".into())],
            Some(offer),
        )?;
        let inner = self.inner.clone();
        let call = self.call.clone();
        tokio::spawn(async move {
            let seq = request
                .cseq_header()
                .and_then(|c| c.seq())
                .unwrap_or_default();
            match inner.request_with_auth(request, call.dialog.seq()).await {
                Ok(resp) if resp.status_code == StatusCode::OK => {
                    call.dialog.absorb_success(&resp).ok();
                    if let Ok(ack) = call.dialog.make_ack(seq) {
                        if let Ok(conn) = inner.connection() {
                            conn.send(ack.into()).await.ok();
                        }
                    }
                    call.events.send(CallEvent::ReinviteAccepted).ok();
                }
                Ok(resp) => {
                    call.events
                        .send(CallEvent::ReinviteFailed(StackError::with_code(
                            StackErrorKind::Reinvite,
                            "re-invite rejected",
                            resp.status_code,
                        )))
                        .ok();
                }
                Err(e) => {
                    call.events
                        .send(CallEvent::ReinviteFailed(StackError::new(
                            StackErrorKind::Reinvite,
                            e.to_string(),
                        )))
                        .ok();
                }
            }
        });
        Ok(())
    }

    async fn refer(&self, target: &ReferTarget) -> Result<()> {
        let refer_to = match target {
            ReferTarget::Blind(uri) => format!("<{}>", uri),
            ReferTarget::Attended(dialog) => format!(
                "<{}?Replaces={}>",
                dialog.remote_uri,
                escape_replaces(&format!(
                    "{};to-tag={};from-tag={}",
                    dialog.call_id, dialog.remote_tag, dialog.local_tag
                ))
            ),
        };
        let headers = vec![
            Header::Other("Refer-To".into(), refer_to),
            Header::Other(
                "Referred-By".into(),
                format!("<{}>", self.inner.account_uri),
            ),
        ];
        let request = self
            .call
            .dialog
            .make_request(Method::Refer, headers, None)?;
        let inner = self.inner.clone();
        let call = self.call.clone();
        tokio::spawn(async move {
            match inner.request_with_auth(request, call.dialog.seq()).await {
                Ok(resp)
                    if resp.status_code == StatusCode::Accepted
                        || resp.status_code == StatusCode::OK =>
                {
                    call.events.send(CallEvent::ReferAccepted).ok();
                }
                Ok(resp) => {
                    call.events
                        .send(CallEvent::ReferFailed(StackError::with_code(
                            StackErrorKind::Refer,
                            "refer refused",
                            resp.status_code,
                        )))
                        .ok();
                }
                Err(e) => {
                    call.events
                        .send(CallEvent::ReferFailed(StackError::new(
                            StackErrorKind::Refer,
                            e.to_string(),
                        )))
                        .ok();
                }
            }
        });
        Ok(())
    }

    async fn dtmf(&self, tone: char) -> Result<()> {
        let body = format!("Signal={}\r\nDuration=160\r\n", tone);
        let request = self.call.dialog.make_request(
            Method::Info,
            vec![Header::ContentType("application/dtmf-relay".into())],
            Some(body.into_bytes()),
        )?;
        let inner = self.inner.clone();
        let call = self.call.clone();
        tokio::spawn(async move {
            match inner.request_with_auth(request, call.dialog.seq()).await {
                Ok(resp) if resp.status_code == StatusCode::OK => {}
                Ok(resp) => {
                    info!(call_id = %call.dialog.call_id, "dtmf info answered {}", resp.status_code)
                }
                Err(e) => info!(call_id = %call.dialog.call_id, "dtmf info error: {}", e),
            }
        });
        Ok(())
    }

    fn dialog_ref(&self) -> DialogRef {
        self.call.dialog.dialog_ref()
    }
}

/// Escape the Replaces value for use inside a Refer-To URI header.
pub(crate) fn escape_replaces(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("%3B"),
            '=' => out.push_str("%3D"),
            '@' => out.push_str("%40"),
            '?' => out.push_str("%3F"),
            other => out.push(other),
        }
    }
    out
}
