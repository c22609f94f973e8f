use super::{make_via, push_front_header};
use crate::useragent::DialogRef;
use crate::Result;
use rsip::headers::Route;
use rsip::prelude::{HasHeaders, HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::{Header, Method, Param, Request, Response};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// In-dialog request state for one call over a reliable transport: tags,
/// sequence numbers, the remote target and the route set. The transaction
/// machinery of RFC 3261 collapses to response correlation here, so this
/// is all the dialog the client needs.
pub struct DialogCore {
    pub role: Role,
    pub call_id: String,
    local_seq: Arc<AtomicU32>,
    remote_seq: AtomicU32,
    /// `From` as seen on the initial request (ours when calling, the
    /// peer's when called).
    from: rsip::typed::From,
    to: Mutex<rsip::typed::To>,
    remote_target: Mutex<rsip::Uri>,
    route_set: Mutex<Vec<Route>>,
    local_contact: rsip::Uri,
    user_agent: String,
}

impl DialogCore {
    pub fn caller(
        call_id: String,
        local_uri: rsip::Uri,
        target: rsip::Uri,
        local_contact: rsip::Uri,
        user_agent: String,
    ) -> DialogCore {
        let from = rsip::typed::From {
            display_name: None,
            uri: local_uri,
            params: vec![],
        }
        .with_tag(super::make_tag());
        let to = rsip::typed::To {
            display_name: None,
            uri: target.clone(),
            params: vec![],
        };
        DialogCore {
            role: Role::Caller,
            call_id,
            local_seq: Arc::new(AtomicU32::new(0)),
            remote_seq: AtomicU32::new(0),
            from,
            to: Mutex::new(to),
            remote_target: Mutex::new(target),
            route_set: Mutex::new(vec![]),
            local_contact,
            user_agent,
        }
    }

    /// Dialog state for an inbound INVITE. The route set keeps the
    /// Record-Route order as received; the remote target comes from the
    /// peer's Contact, falling back to the request URI.
    pub fn callee(
        request: &Request,
        to_tag: String,
        local_contact: rsip::Uri,
        user_agent: String,
    ) -> Result<DialogCore> {
        let call_id = request.call_id_header()?.value().to_string();
        let from = request.from_header()?.typed()?;
        let to = request.to_header()?.typed()?.with_tag(to_tag.into());

        let remote_target = match request.contact_header() {
            Ok(contact) => match contact.typed() {
                Ok(typed) => typed.uri,
                Err(_) => request.uri.clone(),
            },
            Err(_) => request.uri.clone(),
        };

        let mut route_set = vec![];
        for header in request.headers.iter() {
            if let Header::RecordRoute(rr) = header {
                route_set.push(Route::from(rr.value()));
            }
        }

        Ok(DialogCore {
            role: Role::Callee,
            call_id,
            local_seq: Arc::new(AtomicU32::new(0)),
            remote_seq: AtomicU32::new(request.cseq_header()?.seq()?),
            from,
            to: Mutex::new(to),
            remote_target: Mutex::new(remote_target),
            route_set: Mutex::new(route_set),
            local_contact,
            user_agent,
        })
    }

    pub fn seq(&self) -> Arc<AtomicU32> {
        self.local_seq.clone()
    }

    pub fn next_seq(&self) -> u32 {
        self.local_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn remote_seq(&self) -> u32 {
        self.remote_seq.load(Ordering::Relaxed)
    }

    pub fn record_remote_seq(&self, seq: u32) {
        self.remote_seq.store(seq, Ordering::Relaxed);
    }

    pub fn local_tag(&self) -> String {
        match self.role {
            Role::Caller => tag_of(&self.from.params),
            Role::Callee => tag_of(&self.to.lock().unwrap().params),
        }
    }

    pub fn remote_tag(&self) -> String {
        match self.role {
            Role::Caller => tag_of(&self.to.lock().unwrap().params),
            Role::Callee => tag_of(&self.from.params),
        }
    }

    pub fn update_remote_tag(&self, tag: &str) {
        if self.role == Role::Caller {
            let mut to = self.to.lock().unwrap();
            *to = to.clone().with_tag(tag.into());
        }
    }

    /// Drop the provisional remote tag before retrying with credentials.
    pub fn reset_remote_tag(&self) {
        if self.role == Role::Caller {
            let mut to = self.to.lock().unwrap();
            to.params.retain(|p| !matches!(p, Param::Tag(_)));
        }
    }

    pub fn remote_target(&self) -> rsip::Uri {
        self.remote_target.lock().unwrap().clone()
    }

    /// Fold a 2xx INVITE response into the dialog: remote tag, remote
    /// target from Contact, route set from Record-Route (reversed for the
    /// caller side).
    pub fn absorb_success(&self, resp: &Response) -> Result<()> {
        if let Ok(Some(tag)) = resp.to_header()?.tag() {
            self.update_remote_tag(tag.value());
        }

        if let Ok(contact) = resp.contact_header() {
            if let Ok(typed) = contact.typed() {
                let mut uri = typed.uri;
                uri.headers = Default::default();
                *self.remote_target.lock().unwrap() = uri;
            }
        }

        let mut route_set = vec![];
        for header in resp.headers.iter() {
            if let Header::RecordRoute(rr) = header {
                route_set.push(Route::from(rr.value()));
            }
        }
        route_set.reverse();
        *self.route_set.lock().unwrap() = route_set;
        Ok(())
    }

    pub fn dialog_ref(&self) -> DialogRef {
        DialogRef {
            call_id: self.call_id.clone(),
            local_tag: self.local_tag(),
            remote_tag: self.remote_tag(),
            remote_uri: self.remote_target(),
        }
    }

    /// Initial INVITE for the caller side.
    pub fn make_invite(&self, offer: Vec<u8>) -> Result<Request> {
        self.make_request(
            Method::Invite,
            vec![Header::ContentType("application/sdp".into())],
            Some(offer),
        )
    }

    /// ACK for a 2xx response; carries the CSeq of the INVITE it confirms.
    pub fn make_ack(&self, invite_seq: u32) -> Result<Request> {
        self.make_request_with_seq(Method::Ack, invite_seq, vec![], None)
    }

    pub fn make_request(
        &self,
        method: Method,
        extra_headers: Vec<Header>,
        body: Option<Vec<u8>>,
    ) -> Result<Request> {
        let seq = self.next_seq();
        self.make_request_with_seq(method, seq, extra_headers, body)
    }

    pub fn make_request_with_seq(
        &self,
        method: Method,
        seq: u32,
        extra_headers: Vec<Header>,
        body: Option<Vec<u8>>,
    ) -> Result<Request> {
        let mut headers = extra_headers;
        headers.push(Header::CallId(self.call_id.clone().into()));

        let from = self.from.clone().untyped().value().to_string();
        let to = self.to.lock().unwrap().clone().untyped().value().to_string();
        match self.role {
            Role::Caller => {
                headers.push(Header::From(from.into()));
                headers.push(Header::To(to.into()));
            }
            Role::Callee => {
                headers.push(Header::From(to.into()));
                headers.push(Header::To(from.into()));
            }
        }
        headers.push(Header::CSeq(
            rsip::typed::CSeq { seq, method }.into(),
        ));
        headers.push(Header::UserAgent(self.user_agent.clone().into()));
        headers.push(rsip::typed::Contact::from(self.local_contact.clone()).into());

        {
            let route_set = self.route_set.lock().unwrap();
            headers.extend(route_set.iter().cloned().map(Header::Route));
        }
        headers.push(Header::MaxForwards(70.into()));
        headers.push(Header::ContentLength(
            body.as_ref().map_or(0u32, |b| b.len() as u32).into(),
        ));

        let mut request = rsip::Request {
            method,
            uri: self.remote_target(),
            headers: headers.into(),
            body: body.unwrap_or_default(),
            version: rsip::Version::V2,
        };
        push_front_header(&mut request.headers, make_via(&self.local_contact).into());
        Ok(request)
    }

    /// CANCEL mirrors the INVITE it aborts: same CSeq number, same
    /// target, no body.
    pub fn make_cancel(&self, invite: &Request) -> Result<Request> {
        let mut cancel = invite.clone();
        cancel
            .headers_mut()
            .retain(|h| !matches!(h, Header::ContentLength(_) | Header::ContentType(_)));
        cancel.method = Method::Cancel;
        cancel.cseq_header_mut()?.mut_method(Method::Cancel)?;
        cancel.body = vec![];
        Ok(cancel)
    }
}

fn tag_of(params: &[Param]) -> String {
    for param in params {
        if let Param::Tag(tag) = param {
            return tag.value().to_string();
        }
    }
    String::new()
}
