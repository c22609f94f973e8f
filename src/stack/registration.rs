use super::{make_call_id, make_tag, make_via};
use crate::Result;
use rsip::prelude::{HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::{Header, Method, Request, Response};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// REGISTER state for one account binding: a stable Call-ID and from-tag
/// across refreshes, a climbing CSeq, and the expiry the registrar last
/// granted. Unregistering is a registration with expires 0.
pub struct Registration {
    seq: Arc<AtomicU32>,
    call_id: String,
    from_tag: rsip::param::Tag,
    account_uri: rsip::Uri,
    registrar: rsip::Uri,
    contact: rsip::Uri,
    user_agent: String,
    granted_expires: Mutex<Option<u32>>,
}

impl Registration {
    pub fn new(
        account_uri: rsip::Uri,
        registrar: rsip::Uri,
        contact: rsip::Uri,
        user_agent: String,
    ) -> Self {
        let domain = account_uri.host_with_port.to_string();
        Registration {
            seq: Arc::new(AtomicU32::new(0)),
            call_id: make_call_id(&domain),
            from_tag: make_tag(),
            account_uri,
            registrar,
            contact,
            user_agent,
            granted_expires: Mutex::new(None),
        }
    }

    pub fn seq(&self) -> Arc<AtomicU32> {
        self.seq.clone()
    }

    /// Expiry granted by the registrar, or `fallback` before the first
    /// 200 OK.
    pub fn granted_expires(&self, fallback: u32) -> u32 {
        self.granted_expires.lock().unwrap().unwrap_or(fallback)
    }

    pub fn make_request(&self, expires: u32) -> Result<Request> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;

        let to = rsip::typed::To {
            display_name: None,
            uri: self.account_uri.clone(),
            params: vec![],
        };
        let from = rsip::typed::From {
            display_name: None,
            uri: self.account_uri.clone(),
            params: vec![],
        }
        .with_tag(self.from_tag.clone());

        let headers: Vec<Header> = vec![
            make_via(&self.contact).into(),
            Header::CallId(self.call_id.clone().into()),
            Header::From(from.into()),
            Header::To(to.into()),
            Header::CSeq(
                rsip::typed::CSeq {
                    seq,
                    method: Method::Register,
                }
                .into(),
            ),
            Header::UserAgent(self.user_agent.clone().into()),
            rsip::typed::Contact::from(self.contact.clone()).into(),
            Header::Expires(expires.to_string().into()),
            Header::MaxForwards(70.into()),
            Header::ContentLength(0u32.into()),
        ];

        Ok(Request {
            method: Method::Register,
            uri: self.registrar.clone(),
            headers: headers.into(),
            body: vec![],
            version: rsip::Version::V2,
        })
    }

    /// Record the expiry the registrar granted on a 200 OK, preferring
    /// the Contact's expires parameter over the Expires header.
    pub fn absorb(&self, resp: &Response) {
        if let Ok(contact) = resp.contact_header() {
            if let Ok(typed) = contact.clone().into_typed() {
                if let Some(expires) = typed.expires() {
                    if let Ok(seconds) = expires.seconds() {
                        *self.granted_expires.lock().unwrap() = Some(seconds);
                        return;
                    }
                }
            }
        }
        for header in resp.headers.iter() {
            if let Header::Expires(expires) = header {
                if let Ok(seconds) = expires.value().parse::<u32>() {
                    *self.granted_expires.lock().unwrap() = Some(seconds);
                }
                return;
            }
        }
    }
}
