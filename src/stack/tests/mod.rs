//! Message-level tests for the stack binding: request fabrication,
//! dialog state folding and challenge answering, all without a socket.

mod test_dialog;

use rsip::headers::*;
use rsip::prelude::{HeadersExt, UntypedHeader};
use rsip::{Header, Request, Response, StatusCode};

pub(super) fn contact_uri() -> rsip::Uri {
    rsip::Uri::try_from("sip:1000@abcdef.invalid;transport=ws").unwrap()
}

pub(super) fn ok_response(request: &Request, to_tag: &str, extra: Vec<Header>) -> Response {
    let mut headers: Vec<Header> = vec![
        request.via_header().unwrap().clone().into(),
        request.from_header().unwrap().clone().into(),
        To::new(format!(
            "{};tag={}",
            request.to_header().unwrap().value(),
            to_tag
        ))
        .into(),
        request.call_id_header().unwrap().clone().into(),
        request.cseq_header().unwrap().clone().into(),
    ];
    headers.extend(extra);
    Response {
        status_code: StatusCode::OK,
        version: rsip::Version::V2,
        headers: headers.into(),
        body: vec![],
    }
}

pub(super) fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    for header in request.headers.iter() {
        if let Header::Other(key, value) = header {
            if key.eq_ignore_ascii_case(name) {
                return Some(value.as_str());
            }
        }
    }
    None
}
