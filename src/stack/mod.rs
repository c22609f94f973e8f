//! Binding to the SIP stack: websocket signaling plus just enough of the
//! client side of RFC 3261 to register and run call dialogs over a
//! reliable transport. Wire parsing is `rsip`'s job; nothing here touches
//! raw SIP bytes.

use rsip::headers::UntypedHeader;

pub mod authenticate;
pub mod dialog;
pub mod registration;
pub mod ua;
pub mod ws;

pub use ua::{SipUserAgent, SipUserAgentFactory};

#[cfg(test)]
mod tests;

pub const TAG_LEN: usize = 8;
pub const BRANCH_LEN: usize = 12;
pub const CNONCE_LEN: usize = 8;
pub const CALL_ID_LEN: usize = 22;

pub(crate) fn random_text(count: usize) -> String {
    use rand::Rng;
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(count)
        .map(char::from)
        .collect::<String>()
}

pub(crate) fn make_branch() -> String {
    format!("z9hG4bK{}", random_text(BRANCH_LEN))
}

pub(crate) fn make_tag() -> rsip::param::Tag {
    random_text(TAG_LEN).into()
}

pub(crate) fn make_call_id(domain: &str) -> String {
    format!("{}@{}", random_text(CALL_ID_LEN), domain)
}

/// Fresh `Via` for a request leaving through the websocket. Per RFC 7118
/// the sent-by host is the client's `.invalid` contact domain.
pub(crate) fn make_via(contact: &rsip::Uri) -> rsip::headers::Via {
    rsip::headers::Via::new(format!(
        "SIP/2.0/WSS {};branch={}",
        contact.host_with_port,
        make_branch()
    ))
}

pub(crate) fn push_front_header(headers: &mut rsip::Headers, header: rsip::Header) {
    let mut all = headers.iter().cloned().collect::<Vec<_>>();
    all.insert(0, header);
    *headers = all.into();
}
