use super::{contact_uri, header_value, ok_response};
use crate::stack::dialog::{DialogCore, Role};
use crate::stack::ua::{escape_replaces, hangup_cause_code, sipfrag_status};
use rsip::headers::*;
use rsip::prelude::{HeadersExt, UntypedHeader};
use rsip::{Header, Method, Request};

fn caller_dialog() -> DialogCore {
    DialogCore::caller(
        "call-1@example.com".to_string(),
        rsip::Uri::try_from("sip:1000@example.com").unwrap(),
        rsip::Uri::try_from("sip:2000@example.com").unwrap(),
        contact_uri(),
        "webphone/test".to_string(),
    )
}

fn inbound_invite() -> Request {
    Request {
        method: Method::Invite,
        uri: rsip::Uri::try_from("sip:1000@abcdef.invalid").unwrap(),
        headers: vec![
            Via::new("SIP/2.0/WSS proxy.example.com;branch=z9hG4bKmock").into(),
            RecordRoute::new("<sip:proxy.example.com;lr>").into(),
            From::new("\"Bob\" <sip:2000@example.com>;tag=bob-tag").into(),
            To::new("<sip:1000@example.com>").into(),
            CallId::new("inbound-1@example.com").into(),
            CSeq::new("10 INVITE").into(),
            Contact::new("<sip:2000@198.51.100.7:5061;transport=wss>").into(),
            MaxForwards::new("70").into(),
        ]
        .into(),
        version: rsip::Version::V2,
        body: b"v=0 remote offer".to_vec(),
    }
}

#[test]
fn test_initial_invite_shape() {
    let dialog = caller_dialog();
    let invite = dialog.make_invite(b"v=0 local offer".to_vec()).unwrap();

    assert_eq!(invite.method, Method::Invite);
    assert_eq!(invite.uri.to_string(), "sip:2000@example.com");
    assert_eq!(invite.cseq_header().unwrap().seq().unwrap(), 1);
    assert!(invite.from_header().unwrap().value().contains(";tag="));
    assert!(!invite.to_header().unwrap().value().contains(";tag="));
    assert_eq!(invite.body, b"v=0 local offer".to_vec());

    let content_type = invite
        .headers
        .iter()
        .find_map(|h| match h {
            Header::ContentType(c) => Some(c.value().to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(content_type, "application/sdp");
}

#[test]
fn test_success_response_updates_target_and_routes() {
    let dialog = caller_dialog();
    let invite = dialog.make_invite(vec![]).unwrap();

    let resp = ok_response(
        &invite,
        "bob-tag",
        vec![
            Contact::new("<sip:2000@198.51.100.7:5061;transport=wss>").into(),
            RecordRoute::new("<sip:p2.example.com;lr>").into(),
            RecordRoute::new("<sip:p1.example.com;lr>").into(),
        ],
    );
    dialog.absorb_success(&resp).unwrap();

    assert_eq!(dialog.remote_tag(), "bob-tag");
    assert!(dialog.remote_target().to_string().contains("198.51.100.7"));

    // In-dialog requests ride the reversed route set and carry both tags.
    let bye = dialog.make_request(Method::Bye, vec![], None).unwrap();
    assert!(bye.to_header().unwrap().value().contains("tag=bob-tag"));
    let routes: Vec<String> = bye
        .headers
        .iter()
        .filter_map(|h| match h {
            Header::Route(r) => Some(r.value().to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(routes.len(), 2);
    assert!(routes[0].contains("p1.example.com"));
    assert!(routes[1].contains("p2.example.com"));

    // ACK reuses the INVITE's sequence number.
    let ack = dialog.make_ack(1).unwrap();
    assert_eq!(ack.cseq_header().unwrap().seq().unwrap(), 1);
    assert_eq!(ack.cseq_header().unwrap().method().unwrap(), Method::Ack);
}

#[test]
fn test_callee_dialog_swaps_headers() {
    let invite = inbound_invite();
    let dialog = DialogCore::callee(
        &invite,
        "our-tag".to_string(),
        contact_uri(),
        "webphone/test".to_string(),
    )
    .unwrap();

    assert_eq!(dialog.role, Role::Callee);
    assert_eq!(dialog.call_id, "inbound-1@example.com");
    assert_eq!(dialog.local_tag(), "our-tag");
    assert_eq!(dialog.remote_tag(), "bob-tag");
    assert_eq!(dialog.remote_seq(), 10);
    assert!(dialog.remote_target().to_string().contains("198.51.100.7"));

    // Requests we originate go From us (our tag) To the caller.
    let bye = dialog.make_request(Method::Bye, vec![], None).unwrap();
    assert!(bye.from_header().unwrap().value().contains("tag=our-tag"));
    assert!(bye.to_header().unwrap().value().contains("tag=bob-tag"));
}

#[test]
fn test_cancel_mirrors_the_invite() {
    let dialog = caller_dialog();
    let invite = dialog.make_invite(b"v=0".to_vec()).unwrap();
    let cancel = dialog.make_cancel(&invite).unwrap();

    assert_eq!(cancel.method, Method::Cancel);
    assert_eq!(
        cancel.cseq_header().unwrap().seq().unwrap(),
        invite.cseq_header().unwrap().seq().unwrap()
    );
    assert_eq!(cancel.cseq_header().unwrap().method().unwrap(), Method::Cancel);
    assert!(cancel.body.is_empty());
    assert_eq!(
        cancel.via_header().unwrap().value(),
        invite.via_header().unwrap().value()
    );
}

#[test]
fn test_refer_to_replaces_escaping() {
    let replaces = escape_replaces("call-1@example.com;to-tag=b;from-tag=a");
    assert_eq!(replaces, "call-1%40example.com%3Bto-tag%3Db%3Bfrom-tag%3Da");
}

#[test]
fn test_sipfrag_status_parsing() {
    assert_eq!(sipfrag_status("SIP/2.0 200 OK"), Some(200));
    assert_eq!(sipfrag_status("SIP/2.0 486 Busy Here\r\n"), Some(486));
    assert_eq!(sipfrag_status("not a sipfrag"), None);
    assert_eq!(sipfrag_status(""), None);
}

#[test]
fn test_hangup_cause_code_extraction() {
    let mut bye = inbound_invite();
    bye.method = Method::Bye;
    assert_eq!(hangup_cause_code(&bye), None);

    bye.headers.push(Header::Other(
        "X-Asterisk-Hangupcausecode".to_string(),
        "58".to_string(),
    ));
    assert_eq!(hangup_cause_code(&bye), Some(58));
    assert_eq!(header_value(&bye, "x-asterisk-hangupcausecode"), Some("58"));
}
