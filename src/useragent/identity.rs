use rsip::prelude::UntypedHeader;
use rsip::Header;

/// Who the far end claims to be.
///
/// Derived from the first present of `P-Asserted-Identity`,
/// `Remote-Party-Id` and `From` on inbound requests (`To` takes the place
/// of `From` when reading responses to our own requests).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub display_name: Option<String>,
    pub user: Option<String>,
}

impl std::fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.display_name, &self.user) {
            (Some(name), Some(user)) => write!(f, "{} <{}>", name, user),
            (Some(name), None) => write!(f, "{}", name),
            (None, Some(user)) => write!(f, "{}", user),
            (None, None) => write!(f, "anonymous"),
        }
    }
}

/// Extract the remote identity from a request's headers.
pub fn from_request_headers(headers: &rsip::Headers) -> RemoteIdentity {
    first_identity(headers, |h| match h {
        Header::From(from) => Some(from.value().to_string()),
        _ => None,
    })
}

/// Extract the remote identity from a response to one of our requests,
/// where the far end lives in `To`.
pub fn from_response_headers(headers: &rsip::Headers) -> RemoteIdentity {
    first_identity(headers, |h| match h {
        Header::To(to) => Some(to.value().to_string()),
        _ => None,
    })
}

fn first_identity<F>(headers: &rsip::Headers, fallback: F) -> RemoteIdentity
where
    F: Fn(&Header) -> Option<String>,
{
    for name in ["P-Asserted-Identity", "Remote-Party-Id"] {
        for header in headers.iter() {
            if let Header::Other(key, value) = header {
                if key.eq_ignore_ascii_case(name) {
                    return parse_name_addr(value);
                }
            }
        }
    }
    for header in headers.iter() {
        if let Some(value) = fallback(header) {
            return parse_name_addr(&value);
        }
    }
    RemoteIdentity::default()
}

/// Parse `"Display Name" <sip:user@host>;params` and friends.
fn parse_name_addr(value: &str) -> RemoteIdentity {
    let (display, uri_part) = match (value.find('<'), value.find('>')) {
        (Some(open), Some(close)) if open < close => {
            let display = value[..open].trim().trim_matches('"').trim();
            (display, &value[open + 1..close])
        }
        _ => ("", value.split(';').next().unwrap_or(value).trim()),
    };

    let user = uri_user(uri_part);
    RemoteIdentity {
        display_name: if display.is_empty() {
            None
        } else {
            Some(display.to_string())
        },
        user,
    }
}

fn uri_user(uri: &str) -> Option<String> {
    let rest = uri
        .strip_prefix("sips:")
        .or_else(|| uri.strip_prefix("sip:"))
        .unwrap_or(uri);
    let user = rest.split('@').next()?;
    if user.is_empty() || user == rest {
        return None;
    }
    Some(user.split(';').next().unwrap_or(user).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsip::headers::*;

    fn headers(extra: Vec<Header>) -> rsip::Headers {
        let mut all: Vec<Header> = vec![
            From::new("\"Alice Wonder\" <sip:alice@example.com>;tag=abc").into(),
            To::new("Bob <sip:bob@example.com>").into(),
            CallId::new("mock-call-id").into(),
        ];
        all.extend(extra);
        all.into()
    }

    #[test]
    fn test_prefers_p_asserted_identity() {
        let headers = headers(vec![
            Header::Other(
                "Remote-Party-Id".into(),
                "\"RPID\" <sip:rpid@example.com>".into(),
            ),
            Header::Other(
                "P-Asserted-Identity".into(),
                "\"Carol PAI\" <sip:carol@example.com>".into(),
            ),
        ]);
        let identity = from_request_headers(&headers);
        assert_eq!(identity.display_name.as_deref(), Some("Carol PAI"));
        assert_eq!(identity.user.as_deref(), Some("carol"));
    }

    #[test]
    fn test_falls_back_to_remote_party_id_then_from() {
        let with_rpid = headers(vec![Header::Other(
            "Remote-Party-Id".into(),
            "<sip:2002@pbx.example.com;party=calling>".into(),
        )]);
        let identity = from_request_headers(&with_rpid);
        assert_eq!(identity.display_name, None);
        assert_eq!(identity.user.as_deref(), Some("2002"));

        let from_only = headers(vec![]);
        let identity = from_request_headers(&from_only);
        assert_eq!(identity.display_name.as_deref(), Some("Alice Wonder"));
        assert_eq!(identity.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_bare_uri_and_missing_user() {
        assert_eq!(
            parse_name_addr("sip:100@host.example.com;user=phone"),
            RemoteIdentity {
                display_name: None,
                user: Some("100".to_string()),
            }
        );
        assert_eq!(parse_name_addr("sip:host.example.com").user, None);
    }

    #[test]
    fn test_response_identity_reads_to_header() {
        let identity = from_response_headers(&headers(vec![]));
        assert_eq!(identity.display_name.as_deref(), Some("Bob"));
        assert_eq!(identity.user.as_deref(), Some("bob"));
    }
}
