use super::{push_front_header, random_text, CNONCE_LEN};
use crate::{Error, Result};
use rsip::headers::auth::AuthQop;
use rsip::prelude::{HasHeaders, HeadersExt, ToTypedHeader, UntypedHeader};
use rsip::services::DigestGenerator;
use rsip::typed::{Authorization, ProxyAuthorization};
use rsip::{Header, Request, Response, StatusCode};

#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Credential({})", self.username)
    }
}

/// Answer a 401/407 challenge: clone the request with a bumped CSeq, a
/// fresh Via and a computed digest authorization. The caller retries the
/// transaction at most once.
pub fn answer_challenge(
    request: &Request,
    resp: &Response,
    cred: &Credential,
    new_seq: u32,
    fresh_via: rsip::headers::Via,
) -> Result<Request> {
    let challenge = challenge_of(resp)?;

    let mut new_req = request.clone();
    new_req.cseq_header_mut()?.mut_seq(new_seq)?;

    let auth_qop = AuthQop::Auth {
        cnonce: random_text(CNONCE_LEN),
        nc: 1,
    };

    let generator = DigestGenerator {
        username: cred.username.as_str(),
        password: cred.password.as_str(),
        algorithm: challenge.algorithm.unwrap_or_default(),
        nonce: challenge.nonce.as_str(),
        method: &request.method,
        qop: Some(&auth_qop),
        uri: &request.uri,
        realm: challenge.realm.as_str(),
    };

    let auth = Authorization {
        scheme: challenge.scheme,
        username: cred.username.clone(),
        realm: challenge.realm.clone(),
        nonce: challenge.nonce.clone(),
        uri: request.uri.clone(),
        response: generator.compute(),
        algorithm: challenge.algorithm,
        opaque: challenge.opaque,
        qop: Some(auth_qop),
    };

    new_req
        .headers_mut()
        .retain(|h| !matches!(h, Header::Via(_)));
    push_front_header(new_req.headers_mut(), fresh_via.into());

    new_req.headers_mut().retain(|h| {
        !matches!(
            h,
            Header::Authorization(_) | Header::ProxyAuthorization(_)
        )
    });
    if resp.status_code == StatusCode::ProxyAuthenticationRequired {
        new_req
            .headers_mut()
            .unique_push(ProxyAuthorization(auth).into());
    } else {
        new_req.headers_mut().unique_push(auth.into());
    }
    Ok(new_req)
}

/// The challenge lives in `WWW-Authenticate` on 401 and
/// `Proxy-Authenticate` on 407.
fn challenge_of(resp: &Response) -> Result<rsip::typed::WwwAuthenticate> {
    if resp.status_code == StatusCode::ProxyAuthenticationRequired {
        for header in resp.headers().iter() {
            if let Header::ProxyAuthenticate(h) = header {
                return Ok(rsip::headers::WwwAuthenticate::new(h.value()).typed()?);
            }
        }
    }
    match resp.www_authenticate_header() {
        Some(h) => Ok(h.typed()?),
        None => Err(Error::Error(
            "challenge response carries no authenticate header".to_string(),
        )),
    }
}
