//! Challenge-response authentication.
//!
//! # Design
//! The client sends a request without credentials unless the cache already
//! holds a scheme for that origin and credential pair. A 401 is answered at
//! most once: Digest whenever offered, Basic only over https. Whatever
//! answered successfully is recorded in the [`AuthCache`] so later requests
//! authenticate proactively.

mod cache;
mod challenge;
mod digest;

pub use cache::{AuthCache, AuthKey, AuthScheme, HostAuthState};
pub use challenge::{parse_challenges, Challenge};
pub use digest::{DigestAlgorithm, DigestChallenge, DigestSession, Qop};

use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::http::{HttpRequest, HttpResponse, WWW_AUTHENTICATE};
use crate::uri::Uri;

/// An `Authorization` value answering a challenge, plus the state to cache
/// if the server accepts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeAnswer {
    pub authorization: String,
    pub state: HostAuthState,
}

/// Answer the challenges carried by a 401 `response` to `request`.
///
/// Returns `None` when nothing offered can be answered safely, in which case
/// the 401 is final.
pub fn answer_challenge(
    request: &HttpRequest,
    uri: &Uri,
    response: &HttpResponse,
    credentials: &Credentials,
) -> Option<ChallengeAnswer> {
    let challenges: Vec<Challenge> = response
        .headers
        .get_all(WWW_AUTHENTICATE)
        .flat_map(parse_challenges)
        .collect();

    let digest = challenges.iter().find_map(|c| match c {
        Challenge::Digest(d) => Some(d.clone()),
        _ => None,
    });
    if let Some(digest) = digest {
        let mut session = DigestSession::new(digest);
        let authorization = session.authorize(request.method, uri.request_target(), credentials, request.body_bytes());
        debug!(origin = %uri.origin(), algorithm = session.challenge().algorithm.as_str(), "answering digest challenge");
        return Some(ChallengeAnswer {
            authorization,
            state: HostAuthState::Digest(session),
        });
    }

    let basic_realm = challenges.iter().find_map(|c| match c {
        Challenge::Basic { realm } => Some(realm.clone()),
        _ => None,
    });
    if let Some(realm) = basic_realm {
        if !uri.is_secure() {
            warn!(origin = %uri.origin(), "refusing to send basic credentials over plain http");
            return None;
        }
        debug!(origin = %uri.origin(), "answering basic challenge");
        return Some(ChallengeAnswer {
            authorization: credentials.basic_authorization(),
            state: HostAuthState::Basic { realm },
        });
    }

    debug!(origin = %uri.origin(), offered = challenges.len(), "no answerable challenge");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge_response(value: &str) -> HttpResponse {
        HttpResponse::new(401).with_header(WWW_AUTHENTICATE, value)
    }

    fn creds() -> Credentials {
        Credentials::new("user", "pass")
    }

    #[test]
    fn basic_over_https_is_answered() {
        let uri = Uri::parse("https://x.org/formList").unwrap();
        let request = HttpRequest::get(uri.as_str());
        let answer = answer_challenge(&request, &uri, &challenge_response(r#"Basic realm="protected area""#), &creds())
            .unwrap();
        assert_eq!(answer.authorization, "Basic dXNlcjpwYXNz");
        assert_eq!(answer.state.scheme(), AuthScheme::Basic);
        assert_eq!(answer.state.realm(), Some("protected area"));
    }

    #[test]
    fn basic_over_http_is_refused() {
        let uri = Uri::parse("http://x.org/formList").unwrap();
        let request = HttpRequest::get(uri.as_str());
        assert!(answer_challenge(&request, &uri, &challenge_response(r#"Basic realm="x""#), &creds()).is_none());
    }

    #[test]
    fn digest_is_preferred_over_basic() {
        let uri = Uri::parse("https://x.org/formList").unwrap();
        let request = HttpRequest::get(uri.as_str());
        let response = HttpResponse::new(401)
            .with_header(WWW_AUTHENTICATE, r#"Basic realm="x""#)
            .with_header(WWW_AUTHENTICATE, r#"Digest realm="x", nonce="n", qop="auth""#);

        let answer = answer_challenge(&request, &uri, &response, &creds()).unwrap();
        assert!(answer.authorization.starts_with("Digest "));
        assert!(answer.authorization.contains("uri=\"/formList\""));
        assert_eq!(answer.state.scheme(), AuthScheme::Digest);
    }

    #[test]
    fn digest_over_http_is_answered() {
        let uri = Uri::parse("http://x.org/formList").unwrap();
        let request = HttpRequest::get(uri.as_str());
        let answer = answer_challenge(
            &request,
            &uri,
            &challenge_response(r#"Digest realm="ODK Aggregate", qop="auth", nonce="abc""#),
            &creds(),
        );
        assert!(answer.is_some());
    }

    #[test]
    fn missing_or_unknown_challenge_is_not_answered() {
        let uri = Uri::parse("https://x.org/formList").unwrap();
        let request = HttpRequest::get(uri.as_str());
        assert!(answer_challenge(&request, &uri, &HttpResponse::new(401), &creds()).is_none());
        assert!(answer_challenge(&request, &uri, &challenge_response("Bearer realm=\"x\""), &creds()).is_none());
    }
}
