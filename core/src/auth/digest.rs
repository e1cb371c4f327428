//! HTTP Digest access authentication (RFC 2617, RFC 7616).

use md5::Md5;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::challenge::param;
use crate::credentials::Credentials;
use crate::http::HttpMethod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        [Self::Md5, Self::Md5Sess, Self::Sha256, Self::Sha256Sess]
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(value))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Md5Sess => "MD5-sess",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, DigestAlgorithm::Md5Sess | DigestAlgorithm::Sha256Sess)
    }

    /// Lowercase hex digest of `data`.
    pub fn hash(&self, data: &[u8]) -> String {
        match self {
            DigestAlgorithm::Md5 | DigestAlgorithm::Md5Sess => hex::encode(Md5::digest(data)),
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha256Sess => hex::encode(Sha256::digest(data)),
        }
    }
}

/// Quality of protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

/// The parameters of a Digest challenge this client can answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// `None` selects the RFC 2069 compatible response.
    pub qop: Option<Qop>,
    pub stale: bool,
}

impl DigestChallenge {
    /// Build from parsed challenge parameters (names already lowercased).
    pub fn from_params(params: &[(String, String)]) -> Result<Self, String> {
        let realm = param(params, "realm").ok_or("missing realm")?;
        let nonce = param(params, "nonce").ok_or("missing nonce")?;

        let algorithm = match param(params, "algorithm") {
            None => DigestAlgorithm::Md5,
            Some(name) => DigestAlgorithm::parse(name).ok_or_else(|| format!("unsupported algorithm {name:?}"))?,
        };

        let qop = match param(params, "qop") {
            None => None,
            Some(offered) => {
                let options: Vec<&str> = offered.split(',').map(str::trim).collect();
                if options.iter().any(|o| o.eq_ignore_ascii_case("auth")) {
                    Some(Qop::Auth)
                } else if options.iter().any(|o| o.eq_ignore_ascii_case("auth-int")) {
                    Some(Qop::AuthInt)
                } else {
                    return Err(format!("unsupported qop {offered:?}"));
                }
            }
        };

        Ok(Self {
            realm: realm.to_string(),
            nonce: nonce.to_string(),
            opaque: param(params, "opaque").map(str::to_string),
            algorithm,
            qop,
            stale: param(params, "stale").is_some_and(|s| s.eq_ignore_ascii_case("true")),
        })
    }
}

/// A Digest challenge plus the nonce count used against it.
///
/// Each call to [`DigestSession::authorize`] consumes one nonce count, so a
/// session can be reused for proactive authorization until the server
/// rejects the nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSession {
    challenge: DigestChallenge,
    nonce_count: u32,
}

impl DigestSession {
    pub fn new(challenge: DigestChallenge) -> Self {
        Self {
            challenge,
            nonce_count: 0,
        }
    }

    pub fn challenge(&self) -> &DigestChallenge {
        &self.challenge
    }

    /// Number of `Authorization` values produced so far.
    pub fn nonce_count(&self) -> u32 {
        self.nonce_count
    }

    /// Compute the next `Authorization` header value for a request.
    ///
    /// `target` is the request target (path and query) and `body` is only
    /// read when the challenge asked for `auth-int`.
    pub fn authorize(&mut self, method: HttpMethod, target: &str, credentials: &Credentials, body: &[u8]) -> String {
        let cnonce = Uuid::new_v4().simple().to_string();
        self.authorize_with_cnonce(method.as_str(), target, credentials, body, &cnonce)
    }

    /// [`DigestSession::authorize`] with a caller-chosen client nonce.
    pub fn authorize_with_cnonce(
        &mut self,
        method: &str,
        target: &str,
        credentials: &Credentials,
        body: &[u8],
        cnonce: &str,
    ) -> String {
        self.nonce_count = self.nonce_count.wrapping_add(1);
        let nc = format!("{:08x}", self.nonce_count);
        let c = &self.challenge;
        let h = |data: &str| c.algorithm.hash(data.as_bytes());

        let mut ha1 = h(&format!("{}:{}:{}", credentials.username(), c.realm, credentials.password()));
        if c.algorithm.is_session() {
            ha1 = h(&format!("{ha1}:{}:{cnonce}", c.nonce));
        }

        let ha2 = match c.qop {
            Some(Qop::AuthInt) => h(&format!("{method}:{target}:{}", c.algorithm.hash(body))),
            _ => h(&format!("{method}:{target}")),
        };

        let response = match c.qop {
            Some(qop) => h(&format!("{ha1}:{}:{nc}:{cnonce}:{}:{ha2}", c.nonce, qop.as_str())),
            None => h(&format!("{ha1}:{}:{ha2}", c.nonce)),
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{response}\", algorithm={}",
            quote(credentials.username()),
            quote(&c.realm),
            quote(&c.nonce),
            quote(target),
            c.algorithm.as_str(),
        );
        if let Some(qop) = c.qop {
            header.push_str(&format!(", qop={}, nc={nc}, cnonce=\"{}\"", qop.as_str(), quote(cnonce)));
        } else if c.algorithm.is_session() {
            header.push_str(&format!(", cnonce=\"{}\"", quote(cnonce)));
        }
        if let Some(opaque) = &c.opaque {
            header.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }
        header
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
