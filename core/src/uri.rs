//! Minimal http/https URI handling.
//!
//! Only what the client needs: scheme (to decide whether Basic credentials may
//! be sent), host and effective port (to key the authentication cache), and
//! the request target (the `uri` field of a Digest response).

use std::fmt;
use std::str::FromStr;

use crate::error::OpenRosaError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    raw: String,
    secure: bool,
    host: String,
    port: Option<u16>,
    target: String,
}

impl Uri {
    pub fn parse(input: &str) -> Result<Self, OpenRosaError> {
        let raw = input.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| OpenRosaError::invalid_uri(raw, "missing scheme"))?;
        let secure = if scheme.eq_ignore_ascii_case("https") {
            true
        } else if scheme.eq_ignore_ascii_case("http") {
            false
        } else {
            return Err(OpenRosaError::invalid_uri(raw, format!("unsupported scheme {scheme:?}")));
        };

        let authority_end = rest.find(|c: char| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
        let authority = &rest[..authority_end];
        let remainder = &rest[authority_end..];

        // Userinfo is never used for credentials; drop it.
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
        let (host, port) = split_host_port(host_port).map_err(|reason| OpenRosaError::invalid_uri(raw, reason))?;
        if host.is_empty() {
            return Err(OpenRosaError::invalid_uri(raw, "missing host"));
        }

        let without_fragment = remainder.split('#').next().unwrap_or("");
        let target = if without_fragment.is_empty() {
            "/".to_string()
        } else if without_fragment.starts_with('?') {
            format!("/{without_fragment}")
        } else {
            without_fragment.to_string()
        };

        Ok(Self {
            raw: raw.to_string(),
            secure,
            host: host.to_ascii_lowercase(),
            port,
            target,
        })
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// True when the URI uses TLS.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Lowercased host without brackets or port.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, or the scheme default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 443 } else { 80 })
    }

    /// Path plus query, as sent on the request line.
    pub fn request_target(&self) -> &str {
        &self.target
    }

    /// Path without the query.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }

    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// `scheme://host:port` with the port always present.
    pub fn origin(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.scheme(), self.host, self.port())
        } else {
            format!("{}://{}:{}", self.scheme(), self.host, self.port())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn split_host_port(host_port: &str) -> Result<(&str, Option<u16>), String> {
    if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| "unterminated IPv6 literal".to_string())?;
        let port = match after.strip_prefix(':') {
            Some(p) => Some(parse_port(p)?),
            None if after.is_empty() => None,
            None => return Err(format!("unexpected {after:?} after IPv6 literal")),
        };
        return Ok((host, port));
    }
    match host_port.rsplit_once(':') {
        Some((host, p)) => Ok((host, Some(parse_port(p)?))),
        None => Ok((host_port, None)),
    }
}

fn parse_port(p: &str) -> Result<u16, String> {
    p.parse::<u16>().map_err(|_| format!("invalid port {p:?}"))
}

impl FromStr for Uri {
    type Err = OpenRosaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
